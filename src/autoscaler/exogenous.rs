//! Exogenous regressor pipeline
//!
//! A miniature scrape-and-reduce pipeline feeding the predictive evaluator.
//! It scrapes the exogenous query at the metric's scrape interval and emits
//! one robust mean per test window, clamped to the configured maximum. An
//! emission is flagged invalid when fewer than a quorum of the window's
//! scrapes produced valid samples.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::clients::TimeSeriesQuery;
use crate::metrics::scrape_once;
use crate::model::MetricSpec;

/// One exogenous input per test tick
#[derive(Debug, Clone, PartialEq)]
pub struct ExogenousValue {
    pub metric_name: String,
    pub value: f64,
    pub valid: bool,
}

/// Robust mean: sort descending, trim symmetrically by the metric's trimmed
/// percentage, average the remainder, clamp to the exogenous maximum
pub(crate) fn robust_mean(values: &[f64], metric: &MetricSpec) -> f64 {
    if values.is_empty() {
        debug!("No exogenous scrapes found for metric {}", metric.name);
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let k = (n as f64 * (metric.trimmed_percentage as f64 / 100.0) / 2.0).round() as usize;
    let trimmed: &[f64] = if k == 0 || 2 * k >= n {
        &sorted
    } else {
        &sorted[k..n - k]
    };
    let mean = trimmed.iter().sum::<f64>() / trimmed.len() as f64;

    match metric.exogenous_regressor_max_value.parse::<f64>() {
        Ok(max) => mean.min(max),
        Err(_) => mean,
    }
}

/// Valid-scrape quorum for a window of `window_ticks` ticks
pub(crate) fn required_valid_scrapes(window_ticks: u64) -> usize {
    ((window_ticks + 1).div_ceil(2)) as usize
}

/// Spawn the exogenous scrape loop for one ARIMAX metric
///
/// Emissions go through a one-slot cushion to the predictive evaluator; the
/// send never blocks the scrape tick because the evaluator drains the
/// channel on every test result.
pub fn spawn_exogenous_regressor(
    metric: MetricSpec,
    backend: Arc<dyn TimeSeriesQuery>,
    output: mpsc::Sender<ExogenousValue>,
) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let scrape_duration = metric
        .scrape_duration()
        .unwrap_or_else(|| Duration::from_secs(1));
    let window_ticks = metric.scrapes_per_test();
    let quorum = required_valid_scrapes(window_ticks);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(scrape_duration);
        let mut tick_count: u64 = 0;
        let mut values: Vec<f64> = Vec::new();

        debug!(
            "Exogenous regressor started: metric={}, window={} ticks, quorum={}",
            metric.name, window_ticks, quorum
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = scrape_once(
                        backend.as_ref(),
                        &metric,
                        &metric.exogenous_regressor_query,
                    )
                    .await;
                    if result.valid {
                        values.extend(result.samples.iter().map(|s| s.value));
                    }
                    tick_count += 1;
                    if tick_count >= window_ticks {
                        tick_count = 0;
                        let window = std::mem::take(&mut values);
                        let emission = if window.len() < quorum {
                            ExogenousValue {
                                metric_name: metric.name.clone(),
                                value: 0.0,
                                valid: false,
                            }
                        } else {
                            ExogenousValue {
                                metric_name: metric.name.clone(),
                                value: robust_mean(&window, &metric),
                                valid: true,
                            }
                        };
                        if output.send(emission).await.is_err() {
                            break;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Exogenous regressor for metric {} shutting down", metric.name);
                        break;
                    }
                }
            }
        }
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::clients::{MetricValue, QueryError, ScalarPoint};

    fn metric(trimmed_percentage: i64, max_value: &str) -> MetricSpec {
        MetricSpec {
            name: "queue".to_string(),
            scale_down_value: "5".to_string(),
            scale_up_value: "50".to_string(),
            scale_value_type: "double".to_string(),
            trimmed_percentage,
            exogenous_regressor_max_value: max_value.to_string(),
            exogenous_regressor_query: "queue_depth".to_string(),
            scrape_interval: "10ms".to_string(),
            test_interval: "30ms".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_robust_mean_plain_when_no_trim() {
        let m = metric(0, "1000");
        assert_eq!(robust_mean(&[10.0, 20.0, 30.0], &m), 20.0);
    }

    #[test]
    fn test_robust_mean_trims_symmetrically() {
        let m = metric(40, "1000");
        // n=5, k=1: drop 500 and 0, mean of {30, 20, 10} = 20
        assert_eq!(robust_mean(&[500.0, 30.0, 20.0, 10.0, 0.0], &m), 20.0);
    }

    #[test]
    fn test_robust_mean_clamps_to_maximum() {
        let m = metric(0, "15");
        assert_eq!(robust_mean(&[100.0, 200.0], &m), 15.0);
    }

    #[test]
    fn test_robust_mean_unparsable_max_means_no_clamp() {
        let m = metric(0, "");
        assert_eq!(robust_mean(&[100.0, 200.0], &m), 150.0);
    }

    #[test]
    fn test_quorum() {
        assert_eq!(required_valid_scrapes(1), 1);
        assert_eq!(required_valid_scrapes(3), 2);
        assert_eq!(required_valid_scrapes(4), 3);
    }

    struct FixedBackend(f64);

    #[async_trait]
    impl TimeSeriesQuery for FixedBackend {
        async fn query(&self, _base_url: &str, _query: &str) -> Result<MetricValue, QueryError> {
            Ok(MetricValue::Scalar(ScalarPoint {
                value: self.0,
                timestamp: 0.0,
            }))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl TimeSeriesQuery for FailingBackend {
        async fn query(&self, _base_url: &str, _query: &str) -> Result<MetricValue, QueryError> {
            Err(QueryError::Http("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_emits_valid_robust_mean() {
        let (tx, mut rx) = mpsc::channel(1);
        let stop = spawn_exogenous_regressor(metric(0, "1000"), Arc::new(FixedBackend(12.0)), tx);

        let emission = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert!(emission.valid);
        assert_eq!(emission.value, 12.0);

        let _ = stop.send(true);
    }

    #[tokio::test]
    async fn test_emits_invalid_below_quorum() {
        let (tx, mut rx) = mpsc::channel(1);
        let stop = spawn_exogenous_regressor(metric(0, "1000"), Arc::new(FailingBackend), tx);

        let emission = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert!(!emission.valid);

        let _ = stop.send(true);
    }
}
