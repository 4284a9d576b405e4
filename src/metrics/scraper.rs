//! Periodic metric scraper
//!
//! One scraper task per metric. Every scrape tick it queries the time-series
//! backend and normalizes the reply; once a test window's worth of ticks has
//! elapsed it emits the batch of valid results downstream and starts a new
//! one. Emission is synchronous: a stalled consumer stalls this producer's
//! tick, never the rest of the controller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::normalize::{normalize_or_invalid, ScrapedMetric};
use crate::clients::TimeSeriesQuery;
use crate::model::MetricSpec;

/// Run one backend query and normalize the reply; errors map to an invalid
/// result
pub async fn scrape_once(
    backend: &dyn TimeSeriesQuery,
    metric: &MetricSpec,
    query: &str,
) -> ScrapedMetric {
    match backend.query(&metric.prometheus_path, query).await {
        Ok(value) => normalize_or_invalid(&value, metric),
        Err(e) => {
            warn!("Scrape error for metric {}: {}", metric.name, e);
            ScrapedMetric {
                metric_name: metric.name.clone(),
                lower_bound_passed: false,
                upper_bound_passed: false,
                valid: false,
                samples: vec![],
            }
        }
    }
}

/// Spawn the scraper task for one metric
///
/// Returns a shutdown sender; on shutdown the ticker is released and the
/// task returns.
pub fn spawn_scraper(
    metric: MetricSpec,
    backend: Arc<dyn TimeSeriesQuery>,
    batches: mpsc::Sender<Vec<ScrapedMetric>>,
) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let scrape_duration = metric
        .scrape_duration()
        .unwrap_or_else(|| Duration::from_secs(1));
    let scrapes_per_test = metric.scrapes_per_test();

    tokio::spawn(async move {
        let mut ticker = interval(scrape_duration);
        let mut tick_count: u64 = 0;
        let mut batch: Vec<ScrapedMetric> = Vec::new();

        debug!(
            "Scraper started: metric={}, interval={:?}, window={} ticks",
            metric.name, scrape_duration, scrapes_per_test
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = scrape_once(backend.as_ref(), &metric, &metric.prometheus_query).await;
                    if result.valid {
                        batch.push(result);
                    }
                    tick_count += 1;
                    if tick_count >= scrapes_per_test {
                        tick_count = 0;
                        let window = std::mem::take(&mut batch);
                        if batches.send(window).await.is_err() {
                            break;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Scraper for metric {} shutting down", metric.name);
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::clients::{MetricValue, QueryError, ScalarPoint};

    struct FixedBackend {
        value: f64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TimeSeriesQuery for FixedBackend {
        async fn query(&self, _base_url: &str, _query: &str) -> Result<MetricValue, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(MetricValue::Scalar(ScalarPoint {
                value: self.value,
                timestamp: 0.0,
            }))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl TimeSeriesQuery for FailingBackend {
        async fn query(&self, _base_url: &str, _query: &str) -> Result<MetricValue, QueryError> {
            Err(QueryError::Http("connection refused".to_string()))
        }
    }

    fn fast_metric() -> MetricSpec {
        MetricSpec {
            name: "cpu".to_string(),
            metric_type: "utilization".to_string(),
            prometheus_path: "http://prometheus:9090".to_string(),
            prometheus_query: "avg(cpu)".to_string(),
            scale_down_value: "20".to_string(),
            scale_up_value: "80".to_string(),
            scale_value_type: "double".to_string(),
            scrape_interval: "10ms".to_string(),
            test_interval: "30ms".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scraper_emits_full_window() {
        let backend = Arc::new(FixedBackend {
            value: 90.0,
            calls: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(1);
        let stop = spawn_scraper(fast_metric(), backend, tx);

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for batch")
            .expect("channel closed");
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|s| s.upper_bound_passed));

        let _ = stop.send(true);
    }

    #[tokio::test]
    async fn test_scraper_drops_failed_scrapes() {
        let backend = Arc::new(FailingBackend);
        let (tx, mut rx) = mpsc::channel(1);
        let stop = spawn_scraper(fast_metric(), backend, tx);

        // The window still closes on time, just empty
        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for batch")
            .expect("channel closed");
        assert!(batch.is_empty());

        let _ = stop.send(true);
    }

    #[tokio::test]
    async fn test_scrape_once_invalid_on_error() {
        let metric = fast_metric();
        let result = scrape_once(&FailingBackend, &metric, "avg(cpu)").await;
        assert!(!result.valid);
        assert_eq!(result.metric_name, "cpu");
    }
}
