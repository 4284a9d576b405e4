//! Batch aggregation and threshold testing
//!
//! One tester task per metric. Every test tick it consumes exactly one
//! scrape batch and reduces it to a single [`TestResult`] with the metric's
//! aggregation algorithm.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::normalize::{Sample, ScrapedMetric};
use crate::model::{Algorithm, MetricSpec};

/// One aggregated verdict per test tick
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub lower_bound_test_passed: bool,
    pub upper_bound_test_passed: bool,
    pub metric_name: String,
    pub value: f64,
}

impl TestResult {
    fn failed(metric_name: &str) -> Self {
        Self {
            lower_bound_test_passed: false,
            upper_bound_test_passed: false,
            metric_name: metric_name.to_string(),
            value: 0.0,
        }
    }
}

/// Compare a single real value against the metric's thresholds parsed as
/// reals. Unparsable thresholds fail both bounds.
pub fn test_value_bounds(metric: &MetricSpec, value: f64) -> (bool, bool) {
    let down = match metric.scale_down_value.parse::<f64>() {
        Ok(v) => v,
        Err(e) => {
            warn!("Float conversion error - scaleDownValue: {}", e);
            return (false, false);
        }
    };
    let up = match metric.scale_up_value.parse::<f64>() {
        Ok(v) => v,
        Err(e) => {
            warn!("Float conversion error - scaleUpValue: {}", e);
            return (false, false);
        }
    };
    (value <= down, value >= up)
}

/// Reduce one scrape batch to a [`TestResult`] with the metric's algorithm
pub fn aggregate_batch(batch: &[ScrapedMetric], metric: &MetricSpec) -> TestResult {
    if batch.is_empty() {
        debug!("No scrapes found for metric {}", metric.name);
        return TestResult::failed(&metric.name);
    }
    match metric.parsed_algorithm() {
        Algorithm::Mean => mean_result(&flatten(batch), metric),
        Algorithm::Median => median_result(&flatten(batch), metric),
        Algorithm::TrimmedMean | Algorithm::Arimax => {
            trimmed_mean_result(&flatten(batch), metric, metric.trimmed_percentage)
        }
        Algorithm::Default => voting_result(&flatten(batch), metric),
    }
}

/// Expand every scrape into its individual samples
fn flatten(batch: &[ScrapedMetric]) -> Vec<Sample> {
    batch.iter().flat_map(|s| s.samples.iter().cloned()).collect()
}

fn mean(samples: &[Sample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
}

fn mean_result(samples: &[Sample], metric: &MetricSpec) -> TestResult {
    if samples.is_empty() {
        return TestResult::failed(&metric.name);
    }
    let value = mean(samples);
    let (lower, upper) = test_value_bounds(metric, value);
    TestResult {
        lower_bound_test_passed: lower,
        upper_bound_test_passed: upper,
        metric_name: metric.name.clone(),
        value,
    }
}

fn median_result(samples: &[Sample], metric: &MetricSpec) -> TestResult {
    if samples.is_empty() {
        return TestResult::failed(&metric.name);
    }
    let mut sorted: Vec<f64> = samples.iter().map(|s| s.value).collect();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let value = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    let (lower, upper) = test_value_bounds(metric, value);
    TestResult {
        lower_bound_test_passed: lower,
        upper_bound_test_passed: upper,
        metric_name: metric.name.clone(),
        value,
    }
}

/// Sort descending, trim k = round(n * pct/100 / 2) from each end, then take
/// the plain mean of the remainder
fn trimmed_mean_result(
    samples: &[Sample],
    metric: &MetricSpec,
    trimmed_percentage: i64,
) -> TestResult {
    if samples.is_empty() {
        return TestResult::failed(&metric.name);
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let n = sorted.len();
    let k = (n as f64 * (trimmed_percentage as f64 / 100.0) / 2.0).round() as usize;
    if k == 0 {
        return mean_result(&sorted, metric);
    }
    if 2 * k >= n {
        return TestResult::failed(&metric.name);
    }
    mean_result(&sorted[k..n - k], metric)
}

/// Per-sample voting: each bound passes iff the passing fraction reaches the
/// configured quorum. Invalid samples count as both failed. The emitted
/// numeric value is 0.
fn voting_result(samples: &[Sample], metric: &MetricSpec) -> TestResult {
    if samples.is_empty() {
        return TestResult::failed(&metric.name);
    }
    let mut lower_passed = 0usize;
    let mut upper_passed = 0usize;
    for sample in samples {
        if !sample.valid {
            continue;
        }
        if sample.lower_bound_passed {
            lower_passed += 1;
        }
        if sample.upper_bound_passed {
            upper_passed += 1;
        }
    }
    let total = samples.len() as f64;
    let quorum = metric.percentage_of_test_condition_fulfillment as f64;
    TestResult {
        lower_bound_test_passed: lower_passed as f64 / total * 100.0 >= quorum,
        upper_bound_test_passed: upper_passed as f64 / total * 100.0 >= quorum,
        metric_name: metric.name.clone(),
        value: 0.0,
    }
}

/// Spawn the tester task for one metric
///
/// Each test tick consumes one batch from the scraper and emits exactly one
/// [`TestResult`].
pub fn spawn_tester(
    metric: MetricSpec,
    mut batches: mpsc::Receiver<Vec<ScrapedMetric>>,
    results: mpsc::Sender<TestResult>,
) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let test_duration = metric
        .test_duration()
        .unwrap_or_else(|| Duration::from_secs(60));

    tokio::spawn(async move {
        let mut ticker = interval(test_duration);

        debug!(
            "Tester started: metric={}, interval={:?}, algorithm={:?}",
            metric.name,
            test_duration,
            metric.parsed_algorithm()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        maybe_batch = batches.recv() => {
                            let batch = match maybe_batch {
                                Some(batch) => batch,
                                None => break,
                            };
                            let result = aggregate_batch(&batch, &metric);
                            if results.send(result).await.is_err() {
                                break;
                            }
                        }
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Tester for metric {} shutting down", metric.name);
                        break;
                    }
                }
            }
        }
    });

    shutdown_tx
}
