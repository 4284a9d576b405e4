//! Predictive evaluator
//!
//! Same contract as the reactive evaluator, augmented with a one-step ARIMAX
//! prediction. The prediction is tested against the metric's thresholds and
//! its verdict replaces the freshest sample's vote in the majority count.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::exogenous::ExogenousValue;
use super::reactive::{check_window, required_positive_tests};
use super::window::RingWindow;
use super::{AutoscaleEvaluation, EvaluatorHandle};
use crate::metrics::{scalar_bounds, TestResult};
use crate::model::MetricSpec;

/// One-step ARIMAX prediction over the current windows
///
/// Returns `None` when the sample window has not reached both degrees yet or
/// the exogenous coefficient is malformed; the caller then falls back to the
/// reactive rule.
pub(crate) fn predict(
    metric: &MetricSpec,
    samples: &RingWindow<TestResult>,
    predictions: &RingWindow<TestResult>,
    exogenous: f64,
) -> Option<f64> {
    let p = metric.autoregression_degree as usize;
    let q = metric.moving_average_degree as usize;
    if samples.fill_count() < p || samples.fill_count() < q {
        return None;
    }
    let beta = metric.exogenous_regressor_coefficient.parse::<f64>().ok()?;

    let phi = metric.ar_coefficients();
    let theta = metric.ma_coefficients();
    let mut predicted = 0.0;

    // AR term over the p most recent samples, newest first
    for (i, coefficient) in phi.iter().take(p).enumerate() {
        if let Some(sample) = samples.recent(i) {
            predicted += coefficient * sample.value;
        }
    }

    // MA term: each residual is the sample minus the prediction recorded for
    // the same tick; an unfilled prediction slot counts as 0
    for (j, coefficient) in theta.iter().take(q).enumerate() {
        if let Some(sample) = samples.recent(j) {
            let prior = predictions.recent(j).map(|r| r.value).unwrap_or(0.0);
            predicted += coefficient * (sample.value - prior);
        }
    }

    // Exogenous term, clamped to the configured maximum
    let clamped = match metric.exogenous_regressor_max_value.parse::<f64>() {
        Ok(max) => exogenous.min(max),
        Err(_) => exogenous,
    };
    predicted += beta * clamped;

    Some(predicted)
}

/// Majority vote mixing the freshest prediction in for the freshest sample
fn check_window_predictive(
    samples: &RingWindow<TestResult>,
    predictions: &RingWindow<TestResult>,
    required: usize,
    num_of_tests: usize,
    metric_name: &str,
) -> AutoscaleEvaluation {
    if !samples.is_full() {
        return AutoscaleEvaluation::none(metric_name);
    }
    let freshest_prediction = match predictions.recent(0) {
        Some(prediction) => prediction,
        None => return check_window(samples, required, metric_name),
    };

    let mut scale_down_counter = 0usize;
    let mut scale_up_counter = 0usize;
    for i in 1..num_of_tests {
        if let Some(result) = samples.recent(i) {
            if result.lower_bound_test_passed {
                scale_down_counter += 1;
            }
            if result.upper_bound_test_passed {
                scale_up_counter += 1;
            }
        }
    }
    if freshest_prediction.lower_bound_test_passed {
        scale_down_counter += 1;
    }
    if freshest_prediction.upper_bound_test_passed {
        scale_up_counter += 1;
    }

    AutoscaleEvaluation {
        scale_down: scale_down_counter >= required,
        scale_up: scale_up_counter >= required,
        metric_name: metric_name.to_string(),
    }
}

/// Spawn the predictive evaluator for one ARIMAX metric
pub fn spawn_predictive_evaluator(
    metric: MetricSpec,
    mut results: mpsc::Receiver<TestResult>,
    mut exogenous: mpsc::Receiver<ExogenousValue>,
) -> EvaluatorHandle {
    let (evaluation_tx, evaluation_rx) = mpsc::channel(1);
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let (clear_tx, mut clear_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        let num_of_tests = metric.num_of_tests as usize;
        let p = metric.autoregression_degree as usize;
        let q = metric.moving_average_degree as usize;
        let mut samples: RingWindow<TestResult> = RingWindow::new(num_of_tests.max(p));
        let mut predictions: RingWindow<TestResult> = RingWindow::new(num_of_tests.max(q));
        let required = required_positive_tests(metric.num_of_tests);

        debug!(
            "Predictive evaluator started: metric={}, window={}, p={}, q={}",
            metric.name,
            samples.capacity(),
            p,
            q
        );

        let mut clear_closed = false;
        loop {
            tokio::select! {
                maybe_result = results.recv() => {
                    let result = match maybe_result {
                        Some(result) => result,
                        None => break,
                    };
                    samples.push(result);

                    // Consume the exogenous emission aligned with this tick;
                    // drain so a backlog never grows
                    let mut latest = None;
                    while let Ok(value) = exogenous.try_recv() {
                        latest = Some(value);
                    }
                    if let Some(exo) = latest.filter(|v| v.valid) {
                        if let Some(predicted) = predict(&metric, &samples, &predictions, exo.value) {
                            let (lower, upper) =
                                scalar_bounds(&metric, predicted).unwrap_or((false, false));
                            predictions.push(TestResult {
                                lower_bound_test_passed: lower,
                                upper_bound_test_passed: upper,
                                metric_name: metric.name.clone(),
                                value: predicted,
                            });
                        }
                    }

                    let evaluation = check_window_predictive(
                        &samples,
                        &predictions,
                        required,
                        num_of_tests,
                        &metric.name,
                    );
                    if evaluation_tx.send(evaluation).await.is_err() {
                        break;
                    }
                    samples.clear_oldest();
                }
                maybe_clear = clear_rx.recv(), if !clear_closed => {
                    match maybe_clear {
                        Some(()) => {
                            debug!("Clearing prediction windows for metric {}", metric.name);
                            samples.clear();
                            predictions.clear();
                        }
                        None => clear_closed = true,
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!("Predictive evaluator for metric {} shutting down", metric.name);
                        break;
                    }
                }
            }
        }
    });

    EvaluatorHandle {
        evaluations: evaluation_rx,
        stop: stop_tx,
        clear: clear_tx,
    }
}
