//! Reactive evaluator
//!
//! Keeps the last `numOfTests` test results in a ring window and requests a
//! scale action when a strict majority of them passed the same bound.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::window::RingWindow;
use super::{AutoscaleEvaluation, EvaluatorHandle};
use crate::metrics::TestResult;
use crate::model::MetricSpec;

/// Strict majority threshold: round((n + 1) / 2)
pub(crate) fn required_positive_tests(num_of_tests: i64) -> usize {
    (((num_of_tests + 1) as f64) / 2.0).round() as usize
}

/// Majority vote over a full window. A window with any empty slot abstains.
pub(crate) fn check_window(
    window: &RingWindow<TestResult>,
    required_positive_tests: usize,
    metric_name: &str,
) -> AutoscaleEvaluation {
    if !window.is_full() {
        return AutoscaleEvaluation::none(metric_name);
    }
    let mut scale_down_counter = 0usize;
    let mut scale_up_counter = 0usize;
    for slot in window.iter_newest_first().flatten() {
        if slot.lower_bound_test_passed {
            scale_down_counter += 1;
        }
        if slot.upper_bound_test_passed {
            scale_up_counter += 1;
        }
    }
    AutoscaleEvaluation {
        scale_down: scale_down_counter >= required_positive_tests,
        scale_up: scale_up_counter >= required_positive_tests,
        metric_name: metric_name.to_string(),
    }
}

/// Spawn the reactive evaluator for one metric
pub fn spawn_reactive_evaluator(
    metric: MetricSpec,
    mut results: mpsc::Receiver<TestResult>,
) -> EvaluatorHandle {
    let (evaluation_tx, evaluation_rx) = mpsc::channel(1);
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let (clear_tx, mut clear_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        let mut window: RingWindow<TestResult> = RingWindow::new(metric.num_of_tests as usize);
        let required = required_positive_tests(metric.num_of_tests);

        debug!(
            "Reactive evaluator started: metric={}, window={}, majority={}",
            metric.name,
            window.capacity(),
            required
        );

        let mut clear_closed = false;
        loop {
            tokio::select! {
                maybe_result = results.recv() => {
                    let result = match maybe_result {
                        Some(result) => result,
                        None => break,
                    };
                    window.push(result);
                    let evaluation = check_window(&window, required, &metric.name);
                    if evaluation_tx.send(evaluation).await.is_err() {
                        break;
                    }
                    window.clear_oldest();
                }
                maybe_clear = clear_rx.recv(), if !clear_closed => {
                    match maybe_clear {
                        Some(()) => {
                            debug!("Clearing evaluation window for metric {}", metric.name);
                            window.clear();
                        }
                        None => clear_closed = true,
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!("Reactive evaluator for metric {} shutting down", metric.name);
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
