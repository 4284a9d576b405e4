//! # Autoscaling evaluation and actuation
//!
//! The back half of the controller. Each metric's stream of [`TestResult`]s
//! flows into an evaluator (reactive majority vote, or ARIMAX-predictive),
//! the per-definition evaluations merge into one actuator that clamps and
//! writes scale changes, and the reconciler keeps the set of running
//! pipelines in sync with the declared definitions.
//!
//! ```text
//!  backend ──> scraper ──> tester ──> evaluator ──┐
//!  backend ──> scraper ──> tester ──> evaluator ──┤ merge ──> actuator ──> scale API
//!                 (exogenous ──> predictive) ─────┘    ▲            │
//!                                                      └── clear ◄──┘
//! ```
//!
//! [`TestResult`]: crate::metrics::TestResult

pub mod actuator;
pub mod exogenous;
pub mod predictive;
pub mod reactive;
pub mod reconciler;
pub mod window;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::clients::TimeSeriesQuery;
use crate::metrics::TestResult;
use crate::model::{Algorithm, MetricSpec};

pub use actuator::spawn_actuator;
pub use exogenous::{spawn_exogenous_regressor, ExogenousValue};
pub use predictive::spawn_predictive_evaluator;
pub use reactive::spawn_reactive_evaluator;
pub use reconciler::{
    build_pipelines, detect_changes, DefinitionChanges, DefinitionPipelines, Reconciler,
};
pub use window::RingWindow;

/// Default reconcile pass interval in seconds
pub const RECONCILE_INTERVAL_SECS: u64 = 60;

/// A request to scale up or down, tagged with the metric that produced it
///
/// Both flags can be set; the actuator gives scale-up precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscaleEvaluation {
    pub scale_up: bool,
    pub scale_down: bool,
    /// Name of the originating metric, used to route clear-buffer requests
    pub metric_name: String,
}

impl AutoscaleEvaluation {
    pub fn none(metric_name: &str) -> Self {
        Self {
            scale_up: false,
            scale_down: false,
            metric_name: metric_name.to_string(),
        }
    }
}

/// Handles to a running evaluator task
pub struct EvaluatorHandle {
    /// Stream of evaluations, one per consumed test result
    pub evaluations: mpsc::Receiver<AutoscaleEvaluation>,
    /// Shutdown signal
    pub stop: watch::Sender<bool>,
    /// Wipes the evaluator's ring windows
    pub clear: mpsc::Sender<()>,
}

/// Spawn the evaluator matching the metric's algorithm: ARIMAX metrics get
/// the predictive evaluator (with its exogenous-regressor feed), everything
/// else the reactive one
pub fn spawn_evaluator(
    metric: MetricSpec,
    results: mpsc::Receiver<TestResult>,
    backend: Arc<dyn TimeSeriesQuery>,
) -> (EvaluatorHandle, Option<watch::Sender<bool>>) {
    match metric.parsed_algorithm() {
        Algorithm::Arimax => {
            // One-slot cushion between the regressor producer and the
            // predictive consumer
            let (exogenous_tx, exogenous_rx) = mpsc::channel(1);
            let exogenous_stop = spawn_exogenous_regressor(metric.clone(), backend, exogenous_tx);
            let handle = spawn_predictive_evaluator(metric, results, exogenous_rx);
            (handle, Some(exogenous_stop))
        }
        _ => (spawn_reactive_evaluator(metric, results), None),
    }
}
