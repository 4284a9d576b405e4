//! Definition reconciler
//!
//! Polls the definition store on a fixed interval, diffs the listed
//! definitions against the running set by name, starts pipeline sets for
//! added definitions and shuts down the pipeline sets of removed ones. An
//! updated definition is treated as remove-then-add; a live pipeline is
//! never rewired in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::{
    spawn_actuator, spawn_evaluator, AutoscaleEvaluation, RECONCILE_INTERVAL_SECS,
};
use crate::clients::{DefinitionsClient, ScaleClient, TimeSeriesQuery};
use crate::metrics::{spawn_scraper, spawn_tester};
use crate::model::{
    fill_definition_defaults, fill_metric_defaults, validate_required_metric_fields,
    AutoscalingDefinition,
};

/// The diff of one reconcile pass, keyed by definition name
#[derive(Debug, Default)]
pub struct DefinitionChanges {
    pub to_add: Vec<AutoscalingDefinition>,
    pub to_remove: Vec<String>,
}

impl DefinitionChanges {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff two definition lists by name. A definition present in both lists
/// with a changed spec appears in both `to_remove` and `to_add`.
pub fn detect_changes(
    new_definitions: &[AutoscalingDefinition],
    old_definitions: &[AutoscalingDefinition],
) -> DefinitionChanges {
    let mut changes = DefinitionChanges::default();

    for old in old_definitions {
        if !new_definitions
            .iter()
            .any(|n| n.metadata.name == old.metadata.name)
        {
            changes.to_remove.push(old.metadata.name.clone());
        }
    }
    for new in new_definitions {
        match old_definitions
            .iter()
            .find(|o| o.metadata.name == new.metadata.name)
        {
            None => changes.to_add.push(new.clone()),
            Some(old) if old.spec != new.spec => {
                changes.to_remove.push(new.metadata.name.clone());
                changes.to_add.push(new.clone());
            }
            Some(_) => {}
        }
    }
    changes
}

/// Handles to the running tasks of one metric pipeline
struct MetricPipeline {
    metric_name: String,
    scraper_stop: watch::Sender<bool>,
    tester_stop: watch::Sender<bool>,
    exogenous_stop: Option<watch::Sender<bool>>,
    evaluator_stop: watch::Sender<bool>,
    forwarder_stop: watch::Sender<bool>,
}

/// Handles to everything spawned for one definition
pub struct DefinitionPipelines {
    definition: AutoscalingDefinition,
    metrics: Vec<MetricPipeline>,
    demux_stop: watch::Sender<bool>,
    actuator_stop: watch::Sender<bool>,
}

impl DefinitionPipelines {
    pub fn definition_name(&self) -> &str {
        &self.definition.metadata.name
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// Stop every task this definition owns, producers before consumers
    pub fn shutdown(self) {
        for pipeline in &self.metrics {
            debug!("Stopping pipeline for metric {}", pipeline.metric_name);
            let _ = pipeline.scraper_stop.send(true);
            let _ = pipeline.tester_stop.send(true);
            if let Some(exogenous_stop) = &pipeline.exogenous_stop {
                let _ = exogenous_stop.send(true);
            }
            let _ = pipeline.evaluator_stop.send(true);
            let _ = pipeline.forwarder_stop.send(true);
        }
        let _ = self.demux_stop.send(true);
        let _ = self.actuator_stop.send(true);
    }
}

/// Forward one evaluator's emissions into the definition's merged stream
fn spawn_forwarder(
    mut evaluations: mpsc::Receiver<AutoscaleEvaluation>,
    merged: mpsc::Sender<AutoscaleEvaluation>,
) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_evaluation = evaluations.recv() => {
                    match maybe_evaluation {
                        Some(evaluation) => {
                            if merged.send(evaluation).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
    shutdown_tx
}

/// Route clear-buffer requests from the actuator back to the originating
/// metric's evaluator
fn spawn_clear_demux(
    mut requests: mpsc::Receiver<String>,
    clear_senders: HashMap<String, mpsc::Sender<()>>,
) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_name = requests.recv() => {
                    match maybe_name {
                        Some(metric_name) => match clear_senders.get(&metric_name) {
                            Some(sender) => {
                                let _ = sender.send(()).await;
                            }
                            None => {
                                warn!("No evaluator registered for metric {}", metric_name);
                            }
                        },
                        None => break,
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
    shutdown_tx
}

/// Start the full pipeline set of one definition: one scraper, tester and
/// evaluator per valid metric, one merged actuator, and the clear-request
/// fan-in
pub fn build_pipelines(
    mut definition: AutoscalingDefinition,
    backend: Arc<dyn TimeSeriesQuery>,
    scale_client: Arc<dyn ScaleClient>,
) -> DefinitionPipelines {
    fill_definition_defaults(&mut definition);

    info!(
        "Starting pipelines for definition {} ({}={})",
        definition.metadata.name,
        definition.spec.scale_target.label_name,
        definition.spec.scale_target.match_label
    );
    if definition.spec.metrics.is_empty() {
        warn!("No metrics found in definition {}", definition.metadata.name);
    }

    let (merged_tx, merged_rx) = mpsc::channel::<AutoscaleEvaluation>(1);
    let (clear_request_tx, clear_request_rx) = mpsc::channel::<String>(1);

    let mut pipelines = Vec::new();
    let mut clear_senders = HashMap::new();

    for metric in &definition.spec.metrics {
        if let Err(e) = validate_required_metric_fields(metric) {
            warn!(
                "Skipping metric '{}' of definition {}: {}",
                metric.name, definition.metadata.name, e
            );
            continue;
        }
        let mut metric = metric.clone();
        fill_metric_defaults(&mut metric);

        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (result_tx, result_rx) = mpsc::channel(1);

        let scraper_stop = spawn_scraper(metric.clone(), backend.clone(), batch_tx);
        let tester_stop = spawn_tester(metric.clone(), batch_rx, result_tx);
        let (handle, exogenous_stop) =
            spawn_evaluator(metric.clone(), result_rx, backend.clone());
        let forwarder_stop = spawn_forwarder(handle.evaluations, merged_tx.clone());

        clear_senders.insert(metric.name.clone(), handle.clear);
        pipelines.push(MetricPipeline {
            metric_name: metric.name.clone(),
            scraper_stop,
            tester_stop,
            exogenous_stop,
            evaluator_stop: handle.stop,
            forwarder_stop,
        });
    }
    // The actuator's receiver closes once every forwarder is gone
    drop(merged_tx);

    let demux_stop = spawn_clear_demux(clear_request_rx, clear_senders);
    let actuator_stop = spawn_actuator(
        definition.clone(),
        merged_rx,
        scale_client,
        clear_request_tx,
    );

    DefinitionPipelines {
        definition,
        metrics: pipelines,
        demux_stop,
        actuator_stop,
    }
}

/// The controller's main loop
pub struct Reconciler {
    definitions_client: Arc<dyn DefinitionsClient>,
    backend: Arc<dyn TimeSeriesQuery>,
    scale_client: Arc<dyn ScaleClient>,
    namespace: String,
    reconcile_interval: Duration,
}

impl Reconciler {
    pub fn new(
        definitions_client: Arc<dyn DefinitionsClient>,
        backend: Arc<dyn TimeSeriesQuery>,
        scale_client: Arc<dyn ScaleClient>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            definitions_client,
            backend,
            scale_client,
            namespace: namespace.into(),
            reconcile_interval: Duration::from_secs(RECONCILE_INTERVAL_SECS),
        }
    }

    /// Override the reconcile pass interval
    pub fn with_interval(mut self, reconcile_interval: Duration) -> Self {
        self.reconcile_interval = reconcile_interval;
        self
    }

    /// Run reconcile passes until the shutdown signal fires. On shutdown
    /// every live pipeline set is stopped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.reconcile_interval);
        let mut live: HashMap<String, DefinitionPipelines> = HashMap::new();
        let mut previous: Vec<AutoscalingDefinition> = Vec::new();

        info!(
            "Reconciler started: namespace={}, interval={:?}",
            self.namespace, self.reconcile_interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let listed = match self.definitions_client.list(&self.namespace).await {
                        Ok(definitions) => definitions,
                        Err(e) => {
                            error!("Error listing autoscaling definitions: {}", e);
                            continue;
                        }
                    };
                    let changes = detect_changes(&listed, &previous);
                    if !changes.is_empty() {
                        self.apply(changes, &mut live);
                    }
                    previous = listed;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciler shutting down, stopping {} definition(s)", live.len());
                        for (_, pipelines) in live.drain() {
                            pipelines.shutdown();
                        }
                        break;
                    }
                }
            }
        }
    }

    fn apply(&self, changes: DefinitionChanges, live: &mut HashMap<String, DefinitionPipelines>) {
        for name in changes.to_remove {
            if let Some(pipelines) = live.remove(&name) {
                info!("Removing definition: {}", name);
                pipelines.shutdown();
            }
        }
        for definition in changes.to_add {
            let name = definition.metadata.name.clone();
            let pipelines = build_pipelines(
                definition,
                self.backend.clone(),
                self.scale_client.clone(),
            );
            live.insert(name, pipelines);
        }
    }
}
