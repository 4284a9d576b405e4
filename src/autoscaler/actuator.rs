//! Scale actuator
//!
//! One actuator per definition. It consumes the merged evaluation stream of
//! all the definition's metrics, reads the current scale, clamps the next
//! replica count to the definition's bounds, writes it, and arms the
//! post-action cooldown. After every action it asks the triggering metric's
//! evaluator to clear its window so the next decision is not driven by
//! pre-scale samples.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::AutoscaleEvaluation;
use crate::clients::ScaleClient;
use crate::model::AutoscalingDefinition;

/// Spawn the actuator loop for one (already defaulted) definition
pub fn spawn_actuator(
    definition: AutoscalingDefinition,
    mut evaluations: mpsc::Receiver<AutoscaleEvaluation>,
    scale_client: Arc<dyn ScaleClient>,
    clear_requests: mpsc::Sender<String>,
) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let cooldown = definition
        .spec
        .cooldown()
        .unwrap_or_else(|| Duration::from_secs(120));

    tokio::spawn(async move {
        let mut cooldown_until: Option<Instant> = None;

        loop {
            tokio::select! {
                maybe_evaluation = evaluations.recv() => {
                    let evaluation = match maybe_evaluation {
                        Some(evaluation) => evaluation,
                        None => break,
                    };
                    handle_evaluation(
                        &definition,
                        &evaluation,
                        scale_client.as_ref(),
                        &clear_requests,
                        cooldown,
                        &mut cooldown_until,
                    )
                    .await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(
                            "Actuator for definition {} shutting down",
                            definition.metadata.name
                        );
                        break;
                    }
                }
            }
        }
    });

    shutdown_tx
}

async fn handle_evaluation(
    definition: &AutoscalingDefinition,
    evaluation: &AutoscaleEvaluation,
    scale_client: &dyn ScaleClient,
    clear_requests: &mpsc::Sender<String>,
    cooldown: Duration,
    cooldown_until: &mut Option<Instant>,
) {
    let spec = &definition.spec;
    let target = &spec.scale_target;

    if cooldown_until.map(|t| Instant::now() < t).unwrap_or(false) {
        info!(
            "Autoscaling temporarily blocked by intervalBetweenAutoscaling for {}",
            target.match_label
        );
        return;
    }

    let scale = match scale_client.get_scale(target).await {
        Ok(scale) => scale,
        Err(e) => {
            error!("Autoscaling error: {}", e);
            return;
        }
    };
    let current = scale.replicas;

    if evaluation.scale_up && current < spec.max_replicas {
        let next = (current + spec.scaling_step).min(spec.max_replicas);
        info!(
            "Scaling up {} based on metric: {} ({} -> {})",
            target.match_label, evaluation.metric_name, current, next
        );
        if let Err(e) = scale_client.update_scale(target, next).await {
            error!("Autoscaling error: {}", e);
        }
        *cooldown_until = Some(Instant::now() + cooldown);
        request_clear(clear_requests, &evaluation.metric_name).await;
    } else if evaluation.scale_down && current > spec.min_replicas {
        let next = (current - spec.scaling_step).max(spec.min_replicas);
        info!(
            "Scaling down {} based on metric: {} ({} -> {})",
            target.match_label, evaluation.metric_name, current, next
        );
        if let Err(e) = scale_client.update_scale(target, next).await {
            error!("Autoscaling error: {}", e);
        }
        *cooldown_until = Some(Instant::now() + cooldown);
        request_clear(clear_requests, &evaluation.metric_name).await;
    } else if evaluation.scale_up && current >= spec.max_replicas {
        info!(
            "Reached maximum replicas, can't scale up anymore. Metric: {}",
            evaluation.metric_name
        );
    } else if evaluation.scale_down && current <= spec.min_replicas {
        info!(
            "Reached minimum replicas, can't scale down anymore. Metric: {}",
            evaluation.metric_name
        );
    } else {
        debug!(
            "Verified metric: {}, no need to scale",
            evaluation.metric_name
        );
    }
}

async fn request_clear(clear_requests: &mpsc::Sender<String>, metric_name: &str) {
    if clear_requests.send(metric_name.to_string()).await.is_err() {
        warn!(
            "Clear-buffer channel closed, window for metric {} not cleared",
            metric_name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::clients::{KubeError, Scale};
    use crate::model::{fill_definition_defaults, ScaleTarget};

    struct MockScaleClient {
        replicas: Mutex<i32>,
        writes: Mutex<Vec<i32>>,
        fail_reads: bool,
        fail_writes: bool,
    }

    impl MockScaleClient {
        fn at(replicas: i32) -> Self {
            Self {
                replicas: Mutex::new(replicas),
                writes: Mutex::new(vec![]),
                fail_reads: false,
                fail_writes: false,
            }
        }
    }

    #[async_trait]
    impl ScaleClient for MockScaleClient {
        async fn get_scale(&self, target: &ScaleTarget) -> Result<Scale, KubeError> {
            if self.fail_reads {
                return Err(KubeError::Http("read failed".to_string()));
            }
            Ok(Scale {
                name: "web".to_string(),
                namespace: target.match_namespace.clone(),
                replicas: *self.replicas.lock().unwrap(),
            })
        }

        async fn update_scale(
            &self,
            target: &ScaleTarget,
            replicas: i32,
        ) -> Result<Scale, KubeError> {
            self.writes.lock().unwrap().push(replicas);
            if self.fail_writes {
                return Err(KubeError::Http("write failed".to_string()));
            }
            *self.replicas.lock().unwrap() = replicas;
            Ok(Scale {
                name: "web".to_string(),
                namespace: target.match_namespace.clone(),
                replicas,
            })
        }
    }

    fn definition(min: i32, max: i32, step: i32) -> AutoscalingDefinition {
        let mut definition = AutoscalingDefinition::new(
            "web-scaler",
            ScaleTarget {
                match_namespace: "default".to_string(),
                label_name: "app".to_string(),
                match_label: "web".to_string(),
                target_type: "deployment".to_string(),
            },
        );
        definition.spec.min_replicas = min;
        definition.spec.max_replicas = max;
        definition.spec.scaling_step = step;
        definition.spec.interval_between_autoscaling = "60s".to_string();
        fill_definition_defaults(&mut definition);
        definition
    }

    fn up(metric: &str) -> AutoscaleEvaluation {
        AutoscaleEvaluation {
            scale_up: true,
            scale_down: false,
            metric_name: metric.to_string(),
        }
    }

    fn down(metric: &str) -> AutoscaleEvaluation {
        AutoscaleEvaluation {
            scale_up: false,
            scale_down: true,
            metric_name: metric.to_string(),
        }
    }

    async fn run_evaluations(
        definition: AutoscalingDefinition,
        client: Arc<MockScaleClient>,
        evaluations: Vec<AutoscaleEvaluation>,
    ) -> (Vec<i32>, Vec<String>) {
        let (evaluation_tx, evaluation_rx) = mpsc::channel(1);
        let (clear_tx, mut clear_rx) = mpsc::channel(8);
        let stop = spawn_actuator(definition, evaluation_rx, client.clone(), clear_tx);

        for evaluation in evaluations {
            evaluation_tx.send(evaluation).await.unwrap();
        }
        // Let the actuator drain the channel
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = stop.send(true);

        let mut clears = Vec::new();
        while let Ok(name) = clear_rx.try_recv() {
            clears.push(name);
        }
        let writes = client.writes.lock().unwrap().clone();
        (writes, clears)
    }

    #[tokio::test]
    async fn test_scale_up_writes_and_requests_clear() {
        let client = Arc::new(MockScaleClient::at(1));
        let (writes, clears) =
            run_evaluations(definition(1, 5, 1), client, vec![up("cpu")]).await;
        assert_eq!(writes, vec![2]);
        assert_eq!(clears, vec!["cpu".to_string()]);
    }

    #[tokio::test]
    async fn test_scale_down_clamps_to_min() {
        let client = Arc::new(MockScaleClient::at(2));
        let (writes, _) = run_evaluations(definition(1, 5, 3), client, vec![down("cpu")]).await;
        assert_eq!(writes, vec![1]);
    }

    #[tokio::test]
    async fn test_scale_up_clamps_to_max() {
        let client = Arc::new(MockScaleClient::at(4));
        let (writes, _) = run_evaluations(definition(1, 5, 3), client, vec![up("cpu")]).await;
        assert_eq!(writes, vec![5]);
    }

    #[tokio::test]
    async fn test_no_write_at_boundaries() {
        let client = Arc::new(MockScaleClient::at(5));
        let (writes, clears) =
            run_evaluations(definition(1, 5, 1), client, vec![up("cpu")]).await;
        assert!(writes.is_empty());
        assert!(clears.is_empty());

        let client = Arc::new(MockScaleClient::at(1));
        let (writes, _) = run_evaluations(definition(1, 5, 1), client, vec![down("cpu")]).await;
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_action() {
        let client = Arc::new(MockScaleClient::at(5));
        let (writes, _) = run_evaluations(
            definition(1, 5, 1),
            client,
            vec![down("cpu"), down("cpu")],
        )
        .await;
        // Second scale-down arrives within the cooldown: one write only
        assert_eq!(writes, vec![4]);
    }

    #[tokio::test]
    async fn test_neither_flag_is_a_noop() {
        let client = Arc::new(MockScaleClient::at(3));
        let (writes, clears) = run_evaluations(
            definition(1, 5, 1),
            client,
            vec![AutoscaleEvaluation::none("cpu")],
        )
        .await;
        assert!(writes.is_empty());
        assert!(clears.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_drops_tick_without_cooldown() {
        let client = Arc::new(MockScaleClient {
            fail_reads: true,
            ..MockScaleClient::at(3)
        });
        let (writes, _) = run_evaluations(definition(1, 5, 1), client.clone(), vec![up("cpu")]).await;
        assert!(writes.is_empty());

        // A later evaluation still acts once reads recover
        let client = Arc::new(MockScaleClient::at(3));
        let (writes, _) = run_evaluations(definition(1, 5, 1), client, vec![up("cpu")]).await;
        assert_eq!(writes, vec![4]);
    }

    #[tokio::test]
    async fn test_write_error_still_arms_cooldown() {
        let client = Arc::new(MockScaleClient {
            fail_writes: true,
            ..MockScaleClient::at(3)
        });
        let (writes, _) = run_evaluations(
            definition(1, 5, 1),
            client,
            vec![up("cpu"), up("cpu")],
        )
        .await;
        // Both evaluations arrive, only the first attempts a write
        assert_eq!(writes.len(), 1);
    }
}
