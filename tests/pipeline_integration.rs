//! End-to-end pipeline tests over mock clients
//!
//! These drive a full definition pipeline set (scraper → tester → evaluator
//! → actuator) with a scripted time-series backend and an in-memory scale
//! client, using millisecond-scale intervals.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use promscaler::autoscaler::reconciler::build_pipelines;
use promscaler::clients::{
    KubeError, MetricValue, QueryError, Scale, ScalarPoint, ScaleClient, TimeSeriesQuery,
};
use promscaler::model::{AutoscalingDefinition, MetricSpec, ScaleTarget};

/// Replays a scripted sequence of scalar samples, repeating the final value
/// once the script runs out
struct ScriptedBackend {
    samples: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
}

impl ScriptedBackend {
    fn new(samples: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(samples.iter().copied().collect()),
            last: Mutex::new(*samples.last().unwrap_or(&0.0)),
        })
    }
}

#[async_trait]
impl TimeSeriesQuery for ScriptedBackend {
    async fn query(&self, _base_url: &str, _query: &str) -> Result<MetricValue, QueryError> {
        let value = match self.samples.lock().unwrap().pop_front() {
            Some(value) => {
                *self.last.lock().unwrap() = value;
                value
            }
            None => *self.last.lock().unwrap(),
        };
        Ok(MetricValue::Scalar(ScalarPoint {
            value,
            timestamp: 0.0,
        }))
    }
}

/// In-memory scale store recording every write
struct RecordingScaleClient {
    replicas: Mutex<i32>,
    writes: Mutex<Vec<i32>>,
}

impl RecordingScaleClient {
    fn at(replicas: i32) -> Arc<Self> {
        Arc::new(Self {
            replicas: Mutex::new(replicas),
            writes: Mutex::new(vec![]),
        })
    }

    fn writes(&self) -> Vec<i32> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScaleClient for RecordingScaleClient {
    async fn get_scale(&self, target: &ScaleTarget) -> Result<Scale, KubeError> {
        Ok(Scale {
            name: "web".to_string(),
            namespace: target.match_namespace.clone(),
            replicas: *self.replicas.lock().unwrap(),
        })
    }

    async fn update_scale(&self, target: &ScaleTarget, replicas: i32) -> Result<Scale, KubeError> {
        *self.replicas.lock().unwrap() = replicas;
        self.writes.lock().unwrap().push(replicas);
        Ok(Scale {
            name: "web".to_string(),
            namespace: target.match_namespace.clone(),
            replicas,
        })
    }
}

/// min=1, max=5, step=1, N=3, mean over 3 scrapes per test, thresholds 20/80
fn web_definition() -> AutoscalingDefinition {
    let mut definition = AutoscalingDefinition::new(
        "web-scaler",
        ScaleTarget {
            match_namespace: "default".to_string(),
            label_name: "app".to_string(),
            match_label: "web".to_string(),
            target_type: "deployment".to_string(),
        },
    );
    definition.spec.min_replicas = 1;
    definition.spec.max_replicas = 5;
    definition.spec.scaling_step = 1;
    definition.spec.interval_between_autoscaling = "60s".to_string();
    definition.spec.metrics = vec![MetricSpec {
        name: "cpu".to_string(),
        metric_type: "utilization".to_string(),
        prometheus_path: "http://prometheus:9090".to_string(),
        prometheus_query: "avg(cpu_usage)".to_string(),
        scale_down_value: "20".to_string(),
        scale_up_value: "80".to_string(),
        scale_value_type: "double".to_string(),
        num_of_tests: 3,
        algorithm: "mean".to_string(),
        scrape_interval: "10ms".to_string(),
        test_interval: "30ms".to_string(),
        ..Default::default()
    }];
    definition
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(400)).await;
}

#[tokio::test]
async fn test_sustained_high_load_scales_up_once() {
    // Windows [90,92,88] [95,91,93] [89,90,91]: every mean passes the upper
    // bound, the third test result completes the majority and the actuator
    // writes desired=2, then the cooldown holds
    let backend = ScriptedBackend::new(&[90.0, 92.0, 88.0, 95.0, 91.0, 93.0, 89.0, 90.0, 91.0]);
    let scale = RecordingScaleClient::at(1);

    let pipelines = build_pipelines(web_definition(), backend, scale.clone());
    settle().await;
    pipelines.shutdown();

    assert_eq!(scale.writes(), vec![2]);
}

#[tokio::test]
async fn test_steady_load_never_scales() {
    let backend = ScriptedBackend::new(&[50.0; 9]);
    let scale = RecordingScaleClient::at(3);

    let pipelines = build_pipelines(web_definition(), backend, scale.clone());
    settle().await;
    pipelines.shutdown();

    assert!(scale.writes().is_empty());
    assert_eq!(*scale.replicas.lock().unwrap(), 3);
}

#[tokio::test]
async fn test_sustained_low_load_scales_down_and_cooldown_holds() {
    // Windows [10,12,8] [9,11,10] [7,9,10]: every mean passes the lower
    // bound; one write from 5 to 4, further low results land in the cooldown
    let backend = ScriptedBackend::new(&[10.0, 12.0, 8.0, 9.0, 11.0, 10.0, 7.0, 9.0, 10.0]);
    let scale = RecordingScaleClient::at(5);

    let pipelines = build_pipelines(web_definition(), backend, scale.clone());
    settle().await;
    // The backend keeps replaying low samples; the cooldown suppresses any
    // second write
    settle().await;
    pipelines.shutdown();

    assert_eq!(scale.writes(), vec![4]);
    assert_eq!(*scale.replicas.lock().unwrap(), 4);
}

#[tokio::test]
async fn test_scale_up_respects_max_replicas() {
    let backend = ScriptedBackend::new(&[95.0; 9]);
    let scale = RecordingScaleClient::at(5);

    let pipelines = build_pipelines(web_definition(), backend, scale.clone());
    settle().await;
    pipelines.shutdown();

    // Already at max: boundary is logged, nothing written
    assert!(scale.writes().is_empty());
}

#[tokio::test]
async fn test_replica_bounds_hold_across_repeated_actions() {
    // Short cooldown so multiple actions fit in the test window; every
    // written value must stay within [min, max]
    let mut definition = web_definition();
    definition.spec.interval_between_autoscaling = "50ms".to_string();

    let backend = ScriptedBackend::new(&[95.0; 1]);
    let scale = RecordingScaleClient::at(3);

    let pipelines = build_pipelines(definition, backend, scale.clone());
    settle().await;
    settle().await;
    pipelines.shutdown();

    let writes = scale.writes();
    assert!(!writes.is_empty());
    assert!(writes.iter().all(|&w| (1..=5).contains(&w)));
    // Monotonically rising toward the max, never past it
    assert_eq!(*scale.replicas.lock().unwrap(), 5);
}
