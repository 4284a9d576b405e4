//! AutoscalingDefinition resource model
//!
//! The declarative objects this controller consumes. An AutoscalingDefinition
//! binds a workload selector (label match over a namespace) to a list of
//! metric specifications; the reconciler turns each definition into a set of
//! running metric pipelines.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod defaults;

pub use defaults::{
    fill_definition_defaults, fill_metric_defaults, validate_required_metric_fields,
    ValidationError,
};

/// API group the definition objects live under
pub const API_GROUP: &str = "scaling.com";

/// API version of the definition objects
pub const API_VERSION: &str = "v1";

/// Plural resource name used in API paths
pub const DEFINITIONS_RESOURCE: &str = "autoscalingdefinitions";

/// A cluster-level autoscaling definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingDefinition {
    /// API version (e.g., "scaling.com/v1")
    #[serde(rename = "apiVersion")]
    #[serde(default)]
    pub api_version: String,

    /// Kind is always "AutoscalingDefinition"
    #[serde(default)]
    pub kind: String,

    /// Metadata about the definition
    pub metadata: ObjectMeta,

    /// Desired autoscaling behavior
    pub spec: AutoscalingSpec,

    /// Current observed status (populated by the controller)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DefinitionStatus>,
}

/// Metadata for a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Unique name within the namespace; identity for diffing
    pub name: String,

    /// Namespace (defaults to "default")
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Unique identifier (generated when absent)
    #[serde(default = "Uuid::new_v4")]
    pub uid: Uuid,

    /// Labels for organization and selection
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Creation timestamp
    #[serde(rename = "creationTimestamp")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Specification of desired autoscaling behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingSpec {
    /// The workload this definition scales
    #[serde(rename = "scaleTarget")]
    pub scale_target: ScaleTarget,

    /// Lower replica bound (>= 1 after defaulting)
    #[serde(rename = "minReplicas")]
    #[serde(default)]
    pub min_replicas: i32,

    /// Upper replica bound (>= minReplicas after defaulting)
    #[serde(rename = "maxReplicas")]
    #[serde(default)]
    pub max_replicas: i32,

    /// Post-action cooldown (duration string, default "2m")
    #[serde(rename = "intervalBetweenAutoscaling")]
    #[serde(default)]
    pub interval_between_autoscaling: String,

    /// Replicas added or removed per action (>= 1 after defaulting)
    #[serde(rename = "scalingStep")]
    #[serde(default)]
    pub scaling_step: i32,

    /// Metric pipelines evaluated for this definition
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

/// Observed state of a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DefinitionStatus {
    #[serde(default)]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub state: String,

    #[serde(default)]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Label match identifying the workload to scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScaleTarget {
    /// Namespace the workload lives in (defaults to "default")
    #[serde(rename = "matchNamespace")]
    #[serde(default)]
    pub match_namespace: String,

    /// Label key to match
    #[serde(rename = "labelName")]
    pub label_name: String,

    /// Label value to match
    #[serde(rename = "matchLabel")]
    pub match_label: String,

    /// Workload kind: "deployment" (default) or "replicaset"
    #[serde(rename = "targetType")]
    #[serde(default)]
    pub target_type: String,
}

/// Workload kinds the scale client understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Deployment,
    ReplicaSet,
}

impl ScaleTarget {
    /// Parse the target kind, case-insensitively
    pub fn target_kind(&self) -> Option<TargetKind> {
        match self.target_type.to_lowercase().as_str() {
            "deployment" => Some(TargetKind::Deployment),
            "replicaset" => Some(TargetKind::ReplicaSet),
            _ => None,
        }
    }
}

/// One metric specification: a scrape query, thresholds and an evaluation
/// algorithm. Each metric becomes its own pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricSpec {
    /// Stable identifier, used to route clear-buffer requests
    pub name: String,

    /// Free-text metric classification (required but not interpreted)
    #[serde(rename = "metricType")]
    #[serde(default)]
    pub metric_type: String,

    /// Base URL of the time-series backend
    #[serde(rename = "prometheusPath")]
    #[serde(default)]
    pub prometheus_path: String,

    /// PromQL query producing the scaling signal
    #[serde(rename = "prometheusQuery")]
    #[serde(default)]
    pub prometheus_query: String,

    /// Threshold below which a sample votes for scale-down
    #[serde(rename = "scaleDownValue")]
    #[serde(default)]
    pub scale_down_value: String,

    /// Threshold above which a sample votes for scale-up
    #[serde(rename = "scaleUpValue")]
    #[serde(default)]
    pub scale_up_value: String,

    /// How thresholds are interpreted: integer, double, boolean, time, string
    #[serde(rename = "scaleValueType")]
    #[serde(default)]
    pub scale_value_type: String,

    /// Window size of the evaluator's majority vote (>= 1 after defaulting)
    #[serde(rename = "numOfTests")]
    #[serde(default)]
    pub num_of_tests: i64,

    /// Aggregation algorithm: default, mean, median, trimmedMean, arimax
    #[serde(default)]
    pub algorithm: String,

    /// Percentage trimmed from the sample extremes, in [0,100]
    #[serde(rename = "trimmedPercentage")]
    #[serde(default)]
    pub trimmed_percentage: i64,

    /// Vote quorum for the default algorithm, in [0,100]
    #[serde(rename = "percentageOfTestConditionFulfillment")]
    #[serde(default)]
    pub percentage_of_test_condition_fulfillment: i64,

    /// Interval between backend queries (duration string, default "1s")
    #[serde(rename = "scrapeInterval")]
    #[serde(default)]
    pub scrape_interval: String,

    /// Interval between aggregations (duration string, default "1m")
    #[serde(rename = "testInterval")]
    #[serde(default)]
    pub test_interval: String,

    /// ARIMAX autoregression degree p
    #[serde(rename = "autoregressionDegree")]
    #[serde(default)]
    pub autoregression_degree: i64,

    /// ARIMAX moving-average degree q
    #[serde(rename = "movingAverageDegree")]
    #[serde(default)]
    pub moving_average_degree: i64,

    /// phi coefficients, zero-padded to the autoregression degree
    #[serde(rename = "autoregressionCoefficients")]
    #[serde(default)]
    pub autoregression_coefficients: Vec<String>,

    /// theta coefficients, zero-padded to the moving-average degree
    #[serde(rename = "movingAverageCoefficients")]
    #[serde(default)]
    pub moving_average_coefficients: Vec<String>,

    /// beta coefficient applied to the exogenous input
    #[serde(rename = "exogenousRegressorCoefficient")]
    #[serde(default)]
    pub exogenous_regressor_coefficient: String,

    /// Clamp applied to the exogenous input
    #[serde(rename = "exogenousRegressorMaxValue")]
    #[serde(default)]
    pub exogenous_regressor_max_value: String,

    /// PromQL query producing the exogenous input
    #[serde(rename = "exogenousRegressorQuery")]
    #[serde(default)]
    pub exogenous_regressor_query: String,
}

/// Aggregation algorithms for the tester
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Default,
    Mean,
    Median,
    TrimmedMean,
    Arimax,
}

/// Threshold interpretations for the normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleValueType {
    Integer,
    Double,
    Boolean,
    Time,
    Text,
}

impl MetricSpec {
    /// Parse the aggregation algorithm, case-insensitively; unknown or empty
    /// values fall back to the default voting algorithm
    pub fn parsed_algorithm(&self) -> Algorithm {
        match self.algorithm.to_uppercase().as_str() {
            "MEAN" => Algorithm::Mean,
            "MEDIAN" => Algorithm::Median,
            "TRIMMEDMEAN" => Algorithm::TrimmedMean,
            "ARIMAX" => Algorithm::Arimax,
            _ => Algorithm::Default,
        }
    }

    /// Parse the threshold interpretation, case-insensitively
    pub fn parsed_scale_value_type(&self) -> Option<ScaleValueType> {
        match self.scale_value_type.to_uppercase().as_str() {
            "INTEGER" => Some(ScaleValueType::Integer),
            "DOUBLE" => Some(ScaleValueType::Double),
            "BOOLEAN" => Some(ScaleValueType::Boolean),
            "TIME" => Some(ScaleValueType::Time),
            "STRING" => Some(ScaleValueType::Text),
            _ => None,
        }
    }

    /// Parsed scrape interval; defaulting guarantees this parses
    pub fn scrape_duration(&self) -> Option<Duration> {
        humantime::parse_duration(&self.scrape_interval).ok()
    }

    /// Parsed test interval; defaulting guarantees this parses
    pub fn test_duration(&self) -> Option<Duration> {
        humantime::parse_duration(&self.test_interval).ok()
    }

    /// Number of scrape ticks that feed one aggregation
    pub fn scrapes_per_test(&self) -> u64 {
        match (self.test_duration(), self.scrape_duration()) {
            (Some(test), Some(scrape)) if !scrape.is_zero() => {
                (test.as_nanos() / scrape.as_nanos()).max(1) as u64
            }
            _ => 1,
        }
    }

    /// phi coefficients as reals; defaulting guarantees length >= p
    pub fn ar_coefficients(&self) -> Vec<f64> {
        self.autoregression_coefficients
            .iter()
            .map(|c| c.parse::<f64>().unwrap_or(0.0))
            .collect()
    }

    /// theta coefficients as reals; defaulting guarantees length >= q
    pub fn ma_coefficients(&self) -> Vec<f64> {
        self.moving_average_coefficients
            .iter()
            .map(|c| c.parse::<f64>().unwrap_or(0.0))
            .collect()
    }
}

impl AutoscalingSpec {
    /// Parsed cooldown; defaulting guarantees this parses
    pub fn cooldown(&self) -> Option<Duration> {
        humantime::parse_duration(&self.interval_between_autoscaling).ok()
    }
}

impl AutoscalingDefinition {
    /// Create a minimal definition, mostly useful in tests
    pub fn new(name: impl Into<String>, target: ScaleTarget) -> Self {
        Self {
            api_version: format!("{}/{}", API_GROUP, API_VERSION),
            kind: "AutoscalingDefinition".to_string(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace: default_namespace(),
                uid: Uuid::new_v4(),
                labels: HashMap::new(),
                creation_timestamp: Some(Utc::now()),
            },
            spec: AutoscalingSpec {
                scale_target: target,
                min_replicas: 0,
                max_replicas: 0,
                interval_between_autoscaling: String::new(),
                scaling_step: 0,
                metrics: vec![],
            },
            status: None,
        }
    }
}

/// Wrapper around a namespaced list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalingDefinitionList {
    #[serde(default)]
    pub items: Vec<AutoscalingDefinition>,
}
