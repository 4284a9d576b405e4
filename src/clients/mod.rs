//! External clients: the time-series backend and the orchestrator API
//!
//! Each client is fronted by an async trait so the pipelines and the
//! actuator can be exercised against mocks in tests.

pub mod kube;
pub mod prometheus;

pub use kube::{
    ClusterConfig, DefinitionsClient, KubeClient, KubeError, Scale, ScaleClient,
};
pub use prometheus::{MetricValue, PrometheusClient, QueryError, ScalarPoint, TimeSeriesQuery};
