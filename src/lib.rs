//! # promscaler
//!
//! A custom horizontal autoscaler for Kubernetes workloads driven by
//! arbitrary Prometheus metrics. Operators declare `AutoscalingDefinition`
//! custom resources binding a label-selected workload to a set of metric
//! specifications; the controller scrapes those metrics, evaluates
//! scale-up/scale-down predicates with a reactive majority vote or a
//! predictive ARIMAX model, and writes scale updates while respecting the
//! replica bounds and a post-action cooldown.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          Reconciler                            │
//! │     polls AutoscalingDefinitions, diffs by name, owns the      │
//! │                    live pipeline sets                          │
//! └──────────────────────────────┬─────────────────────────────────┘
//!                                │ per definition
//!        ┌───────────────────────┼───────────────────────┐
//!        ▼                       ▼                       ▼
//!  scraper → tester → evaluator  …  (one pipeline per metric)
//!        └───────────────────────┴─────────── merge ──► actuator
//!                                                          │
//!                                              clamp, write scale,
//!                                              cooldown, clear windows
//! ```

pub mod autoscaler;
pub mod clients;
pub mod metrics;
pub mod model;

pub use autoscaler::{AutoscaleEvaluation, Reconciler, RECONCILE_INTERVAL_SECS};
pub use clients::{KubeClient, PrometheusClient};
pub use model::AutoscalingDefinition;
