//! Time-series backend client
//!
//! Queries the Prometheus HTTP API and maps the reply into a [`MetricValue`],
//! the input of the metric normalizer. Every query is bounded by a 30 s
//! deadline.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Query deadline for a single backend call
pub const QUERY_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur while querying the backend
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("prometheus query or path should not be empty")]
    EmptyQuery,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("backend error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed query response: {0}")]
    Parse(String),
}

/// One scalar observation with its timestamp (epoch seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarPoint {
    pub value: f64,
    pub timestamp: f64,
}

/// A time-series reply, one of the four Prometheus value kinds
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    String { value: String, timestamp: f64 },
    Scalar(ScalarPoint),
    Vector(Vec<ScalarPoint>),
    Matrix(Vec<Vec<ScalarPoint>>),
    /// Absent or unrecognized value kind
    None,
}

/// Trait seam over the backend, allows mocking in tests
#[async_trait]
pub trait TimeSeriesQuery: Send + Sync {
    /// Run an instant query against the backend at `base_url`
    async fn query(&self, base_url: &str, query: &str) -> Result<MetricValue, QueryError>;
}

/// Real HTTP implementation of [`TimeSeriesQuery`]
#[derive(Clone)]
pub struct PrometheusClient {
    client: reqwest::Client,
}

impl PrometheusClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(QUERY_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for PrometheusClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeSeriesQuery for PrometheusClient {
    async fn query(&self, base_url: &str, query: &str) -> Result<MetricValue, QueryError> {
        if base_url.is_empty() || query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let url = format!("{}/api/v1/query", base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| QueryError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(QueryError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        parse_query_response(&body)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    values: Vec<(f64, String)>,
}

/// Parse a raw query API body into a [`MetricValue`]
pub fn parse_query_response(body: &str) -> Result<MetricValue, QueryError> {
    let response: ApiResponse =
        serde_json::from_str(body).map_err(|e| QueryError::Parse(e.to_string()))?;

    if response.status != "success" {
        return Err(QueryError::Api {
            status: 0,
            message: response.error.unwrap_or_else(|| response.status.clone()),
        });
    }

    let data = match response.data {
        Some(data) => data,
        None => return Ok(MetricValue::None),
    };

    match data.result_type.as_str() {
        "scalar" => {
            let (timestamp, raw): (f64, String) = serde_json::from_value(data.result)
                .map_err(|e| QueryError::Parse(e.to_string()))?;
            Ok(MetricValue::Scalar(ScalarPoint {
                value: parse_sample_value(&raw)?,
                timestamp,
            }))
        }
        "string" => {
            let (timestamp, value): (f64, String) = serde_json::from_value(data.result)
                .map_err(|e| QueryError::Parse(e.to_string()))?;
            Ok(MetricValue::String { value, timestamp })
        }
        "vector" => {
            let samples: Vec<VectorSample> = serde_json::from_value(data.result)
                .map_err(|e| QueryError::Parse(e.to_string()))?;
            let points = samples
                .into_iter()
                .map(|s| {
                    Ok(ScalarPoint {
                        value: parse_sample_value(&s.value.1)?,
                        timestamp: s.value.0,
                    })
                })
                .collect::<Result<Vec<_>, QueryError>>()?;
            Ok(MetricValue::Vector(points))
        }
        "matrix" => {
            let series: Vec<MatrixSeries> = serde_json::from_value(data.result)
                .map_err(|e| QueryError::Parse(e.to_string()))?;
            let rows = series
                .into_iter()
                .map(|s| {
                    s.values
                        .into_iter()
                        .map(|(timestamp, raw)| {
                            Ok(ScalarPoint {
                                value: parse_sample_value(&raw)?,
                                timestamp,
                            })
                        })
                        .collect::<Result<Vec<_>, QueryError>>()
                })
                .collect::<Result<Vec<_>, QueryError>>()?;
            Ok(MetricValue::Matrix(rows))
        }
        _ => Ok(MetricValue::None),
    }
}

/// Sample values arrive as strings; NaN and Inf are legal Prometheus floats
fn parse_sample_value(raw: &str) -> Result<f64, QueryError> {
    match raw {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        other => other
            .parse::<f64>()
            .map_err(|e| QueryError::Parse(format!("bad sample value '{}': {}", other, e))),
    }
}
