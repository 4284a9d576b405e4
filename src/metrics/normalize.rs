//! Metric value normalization
//!
//! Converts one time-series reply into zero or more comparable samples, each
//! carrying a bound-passed flag pair computed from the metric's thresholds
//! under its scale value type. Pure: no I/O, no timing dependence.

use chrono::DateTime;
use thiserror::Error;

use crate::clients::{MetricValue, ScalarPoint};
use crate::model::{MetricSpec, ScaleValueType};

/// Errors raised while normalizing a reply
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("cannot recognize metric value kind")]
    UnknownValueKind,

    #[error("metrics vector is empty")]
    EmptyVector,

    #[error("metrics matrix is empty")]
    EmptyMatrix,

    #[error("string metric cannot be cast to type {0}")]
    StringTypeMismatch(String),

    #[error("unsupported scaleValueType: {0}")]
    UnsupportedValueType(String),

    #[error("bad threshold '{0}': {1}")]
    BadThreshold(String, String),
}

/// One normalized observation
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: f64,
    /// Epoch seconds, when the backend supplied one
    pub timestamp: Option<f64>,
    /// The sample is at or below the scale-down threshold
    pub lower_bound_passed: bool,
    /// The sample is at or above the scale-up threshold
    pub upper_bound_passed: bool,
    pub valid: bool,
}

/// The normalized form of one scrape: its samples plus aggregate flags
/// (conjunction across the contained samples)
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedMetric {
    pub metric_name: String,
    pub lower_bound_passed: bool,
    pub upper_bound_passed: bool,
    pub valid: bool,
    pub samples: Vec<Sample>,
}

impl ScrapedMetric {
    fn invalid(metric_name: &str) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            lower_bound_passed: false,
            upper_bound_passed: false,
            valid: false,
            samples: vec![],
        }
    }
}

/// Normalize one backend reply into samples with bound flags
pub fn normalize(value: &MetricValue, metric: &MetricSpec) -> Result<ScrapedMetric, NormalizeError> {
    match value {
        MetricValue::String { value, timestamp } => normalize_string(value, *timestamp, metric),
        MetricValue::Scalar(point) => {
            let sample = scalar_sample(point, metric)?;
            Ok(ScrapedMetric {
                metric_name: metric.name.clone(),
                lower_bound_passed: sample.lower_bound_passed,
                upper_bound_passed: sample.upper_bound_passed,
                valid: true,
                samples: vec![sample],
            })
        }
        MetricValue::Vector(points) => {
            if points.is_empty() {
                return Err(NormalizeError::EmptyVector);
            }
            normalize_points(points.iter(), metric)
        }
        MetricValue::Matrix(rows) => {
            if rows.iter().all(|r| r.is_empty()) {
                return Err(NormalizeError::EmptyMatrix);
            }
            normalize_points(rows.iter().flatten(), metric)
        }
        MetricValue::None => Err(NormalizeError::UnknownValueKind),
    }
}

/// Expand scalar points into samples, conjoining the aggregate flags
fn normalize_points<'a>(
    points: impl Iterator<Item = &'a ScalarPoint>,
    metric: &MetricSpec,
) -> Result<ScrapedMetric, NormalizeError> {
    let mut result = ScrapedMetric {
        metric_name: metric.name.clone(),
        lower_bound_passed: true,
        upper_bound_passed: true,
        valid: true,
        samples: vec![],
    };
    for point in points {
        let sample = scalar_sample(point, metric)?;
        result.lower_bound_passed = result.lower_bound_passed && sample.lower_bound_passed;
        result.upper_bound_passed = result.upper_bound_passed && sample.upper_bound_passed;
        result.valid = result.valid && sample.valid;
        result.samples.push(sample);
    }
    Ok(result)
}

fn scalar_sample(point: &ScalarPoint, metric: &MetricSpec) -> Result<Sample, NormalizeError> {
    let (lower, upper) = scalar_bounds(metric, point.value)?;
    Ok(Sample {
        value: point.value,
        timestamp: Some(point.timestamp),
        lower_bound_passed: lower,
        upper_bound_passed: upper,
        valid: true,
    })
}

/// Apply the scalar bound rules of the metric's scale value type
pub fn scalar_bounds(metric: &MetricSpec, value: f64) -> Result<(bool, bool), NormalizeError> {
    match metric.parsed_scale_value_type() {
        Some(ScaleValueType::Integer) => integer_bounds(metric, value),
        Some(ScaleValueType::Double) => double_bounds(metric, value),
        Some(ScaleValueType::Boolean) => Ok(boolean_bounds(value)),
        Some(ScaleValueType::Time) => time_bounds(metric, value),
        Some(ScaleValueType::Text) | None => Err(NormalizeError::UnsupportedValueType(
            metric.scale_value_type.clone(),
        )),
    }
}

fn integer_bounds(metric: &MetricSpec, value: f64) -> Result<(bool, bool), NormalizeError> {
    let down = parse_threshold::<i64>(&metric.scale_down_value)?;
    let up = parse_threshold::<i64>(&metric.scale_up_value)?;
    let truncated = value as i64;
    Ok((truncated <= down, truncated >= up))
}

fn double_bounds(metric: &MetricSpec, value: f64) -> Result<(bool, bool), NormalizeError> {
    let down = parse_threshold::<f64>(&metric.scale_down_value)?;
    let up = parse_threshold::<f64>(&metric.scale_up_value)?;
    Ok((value <= down, value >= up))
}

fn boolean_bounds(value: f64) -> (bool, bool) {
    if value > 0.0 {
        (false, true)
    } else {
        (true, false)
    }
}

/// The sample is an epoch in seconds; thresholds are absolute RFC 3339
/// timestamps. Strictly-after the up time passes the upper bound,
/// strictly-before the down time passes the lower bound.
fn time_bounds(metric: &MetricSpec, value: f64) -> Result<(bool, bool), NormalizeError> {
    let down = DateTime::parse_from_rfc3339(&metric.scale_down_value).map_err(|e| {
        NormalizeError::BadThreshold(metric.scale_down_value.clone(), e.to_string())
    })?;
    let up = DateTime::parse_from_rfc3339(&metric.scale_up_value)
        .map_err(|e| NormalizeError::BadThreshold(metric.scale_up_value.clone(), e.to_string()))?;
    let sample_epoch = value as i64;
    Ok((
        sample_epoch < down.timestamp(),
        sample_epoch > up.timestamp(),
    ))
}

fn parse_threshold<T: std::str::FromStr>(raw: &str) -> Result<T, NormalizeError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| NormalizeError::BadThreshold(raw.to_string(), e.to_string()))
}

/// String replies compare case-insensitively against the thresholds; the
/// sentinel "BOOLEAN" up-threshold turns "TRUE"/"FALSE" into pass-through
/// bounds
fn normalize_string(
    value: &str,
    timestamp: f64,
    metric: &MetricSpec,
) -> Result<ScrapedMetric, NormalizeError> {
    let is_boolean = metric.scale_up_value.eq_ignore_ascii_case("BOOLEAN");
    let is_string_type = metric.scale_value_type.eq_ignore_ascii_case("STRING");
    if !is_string_type && !is_boolean {
        return Err(NormalizeError::StringTypeMismatch(
            metric.scale_value_type.clone(),
        ));
    }

    let mut lower = metric.scale_down_value.eq_ignore_ascii_case(value);
    if !lower && is_boolean && metric.scale_down_value.eq_ignore_ascii_case("FALSE") {
        lower = true;
    }
    let mut upper = metric.scale_up_value.eq_ignore_ascii_case(value);
    if !upper && is_boolean && metric.scale_up_value.eq_ignore_ascii_case("TRUE") {
        upper = true;
    }

    Ok(ScrapedMetric {
        metric_name: metric.name.clone(),
        lower_bound_passed: lower,
        upper_bound_passed: upper,
        valid: true,
        samples: vec![Sample {
            value: 0.0,
            timestamp: Some(timestamp),
            lower_bound_passed: lower,
            upper_bound_passed: upper,
            valid: true,
        }],
    })
}

/// Convenience used by the scraper: normalize, mapping any error to an
/// invalid result
pub fn normalize_or_invalid(value: &MetricValue, metric: &MetricSpec) -> ScrapedMetric {
    match normalize(value, metric) {
        Ok(result) => result,
        Err(_) => ScrapedMetric::invalid(&metric.name),
    }
}
