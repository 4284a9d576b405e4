//! Required-field validation and defaulting for definitions and metrics
//!
//! Runs before a pipeline starts. A metric that fails validation is rejected
//! and logged; the remaining metrics of the definition still start.
//! Defaulting is idempotent.

use thiserror::Error;

use super::{AutoscalingDefinition, MetricSpec};

/// Errors raised by required-field validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(
        "one of required fields not found: name, metricType, scaleDownValue, \
         scaleUpValue, scaleValueType"
    )]
    MissingRequiredField,
}

/// Check that every required metric field is non-empty
pub fn validate_required_metric_fields(metric: &MetricSpec) -> Result<(), ValidationError> {
    if metric.name.is_empty()
        || metric.metric_type.is_empty()
        || metric.scale_down_value.is_empty()
        || metric.scale_up_value.is_empty()
        || metric.scale_value_type.is_empty()
    {
        return Err(ValidationError::MissingRequiredField);
    }
    Ok(())
}

/// Fill optional metric fields with their defaults and clamp ranges
pub fn fill_metric_defaults(metric: &mut MetricSpec) {
    if metric.num_of_tests <= 0 {
        metric.num_of_tests = 1;
    }
    if metric.algorithm.is_empty() {
        metric.algorithm = "default".to_string();
    }
    metric.trimmed_percentage = metric.trimmed_percentage.clamp(0, 100);
    metric.percentage_of_test_condition_fulfillment =
        metric.percentage_of_test_condition_fulfillment.clamp(0, 100);

    if humantime::parse_duration(&metric.scrape_interval).is_err() {
        metric.scrape_interval = "1s".to_string();
    }
    if humantime::parse_duration(&metric.test_interval).is_err() {
        metric.test_interval = "1m".to_string();
    }

    if metric.autoregression_degree < 0 {
        metric.autoregression_degree = 0;
    }
    if metric.moving_average_degree < 0 {
        metric.moving_average_degree = 0;
    }
    if metric
        .exogenous_regressor_coefficient
        .parse::<f64>()
        .is_err()
    {
        metric.exogenous_regressor_coefficient = "0.0".to_string();
    }

    sanitize_coefficients(&mut metric.autoregression_coefficients);
    sanitize_coefficients(&mut metric.moving_average_coefficients);
    pad_coefficients(
        &mut metric.autoregression_coefficients,
        metric.autoregression_degree as usize,
    );
    pad_coefficients(
        &mut metric.moving_average_coefficients,
        metric.moving_average_degree as usize,
    );
}

/// Unparsable coefficients become 0
fn sanitize_coefficients(coefficients: &mut [String]) {
    for coefficient in coefficients.iter_mut() {
        if coefficient.parse::<f64>().is_err() {
            *coefficient = "0.0".to_string();
        }
    }
}

/// Zero-pad a coefficient vector to the required degree
fn pad_coefficients(coefficients: &mut Vec<String>, degree: usize) {
    while coefficients.len() < degree {
        coefficients.push("0.0".to_string());
    }
}

/// Fill definition-level defaults: replica bounds, step, cooldown and target
pub fn fill_definition_defaults(definition: &mut AutoscalingDefinition) {
    let spec = &mut definition.spec;
    if spec.min_replicas <= 0 {
        spec.min_replicas = 1;
    }
    if spec.max_replicas <= 0 {
        spec.max_replicas = 1;
    }
    if spec.scaling_step <= 0 {
        spec.scaling_step = 1;
    }
    if humantime::parse_duration(&spec.interval_between_autoscaling).is_err() {
        spec.interval_between_autoscaling = "2m".to_string();
    }
    if spec.scale_target.match_namespace.is_empty() {
        spec.scale_target.match_namespace = "default".to_string();
    }
    if spec.scale_target.target_type.is_empty() {
        spec.scale_target.target_type = "deployment".to_string();
    }
}
