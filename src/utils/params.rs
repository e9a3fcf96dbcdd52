use serde_json::Number;

use crate::types::Warning;

/// Clamps a float knob into the vendor-accepted range, recording a warning
/// instead of rejecting the request. Non-finite values are dropped entirely.
pub(crate) fn clamped_number_from_f32(
    parameter: &str,
    value: f32,
    min: f32,
    max: f32,
    warnings: &mut Vec<Warning>,
) -> Option<Number> {
    if !value.is_finite() {
        warnings.push(Warning::Compatibility {
            feature: parameter.to_string(),
            details: format!("{parameter} must be a finite number; dropping invalid value"),
        });
        return None;
    }

    let mut clamped = value;
    if value > max {
        warnings.push(Warning::Clamped {
            parameter: parameter.to_string(),
            original: value,
            clamped_to: max,
        });
        clamped = max;
    } else if value < min {
        warnings.push(Warning::Clamped {
            parameter: parameter.to_string(),
            original: value,
            clamped_to: min,
        });
        clamped = min;
    }

    Number::from_f64(clamped as f64)
}

pub(crate) fn clamped_u32(
    parameter: &str,
    value: u32,
    min: u32,
    max: u32,
    warnings: &mut Vec<Warning>,
) -> u32 {
    if value > max {
        warnings.push(Warning::Clamped {
            parameter: parameter.to_string(),
            original: value as f32,
            clamped_to: max as f32,
        });
        max
    } else if value < min {
        warnings.push(Warning::Clamped {
            parameter: parameter.to_string(),
            original: value as f32,
            clamped_to: min as f32,
        });
        min
    } else {
        value
    }
}
