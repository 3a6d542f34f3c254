use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde_json::Value;

use crate::error::{ValidationError, ValidationFailure};
use crate::variables::wire;
use crate::variables::{
    Constraints, RawVariables, TypedVariable, VariableDefinition, VariableType, VariableValue,
};

/// Successful validation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    /// Coerced variables in definition order.
    pub variables: Vec<TypedVariable>,
    /// Names of variables whose value came from the schema default.
    pub defaulted: Vec<String>,
}

/// Validate and coerce raw input against an ordered schema.
///
/// Either every declared variable coerces and satisfies its constraints, or
/// the returned failure lists every problem found. Raw keys the schema does
/// not declare are ignored.
pub fn validate(
    raw: &RawVariables,
    definitions: &[VariableDefinition],
) -> Result<Vec<TypedVariable>, ValidationFailure> {
    validate_with_report(raw, definitions).map(|v| v.variables)
}

/// Same as [`validate`], additionally reporting which variables were defaulted.
pub fn validate_with_report(
    raw: &RawVariables,
    definitions: &[VariableDefinition],
) -> Result<Validation, ValidationFailure> {
    let mut variables = Vec::with_capacity(definitions.len());
    let mut defaulted = Vec::new();
    let mut errors = Vec::new();

    for def in definitions {
        let supplied = raw.get(&def.name).filter(|v| !is_missing(v, def.var_type));

        let (input, from_default) = match (supplied, &def.default) {
            (Some(value), _) => (value, false),
            (None, Some(default)) => (default, true),
            (None, None) if def.required => {
                errors.push(ValidationError::new(
                    &def.name,
                    "missing required variable",
                    raw.get(&def.name).cloned(),
                ));
                continue;
            }
            (None, None) => continue,
        };

        let value = match coerce(def.var_type, input) {
            Ok(value) => value,
            Err(reason) => {
                let reason = if from_default {
                    format!("invalid default: {}", reason)
                } else {
                    reason
                };
                errors.push(ValidationError::new(&def.name, reason, Some(input.clone())));
                continue;
            }
        };

        let before = errors.len();
        if let Some(constraints) = &def.constraints {
            check_constraints(def, constraints, &value, input, &mut errors);
        }
        if errors.len() > before {
            continue;
        }

        if from_default {
            defaulted.push(def.name.clone());
        }
        variables.push(TypedVariable::new(&def.name, value));
    }

    match ValidationFailure::from_errors(errors) {
        Some(failure) => Err(failure),
        None => Ok(Validation {
            variables,
            defaulted,
        }),
    }
}

/// `null`, or blank text for anything but a string variable.
fn is_missing(value: &Value, var_type: VariableType) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => var_type != VariableType::String && s.trim().is_empty(),
        _ => false,
    }
}

/// Coerce one raw value to the declared type.
pub fn coerce(var_type: VariableType, raw: &Value) -> Result<VariableValue, String> {
    match var_type {
        VariableType::String => coerce_string(raw),
        VariableType::Integer => coerce_integer(raw),
        VariableType::Float => coerce_float(raw),
        VariableType::Boolean => coerce_boolean(raw),
        VariableType::Date => coerce_date(raw),
        VariableType::Json => coerce_json(raw),
    }
}

fn coerce_string(raw: &Value) -> Result<VariableValue, String> {
    match raw {
        Value::String(s) => Ok(VariableValue::String(s.clone())),
        other => Err(format!("expected text, got {}", describe(other))),
    }
}

fn coerce_integer(raw: &Value) -> Result<VariableValue, String> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(VariableValue::Integer(i));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                    Ok(VariableValue::Integer(f as i64))
                }
                _ => Err(format!("{} is not a valid integer", n)),
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(VariableValue::Integer)
            .map_err(|_| format!("'{}' is not a valid integer", s)),
        other => Err(format!("expected an integer, got {}", describe(other))),
    }
}

fn coerce_float(raw: &Value) -> Result<VariableValue, String> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => return Err(format!("expected a number, got {}", describe(other))),
    };
    match parsed {
        Some(f) if f.is_finite() => Ok(VariableValue::Float(f)),
        Some(_) => Err(format!("{} is not a finite number", raw)),
        None => Err(format!("{} is not a valid number", raw)),
    }
}

fn coerce_boolean(raw: &Value) -> Result<VariableValue, String> {
    match raw {
        Value::Bool(b) => Ok(VariableValue::Boolean(*b)),
        Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Ok(VariableValue::Boolean(true))
            } else if s.eq_ignore_ascii_case("false") {
                Ok(VariableValue::Boolean(false))
            } else {
                Err(format!("'{}' is not 'true' or 'false'", s))
            }
        }
        other => Err(format!("expected a boolean, got {}", describe(other))),
    }
}

fn coerce_date(raw: &Value) -> Result<VariableValue, String> {
    match raw {
        Value::String(s) => parse_date(s.trim())
            .map(VariableValue::Date)
            .ok_or_else(|| format!("'{}' is not a valid date", s)),
        other => Err(format!("expected a date string, got {}", describe(other))),
    }
}

fn coerce_json(raw: &Value) -> Result<VariableValue, String> {
    let value = match raw {
        Value::String(s) => {
            serde_json::from_str::<Value>(s).map_err(|e| format!("malformed JSON: {}", e))?
        }
        other => other.clone(),
    };
    match value {
        Value::Object(_) | Value::Array(_) => Ok(VariableValue::Json(value)),
        other => Err(format!(
            "expected a JSON object or array, got {}",
            describe(&other)
        )),
    }
}

/// Accepts RFC 3339, a naive date-time (taken as UTC), or a bare calendar
/// date (midnight UTC).
pub fn parse_date(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc().fixed_offset())
}

fn check_constraints(
    def: &VariableDefinition,
    constraints: &Constraints,
    value: &VariableValue,
    raw: &Value,
    errors: &mut Vec<ValidationError>,
) {
    let mut fail = |reason: String| {
        errors.push(ValidationError::new(&def.name, reason, Some(raw.clone())));
    };

    if let Some(n) = value.as_f64() {
        if let Some(min) = constraints.min
            && n < min
        {
            fail(format!("value {} is below the minimum {}", value, min));
        }
        if let Some(max) = constraints.max
            && n > max
        {
            fail(format!("value {} is above the maximum {}", value, max));
        }
    }

    if let (Some(pattern), VariableValue::String(text)) = (&constraints.pattern, value) {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.find(text).is_some_and(|m| m.start() == 0) {
                    fail(format!("value does not match pattern {}", pattern));
                }
            }
            Err(e) => fail(format!("invalid pattern constraint {}: {}", pattern, e)),
        }
    }

    if let Some(options) = &constraints.enum_values {
        if !options.iter().any(|o| is_option(def.var_type, o, value)) {
            let listed = options
                .iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            fail(format!("value must be one of [{}]", listed));
        }
    }
}

/// An option is coerced through the variable's own type before comparing, so
/// `"2024-01-01"` matches a date at that midnight and `1` matches `1.0`.
/// Options that do not coerce fall back to comparing encoded JSON.
fn is_option(var_type: VariableType, option: &Value, value: &VariableValue) -> bool {
    match coerce(var_type, option) {
        Ok(coerced) => coerced == *value,
        Err(_) => same_option(option, &wire::encode_value(value)),
    }
}

fn same_option(option: &Value, encoded: &Value) -> bool {
    match (option, encoded) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => option == encoded,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(_) => "a number".to_string(),
        Value::String(_) => "text".to_string(),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_accepts_integral_float() {
        assert_eq!(
            coerce(VariableType::Integer, &json!(4.0)).unwrap(),
            VariableValue::Integer(4)
        );
        assert!(coerce(VariableType::Integer, &json!(4.5)).is_err());
    }

    #[test]
    fn float_rejects_non_finite_text() {
        assert!(coerce(VariableType::Float, &json!("inf")).is_err());
        assert!(coerce(VariableType::Float, &json!("NaN")).is_err());
        assert!(coerce(VariableType::Float, &json!("abc")).is_err());
    }

    #[test]
    fn boolean_is_case_insensitive() {
        assert_eq!(
            coerce(VariableType::Boolean, &json!(" TRUE ")).unwrap(),
            VariableValue::Boolean(true)
        );
        assert!(coerce(VariableType::Boolean, &json!("yes")).is_err());
        assert!(coerce(VariableType::Boolean, &json!(1)).is_err());
    }

    #[test]
    fn date_formats() {
        assert!(parse_date("2024-03-01T10:15:00Z").is_some());
        assert!(parse_date("2024-03-01T10:15:00+02:00").is_some());
        assert!(parse_date("2024-03-01T10:15:00").is_some());
        assert!(parse_date("2024-03-01").is_some());
        assert!(parse_date("2024-13-01").is_none());
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn json_requires_structure() {
        assert!(coerce(VariableType::Json, &json!("{\"a\": 1}")).is_ok());
        assert!(coerce(VariableType::Json, &json!([1, 2])).is_ok());
        assert!(coerce(VariableType::Json, &json!("{bad")).is_err());
        assert!(coerce(VariableType::Json, &json!("5")).is_err());
    }

    #[test]
    fn blank_text_is_missing_except_for_strings() {
        assert!(is_missing(&json!("  "), VariableType::Integer));
        assert!(!is_missing(&json!(""), VariableType::String));
        assert!(is_missing(&Value::Null, VariableType::String));
    }
}
