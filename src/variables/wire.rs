use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;
use crate::variables::validator::parse_date;
use crate::variables::{TypedVariable, VariableType, VariableValue};

/// One variable as exchanged with the engine.
///
/// `type`/`value` are the canonical field names. The storage-format names
/// `value_type`/`value_data` are accepted on input and never emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireVariable {
    pub name: String,
    #[serde(rename = "type", alias = "value_type")]
    pub type_tag: String,
    #[serde(alias = "value_data")]
    pub value: Value,
}

impl WireVariable {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            value,
        }
    }
}

pub fn serialize(variables: &[TypedVariable]) -> Vec<WireVariable> {
    variables
        .iter()
        .map(|v| WireVariable {
            name: v.name.clone(),
            type_tag: v.var_type().tag().to_string(),
            value: retained_form(v).unwrap_or_else(|| encode_value(&v.value)),
        })
        .collect()
}

/// The JSON a variable was received as, if it still decodes to its value.
fn retained_form(variable: &TypedVariable) -> Option<Value> {
    let form = variable.wire_form.as_ref()?;
    let decoded = decode_value(&variable.name, variable.var_type(), form).ok()?;
    (decoded == variable.value && same_offset(&decoded, &variable.value))
        .then(|| form.clone())
}

// Date equality compares instants; the offset must match too for the
// retained text to still describe the value.
fn same_offset(a: &VariableValue, b: &VariableValue) -> bool {
    match (a, b) {
        (VariableValue::Date(x), VariableValue::Date(y)) => x.offset() == y.offset(),
        _ => true,
    }
}

pub fn deserialize(wire: &[WireVariable]) -> Result<Vec<TypedVariable>, WireError> {
    wire.iter()
        .map(|w| -> Result<TypedVariable, WireError> {
            let var_type: VariableType = w.type_tag.parse()?;
            let value = decode_value(&w.name, var_type, &w.value)?;
            let mut variable = TypedVariable::new(&w.name, value);
            variable.wire_form = Some(w.value.clone());
            Ok(variable)
        })
        .collect()
}

pub fn encode_value(value: &VariableValue) -> Value {
    match value {
        VariableValue::String(s) => Value::String(s.clone()),
        VariableValue::Integer(i) => Value::from(*i),
        VariableValue::Float(f) => Value::from(*f),
        VariableValue::Boolean(b) => Value::Bool(*b),
        VariableValue::Date(d) => Value::String(format_date(d)),
        VariableValue::Json(v) => v.clone(),
    }
}

/// Date form for values built locally: RFC 3339, `Z` for UTC, sub-seconds
/// only when present.
pub fn format_date(date: &DateTime<FixedOffset>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn decode_value(name: &str, var_type: VariableType, value: &Value) -> Result<VariableValue, WireError> {
    let decoded = match (var_type, value) {
        (VariableType::String, Value::String(s)) => Some(VariableValue::String(s.clone())),
        (VariableType::Integer, Value::Number(n)) => n.as_i64().map(VariableValue::Integer),
        (VariableType::Float, Value::Number(n)) => n.as_f64().map(VariableValue::Float),
        (VariableType::Boolean, Value::Bool(b)) => Some(VariableValue::Boolean(*b)),
        (VariableType::Date, Value::String(s)) => parse_date(s).map(VariableValue::Date),
        (VariableType::Json, Value::Object(_) | Value::Array(_)) => {
            Some(VariableValue::Json(value.clone()))
        }
        _ => None,
    };

    decoded.ok_or_else(|| WireError::ShapeMismatch {
        name: name.to_string(),
        tag: var_type.tag().to_string(),
        found: value.to_string(),
    })
}
