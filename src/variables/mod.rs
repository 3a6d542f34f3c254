pub mod schema;
pub mod validator;
pub mod wire;

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::WireError;

pub use schema::{Constraints, VariableDefinition};
pub use validator::{Validation, validate, validate_with_report};
pub use wire::{WireVariable, deserialize, serialize};

/// Raw, loosely-typed variable input keyed by variable name (form fields,
/// CLI `--var` pairs, JSON bodies).
pub type RawVariables = HashMap<String, serde_json::Value>;

/// The closed set of variable types understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Json,
}

impl VariableType {
    pub const ALL: [VariableType; 6] = [
        VariableType::String,
        VariableType::Integer,
        VariableType::Float,
        VariableType::Boolean,
        VariableType::Date,
        VariableType::Json,
    ];

    /// Wire tag for this type.
    pub fn tag(&self) -> &'static str {
        match self {
            VariableType::String => "string",
            VariableType::Integer => "integer",
            VariableType::Float => "float",
            VariableType::Boolean => "boolean",
            VariableType::Date => "date",
            VariableType::Json => "json",
        }
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for VariableType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VariableType::ALL
            .into_iter()
            .find(|t| t.tag() == s)
            .ok_or_else(|| WireError::UnknownType(s.to_string()))
    }
}

/// A coerced variable value. The variant is the type, so a value can never
/// disagree with its declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    String(String),
    Integer(i64),
    /// Always finite.
    Float(f64),
    Boolean(bool),
    Date(DateTime<FixedOffset>),
    /// Always a JSON object or array.
    Json(serde_json::Value),
}

impl VariableValue {
    pub fn var_type(&self) -> VariableType {
        match self {
            VariableValue::String(_) => VariableType::String,
            VariableValue::Integer(_) => VariableType::Integer,
            VariableValue::Float(_) => VariableType::Float,
            VariableValue::Boolean(_) => VariableType::Boolean,
            VariableValue::Date(_) => VariableType::Date,
            VariableValue::Json(_) => VariableType::Json,
        }
    }

    /// Numeric view used by range constraints.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            VariableValue::Integer(i) => Some(*i as f64),
            VariableValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl std::fmt::Display for VariableValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableValue::String(s) => f.write_str(s),
            VariableValue::Integer(i) => write!(f, "{}", i),
            VariableValue::Float(x) => write!(f, "{}", x),
            VariableValue::Boolean(b) => write!(f, "{}", b),
            VariableValue::Date(d) => f.write_str(&wire::format_date(d)),
            VariableValue::Json(v) => write!(f, "{}", v),
        }
    }
}

/// A validated `(name, type, value)` triple ready for transmission.
///
/// A variable read from the wire remembers the exact JSON it arrived as, so
/// sending it back unchanged reproduces the payload byte for byte. That
/// rendering is not part of equality.
#[derive(Debug, Clone)]
pub struct TypedVariable {
    pub name: String,
    pub value: VariableValue,
    wire_form: Option<serde_json::Value>,
}

impl TypedVariable {
    pub fn new(name: impl Into<String>, value: VariableValue) -> Self {
        Self {
            name: name.into(),
            value,
            wire_form: None,
        }
    }

    pub fn var_type(&self) -> VariableType {
        self.value.var_type()
    }
}

impl PartialEq for TypedVariable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value
    }
}
