use serde::{Deserialize, Serialize};

use crate::engine::types::ProcessDefinition;
use crate::variables::VariableType;

/// Optional rules applied after a value has been coerced to its type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(
        default,
        rename = "options",
        alias = "enumValues",
        alias = "enum_values",
        skip_serializing_if = "Option::is_none"
    )]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regular expression the text must match from its first character.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Schema entry declaring one process variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Raw default, coerced through the same path as user input when used.
    #[serde(
        default,
        rename = "default_value",
        alias = "default",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<serde_json::Value>,
    #[serde(
        default,
        rename = "validation",
        alias = "constraints",
        skip_serializing_if = "Option::is_none"
    )]
    pub constraints: Option<Constraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl VariableDefinition {
    pub fn new(name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            name: name.into(),
            var_type,
            required: true,
            default: None,
            constraints: None,
            label: None,
            description: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Label for display, falling back to the variable name.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Ordered variable schema declared by a process definition.
pub fn variable_schema(definition: &ProcessDefinition) -> &[VariableDefinition] {
    &definition.variable_definitions
}

/// Look up a single variable definition by name.
pub fn find_variable<'a>(
    definition: &'a ProcessDefinition,
    name: &str,
) -> Option<&'a VariableDefinition> {
    variable_schema(definition).iter().find(|v| v.name == name)
}
