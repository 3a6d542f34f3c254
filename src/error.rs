use serde::Serialize;
use thiserror::Error;

/// One variable that failed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub variable_name: String,
    pub reason: String,
    /// The raw input that was rejected, if any was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<serde_json::Value>,
}

impl ValidationError {
    pub fn new(
        variable_name: impl Into<String>,
        reason: impl Into<String>,
        raw_value: Option<serde_json::Value>,
    ) -> Self {
        Self {
            variable_name: variable_name.into(),
            reason: reason.into(),
            raw_value,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.variable_name, self.reason)
    }
}

/// Every error collected while validating a variable set. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{} variable(s) failed validation: {}", .errors.len(), summarize(.errors))]
pub struct ValidationFailure {
    errors: Vec<ValidationError>,
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationFailure {
    /// Returns `None` for an empty error list.
    pub fn from_errors(errors: Vec<ValidationError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors recorded against one variable.
    pub fn for_variable<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ValidationError> {
        self.errors.iter().filter(move |e| e.variable_name == name)
    }
}

/// Failures reported by (or while talking to) the process engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Engine request failed: {0}")]
    Request(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Malformed variable payloads crossing the wire boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    #[error("Unknown variable type tag '{0}'")]
    UnknownType(String),
    #[error("Variable '{name}' is tagged '{tag}' but carries {found}")]
    ShapeMismatch {
        name: String,
        tag: String,
        found: String,
    },
}

/// Coarse failure classes callers may branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Engine,
    NotFound,
    Conflict,
}

/// Errors surfaced by orchestrator operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Malformed engine payload: {0}")]
    Wire(#[from] WireError),
}

impl OrchestratorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            OrchestratorError::Validation(_) => FailureKind::Validation,
            OrchestratorError::Engine(EngineError::NotFound(_)) => FailureKind::NotFound,
            OrchestratorError::Engine(EngineError::Conflict(_)) => FailureKind::Conflict,
            OrchestratorError::Engine(EngineError::Request(_)) | OrchestratorError::Wire(_) => {
                FailureKind::Engine
            }
        }
    }

    pub fn validation(&self) -> Option<&ValidationFailure> {
        match self {
            OrchestratorError::Validation(v) => Some(v),
            _ => None,
        }
    }
}
