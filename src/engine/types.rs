use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::variables::{TypedVariable, VariableDefinition, WireVariable, deserialize};

/// Largest page the engine will return for instance listings.
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Status of a process instance, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessStatus {
    Running,
    Completed,
    Suspended,
    Error,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "RUNNING"),
            ProcessStatus::Completed => write!(f, "COMPLETED"),
            ProcessStatus::Suspended => write!(f, "SUSPENDED"),
            ProcessStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(ProcessStatus::Running),
            "COMPLETED" => Ok(ProcessStatus::Completed),
            "SUSPENDED" => Ok(ProcessStatus::Suspended),
            "ERROR" => Ok(ProcessStatus::Error),
            _ => Err(format!("Invalid process status: {}", s)),
        }
    }
}

/// Versioned workflow template with its declared variable schema.
///
/// Engines report the version either as a top-level `version` or inside a
/// `current_version` object (`number`, plus the diagram of that version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DefinitionPayload")]
pub struct ProcessDefinition {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub variable_definitions: Vec<VariableDefinition>,
    /// Diagram source. Stored and forwarded, never interpreted.
    #[serde(rename = "bpmn_xml")]
    pub diagram_payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub active_instances: u64,
    pub total_instances: u64,
}

#[derive(Deserialize)]
struct DefinitionPayload {
    id: String,
    name: String,
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    current_version: Option<CurrentVersion>,
    #[serde(default)]
    variable_definitions: Vec<VariableDefinition>,
    #[serde(default, rename = "bpmn_xml", alias = "diagram")]
    diagram_payload: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    active_instances: u64,
    #[serde(default)]
    total_instances: u64,
}

#[derive(Deserialize)]
struct CurrentVersion {
    number: u32,
    #[serde(default)]
    bpmn_xml: Option<String>,
}

impl From<DefinitionPayload> for ProcessDefinition {
    fn from(p: DefinitionPayload) -> Self {
        let (current_number, current_diagram) = match p.current_version {
            Some(v) => (Some(v.number), v.bpmn_xml),
            None => (None, None),
        };
        Self {
            id: p.id,
            name: p.name,
            version: current_number.or(p.version).unwrap_or(1),
            variable_definitions: p.variable_definitions,
            diagram_payload: p.diagram_payload.or(current_diagram).unwrap_or_default(),
            created_at: p.created_at,
            updated_at: p.updated_at,
            active_instances: p.active_instances,
            total_instances: p.total_instances,
        }
    }
}

/// Request body for creating a definition. The engine assigns id and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDraft {
    pub name: String,
    #[serde(rename = "bpmn_xml")]
    pub diagram_payload: String,
    #[serde(default)]
    pub variable_definitions: Vec<VariableDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl DefinitionDraft {
    pub fn new(name: impl Into<String>, diagram_payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            diagram_payload: diagram_payload.into(),
            variable_definitions: Vec::new(),
            notes: None,
        }
    }

    pub fn with_variables(mut self, variables: Vec<VariableDefinition>) -> Self {
        self.variable_definitions = variables;
        self
    }

    /// Draft for a copy of `source`: same schema and diagram, "Copy of" name.
    pub fn copy_of(source: &ProcessDefinition) -> Self {
        Self {
            name: format!("Copy of {}", source.name),
            diagram_payload: source.diagram_payload.clone(),
            variable_definitions: source.variable_definitions.clone(),
            notes: None,
        }
    }
}

/// Partial update of a definition. `expected_version` lets the engine reject
/// writes based on a stale copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "bpmn_xml", skip_serializing_if = "Option::is_none")]
    pub diagram_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_definitions: Option<Vec<VariableDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u32>,
}

/// Branch a definition version was saved on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BranchType {
    #[default]
    Main,
    Feature,
    Hotfix,
    Development,
}

impl std::fmt::Display for BranchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchType::Main => write!(f, "MAIN"),
            BranchType::Feature => write!(f, "FEATURE"),
            BranchType::Hotfix => write!(f, "HOTFIX"),
            BranchType::Development => write!(f, "DEVELOPMENT"),
        }
    }
}

/// One entry of a definition's version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionVersion {
    pub id: String,
    pub process_definition_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version_id: Option<String>,
    /// Semantic version text, e.g. `1.2.0`.
    pub version_number: String,
    #[serde(default)]
    pub major_version: u32,
    #[serde(default)]
    pub minor_version: u32,
    #[serde(default)]
    pub patch_version: u32,
    #[serde(default)]
    pub branch_type: BranchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub commit_message: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A page of version history as the engine returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionList {
    pub versions: Vec<DefinitionVersion>,
    pub total: u64,
}

/// Request to make an earlier version current again. The engine records the
/// restore as a new version carrying the old content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub commit_message: String,
    pub author: String,
    #[serde(default)]
    pub branch_type: BranchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

impl RestoreRequest {
    pub fn new(author: impl Into<String>, commit_message: impl Into<String>) -> Self {
        Self {
            commit_message: commit_message.into(),
            author: author.into(),
            branch_type: BranchType::Main,
            branch_name: None,
        }
    }
}

/// Where an execution token of an instance currently sits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPosition {
    pub node_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// An instance exactly as the engine reports it, variables still in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub definition_id: String,
    #[serde(default)]
    pub definition_name: String,
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variables: Vec<WireVariable>,
}

/// One execution of a process definition, with a typed variable snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInstance {
    pub id: String,
    pub definition_id: String,
    pub definition_name: String,
    pub status: ProcessStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub variables: Vec<TypedVariable>,
}

impl ProcessInstance {
    /// Decode the record's variables. Unknown type tags are an error.
    pub fn hydrate(record: InstanceRecord) -> Result<Self, WireError> {
        let variables = deserialize(&record.variables)?;
        Ok(Self {
            id: record.id,
            definition_id: record.definition_id,
            definition_name: record.definition_name,
            status: record.status,
            start_time: record.start_time,
            end_time: record.end_time,
            variables,
        })
    }
}

/// Request to start a new instance with already-serialized variables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartRequest {
    pub definition_id: String,
    pub variables: Vec<WireVariable>,
}

/// Aggregate statistics across all instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub total_instances: u64,
    #[serde(default)]
    pub status_counts: BTreeMap<ProcessStatus, u64>,
    /// Seconds, over completed instances.
    #[serde(default)]
    pub average_completion_time: Option<f64>,
    /// Percentage of instances in `ERROR`.
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub active_instances: u64,
}

/// Filter and pagination for instance listings.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceFilter {
    pub definition_id: Option<String>,
    pub status: Option<ProcessStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for InstanceFilter {
    fn default() -> Self {
        Self {
            definition_id: None,
            status: None,
            start_date: None,
            end_date: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl InstanceFilter {
    pub fn for_definition(definition_id: impl Into<String>) -> Self {
        Self {
            definition_id: Some(definition_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: ProcessStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Clamp paging into the range the engine accepts.
    pub fn normalized(&self) -> Self {
        let mut f = self.clone();
        f.page = f.page.max(1);
        f.page_size = f.page_size.clamp(1, MAX_PAGE_SIZE);
        f
    }

    /// Query parameters in engine naming.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let f = self.normalized();
        let mut pairs = Vec::new();
        if let Some(id) = &f.definition_id {
            pairs.push(("definition_id", id.clone()));
        }
        if let Some(status) = f.status {
            pairs.push(("status", status.to_string()));
        }
        if let Some(start) = f.start_date {
            pairs.push(("start_date", start.to_rfc3339()));
        }
        if let Some(end) = f.end_date {
            pairs.push(("end_date", end.to_rfc3339()));
        }
        pairs.push(("page", f.page.to_string()));
        pairs.push(("page_size", f.page_size.to_string()));
        pairs
    }

    /// Whether a record passes the non-paging criteria.
    pub fn matches(&self, record: &InstanceRecord) -> bool {
        if let Some(id) = &self.definition_id
            && &record.definition_id != id
        {
            return false;
        }
        if let Some(status) = self.status
            && record.status != status
        {
            return false;
        }
        if let Some(start) = self.start_date
            && record.start_time.is_none_or(|t| t < start)
        {
            return false;
        }
        if let Some(end) = self.end_date
            && record.start_time.is_none_or(|t| t > end)
        {
            return false;
        }
        true
    }
}

/// Paging position of the last listing, without the items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    #[serde(rename = "pageSize")]
    pub page_size: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Cut one page out of the full, already ordered result set.
    pub fn slice(all: Vec<T>, page: u32, page_size: u32) -> Self {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let total = all.len() as u64;
        let total_pages = all.len().div_ceil(page_size as usize) as u32;
        let skip = ((page - 1) as usize).saturating_mul(page_size as usize);
        let items = all.into_iter().skip(skip).take(page_size as usize).collect();
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }

    pub fn info(&self) -> PageInfo {
        PageInfo {
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}
