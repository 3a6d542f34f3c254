use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::engine::types::*;
use crate::engine::{EngineClient, EngineResult};
use crate::error::EngineError;
use crate::variables::VariableDefinition;

const SYSTEM_AUTHOR: &str = "procflow";

/// Engine operations, used for call logs and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    ListDefinitions,
    GetDefinition,
    CreateDefinition,
    UpdateDefinition,
    DeleteDefinition,
    ListVersions,
    RestoreVersion,
    ListInstances,
    GetInstance,
    StartInstance,
    SuspendInstance,
    ResumeInstance,
    GetInstanceTokens,
    GetStats,
}

/// A saved version together with the content it snapshots.
#[derive(Clone)]
struct VersionEntry {
    version: DefinitionVersion,
    diagram_payload: String,
    variable_definitions: Vec<VariableDefinition>,
}

/// How far a new version moves from its parent.
#[derive(Clone, Copy)]
enum Bump {
    Minor,
    Patch,
}

#[derive(Default)]
struct Inner {
    definitions: Vec<ProcessDefinition>,
    versions: Vec<VersionEntry>,
    instances: Vec<InstanceRecord>,
    tokens: HashMap<String, Vec<TokenPosition>>,
    started: Vec<StartRequest>,
    calls: Vec<EngineOp>,
    failures: HashMap<EngineOp, VecDeque<EngineError>>,
}

/// Engine held entirely in memory. Behaves like the remote engine for the
/// operations the orchestrator uses, records every call, and can be told to
/// fail specific calls.
#[derive(Default)]
pub struct InMemoryEngine {
    inner: Mutex<Inner>,
}

fn lock(m: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a definition as-is (id and version included).
    pub fn insert_definition(&self, definition: ProcessDefinition) {
        lock(&self.inner).definitions.push(definition);
    }

    pub fn insert_instance(&self, record: InstanceRecord) {
        lock(&self.inner).instances.push(record);
    }

    /// Change an instance's status behind the orchestrator's back, the way the
    /// engine does when an instance completes or errors.
    pub fn set_instance_status(&self, id: &str, status: ProcessStatus) {
        let mut inner = lock(&self.inner);
        if let Some(record) = inner.instances.iter_mut().find(|r| r.id == id) {
            record.status = status;
        }
    }

    /// Make the next call of `op` fail with `error`. Queued failures are used
    /// in order, one per call.
    pub fn fail_next(&self, op: EngineOp, error: EngineError) {
        lock(&self.inner)
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<EngineOp> {
        lock(&self.inner).calls.clone()
    }

    pub fn call_count(&self, op: EngineOp) -> usize {
        lock(&self.inner).calls.iter().filter(|c| **c == op).count()
    }

    /// Every start request received, in order.
    pub fn started(&self) -> Vec<StartRequest> {
        lock(&self.inner).started.clone()
    }

    pub fn definitions(&self) -> Vec<ProcessDefinition> {
        lock(&self.inner).definitions.clone()
    }

    /// Set where an instance's tokens sit, replacing any previous positions.
    pub fn set_tokens(&self, instance_id: &str, tokens: Vec<TokenPosition>) {
        lock(&self.inner)
            .tokens
            .insert(instance_id.to_string(), tokens);
    }

    /// Log the call and consume an injected failure, if any.
    fn enter(&self, op: EngineOp) -> EngineResult<MutexGuard<'_, Inner>> {
        let mut inner = lock(&self.inner);
        inner.calls.push(op);
        if let Some(error) = inner.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            return Err(error);
        }
        Ok(inner)
    }
}

impl Inner {
    /// Record the definition's current content as its newest version. The
    /// first version of a definition is `1.0.0`.
    fn record_version(
        &mut self,
        definition: &ProcessDefinition,
        bump: Bump,
        author: &str,
        commit_message: &str,
        branch: (BranchType, Option<String>),
    ) -> DefinitionVersion {
        let parent = self
            .versions
            .iter_mut()
            .filter(|e| e.version.process_definition_id == definition.id)
            .find(|e| e.version.is_current)
            .map(|e| {
                e.version.is_current = false;
                e.version.clone()
            });

        let (major, minor, patch, parent_version_id) = match parent {
            None => (1, 0, 0, None),
            Some(p) => match bump {
                Bump::Minor => (p.major_version, p.minor_version + 1, 0, Some(p.id)),
                Bump::Patch => (
                    p.major_version,
                    p.minor_version,
                    p.patch_version + 1,
                    Some(p.id),
                ),
            },
        };

        let (branch_type, branch_name) = branch;
        let version = DefinitionVersion {
            id: Uuid::new_v4().to_string(),
            process_definition_id: definition.id.clone(),
            parent_version_id,
            version_number: format!("{}.{}.{}", major, minor, patch),
            major_version: major,
            minor_version: minor,
            patch_version: patch,
            branch_type,
            branch_name,
            commit_message: commit_message.to_string(),
            author: author.to_string(),
            is_current: true,
            created_at: Some(Utc::now()),
        };
        self.versions.push(VersionEntry {
            version: version.clone(),
            diagram_payload: definition.diagram_payload.clone(),
            variable_definitions: definition.variable_definitions.clone(),
        });
        version
    }
}

fn definition_not_found(id: &str) -> EngineError {
    EngineError::NotFound(format!("Process definition {} not found", id))
}

fn instance_not_found(id: &str) -> EngineError {
    EngineError::NotFound(format!("Process instance {} not found", id))
}

fn version_not_found(id: &str) -> EngineError {
    EngineError::NotFound(format!("Version {} not found", id))
}

#[async_trait]
impl EngineClient for InMemoryEngine {
    async fn list_definitions(&self) -> EngineResult<Vec<ProcessDefinition>> {
        let inner = self.enter(EngineOp::ListDefinitions)?;
        let mut defs: Vec<ProcessDefinition> = inner
            .definitions
            .iter()
            .map(|d| {
                let owned: Vec<&InstanceRecord> = inner
                    .instances
                    .iter()
                    .filter(|i| i.definition_id == d.id)
                    .collect();
                let mut d = d.clone();
                d.total_instances = owned.len() as u64;
                d.active_instances = owned
                    .iter()
                    .filter(|i| i.status == ProcessStatus::Running)
                    .count() as u64;
                d
            })
            .collect();
        defs.reverse();
        Ok(defs)
    }

    async fn get_definition(&self, id: &str) -> EngineResult<ProcessDefinition> {
        let inner = self.enter(EngineOp::GetDefinition)?;
        inner
            .definitions
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| definition_not_found(id))
    }

    async fn create_definition(&self, draft: &DefinitionDraft) -> EngineResult<ProcessDefinition> {
        let mut inner = self.enter(EngineOp::CreateDefinition)?;
        let version = inner
            .definitions
            .iter()
            .filter(|d| d.name == draft.name)
            .map(|d| d.version)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();
        let definition = ProcessDefinition {
            id: Uuid::new_v4().to_string(),
            name: draft.name.clone(),
            version,
            variable_definitions: draft.variable_definitions.clone(),
            diagram_payload: draft.diagram_payload.clone(),
            created_at: Some(now),
            updated_at: Some(now),
            active_instances: 0,
            total_instances: 0,
        };
        let message = draft.notes.as_deref().unwrap_or("Initial version");
        inner.record_version(
            &definition,
            Bump::Patch,
            SYSTEM_AUTHOR,
            message,
            (BranchType::Main, None),
        );
        inner.definitions.push(definition.clone());
        Ok(definition)
    }

    async fn update_definition(
        &self,
        id: &str,
        patch: &DefinitionPatch,
    ) -> EngineResult<ProcessDefinition> {
        let mut inner = self.enter(EngineOp::UpdateDefinition)?;
        let definition = inner
            .definitions
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| definition_not_found(id))?;

        if let Some(expected) = patch.expected_version
            && expected != definition.version
        {
            return Err(EngineError::Conflict(format!(
                "Process definition {} is at version {}, update was based on version {}",
                id, definition.version, expected
            )));
        }

        if let Some(name) = &patch.name {
            definition.name = name.clone();
        }
        if let Some(diagram) = &patch.diagram_payload {
            definition.diagram_payload = diagram.clone();
        }
        if let Some(vars) = &patch.variable_definitions {
            definition.variable_definitions = vars.clone();
        }
        definition.version += 1;
        definition.updated_at = Some(Utc::now());
        let updated = definition.clone();
        inner.record_version(
            &updated,
            Bump::Patch,
            SYSTEM_AUTHOR,
            "Updated definition",
            (BranchType::Main, None),
        );
        Ok(updated)
    }

    async fn delete_definition(&self, id: &str) -> EngineResult<()> {
        let mut inner = self.enter(EngineOp::DeleteDefinition)?;
        let before = inner.definitions.len();
        inner.definitions.retain(|d| d.id != id);
        if inner.definitions.len() == before {
            return Err(definition_not_found(id));
        }
        inner.versions.retain(|e| e.version.process_definition_id != id);
        Ok(())
    }

    async fn list_versions(&self, definition_id: &str) -> EngineResult<Vec<DefinitionVersion>> {
        let inner = self.enter(EngineOp::ListVersions)?;
        if !inner.definitions.iter().any(|d| d.id == definition_id) {
            return Err(definition_not_found(definition_id));
        }
        Ok(inner
            .versions
            .iter()
            .rev()
            .filter(|e| e.version.process_definition_id == definition_id)
            .map(|e| e.version.clone())
            .collect())
    }

    async fn restore_version(
        &self,
        version_id: &str,
        request: &RestoreRequest,
    ) -> EngineResult<DefinitionVersion> {
        let mut inner = self.enter(EngineOp::RestoreVersion)?;
        if request.author.trim().is_empty() {
            return Err(EngineError::Request("author must not be empty".to_string()));
        }
        let source = inner
            .versions
            .iter()
            .find(|e| e.version.id == version_id)
            .cloned()
            .ok_or_else(|| version_not_found(version_id))?;

        let definition_id = source.version.process_definition_id.clone();
        let definition = inner
            .definitions
            .iter_mut()
            .find(|d| d.id == definition_id)
            .ok_or_else(|| definition_not_found(&definition_id))?;
        definition.diagram_payload = source.diagram_payload;
        definition.variable_definitions = source.variable_definitions;
        definition.version += 1;
        definition.updated_at = Some(Utc::now());
        let restored = definition.clone();

        let message = if request.commit_message.trim().is_empty() {
            format!("Restored version {}", source.version.version_number)
        } else {
            request.commit_message.clone()
        };
        Ok(inner.record_version(
            &restored,
            Bump::Minor,
            &request.author,
            &message,
            (request.branch_type, request.branch_name.clone()),
        ))
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> EngineResult<Page<InstanceRecord>> {
        let inner = self.enter(EngineOp::ListInstances)?;
        let filter = filter.normalized();
        let matching: Vec<InstanceRecord> = inner
            .instances
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(Page::slice(matching, filter.page, filter.page_size))
    }

    async fn get_instance(&self, id: &str) -> EngineResult<InstanceRecord> {
        let inner = self.enter(EngineOp::GetInstance)?;
        inner
            .instances
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| instance_not_found(id))
    }

    async fn start_instance(&self, request: &StartRequest) -> EngineResult<InstanceRecord> {
        let mut inner = self.enter(EngineOp::StartInstance)?;
        let definition_name = inner
            .definitions
            .iter()
            .find(|d| d.id == request.definition_id)
            .map(|d| d.name.clone())
            .ok_or_else(|| definition_not_found(&request.definition_id))?;

        let record = InstanceRecord {
            id: Uuid::new_v4().to_string(),
            definition_id: request.definition_id.clone(),
            definition_name,
            status: ProcessStatus::Running,
            start_time: Some(Utc::now()),
            end_time: None,
            variables: request.variables.clone(),
        };
        inner.started.push(request.clone());
        inner.instances.push(record.clone());
        Ok(record)
    }

    async fn suspend_instance(&self, id: &str) -> EngineResult<()> {
        let mut inner = self.enter(EngineOp::SuspendInstance)?;
        let record = inner
            .instances
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| instance_not_found(id))?;
        if record.status != ProcessStatus::Running {
            return Err(EngineError::Request(format!(
                "Cannot suspend instance {} in status {}",
                id, record.status
            )));
        }
        record.status = ProcessStatus::Suspended;
        Ok(())
    }

    async fn resume_instance(&self, id: &str) -> EngineResult<()> {
        let mut inner = self.enter(EngineOp::ResumeInstance)?;
        let record = inner
            .instances
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| instance_not_found(id))?;
        if record.status != ProcessStatus::Suspended {
            return Err(EngineError::Request(format!(
                "Cannot resume instance {} in status {}",
                id, record.status
            )));
        }
        record.status = ProcessStatus::Running;
        Ok(())
    }

    async fn get_instance_tokens(&self, id: &str) -> EngineResult<Vec<TokenPosition>> {
        let inner = self.enter(EngineOp::GetInstanceTokens)?;
        if !inner.instances.iter().any(|r| r.id == id) {
            return Err(instance_not_found(id));
        }
        Ok(inner.tokens.get(id).cloned().unwrap_or_default())
    }

    async fn get_stats(&self) -> EngineResult<ProcessStats> {
        let inner = self.enter(EngineOp::GetStats)?;
        let mut status_counts: BTreeMap<ProcessStatus, u64> = BTreeMap::new();
        for record in &inner.instances {
            *status_counts.entry(record.status).or_insert(0) += 1;
        }

        let completed: Vec<f64> = inner
            .instances
            .iter()
            .filter(|r| r.status == ProcessStatus::Completed)
            .filter_map(|r| match (r.start_time, r.end_time) {
                (Some(s), Some(e)) => Some((e - s).num_milliseconds() as f64 / 1000.0),
                _ => None,
            })
            .collect();
        let average_completion_time = if completed.is_empty() {
            None
        } else {
            Some(completed.iter().sum::<f64>() / completed.len() as f64)
        };

        let total = inner.instances.len() as u64;
        let errors = status_counts.get(&ProcessStatus::Error).copied().unwrap_or(0);
        let error_rate = if total > 0 {
            errors as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(ProcessStats {
            total_instances: total,
            active_instances: status_counts
                .get(&ProcessStatus::Running)
                .copied()
                .unwrap_or(0),
            status_counts,
            average_completion_time,
            error_rate,
        })
    }
}
