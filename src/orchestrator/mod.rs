pub mod policy;
pub mod state;

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::engine::EngineClient;
use crate::engine::types::*;
use crate::error::{EngineError, OrchestratorError};
use crate::variables::schema::variable_schema;
use crate::variables::{RawVariables, serialize, validate};

pub use policy::{DefinitionMutation, InstanceMutation, ReconcilePolicy};
pub use state::{CollectionState, Keyed};

use state::Slot;

/// The collections tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Definitions,
    Instances,
    Stats,
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Suspend,
    Resume,
}

impl Transition {
    fn mutation(self) -> InstanceMutation {
        match self {
            Transition::Suspend => InstanceMutation::Suspend,
            Transition::Resume => InstanceMutation::Resume,
        }
    }
}

/// Owns the definitions, instances and stats collections and keeps them in
/// step with the engine.
///
/// Operations on the same collection are not serialized: when two overlap,
/// whichever engine response resolves last decides the final state. Reads
/// (`fetch_*`) record failures on the collection and never return them;
/// mutations record failures and also return them.
pub struct Orchestrator {
    engine: Arc<dyn EngineClient>,
    definitions: Slot<ProcessDefinition>,
    instances: Slot<ProcessInstance>,
    stats: Slot<ProcessStats>,
    instance_page: RwLock<Option<PageInfo>>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn EngineClient>) -> Self {
        Self {
            engine,
            definitions: Slot::new(),
            instances: Slot::new(),
            stats: Slot::new(),
            instance_page: RwLock::new(None),
        }
    }

    // --- Readers ---

    pub fn definitions(&self) -> CollectionState<ProcessDefinition> {
        self.definitions.snapshot()
    }

    pub fn instances(&self) -> CollectionState<ProcessInstance> {
        self.instances.snapshot()
    }

    pub fn stats(&self) -> CollectionState<ProcessStats> {
        self.stats.snapshot()
    }

    /// Paging of the last successful instance listing.
    pub fn instance_page(&self) -> Option<PageInfo> {
        *self
            .instance_page
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of outstanding operations on a collection.
    pub fn in_flight(&self, collection: Collection) -> usize {
        match collection {
            Collection::Definitions => self.definitions.in_flight(),
            Collection::Instances => self.instances.in_flight(),
            Collection::Stats => self.stats.in_flight(),
        }
    }

    // --- Selection ---

    pub fn select_definition(&self, id: &str) -> bool {
        self.definitions.select(id)
    }

    pub fn select_instance(&self, id: &str) -> bool {
        self.instances.select(id)
    }

    pub fn clear_selection(&self, collection: Collection) {
        match collection {
            Collection::Definitions => self.definitions.clear_selection(),
            Collection::Instances => self.instances.clear_selection(),
            Collection::Stats => self.stats.clear_selection(),
        }
    }

    // --- Reads ---

    /// Refresh one collection. `filter` only applies to instances.
    pub async fn fetch(&self, collection: Collection, filter: Option<InstanceFilter>) {
        match collection {
            Collection::Definitions => self.fetch_definitions().await,
            Collection::Instances => self.fetch_instances(filter).await,
            Collection::Stats => self.fetch_stats().await,
        }
    }

    pub async fn fetch_definitions(&self) {
        let _flight = self.definitions.begin();
        match self.engine.list_definitions().await {
            Ok(items) => {
                debug!(count = items.len(), "Definitions refreshed");
                self.definitions.replace_items(items);
                self.definitions.resync_selection();
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch definitions");
                self.definitions.record_error(e.to_string());
            }
        }
    }

    pub async fn fetch_instances(&self, filter: Option<InstanceFilter>) {
        let filter = filter.unwrap_or_default();
        let _flight = self.instances.begin();

        let result = match self.engine.list_instances(&filter).await {
            Ok(page) => {
                let info = page.info();
                page.items
                    .into_iter()
                    .map(ProcessInstance::hydrate)
                    .collect::<Result<Vec<_>, _>>()
                    .map(|items| (items, info))
                    .map_err(OrchestratorError::from)
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok((items, info)) => {
                debug!(count = items.len(), total = info.total, "Instances refreshed");
                self.instances.replace_items(items);
                self.instances.resync_selection();
                *self
                    .instance_page
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(info);
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch instances");
                self.instances.record_error(e.to_string());
            }
        }
    }

    /// Refresh a single instance in place. Returns it when the engine
    /// answered; failures are recorded on the instances collection.
    pub async fn fetch_instance(&self, id: &str) -> Option<ProcessInstance> {
        let _flight = self.instances.begin();
        match self.load_instance(id).await {
            Ok(instance) => {
                self.instances.upsert(instance.clone());
                Some(instance)
            }
            Err(e) => {
                warn!(instance_id = %id, error = %e, "Failed to fetch instance");
                self.instances.record_error(e.to_string());
                None
            }
        }
    }

    pub async fn fetch_stats(&self) {
        let _flight = self.stats.begin();
        match self.engine.get_stats().await {
            Ok(stats) => {
                debug!(total = stats.total_instances, "Stats refreshed");
                self.stats.replace_items(vec![stats]);
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch stats");
                self.stats.record_error(e.to_string());
            }
        }
    }

    // --- Definition mutations ---

    pub async fn create(&self, draft: DefinitionDraft) -> Result<ProcessDefinition, OrchestratorError> {
        let _flight = self.definitions.begin();
        let created = self
            .engine
            .create_definition(&draft)
            .await
            .map_err(|e| self.definition_failure(DefinitionMutation::Create, e))?;

        info!(definition_id = %created.id, version = created.version, "Definition created");
        self.reconcile_definitions(DefinitionMutation::Create, &created)
            .await;
        Ok(created)
    }

    pub async fn update(
        &self,
        id: &str,
        patch: DefinitionPatch,
    ) -> Result<ProcessDefinition, OrchestratorError> {
        let _flight = self.definitions.begin();
        let updated = self
            .engine
            .update_definition(id, &patch)
            .await
            .map_err(|e| self.definition_failure(DefinitionMutation::Update, e))?;

        info!(definition_id = %id, version = updated.version, "Definition updated");
        self.reconcile_definitions(DefinitionMutation::Update, &updated)
            .await;
        Ok(updated)
    }

    /// Delete a definition. A failed follow-up refresh is recorded on the
    /// collection but does not turn the delete into an error.
    pub async fn delete(&self, id: &str) -> Result<(), OrchestratorError> {
        let _flight = self.definitions.begin();
        self.engine
            .delete_definition(id)
            .await
            .map_err(|e| self.definition_failure(DefinitionMutation::Delete, e))?;

        info!(definition_id = %id, "Definition deleted");
        // Nothing comes back to append, so a delete always re-lists.
        self.fetch_definitions().await;
        Ok(())
    }

    /// Create a copy of `source` with the same schema and diagram.
    pub async fn copy(&self, source: &ProcessDefinition) -> Result<ProcessDefinition, OrchestratorError> {
        let _flight = self.definitions.begin();
        let draft = DefinitionDraft::copy_of(source);
        let created = self
            .engine
            .create_definition(&draft)
            .await
            .map_err(|e| self.definition_failure(DefinitionMutation::Copy, e))?;

        info!(source_id = %source.id, definition_id = %created.id, "Definition copied");
        self.reconcile_definitions(DefinitionMutation::Copy, &created)
            .await;
        Ok(created)
    }

    /// Make an earlier version of a definition current again, then re-list
    /// definitions so the restored content and version show up.
    pub async fn restore_version(
        &self,
        version_id: &str,
        request: &RestoreRequest,
    ) -> Result<DefinitionVersion, OrchestratorError> {
        let _flight = self.definitions.begin();
        let restored = self
            .engine
            .restore_version(version_id, request)
            .await
            .map_err(|e| self.definition_failure(DefinitionMutation::Restore, e))?;

        info!(
            definition_id = %restored.process_definition_id,
            version = %restored.version_number,
            "Definition version restored"
        );
        // The engine returns the version, not the definition, so re-list.
        self.fetch_definitions().await;
        Ok(restored)
    }

    /// Version history of a definition, newest first. Not tracked as a
    /// collection; failures go straight to the caller.
    pub async fn versions(&self, definition_id: &str) -> Result<Vec<DefinitionVersion>, OrchestratorError> {
        let versions = self.engine.list_versions(definition_id).await?;
        debug!(definition_id = %definition_id, count = versions.len(), "Versions listed");
        Ok(versions)
    }

    async fn reconcile_definitions(&self, op: DefinitionMutation, returned: &ProcessDefinition) {
        match op.policy() {
            ReconcilePolicy::RefreshCollection => self.fetch_definitions().await,
            ReconcilePolicy::AppendReturned => self.definitions.push(returned.clone()),
        }
    }

    fn definition_failure(&self, op: DefinitionMutation, error: EngineError) -> OrchestratorError {
        warn!(operation = %op, error = %error, "Definition operation failed");
        self.definitions.record_error(error.to_string());
        error.into()
    }

    // --- Instance lifecycle ---

    /// Validate `raw` against the definition's schema and start an instance.
    ///
    /// Validation runs before any call that changes engine state; a
    /// validation failure is returned as-is and nothing is sent. Returns the
    /// new instance id.
    pub async fn start(
        &self,
        definition_id: &str,
        raw: Option<&RawVariables>,
    ) -> Result<String, OrchestratorError> {
        let _flight = self.instances.begin();

        let definition = self
            .resolve_definition(definition_id)
            .await
            .map_err(|e| self.instance_failure(InstanceMutation::Start, e))?;

        let empty = RawVariables::new();
        let variables = validate(raw.unwrap_or(&empty), variable_schema(&definition))
            .inspect_err(|failure| {
                info!(definition_id = %definition_id, errors = failure.len(), "Start rejected by variable validation");
            })?;

        let request = StartRequest {
            definition_id: definition.id.clone(),
            variables: serialize(&variables),
        };

        let record = self
            .engine
            .start_instance(&request)
            .await
            .map_err(|e| self.instance_failure(InstanceMutation::Start, e))?;

        info!(definition_id = %definition_id, instance_id = %record.id, "Instance started");
        self.instances.clear_error();
        Ok(record.id)
    }

    /// Suspend an instance and return it with the status the engine reports
    /// afterwards.
    pub async fn suspend(&self, id: &str) -> Result<ProcessInstance, OrchestratorError> {
        self.transition(Transition::Suspend, id).await
    }

    /// Resume an instance and return it with the status the engine reports
    /// afterwards.
    pub async fn resume(&self, id: &str) -> Result<ProcessInstance, OrchestratorError> {
        self.transition(Transition::Resume, id).await
    }

    async fn transition(&self, transition: Transition, id: &str) -> Result<ProcessInstance, OrchestratorError> {
        let op = transition.mutation();
        let _flight = self.instances.begin();

        let outcome = match transition {
            Transition::Suspend => self.engine.suspend_instance(id).await,
            Transition::Resume => self.engine.resume_instance(id).await,
        };
        outcome.map_err(|e| self.instance_failure(op, e))?;
        info!(operation = %op, instance_id = %id, "Lifecycle call accepted");

        self.reconcile_instance(op, id).await
    }

    /// Re-read the one instance `op` changed and store the engine's view of
    /// it. The rest of the collection is left as it was.
    async fn reconcile_instance(&self, op: InstanceMutation, id: &str) -> Result<ProcessInstance, OrchestratorError> {
        let instance = self.load_instance(id).await.map_err(|e| {
            warn!(operation = %op, instance_id = %id, error = %e, "Failed to re-fetch instance");
            self.instances.record_error(e.to_string());
            e
        })?;
        debug!(instance_id = %id, status = %instance.status, "Instance status observed");
        self.instances.upsert(instance.clone());
        Ok(instance)
    }

    /// Where the instance's execution tokens currently sit.
    pub async fn tokens(&self, instance_id: &str) -> Result<Vec<TokenPosition>, OrchestratorError> {
        let tokens = self.engine.get_instance_tokens(instance_id).await?;
        debug!(instance_id = %instance_id, count = tokens.len(), "Tokens read");
        Ok(tokens)
    }

    async fn load_instance(&self, id: &str) -> Result<ProcessInstance, OrchestratorError> {
        let record = self.engine.get_instance(id).await?;
        Ok(ProcessInstance::hydrate(record)?)
    }

    /// Locally loaded definition if present, otherwise ask the engine.
    async fn resolve_definition(&self, id: &str) -> Result<ProcessDefinition, EngineError> {
        if let Some(definition) = self.definitions.find(id) {
            return Ok(definition);
        }
        debug!(definition_id = %id, "Definition not loaded, asking engine");
        self.engine.get_definition(id).await
    }

    fn instance_failure(&self, op: InstanceMutation, error: EngineError) -> OrchestratorError {
        warn!(operation = %op, error = %error, "Instance operation failed");
        self.instances.record_error(error.to_string());
        error.into()
    }
}
