pub mod http;
pub mod memory;
pub mod types;

use async_trait::async_trait;

use crate::error::EngineError;
use types::*;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Request/response contract of the remote process engine.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// List all process definitions, newest first.
    async fn list_definitions(&self) -> EngineResult<Vec<ProcessDefinition>>;

    async fn get_definition(&self, id: &str) -> EngineResult<ProcessDefinition>;

    /// Create a definition; the engine assigns id and version.
    async fn create_definition(&self, draft: &DefinitionDraft) -> EngineResult<ProcessDefinition>;

    /// Apply a partial update. Fails with `Conflict` on a stale `expected_version`.
    async fn update_definition(
        &self,
        id: &str,
        patch: &DefinitionPatch,
    ) -> EngineResult<ProcessDefinition>;

    async fn delete_definition(&self, id: &str) -> EngineResult<()>;

    /// Version history of a definition, newest first.
    async fn list_versions(&self, definition_id: &str) -> EngineResult<Vec<DefinitionVersion>>;

    /// Make an earlier version current again. Returns the new version the
    /// restore produced.
    async fn restore_version(
        &self,
        version_id: &str,
        request: &RestoreRequest,
    ) -> EngineResult<DefinitionVersion>;

    /// List instances matching the filter, one page at a time.
    async fn list_instances(&self, filter: &InstanceFilter) -> EngineResult<Page<InstanceRecord>>;

    async fn get_instance(&self, id: &str) -> EngineResult<InstanceRecord>;

    /// Start a new instance and return what the engine created.
    async fn start_instance(&self, request: &StartRequest) -> EngineResult<InstanceRecord>;

    async fn suspend_instance(&self, id: &str) -> EngineResult<()>;

    async fn resume_instance(&self, id: &str) -> EngineResult<()>;

    /// Current token positions of an instance.
    async fn get_instance_tokens(&self, id: &str) -> EngineResult<Vec<TokenPosition>>;

    async fn get_stats(&self) -> EngineResult<ProcessStats>;
}
