/// Orchestrator operations that change engine definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionMutation {
    Create,
    Update,
    Delete,
    Copy,
    Restore,
}

/// How the definitions collection catches up with a successful mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// Re-list the whole collection; server-assigned fields come from the engine.
    RefreshCollection,
    /// Append the entity the engine returned. Used when no other entity changes.
    AppendReturned,
}

impl DefinitionMutation {
    pub fn policy(self) -> ReconcilePolicy {
        match self {
            DefinitionMutation::Create
            | DefinitionMutation::Update
            | DefinitionMutation::Delete
            | DefinitionMutation::Restore => ReconcilePolicy::RefreshCollection,
            DefinitionMutation::Copy => ReconcilePolicy::AppendReturned,
        }
    }
}

/// Orchestrator operations on instances. `Start` leaves the instances
/// collection alone; `Suspend` and `Resume` re-fetch the one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceMutation {
    Start,
    Suspend,
    Resume,
}

impl std::fmt::Display for DefinitionMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DefinitionMutation::Create => "create",
            DefinitionMutation::Update => "update",
            DefinitionMutation::Delete => "delete",
            DefinitionMutation::Copy => "copy",
            DefinitionMutation::Restore => "restore",
        };
        f.write_str(name)
    }
}

impl std::fmt::Display for InstanceMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstanceMutation::Start => "start",
            InstanceMutation::Suspend => "suspend",
            InstanceMutation::Resume => "resume",
        };
        f.write_str(name)
    }
}
