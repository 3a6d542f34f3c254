//! Tests for the instance lifecycle orchestrator: collection state,
//! reconciliation after mutations, start validation and overlapping calls.

use std::sync::Arc;

use async_trait::async_trait;
use procflow::engine::memory::{EngineOp, InMemoryEngine};
use procflow::engine::types::*;
use procflow::engine::{EngineClient, EngineResult};
use procflow::error::{EngineError, FailureKind, OrchestratorError};
use procflow::orchestrator::{Collection, Orchestrator};
use procflow::variables::{Constraints, RawVariables, VariableDefinition, VariableType, WireVariable};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

// --- Helpers ---

fn definition(id: &str, name: &str, variables: Vec<VariableDefinition>) -> ProcessDefinition {
    ProcessDefinition {
        id: id.to_string(),
        name: name.to_string(),
        version: 1,
        variable_definitions: variables,
        diagram_payload: "<bpmn/>".to_string(),
        created_at: None,
        updated_at: None,
        active_instances: 0,
        total_instances: 0,
    }
}

fn float_definition() -> ProcessDefinition {
    definition(
        "order",
        "Order",
        vec![VariableDefinition::new("amount", VariableType::Float)],
    )
}

fn instance(id: &str, status: ProcessStatus) -> InstanceRecord {
    InstanceRecord {
        id: id.to_string(),
        definition_id: "order".to_string(),
        definition_name: "Order".to_string(),
        status,
        start_time: None,
        end_time: None,
        variables: vec![WireVariable::new("amount", "float", json!(1.0))],
    }
}

fn raw(value: Value) -> RawVariables {
    serde_json::from_value(value).unwrap()
}

fn setup() -> (Arc<InMemoryEngine>, Orchestrator) {
    let engine = Arc::new(InMemoryEngine::new());
    let orchestrator = Orchestrator::new(engine.clone());
    (engine, orchestrator)
}

fn ids<T: procflow::orchestrator::Keyed>(items: &[T]) -> Vec<&str> {
    items.iter().map(|i| i.key()).collect()
}

// --- Reads ---

#[tokio::test]
async fn fetch_success_replaces_items_and_clears_error() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    engine.fail_next(EngineOp::ListDefinitions, EngineError::Request("down".into()));

    orch.fetch(Collection::Definitions, None).await;
    assert!(orch.definitions().error.is_some());

    orch.fetch(Collection::Definitions, None).await;
    let state = orch.definitions();
    assert_eq!(ids(&state.items), vec!["order"]);
    assert!(state.error.is_none());
    assert!(!state.loading);
}

#[tokio::test]
async fn fetch_failure_keeps_stale_items() {
    let (engine, orch) = setup();
    engine.insert_instance(instance("i1", ProcessStatus::Running));
    orch.fetch_instances(None).await;

    engine.fail_next(EngineOp::ListInstances, EngineError::Request("timeout".into()));
    orch.fetch_instances(None).await;

    let state = orch.instances();
    assert_eq!(ids(&state.items), vec!["i1"]);
    assert!(state.error.as_deref().unwrap().contains("timeout"));
    assert!(!state.loading);
}

#[tokio::test]
async fn fetch_instances_applies_filter_and_records_page() {
    let (engine, orch) = setup();
    for i in 0..5 {
        engine.insert_instance(instance(&format!("i{}", i), ProcessStatus::Running));
    }
    engine.insert_instance(instance("done", ProcessStatus::Completed));

    let filter = InstanceFilter::default()
        .with_status(ProcessStatus::Running)
        .with_page(1, 2);
    orch.fetch(Collection::Instances, Some(filter)).await;

    assert_eq!(orch.instances().items.len(), 2);
    let page = orch.instance_page().unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
}

#[tokio::test]
async fn malformed_instance_payload_is_recorded() {
    let (engine, orch) = setup();
    let mut bad = instance("i1", ProcessStatus::Running);
    bad.variables = vec![WireVariable::new("amount", "money", json!(1))];
    engine.insert_instance(bad);

    orch.fetch_instances(None).await;

    let state = orch.instances();
    assert!(state.items.is_empty());
    assert!(state.error.unwrap().contains("money"));
}

#[tokio::test]
async fn fetch_stats_stores_single_snapshot() {
    let (engine, orch) = setup();
    engine.insert_instance(instance("i1", ProcessStatus::Running));
    engine.insert_instance(instance("i2", ProcessStatus::Error));

    orch.fetch(Collection::Stats, None).await;

    let state = orch.stats();
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items[0].total_instances, 2);
    assert_eq!(state.items[0].active_instances, 1);
}

#[tokio::test]
async fn fetch_single_instance_upserts() {
    let (engine, orch) = setup();
    engine.insert_instance(instance("i1", ProcessStatus::Running));

    let fetched = orch.fetch_instance("i1").await.unwrap();
    assert_eq!(fetched.status, ProcessStatus::Running);
    assert_eq!(ids(&orch.instances().items), vec!["i1"]);

    assert!(orch.fetch_instance("missing").await.is_none());
    assert!(orch.instances().error.is_some());
}

// --- Definition mutations ---

#[tokio::test]
async fn create_refreshes_collection_from_engine() {
    let (engine, orch) = setup();

    let created = orch
        .create(DefinitionDraft::new("Order", "<bpmn/>"))
        .await
        .unwrap();

    assert_eq!(created.version, 1);
    assert_eq!(engine.call_count(EngineOp::ListDefinitions), 1);
    assert_eq!(ids(&orch.definitions().items), vec![created.id.as_str()]);
}

#[tokio::test]
async fn create_failure_is_recorded_and_returned() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    orch.fetch_definitions().await;
    engine.fail_next(EngineOp::CreateDefinition, EngineError::Request("rejected".into()));

    let err = orch
        .create(DefinitionDraft::new("Order", "<bpmn/>"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Engine);
    let state = orch.definitions();
    assert_eq!(ids(&state.items), vec!["order"]);
    assert!(state.error.unwrap().contains("rejected"));
}

#[tokio::test]
async fn update_takes_server_version_from_refresh() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    orch.fetch_definitions().await;

    let patch = DefinitionPatch {
        name: Some("Order (revised)".into()),
        expected_version: Some(1),
        ..DefinitionPatch::default()
    };
    orch.update("order", patch).await.unwrap();

    let state = orch.definitions();
    assert_eq!(state.items[0].name, "Order (revised)");
    assert_eq!(state.items[0].version, 2);
}

#[tokio::test]
async fn stale_update_surfaces_conflict() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    orch.fetch_definitions().await;
    let before = orch.definitions().items;

    let patch = DefinitionPatch {
        name: Some("Renamed".into()),
        expected_version: Some(7),
        ..DefinitionPatch::default()
    };
    let err = orch.update("order", patch).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Conflict);
    assert_eq!(orch.definitions().items, before);
    assert!(orch.definitions().error.is_some());
}

#[tokio::test]
async fn delete_unknown_definition_is_not_found() {
    let (_engine, orch) = setup();

    let err = orch.delete("missing").await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::NotFound);
}

#[tokio::test]
async fn delete_refreshes_collection() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    engine.insert_definition(definition("refund", "Refund", vec![]));
    orch.fetch_definitions().await;

    orch.delete("order").await.unwrap();

    assert_eq!(ids(&orch.definitions().items), vec!["refund"]);
}

#[tokio::test]
async fn delete_then_failed_refresh_keeps_pre_delete_items() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    engine.insert_definition(definition("refund", "Refund", vec![]));
    orch.fetch_definitions().await;
    let before = orch.definitions().items;
    engine.fail_next(EngineOp::ListDefinitions, EngineError::Request("refresh failed".into()));

    orch.delete("order").await.unwrap();

    let state = orch.definitions();
    assert_eq!(state.items, before);
    assert!(state.error.unwrap().contains("refresh failed"));
    assert!(!state.loading);
}

#[tokio::test]
async fn copy_appends_returned_definition_without_refresh() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    orch.fetch_definitions().await;
    let source = orch.definitions().items[0].clone();

    let copy = orch.copy(&source).await.unwrap();

    assert_eq!(copy.name, "Copy of Order");
    assert_eq!(copy.variable_definitions, source.variable_definitions);
    assert_eq!(copy.diagram_payload, source.diagram_payload);
    assert_eq!(engine.call_count(EngineOp::ListDefinitions), 1);
    let state = orch.definitions();
    assert_eq!(ids(&state.items), vec!["order", copy.id.as_str()]);
}

// --- Version history ---

#[tokio::test]
async fn restore_brings_back_old_schema_and_refreshes() {
    let (engine, orch) = setup();
    let created = orch
        .create(DefinitionDraft::new("Order", "<v1/>").with_variables(vec![
            VariableDefinition::new("amount", VariableType::Float),
        ]))
        .await
        .unwrap();
    orch.update(
        &created.id,
        DefinitionPatch {
            diagram_payload: Some("<v2/>".into()),
            variable_definitions: Some(vec![]),
            ..DefinitionPatch::default()
        },
    )
    .await
    .unwrap();

    let history = orch.versions(&created.id).await.unwrap();
    assert_eq!(history.len(), 2);
    let initial = history.last().unwrap().clone();
    assert_eq!(initial.version_number, "1.0.0");
    let lists_before = engine.call_count(EngineOp::ListDefinitions);

    let restored = orch
        .restore_version(&initial.id, &RestoreRequest::new("sam", ""))
        .await
        .unwrap();

    assert_eq!(restored.version_number, "1.1.0");
    assert_eq!(restored.commit_message, "Restored version 1.0.0");
    assert_eq!(engine.call_count(EngineOp::ListDefinitions), lists_before + 1);
    let state = orch.definitions();
    assert_eq!(state.items[0].diagram_payload, "<v1/>");
    assert_eq!(state.items[0].variable_definitions.len(), 1);
    assert_eq!(state.items[0].version, 3);
}

#[tokio::test]
async fn restore_of_unknown_version_is_recorded_and_returned() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    orch.fetch_definitions().await;

    let err = orch
        .restore_version("missing", &RestoreRequest::new("sam", "undo"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::NotFound);
    let state = orch.definitions();
    assert_eq!(ids(&state.items), vec!["order"]);
    assert!(state.error.is_some());
}

#[tokio::test]
async fn tokens_come_straight_from_the_engine() {
    let (engine, orch) = setup();
    engine.insert_instance(instance("i1", ProcessStatus::Running));
    engine.set_tokens(
        "i1",
        vec![TokenPosition {
            node_id: "Task_Review".into(),
            state: "ACTIVE".into(),
            scope_id: None,
            data: None,
        }],
    );

    let tokens = orch.tokens("i1").await.unwrap();
    assert_eq!(tokens[0].node_id, "Task_Review");

    let err = orch.tokens("missing").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::NotFound);
    assert!(orch.instances().error.is_none());
}

// --- Start ---

#[tokio::test]
async fn start_sends_coerced_float() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());

    let id = orch
        .start("order", Some(&raw(json!({"amount": "12.5"}))))
        .await
        .unwrap();

    let started = engine.started();
    assert_eq!(started.len(), 1);
    assert_eq!(
        started[0].variables,
        vec![WireVariable::new("amount", "float", json!(12.5))]
    );
    assert_eq!(
        serde_json::to_value(&started[0].variables[0]).unwrap(),
        json!({"name": "amount", "type": "float", "value": 12.5})
    );
    assert!(!id.is_empty());
}

#[tokio::test]
async fn start_validation_failure_has_no_engine_side_effects() {
    let (engine, orch) = setup();
    engine.insert_definition(definition(
        "order",
        "Order",
        vec![
            VariableDefinition::new("amount", VariableType::Float).with_constraints(Constraints {
                min: Some(1.0),
                ..Constraints::default()
            }),
            VariableDefinition::new("customer", VariableType::String),
        ],
    ));

    let err = orch
        .start("order", Some(&raw(json!({"amount": "0"}))))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Validation);
    let failure = err.validation().unwrap();
    assert_eq!(failure.len(), 2);
    assert_eq!(engine.call_count(EngineOp::StartInstance), 0);
    assert!(engine.started().is_empty());
    assert!(orch.instances().error.is_none());
}

#[tokio::test]
async fn start_without_variables_uses_defaults() {
    let (engine, orch) = setup();
    engine.insert_definition(definition(
        "flagged",
        "Flagged",
        vec![VariableDefinition::new("flag", VariableType::Boolean).with_default(json!(false))],
    ));

    orch.start("flagged", None).await.unwrap();

    assert_eq!(
        engine.started()[0].variables,
        vec![WireVariable::new("flag", "boolean", json!(false))]
    );
}

#[tokio::test]
async fn start_prefers_locally_loaded_definition() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    orch.fetch_definitions().await;

    orch.start("order", Some(&raw(json!({"amount": 3}))))
        .await
        .unwrap();

    assert_eq!(engine.call_count(EngineOp::GetDefinition), 0);
}

#[tokio::test]
async fn start_falls_back_to_engine_lookup() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());

    orch.start("order", Some(&raw(json!({"amount": 3}))))
        .await
        .unwrap();

    assert_eq!(engine.call_count(EngineOp::GetDefinition), 1);
}

#[tokio::test]
async fn start_unknown_definition_is_not_found() {
    let (_engine, orch) = setup();

    let err = orch.start("missing", None).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::NotFound);
    assert!(orch.instances().error.is_some());
}

#[tokio::test]
async fn start_leaves_instance_items_untouched() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());

    orch.start("order", Some(&raw(json!({"amount": 1}))))
        .await
        .unwrap();

    assert!(orch.instances().items.is_empty());
    assert_eq!(engine.call_count(EngineOp::ListInstances), 0);
}

// --- Suspend / resume ---

#[tokio::test]
async fn suspend_stores_engine_status_in_items_and_selection() {
    let (engine, orch) = setup();
    engine.insert_instance(instance("i1", ProcessStatus::Running));
    orch.fetch_instances(None).await;
    assert!(orch.select_instance("i1"));

    let suspended = orch.suspend("i1").await.unwrap();

    assert_eq!(suspended.status, ProcessStatus::Suspended);
    let state = orch.instances();
    assert_eq!(state.items[0].status, ProcessStatus::Suspended);
    assert_eq!(state.selected.unwrap().status, ProcessStatus::Suspended);
    assert_eq!(engine.call_count(EngineOp::GetInstance), 1);
    assert_eq!(engine.call_count(EngineOp::ListInstances), 1);
}

#[tokio::test]
async fn resume_reports_what_the_engine_says() {
    let (engine, orch) = setup();
    engine.insert_instance(instance("i1", ProcessStatus::Suspended));
    orch.fetch_instances(None).await;

    engine.fail_next(EngineOp::ResumeInstance, EngineError::Request("busy".into()));
    assert!(orch.resume("i1").await.is_err());
    assert!(orch.instances().error.is_some());

    let resumed = orch.resume("i1").await.unwrap();
    assert_eq!(resumed.status, ProcessStatus::Running);
    assert!(orch.instances().error.is_none());

    engine.set_instance_status("i1", ProcessStatus::Completed);
    let refreshed = orch.fetch_instance("i1").await.unwrap();
    assert_eq!(refreshed.status, ProcessStatus::Completed);
}

#[tokio::test]
async fn suspend_of_finished_instance_fails() {
    let (engine, orch) = setup();
    engine.insert_instance(instance("i1", ProcessStatus::Completed));

    let err = orch.suspend("i1").await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Engine);
    assert_eq!(engine.call_count(EngineOp::GetInstance), 0);
}

// --- Selection ---

#[tokio::test]
async fn selection_follows_refreshes() {
    let (engine, orch) = setup();
    engine.insert_definition(float_definition());
    orch.fetch_definitions().await;

    assert!(orch.select_definition("order"));
    assert!(!orch.select_definition("missing"));
    assert!(orch.definitions().selected.is_none());

    orch.select_definition("order");
    orch.delete("order").await.unwrap();
    assert!(orch.definitions().selected.is_none());

    engine.insert_definition(float_definition());
    orch.fetch_definitions().await;
    orch.select_definition("order");
    orch.clear_selection(Collection::Definitions);
    assert!(orch.definitions().selected.is_none());
}

// --- Overlapping calls ---

type ListReply = oneshot::Sender<EngineResult<Page<InstanceRecord>>>;

/// Engine whose instance listings stay pending until the test answers them.
struct GatedEngine {
    requests: mpsc::UnboundedSender<ListReply>,
}

#[async_trait]
impl EngineClient for GatedEngine {
    async fn list_definitions(&self) -> EngineResult<Vec<ProcessDefinition>> {
        Ok(vec![])
    }

    async fn get_definition(&self, id: &str) -> EngineResult<ProcessDefinition> {
        Err(EngineError::NotFound(id.to_string()))
    }

    async fn create_definition(&self, _draft: &DefinitionDraft) -> EngineResult<ProcessDefinition> {
        Err(EngineError::Request("unsupported".into()))
    }

    async fn update_definition(
        &self,
        _id: &str,
        _patch: &DefinitionPatch,
    ) -> EngineResult<ProcessDefinition> {
        Err(EngineError::Request("unsupported".into()))
    }

    async fn delete_definition(&self, _id: &str) -> EngineResult<()> {
        Err(EngineError::Request("unsupported".into()))
    }

    async fn list_versions(&self, _definition_id: &str) -> EngineResult<Vec<DefinitionVersion>> {
        Ok(vec![])
    }

    async fn restore_version(
        &self,
        version_id: &str,
        _request: &RestoreRequest,
    ) -> EngineResult<DefinitionVersion> {
        Err(EngineError::NotFound(version_id.to_string()))
    }

    async fn list_instances(&self, _filter: &InstanceFilter) -> EngineResult<Page<InstanceRecord>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(tx)
            .map_err(|_| EngineError::Request("test ended".into()))?;
        rx.await
            .map_err(|_| EngineError::Request("reply dropped".into()))?
    }

    async fn get_instance(&self, id: &str) -> EngineResult<InstanceRecord> {
        Err(EngineError::NotFound(id.to_string()))
    }

    async fn start_instance(&self, _request: &StartRequest) -> EngineResult<InstanceRecord> {
        Err(EngineError::Request("unsupported".into()))
    }

    async fn suspend_instance(&self, _id: &str) -> EngineResult<()> {
        Err(EngineError::Request("unsupported".into()))
    }

    async fn resume_instance(&self, _id: &str) -> EngineResult<()> {
        Err(EngineError::Request("unsupported".into()))
    }

    async fn get_instance_tokens(&self, id: &str) -> EngineResult<Vec<TokenPosition>> {
        Err(EngineError::NotFound(id.to_string()))
    }

    async fn get_stats(&self) -> EngineResult<ProcessStats> {
        Err(EngineError::Request("unsupported".into()))
    }
}

fn gated() -> (Arc<Orchestrator>, mpsc::UnboundedReceiver<ListReply>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let orch = Arc::new(Orchestrator::new(Arc::new(GatedEngine { requests: tx })));
    (orch, rx)
}

fn page_of(id: &str) -> EngineResult<Page<InstanceRecord>> {
    Ok(Page::slice(vec![instance(id, ProcessStatus::Running)], 1, 10))
}

#[tokio::test]
async fn last_response_to_resolve_wins() {
    let (orch, mut requests) = gated();

    let first = tokio::spawn({
        let orch = orch.clone();
        async move { orch.fetch_instances(None).await }
    });
    let first_reply = requests.recv().await.unwrap();

    let second = tokio::spawn({
        let orch = orch.clone();
        async move { orch.fetch_instances(None).await }
    });
    let second_reply = requests.recv().await.unwrap();

    assert_eq!(orch.in_flight(Collection::Instances), 2);
    assert!(orch.instances().loading);

    // The later call answers first.
    second_reply.send(page_of("from-second")).unwrap();
    second.await.unwrap();
    assert_eq!(ids(&orch.instances().items), vec!["from-second"]);
    assert!(orch.instances().loading);

    first_reply.send(page_of("from-first")).unwrap();
    first.await.unwrap();

    let state = orch.instances();
    assert_eq!(ids(&state.items), vec!["from-first"]);
    assert!(!state.loading);
    assert_eq!(orch.in_flight(Collection::Instances), 0);
}

#[tokio::test]
async fn late_failure_keeps_items_from_earlier_success() {
    let (orch, mut requests) = gated();

    let first = tokio::spawn({
        let orch = orch.clone();
        async move { orch.fetch_instances(None).await }
    });
    let first_reply = requests.recv().await.unwrap();
    let second = tokio::spawn({
        let orch = orch.clone();
        async move { orch.fetch_instances(None).await }
    });
    let second_reply = requests.recv().await.unwrap();

    second_reply.send(page_of("fresh")).unwrap();
    second.await.unwrap();
    first_reply
        .send(Err(EngineError::Request("slow failure".into())))
        .unwrap();
    first.await.unwrap();

    let state = orch.instances();
    assert_eq!(ids(&state.items), vec!["fresh"]);
    assert!(state.error.unwrap().contains("slow failure"));
}

#[tokio::test]
async fn collections_load_independently() {
    let (orch, mut requests) = gated();

    let pending = tokio::spawn({
        let orch = orch.clone();
        async move { orch.fetch_instances(None).await }
    });
    let reply = requests.recv().await.unwrap();

    orch.fetch_definitions().await;
    assert!(!orch.definitions().loading);
    assert!(orch.instances().loading);

    reply.send(page_of("i1")).unwrap();
    pending.await.unwrap();
    assert!(!orch.instances().loading);
}

#[test]
fn orchestrator_error_converts_from_engine_error() {
    let err: OrchestratorError = EngineError::Conflict("stale".into()).into();
    assert_eq!(err.kind(), FailureKind::Conflict);
    assert!(err.validation().is_none());
}
