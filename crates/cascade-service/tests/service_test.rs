//! Integration tests for the request surface.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use cascade_artifact::FsStore;
use cascade_engine::{EngineConfig, ExecutionEngine, NoopNotifier};
use cascade_registry::{
  HandlerContext, HandlerError, HandlerResult, HandlerStatus, NodeHandler, NodeRegistry,
  NodeTypeDef, Validation,
};
use cascade_service::{Service, ServiceError};
use cascade_store::{BudgetConfig, SqliteStore};
use cascade_workflow::{Edge, GraphDefinition, Node, Position};

/// Handler whose validation and cost estimate are driven by params:
/// `{"invalid": true}` fails validation, `{"estimate": n}` costs n.
#[derive(Default)]
struct ParamDrivenHandler {
  calls: Mutex<usize>,
}

#[async_trait]
impl NodeHandler for ParamDrivenHandler {
  async fn execute(&self, ctx: HandlerContext) -> Result<HandlerResult, HandlerError> {
    *self.calls.lock().unwrap() += 1;
    Ok(HandlerResult {
      status: HandlerStatus::Success,
      outputs: serde_json::Map::new(),
      result_path: Some(format!("mock://{}", ctx.node_id)),
      result_metadata: Some(json!({ "output": format!("mock://{}", ctx.node_id) })),
      duration_ms: Some(1),
      cost: 0.0,
      error: None,
    })
  }

  fn estimate_cost(&self, params: &serde_json::Map<String, serde_json::Value>) -> f64 {
    params.get("estimate").and_then(|v| v.as_f64()).unwrap_or(0.0)
  }

  fn validate(&self, params: &serde_json::Map<String, serde_json::Value>) -> Validation {
    if params.get("invalid").and_then(|v| v.as_bool()).unwrap_or(false) {
      Validation::fail(vec!["params marked invalid".to_string()])
    } else {
      Validation::ok()
    }
  }
}

fn node(id: &str, params: serde_json::Value) -> Node {
  let serde_json::Value::Object(params) = params else {
    panic!("params must be an object");
  };
  Node {
    id: id.to_string(),
    node_type: "test".to_string(),
    position: Position::default(),
    params,
    current_output_id: None,
  }
}

fn edge(id: &str, source: &str, target: &str) -> Edge {
  Edge {
    id: id.to_string(),
    source: source.to_string(),
    source_output: "output".to_string(),
    target: target.to_string(),
    target_input: "input-media".to_string(),
  }
}

struct Fixture {
  service: Service<NoopNotifier>,
  store: Arc<SqliteStore>,
  handler: Arc<ParamDrivenHandler>,
  _temp: tempfile::TempDir,
}

async fn fixture() -> Fixture {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let handler = Arc::new(ParamDrivenHandler::default());
  let registry = Arc::new(NodeRegistry::new());
  registry.register(
    NodeTypeDef {
      node_type: "test".to_string(),
      label: "Test".to_string(),
      category: "testing".to_string(),
      inputs: Vec::new(),
      outputs: Vec::new(),
      params: Vec::new(),
      cost_per_execution: None,
    },
    handler.clone(),
  );

  let temp = tempfile::tempdir().unwrap();
  let artifacts = Arc::new(FsStore::new(temp.path()));
  let engine = Arc::new(ExecutionEngine::new(
    Arc::clone(&store),
    Arc::clone(&registry),
    Arc::clone(&artifacts),
    EngineConfig::default(),
  ));

  Fixture {
    service: Service::new(Arc::clone(&store), registry, artifacts, engine),
    store,
    handler,
    _temp: temp,
  }
}

fn two_node_graph() -> GraphDefinition {
  GraphDefinition {
    nodes: vec![node("a", json!({})), node("b", json!({}))],
    edges: vec![edge("e-ab", "a", "b")],
  }
}

#[tokio::test]
async fn workflow_lifecycle() {
  let fx = fixture().await;

  let created = fx.service.create_workflow("Pipeline", Some(two_node_graph())).await.unwrap();
  assert_eq!(created.name, "Pipeline");

  let loaded = fx.service.load_workflow(&created.id).await.unwrap();
  assert_eq!(loaded.graph.nodes.len(), 2);

  let renamed = fx.service.rename_workflow(&created.id, "Renamed").await.unwrap();
  assert_eq!(renamed, "Renamed");

  assert_eq!(fx.service.list_workflows().await.unwrap().len(), 1);
  fx.service.delete_workflow(&created.id).await.unwrap();
  assert!(fx.service.list_workflows().await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_remaps_ids_and_suffixes_the_name() {
  let fx = fixture().await;
  let original = fx.service.create_workflow("Pipeline", Some(two_node_graph())).await.unwrap();

  let copy = fx.service.duplicate_workflow(&original.id).await.unwrap();
  assert_eq!(copy.name, "Pipeline (2)");
  assert_ne!(copy.id, original.id);

  let copy_graph = fx.service.load_workflow(&copy.id).await.unwrap().graph;
  assert_eq!(copy_graph.nodes.len(), 2);
  assert!(copy_graph.nodes.iter().all(|n| n.id != "a" && n.id != "b"));
  assert!(copy_graph.nodes.iter().all(|n| n.current_output_id.is_none()));
}

#[tokio::test]
async fn invalid_params_block_execution_at_the_boundary() {
  let fx = fixture().await;
  let graph = GraphDefinition {
    nodes: vec![node("a", json!({"invalid": true}))],
    edges: vec![],
  };
  let workflow = fx.service.create_workflow("wf", Some(graph)).await.unwrap();

  let err = fx.service.run_all(&workflow.id).await.unwrap_err();
  assert!(matches!(err, ServiceError::Validation { .. }));

  // Nothing was dispatched and nothing recorded.
  assert_eq!(*fx.handler.calls.lock().unwrap(), 0);
  assert!(fx.store.list_executions("a").await.unwrap().is_empty());
}

#[tokio::test]
async fn run_all_executes_through_the_engine() {
  let fx = fixture().await;
  let workflow = fx.service.create_workflow("wf", Some(two_node_graph())).await.unwrap();

  let report = fx.service.run_all(&workflow.id).await.unwrap();
  assert_eq!(report.succeeded.len(), 2);
  assert_eq!(*fx.handler.calls.lock().unwrap(), 2);
}

#[tokio::test]
async fn estimate_reports_the_first_violated_limit() {
  let fx = fixture().await;
  fx.service
    .set_budget(BudgetConfig {
      per_execution_limit: 10.0,
      daily_limit: 100.0,
    })
    .await
    .unwrap();
  fx.store.add_daily_spend(&cascade_engine::today(), 95.0).await.unwrap();

  let graph = GraphDefinition {
    nodes: vec![
      node("a", json!({"estimate": 5.0})),
      node("b", json!({"estimate": 3.0})),
      node("c", json!({"estimate": 4.0})),
    ],
    edges: vec![],
  };
  let workflow = fx.service.create_workflow("wf", Some(graph)).await.unwrap();

  // 5 + 3 = 8: fits the per-execution limit but blows the daily limit.
  let estimate = fx
    .service
    .estimate_cost(&workflow.id, &["a".to_string(), "b".to_string()])
    .await
    .unwrap();
  assert_eq!(estimate.total_estimated, 8.0);
  assert!(!estimate.within_budget);
  assert!(estimate.reason.unwrap().contains("daily limit"));
  assert_eq!(estimate.breakdown.len(), 2);

  // 4 fits both limits.
  let estimate = fx
    .service
    .estimate_cost(&workflow.id, &["c".to_string()])
    .await
    .unwrap();
  assert!(estimate.within_budget);
  assert_eq!(fx.service.daily_spend().await.unwrap(), 95.0);
}

#[tokio::test]
async fn set_current_output_switches_the_pointer() {
  let fx = fixture().await;
  let workflow = fx.service.create_workflow("wf", Some(two_node_graph())).await.unwrap();

  fx.service.run_all(&workflow.id).await.unwrap();
  fx.service.run_node(&workflow.id, "a").await.unwrap();

  let history = fx.service.execution_history("a").await.unwrap();
  assert_eq!(history.len(), 2);
  let older = &history[1];

  fx.service
    .set_current_output(&workflow.id, "a", &older.id)
    .await
    .unwrap();

  let graph = fx.service.load_workflow(&workflow.id).await.unwrap().graph;
  let a = graph.nodes.iter().find(|n| n.id == "a").unwrap();
  assert_eq!(a.current_output_id.as_deref(), Some(older.id.as_str()));
}

#[tokio::test]
async fn star_and_score_round_trip() {
  let fx = fixture().await;
  let workflow = fx.service.create_workflow("wf", Some(two_node_graph())).await.unwrap();
  fx.service.run_all(&workflow.id).await.unwrap();

  let execution_id = fx.service.execution_history("a").await.unwrap()[0].id.clone();
  fx.service.star_execution(&execution_id, true).await.unwrap();
  fx.service.score_execution(&execution_id, Some(4)).await.unwrap();

  let history = fx.service.execution_history("a").await.unwrap();
  assert!(history[0].starred);
  assert_eq!(history[0].score, Some(4));
}

#[tokio::test]
async fn delete_node_executions_clears_history() {
  let fx = fixture().await;
  let workflow = fx.service.create_workflow("wf", Some(two_node_graph())).await.unwrap();
  fx.service.run_all(&workflow.id).await.unwrap();
  fx.service.run_node(&workflow.id, "a").await.unwrap();

  let deleted = fx.service.delete_node_executions("a").await.unwrap();
  assert_eq!(deleted, 2);
  assert!(fx.service.execution_history("a").await.unwrap().is_empty());

  let graph = fx.service.load_workflow(&workflow.id).await.unwrap().graph;
  let a = graph.nodes.iter().find(|n| n.id == "a").unwrap();
  assert_eq!(a.current_output_id, None);
}

#[tokio::test]
async fn export_import_round_trips_with_fresh_ids() {
  let fx = fixture().await;
  let workflow = fx.service.create_workflow("Original", Some(two_node_graph())).await.unwrap();

  let export = fx.service.export_workflow(&workflow.id).await.unwrap();
  assert_eq!(export.version, "1.0");

  let payload = serde_json::to_value(&export).unwrap();
  let imported = fx.service.import_workflow(&payload).await.unwrap();

  // A fresh workflow id, suffixed name, and remapped node ids.
  assert_ne!(imported.id, workflow.id);
  assert_eq!(imported.name, "Original (2)");

  let graph = fx.service.load_workflow(&imported.id).await.unwrap().graph;
  assert_eq!(graph.nodes.len(), 2);
  assert!(graph.nodes.iter().all(|n| n.id != "a" && n.id != "b"));
  assert_eq!(graph.edges.len(), 1);
}

#[tokio::test]
async fn import_accepts_a_bare_graph() {
  let fx = fixture().await;
  let payload = json!({
    "nodes": [{"id": "x", "type": "test"}],
    "edges": [],
  });

  let imported = fx.service.import_workflow(&payload).await.unwrap();
  assert_eq!(imported.name, "Imported Workflow");
  let graph = fx.service.load_workflow(&imported.id).await.unwrap().graph;
  assert_eq!(graph.nodes.len(), 1);
}

#[tokio::test]
async fn save_rejects_cycles() {
  let fx = fixture().await;
  let workflow = fx.service.create_workflow("wf", Some(two_node_graph())).await.unwrap();

  let cyclic = GraphDefinition {
    nodes: vec![node("a", json!({})), node("b", json!({}))],
    edges: vec![edge("e1", "a", "b"), edge("e2", "b", "a")],
  };
  let err = fx.service.save_workflow(&workflow.id, &cyclic).await.unwrap_err();
  assert!(matches!(
    err,
    ServiceError::Store(cascade_store::Error::CyclicGraph { .. })
  ));
}
