//! Integration tests for the SQLite store.

use cascade_store::{BudgetConfig, ExecutionRecord, ExecutionStatus, SqliteStore};
use cascade_workflow::{Edge, GraphDefinition, Node, Position};
use chrono::Utc;

fn node(id: &str, node_type: &str) -> Node {
  Node {
    id: id.to_string(),
    node_type: node_type.to_string(),
    position: Position::default(),
    params: serde_json::Map::new(),
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

fn chain_graph() -> GraphDefinition {
  GraphDefinition {
    nodes: vec![node("a", "image-gen"), node("b", "upscale")],
    edges: vec![edge("e1", "a", "b")],
  }
}

fn execution(id: &str, node_id: &str, workflow_id: &str) -> ExecutionRecord {
  ExecutionRecord {
    id: id.to_string(),
    node_id: node_id.to_string(),
    workflow_id: workflow_id.to_string(),
    input_hash: "in".to_string(),
    params_hash: "pa".to_string(),
    status: ExecutionStatus::Pending,
    result_path: None,
    result_metadata: None,
    error_message: None,
    duration_ms: None,
    cost: 0.0,
    created_at: Utc::now(),
    score: None,
    starred: false,
  }
}

#[tokio::test]
async fn create_and_load_round_trips_the_graph() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let record = store.create_workflow("My Pipeline", &chain_graph()).await.unwrap();

  assert_eq!(record.name, "My Pipeline");
  let graph = store.load_graph(&record.id).await.unwrap();
  assert_eq!(graph.nodes.len(), 2);
  assert_eq!(graph.edges.len(), 1);
  assert_eq!(graph.nodes[0].id, "a");
}

#[tokio::test]
async fn names_get_collision_suffixes() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let empty = GraphDefinition::default();

  let mut names = Vec::new();
  for _ in 0..3 {
    names.push(store.create_workflow("  Render  ", &empty).await.unwrap().name);
  }
  assert_eq!(names, vec!["Render", "Render (2)", "Render (3)"]);
}

#[tokio::test]
async fn rename_applies_suffix_but_keeping_own_name_does_not() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let empty = GraphDefinition::default();

  let first = store.create_workflow("Render", &empty).await.unwrap();
  let second = store.create_workflow("Draft", &empty).await.unwrap();

  // Renaming onto an existing name collides.
  let name = store.rename_workflow(&second.id, "Render").await.unwrap();
  assert_eq!(name, "Render (2)");

  // Renaming to your own current name is not a collision.
  let name = store.rename_workflow(&first.id, "Render").await.unwrap();
  assert_eq!(name, "Render");
}

#[tokio::test]
async fn cyclic_graphs_are_rejected_at_edit_time() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let graph = GraphDefinition {
    nodes: vec![node("a", "t"), node("b", "t")],
    edges: vec![edge("e1", "a", "b"), edge("e2", "b", "a")],
  };

  let err = store.create_workflow("Loop", &graph).await.unwrap_err();
  assert!(matches!(err, cascade_store::Error::CyclicGraph { .. }));
}

#[tokio::test]
async fn edges_must_reference_graph_nodes() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let graph = GraphDefinition {
    nodes: vec![node("a", "t")],
    edges: vec![edge("e1", "a", "ghost")],
  };

  let err = store.create_workflow("Bad", &graph).await.unwrap_err();
  assert!(matches!(err, cascade_store::Error::InvalidEdge { .. }));
}

#[tokio::test]
async fn overwrite_preserves_current_output_for_surviving_nodes() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let workflow = store.create_workflow("wf", &chain_graph()).await.unwrap();

  store.insert_execution(&execution("x1", "a", &workflow.id)).await.unwrap();
  store
    .finalize_execution("x1", ExecutionStatus::Success, Some("mock://a"), None, None, 10, 0.0)
    .await
    .unwrap();
  store.set_current_output("a", Some("x1")).await.unwrap();

  // Overwrite: node "a" survives, node "b" is replaced by "c".
  let new_graph = GraphDefinition {
    nodes: vec![node("a", "image-gen"), node("c", "caption")],
    edges: vec![edge("e1", "a", "c")],
  };
  store.save_graph(&workflow.id, &new_graph).await.unwrap();

  let nodes = store.load_nodes(&workflow.id).await.unwrap();
  let a = nodes.iter().find(|n| n.id == "a").unwrap();
  assert_eq!(a.current_output_id.as_deref(), Some("x1"));

  // The execution row survived the node delete/reinsert.
  assert!(store.get_execution("x1").await.is_ok());
}

#[tokio::test]
async fn overwrite_drops_history_of_removed_nodes() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let workflow = store.create_workflow("wf", &chain_graph()).await.unwrap();

  store.insert_execution(&execution("x1", "b", &workflow.id)).await.unwrap();

  let new_graph = GraphDefinition {
    nodes: vec![node("a", "image-gen")],
    edges: vec![],
  };
  store.save_graph(&workflow.id, &new_graph).await.unwrap();

  assert!(matches!(
    store.get_execution("x1").await,
    Err(cascade_store::Error::NotFound(_))
  ));
}

#[tokio::test]
async fn overwrite_does_not_restore_pointer_to_deleted_execution() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let workflow = store.create_workflow("wf", &chain_graph()).await.unwrap();

  store.insert_execution(&execution("x1", "a", &workflow.id)).await.unwrap();
  store.set_current_output("a", Some("x1")).await.unwrap();
  store.delete_execution("x1").await.unwrap();

  store.save_graph(&workflow.id, &chain_graph()).await.unwrap();

  let nodes = store.load_nodes(&workflow.id).await.unwrap();
  let a = nodes.iter().find(|n| n.id == "a").unwrap();
  assert_eq!(a.current_output_id, None);
}

#[tokio::test]
async fn deleting_an_execution_clears_pointers_to_it() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let workflow = store.create_workflow("wf", &chain_graph()).await.unwrap();

  store.insert_execution(&execution("x1", "a", &workflow.id)).await.unwrap();
  store.set_current_output("a", Some("x1")).await.unwrap();
  store.delete_execution("x1").await.unwrap();

  let nodes = store.load_nodes(&workflow.id).await.unwrap();
  assert_eq!(nodes.iter().find(|n| n.id == "a").unwrap().current_output_id, None);
}

#[tokio::test]
async fn current_output_must_belong_to_the_node() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let workflow = store.create_workflow("wf", &chain_graph()).await.unwrap();

  store.insert_execution(&execution("x1", "a", &workflow.id)).await.unwrap();

  let err = store.set_current_output("b", Some("x1")).await.unwrap_err();
  assert!(matches!(err, cascade_store::Error::ForeignExecution { .. }));
}

#[tokio::test]
async fn cache_lookup_returns_latest_success_only() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let workflow = store.create_workflow("wf", &chain_graph()).await.unwrap();

  // A failed attempt, then two successes.
  let mut failed = execution("x1", "a", &workflow.id);
  failed.created_at = Utc::now() - chrono::Duration::seconds(30);
  store.insert_execution(&failed).await.unwrap();
  store
    .finalize_execution("x1", ExecutionStatus::Error, None, None, Some("boom"), 5, 0.0)
    .await
    .unwrap();

  let mut old = execution("x2", "a", &workflow.id);
  old.created_at = Utc::now() - chrono::Duration::seconds(20);
  store.insert_execution(&old).await.unwrap();
  store
    .finalize_execution("x2", ExecutionStatus::Success, Some("mock://old"), None, None, 5, 0.0)
    .await
    .unwrap();

  let mut new = execution("x3", "a", &workflow.id);
  new.created_at = Utc::now() - chrono::Duration::seconds(10);
  store.insert_execution(&new).await.unwrap();
  store
    .finalize_execution("x3", ExecutionStatus::Success, Some("mock://new"), None, None, 5, 0.0)
    .await
    .unwrap();

  let hit = store.find_cached_execution("a", "in", "pa").await.unwrap().unwrap();
  assert_eq!(hit.id, "x3");

  // Different key misses.
  assert!(store.find_cached_execution("a", "other", "pa").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_executions_are_not_cacheable() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let workflow = store.create_workflow("wf", &chain_graph()).await.unwrap();

  store.insert_execution(&execution("x1", "a", &workflow.id)).await.unwrap();
  store
    .finalize_execution("x1", ExecutionStatus::Error, None, None, Some("boom"), 5, 0.0)
    .await
    .unwrap();

  assert!(store.find_cached_execution("a", "in", "pa").await.unwrap().is_none());
}

#[tokio::test]
async fn daily_spend_is_additive_under_concurrent_writers() {
  let store = std::sync::Arc::new(SqliteStore::open_in_memory().await.unwrap());

  let tasks: Vec<_> = (0..10)
    .map(|_| {
      let store = std::sync::Arc::clone(&store);
      tokio::spawn(async move { store.add_daily_spend("2026-08-01", 0.5).await })
    })
    .collect();
  for task in tasks {
    task.await.unwrap().unwrap();
  }

  assert_eq!(store.get_daily_spend("2026-08-01").await.unwrap(), 5.0);
  assert_eq!(store.get_daily_spend("2026-08-02").await.unwrap(), 0.0);
}

#[tokio::test]
async fn budget_defaults_then_persists() {
  let store = SqliteStore::open_in_memory().await.unwrap();

  let budget = store.get_budget().await.unwrap();
  assert_eq!(budget, BudgetConfig::default());

  store
    .set_budget(BudgetConfig {
      per_execution_limit: 10.0,
      daily_limit: 100.0,
    })
    .await
    .unwrap();
  let budget = store.get_budget().await.unwrap();
  assert_eq!(budget.daily_limit, 100.0);
}

#[tokio::test]
async fn workflow_delete_cascades_to_graph_and_history() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let workflow = store.create_workflow("wf", &chain_graph()).await.unwrap();
  store.insert_execution(&execution("x1", "a", &workflow.id)).await.unwrap();

  store.delete_workflow(&workflow.id).await.unwrap();

  assert!(store.load_nodes(&workflow.id).await.unwrap().is_empty());
  assert!(matches!(
    store.get_execution("x1").await,
    Err(cascade_store::Error::NotFound(_))
  ));
}

#[tokio::test]
async fn corrupt_file_is_backed_up_and_reinitialized() {
  let temp = tempfile::tempdir().unwrap();
  let path = temp.path().join("cascade.db");
  std::fs::write(&path, b"this is definitely not a sqlite database").unwrap();

  let store = SqliteStore::open(&path).await.unwrap();
  store.create_workflow("fresh", &GraphDefinition::default()).await.unwrap();
  store.close().await.unwrap();

  let backups: Vec<_> = std::fs::read_dir(temp.path())
    .unwrap()
    .filter_map(|entry| entry.ok())
    .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt."))
    .collect();
  assert_eq!(backups.len(), 1);
}

#[tokio::test]
async fn reopen_preserves_data() {
  let temp = tempfile::tempdir().unwrap();
  let path = temp.path().join("cascade.db");

  let store = SqliteStore::open(&path).await.unwrap();
  let created = store.create_workflow("persisted", &chain_graph()).await.unwrap();
  store.close().await.unwrap();

  let store = SqliteStore::open(&path).await.unwrap();
  let loaded = store.get_workflow(&created.id).await.unwrap();
  assert_eq!(loaded.name, "persisted");
  assert_eq!(store.load_nodes(&created.id).await.unwrap().len(), 2);
}
