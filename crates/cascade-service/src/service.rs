use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use cascade_artifact::FsStore;
use cascade_engine::{CostEstimate, CostEstimateItem, CostGuard, ExecutionEngine, RunReport, StatusNotifier};
use cascade_models::{ModelCache, ModelInfo};
use cascade_registry::NodeRegistry;
use cascade_store::{
  BudgetConfig, ExecutionRecord, ModelRecord, SqliteStore, WorkflowRecord, WorkflowStatus,
};
use cascade_workflow::{GraphDefinition, Node, export, graph};

use crate::ServiceError;

/// Reply shape for workflow load: the record plus the graph assembled
/// fresh from the node/edge tables (so restored current-output pointers
/// are visible).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDetail {
  pub id: String,
  pub name: String,
  pub status: WorkflowStatus,
  pub graph: GraphDefinition,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// The request surface.
pub struct Service<N: StatusNotifier> {
  store: Arc<SqliteStore>,
  registry: Arc<NodeRegistry>,
  artifacts: Arc<FsStore>,
  engine: Arc<ExecutionEngine<N>>,
  models: ModelCache,
  cost: CostGuard,
}

impl<N: StatusNotifier> Service<N> {
  pub fn new(
    store: Arc<SqliteStore>,
    registry: Arc<NodeRegistry>,
    artifacts: Arc<FsStore>,
    engine: Arc<ExecutionEngine<N>>,
  ) -> Self {
    Self {
      models: ModelCache::new(Arc::clone(&store)),
      cost: CostGuard::new(Arc::clone(&store)),
      store,
      registry,
      artifacts,
      engine,
    }
  }

  // ---- workflow ----

  pub async fn create_workflow(
    &self,
    name: &str,
    graph_def: Option<GraphDefinition>,
  ) -> Result<WorkflowRecord, ServiceError> {
    let graph_def = graph_def.unwrap_or_default();
    Ok(self.store.create_workflow(name, &graph_def).await?)
  }

  /// Full-graph overwrite. Rejects cyclic graphs; preserves execution
  /// history for every node id that survives.
  pub async fn save_workflow(
    &self,
    workflow_id: &str,
    graph_def: &GraphDefinition,
  ) -> Result<(), ServiceError> {
    self.store.save_graph(workflow_id, graph_def).await?;
    Ok(())
  }

  pub async fn load_workflow(&self, workflow_id: &str) -> Result<WorkflowDetail, ServiceError> {
    let record = self.store.get_workflow(workflow_id).await?;
    let graph_def = self.store.load_graph(workflow_id).await?;
    Ok(WorkflowDetail {
      id: record.id,
      name: record.name,
      status: record.status,
      graph: graph_def,
      created_at: record.created_at,
      updated_at: record.updated_at,
    })
  }

  pub async fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, ServiceError> {
    Ok(self.store.list_workflows().await?)
  }

  /// Delete a workflow and its local result files. File cleanup is
  /// best-effort; the rows always go.
  pub async fn delete_workflow(&self, workflow_id: &str) -> Result<(), ServiceError> {
    self.store.delete_workflow(workflow_id).await?;
    if let Err(e) = self.artifacts.delete_workflow_files(workflow_id).await {
      warn!(workflow_id, error = %e, "workflow file cleanup failed");
    }
    Ok(())
  }

  /// Rename, applying the collision suffix. Returns the stored name.
  pub async fn rename_workflow(
    &self,
    workflow_id: &str,
    name: &str,
  ) -> Result<String, ServiceError> {
    Ok(self.store.rename_workflow(workflow_id, name).await?)
  }

  /// Deep-copy a workflow under a suffixed name. Node ids are remapped;
  /// execution history and current outputs stay with the original.
  pub async fn duplicate_workflow(
    &self,
    workflow_id: &str,
  ) -> Result<WorkflowRecord, ServiceError> {
    let record = self.store.get_workflow(workflow_id).await?;
    let graph_def = self.store.load_graph(workflow_id).await?;
    let copy = export::remap_graph_ids(&graph_def);
    Ok(self.store.create_workflow(&record.name, &copy).await?)
  }

  // ---- execution ----

  /// Run the whole workflow. Every node's params are validated at this
  /// boundary before anything is dispatched.
  pub async fn run_all(&self, workflow_id: &str) -> Result<RunReport, ServiceError> {
    let nodes = self.store.load_nodes(workflow_id).await?;
    self.validate_nodes(nodes.iter())?;
    Ok(self.engine.run_all(workflow_id).await?)
  }

  /// Run one node fresh (cache skipped).
  pub async fn run_node(&self, workflow_id: &str, node_id: &str) -> Result<bool, ServiceError> {
    let nodes = self.store.load_nodes(workflow_id).await?;
    self.validate_nodes(nodes.iter().filter(|n| n.id == node_id))?;
    Ok(self.engine.run_node(workflow_id, node_id).await?)
  }

  /// Run the downstream set of a node (inclusive), stopping at the
  /// first failure.
  pub async fn continue_from(
    &self,
    workflow_id: &str,
    node_id: &str,
  ) -> Result<RunReport, ServiceError> {
    let nodes = self.store.load_nodes(workflow_id).await?;
    let edges = self.store.load_edges(workflow_id).await?;
    let node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let pairs: Vec<(String, String)> = edges.iter().map(|e| e.endpoints()).collect();
    let reachable = graph::downstream_nodes(node_id, &node_ids, &pairs);

    self.validate_nodes(nodes.iter().filter(|n| reachable.contains(&n.id)))?;
    Ok(self.engine.continue_from(workflow_id, node_id).await?)
  }

  /// User-initiated retry, bounded by the circuit breaker.
  pub async fn retry(&self, workflow_id: &str, node_id: &str) -> Result<bool, ServiceError> {
    Ok(self.engine.retry(workflow_id, node_id).await?)
  }

  pub fn cancel(&self, workflow_id: &str, node_id: &str) {
    self.engine.cancel(workflow_id, node_id);
  }

  // ---- history ----

  pub async fn execution_history(
    &self,
    node_id: &str,
  ) -> Result<Vec<ExecutionRecord>, ServiceError> {
    Ok(self.store.list_executions(node_id).await?)
  }

  /// Pick an older execution as a node's current output and mark every
  /// downstream node stale.
  pub async fn set_current_output(
    &self,
    workflow_id: &str,
    node_id: &str,
    execution_id: &str,
  ) -> Result<(), ServiceError> {
    self.store.set_current_output(node_id, Some(execution_id)).await?;
    self.engine.mark_downstream_stale(workflow_id, node_id).await?;
    Ok(())
  }

  pub async fn star_execution(&self, execution_id: &str, starred: bool) -> Result<(), ServiceError> {
    Ok(self.store.set_execution_starred(execution_id, starred).await?)
  }

  pub async fn score_execution(
    &self,
    execution_id: &str,
    score: Option<i64>,
  ) -> Result<(), ServiceError> {
    Ok(self.store.set_execution_score(execution_id, score).await?)
  }

  /// Delete one execution and its local result files (best-effort).
  pub async fn delete_execution(&self, execution_id: &str) -> Result<(), ServiceError> {
    let record = self.store.get_execution(execution_id).await?;
    self.store.delete_execution(execution_id).await?;
    if let Err(e) = self
      .artifacts
      .delete_execution_files(&record.workflow_id, execution_id)
      .await
    {
      warn!(execution_id, error = %e, "execution file cleanup failed");
    }
    Ok(())
  }

  /// Delete a node's whole history, including local result files
  /// (best-effort).
  pub async fn delete_node_executions(&self, node_id: &str) -> Result<usize, ServiceError> {
    let deleted = self.store.delete_executions_for_node(node_id).await?;
    for record in &deleted {
      if let Err(e) = self
        .artifacts
        .delete_execution_files(&record.workflow_id, &record.id)
        .await
      {
        warn!(execution_id = %record.id, error = %e, "execution file cleanup failed");
      }
    }
    Ok(deleted.len())
  }

  // ---- cost ----

  /// Estimate the cost of running a set of nodes, checked against both
  /// budget limits. The engine does not block on a denial; honoring it
  /// is the caller's contract.
  pub async fn estimate_cost(
    &self,
    workflow_id: &str,
    node_ids: &[String],
  ) -> Result<CostEstimate, ServiceError> {
    let nodes = self.store.load_nodes(workflow_id).await?;

    let mut breakdown = Vec::with_capacity(node_ids.len());
    for node in nodes.iter().filter(|n| node_ids.contains(&n.id)) {
      let handler =
        self
          .registry
          .handler(&node.node_type)
          .ok_or_else(|| ServiceError::UnknownNodeType {
            node_type: node.node_type.clone(),
          })?;
      breakdown.push(CostEstimateItem {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
        estimated: handler.estimate_cost(&node.params),
      });
    }

    Ok(self.cost.estimate(breakdown).await?)
  }

  pub async fn get_budget(&self) -> Result<BudgetConfig, ServiceError> {
    Ok(self.cost.get_budget().await?)
  }

  pub async fn set_budget(&self, budget: BudgetConfig) -> Result<(), ServiceError> {
    Ok(self.cost.set_budget(budget).await?)
  }

  pub async fn daily_spend(&self) -> Result<f64, ServiceError> {
    Ok(self.cost.daily_spend().await?)
  }

  // ---- storage ----

  /// Read back an execution snapshot (`inputs`, `params`, `metadata`).
  pub async fn get_snapshot(
    &self,
    workflow_id: &str,
    execution_id: &str,
    name: &str,
  ) -> Result<serde_json::Value, ServiceError> {
    Ok(self.artifacts.read_snapshot(workflow_id, execution_id, name).await?)
  }

  /// Copy a local result into the user asset library.
  pub async fn save_output(&self, source: &Path) -> Result<PathBuf, ServiceError> {
    Ok(self.artifacts.save_to_library(source).await?)
  }

  pub async fn list_uploads(&self) -> Result<Vec<PathBuf>, ServiceError> {
    Ok(self.artifacts.list_uploads().await?)
  }

  pub async fn copy_upload(&self, source: &Path) -> Result<PathBuf, ServiceError> {
    Ok(self.artifacts.copy_upload(source).await?)
  }

  pub async fn disk_usage(&self) -> Result<u64, ServiceError> {
    Ok(self.artifacts.disk_usage().await?)
  }

  pub async fn delete_workflow_files(&self, workflow_id: &str) -> Result<(), ServiceError> {
    Ok(self.artifacts.delete_workflow_files(workflow_id).await?)
  }

  pub async fn artifact_exists(&self, relative: &Path) -> bool {
    self.artifacts.artifact_exists(relative).await
  }

  /// The folder holding a workflow's files, for the shell to open in
  /// the OS file manager.
  pub fn workflow_folder(&self, workflow_id: &str) -> PathBuf {
    self.artifacts.root().join("executions").join(workflow_id)
  }

  /// Export a workflow as its versioned JSON envelope.
  pub async fn export_workflow(
    &self,
    workflow_id: &str,
  ) -> Result<cascade_workflow::WorkflowExport, ServiceError> {
    let record = self.store.get_workflow(workflow_id).await?;
    let graph_def = self.store.load_graph(workflow_id).await?;
    Ok(export::export_workflow(&record.id, &record.name, &graph_def))
  }

  /// Import a workflow from its export JSON (or a bare graph). A fresh
  /// workflow id is allocated and every node id remapped; exported ids
  /// are never reused.
  pub async fn import_workflow(
    &self,
    payload: &serde_json::Value,
  ) -> Result<WorkflowRecord, ServiceError> {
    let parsed = export::parse_import(payload)?;
    let name = parsed.name.unwrap_or_else(|| "Imported Workflow".to_string());
    let remapped = export::remap_graph_ids(&parsed.graph);
    Ok(self.store.create_workflow(&name, &remapped).await?)
  }

  // ---- models ----

  pub async fn sync_models(&self, models: Vec<ModelInfo>) -> Result<usize, ServiceError> {
    Ok(self.models.sync(models).await?)
  }

  pub async fn list_models(&self) -> Result<Vec<ModelRecord>, ServiceError> {
    Ok(self.models.list().await?)
  }

  pub async fn search_models(
    &self,
    query: &str,
    category: Option<&str>,
    provider: Option<&str>,
  ) -> Result<Vec<ModelRecord>, ServiceError> {
    Ok(self.models.search(query, category, provider).await?)
  }

  pub async fn model_schema(&self, id: &str) -> Result<Option<serde_json::Value>, ServiceError> {
    Ok(self.models.schema(id).await?)
  }

  // ---- internals ----

  fn validate_nodes<'a>(
    &self,
    nodes: impl Iterator<Item = &'a Node>,
  ) -> Result<(), ServiceError> {
    for node in nodes {
      let handler =
        self
          .registry
          .handler(&node.node_type)
          .ok_or_else(|| ServiceError::UnknownNodeType {
            node_type: node.node_type.clone(),
          })?;
      let validation = handler.validate(&node.params);
      if !validation.valid {
        return Err(ServiceError::Validation {
          node_id: node.id.clone(),
          errors: validation.errors,
        });
      }
    }
    Ok(())
  }
}
