//! Workflow execution engine.
//!
//! The `ExecutionEngine` orchestrates node execution over a workflow's
//! DAG: topological level batches with bounded concurrency, cache
//! consultation, cooperative cancellation, failure propagation, and
//! status streaming to subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cascade_artifact::FsStore;
use cascade_registry::{HandlerContext, HandlerStatus, NodeRegistry, ProgressFn};
use cascade_store::{ExecutionRecord, ExecutionStatus, SqliteStore};
use cascade_workflow::{Edge, Node, graph};
use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::breaker::CircuitBreaker;
use crate::cache::ResultCache;
use crate::cost::CostGuard;
use crate::error::EngineError;
use crate::events::{EdgeStatus, EngineEvent, NodeStatus, NoopNotifier, StatusNotifier};
use crate::{hash, input};

/// Concurrency bound within a topological level. Small on purpose: node
/// handlers call external APIs that do not appreciate a stampede.
pub const MAX_PARALLEL_EXECUTIONS: usize = 5;

/// Status message synthesized for nodes whose upstream failed this run.
pub const SKIPPED_UPSTREAM_FAILED: &str = "Skipped: upstream node failed";

/// Configuration for the execution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Parallel node executions within a level.
  pub max_parallel: usize,

  /// Pause between `running` and `confirmed` on a cache hit, so the UI
  /// can show the transition.
  pub cache_hit_delay: Duration,

  /// Copy downloaded results into the user asset library.
  pub auto_save_library: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_parallel: MAX_PARALLEL_EXECUTIONS,
      cache_hit_delay: Duration::from_millis(300),
      auto_save_library: false,
    }
  }
}

/// Summary of a run: which nodes succeeded, failed, or were skipped
/// because an upstream node failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
  pub succeeded: Vec<String>,
  pub failed: Vec<String>,
  pub skipped: Vec<String>,
}

/// The workflow execution engine.
///
/// Generic over `N: StatusNotifier` to allow different event delivery
/// strategies. Use `ExecutionEngine::new()` for a default engine with
/// no-op notifications, or `ExecutionEngine::with_notifier()` to stream
/// events to subscribers.
pub struct ExecutionEngine<N: StatusNotifier = NoopNotifier> {
  store: Arc<SqliteStore>,
  registry: Arc<NodeRegistry>,
  artifacts: Arc<FsStore>,
  cache: ResultCache,
  cost: CostGuard,
  breaker: CircuitBreaker,
  cancel_tokens: Mutex<HashMap<(String, String), CancellationToken>>,
  notifier: Arc<N>,
  config: EngineConfig,
}

impl ExecutionEngine<NoopNotifier> {
  /// Create an engine that discards events.
  pub fn new(
    store: Arc<SqliteStore>,
    registry: Arc<NodeRegistry>,
    artifacts: Arc<FsStore>,
    config: EngineConfig,
  ) -> Self {
    Self::with_notifier(store, registry, artifacts, config, NoopNotifier)
  }
}

impl<N: StatusNotifier> ExecutionEngine<N> {
  /// Create an engine with a custom notifier.
  pub fn with_notifier(
    store: Arc<SqliteStore>,
    registry: Arc<NodeRegistry>,
    artifacts: Arc<FsStore>,
    config: EngineConfig,
    notifier: N,
  ) -> Self {
    Self {
      cache: ResultCache::new(Arc::clone(&store)),
      cost: CostGuard::new(Arc::clone(&store)),
      breaker: CircuitBreaker::new(),
      cancel_tokens: Mutex::new(HashMap::new()),
      notifier: Arc::new(notifier),
      store,
      registry,
      artifacts,
      config,
    }
  }

  /// The notifier, for subscribing alongside the engine.
  pub fn notifier(&self) -> &N {
    &self.notifier
  }

  /// Execute an entire workflow in topological level order.
  ///
  /// Within a level, nodes run concurrently up to the configured bound.
  /// A node whose upstream failed this run is marked error with
  /// [`SKIPPED_UPSTREAM_FAILED`] and never dispatched; once any node has
  /// failed, remaining levels are not dispatched at all.
  #[instrument(name = "run_all", skip(self))]
  pub async fn run_all(&self, workflow_id: &str) -> Result<RunReport, EngineError> {
    let (node_map, edges, node_ids) = self.load_workflow(workflow_id).await?;
    let levels = graph::topological_levels(&node_ids, &edge_pairs(&edges));
    self
      .run_levels(workflow_id, levels, &node_map, &edges, None)
      .await
  }

  /// Execute exactly one node, resolving inputs from current upstream
  /// outputs. The cache is skipped: the user explicitly asked for a
  /// fresh run.
  #[instrument(name = "run_node", skip(self))]
  pub async fn run_node(&self, workflow_id: &str, node_id: &str) -> Result<bool, EngineError> {
    let (node_map, edges, _) = self.load_workflow(workflow_id).await?;
    self
      .execute_node(workflow_id, node_id, &node_map, &edges, true)
      .await
  }

  /// Execute the downstream reachability set of `node_id` (inclusive)
  /// in topological order, stopping at the first failure. The cache is
  /// consulted.
  #[instrument(name = "continue_from", skip(self))]
  pub async fn continue_from(
    &self,
    workflow_id: &str,
    node_id: &str,
  ) -> Result<RunReport, EngineError> {
    let (node_map, edges, node_ids) = self.load_workflow(workflow_id).await?;
    let pairs = edge_pairs(&edges);
    let reachable = graph::downstream_nodes(node_id, &node_ids, &pairs);
    let levels = graph::topological_levels(&node_ids, &pairs);
    self
      .run_levels(workflow_id, levels, &node_map, &edges, Some(&reachable))
      .await
  }

  /// Retry a node with a perturbed seed and the cache skipped.
  ///
  /// Fails immediately once the circuit breaker has tripped. The
  /// original params are restored after the attempt; when the attempt
  /// itself trips the breaker, the node transitions to idle.
  #[instrument(name = "retry", skip(self))]
  pub async fn retry(&self, workflow_id: &str, node_id: &str) -> Result<bool, EngineError> {
    if self.breaker.is_tripped(node_id) {
      return Err(EngineError::BreakerTripped {
        node_id: node_id.to_string(),
      });
    }

    let (node_map, edges, _) = self.load_workflow(workflow_id).await?;

    let original_params = {
      let mut map = node_map.write().await;
      let node = map.get_mut(node_id).ok_or_else(|| EngineError::NodeNotFound {
        node_id: node_id.to_string(),
      })?;
      let original = node.params.clone();
      perturb_seed(&mut node.params);
      original
    };

    let outcome = self
      .execute_node(workflow_id, node_id, &node_map, &edges, true)
      .await;

    if let Some(node) = node_map.write().await.get_mut(node_id) {
      node.params = original_params;
    }

    if self.breaker.record_retry(node_id) {
      info!(node_id, "retry budget exhausted");
      self.emit_node_status(workflow_id, node_id, NodeStatus::Idle, None);
    }

    outcome
  }

  /// Signal the cancellation token for (workflow, node), remove it, and
  /// transition the node to idle. No-op when no execution is in flight.
  pub fn cancel(&self, workflow_id: &str, node_id: &str) {
    let token = {
      let mut tokens = self
        .cancel_tokens
        .lock()
        .unwrap_or_else(|e| e.into_inner());
      tokens.remove(&(workflow_id.to_string(), node_id.to_string()))
    };

    if let Some(token) = token {
      token.cancel();
      info!(workflow_id, node_id, "execution cancelled");
      self.emit_node_status(workflow_id, node_id, NodeStatus::Idle, None);
    }
  }

  /// Emit idle for every node strictly downstream of `node_id`. Used
  /// when the user picks an older execution as a node's current output.
  pub async fn mark_downstream_stale(
    &self,
    workflow_id: &str,
    node_id: &str,
  ) -> Result<(), EngineError> {
    let nodes = self.store.load_nodes(workflow_id).await?;
    let edges = self.store.load_edges(workflow_id).await?;
    let node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();

    let downstream = graph::downstream_nodes(node_id, &node_ids, &edge_pairs(&edges));
    for id in node_ids
      .iter()
      .filter(|id| downstream.contains(id.as_str()) && id.as_str() != node_id)
    {
      self.emit_node_status(workflow_id, id, NodeStatus::Idle, None);
    }
    Ok(())
  }

  // ---- internals ----

  async fn load_workflow(
    &self,
    workflow_id: &str,
  ) -> Result<(RwLock<HashMap<String, Node>>, Vec<Edge>, Vec<String>), EngineError> {
    let nodes = self.store.load_nodes(workflow_id).await?;
    let edges = self.store.load_edges(workflow_id).await?;
    let node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let map: HashMap<String, Node> = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
    Ok((RwLock::new(map), edges, node_ids))
  }

  /// Run levels in order, honoring the optional reachability restriction.
  async fn run_levels(
    &self,
    workflow_id: &str,
    levels: Vec<Vec<String>>,
    node_map: &RwLock<HashMap<String, Node>>,
    edges: &[Edge],
    restrict: Option<&HashSet<String>>,
  ) -> Result<RunReport, EngineError> {
    let mut report = RunReport::default();
    let mut failed: HashSet<String> = HashSet::new();

    for level in levels {
      let had_failures = !failed.is_empty();
      let mut batch = Vec::new();

      for node_id in level {
        if restrict.is_some_and(|set| !set.contains(&node_id)) {
          continue;
        }
        if upstream_failed(&node_id, edges, &failed) {
          // Never dispatched; no execution row is written.
          failed.insert(node_id.clone());
          report.skipped.push(node_id.clone());
          self.emit_node_status(
            workflow_id,
            &node_id,
            NodeStatus::Error,
            Some(SKIPPED_UPSTREAM_FAILED.to_string()),
          );
          continue;
        }
        if had_failures {
          // A failure in an earlier level suppresses the rest of the run.
          continue;
        }
        batch.push(node_id);
      }

      if batch.is_empty() {
        continue;
      }

      let results: Vec<(String, Result<bool, EngineError>)> = futures::stream::iter(batch)
        .map(|node_id| async move {
          let outcome = self
            .execute_node(workflow_id, &node_id, node_map, edges, false)
            .await;
          (node_id, outcome)
        })
        .buffer_unordered(self.config.max_parallel)
        .collect()
        .await;

      for (node_id, outcome) in results {
        match outcome {
          Ok(true) => report.succeeded.push(node_id),
          Ok(false) => {
            failed.insert(node_id.clone());
            report.failed.push(node_id);
          }
          Err(e) => return Err(e),
        }
      }
    }

    Ok(report)
  }

  /// Execute one node: resolve, hash, consult the cache, dispatch the
  /// handler under a cancellation token, record the outcome, and emit
  /// status transitions. Returns whether the node succeeded.
  async fn execute_node(
    &self,
    workflow_id: &str,
    node_id: &str,
    nodes: &RwLock<HashMap<String, Node>>,
    edges: &[Edge],
    skip_cache: bool,
  ) -> Result<bool, EngineError> {
    // Handler lookup. A missing handler is a programming error.
    let (node_type, params) = {
      let map = nodes.read().await;
      let node = map.get(node_id).ok_or_else(|| EngineError::NodeNotFound {
        node_id: node_id.to_string(),
      })?;
      (node.node_type.clone(), node.params.clone())
    };
    let handler = self
      .registry
      .handler(&node_type)
      .ok_or_else(|| EngineError::HandlerNotFound {
        node_type: node_type.clone(),
      })?;

    // Assemble inputs from upstream current outputs.
    let inputs = {
      let map = nodes.read().await;
      input::resolve_inputs(node_id, edges, &map, &self.store).await?
    };

    let input_hash = hash::hash_map(&inputs);
    let params_hash = hash::hash_map(&params);

    if !skip_cache
      && let Some(cached) = self.cache.lookup(node_id, &input_hash, &params_hash).await?
    {
      info!(workflow_id, node_id, execution_id = %cached.id, "cache hit");
      self.emit_node_status(workflow_id, node_id, NodeStatus::Running, None);
      // Perceptual delay so the UI can show the transition.
      tokio::time::sleep(self.config.cache_hit_delay).await;

      self.store.set_current_output(node_id, Some(cached.id.as_str())).await?;
      if let Some(node) = nodes.write().await.get_mut(node_id) {
        node.current_output_id = Some(cached.id.clone());
      }
      self.emit_node_status(workflow_id, node_id, NodeStatus::Confirmed, None);
      return Ok(true);
    }

    let cancel = CancellationToken::new();
    self.register_token(workflow_id, node_id, cancel.clone());

    self.emit_node_status(workflow_id, node_id, NodeStatus::Running, None);

    let execution_id = uuid::Uuid::new_v4().to_string();
    self
      .store
      .insert_execution(&ExecutionRecord {
        id: execution_id.clone(),
        node_id: node_id.to_string(),
        workflow_id: workflow_id.to_string(),
        input_hash,
        params_hash,
        status: ExecutionStatus::Pending,
        result_path: None,
        result_metadata: None,
        error_message: None,
        duration_ms: None,
        cost: 0.0,
        created_at: Utc::now(),
        score: None,
        starred: false,
      })
      .await?;

    let ctx = HandlerContext {
      node_id: node_id.to_string(),
      node_type,
      workflow_id: workflow_id.to_string(),
      inputs: inputs.clone(),
      params: params.clone(),
      cancel: cancel.clone(),
      progress: self.progress_fn(workflow_id, node_id),
    };

    let started = std::time::Instant::now();
    let outcome = handler.execute(ctx).await;
    let wall_ms = started.elapsed().as_millis() as i64;

    // Classify. Cancellation wins over whatever the handler returned:
    // cancel() already transitioned the node to idle and that status is
    // never overwritten.
    let cancelled = cancel.is_cancelled()
      || matches!(&outcome, Err(cascade_registry::HandlerError::Aborted));

    let (status, message, result_path, metadata, duration, cost) = match outcome {
      Err(e) => (
        ExecutionStatus::Error,
        Some(e.to_string()),
        None,
        None,
        wall_ms,
        0.0,
      ),
      Ok(result) => {
        let duration = result.duration_ms.unwrap_or(wall_ms);
        match result.status {
          HandlerStatus::Error => (
            ExecutionStatus::Error,
            Some(
              result
                .error
                .unwrap_or_else(|| "handler reported an error".to_string()),
            ),
            result.result_path,
            result.result_metadata,
            duration,
            result.cost,
          ),
          HandlerStatus::Success if cancelled => (
            ExecutionStatus::Error,
            Some("execution aborted".to_string()),
            result.result_path,
            result.result_metadata,
            duration,
            result.cost,
          ),
          HandlerStatus::Success => (
            ExecutionStatus::Success,
            None,
            result.result_path,
            result.result_metadata,
            duration,
            result.cost,
          ),
        }
      }
    };
    let success = status == ExecutionStatus::Success;

    self
      .store
      .finalize_execution(
        &execution_id,
        status,
        result_path.as_deref(),
        metadata.as_ref(),
        message.as_deref(),
        duration,
        cost,
      )
      .await?;

    // Auxiliary on-disk snapshots; transient I/O is logged, not raised.
    self
      .persist_snapshots(workflow_id, &execution_id, &inputs, &params, metadata.as_ref())
      .await;

    if cost > 0.0 {
      self.cost.record_spend(cost).await?;
    }

    if success {
      self.store.set_current_output(node_id, Some(execution_id.as_str())).await?;
      if let Some(node) = nodes.write().await.get_mut(node_id) {
        node.current_output_id = Some(execution_id.clone());
      }

      self
        .download_results(workflow_id, &execution_id, result_path.as_deref(), metadata.as_ref())
        .await;

      self.emit_node_status(workflow_id, node_id, NodeStatus::Confirmed, None);
      for edge in edges.iter().filter(|e| e.source == node_id) {
        self.emit_edge_status(workflow_id, &edge.id, EdgeStatus::HasData);
      }
    } else {
      if !cancelled {
        self.emit_node_status(workflow_id, node_id, NodeStatus::Error, message.clone());
      }
      for edge in edges.iter().filter(|e| e.source == node_id) {
        self.emit_edge_status(workflow_id, &edge.id, EdgeStatus::NoData);
      }
    }

    self.remove_token(workflow_id, node_id);
    Ok(success)
  }

  /// Persist execution-scoped snapshots of inputs, params, and metadata.
  async fn persist_snapshots(
    &self,
    workflow_id: &str,
    execution_id: &str,
    inputs: &serde_json::Map<String, serde_json::Value>,
    params: &serde_json::Map<String, serde_json::Value>,
    metadata: Option<&serde_json::Value>,
  ) {
    let snapshots = [
      ("inputs", Some(serde_json::Value::Object(inputs.clone()))),
      ("params", Some(serde_json::Value::Object(params.clone()))),
      ("metadata", metadata.cloned()),
    ];
    for (name, value) in snapshots {
      let Some(value) = value else { continue };
      if let Err(e) = self
        .artifacts
        .write_snapshot(workflow_id, execution_id, name, &value)
        .await
      {
        warn!(workflow_id, execution_id, name, error = %e, "snapshot write failed");
      }
    }
  }

  /// Download result URLs to local storage, best-effort.
  async fn download_results(
    &self,
    workflow_id: &str,
    execution_id: &str,
    result_path: Option<&str>,
    metadata: Option<&serde_json::Value>,
  ) {
    for url in collect_result_urls(result_path, metadata) {
      match self
        .artifacts
        .download_result(workflow_id, execution_id, &url)
        .await
      {
        Ok(local) => {
          if self.config.auto_save_library
            && let Err(e) = self.artifacts.save_to_library(&local).await
          {
            warn!(execution_id, error = %e, "library save failed");
          }
        }
        Err(e) => warn!(execution_id, url, error = %e, "result download failed"),
      }
    }
  }

  fn progress_fn(&self, workflow_id: &str, node_id: &str) -> ProgressFn {
    let notifier = Arc::clone(&self.notifier);
    let workflow_id = workflow_id.to_string();
    let node_id = node_id.to_string();
    Arc::new(move |percent, message| {
      notifier.notify(EngineEvent::Progress {
        workflow_id: workflow_id.clone(),
        node_id: node_id.clone(),
        progress: percent.clamp(0.0, 100.0),
        message,
      });
    })
  }

  fn register_token(&self, workflow_id: &str, node_id: &str, token: CancellationToken) {
    let mut tokens = self
      .cancel_tokens
      .lock()
      .unwrap_or_else(|e| e.into_inner());
    tokens.insert((workflow_id.to_string(), node_id.to_string()), token);
  }

  fn remove_token(&self, workflow_id: &str, node_id: &str) {
    let mut tokens = self
      .cancel_tokens
      .lock()
      .unwrap_or_else(|e| e.into_inner());
    tokens.remove(&(workflow_id.to_string(), node_id.to_string()));
  }

  fn emit_node_status(
    &self,
    workflow_id: &str,
    node_id: &str,
    status: NodeStatus,
    error_message: Option<String>,
  ) {
    self.notifier.notify(EngineEvent::NodeStatus {
      workflow_id: workflow_id.to_string(),
      node_id: node_id.to_string(),
      status,
      error_message,
    });
  }

  fn emit_edge_status(&self, workflow_id: &str, edge_id: &str, status: EdgeStatus) {
    self.notifier.notify(EngineEvent::EdgeStatus {
      workflow_id: workflow_id.to_string(),
      edge_id: edge_id.to_string(),
      status,
    });
  }
}

fn edge_pairs(edges: &[Edge]) -> Vec<(String, String)> {
  edges.iter().map(|e| e.endpoints()).collect()
}

fn upstream_failed(node_id: &str, edges: &[Edge], failed: &HashSet<String>) -> bool {
  edges
    .iter()
    .any(|e| e.target == node_id && failed.contains(&e.source))
}

/// Perturb the `seed` parameter for a retry: numeric seeds get a uniform
/// 1..1000 bump, anything else becomes a random non-negative 31-bit
/// integer.
fn perturb_seed(params: &mut serde_json::Map<String, serde_json::Value>) {
  let mut rng = rand::thread_rng();
  let next = match params.get("seed") {
    Some(serde_json::Value::Number(n)) => {
      if let Some(i) = n.as_i64() {
        serde_json::Value::from(i + rng.gen_range(1..=1000i64))
      } else if let Some(f) = n.as_f64() {
        serde_json::Value::from(f + rng.gen_range(1..=1000i64) as f64)
      } else {
        serde_json::Value::from(rng.gen_range(0..(1i64 << 31)))
      }
    }
    _ => serde_json::Value::from(rng.gen_range(0..(1i64 << 31))),
  };
  params.insert("seed".to_string(), next);
}

/// Collect every URL worth downloading from a result: the result path
/// plus any metadata values that are URL strings or arrays of them.
fn collect_result_urls(
  result_path: Option<&str>,
  metadata: Option<&serde_json::Value>,
) -> Vec<String> {
  let mut urls = Vec::new();
  let mut push = |candidate: &str| {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
      let candidate = candidate.to_string();
      if !urls.contains(&candidate) {
        urls.push(candidate);
      }
    }
  };

  if let Some(path) = result_path {
    push(path);
  }
  if let Some(serde_json::Value::Object(map)) = metadata {
    for value in map.values() {
      match value {
        serde_json::Value::String(s) => push(s),
        serde_json::Value::Array(items) => {
          for item in items {
            if let serde_json::Value::String(s) = item {
              push(s);
            }
          }
        }
        _ => {}
      }
    }
  }
  urls
}
