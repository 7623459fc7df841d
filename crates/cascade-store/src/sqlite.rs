use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{Connection, Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};

use cascade_workflow::{Edge, GraphDefinition, Node, graph};

use crate::persist::{self, FlushDebouncer};
use crate::types::{EdgeRecord, NodeRecord};
use crate::{
  BudgetConfig, Error, ExecutionRecord, ExecutionStatus, ModelRecord, WorkflowRecord,
  WorkflowStatus,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflows (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'draft',
  graph TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
  id TEXT PRIMARY KEY,
  workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
  node_type TEXT NOT NULL,
  position_x REAL NOT NULL DEFAULT 0,
  position_y REAL NOT NULL DEFAULT 0,
  params TEXT NOT NULL DEFAULT '{}',
  current_output_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_nodes_workflow ON nodes(workflow_id);

CREATE TABLE IF NOT EXISTS edges (
  id TEXT PRIMARY KEY,
  workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
  source_node TEXT NOT NULL,
  source_output TEXT NOT NULL,
  target_node TEXT NOT NULL,
  target_input TEXT NOT NULL,
  UNIQUE(source_node, source_output, target_node, target_input)
);
CREATE INDEX IF NOT EXISTS idx_edges_workflow ON edges(workflow_id);

CREATE TABLE IF NOT EXISTS executions (
  id TEXT PRIMARY KEY,
  node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
  workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
  input_hash TEXT NOT NULL,
  params_hash TEXT NOT NULL,
  status TEXT NOT NULL,
  result_path TEXT,
  result_metadata TEXT,
  error_message TEXT,
  duration_ms INTEGER,
  cost REAL NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  score INTEGER,
  starred INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_executions_node ON executions(node_id);
CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id);
CREATE INDEX IF NOT EXISTS idx_executions_created ON executions(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_executions_cache
  ON executions(node_id, input_hash, params_hash, status);

CREATE TABLE IF NOT EXISTS budget_config (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  per_execution_limit REAL NOT NULL,
  daily_limit REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_spend (
  date TEXT PRIMARY KEY,
  total REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS models (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  category TEXT,
  provider TEXT,
  schema TEXT NOT NULL,
  synced_at TEXT NOT NULL
);
"#;

/// SQLite-backed store.
///
/// A single-connection pool keeps per-connection pragmas (most notably
/// `foreign_keys`) in force for every statement, which the graph
/// overwrite protocol depends on.
pub struct SqliteStore {
  pool: SqlitePool,
  flusher: FlushDebouncer,
}

impl SqliteStore {
  /// Open (or create) the database file.
  ///
  /// Runs an integrity check first; a corrupt file is renamed to
  /// `<file>.corrupt.<epoch>` and a fresh database is initialized in its
  /// place.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
    let path = path.as_ref().to_path_buf();

    // A corrupt file can fail at connect time (bad header) or at the
    // integrity check; both take the backup-and-reinit path.
    let healthy = match Self::connect(&path).await {
      Ok(pool) => {
        if Self::integrity_ok(&pool).await.unwrap_or(false) {
          Some(pool)
        } else {
          warn!(path = %path.display(), "database failed integrity check");
          pool.close().await;
          None
        }
      }
      Err(e) if path.exists() => {
        warn!(path = %path.display(), error = %e, "database failed to open");
        None
      }
      Err(e) => return Err(e.into()),
    };

    let pool = match healthy {
      Some(pool) => pool,
      None => {
        Self::backup_corrupt(&path)?;
        Self::connect(&path).await?
      }
    };

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    info!(path = %path.display(), "database opened");

    let flusher = FlushDebouncer::new(pool.clone());
    Ok(Self { pool, flusher })
  }

  /// Open an in-memory database. Used by tests; skips the integrity
  /// check and WAL setup, which only make sense for files.
  pub async fn open_in_memory() -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .in_memory(true)
      .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(options)
      .await?;

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;

    let flusher = FlushDebouncer::new(pool.clone());
    Ok(Self { pool, flusher })
  }

  async fn connect(path: &Path) -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(options)
      .await?;
    Ok(pool)
  }

  async fn integrity_ok(pool: &SqlitePool) -> Result<bool, Error> {
    let verdict: String = sqlx::query_scalar("PRAGMA integrity_check")
      .fetch_one(pool)
      .await?;
    Ok(verdict == "ok")
  }

  fn backup_corrupt(path: &Path) -> Result<(), Error> {
    let backup = PathBuf::from(format!(
      "{}.corrupt.{}",
      path.display(),
      Utc::now().timestamp()
    ));
    std::fs::rename(path, &backup)?;
    warn!(backup = %backup.display(), "corrupt database moved aside");

    // WAL side files belong to the corrupt file; drop them.
    for suffix in ["-wal", "-shm"] {
      let side = PathBuf::from(format!("{}{}", path.display(), suffix));
      let _ = std::fs::remove_file(side);
    }
    Ok(())
  }

  /// Begin a transaction. Commit flushes; drop rolls back.
  pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, Error> {
    Ok(self.pool.begin().await?)
  }

  /// Schedule a debounced flush. Bursts of writes collapse into a single
  /// checkpoint within the debounce window.
  pub fn persist(&self) {
    self.flusher.schedule();
  }

  /// Flush immediately. Used at shutdown and transactional boundaries.
  pub async fn persist_now(&self) -> Result<(), Error> {
    persist::flush(&self.pool).await?;
    Ok(())
  }

  /// Flush and close the database.
  pub async fn close(self) -> Result<(), Error> {
    persist::flush(&self.pool).await?;
    self.pool.close().await;
    Ok(())
  }

  // ---- workflows ----

  /// Create a workflow from a graph definition. The name is trimmed and
  /// suffixed `" (n)"` on collision. Rejects cyclic graphs.
  pub async fn create_workflow(
    &self,
    name: &str,
    graph_def: &GraphDefinition,
  ) -> Result<WorkflowRecord, Error> {
    let id = uuid::Uuid::new_v4().to_string();
    validate_graph(&id, graph_def)?;
    let name = self.unique_workflow_name(name, None).await?;
    let now = Utc::now();

    let record = WorkflowRecord {
      id: id.clone(),
      name,
      status: WorkflowStatus::Draft,
      graph: Json(graph_def.clone()),
      created_at: now,
      updated_at: now,
    };

    let mut tx = self.pool.begin().await?;
    sqlx::query(
      r#"
            INSERT INTO workflows (id, name, status, graph, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&record.id)
    .bind(&record.name)
    .bind(record.status)
    .bind(&record.graph)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *tx)
    .await?;

    insert_graph_rows(&mut tx, &id, graph_def).await?;
    tx.commit().await?;

    self.persist();
    Ok(record)
  }

  /// Get a workflow row by id.
  pub async fn get_workflow(&self, id: &str) -> Result<WorkflowRecord, Error> {
    sqlx::query_as(
      r#"
            SELECT id, name, status, graph, created_at, updated_at
            FROM workflows
            WHERE id = ?
            "#,
    )
    .bind(id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("workflow '{}'", id)))
  }

  /// List all workflows, most recently updated first.
  pub async fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, Error> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, name, status, graph, created_at, updated_at
            FROM workflows
            ORDER BY updated_at DESC
            "#,
      )
      .fetch_all(&self.pool)
      .await?,
    )
  }

  /// Delete a workflow; nodes, edges, and executions cascade.
  pub async fn delete_workflow(&self, id: &str) -> Result<(), Error> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
      .bind(id)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("workflow '{}'", id)));
    }
    self.persist();
    Ok(())
  }

  /// Rename a workflow, applying the collision suffix. Returns the name
  /// actually stored.
  pub async fn rename_workflow(&self, id: &str, name: &str) -> Result<String, Error> {
    let name = self.unique_workflow_name(name, Some(id)).await?;
    let result = sqlx::query("UPDATE workflows SET name = ?, updated_at = ? WHERE id = ?")
      .bind(&name)
      .bind(Utc::now())
      .bind(id)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("workflow '{}'", id)));
    }
    self.persist();
    Ok(name)
  }

  /// Set the authoring status of a workflow.
  pub async fn set_workflow_status(&self, id: &str, status: WorkflowStatus) -> Result<(), Error> {
    let result = sqlx::query("UPDATE workflows SET status = ?, updated_at = ? WHERE id = ?")
      .bind(status)
      .bind(Utc::now())
      .bind(id)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("workflow '{}'", id)));
    }
    self.persist();
    Ok(())
  }

  /// Overwrite a workflow's graph.
  ///
  /// Deletes the workflow's nodes and edges and reinserts them from the
  /// new definition, then restores `current_output_id` on every node
  /// whose id survived and whose referenced execution still exists.
  /// Referential enforcement is relaxed for the duration so the node
  /// deletes do not cascade into execution history; executions whose
  /// node id did not survive are removed in the same transaction.
  pub async fn save_graph(
    &self,
    workflow_id: &str,
    graph_def: &GraphDefinition,
  ) -> Result<(), Error> {
    validate_graph(workflow_id, graph_def)?;

    let mut conn = self.pool.acquire().await?;
    sqlx::query("PRAGMA foreign_keys = OFF")
      .execute(&mut *conn)
      .await?;
    let result = overwrite_graph(&mut conn, workflow_id, graph_def).await;
    let restore = sqlx::query("PRAGMA foreign_keys = ON")
      .execute(&mut *conn)
      .await;
    result?;
    restore?;

    self.persist();
    Ok(())
  }

  /// Produce a unique workflow name: trim, then append `" (n)"` with the
  /// smallest n >= 2 avoiding a collision with any other workflow.
  pub async fn unique_workflow_name(
    &self,
    name: &str,
    exclude_id: Option<&str>,
  ) -> Result<String, Error> {
    let trimmed = name.trim();
    let base = if trimmed.is_empty() { "Untitled" } else { trimmed };

    let mut candidate = base.to_string();
    let mut n = 2u32;
    while self.workflow_name_taken(&candidate, exclude_id).await? {
      candidate = format!("{} ({})", base, n);
      n += 1;
    }
    Ok(candidate)
  }

  async fn workflow_name_taken(
    &self,
    name: &str,
    exclude_id: Option<&str>,
  ) -> Result<bool, Error> {
    let count: i64 =
      sqlx::query_scalar("SELECT COUNT(*) FROM workflows WHERE name = ? AND id != ?")
        .bind(name)
        .bind(exclude_id.unwrap_or(""))
        .fetch_one(&self.pool)
        .await?;
    Ok(count > 0)
  }

  // ---- nodes and edges ----

  /// Load the nodes of a workflow in insertion order.
  pub async fn load_nodes(&self, workflow_id: &str) -> Result<Vec<Node>, Error> {
    let records: Vec<NodeRecord> = sqlx::query_as(
      r#"
            SELECT id, workflow_id, node_type, position_x, position_y, params, current_output_id
            FROM nodes
            WHERE workflow_id = ?
            ORDER BY rowid
            "#,
    )
    .bind(workflow_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(records.into_iter().map(Node::from).collect())
  }

  /// Load the edges of a workflow in insertion order.
  pub async fn load_edges(&self, workflow_id: &str) -> Result<Vec<Edge>, Error> {
    let records: Vec<EdgeRecord> = sqlx::query_as(
      r#"
            SELECT id, workflow_id, source_node, source_output, target_node, target_input
            FROM edges
            WHERE workflow_id = ?
            ORDER BY rowid
            "#,
    )
    .bind(workflow_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(records.into_iter().map(Edge::from).collect())
  }

  /// Assemble the current graph definition from the node/edge tables.
  pub async fn load_graph(&self, workflow_id: &str) -> Result<GraphDefinition, Error> {
    Ok(GraphDefinition {
      nodes: self.load_nodes(workflow_id).await?,
      edges: self.load_edges(workflow_id).await?,
    })
  }

  /// Point a node's current output at an execution (or clear it).
  ///
  /// The execution must belong to the same node.
  pub async fn set_current_output(
    &self,
    node_id: &str,
    execution_id: Option<&str>,
  ) -> Result<(), Error> {
    if let Some(execution_id) = execution_id {
      let owner: Option<String> = sqlx::query_scalar("SELECT node_id FROM executions WHERE id = ?")
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;
      match owner {
        None => return Err(Error::NotFound(format!("execution '{}'", execution_id))),
        Some(owner) if owner != node_id => {
          return Err(Error::ForeignExecution {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
          });
        }
        Some(_) => {}
      }
    }

    let result = sqlx::query("UPDATE nodes SET current_output_id = ? WHERE id = ?")
      .bind(execution_id)
      .bind(node_id)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("node '{}'", node_id)));
    }
    self.persist();
    Ok(())
  }

  // ---- executions ----

  /// Insert a fresh execution row.
  pub async fn insert_execution(&self, execution: &ExecutionRecord) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO executions
              (id, node_id, workflow_id, input_hash, params_hash, status, result_path,
               result_metadata, error_message, duration_ms, cost, created_at, score, starred)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&execution.id)
    .bind(&execution.node_id)
    .bind(&execution.workflow_id)
    .bind(&execution.input_hash)
    .bind(&execution.params_hash)
    .bind(execution.status)
    .bind(&execution.result_path)
    .bind(&execution.result_metadata)
    .bind(&execution.error_message)
    .bind(execution.duration_ms)
    .bind(execution.cost)
    .bind(execution.created_at)
    .bind(execution.score)
    .bind(execution.starred)
    .execute(&self.pool)
    .await?;
    self.persist();
    Ok(())
  }

  /// Finalize an execution with its outcome.
  #[allow(clippy::too_many_arguments)]
  pub async fn finalize_execution(
    &self,
    id: &str,
    status: ExecutionStatus,
    result_path: Option<&str>,
    result_metadata: Option<&serde_json::Value>,
    error_message: Option<&str>,
    duration_ms: i64,
    cost: f64,
  ) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            UPDATE executions
            SET status = ?, result_path = ?, result_metadata = ?, error_message = ?,
                duration_ms = ?, cost = ?
            WHERE id = ?
            "#,
    )
    .bind(status)
    .bind(result_path)
    .bind(result_metadata.map(Json))
    .bind(error_message)
    .bind(duration_ms)
    .bind(cost)
    .bind(id)
    .execute(&self.pool)
    .await?;
    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("execution '{}'", id)));
    }
    self.persist();
    Ok(())
  }

  /// Get an execution by id.
  pub async fn get_execution(&self, id: &str) -> Result<ExecutionRecord, Error> {
    sqlx::query_as(
      r#"
            SELECT id, node_id, workflow_id, input_hash, params_hash, status, result_path,
                   result_metadata, error_message, duration_ms, cost, created_at, score, starred
            FROM executions
            WHERE id = ?
            "#,
    )
    .bind(id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("execution '{}'", id)))
  }

  /// List a node's executions, newest first.
  pub async fn list_executions(&self, node_id: &str) -> Result<Vec<ExecutionRecord>, Error> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, node_id, workflow_id, input_hash, params_hash, status, result_path,
                   result_metadata, error_message, duration_ms, cost, created_at, score, starred
            FROM executions
            WHERE node_id = ?
            ORDER BY created_at DESC
            "#,
      )
      .bind(node_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }

  /// Cache lookup: the most recent successful execution for the key.
  pub async fn find_cached_execution(
    &self,
    node_id: &str,
    input_hash: &str,
    params_hash: &str,
  ) -> Result<Option<ExecutionRecord>, Error> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, node_id, workflow_id, input_hash, params_hash, status, result_path,
                   result_metadata, error_message, duration_ms, cost, created_at, score, starred
            FROM executions
            WHERE node_id = ? AND input_hash = ? AND params_hash = ? AND status = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
      )
      .bind(node_id)
      .bind(input_hash)
      .bind(params_hash)
      .bind(ExecutionStatus::Success)
      .fetch_optional(&self.pool)
      .await?,
    )
  }

  /// Set or clear a user score on an execution.
  pub async fn set_execution_score(&self, id: &str, score: Option<i64>) -> Result<(), Error> {
    let result = sqlx::query("UPDATE executions SET score = ? WHERE id = ?")
      .bind(score)
      .bind(id)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("execution '{}'", id)));
    }
    self.persist();
    Ok(())
  }

  /// Star or unstar an execution.
  pub async fn set_execution_starred(&self, id: &str, starred: bool) -> Result<(), Error> {
    let result = sqlx::query("UPDATE executions SET starred = ? WHERE id = ?")
      .bind(starred)
      .bind(id)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("execution '{}'", id)));
    }
    self.persist();
    Ok(())
  }

  /// Delete one execution, clearing any current-output pointer to it.
  pub async fn delete_execution(&self, id: &str) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    sqlx::query("UPDATE nodes SET current_output_id = NULL WHERE current_output_id = ?")
      .bind(id)
      .execute(&mut *tx)
      .await?;
    let result = sqlx::query("DELETE FROM executions WHERE id = ?")
      .bind(id)
      .execute(&mut *tx)
      .await?;
    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("execution '{}'", id)));
    }
    tx.commit().await?;
    self.persist();
    Ok(())
  }

  /// Delete every execution of a node. Returns the deleted rows so the
  /// caller can clean up local result files.
  pub async fn delete_executions_for_node(
    &self,
    node_id: &str,
  ) -> Result<Vec<ExecutionRecord>, Error> {
    let deleted = self.list_executions(node_id).await?;

    let mut tx = self.pool.begin().await?;
    sqlx::query("UPDATE nodes SET current_output_id = NULL WHERE id = ?")
      .bind(node_id)
      .execute(&mut *tx)
      .await?;
    sqlx::query("DELETE FROM executions WHERE node_id = ?")
      .bind(node_id)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;

    self.persist();
    Ok(deleted)
  }

  // ---- budget and spend ----

  /// Read the budget singleton, falling back to defaults when unset.
  pub async fn get_budget(&self) -> Result<BudgetConfig, Error> {
    Ok(
      sqlx::query_as("SELECT per_execution_limit, daily_limit FROM budget_config WHERE id = 1")
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or_default(),
    )
  }

  /// Write the budget singleton.
  pub async fn set_budget(&self, budget: BudgetConfig) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO budget_config (id, per_execution_limit, daily_limit)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              per_execution_limit = excluded.per_execution_limit,
              daily_limit = excluded.daily_limit
            "#,
    )
    .bind(budget.per_execution_limit)
    .bind(budget.daily_limit)
    .execute(&self.pool)
    .await?;
    self.persist();
    Ok(())
  }

  /// Atomically add to a day's spend total.
  pub async fn add_daily_spend(&self, date: &str, amount: f64) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO daily_spend (date, total)
            VALUES (?, ?)
            ON CONFLICT(date) DO UPDATE SET total = total + excluded.total
            "#,
    )
    .bind(date)
    .bind(amount)
    .execute(&self.pool)
    .await?;
    self.persist();
    Ok(())
  }

  /// Read a day's spend total (0 when no row exists).
  pub async fn get_daily_spend(&self, date: &str) -> Result<f64, Error> {
    Ok(
      sqlx::query_scalar("SELECT total FROM daily_spend WHERE date = ?")
        .bind(date)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or(0.0),
    )
  }

  // ---- models ----

  /// Upsert model records in bulk.
  pub async fn upsert_models(&self, models: &[ModelRecord]) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    for model in models {
      sqlx::query(
        r#"
            INSERT INTO models (id, name, category, provider, schema, synced_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              name = excluded.name,
              category = excluded.category,
              provider = excluded.provider,
              schema = excluded.schema,
              synced_at = excluded.synced_at
            "#,
      )
      .bind(&model.id)
      .bind(&model.name)
      .bind(&model.category)
      .bind(&model.provider)
      .bind(&model.schema)
      .bind(model.synced_at)
      .execute(&mut *tx)
      .await?;
    }
    tx.commit().await?;
    self.persist();
    Ok(())
  }

  /// List all model records by name.
  pub async fn list_models(&self) -> Result<Vec<ModelRecord>, Error> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, name, category, provider, schema, synced_at
            FROM models
            ORDER BY name
            "#,
      )
      .fetch_all(&self.pool)
      .await?,
    )
  }

  /// Get a model record by id.
  pub async fn get_model(&self, id: &str) -> Result<Option<ModelRecord>, Error> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, name, category, provider, schema, synced_at
            FROM models
            WHERE id = ?
            "#,
      )
      .bind(id)
      .fetch_optional(&self.pool)
      .await?,
    )
  }
}

/// Edit-time graph validation: no cycles, every edge inside the node set.
fn validate_graph(workflow_id: &str, graph_def: &GraphDefinition) -> Result<(), Error> {
  let node_ids = graph_def.node_ids();
  let id_set: std::collections::HashSet<&str> = node_ids.iter().map(|id| id.as_str()).collect();

  for edge in &graph_def.edges {
    if !id_set.contains(edge.source.as_str()) || !id_set.contains(edge.target.as_str()) {
      return Err(Error::InvalidEdge {
        edge_id: edge.id.clone(),
      });
    }
  }

  if graph::has_cycle(&node_ids, &graph_def.edge_pairs()) {
    return Err(Error::CyclicGraph {
      workflow_id: workflow_id.to_string(),
    });
  }

  Ok(())
}

async fn insert_graph_rows(
  tx: &mut Transaction<'_, Sqlite>,
  workflow_id: &str,
  graph_def: &GraphDefinition,
) -> Result<(), Error> {
  for node in &graph_def.nodes {
    sqlx::query(
      r#"
            INSERT INTO nodes (id, workflow_id, node_type, position_x, position_y, params, current_output_id)
            VALUES (?, ?, ?, ?, ?, ?, NULL)
            "#,
    )
    .bind(&node.id)
    .bind(workflow_id)
    .bind(&node.node_type)
    .bind(node.position.x)
    .bind(node.position.y)
    .bind(Json(&node.params))
    .execute(&mut **tx)
    .await?;
  }

  for edge in &graph_def.edges {
    sqlx::query(
      r#"
            INSERT INTO edges (id, workflow_id, source_node, source_output, target_node, target_input)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&edge.id)
    .bind(workflow_id)
    .bind(&edge.source)
    .bind(&edge.source_output)
    .bind(&edge.target)
    .bind(&edge.target_input)
    .execute(&mut **tx)
    .await?;
  }

  Ok(())
}

/// The overwrite protocol body: runs with `foreign_keys` off so the node
/// deletes do not cascade into execution history.
async fn overwrite_graph(
  conn: &mut sqlx::pool::PoolConnection<Sqlite>,
  workflow_id: &str,
  graph_def: &GraphDefinition,
) -> Result<(), Error> {
  let mut tx = Connection::begin(&mut **conn).await?;

  let prior: Vec<(String, Option<String>)> =
    sqlx::query_as("SELECT id, current_output_id FROM nodes WHERE workflow_id = ?")
      .bind(workflow_id)
      .fetch_all(&mut *tx)
      .await?;

  sqlx::query("DELETE FROM edges WHERE workflow_id = ?")
    .bind(workflow_id)
    .execute(&mut *tx)
    .await?;
  sqlx::query("DELETE FROM nodes WHERE workflow_id = ?")
    .bind(workflow_id)
    .execute(&mut *tx)
    .await?;

  insert_graph_rows(&mut tx, workflow_id, graph_def).await?;

  // Restore pointers on nodes that survived the overwrite, provided the
  // referenced execution still exists.
  let surviving: std::collections::HashSet<&str> =
    graph_def.nodes.iter().map(|n| n.id.as_str()).collect();
  for (node_id, output_id) in &prior {
    let Some(output_id) = output_id else { continue };
    if !surviving.contains(node_id.as_str()) {
      continue;
    }
    sqlx::query(
      r#"
            UPDATE nodes SET current_output_id = ?
            WHERE id = ? AND EXISTS (SELECT 1 FROM executions WHERE id = ?)
            "#,
    )
    .bind(output_id)
    .bind(node_id)
    .bind(output_id)
    .execute(&mut *tx)
    .await?;
  }

  // Manual cascade for nodes that did not survive.
  sqlx::query(
    r#"
            DELETE FROM executions
            WHERE workflow_id = ?
              AND node_id NOT IN (SELECT id FROM nodes WHERE workflow_id = ?)
            "#,
  )
  .bind(workflow_id)
  .bind(workflow_id)
  .execute(&mut *tx)
  .await?;

  let result = sqlx::query("UPDATE workflows SET graph = ?, updated_at = ? WHERE id = ?")
    .bind(Json(graph_def))
    .bind(Utc::now())
    .bind(workflow_id)
    .execute(&mut *tx)
    .await?;
  if result.rows_affected() == 0 {
    return Err(Error::NotFound(format!("workflow '{}'", workflow_id)));
  }

  tx.commit().await?;
  Ok(())
}
