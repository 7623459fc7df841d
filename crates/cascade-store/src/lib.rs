//! Cascade Store
//!
//! This crate provides durable state for Cascade on a single embedded
//! SQLite file: workflows, their node/edge tables, execution history,
//! the budget singleton, daily spend, and synced model records.
//!
//! The [`SqliteStore`] handles:
//! - Opening the database with an integrity check (a corrupt file is
//!   renamed aside and a fresh one initialized)
//! - Transactional full-graph overwrites that preserve execution history
//! - Debounced flushing that collapses write bursts into one checkpoint
//! - The composite-indexed cache lookup used by the execution engine

mod persist;
mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{
  BudgetConfig, ExecutionRecord, ExecutionStatus, ModelRecord, WorkflowRecord, WorkflowStatus,
};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// An I/O error occurred (corrupt-file backup, checkpointing).
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The submitted graph contains a cycle. Graphs are validated at edit
  /// time; the engine never sees a cyclic workflow.
  #[error("graph for workflow '{workflow_id}' contains a cycle")]
  CyclicGraph { workflow_id: String },

  /// An edge references a node outside the submitted graph.
  #[error("edge '{edge_id}' references a node outside the workflow")]
  InvalidEdge { edge_id: String },

  /// A current-output pointer must reference an execution of the same node.
  #[error("execution '{execution_id}' does not belong to node '{node_id}'")]
  ForeignExecution {
    execution_id: String,
    node_id: String,
  },
}
