//! Cascade Service
//!
//! The typed request surface the UI shell calls over its transport.
//! Each method is one named request: workflow CRUD, execution
//! operations, history, cost, storage, and model queries. The transport
//! itself (IPC, HTTP, whatever the shell speaks) lives outside the
//! core; this crate is the wiring between the store, the engine, the
//! artifact layer, and the model cache.

mod service;

pub use service::{Service, WorkflowDetail};

use cascade_engine::EngineError;

/// Error type for the request surface.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
  /// A handler rejected the node's params. Surfaces synchronously at
  /// the request boundary; execution is not started.
  #[error("validation failed for node '{node_id}': {}", errors.join("; "))]
  Validation {
    node_id: String,
    errors: Vec<String>,
  },

  /// A node references a type with no registered handler.
  #[error("unknown node type '{node_type}'")]
  UnknownNodeType { node_type: String },

  /// A storage error occurred.
  #[error(transparent)]
  Store(#[from] cascade_store::Error),

  /// An engine error occurred.
  #[error(transparent)]
  Engine(#[from] EngineError),

  /// An artifact storage error occurred.
  #[error(transparent)]
  Artifact(#[from] cascade_artifact::Error),

  /// An import payload could not be parsed.
  #[error(transparent)]
  Import(#[from] cascade_workflow::ExportError),
}
