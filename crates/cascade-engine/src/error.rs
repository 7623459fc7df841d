//! Error types for workflow execution.

use thiserror::Error;

/// Errors that can occur while orchestrating executions.
///
/// Handler failures are not errors at this level — they are recorded on
/// the execution row and emitted as status events. What surfaces here is
/// the programming-error and infrastructure taxonomy: unknown node
/// types, missing nodes, a tripped breaker, and storage failures.
#[derive(Debug, Error)]
pub enum EngineError {
  /// No handler is registered for the node's type tag. A programming
  /// error: the registry is assembled at startup.
  #[error("no handler registered for node type '{node_type}'")]
  HandlerNotFound { node_type: String },

  /// The node is not part of the loaded workflow.
  #[error("node '{node_id}' not found in workflow")]
  NodeNotFound { node_id: String },

  /// Further retries for this node are disabled.
  #[error("Circuit breaker tripped")]
  BreakerTripped { node_id: String },

  /// A storage error occurred.
  #[error("storage error: {0}")]
  Store(#[from] cascade_store::Error),
}
