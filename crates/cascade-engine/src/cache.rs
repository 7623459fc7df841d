//! Result cache.
//!
//! Cache entries ARE executions: a hit is the most recent successful
//! execution with the same (node, input hash, params hash) key, served
//! by the store's composite index. The cache never writes and has no
//! eviction — entry lifecycle is execution lifecycle. The node id is
//! part of the key because different nodes legitimately share identical
//! inputs and params but produce per-node side effects.

use std::sync::Arc;

use cascade_store::{ExecutionRecord, SqliteStore};

/// Lookup of prior successful executions.
pub struct ResultCache {
  store: Arc<SqliteStore>,
}

impl ResultCache {
  pub fn new(store: Arc<SqliteStore>) -> Self {
    Self { store }
  }

  /// Find a reusable execution for the key. Only status=success is
  /// cacheable; failures always re-execute.
  pub async fn lookup(
    &self,
    node_id: &str,
    input_hash: &str,
    params_hash: &str,
  ) -> Result<Option<ExecutionRecord>, cascade_store::Error> {
    self
      .store
      .find_cached_execution(node_id, input_hash, params_hash)
      .await
  }
}
