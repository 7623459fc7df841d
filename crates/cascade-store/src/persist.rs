//! Debounced flushing.
//!
//! Writes land in the WAL as soon as their transaction commits; the
//! checkpoint that folds the WAL back into the main file is deferred so a
//! burst of writes costs one flush instead of many. The delay is bounded
//! (`FLUSH_DEBOUNCE`); shutdown and transactional boundaries use the
//! immediate [`flush`] instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::warn;

/// Upper bound on how long a write sits in the WAL before a checkpoint.
pub(crate) const FLUSH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Checkpoint the WAL into the main database file.
pub(crate) async fn flush(pool: &SqlitePool) -> Result<(), sqlx::Error> {
  sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
    .execute(pool)
    .await?;
  Ok(())
}

/// Collapses bursts of writes into a single deferred checkpoint.
#[derive(Clone)]
pub(crate) struct FlushDebouncer {
  pool: SqlitePool,
  pending: Arc<AtomicBool>,
  delay: Duration,
}

impl FlushDebouncer {
  pub(crate) fn new(pool: SqlitePool) -> Self {
    Self {
      pool,
      pending: Arc::new(AtomicBool::new(false)),
      delay: FLUSH_DEBOUNCE,
    }
  }

  /// Schedule a checkpoint. While one is pending, further calls are
  /// absorbed into it.
  pub(crate) fn schedule(&self) {
    if self.pending.swap(true, Ordering::SeqCst) {
      return;
    }

    let pool = self.pool.clone();
    let pending = Arc::clone(&self.pending);
    let delay = self.delay;
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      pending.store(false, Ordering::SeqCst);
      if let Err(e) = flush(&pool).await {
        warn!(error = %e, "deferred checkpoint failed");
      }
    });
  }
}
