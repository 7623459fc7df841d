//! Per-node retry circuit breaker.
//!
//! Retries are always user-initiated; the breaker bounds them. Counts
//! are in-memory and per-process — a restart starts the user fresh.

use std::collections::HashMap;
use std::sync::Mutex;

/// Retries allowed per node before the breaker trips.
pub const RETRY_THRESHOLD: u32 = 3;

/// Counts retries per node and trips after a threshold.
pub struct CircuitBreaker {
  counts: Mutex<HashMap<String, u32>>,
  threshold: u32,
}

impl CircuitBreaker {
  pub fn new() -> Self {
    Self::with_threshold(RETRY_THRESHOLD)
  }

  pub fn with_threshold(threshold: u32) -> Self {
    Self {
      counts: Mutex::new(HashMap::new()),
      threshold,
    }
  }

  /// Record a retry. Returns true when the count has reached the
  /// threshold (i.e. this retry tripped, or the breaker already was
  /// tripped).
  pub fn record_retry(&self, node_id: &str) -> bool {
    let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
    let count = counts.entry(node_id.to_string()).or_insert(0);
    *count += 1;
    *count >= self.threshold
  }

  /// Whether the threshold has been reached, without incrementing.
  pub fn is_tripped(&self, node_id: &str) -> bool {
    let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
    counts.get(node_id).is_some_and(|count| *count >= self.threshold)
  }

  /// Clear the counter for a node.
  pub fn reset(&self, node_id: &str) {
    let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
    counts.remove(node_id);
  }
}

impl Default for CircuitBreaker {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn trips_on_the_third_retry() {
    let breaker = CircuitBreaker::new();
    assert!(!breaker.record_retry("n1"));
    assert!(!breaker.record_retry("n1"));
    assert!(breaker.record_retry("n1"));
    assert!(breaker.is_tripped("n1"));
  }

  #[test]
  fn is_tripped_does_not_increment() {
    let breaker = CircuitBreaker::new();
    breaker.record_retry("n1");
    for _ in 0..10 {
      assert!(!breaker.is_tripped("n1"));
    }
  }

  #[test]
  fn nodes_count_independently() {
    let breaker = CircuitBreaker::new();
    breaker.record_retry("n1");
    breaker.record_retry("n1");
    breaker.record_retry("n1");
    assert!(breaker.is_tripped("n1"));
    assert!(!breaker.is_tripped("n2"));
  }

  #[test]
  fn reset_clears_the_count() {
    let breaker = CircuitBreaker::new();
    for _ in 0..3 {
      breaker.record_retry("n1");
    }
    breaker.reset("n1");
    assert!(!breaker.is_tripped("n1"));
  }
}
