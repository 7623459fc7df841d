//! Cost estimation and spend tracking.
//!
//! The guard estimates and records; it does not block execution. The
//! estimate reply carries `within_budget` and the first violated limit,
//! and honoring a denial is the client's contract.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use cascade_store::{BudgetConfig, SqliteStore};

/// The UTC calendar-day key used for daily spend rows.
pub fn today() -> String {
  Utc::now().format("%Y-%m-%d").to_string()
}

/// One node's contribution to an estimate. Estimates come from the
/// handler's `estimate_cost(params)` and are opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimateItem {
  pub node_id: String,
  pub node_type: String,
  pub estimated: f64,
}

/// Reply of a cost estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
  pub total_estimated: f64,
  pub breakdown: Vec<CostEstimateItem>,
  pub within_budget: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

/// Estimates, records, and reports per-run and per-day spend limits.
pub struct CostGuard {
  store: Arc<SqliteStore>,
}

impl CostGuard {
  pub fn new(store: Arc<SqliteStore>) -> Self {
    Self { store }
  }

  /// Sum per-node estimates and compare against both limits. `reason`
  /// names the first violated limit.
  pub async fn estimate(
    &self,
    breakdown: Vec<CostEstimateItem>,
  ) -> Result<CostEstimate, cascade_store::Error> {
    let total_estimated: f64 = breakdown.iter().map(|item| item.estimated).sum();
    let budget = self.store.get_budget().await?;
    let spent_today = self.store.get_daily_spend(&today()).await?;

    let reason = if total_estimated > budget.per_execution_limit {
      Some(format!(
        "estimated cost {:.4} exceeds the per-execution limit {:.4}",
        total_estimated, budget.per_execution_limit
      ))
    } else if spent_today + total_estimated > budget.daily_limit {
      Some(format!(
        "estimated cost {:.4} plus today's spend {:.4} exceeds the daily limit {:.4}",
        total_estimated, spent_today, budget.daily_limit
      ))
    } else {
      None
    };

    Ok(CostEstimate {
      total_estimated,
      within_budget: reason.is_none(),
      reason,
      breakdown,
    })
  }

  /// Atomically add to today's spend.
  pub async fn record_spend(&self, amount: f64) -> Result<(), cascade_store::Error> {
    self.store.add_daily_spend(&today(), amount).await
  }

  pub async fn get_budget(&self) -> Result<BudgetConfig, cascade_store::Error> {
    self.store.get_budget().await
  }

  pub async fn set_budget(&self, budget: BudgetConfig) -> Result<(), cascade_store::Error> {
    self.store.set_budget(budget).await
  }

  /// Today's accumulated spend.
  pub async fn daily_spend(&self) -> Result<f64, cascade_store::Error> {
    self.store.get_daily_spend(&today()).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn items(estimates: &[f64]) -> Vec<CostEstimateItem> {
    estimates
      .iter()
      .enumerate()
      .map(|(i, estimated)| CostEstimateItem {
        node_id: format!("n{}", i),
        node_type: "model-run".to_string(),
        estimated: *estimated,
      })
      .collect()
  }

  #[tokio::test]
  async fn estimate_within_both_limits() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store
      .set_budget(BudgetConfig {
        per_execution_limit: 10.0,
        daily_limit: 100.0,
      })
      .await
      .unwrap();

    let guard = CostGuard::new(store);
    let estimate = guard.estimate(items(&[2.0, 3.0])).await.unwrap();
    assert!(estimate.within_budget);
    assert_eq!(estimate.total_estimated, 5.0);
    assert_eq!(estimate.reason, None);
  }

  #[tokio::test]
  async fn estimate_violating_per_execution_limit() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store
      .set_budget(BudgetConfig {
        per_execution_limit: 10.0,
        daily_limit: 100.0,
      })
      .await
      .unwrap();

    let guard = CostGuard::new(store);
    let estimate = guard.estimate(items(&[8.0, 4.0])).await.unwrap();
    assert!(!estimate.within_budget);
    assert!(estimate.reason.unwrap().contains("per-execution"));
  }

  #[tokio::test]
  async fn estimate_violating_daily_limit() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store
      .set_budget(BudgetConfig {
        per_execution_limit: 10.0,
        daily_limit: 100.0,
      })
      .await
      .unwrap();
    store.add_daily_spend(&today(), 95.0).await.unwrap();

    let guard = CostGuard::new(store);
    let estimate = guard.estimate(items(&[8.0])).await.unwrap();
    assert!(!estimate.within_budget);
    assert!(estimate.reason.unwrap().contains("daily limit"));

    let estimate = guard.estimate(items(&[4.0])).await.unwrap();
    assert!(estimate.within_budget);
  }

  #[tokio::test]
  async fn record_spend_accumulates() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let guard = CostGuard::new(store);

    guard.record_spend(1.25).await.unwrap();
    guard.record_spend(0.75).await.unwrap();
    assert_eq!(guard.daily_spend().await.unwrap(), 2.0);
  }
}
