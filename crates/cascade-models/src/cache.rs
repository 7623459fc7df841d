use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use tokio::sync::RwLock;

use cascade_store::{Error as StoreError, ModelRecord, SqliteStore};

use crate::search::fuzzy_score;

/// A model as delivered by the authoring layer's bulk sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
  pub schema: serde_json::Value,
}

/// Read-through cache of model schemas.
///
/// Schema lookups are served from memory after the first load; list and
/// search go to the store, which a sync keeps current.
pub struct ModelCache {
  store: Arc<SqliteStore>,
  schemas: RwLock<HashMap<String, serde_json::Value>>,
}

impl ModelCache {
  pub fn new(store: Arc<SqliteStore>) -> Self {
    Self {
      store,
      schemas: RwLock::new(HashMap::new()),
    }
  }

  /// Bulk-ingest models from the authoring layer. Returns how many were
  /// written. Cached schemas for the synced ids are invalidated.
  pub async fn sync(&self, models: Vec<ModelInfo>) -> Result<usize, StoreError> {
    let now = Utc::now();
    let records: Vec<ModelRecord> = models
      .into_iter()
      .map(|model| ModelRecord {
        id: model.id,
        name: model.name,
        category: model.category,
        provider: model.provider,
        schema: Json(model.schema),
        synced_at: now,
      })
      .collect();

    self.store.upsert_models(&records).await?;

    let mut schemas = self.schemas.write().await;
    for record in &records {
      schemas.remove(&record.id);
    }
    Ok(records.len())
  }

  /// All synced models, by name.
  pub async fn list(&self) -> Result<Vec<ModelRecord>, StoreError> {
    self.store.list_models().await
  }

  /// Fuzzy search over model names and ids, with optional exact
  /// category/provider filters. Results are ordered best match first.
  pub async fn search(
    &self,
    query: &str,
    category: Option<&str>,
    provider: Option<&str>,
  ) -> Result<Vec<ModelRecord>, StoreError> {
    let models = self.store.list_models().await?;

    let mut scored: Vec<(u32, ModelRecord)> = models
      .into_iter()
      .filter(|model| {
        category.is_none_or(|c| model.category.as_deref().is_some_and(|mc| mc.eq_ignore_ascii_case(c)))
      })
      .filter(|model| {
        provider.is_none_or(|p| model.provider.as_deref().is_some_and(|mp| mp.eq_ignore_ascii_case(p)))
      })
      .filter_map(|model| {
        let score = fuzzy_score(query, &model.name)
          .into_iter()
          .chain(fuzzy_score(query, &model.id))
          .max()?;
        Some((score, model))
      })
      .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
    Ok(scored.into_iter().map(|(_, model)| model).collect())
  }

  /// Get a model's schema, reading through to the store on first use.
  pub async fn schema(&self, id: &str) -> Result<Option<serde_json::Value>, StoreError> {
    {
      let schemas = self.schemas.read().await;
      if let Some(schema) = schemas.get(id) {
        return Ok(Some(schema.clone()));
      }
    }

    let Some(record) = self.store.get_model(id).await? else {
      return Ok(None);
    };

    let schema = record.schema.0;
    self
      .schemas
      .write()
      .await
      .insert(id.to_string(), schema.clone());
    Ok(Some(schema))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sample_models() -> Vec<ModelInfo> {
    vec![
      ModelInfo {
        id: "flux-dev".to_string(),
        name: "Flux Dev".to_string(),
        category: Some("image".to_string()),
        provider: Some("wavespeed".to_string()),
        schema: json!({"params": {"steps": {"type": "integer"}}}),
      },
      ModelInfo {
        id: "flux-schnell".to_string(),
        name: "Flux Schnell".to_string(),
        category: Some("image".to_string()),
        provider: Some("wavespeed".to_string()),
        schema: json!({"params": {}}),
      },
      ModelInfo {
        id: "veo-3".to_string(),
        name: "Veo 3".to_string(),
        category: Some("video".to_string()),
        provider: Some("google".to_string()),
        schema: json!({"params": {"duration": {"type": "integer"}}}),
      },
    ]
  }

  async fn cache_with_samples() -> ModelCache {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let cache = ModelCache::new(store);
    cache.sync(sample_models()).await.unwrap();
    cache
  }

  #[tokio::test]
  async fn sync_then_list() {
    let cache = cache_with_samples().await;
    let models = cache.list().await.unwrap();
    assert_eq!(models.len(), 3);
  }

  #[tokio::test]
  async fn search_filters_by_category() {
    let cache = cache_with_samples().await;
    let hits = cache.search("", Some("video"), None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "veo-3");
  }

  #[tokio::test]
  async fn search_ranks_fuzzy_matches() {
    let cache = cache_with_samples().await;
    let hits = cache.search("flux", None, None).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|m| m.id.starts_with("flux")));
  }

  #[tokio::test]
  async fn schema_reads_through_and_caches() {
    let cache = cache_with_samples().await;
    let schema = cache.schema("flux-dev").await.unwrap().unwrap();
    assert_eq!(schema["params"]["steps"]["type"], "integer");

    // Second read is served from memory.
    assert!(cache.schemas.read().await.contains_key("flux-dev"));
    assert!(cache.schema("missing").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn resync_replaces_and_invalidates() {
    let cache = cache_with_samples().await;
    cache.schema("flux-dev").await.unwrap();

    let mut updated = sample_models();
    updated[0].schema = json!({"params": {"steps": {"type": "number"}}});
    cache.sync(updated).await.unwrap();

    let schema = cache.schema("flux-dev").await.unwrap().unwrap();
    assert_eq!(schema["params"]["steps"]["type"], "number");
  }
}
