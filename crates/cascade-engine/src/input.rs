//! Input resolution.
//!
//! Before a node runs, its inputs are assembled from upstream nodes'
//! current outputs. Each in-edge contributes one value, routed by the
//! target handle string:
//!
//! - `name[i]` — staged at index `i` and merged into an array with no
//!   null gaps
//! - `param-x` / `input-x` — keyed `x`; arrays stay arrays, everything
//!   else is coerced to a string
//! - anything else — the handle itself is the key, value passed as-is
//!
//! The resolver makes no type-compatibility decisions; those were made
//! at edit time.

use std::collections::{BTreeMap, HashMap};

use cascade_store::{Error as StoreError, ExecutionRecord, SqliteStore};
use cascade_workflow::{Edge, Node};

/// Fallback metadata key consulted when the source output key is absent.
const RESULT_URL_KEY: &str = "resultUrl";

/// Resolve the input map for `node_id` from its in-edges and the current
/// outputs of upstream nodes. Edges whose source has no current output,
/// whose execution is gone, or whose execution carries no usable value
/// are skipped.
pub async fn resolve_inputs(
  node_id: &str,
  edges: &[Edge],
  nodes: &HashMap<String, Node>,
  store: &SqliteStore,
) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
  let mut inputs = serde_json::Map::new();
  let mut staged: BTreeMap<String, BTreeMap<usize, serde_json::Value>> = BTreeMap::new();

  for edge in edges.iter().filter(|e| e.target == node_id) {
    let Some(source) = nodes.get(&edge.source) else {
      continue;
    };
    let Some(output_id) = &source.current_output_id else {
      continue;
    };

    let execution = match store.get_execution(output_id).await {
      Ok(execution) => execution,
      Err(StoreError::NotFound(_)) => continue,
      Err(e) => return Err(e),
    };

    let Some(value) = extract_output(&execution, &edge.source_output) else {
      continue;
    };

    if let Some((name, index)) = parse_array_handle(&edge.target_input) {
      staged.entry(name).or_default().insert(index, value);
    } else if let Some(key) = edge
      .target_input
      .strip_prefix("param-")
      .or_else(|| edge.target_input.strip_prefix("input-"))
    {
      let routed = if value.is_array() {
        value
      } else {
        serde_json::Value::String(value_to_string(&value))
      };
      inputs.insert(key.to_string(), routed);
    } else {
      inputs.insert(edge.target_input.clone(), value);
    }
  }

  // Merge staged array slots in index order, compressing gaps.
  for (name, slots) in staged {
    let items: Vec<serde_json::Value> = slots.into_values().collect();
    inputs.insert(name, serde_json::Value::Array(items));
  }

  Ok(inputs)
}

/// Extract an upstream execution's output value: the metadata entry for
/// the source output key, falling back to `resultUrl`, falling back to
/// the execution's result path.
///
/// Each fallback applies only when the key is missing entirely. A key
/// that is present with an explicit null resolves to null.
fn extract_output(execution: &ExecutionRecord, output_key: &str) -> Option<serde_json::Value> {
  if let Some(metadata) = &execution.result_metadata {
    for key in [output_key, RESULT_URL_KEY] {
      if let Some(value) = metadata.0.get(key) {
        return Some(value.clone());
      }
    }
  }
  execution
    .result_path
    .clone()
    .map(serde_json::Value::String)
}

/// Parse an array-indexed handle: `"frames[2]"` -> `("frames", 2)`.
fn parse_array_handle(handle: &str) -> Option<(String, usize)> {
  let open = handle.find('[')?;
  let close = handle.strip_suffix(']')?;
  let index: usize = close[open + 1..].parse().ok()?;
  if open == 0 {
    return None;
  }
  Some((handle[..open].to_string(), index))
}

fn value_to_string(value: &serde_json::Value) -> String {
  match value {
    serde_json::Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
