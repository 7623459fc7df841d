use serde::{Deserialize, Serialize};

/// A directed connection from a source node's output handle to a target
/// node's input handle.
///
/// The tuple (source, source_output, target, target_input) is unique
/// within a workflow. The target handle string encodes how the value is
/// routed into the handler's inputs (`param-x`, `input-x`, `name[i]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
  pub id: String,
  pub source: String,
  pub source_output: String,
  pub target: String,
  pub target_input: String,
}

impl Edge {
  /// The (source, target) pair used by the scheduling functions.
  pub fn endpoints(&self) -> (String, String) {
    (self.source.clone(), self.target.clone())
  }
}
