use serde::{Deserialize, Serialize};

/// 2-D canvas position of a node. Opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}

/// A node in a workflow graph.
///
/// Nodes carry no persistent status. Status is a transient, per-session
/// property emitted by the engine while a client is subscribed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
  pub id: String,

  /// Type tag resolved against the node registry at dispatch time.
  #[serde(rename = "type")]
  pub node_type: String,

  #[serde(default)]
  pub position: Position,

  /// Opaque parameter map handed to the node's handler.
  #[serde(default)]
  pub params: serde_json::Map<String, serde_json::Value>,

  /// The execution designated as this node's live output, consumed by
  /// downstream nodes. When non-null it points at an execution belonging
  /// to this same node.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub current_output_id: Option<String>,
}
