use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::node::Node;

/// The full serialized graph of a workflow, as produced by the authoring
/// UI. Redundant with the node/edge tables; the store updates both
/// atomically on save.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
  #[serde(default)]
  pub nodes: Vec<Node>,
  #[serde(default)]
  pub edges: Vec<Edge>,
}

impl GraphDefinition {
  /// Node ids in definition order.
  pub fn node_ids(&self) -> Vec<String> {
    self.nodes.iter().map(|n| n.id.clone()).collect()
  }

  /// Edge endpoint pairs for the scheduling functions.
  pub fn edge_pairs(&self) -> Vec<(String, String)> {
    self.edges.iter().map(|e| e.endpoints()).collect()
  }
}
