//! Workflow export and import.
//!
//! A workflow exports as a versioned JSON envelope around its graph
//! definition. Import tolerates either the envelope or a bare
//! `{nodes, edges}` object, allocates fresh ids for the workflow and
//! every node, and rewrites edges against the remapped ids — an exported
//! id is never reused.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::GraphDefinition;

/// Version string written into every export envelope.
pub const EXPORT_VERSION: &str = "1.0";

/// Errors that can occur while parsing an import payload.
#[derive(Debug, Error)]
pub enum ExportError {
  /// The payload is not valid JSON for either accepted shape.
  #[error("invalid workflow export: {0}")]
  InvalidPayload(#[from] serde_json::Error),

  /// The payload parsed but contains no graph definition.
  #[error("workflow export contains no graph definition")]
  MissingGraph,
}

/// The export envelope written by [`export_workflow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExport {
  pub version: String,
  pub id: String,
  pub name: String,
  pub exported_at: DateTime<Utc>,
  pub graph_definition: GraphDefinition,
}

/// Build the export envelope for a workflow.
pub fn export_workflow(id: &str, name: &str, graph: &GraphDefinition) -> WorkflowExport {
  WorkflowExport {
    version: EXPORT_VERSION.to_string(),
    id: id.to_string(),
    name: name.to_string(),
    exported_at: Utc::now(),
    graph_definition: graph.clone(),
  }
}

/// Parsed import payload: the exported name (when the envelope form was
/// used) and the graph definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportPayload {
  pub name: Option<String>,
  pub graph: GraphDefinition,
}

/// Parse an import payload, accepting either the export envelope or a
/// bare `{nodes, edges}` object.
pub fn parse_import(json: &serde_json::Value) -> Result<ImportPayload, ExportError> {
  if json.get("graphDefinition").is_some() {
    let export: WorkflowExport = serde_json::from_value(json.clone())?;
    return Ok(ImportPayload {
      name: Some(export.name),
      graph: export.graph_definition,
    });
  }

  if json.get("nodes").is_some() || json.get("edges").is_some() {
    let graph: GraphDefinition = serde_json::from_value(json.clone())?;
    return Ok(ImportPayload { name: None, graph });
  }

  Err(ExportError::MissingGraph)
}

/// Allocate fresh ids for every node (and edge) in the graph, rewriting
/// edge endpoints against the remapped node ids. Current-output pointers
/// are dropped — execution history does not travel with an export.
pub fn remap_graph_ids(graph: &GraphDefinition) -> GraphDefinition {
  let id_map: HashMap<&str, String> = graph
    .nodes
    .iter()
    .map(|node| (node.id.as_str(), uuid::Uuid::new_v4().to_string()))
    .collect();

  let nodes = graph
    .nodes
    .iter()
    .map(|node| {
      let mut remapped = node.clone();
      if let Some(new_id) = id_map.get(node.id.as_str()) {
        remapped.id = new_id.clone();
      }
      remapped.current_output_id = None;
      remapped
    })
    .collect();

  let edges = graph
    .edges
    .iter()
    .filter(|edge| id_map.contains_key(edge.source.as_str()) && id_map.contains_key(edge.target.as_str()))
    .map(|edge| {
      let mut remapped = edge.clone();
      remapped.id = uuid::Uuid::new_v4().to_string();
      remapped.source = id_map[edge.source.as_str()].clone();
      remapped.target = id_map[edge.target.as_str()].clone();
      remapped
    })
    .collect();

  GraphDefinition { nodes, edges }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::edge::Edge;
  use crate::node::Node;
  use serde_json::json;

  fn two_node_graph() -> GraphDefinition {
    GraphDefinition {
      nodes: vec![
        Node {
          id: "n1".to_string(),
          node_type: "image-gen".to_string(),
          position: Default::default(),
          params: Default::default(),
          current_output_id: Some("exec-1".to_string()),
        },
        Node {
          id: "n2".to_string(),
          node_type: "upscale".to_string(),
          position: Default::default(),
          params: Default::default(),
          current_output_id: None,
        },
      ],
      edges: vec![Edge {
        id: "e1".to_string(),
        source: "n1".to_string(),
        source_output: "image".to_string(),
        target: "n2".to_string(),
        target_input: "param-image".to_string(),
      }],
    }
  }

  #[test]
  fn export_round_trips_through_json() {
    let graph = two_node_graph();
    let export = export_workflow("wf-1", "My Pipeline", &graph);
    let json = serde_json::to_value(&export).unwrap();

    assert_eq!(json["version"], "1.0");
    let payload = parse_import(&json).unwrap();
    assert_eq!(payload.name.as_deref(), Some("My Pipeline"));
    assert_eq!(payload.graph, graph);
  }

  #[test]
  fn import_accepts_bare_graph() {
    let json = json!({
      "nodes": [{"id": "a", "type": "image-gen"}],
      "edges": [],
    });
    let payload = parse_import(&json).unwrap();
    assert_eq!(payload.name, None);
    assert_eq!(payload.graph.nodes.len(), 1);
  }

  #[test]
  fn import_rejects_unrecognized_shape() {
    let json = json!({"something": "else"});
    assert!(matches!(
      parse_import(&json),
      Err(ExportError::MissingGraph)
    ));
  }

  #[test]
  fn remap_allocates_fresh_ids_and_rewrites_edges() {
    let graph = two_node_graph();
    let remapped = remap_graph_ids(&graph);

    assert_ne!(remapped.nodes[0].id, "n1");
    assert_ne!(remapped.nodes[1].id, "n2");
    assert_eq!(remapped.edges.len(), 1);
    assert_eq!(remapped.edges[0].source, remapped.nodes[0].id);
    assert_eq!(remapped.edges[0].target, remapped.nodes[1].id);
    // History never travels with an export.
    assert_eq!(remapped.nodes[0].current_output_id, None);
  }

  #[test]
  fn remap_drops_edges_with_unknown_endpoints() {
    let mut graph = two_node_graph();
    graph.edges.push(Edge {
      id: "e2".to_string(),
      source: "ghost".to_string(),
      source_output: "out".to_string(),
      target: "n2".to_string(),
      target_input: "param-x".to_string(),
    });
    let remapped = remap_graph_ids(&graph);
    assert_eq!(remapped.edges.len(), 1);
  }
}
