use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

use cascade_workflow::{Edge, Node, Position};

/// Authoring status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WorkflowStatus {
  #[default]
  Draft,
  Ready,
  Archived,
}

/// Status of a single node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Success,
  Error,
}

/// A workflow as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRecord {
  pub id: String,
  pub name: String,
  pub status: WorkflowStatus,
  pub graph: Json<cascade_workflow::GraphDefinition>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// A node row. Converted to [`cascade_workflow::Node`] on load.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub(crate) struct NodeRecord {
  pub id: String,
  pub workflow_id: String,
  pub node_type: String,
  pub position_x: f64,
  pub position_y: f64,
  pub params: Json<serde_json::Map<String, serde_json::Value>>,
  pub current_output_id: Option<String>,
}

impl From<NodeRecord> for Node {
  fn from(record: NodeRecord) -> Self {
    Node {
      id: record.id,
      node_type: record.node_type,
      position: Position {
        x: record.position_x,
        y: record.position_y,
      },
      params: record.params.0,
      current_output_id: record.current_output_id,
    }
  }
}

/// An edge row. Converted to [`cascade_workflow::Edge`] on load.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub(crate) struct EdgeRecord {
  pub id: String,
  pub workflow_id: String,
  pub source_node: String,
  pub source_output: String,
  pub target_node: String,
  pub target_input: String,
}

impl From<EdgeRecord> for Edge {
  fn from(record: EdgeRecord) -> Self {
    Edge {
      id: record.id,
      source: record.source_node,
      source_output: record.source_output,
      target: record.target_node,
      target_input: record.target_input,
    }
  }
}

/// One attempt to run a node, with its input/param hashes, outcome, and
/// cost. Immutable once finalized except for score/starred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
  pub id: String,
  pub node_id: String,
  pub workflow_id: String,
  pub input_hash: String,
  pub params_hash: String,
  pub status: ExecutionStatus,
  pub result_path: Option<String>,
  pub result_metadata: Option<Json<serde_json::Value>>,
  pub error_message: Option<String>,
  pub duration_ms: Option<i64>,
  pub cost: f64,
  pub created_at: DateTime<Utc>,
  pub score: Option<i64>,
  pub starred: bool,
}

/// User-chosen spend limits. Stored as a singleton row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BudgetConfig {
  pub per_execution_limit: f64,
  pub daily_limit: f64,
}

impl Default for BudgetConfig {
  fn default() -> Self {
    Self {
      per_execution_limit: 1.0,
      daily_limit: 10.0,
    }
  }
}

/// A model schema record synced from the authoring layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ModelRecord {
  pub id: String,
  pub name: String,
  pub category: Option<String>,
  pub provider: Option<String>,
  pub schema: Json<serde_json::Value>,
  pub synced_at: DateTime<Utc>,
}
