use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::HandlerError;

/// Progress callback handed to handlers: `(percent 0..100, message)`.
pub type ProgressFn = Arc<dyn Fn(f64, Option<String>) + Send + Sync>;

/// Everything a handler receives for one execution.
#[derive(Clone)]
pub struct HandlerContext {
  pub node_id: String,
  pub node_type: String,
  pub workflow_id: String,

  /// Inputs resolved from upstream nodes' current outputs.
  pub inputs: serde_json::Map<String, serde_json::Value>,

  /// The node's parameter map, opaque to the engine.
  pub params: serde_json::Map<String, serde_json::Value>,

  /// Cooperative cancellation. Handlers are expected to observe the
  /// signal and return promptly with [`HandlerError::Aborted`].
  pub cancel: CancellationToken,

  /// Forwards to the engine's progress channel.
  pub progress: ProgressFn,
}

/// Outcome tag of a handler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
  Success,
  Error,
}

/// What a handler returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResult {
  pub status: HandlerStatus,

  /// Output values keyed by output port.
  #[serde(default)]
  pub outputs: serde_json::Map<String, serde_json::Value>,

  /// Primary result location (usually a URL).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result_path: Option<String>,

  /// Per-output-key metadata; values may be a URL string or an array of
  /// URL strings.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result_metadata: Option<serde_json::Value>,

  /// Handler-measured duration. The engine falls back to wall clock
  /// when absent.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_ms: Option<i64>,

  #[serde(default)]
  pub cost: f64,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl HandlerResult {
  /// A successful result with no outputs. Callers fill in the rest.
  pub fn success() -> Self {
    Self {
      status: HandlerStatus::Success,
      outputs: serde_json::Map::new(),
      result_path: None,
      result_metadata: None,
      duration_ms: None,
      cost: 0.0,
      error: None,
    }
  }

  /// A failed result with a message.
  pub fn error(message: impl Into<String>) -> Self {
    Self {
      status: HandlerStatus::Error,
      outputs: serde_json::Map::new(),
      result_path: None,
      result_metadata: None,
      duration_ms: None,
      cost: 0.0,
      error: Some(message.into()),
    }
  }
}

/// Result of a handler's synchronous parameter validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validation {
  pub valid: bool,
  #[serde(default)]
  pub errors: Vec<String>,
}

impl Validation {
  pub fn ok() -> Self {
    Self {
      valid: true,
      errors: Vec::new(),
    }
  }

  pub fn fail(errors: Vec<String>) -> Self {
    Self {
      valid: false,
      errors,
    }
  }
}

/// The node capability contract.
///
/// `execute` is async and cancellable; `estimate_cost` and `validate`
/// are pure and synchronous so the request boundary can call them
/// without dispatching anything.
#[async_trait]
pub trait NodeHandler: Send + Sync {
  async fn execute(&self, ctx: HandlerContext) -> Result<HandlerResult, HandlerError>;

  /// Estimated cost of one execution with these params. May vary per
  /// node within a type (e.g. by model id).
  fn estimate_cost(&self, _params: &serde_json::Map<String, serde_json::Value>) -> f64 {
    0.0
  }

  /// Synchronous parameter validation, called at the request boundary
  /// before execution starts.
  fn validate(&self, _params: &serde_json::Map<String, serde_json::Value>) -> Validation {
    Validation::ok()
  }
}
