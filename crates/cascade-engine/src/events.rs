//! Status events and notifiers.
//!
//! Node status is an event stream, not a column: it exists only while a
//! client is subscribed, and re-subscribers receive no backlog. The
//! engine publishes through a [`StatusNotifier`]; implementations decide
//! how events reach the UI.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Transient per-session status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
  Idle,
  Running,
  Confirmed,
  Unconfirmed,
  Error,
}

/// Whether an edge currently carries data from its source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeStatus {
  NoData,
  HasData,
}

/// Events published during execution.
///
/// Ordering per (workflow, node) is preserved; across nodes only the
/// scheduler's level structure implies any ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EngineEvent {
  NodeStatus {
    workflow_id: String,
    node_id: String,
    status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
  },
  EdgeStatus {
    workflow_id: String,
    edge_id: String,
    status: EdgeStatus,
  },
  Progress {
    workflow_id: String,
    node_id: String,
    /// 0..100.
    progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
  },
}

/// Trait for receiving engine events.
///
/// The engine calls `notify` for each event - implementations decide
/// what to do with them (broadcast, log, ignore, etc.).
pub trait StatusNotifier: Send + Sync + 'static {
  fn notify(&self, event: EngineEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl StatusNotifier for NoopNotifier {
  fn notify(&self, _event: EngineEvent) {
    // Intentionally empty
  }
}

/// Fan-out notifier over a tokio broadcast channel.
///
/// Every subscriber sees every event in publication order. Delivery is
/// best-effort: a receiver that lags past the channel capacity drops the
/// oldest events, which the transport layer tolerates.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
  sender: broadcast::Sender<EngineEvent>,
}

impl BroadcastNotifier {
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity);
    Self { sender }
  }

  /// Subscribe to all future events.
  pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
    self.sender.subscribe()
  }
}

impl Default for BroadcastNotifier {
  fn default() -> Self {
    Self::new(256)
  }
}

impl StatusNotifier for BroadcastNotifier {
  fn notify(&self, event: EngineEvent) {
    // Send errors just mean nobody is subscribed right now.
    let _ = self.sender.send(event);
  }
}
