use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::definition::NodeTypeDef;
use crate::handler::NodeHandler;

/// A handler paired with its declaration.
#[derive(Clone)]
pub struct RegisteredNodeType {
  pub definition: NodeTypeDef,
  pub handler: Arc<dyn NodeHandler>,
}

/// Maps node-type tags to their handler and declaration.
///
/// Registration happens once at startup; lookups happen on every
/// dispatch. A missing tag at dispatch is a programming error surfaced
/// by the engine, not by the registry.
#[derive(Default)]
pub struct NodeRegistry {
  entries: RwLock<HashMap<String, RegisteredNodeType>>,
}

impl NodeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a node type. Re-registering a tag replaces the previous
  /// entry.
  pub fn register(&self, definition: NodeTypeDef, handler: Arc<dyn NodeHandler>) {
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.insert(
      definition.node_type.clone(),
      RegisteredNodeType {
        definition,
        handler,
      },
    );
  }

  /// Look up the handler for a node type.
  pub fn handler(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
    let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
    entries.get(node_type).map(|entry| Arc::clone(&entry.handler))
  }

  /// Look up the declaration for a node type.
  pub fn definition(&self, node_type: &str) -> Option<NodeTypeDef> {
    let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
    entries.get(node_type).map(|entry| entry.definition.clone())
  }

  /// All registered declarations.
  pub fn definitions(&self) -> Vec<NodeTypeDef> {
    let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
    entries.values().map(|entry| entry.definition.clone()).collect()
  }
}
