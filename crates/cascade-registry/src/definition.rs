use serde::{Deserialize, Serialize};

/// Data types flowing over edges. Compatibility is an edit-time concern;
/// the execution engine never checks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
  Text,
  Boolean,
  Url,
  Image,
  Video,
  Audio,
  Any,
}

impl DataType {
  /// Whether an output of type `source` may connect to an input of type
  /// `self`. `Any` is bidirectional; `Url` is a supertype of the media
  /// types.
  pub fn accepts(self, source: DataType) -> bool {
    if self == source || self == DataType::Any || source == DataType::Any {
      return true;
    }
    matches!(
      (self, source),
      (
        DataType::Url,
        DataType::Image | DataType::Video | DataType::Audio
      )
    )
  }
}

/// An input or output port declared by a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDef {
  pub key: String,
  pub label: String,
  pub data_type: DataType,
  #[serde(default)]
  pub required: bool,
}

/// A parameter declared by a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDef {
  pub key: String,
  pub label: String,

  /// Widget type for the authoring UI (e.g. "text", "number", "select").
  pub param_type: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<serde_json::Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<serde_json::Value>>,

  /// Data type when the parameter is exposed as a connectable handle.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data_type: Option<DataType>,

  /// Whether an edge may target this parameter (`param-<key>` handles).
  #[serde(default)]
  pub connectable: bool,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// The declaration accompanying each handler: what the node type looks
/// like to the authoring UI and the cost estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeDef {
  /// The type tag nodes carry (e.g. "image-gen", "upscale").
  #[serde(rename = "type")]
  pub node_type: String,

  pub label: String,
  pub category: String,

  #[serde(default)]
  pub inputs: Vec<PortDef>,
  #[serde(default)]
  pub outputs: Vec<PortDef>,
  #[serde(default)]
  pub params: Vec<ParamDef>,

  /// Flat cost per execution, when the type has one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cost_per_execution: Option<f64>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn any_is_bidirectional() {
    assert!(DataType::Any.accepts(DataType::Image));
    assert!(DataType::Text.accepts(DataType::Any));
  }

  #[test]
  fn url_accepts_media() {
    assert!(DataType::Url.accepts(DataType::Image));
    assert!(DataType::Url.accepts(DataType::Video));
    assert!(DataType::Url.accepts(DataType::Audio));
  }

  #[test]
  fn media_does_not_accept_text() {
    assert!(!DataType::Image.accepts(DataType::Text));
    assert!(!DataType::Image.accepts(DataType::Video));
  }
}
