use serde::{Deserialize, Serialize};

/// A directed connection between two nodes, as saved by the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub source: String,
  pub target: String,
}

impl Edge {
  pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      id: None,
      source: source.into(),
      target: target.into(),
    }
  }
}
