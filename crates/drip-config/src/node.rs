use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  #[serde(alias = "node_id")]
  pub id: String,
  #[serde(rename = "type")]
  pub kind: NodeKindDef,
  #[serde(default)]
  pub data: NodeData,
  /// Canvas position; editor metadata only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub position: Option<Position>,
}

/// Node type tag as written by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKindDef {
  LeadSource,
  Delay,
  #[serde(alias = "email")]
  ColdEmail,
}

/// Free-form node payload. Which fields matter depends on the node type:
/// delays read `delay` and `unit`, emails read `subject` and `message`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub delay: Option<DelayAmount>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub unit: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
}

/// Delay amount. The editor stores it as a string; hand-written documents
/// usually use a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelayAmount {
  Number(u64),
  Text(String),
}

impl DelayAmount {
  /// The numeric value, or `None` if the text form is not an unsigned integer.
  pub fn value(&self) -> Option<u64> {
    match self {
      DelayAmount::Number(n) => Some(*n),
      DelayAmount::Text(s) => s.trim().parse().ok(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}
