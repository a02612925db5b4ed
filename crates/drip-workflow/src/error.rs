use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("workflow has no nodes")]
  EmptyGraph,

  #[error("edge references unknown node: from={from}, to={to}")]
  DanglingEdge { from: String, to: String },

  #[error("node '{node_id}' is stored under a different key and cannot be addressed")]
  OrphanNode { node_id: String },

  #[error("duplicate node id: {node_id}")]
  DuplicateNode { node_id: String },

  #[error("delay node '{node_id}' must have a positive whole-number amount")]
  InvalidDelay { node_id: String },
}
