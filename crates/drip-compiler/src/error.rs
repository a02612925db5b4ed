use drip_workflow::ValidationError;

/// Errors that abort a compilation. No drafts are returned on error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
  /// The workflow failed structural validation.
  #[error("invalid workflow graph: {0}")]
  Invalid(#[from] ValidationError),

  /// The accumulated delay pushes the send time past the representable range.
  #[error("send time for node '{node_id}' is out of range")]
  SendTimeOutOfRange { node_id: String },
}
