use std::path::PathBuf;

use async_trait::async_trait;
use drip_config::WorkflowDef;
use tokio::fs;
use tracing::debug;

use crate::error::SourceError;

/// Where workflow documents come from.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
  /// Load the document for a workflow id.
  async fn load(&self, workflow_id: &str) -> Result<WorkflowDef, SourceError>;
}

/// Filesystem-based workflow source.
///
/// Each workflow is stored at `{base_path}/{workflow_id}.json`.
pub struct FsWorkflowSource {
  base_path: PathBuf,
}

impl FsWorkflowSource {
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  fn id_to_path(&self, workflow_id: &str) -> Result<PathBuf, SourceError> {
    let valid = !workflow_id.is_empty()
      && !workflow_id.starts_with('.')
      && !workflow_id.contains(['/', '\\']);
    if !valid {
      return Err(SourceError::InvalidId(workflow_id.to_string()));
    }
    Ok(self.base_path.join(format!("{}.json", workflow_id)))
  }
}

#[async_trait]
impl WorkflowSource for FsWorkflowSource {
  async fn load(&self, workflow_id: &str) -> Result<WorkflowDef, SourceError> {
    let path = self.id_to_path(workflow_id)?;
    let contents = fs::read_to_string(&path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        SourceError::NotFound(workflow_id.to_string())
      } else {
        SourceError::Io(e)
      }
    })?;

    let mut def: WorkflowDef =
      serde_json::from_str(&contents).map_err(|source| SourceError::Parse {
        workflow_id: workflow_id.to_string(),
        source,
      })?;

    // Documents saved by the editor do not always carry their own id
    if def.workflow_id.is_empty() {
      def.workflow_id = workflow_id.to_string();
    }

    debug!(workflow_id, path = %path.display(), nodes = def.nodes.len(), "loaded workflow");
    Ok(def)
  }
}
