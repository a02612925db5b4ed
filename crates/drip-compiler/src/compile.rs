use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};
use drip_workflow::{Graph, NodeKind, Workflow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GraphError;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// One email to send, with its absolute send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDraft {
  /// The email node that produced this draft.
  pub node_id: String,
  pub recipient: String,
  pub subject: String,
  pub body: String,
  pub send_at: DateTime<Utc>,
  /// Delay accumulated along the path, in hours.
  pub delay_hours: f64,
}

/// A queued node plus the delay accumulated on the way to it.
#[derive(Debug, Clone, Copy)]
struct WorkItem<'a> {
  node_id: &'a str,
  delay_hours: f64,
}

/// Compile a workflow into send drafts for one recipient.
///
/// Compilation is all-or-nothing: on error no drafts are returned.
pub fn compile(
  workflow: &Workflow,
  recipient: &str,
  start: DateTime<Utc>,
) -> Result<Vec<JobDraft>, GraphError> {
  workflow.validate()?;

  let graph = workflow.graph();
  let mut drafts = Vec::new();

  for entry in graph.entry_points() {
    let before = drafts.len();
    walk_from(workflow, &graph, entry, recipient, start, &mut drafts)?;
    debug!(
      workflow_id = %workflow.workflow_id,
      entry = %entry,
      drafts = drafts.len() - before,
      "compiled entry point"
    );
  }

  Ok(drafts)
}

/// Breadth-first walk from one entry point.
fn walk_from<'a>(
  workflow: &'a Workflow,
  graph: &'a Graph,
  entry: &'a str,
  recipient: &str,
  start: DateTime<Utc>,
  drafts: &mut Vec<JobDraft>,
) -> Result<(), GraphError> {
  let mut seen: HashSet<&str> = HashSet::new();
  let mut queue = VecDeque::from([WorkItem {
    node_id: entry,
    delay_hours: 0.0,
  }]);

  while let Some(item) = queue.pop_front() {
    if !seen.insert(item.node_id) {
      continue;
    }
    let Some(node) = workflow.get_node(item.node_id) else {
      continue;
    };

    let outgoing_delay = match &node.kind {
      NodeKind::Email(content) => {
        let send_at = offset(start, item.delay_hours, item.node_id)?;
        debug!(
          node_id = %item.node_id,
          delay_hours = item.delay_hours,
          send_at = %send_at,
          "emitting send draft"
        );
        drafts.push(JobDraft {
          node_id: node.node_id.clone(),
          recipient: recipient.to_string(),
          subject: content.subject.clone(),
          body: content.body.clone(),
          send_at,
          delay_hours: item.delay_hours,
        });
        item.delay_hours
      }
      NodeKind::Delay(delay) => item.delay_hours + delay.hours(),
      NodeKind::LeadSource => item.delay_hours,
    };

    for target in graph.downstream(item.node_id) {
      if !seen.contains(target.as_str()) {
        queue.push_back(WorkItem {
          node_id: target,
          delay_hours: outgoing_delay,
        });
      }
    }
  }

  Ok(())
}

/// `start + hours`, rounded to the millisecond.
fn offset(start: DateTime<Utc>, hours: f64, node_id: &str) -> Result<DateTime<Utc>, GraphError> {
  let out_of_range = || GraphError::SendTimeOutOfRange {
    node_id: node_id.to_string(),
  };

  let millis = (hours * MILLIS_PER_HOUR).round();
  if !millis.is_finite() || millis >= i64::MAX as f64 {
    return Err(out_of_range());
  }

  let delta = TimeDelta::try_milliseconds(millis as i64).ok_or_else(out_of_range)?;
  start.checked_add_signed(delta).ok_or_else(out_of_range)
}
