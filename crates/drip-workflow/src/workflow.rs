use std::collections::{HashMap, HashSet};

use drip_config::{NodeDef, NodeKindDef, WorkflowDef};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ValidationError;
use crate::graph::Graph;
use crate::node::{Delay, DelayUnit, EmailContent, Node, NodeKind};

/// Amount used when a delay node leaves `delay` empty.
const DEFAULT_DELAY_AMOUNT: u64 = 1;

/// An immutable workflow snapshot ready for compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  pub nodes: HashMap<String, Node>,
  pub edges: Vec<(String, String)>,
}

impl Workflow {
  /// Convert and validate an editor document.
  pub fn from_def(def: WorkflowDef) -> Result<Self, ValidationError> {
    let mut nodes = HashMap::with_capacity(def.nodes.len());
    for node_def in def.nodes {
      let node = convert_node(node_def)?;
      if nodes.contains_key(&node.node_id) {
        return Err(ValidationError::DuplicateNode {
          node_id: node.node_id,
        });
      }
      nodes.insert(node.node_id.clone(), node);
    }

    let workflow = Self {
      workflow_id: def.workflow_id,
      name: def.name,
      nodes,
      edges: def
        .edges
        .into_iter()
        .map(|e| (e.source, e.target))
        .collect(),
    };
    workflow.validate()?;
    Ok(workflow)
  }

  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(&self.nodes, &self.edges)
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.get(node_id)
  }

  /// Check the structural invariants the compiler relies on.
  pub fn validate(&self) -> Result<(), ValidationError> {
    validate(self)
  }
}

/// Validate a workflow graph.
///
/// Cycles and isolated nodes are allowed; the compiler handles both.
pub fn validate(workflow: &Workflow) -> Result<(), ValidationError> {
  if workflow.nodes.is_empty() {
    return Err(ValidationError::EmptyGraph);
  }

  for (key, node) in &workflow.nodes {
    if *key != node.node_id {
      return Err(ValidationError::OrphanNode {
        node_id: node.node_id.clone(),
      });
    }
    if matches!(&node.kind, NodeKind::Delay(delay) if delay.amount == 0) {
      return Err(ValidationError::InvalidDelay {
        node_id: node.node_id.clone(),
      });
    }
  }

  let node_ids: HashSet<&str> = workflow.nodes.keys().map(String::as_str).collect();
  for (from, to) in &workflow.edges {
    if !node_ids.contains(from.as_str()) || !node_ids.contains(to.as_str()) {
      return Err(ValidationError::DanglingEdge {
        from: from.clone(),
        to: to.clone(),
      });
    }
  }

  Ok(())
}

fn convert_node(def: NodeDef) -> Result<Node, ValidationError> {
  let kind = match def.kind {
    NodeKindDef::LeadSource => NodeKind::LeadSource,
    NodeKindDef::Delay => {
      let amount = match &def.data.delay {
        Some(raw) => raw.value().ok_or_else(|| ValidationError::InvalidDelay {
          node_id: def.id.clone(),
        })?,
        None => DEFAULT_DELAY_AMOUNT,
      };
      let (unit, fell_back) = DelayUnit::from_label(def.data.unit.as_deref());
      if fell_back {
        warn!(
          node_id = %def.id,
          unit = ?def.data.unit,
          "unrecognized delay unit, treating as days"
        );
      }
      NodeKind::Delay(Delay { amount, unit })
    }
    NodeKindDef::ColdEmail => NodeKind::Email(EmailContent {
      subject: def.data.subject.unwrap_or_default(),
      body: def.data.message.unwrap_or_default(),
    }),
  };

  Ok(Node {
    node_id: def.id,
    kind,
  })
}
