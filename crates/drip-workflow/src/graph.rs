use std::collections::{HashMap, HashSet};

use crate::node::{Node, NodeKind};

/// Graph structure for traversal.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: node_id -> downstream node_ids, in edge-list order.
  adjacency: HashMap<String, Vec<String>>,
  /// Lead sources plus nodes with no incoming edges, sorted by id.
  entry_points: Vec<String>,
}

impl Graph {
  /// Build a graph from nodes and edges.
  pub fn new(nodes: &HashMap<String, Node>, edges: &[(String, String)]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut has_incoming: HashSet<&str> = HashSet::new();

    for node_id in nodes.keys() {
      adjacency.entry(node_id.clone()).or_default();
    }

    for (from, to) in edges {
      adjacency.entry(from.clone()).or_default().push(to.clone());
      has_incoming.insert(to.as_str());
    }

    // Typed lead sources, plus untyped roots for older documents
    let mut entry_points: Vec<String> = nodes
      .iter()
      .filter(|(id, node)| {
        matches!(node.kind, NodeKind::LeadSource)
          || !has_incoming.contains(id.as_str())
      })
      .map(|(id, _)| id.clone())
      .collect();
    entry_points.sort();

    Self {
      adjacency,
      entry_points,
    }
  }

  /// Get entry points (lead sources and nodes with no incoming edges).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }
}
