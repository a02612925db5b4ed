//! Drip Config
//!
//! This crate contains the serializable workflow document types for drip.
//! These types mirror the JSON the sequence editor saves: a flat list of
//! nodes (lead sources, delays, emails) and the edges between them.
//!
//! Documents can be loaded from:
//! - JSON files (via CLI with `drip compile workflow.json`)
//! - A workflow directory keyed by workflow id
//!
//! The `drip-workflow` crate converts these documents into the typed,
//! validated graph the schedule compiler walks.

mod edge;
mod node;
mod workflow;

pub use edge::Edge;
pub use node::{DelayAmount, NodeData, NodeDef, NodeKindDef, Position};
pub use workflow::WorkflowDef;
