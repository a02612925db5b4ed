//! Drip Workflow
//!
//! This crate provides the typed workflow representation for drip.
//! A workflow is the validated form of a [`drip_config::WorkflowDef`]
//! that the schedule compiler can walk without further checks.
//!
//! Key differences from `drip-config`:
//! - Node kinds are a closed sum type ([`NodeKind`]) instead of string tags
//! - Delay amounts are parsed and units normalized to [`DelayUnit`]
//! - Every edge is known to reference existing nodes
//! - Entry points are identified by the [`Graph`] index

mod error;
mod graph;
mod node;
mod workflow;

pub use error::ValidationError;
pub use graph::Graph;
pub use node::{Delay, DelayUnit, EmailContent, Node, NodeKind};
pub use workflow::{Workflow, validate};
