//! Drip Compiler
//!
//! Turns a validated [`Workflow`](drip_workflow::Workflow) and one recipient
//! into a flat list of [`JobDraft`]s, each carrying the absolute time its
//! email should go out.
//!
//! # Traversal
//!
//! ```text
//! for each entry point (sorted by id):
//!   queue = [(entry, 0h)]; seen = {}
//!   while let Some((node, delay)) = queue.pop_front():
//!     skip if node in seen
//!     Email      -> emit draft at start + delay
//!     Delay      -> delay += amount in hours
//!     LeadSource -> (no effect)
//!     push (target, delay) for every outgoing edge, in edge-list order
//! ```
//!
//! The seen-set is scoped to one entry point's run. Within a run the first
//! arrival at a node wins; later arrivals are dropped, which is what makes
//! cyclic graphs terminate.

mod compile;
mod error;

pub use compile::{JobDraft, compile};
pub use error::GraphError;
