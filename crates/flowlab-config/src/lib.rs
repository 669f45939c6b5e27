//! Flowlab Config
//!
//! This crate contains the serializable flow definition types for flowlab.
//! A flow is a named, versioned graph of prompt nodes owned by a lab or user.
//! These types represent flow definitions as they are authored and stored,
//! before they are validated and scheduled by the orchestrator.
//!
//! Definitions can be loaded from:
//! - JSON files (via the CLI, `flowlab run flow.json`)
//! - The execution store (as JSON blobs)

mod edge;
mod enums;
mod flow;
mod input;
mod node;

pub use edge::FlowEdge;
pub use enums::{FailurePolicy, RetryBackoff};
pub use flow::{DEFAULT_FLOW_VERSION, FlowDefinition, VariableDef};
pub use input::InputBinding;
pub use node::{FlowNode, Position};
