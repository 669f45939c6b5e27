//! Flowlab Workflow
//!
//! This crate provides the execution-time view of a flow definition:
//!
//! - [`FlowGraph`]: an arena-indexed adjacency structure built once per
//!   execution and shared read-only across node tasks
//! - [`Validator`]: single-pass diagnostics (dangling edges, cycles,
//!   unresolvable bindings) run before any node executes
//! - [`expr`]: minijinja templates, expressions and edge conditions

mod error;
pub mod expr;
mod graph;
mod validate;

pub use error::WorkflowError;
pub use graph::{DanglingEdge, FlowGraph, GraphEdge};
pub use validate::{IssueKind, NODES_CONTEXT_KEY, ValidationIssue, ValidationReport, Validator};
