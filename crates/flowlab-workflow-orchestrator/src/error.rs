//! Error types for flow orchestration.

use flowlab_workflow::ValidationReport;
use thiserror::Error;

/// Errors that abort a flow execution call.
///
/// Node-level failures never surface here; they are recorded on the node
/// execution and reflected in the [`FlowExecutionResult`](crate::FlowExecutionResult).
#[derive(Debug, Error)]
pub enum OrchestratorError {
  /// The definition failed validation. Nothing was executed or stored.
  #[error("invalid flow definition '{flow_id}': {}", report.summary())]
  InvalidFlowDefinition {
    flow_id: String,
    report: ValidationReport,
  },

  /// The flow is marked inactive.
  #[error("flow '{flow_id}' is inactive")]
  InactiveFlow { flow_id: String },

  /// A variable declared `required` was not supplied and has no default.
  #[error("flow '{flow_id}' requires input variable '{variable}'")]
  MissingRequiredVariable { flow_id: String, variable: String },

  /// Reading or writing execution state failed.
  #[error("store error: {0}")]
  Store(#[from] flowlab_store::Error),

  /// A spawned node task could not be joined.
  #[error("node task join error: {message}")]
  TaskJoin { message: String },
}

/// Failure to assemble a node's inputs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputResolutionError {
  #[error("node '{node_id}': input '{input}' needs variable '{variable}' which was not provided")]
  MissingVariable {
    node_id: String,
    input: String,
    variable: String,
  },

  #[error("node '{node_id}': input '{input}' needs the output of '{source_node}' which is not available")]
  MissingOutput {
    node_id: String,
    input: String,
    source_node: String,
  },

  #[error("node '{node_id}': input '{input}': path '{path}' not found in the output of '{source_node}'")]
  MissingPath {
    node_id: String,
    input: String,
    source_node: String,
    path: String,
  },

  #[error("node '{node_id}': input '{input}' is not fed by any active edge mapping")]
  MissingEdgeValue { node_id: String, input: String },

  #[error("node '{node_id}': input '{input}': {message}")]
  Template {
    node_id: String,
    input: String,
    message: String,
  },
}
