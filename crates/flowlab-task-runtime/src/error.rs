//! Error types for node execution.

/// Errors returned by a node-type executor.
///
/// The orchestrator records these on the node execution; they never abort a
/// flow on their own.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  /// The node's `config` does not match what the executor expects.
  #[error("invalid node config: {message}")]
  InvalidConfig { message: String },

  /// A template or expression failed to evaluate.
  #[error("expression failed: {message}")]
  Expression { message: String },

  /// The model provider reported a failure.
  #[error("model provider failed: {source}")]
  Provider {
    #[source]
    source: ProviderError,
  },

  /// Execution was cancelled before it could complete.
  #[error("node cancelled")]
  Cancelled,

  /// Any other executor failure.
  #[error("{message}")]
  Failed { message: String },
}

impl NodeError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }

  pub fn invalid_config(message: impl Into<String>) -> Self {
    Self::InvalidConfig {
      message: message.into(),
    }
  }
}

impl From<ProviderError> for NodeError {
  fn from(source: ProviderError) -> Self {
    Self::Provider { source }
  }
}

impl From<flowlab_workflow::WorkflowError> for NodeError {
  fn from(e: flowlab_workflow::WorkflowError) -> Self {
    Self::Expression {
      message: e.to_string(),
    }
  }
}

/// Errors returned by a [`ModelProvider`](crate::ModelProvider).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
  /// Neither an inline body nor a known template id was supplied.
  #[error("template not found: {0}")]
  TemplateNotFound(String),

  /// The template could not be rendered with the given variables.
  #[error("failed to render template: {message}")]
  Render { message: String },

  /// The request could not be sent or the connection failed.
  #[error("request failed: {message}")]
  Request { message: String },

  /// The provider answered with an error status.
  #[error("provider rejected request ({status}): {message}")]
  Rejected { status: u16, message: String },

  /// The provider answered with a body we could not interpret.
  #[error("invalid provider response: {message}")]
  InvalidResponse { message: String },
}
