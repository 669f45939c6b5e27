use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("cyclic dependency: {chain}")]
  CyclicDependency { chain: String },

  #[error("invalid expression '{source_text}': {message}")]
  Expression {
    source_text: String,
    message: String,
  },
}
