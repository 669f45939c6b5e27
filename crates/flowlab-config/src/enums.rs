use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  #[default]
  Constant,
  Linear,
  Exponential,
}

/// What the orchestrator does with the rest of the flow once a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Dependents of the failed node fail, independent branches keep running.
  #[default]
  ContinueIndependent,
  /// No new node is scheduled after the first failure.
  HaltOnFailure,
}
