//! Orchestrator settings.
//!
//! Settings are layered. [`OrchestratorConfig`] holds the defaults of the
//! embedding application, [`FlowOptions`] override them per call, fields on
//! the flow definition override the call, and node fields override all.

use flowlab_config::{FailurePolicy, FlowDefinition, FlowNode};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
  /// Upper bound on nodes running at once within one execution.
  pub max_concurrency: usize,
  /// Per-node timeout when neither the call nor the node sets one.
  pub node_timeout_ms: Option<u64>,
  /// Whole-flow deadline when neither the call nor the flow sets one.
  pub flow_timeout_ms: Option<u64>,
  pub retry: RetryPolicy,
  pub failure_policy: FailurePolicy,
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    Self {
      max_concurrency: DEFAULT_MAX_CONCURRENCY,
      node_timeout_ms: None,
      flow_timeout_ms: None,
      retry: RetryPolicy::default(),
      failure_policy: FailurePolicy::default(),
    }
  }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowOptions {
  /// Use this execution id instead of generating one.
  pub execution_id: Option<String>,
  pub max_concurrency: Option<usize>,
  pub node_timeout_ms: Option<u64>,
  pub timeout_ms: Option<u64>,
  pub retry: Option<RetryPolicy>,
  pub failure_policy: Option<FailurePolicy>,
}

impl FlowOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
    self.execution_id = Some(execution_id.into());
    self
  }

  pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
    self.max_concurrency = Some(max_concurrency);
    self
  }

  pub fn with_node_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.node_timeout_ms = Some(timeout_ms);
    self
  }

  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = Some(retry);
    self
  }

  pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
    self.failure_policy = Some(policy);
    self
  }
}

/// Settings in effect for one execution.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
  pub max_concurrency: usize,
  pub node_timeout_ms: Option<u64>,
  pub flow_timeout_ms: Option<u64>,
  pub retry: RetryPolicy,
  pub failure_policy: FailurePolicy,
}

impl Settings {
  pub fn resolve(config: &OrchestratorConfig, options: &FlowOptions, flow: &FlowDefinition) -> Self {
    let mut retry = options.retry.unwrap_or(config.retry);
    if let Some(attempts) = flow.max_retry_attempts {
      retry.max_retry_attempts = attempts;
    }
    Self {
      max_concurrency: options.max_concurrency.unwrap_or(config.max_concurrency).max(1),
      node_timeout_ms: options.node_timeout_ms.or(config.node_timeout_ms),
      flow_timeout_ms: flow
        .timeout_ms
        .or(options.timeout_ms)
        .or(config.flow_timeout_ms),
      retry,
      failure_policy: options.failure_policy.unwrap_or(config.failure_policy),
    }
  }

  pub fn node_timeout_ms(&self, node: &FlowNode) -> Option<u64> {
    node.timeout_ms.or(self.node_timeout_ms)
  }

  pub fn node_retry(&self, node: &FlowNode) -> RetryPolicy {
    let mut retry = self.retry;
    if let Some(attempts) = node.max_retry_attempts {
      retry.max_retry_attempts = attempts;
    }
    retry
  }

  /// Whether a failure of `node` stops new nodes from being scheduled.
  pub fn halts_on_failure(&self, node: &FlowNode) -> bool {
    node
      .fail_flow
      .unwrap_or(self.failure_policy == FailurePolicy::HaltOnFailure)
  }
}
