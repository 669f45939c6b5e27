//! Single-node execution.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowlab_config::FlowNode;
use flowlab_store::{FailureReason, NodeStatus};
use flowlab_task_runtime::{ExecutorRegistry, Inputs, NodeContext, NodeError, Usage};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Outcome of one attempt at a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeExecutionResult {
  pub node_id: String,
  /// `Completed` or `Failed`.
  pub status: NodeStatus,
  pub output: Option<serde_json::Value>,
  pub error: Option<String>,
  pub failure_reason: Option<FailureReason>,
  pub started_at: DateTime<Utc>,
  pub completed_at: DateTime<Utc>,
  pub duration_ms: u64,
  pub usage: Option<Usage>,
  /// Whether another attempt could succeed.
  pub retryable: bool,
}

impl NodeExecutionResult {
  pub fn is_success(&self) -> bool {
    self.status == NodeStatus::Completed
  }

  /// A failure that happened before any executor was invoked.
  pub fn failed_now(node_id: &str, reason: FailureReason, error: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      node_id: node_id.to_string(),
      status: NodeStatus::Failed,
      output: None,
      error: Some(error.into()),
      failure_reason: Some(reason),
      started_at: now,
      completed_at: now,
      duration_ms: 0,
      usage: None,
      retryable: false,
    }
  }
}

/// Runs individual nodes of one execution.
///
/// Owns input-independent concerns only: executor lookup, timing, timeouts
/// and turning every failure (including panics) into a `Failed` result. Retries
/// are the caller's business.
#[derive(Clone)]
pub struct NodeRunner {
  registry: Arc<ExecutorRegistry>,
  execution_id: String,
  flow_id: String,
}

impl NodeRunner {
  pub fn new(
    registry: Arc<ExecutorRegistry>,
    execution_id: impl Into<String>,
    flow_id: impl Into<String>,
  ) -> Self {
    Self {
      registry,
      execution_id: execution_id.into(),
      flow_id: flow_id.into(),
    }
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  /// Execute one attempt of `node` with already-resolved inputs.
  #[instrument(
    name = "node_execute",
    skip(self, node, inputs, cancel),
    fields(
      execution_id = %self.execution_id,
      node_id = %node.node_id,
      node_type = %node.node_type,
    )
  )]
  pub async fn execute_node(
    &self,
    node: &FlowNode,
    inputs: &Inputs,
    attempt: u32,
    timeout: Option<Duration>,
    cancel: CancellationToken,
  ) -> NodeExecutionResult {
    let Some(executor) = self.registry.get(&node.node_type) else {
      return NodeExecutionResult::failed_now(
        &node.node_id,
        FailureReason::UnknownNodeType,
        format!("no executor registered for node type '{}'", node.node_type),
      );
    };

    let ctx = NodeContext {
      execution_id: self.execution_id.clone(),
      flow_id: self.flow_id.clone(),
      node_id: node.node_id.clone(),
      attempt,
      cancel,
    };

    let started_at = Utc::now();
    let call = AssertUnwindSafe(executor.execute(&ctx, &node.config, inputs)).catch_unwind();
    let outcome = match timeout {
      Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| limit),
      None => Ok(call.await),
    };
    let completed_at = Utc::now();
    let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

    let mut result = NodeExecutionResult {
      node_id: node.node_id.clone(),
      status: NodeStatus::Failed,
      output: None,
      error: None,
      failure_reason: None,
      started_at,
      completed_at,
      duration_ms,
      usage: None,
      retryable: false,
    };

    match outcome {
      Ok(Ok(Ok(output))) => {
        result.status = NodeStatus::Completed;
        result.output = Some(output.value);
        result.usage = output.usage;
      }
      Ok(Ok(Err(err))) => {
        debug!(error = %err, attempt, "executor returned an error");
        result.retryable = !matches!(err, NodeError::Cancelled | NodeError::InvalidConfig { .. });
        result.error = Some(err.to_string());
        result.failure_reason = Some(FailureReason::ExecutorError);
      }
      Ok(Err(panic)) => {
        result.error = Some(format!("executor panicked: {}", panic_message(&*panic)));
        result.failure_reason = Some(FailureReason::Panicked);
      }
      Err(limit) => {
        result.error = Some(format!("node timed out after {}ms", limit.as_millis()));
        result.failure_reason = Some(FailureReason::NodeTimeout);
      }
    }

    result
  }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
