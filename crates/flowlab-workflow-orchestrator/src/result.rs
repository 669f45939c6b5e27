//! Flow execution results.

use chrono::{DateTime, Utc};
use flowlab_store::{FlowExecution, FlowStatus, NodeExecution, NodeStatus};
use serde::{Deserialize, Serialize};

/// Result of a complete flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecutionResult {
  pub execution_id: String,
  pub flow_id: String,
  pub status: FlowStatus,
  /// True only when the flow completed with no failed node.
  pub success: bool,
  pub output: serde_json::Value,
  pub error: Option<String>,
  pub node_executions: Vec<NodeExecution>,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub duration_ms: i64,
  pub total_tokens: u64,
  pub total_cost: f64,
}

impl FlowExecutionResult {
  pub(crate) fn new(execution: &FlowExecution, node_executions: Vec<NodeExecution>) -> Self {
    Self {
      execution_id: execution.execution_id.clone(),
      flow_id: execution.flow_id.clone(),
      status: execution.status,
      success: execution.status == FlowStatus::Completed,
      output: execution
        .output
        .as_ref()
        .map(|output| output.0.clone())
        .unwrap_or(serde_json::Value::Null),
      error: execution.error.clone(),
      node_executions,
      started_at: execution.started_at,
      completed_at: execution.completed_at,
      duration_ms: execution.duration_ms.unwrap_or(0),
      total_tokens: u64::try_from(execution.total_tokens).unwrap_or(0),
      total_cost: execution.total_cost,
    }
  }

  /// The record of one node, if it was ever scheduled.
  pub fn node(&self, node_id: &str) -> Option<&NodeExecution> {
    self.node_executions.iter().find(|n| n.node_id == node_id)
  }

  pub fn count(&self, status: NodeStatus) -> usize {
    self
      .node_executions
      .iter()
      .filter(|n| n.status == status)
      .count()
  }
}

/// A stored execution together with its node records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetails {
  pub execution: FlowExecution,
  pub nodes: Vec<NodeExecution>,
}
