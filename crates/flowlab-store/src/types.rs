use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of a flow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FlowStatus {
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl FlowStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Running)
  }
}

/// Status of a single node within a flow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NodeStatus {
  Pending,
  Running,
  Completed,
  Failed,
  /// Every incoming conditional edge was inactive.
  Skipped,
}

impl NodeStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Skipped)
  }
}

/// Why a node ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FailureReason {
  InputResolution,
  ExecutorError,
  NodeTimeout,
  UpstreamDependencyFailed,
  ConditionEvaluation,
  UnknownNodeType,
  Panicked,
}

/// One run of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FlowExecution {
  pub execution_id: String,
  pub flow_id: String,
  pub flow_version: String,
  pub status: FlowStatus,
  pub inputs: Json<serde_json::Value>,
  pub output: Option<Json<serde_json::Value>>,
  pub error: Option<String>,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub duration_ms: Option<i64>,
  pub total_tokens: i64,
  pub total_cost: f64,
}

impl FlowExecution {
  /// A new `running` execution starting now.
  pub fn start(
    execution_id: impl Into<String>,
    flow_id: impl Into<String>,
    flow_version: impl Into<String>,
    inputs: serde_json::Value,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      flow_id: flow_id.into(),
      flow_version: flow_version.into(),
      status: FlowStatus::Running,
      inputs: Json(inputs),
      output: None,
      error: None,
      started_at: Utc::now(),
      completed_at: None,
      duration_ms: None,
      total_tokens: 0,
      total_cost: 0.0,
    }
  }
}

/// The record of one node within a flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct NodeExecution {
  pub execution_id: String,
  pub node_id: String,
  pub node_type: String,
  pub status: NodeStatus,
  pub attempts: i32,
  pub input: Option<Json<serde_json::Value>>,
  pub output: Option<Json<serde_json::Value>>,
  pub error: Option<String>,
  pub failure_reason: Option<FailureReason>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub duration_ms: Option<i64>,
  pub tokens_used: i64,
  pub cost_estimate: f64,
}

impl NodeExecution {
  pub fn pending(
    execution_id: impl Into<String>,
    node_id: impl Into<String>,
    node_type: impl Into<String>,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      node_id: node_id.into(),
      node_type: node_type.into(),
      status: NodeStatus::Pending,
      attempts: 0,
      input: None,
      output: None,
      error: None,
      failure_reason: None,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
      duration_ms: None,
      tokens_used: 0,
      cost_estimate: 0.0,
    }
  }
}
