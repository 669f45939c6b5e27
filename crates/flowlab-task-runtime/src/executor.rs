//! The node executor seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;

/// Resolved node inputs, keyed by input name.
pub type Inputs = serde_json::Map<String, serde_json::Value>;

/// Identity of the node being executed, passed to every executor call.
#[derive(Debug, Clone)]
pub struct NodeContext {
  pub execution_id: String,
  pub flow_id: String,
  pub node_id: String,
  /// 1-based attempt number.
  pub attempt: u32,
  /// Fires when the flow deadline passes. Cancelling a run lets started nodes finish.
  pub cancel: CancellationToken,
}

/// Token and cost accounting reported by model-backed nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
  pub tokens_used: u64,
  pub cost_estimate: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model: Option<String>,
}

/// Output of a single node-type executor call.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
  pub value: serde_json::Value,
  pub usage: Option<Usage>,
}

impl NodeOutput {
  pub fn new(value: serde_json::Value) -> Self {
    Self { value, usage: None }
  }

  pub fn with_usage(mut self, usage: Usage) -> Self {
    self.usage = Some(usage);
    self
  }
}

impl From<serde_json::Value> for NodeOutput {
  fn from(value: serde_json::Value) -> Self {
    Self::new(value)
  }
}

/// Executes one node type.
///
/// Implementations receive the node's static `config` and its resolved
/// inputs. Timing, timeouts, retries and error recording belong to the caller.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
  async fn execute(
    &self,
    ctx: &NodeContext,
    config: &serde_json::Value,
    inputs: &Inputs,
  ) -> Result<NodeOutput, NodeError>;
}
