use async_trait::async_trait;
use flowlab_workflow::expr;
use serde::Deserialize;
use serde_json::json;

use super::parse_config;
use crate::error::NodeError;
use crate::executor::{Inputs, NodeContext, NodeExecutor, NodeOutput};

#[derive(Debug, Deserialize)]
struct ConditionalConfig {
  condition: String,
}

/// Evaluates a condition over its inputs.
///
/// Output is `{ "result": bool, "inputs": {...} }`; outgoing edges branch on
/// it with conditions such as `output.result` and `not output.result`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalExecutor;

#[async_trait]
impl NodeExecutor for ConditionalExecutor {
  async fn execute(
    &self,
    _ctx: &NodeContext,
    config: &serde_json::Value,
    inputs: &Inputs,
  ) -> Result<NodeOutput, NodeError> {
    let config: ConditionalConfig = parse_config(config)?;
    let ctx = serde_json::Value::Object(inputs.clone());
    let result = expr::evaluate_condition(&config.condition, &ctx)?;

    Ok(NodeOutput::new(json!({ "result": result, "inputs": ctx })))
  }
}
