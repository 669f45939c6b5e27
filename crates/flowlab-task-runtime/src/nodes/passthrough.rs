use async_trait::async_trait;

use crate::error::NodeError;
use crate::executor::{Inputs, NodeContext, NodeExecutor, NodeOutput};

/// Outputs its resolved inputs unchanged. Used to merge branches.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughExecutor;

#[async_trait]
impl NodeExecutor for PassthroughExecutor {
  async fn execute(
    &self,
    _ctx: &NodeContext,
    _config: &serde_json::Value,
    inputs: &Inputs,
  ) -> Result<NodeOutput, NodeError> {
    Ok(NodeOutput::new(serde_json::Value::Object(inputs.clone())))
  }
}
