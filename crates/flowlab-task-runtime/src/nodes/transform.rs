use async_trait::async_trait;
use flowlab_workflow::expr;
use serde::Deserialize;

use super::parse_config;
use crate::error::NodeError;
use crate::executor::{Inputs, NodeContext, NodeExecutor, NodeOutput};

#[derive(Debug, Deserialize)]
struct TransformConfig {
  expression: Option<String>,
  template: Option<String>,
}

/// Computes its output from its inputs with a minijinja expression or template.
///
/// ```json
/// { "expression": "value * 3" }
/// { "template": "{{ title | upper }}: {{ body }}" }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
  async fn execute(
    &self,
    _ctx: &NodeContext,
    config: &serde_json::Value,
    inputs: &Inputs,
  ) -> Result<NodeOutput, NodeError> {
    let config: TransformConfig = parse_config(config)?;
    let ctx = serde_json::Value::Object(inputs.clone());

    let value = match (config.expression, config.template) {
      (Some(expression), _) => expr::evaluate(&expression, &ctx)?,
      (None, Some(template)) => expr::render(&template, &ctx)?,
      (None, None) => {
        return Err(NodeError::invalid_config(
          "transform needs an 'expression' or a 'template'",
        ));
      }
    };

    Ok(NodeOutput::new(value))
  }
}
