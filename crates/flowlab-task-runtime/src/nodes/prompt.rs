use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::parse_config;
use crate::error::NodeError;
use crate::executor::{Inputs, NodeContext, NodeExecutor, NodeOutput, Usage};
use crate::provider::{ModelProvider, TemplateRef, TemplateRequest};

/// Configuration of a `prompt` node.
///
/// Either `template` (an inline body) or `template_id` must be set. The node's
/// resolved inputs become the template variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub template: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub template_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub template_version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model: Option<String>,
  #[serde(default)]
  pub parameters: Inputs,
}

impl PromptConfig {
  fn template_ref(&self) -> Result<TemplateRef, NodeError> {
    if self.template.is_none() && self.template_id.is_none() {
      return Err(NodeError::invalid_config(
        "prompt needs a 'template' or a 'template_id'",
      ));
    }
    Ok(TemplateRef {
      template_id: self.template_id.clone(),
      version: self.template_version.clone(),
      body: self.template.clone(),
    })
  }
}

/// Runs a prompt template through the injected [`ModelProvider`].
///
/// Output is `{ "content", "tokens_used", "cost_estimate", "model" }`.
pub struct PromptExecutor {
  provider: Arc<dyn ModelProvider>,
}

impl PromptExecutor {
  pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
    Self { provider }
  }
}

#[async_trait]
impl NodeExecutor for PromptExecutor {
  async fn execute(
    &self,
    ctx: &NodeContext,
    config: &serde_json::Value,
    inputs: &Inputs,
  ) -> Result<NodeOutput, NodeError> {
    let config: PromptConfig = parse_config(config)?;
    let template = config.template_ref()?;

    debug!(
      node_id = %ctx.node_id,
      template = %template.label(),
      attempt = ctx.attempt,
      "sending prompt to provider"
    );

    let request = TemplateRequest {
      template,
      variables: inputs.clone(),
      model: config.model,
      parameters: config.parameters,
    };

    let response = tokio::select! {
      response = self.provider.execute(request) => response?,
      _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
    };

    let usage = Usage {
      tokens_used: response.tokens_used,
      cost_estimate: response.cost_estimate,
      model: response.model.clone(),
    };
    let value = json!({
      "content": response.content,
      "tokens_used": response.tokens_used,
      "cost_estimate": response.cost_estimate,
      "model": response.model,
    });

    Ok(NodeOutput::new(value).with_usage(usage))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use tokio_util::sync::CancellationToken;

  use super::*;
  use crate::error::ProviderError;
  use crate::provider::TemplateResponse;

  #[derive(Default)]
  struct RecordingProvider {
    requests: Mutex<Vec<TemplateRequest>>,
  }

  #[async_trait]
  impl ModelProvider for RecordingProvider {
    async fn execute(&self, request: TemplateRequest) -> Result<TemplateResponse, ProviderError> {
      self.requests.lock().unwrap().push(request);
      Ok(TemplateResponse {
        content: "a reply".to_string(),
        tokens_used: 12,
        cost_estimate: 0.5,
        duration_ms: 3,
        model: Some("test-model".to_string()),
      })
    }
  }

  fn ctx() -> NodeContext {
    NodeContext {
      execution_id: "exec-1".to_string(),
      flow_id: "flow".to_string(),
      node_id: "ask".to_string(),
      attempt: 1,
      cancel: CancellationToken::new(),
    }
  }

  #[tokio::test]
  async fn test_prompt_sends_inputs_as_variables() {
    let provider = Arc::new(RecordingProvider::default());
    let executor = PromptExecutor::new(provider.clone());

    let mut inputs = Inputs::new();
    inputs.insert("topic".to_string(), json!("rust"));

    let output = executor
      .execute(
        &ctx(),
        &json!({ "template": "Tell me about {{ topic }}", "model": "m1" }),
        &inputs,
      )
      .await
      .unwrap();

    assert_eq!(output.value["content"], json!("a reply"));
    assert_eq!(output.value["tokens_used"], json!(12));
    assert_eq!(output.usage.unwrap().tokens_used, 12);

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].variables["topic"], json!("rust"));
    assert_eq!(requests[0].model.as_deref(), Some("m1"));
    assert_eq!(
      requests[0].template.body.as_deref(),
      Some("Tell me about {{ topic }}")
    );
  }

  #[tokio::test]
  async fn test_prompt_requires_template() {
    let executor = PromptExecutor::new(Arc::new(RecordingProvider::default()));
    let err = executor
      .execute(&ctx(), &json!({ "model": "m1" }), &Inputs::new())
      .await
      .unwrap_err();
    assert!(matches!(err, NodeError::InvalidConfig { .. }));
  }
}
