use std::time::Instant;

use async_trait::async_trait;
use flowlab_task_runtime::{ModelProvider, ProviderError, TemplateRequest, TemplateResponse};

use crate::library::TemplateLibrary;

const ECHO_MODEL: &str = "echo";

/// Offline provider: the completion is the rendered prompt.
///
/// Tokens are counted as whitespace-separated words and priced per thousand.
#[derive(Debug, Clone, Default)]
pub struct EchoProvider {
  library: TemplateLibrary,
  price_per_1k_tokens: f64,
}

impl EchoProvider {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_templates(mut self, library: TemplateLibrary) -> Self {
    self.library = library;
    self
  }

  pub fn with_price_per_1k_tokens(mut self, price: f64) -> Self {
    self.price_per_1k_tokens = price;
    self
  }
}

#[async_trait]
impl ModelProvider for EchoProvider {
  async fn execute(&self, request: TemplateRequest) -> Result<TemplateResponse, ProviderError> {
    let started = Instant::now();
    let content = self.library.render(&request.template, &request.variables)?;
    let tokens_used = content.split_whitespace().count() as u64;

    Ok(TemplateResponse {
      cost_estimate: tokens_used as f64 / 1000.0 * self.price_per_1k_tokens,
      tokens_used,
      content,
      duration_ms: started.elapsed().as_millis() as u64,
      model: Some(request.model.unwrap_or_else(|| ECHO_MODEL.to_string())),
    })
  }
}
