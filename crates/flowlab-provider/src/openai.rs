use std::time::{Duration, Instant};

use async_trait::async_trait;
use flowlab_task_runtime::{
  Inputs, ModelProvider, ProviderError, TemplateRequest, TemplateResponse,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::library::TemplateLibrary;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
  pub base_url: String,
  pub api_key: Option<String>,
  pub default_model: String,
  pub price_per_1k_tokens: f64,
  pub timeout: Duration,
}

impl Default for OpenAiConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.to_string(),
      api_key: None,
      default_model: DEFAULT_MODEL.to_string(),
      price_per_1k_tokens: 0.0,
      timeout: Duration::from_secs(60),
    }
  }
}

/// Provider that posts the rendered prompt to `{base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
  config: OpenAiConfig,
  library: TemplateLibrary,
  client: Client,
}

impl OpenAiProvider {
  pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
    let client = Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| ProviderError::Request {
        message: e.to_string(),
      })?;
    Ok(Self {
      config,
      library: TemplateLibrary::new(),
      client,
    })
  }

  pub fn with_templates(mut self, library: TemplateLibrary) -> Self {
    self.library = library;
    self
  }

  fn endpoint(&self) -> Result<Url, ProviderError> {
    let mut base = Url::parse(&self.config.base_url).map_err(|e| ProviderError::Request {
      message: format!("invalid base url {}: {}", self.config.base_url, e),
    })?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    base
      .join("chat/completions")
      .map_err(|e| ProviderError::Request {
        message: format!("invalid base url: {}", e),
      })
  }

  /// Build the JSON body. Request parameters (temperature, max_tokens, ...)
  /// are copied to the top level.
  fn request_body(&self, prompt: &str, model: &str, parameters: &Inputs) -> serde_json::Value {
    let mut body = json!({
      "model": model,
      "messages": [{ "role": "user", "content": prompt }],
    });
    if let Some(object) = body.as_object_mut() {
      for (key, value) in parameters {
        if key != "model" && key != "messages" {
          object.insert(key.clone(), value.clone());
        }
      }
    }
    body
  }

  fn cost(&self, tokens: u64) -> f64 {
    tokens as f64 / 1000.0 * self.config.price_per_1k_tokens
  }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  #[serde(default)]
  model: Option<String>,
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
  #[serde(default)]
  content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
  #[serde(default)]
  total_tokens: u64,
}

fn parse_response(body: &str) -> Result<(String, u64, Option<String>), ProviderError> {
  let response: ChatResponse =
    serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse {
      message: e.to_string(),
    })?;
  let content = response
    .choices
    .into_iter()
    .next()
    .and_then(|choice| choice.message.content)
    .ok_or_else(|| ProviderError::InvalidResponse {
      message: "response has no message content".to_string(),
    })?;
  let tokens = response.usage.map(|u| u.total_tokens).unwrap_or(0);
  Ok((content, tokens, response.model))
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
  async fn execute(&self, request: TemplateRequest) -> Result<TemplateResponse, ProviderError> {
    let started = Instant::now();
    let prompt = self.library.render(&request.template, &request.variables)?;
    let model = request
      .model
      .clone()
      .unwrap_or_else(|| self.config.default_model.clone());

    let url = self.endpoint()?;
    let body = self.request_body(&prompt, &model, &request.parameters);
    debug!(url = %url, model = %model, template = %request.template.label(), "chat completion request");

    let mut req = self.client.post(url).json(&body);
    if let Some(key) = &self.config.api_key {
      req = req.bearer_auth(key);
    }

    let response = req.send().await.map_err(|e| ProviderError::Request {
      message: e.to_string(),
    })?;
    let status = response.status();
    let text = response.text().await.map_err(|e| ProviderError::Request {
      message: e.to_string(),
    })?;
    if !status.is_success() {
      return Err(ProviderError::Rejected {
        status: status.as_u16(),
        message: text,
      });
    }

    let (content, tokens_used, reported_model) = parse_response(&text)?;
    Ok(TemplateResponse {
      content,
      tokens_used,
      cost_estimate: self.cost(tokens_used),
      duration_ms: started.elapsed().as_millis() as u64,
      model: reported_model.or(Some(model)),
    })
  }
}
