//! Model/template execution capability.
//!
//! The orchestration core never talks to a model directly. Prompt nodes hand
//! a [`TemplateRequest`] to an injected [`ModelProvider`] and record what it
//! returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::executor::Inputs;

/// Reference to a prompt template: a library id, an inline body, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateRef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub template_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
}

impl TemplateRef {
  pub fn inline(body: impl Into<String>) -> Self {
    Self {
      body: Some(body.into()),
      ..Self::default()
    }
  }

  pub fn id(template_id: impl Into<String>) -> Self {
    Self {
      template_id: Some(template_id.into()),
      ..Self::default()
    }
  }

  /// Human-readable name for logs and errors.
  pub fn label(&self) -> &str {
    self.template_id.as_deref().unwrap_or("<inline>")
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRequest {
  pub template: TemplateRef,
  pub variables: Inputs,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model: Option<String>,
  #[serde(default)]
  pub parameters: Inputs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResponse {
  pub content: String,
  pub tokens_used: u64,
  pub cost_estimate: f64,
  pub duration_ms: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model: Option<String>,
}

/// Renders a template and runs it against a model.
#[async_trait]
pub trait ModelProvider: Send + Sync {
  async fn execute(&self, request: TemplateRequest) -> Result<TemplateResponse, ProviderError>;
}
