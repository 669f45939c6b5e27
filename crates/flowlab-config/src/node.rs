use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::input::InputBinding;

/// A unit of work within a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
  pub node_id: String,
  /// Tag used to look up the executor for this node, e.g. `prompt`.
  pub node_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  /// Executor-specific configuration (template reference, static parameters).
  #[serde(default)]
  pub config: serde_json::Value,
  #[serde(default)]
  pub inputs: BTreeMap<String, InputBinding>,
  /// Canvas position for the visual editor. Not used by execution.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub position: Option<Position>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_retry_attempts: Option<u32>,
  /// Stop scheduling the rest of the flow when this node fails.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fail_flow: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}

impl FlowNode {
  pub fn new(node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      node_type: node_type.into(),
      name: None,
      config: serde_json::Value::Null,
      inputs: BTreeMap::new(),
      position: None,
      timeout_ms: None,
      max_retry_attempts: None,
      fail_flow: None,
    }
  }

  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    self.config = config;
    self
  }

  pub fn with_input(mut self, name: impl Into<String>, binding: InputBinding) -> Self {
    self.inputs.insert(name.into(), binding);
    self
  }

  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }
}
