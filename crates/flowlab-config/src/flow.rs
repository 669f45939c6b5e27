use serde::{Deserialize, Serialize};

use crate::edge::FlowEdge;
use crate::node::FlowNode;

pub const DEFAULT_FLOW_VERSION: &str = "1.0.0";

/// A named, versioned flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
  pub flow_id: String,
  pub name: String,
  #[serde(default = "default_version")]
  pub version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lab_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub owner: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Workflow-level input variables the flow expects.
  #[serde(default)]
  pub variables: Vec<VariableDef>,
  pub nodes: Vec<FlowNode>,
  #[serde(default)]
  pub edges: Vec<FlowEdge>,
  #[serde(default = "default_active")]
  pub active: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_retry_attempts: Option<u32>,
}

/// A declared workflow input variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<serde_json::Value>,
  #[serde(default)]
  pub required: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

fn default_version() -> String {
  DEFAULT_FLOW_VERSION.to_string()
}

fn default_active() -> bool {
  true
}

impl FlowDefinition {
  pub fn new(flow_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      flow_id: flow_id.into(),
      name: name.into(),
      version: default_version(),
      lab_id: None,
      owner: None,
      description: None,
      variables: Vec::new(),
      nodes: Vec::new(),
      edges: Vec::new(),
      active: true,
      timeout_ms: None,
      max_retry_attempts: None,
    }
  }

  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  pub fn with_node(mut self, node: FlowNode) -> Self {
    self.nodes.push(node);
    self
  }

  pub fn with_edge(mut self, edge: FlowEdge) -> Self {
    self.edges.push(edge);
    self
  }

  pub fn with_variable(mut self, name: impl Into<String>, default: Option<serde_json::Value>) -> Self {
    self.variables.push(VariableDef {
      name: name.into(),
      default,
      required: false,
      description: None,
    });
    self
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&FlowNode> {
    self.nodes.iter().find(|n| n.node_id == node_id)
  }

  pub fn get_variable(&self, name: &str) -> Option<&VariableDef> {
    self.variables.iter().find(|v| v.name == name)
  }

  /// Input variables with declared defaults applied for missing entries.
  pub fn apply_variable_defaults(
    &self,
    inputs: &serde_json::Map<String, serde_json::Value>,
  ) -> serde_json::Map<String, serde_json::Value> {
    let mut merged = inputs.clone();
    for variable in &self.variables {
      if let Some(default) = &variable.default {
        merged
          .entry(variable.name.clone())
          .or_insert_with(|| default.clone());
      }
    }
    merged
  }
}
