//! Input bindings for flow node configuration.
//!
//! Each declared node input names where its value comes from at runtime.
//!
//! # Examples
//!
//! ```json
//! {
//!   "topic":    { "from": "variable", "variable": "topic" },
//!   "summary":  { "from": "node", "node": "summarize", "path": "content" },
//!   "greeting": { "from": "template", "template": "Hello {{ name | title }}!" },
//!   "tone":     { "from": "literal", "value": "formal" },
//!   "draft":    { "from": "edge", "default": "" }
//! }
//! ```
//!
//! Templates are rendered by minijinja against the workflow variables, with
//! upstream outputs available under `nodes.<node_id>`. A template that is a
//! single `{{ expr }}` keeps the JSON type of the expression result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum InputBinding {
  /// A constant value.
  Literal { value: Value },
  /// A workflow-level input variable.
  Variable {
    variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
  },
  /// A field of an upstream node's output.
  Node {
    node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
  },
  /// A minijinja template.
  Template { template: String },
  /// Fed by the data-mapping of an incoming edge.
  Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
  },
}

impl InputBinding {
  pub fn literal(value: impl Into<Value>) -> Self {
    Self::Literal {
      value: value.into(),
    }
  }

  pub fn variable(variable: impl Into<String>) -> Self {
    Self::Variable {
      variable: variable.into(),
      default: None,
    }
  }

  pub fn node(node: impl Into<String>, path: Option<&str>) -> Self {
    Self::Node {
      node: node.into(),
      path: path.map(str::to_string),
      default: None,
    }
  }

  pub fn template(template: impl Into<String>) -> Self {
    Self::Template {
      template: template.into(),
    }
  }

  pub fn edge() -> Self {
    Self::Edge { default: None }
  }

  /// Attach a fallback used when the source has no value.
  ///
  /// Literal and template bindings always produce a value and ignore it.
  pub fn with_default(self, value: impl Into<Value>) -> Self {
    let value = Some(value.into());
    match self {
      Self::Variable { variable, .. } => Self::Variable {
        variable,
        default: value,
      },
      Self::Node { node, path, .. } => Self::Node {
        node,
        path,
        default: value,
      },
      Self::Edge { .. } => Self::Edge { default: value },
      other => other,
    }
  }

  pub fn default_value(&self) -> Option<&Value> {
    match self {
      Self::Variable { default, .. } | Self::Node { default, .. } | Self::Edge { default } => {
        default.as_ref()
      }
      Self::Literal { .. } | Self::Template { .. } => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_bindings() {
    let variable: InputBinding =
      serde_json::from_value(json!({ "from": "variable", "variable": "x" })).unwrap();
    assert_eq!(variable, InputBinding::variable("x"));

    let node: InputBinding = serde_json::from_value(
      json!({ "from": "node", "node": "a", "path": "content", "default": "" }),
    )
    .unwrap();
    assert_eq!(node, InputBinding::node("a", Some("content")).with_default(""));

    let edge: InputBinding = serde_json::from_value(json!({ "from": "edge" })).unwrap();
    assert_eq!(edge, InputBinding::edge());
  }

  #[test]
  fn test_default_ignored_for_literal() {
    let binding = InputBinding::literal(1).with_default(2);
    assert_eq!(binding.default_value(), None);
  }
}
