use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A directed dependency between two nodes of the same flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub edge_id: Option<String>,
  pub from: String,
  pub to: String,
  /// Data mapping: downstream input name -> path into the upstream output.
  /// An empty path selects the whole output.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub mapping: BTreeMap<String, String>,
  /// Expression evaluated against `{ output, inputs }` of the source node.
  /// The edge is only taken when it evaluates to true.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
}

impl FlowEdge {
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      edge_id: None,
      from: from.into(),
      to: to.into(),
      mapping: BTreeMap::new(),
      condition: None,
    }
  }

  /// Feed `input` of the target node from `path` in the source output.
  pub fn map(mut self, input: impl Into<String>, path: impl Into<String>) -> Self {
    self.mapping.insert(input.into(), path.into());
    self
  }

  pub fn when(mut self, condition: impl Into<String>) -> Self {
    self.condition = Some(condition.into());
    self
  }
}
