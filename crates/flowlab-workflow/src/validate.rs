//! Flow graph validation.
//!
//! The validator collects every problem in one pass so that an editor can show
//! the full diagnostic list. Errors make a flow unrunnable; warnings describe
//! bindings that may still resolve at runtime (e.g. through defaults).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use flowlab_config::{FlowDefinition, InputBinding};
use serde::{Deserialize, Serialize};

use crate::expr;
use crate::graph::FlowGraph;

/// Context key under which upstream outputs are exposed to templates.
pub const NODES_CONTEXT_KEY: &str = "nodes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
  DanglingEdgeReference,
  CyclicDependency,
  DuplicateNodeId,
  EmptyNodeType,
  UnknownNodeType,
  InvalidBinding,
  InvalidCondition,
  UnresolvedVariableBinding,
  DuplicateEdge,
  InvalidVersion,
  EmptyFlow,
}

impl fmt::Display for IssueKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::DanglingEdgeReference => "DanglingEdgeReference",
      Self::CyclicDependency => "CyclicDependency",
      Self::DuplicateNodeId => "DuplicateNodeId",
      Self::EmptyNodeType => "EmptyNodeType",
      Self::UnknownNodeType => "UnknownNodeType",
      Self::InvalidBinding => "InvalidBinding",
      Self::InvalidCondition => "InvalidCondition",
      Self::UnresolvedVariableBinding => "UnresolvedVariableBinding",
      Self::DuplicateEdge => "DuplicateEdge",
      Self::InvalidVersion => "InvalidVersion",
      Self::EmptyFlow => "EmptyFlow",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
  pub kind: IssueKind,
  pub message: String,
  /// Node ids involved, e.g. the missing id or the cycle chain.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub nodes: Vec<String>,
}

impl ValidationIssue {
  fn new(kind: IssueKind, message: impl Into<String>, nodes: Vec<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      nodes,
    }
  }
}

impl fmt::Display for ValidationIssue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.kind, self.message)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
  pub is_valid: bool,
  pub errors: Vec<ValidationIssue>,
  pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
  pub fn has_error(&self, kind: IssueKind) -> bool {
    self.errors.iter().any(|i| i.kind == kind)
  }

  pub fn has_warning(&self, kind: IssueKind) -> bool {
    self.warnings.iter().any(|i| i.kind == kind)
  }

  /// One line per error, for log and error messages.
  pub fn summary(&self) -> String {
    self
      .errors
      .iter()
      .map(ToString::to_string)
      .collect::<Vec<_>>()
      .join("; ")
  }
}

/// Validates flow definitions.
#[derive(Debug, Clone, Default)]
pub struct Validator {
  known_types: Option<HashSet<String>>,
}

impl Validator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Also reject node types outside this set.
  pub fn with_node_types<I, S>(mut self, types: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.known_types = Some(types.into_iter().map(Into::into).collect());
    self
  }

  pub fn validate(&self, flow: &FlowDefinition) -> ValidationReport {
    let graph = FlowGraph::new(flow);
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if flow.nodes.is_empty() {
      warnings.push(ValidationIssue::new(
        IssueKind::EmptyFlow,
        format!("flow '{}' has no nodes", flow.flow_id),
        Vec::new(),
      ));
    }

    if !is_semver(&flow.version) {
      warnings.push(ValidationIssue::new(
        IssueKind::InvalidVersion,
        format!("version '{}' is not a semantic version", flow.version),
        Vec::new(),
      ));
    }

    for id in graph.duplicates() {
      errors.push(ValidationIssue::new(
        IssueKind::DuplicateNodeId,
        format!("node id '{}' is defined more than once", id),
        vec![id.clone()],
      ));
    }

    self.check_node_types(flow, &mut errors);
    check_edges(flow, &graph, &mut errors, &mut warnings);

    for cycle in graph.find_cycles() {
      let chain = graph.describe_chain(&cycle);
      errors.push(ValidationIssue::new(
        IssueKind::CyclicDependency,
        format!("cycle detected: {}", chain),
        cycle.iter().map(|&idx| graph.node_id(idx).to_string()).collect(),
      ));
    }

    let mut reach = Reachability::new(&graph);
    for idx in 0..graph.len() {
      check_bindings(flow, &graph, &mut reach, idx, &mut errors, &mut warnings);
    }

    ValidationReport {
      is_valid: errors.is_empty(),
      errors,
      warnings,
    }
  }

  fn check_node_types(&self, flow: &FlowDefinition, errors: &mut Vec<ValidationIssue>) {
    for node in &flow.nodes {
      if node.node_type.trim().is_empty() {
        errors.push(ValidationIssue::new(
          IssueKind::EmptyNodeType,
          format!("node '{}' has no node type", node.node_id),
          vec![node.node_id.clone()],
        ));
        continue;
      }
      if let Some(known) = &self.known_types {
        if !known.contains(&node.node_type) {
          errors.push(ValidationIssue::new(
            IssueKind::UnknownNodeType,
            format!(
              "node '{}' has unknown node type '{}'",
              node.node_id, node.node_type
            ),
            vec![node.node_id.clone()],
          ));
        }
      }
    }
  }
}

fn check_edges(
  flow: &FlowDefinition,
  graph: &FlowGraph,
  errors: &mut Vec<ValidationIssue>,
  warnings: &mut Vec<ValidationIssue>,
) {
  for dangling in graph.dangling_edges() {
    let edge = &flow.edges[dangling.edge_index];
    for missing in &dangling.missing {
      errors.push(ValidationIssue::new(
        IssueKind::DanglingEdgeReference,
        format!(
          "edge {} -> {} references unknown node '{}'",
          edge.from, edge.to, missing
        ),
        vec![missing.clone()],
      ));
    }
  }

  let mut seen = HashSet::new();
  for edge in &flow.edges {
    if !seen.insert((edge.from.as_str(), edge.to.as_str())) {
      warnings.push(ValidationIssue::new(
        IssueKind::DuplicateEdge,
        format!("edge {} -> {} is defined more than once", edge.from, edge.to),
        vec![edge.from.clone(), edge.to.clone()],
      ));
    }
    if let Some(condition) = &edge.condition {
      if let Err(e) = expr::check_expression(condition) {
        errors.push(ValidationIssue::new(
          IssueKind::InvalidCondition,
          format!("edge {} -> {}: {}", edge.from, edge.to, e),
          vec![edge.from.clone(), edge.to.clone()],
        ));
      }
    }
  }
}

/// Answers "is `source` upstream of `target`" for node bindings.
///
/// Direct predecessors are checked from the adjacency list. Anything else
/// walks the descendants of `source` once and keeps the result, so the cost is
/// O(V+E) per distinct source that is bound from further than one edge away.
struct Reachability<'g> {
  graph: &'g FlowGraph,
  descendants: HashMap<usize, Vec<bool>>,
}

impl<'g> Reachability<'g> {
  fn new(graph: &'g FlowGraph) -> Self {
    Self {
      graph,
      descendants: HashMap::new(),
    }
  }

  fn is_upstream(&mut self, source: usize, target: usize) -> bool {
    let graph = self.graph;
    if graph.predecessors(target).any(|p| p == source) {
      return true;
    }
    self
      .descendants
      .entry(source)
      .or_insert_with(|| graph.descendants(source))[target]
  }
}

fn check_bindings(
  flow: &FlowDefinition,
  graph: &FlowGraph,
  reach: &mut Reachability<'_>,
  idx: usize,
  errors: &mut Vec<ValidationIssue>,
  warnings: &mut Vec<ValidationIssue>,
) {
  let node = graph.node(flow, idx);
  let unresolved = |input: &str, reason: String| {
    ValidationIssue::new(
      IssueKind::UnresolvedVariableBinding,
      format!("node '{}' input '{}': {}", node.node_id, input, reason),
      vec![node.node_id.clone()],
    )
  };

  for (input, binding) in &node.inputs {
    match binding {
      InputBinding::Literal { .. } => {}
      InputBinding::Variable { variable, default } => {
        if default.is_none() && flow.get_variable(variable).is_none() {
          warnings.push(unresolved(
            input,
            format!("variable '{}' is not declared by the flow", variable),
          ));
        }
      }
      InputBinding::Node { node: source, .. } => {
        let is_upstream = graph
          .index_of(source)
          .is_some_and(|source_idx| reach.is_upstream(source_idx, idx));
        if !is_upstream {
          warnings.push(unresolved(
            input,
            format!("node '{}' is not upstream of '{}'", source, node.node_id),
          ));
        }
      }
      InputBinding::Template { template } => match expr::template_variables(template) {
        Ok(variables) => {
          let undeclared: BTreeSet<_> = variables
            .iter()
            .filter(|v| v.as_str() != NODES_CONTEXT_KEY && flow.get_variable(v).is_none())
            .collect();
          for variable in undeclared {
            warnings.push(unresolved(
              input,
              format!("template reads undeclared variable '{}'", variable),
            ));
          }
        }
        Err(e) => errors.push(ValidationIssue::new(
          IssueKind::InvalidBinding,
          format!("node '{}' input '{}': {}", node.node_id, input, e),
          vec![node.node_id.clone()],
        )),
      },
      InputBinding::Edge { default } => {
        if default.is_none() && !is_edge_fed(flow, graph, idx, input) {
          warnings.push(unresolved(input, "no incoming edge maps this input".to_string()));
        }
      }
    }
  }
}

fn is_edge_fed(flow: &FlowDefinition, graph: &FlowGraph, idx: usize, input: &str) -> bool {
  graph
    .incoming(idx)
    .iter()
    .any(|&e| flow.edges[graph.edge(e).edge_index].mapping.contains_key(input))
}

/// `MAJOR.MINOR.PATCH` with an optional `-pre` or `+build` suffix.
fn is_semver(version: &str) -> bool {
  let core = version.split(['-', '+']).next().unwrap_or_default();
  let parts: Vec<&str> = core.split('.').collect();
  parts.len() == 3
    && parts
      .iter()
      .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
