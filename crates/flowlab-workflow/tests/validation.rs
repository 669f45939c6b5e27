//! Validator behaviour on whole flow definitions.

use flowlab_config::{FlowDefinition, FlowEdge, FlowNode, InputBinding};
use flowlab_workflow::{IssueKind, Validator};

fn chain_flow(ids: &[&str]) -> FlowDefinition {
  let mut flow = FlowDefinition::new("chain", "Chain").with_variable("x", None);
  for id in ids {
    flow = flow.with_node(FlowNode::new(*id, "transform"));
  }
  for pair in ids.windows(2) {
    flow = flow.with_edge(FlowEdge::new(pair[0], pair[1]));
  }
  flow
}

#[test]
fn test_valid_dag() {
  let flow = chain_flow(&["a", "b", "c"]);
  let report = Validator::new().validate(&flow);

  assert!(report.is_valid);
  assert!(report.errors.is_empty());
  assert!(report.warnings.is_empty());
}

#[test]
fn test_cycle_is_rejected() {
  let flow = chain_flow(&["a", "b", "c"]).with_edge(FlowEdge::new("c", "a"));
  let report = Validator::new().validate(&flow);

  assert!(!report.is_valid);
  let cycle = report
    .errors
    .iter()
    .find(|i| i.kind == IssueKind::CyclicDependency)
    .expect("cycle reported");
  assert_eq!(cycle.nodes, vec!["a", "b", "c", "a"]);
  assert!(cycle.message.contains("a -> b -> c -> a"));
}

#[test]
fn test_dangling_edge_names_missing_node() {
  let flow = chain_flow(&["a", "b"]).with_edge(FlowEdge::new("b", "Z"));
  let report = Validator::new().validate(&flow);

  assert!(!report.is_valid);
  let dangling: Vec<_> = report
    .errors
    .iter()
    .filter(|i| i.kind == IssueKind::DanglingEdgeReference)
    .collect();
  assert_eq!(dangling.len(), 1);
  assert_eq!(dangling[0].nodes, vec!["Z"]);
  assert!(dangling[0].message.contains("'Z'"));
  assert_eq!(report.errors.len(), 1);
}

#[test]
fn test_all_problems_in_one_pass() {
  let mut flow = chain_flow(&["a", "b", "c"])
    .with_edge(FlowEdge::new("c", "a"))
    .with_edge(FlowEdge::new("ghost", "a"))
    .with_edge(FlowEdge::new("a", "b").when("output.ok and ("));
  flow.nodes.push(FlowNode::new("b", "transform"));
  flow.version = "latest".to_string();

  let report = Validator::new().validate(&flow);

  assert!(report.has_error(IssueKind::CyclicDependency));
  assert!(report.has_error(IssueKind::DanglingEdgeReference));
  assert!(report.has_error(IssueKind::DuplicateNodeId));
  assert!(report.has_error(IssueKind::InvalidCondition));
  assert!(report.has_warning(IssueKind::DuplicateEdge));
  assert!(report.has_warning(IssueKind::InvalidVersion));
}

#[test]
fn test_validation_is_idempotent() {
  let flow = chain_flow(&["a", "b", "c", "d"])
    .with_edge(FlowEdge::new("d", "b"))
    .with_edge(FlowEdge::new("a", "nowhere"));
  let validator = Validator::new();

  let first = validator.validate(&flow);
  let second = validator.validate(&flow);

  assert_eq!(first, second);
}

#[test]
fn test_node_binding_must_be_upstream() {
  let flow = FlowDefinition::new("f", "F")
    .with_node(FlowNode::new("a", "transform"))
    .with_node(FlowNode::new("b", "transform").with_input("v", InputBinding::node("a", None)))
    .with_node(FlowNode::new("c", "transform").with_input("v", InputBinding::node("b", None)))
    .with_edge(FlowEdge::new("a", "b"));
  let report = Validator::new().validate(&flow);

  assert!(report.is_valid);
  assert_eq!(report.warnings.len(), 1);
  assert_eq!(report.warnings[0].kind, IssueKind::UnresolvedVariableBinding);
  assert_eq!(report.warnings[0].nodes, vec!["c"]);
}

#[test]
fn test_template_binding_variables() {
  let flow = FlowDefinition::new("f", "F")
    .with_variable("topic", None)
    .with_node(FlowNode::new("a", "transform"))
    .with_node(FlowNode::new("b", "prompt").with_input(
      "prompt",
      InputBinding::template("{{ topic }}: {{ nodes.a }} in {{ language }}"),
    ))
    .with_edge(FlowEdge::new("a", "b"));
  let report = Validator::new().validate(&flow);

  assert!(report.is_valid);
  assert_eq!(report.warnings.len(), 1);
  assert!(report.warnings[0].message.contains("'language'"));
}

#[test]
fn test_large_graph_with_node_bindings() {
  const SIZE: usize = 20_000;
  let ids: Vec<String> = (0..SIZE).map(|i| format!("n{}", i)).collect();

  let mut flow = FlowDefinition::new("large", "Large").with_node(FlowNode::new("island", "transform"));
  for (i, id) in ids.iter().enumerate() {
    let mut node = FlowNode::new(id.as_str(), "transform");
    if i >= 1 {
      node = node.with_input("prev", InputBinding::node(ids[i - 1].as_str(), None));
    }
    if i >= 2 {
      node = node.with_input("root", InputBinding::node("n0", Some("value")));
    }
    flow = flow.with_node(node);
  }
  for pair in ids.windows(2) {
    flow = flow.with_edge(FlowEdge::new(pair[0].as_str(), pair[1].as_str()));
  }
  flow.nodes[SIZE].inputs.insert("stray".to_string(), InputBinding::node("island", None));

  let started = std::time::Instant::now();
  let report = Validator::new().validate(&flow);

  assert!(started.elapsed() < std::time::Duration::from_secs(3));
  assert!(report.is_valid);
  assert_eq!(report.warnings.len(), 1);
  assert!(report.warnings[0].message.contains("'island'"));
  assert_eq!(report.warnings[0].nodes, vec![ids[SIZE - 1].clone()]);
}
