//! Input resolution for nodes.
//!
//! A node's inputs come from its declared bindings and from the data mappings
//! of its active incoming edges:
//!
//! - `literal` bindings are used as-is.
//! - `variable` bindings read the flow's input variables.
//! - `node` bindings select a field of an upstream output with a dotted path.
//! - `template` bindings render against the variables plus `nodes.<id>`.
//! - `edge` bindings and undeclared mapped names take the value an edge
//!   mapping selects from its source's output.
//!
//! A node with no declared inputs and no mappings receives the outputs of its
//! active upstream nodes keyed by node id.

use std::collections::{BTreeMap, HashMap};

use flowlab_config::{FlowEdge, FlowNode, InputBinding};
use flowlab_task_runtime::Inputs;
use flowlab_workflow::{NODES_CONTEXT_KEY, expr};
use serde_json::Value;

use crate::error::InputResolutionError;

/// Everything visible to a node while its inputs are resolved.
pub struct InputScope<'a> {
  /// Flow input variables, defaults applied.
  pub variables: &'a Inputs,
  /// Outputs of completed nodes, keyed by node id.
  pub outputs: &'a HashMap<String, Value>,
  /// Incoming edges whose source completed and whose condition held.
  pub active_edges: &'a [&'a FlowEdge],
}

/// Select a field of `value` by a dotted path such as `items.0.title`.
///
/// An empty path selects the whole value.
pub fn select_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
  let path = path.trim();
  if path.is_empty() || path == "." {
    return Some(value);
  }
  path.split('.').try_fold(value, |current, segment| match current {
    Value::Object(map) => map.get(segment),
    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

/// Resolve every input of `node`.
pub fn resolve_inputs(
  node: &FlowNode,
  scope: &InputScope<'_>,
) -> Result<Inputs, InputResolutionError> {
  // Input name -> (source node, path). The first edge mapping a name wins.
  let mut mapped: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
  for edge in scope.active_edges {
    for (input, path) in &edge.mapping {
      mapped
        .entry(input.as_str())
        .or_insert((edge.from.as_str(), path.as_str()));
    }
  }

  let mut resolved = Inputs::new();

  for (name, binding) in &node.inputs {
    let value = resolve_binding(node, name, binding, mapped.get(name.as_str()), scope)?;
    resolved.insert(name.clone(), value);
  }

  for (name, (source, path)) in &mapped {
    if node.inputs.contains_key(*name) {
      continue;
    }
    let value = mapped_value(node, name, source, path, scope)?;
    resolved.insert((*name).to_string(), value);
  }

  if node.inputs.is_empty() && mapped.is_empty() {
    for edge in scope.active_edges {
      if let Some(output) = scope.outputs.get(&edge.from) {
        resolved.insert(edge.from.clone(), output.clone());
      }
    }
  }

  Ok(resolved)
}

fn resolve_binding(
  node: &FlowNode,
  name: &str,
  binding: &InputBinding,
  mapping: Option<&(&str, &str)>,
  scope: &InputScope<'_>,
) -> Result<Value, InputResolutionError> {
  match binding {
    InputBinding::Literal { value } => Ok(value.clone()),

    InputBinding::Variable { variable, default } => scope
      .variables
      .get(variable)
      .or(default.as_ref())
      .cloned()
      .ok_or_else(|| InputResolutionError::MissingVariable {
        node_id: node.node_id.clone(),
        input: name.to_string(),
        variable: variable.clone(),
      }),

    InputBinding::Node {
      node: source,
      path,
      default,
    } => {
      let Some(output) = scope.outputs.get(source) else {
        return default
          .clone()
          .ok_or_else(|| InputResolutionError::MissingOutput {
            node_id: node.node_id.clone(),
            input: name.to_string(),
            source_node: source.clone(),
          });
      };
      let path = path.as_deref().unwrap_or("");
      select_path(output, path)
        .or(default.as_ref())
        .cloned()
        .ok_or_else(|| InputResolutionError::MissingPath {
          node_id: node.node_id.clone(),
          input: name.to_string(),
          source_node: source.clone(),
          path: path.to_string(),
        })
    }

    InputBinding::Template { template } => {
      expr::render(template, &template_context(scope)).map_err(|e| {
        InputResolutionError::Template {
          node_id: node.node_id.clone(),
          input: name.to_string(),
          message: e.to_string(),
        }
      })
    }

    InputBinding::Edge { default } => match mapping {
      Some((source, path)) => match mapped_value(node, name, source, path, scope) {
        Ok(value) => Ok(value),
        Err(err) => default.clone().ok_or(err),
      },
      None => default
        .clone()
        .ok_or_else(|| InputResolutionError::MissingEdgeValue {
          node_id: node.node_id.clone(),
          input: name.to_string(),
        }),
    },
  }
}

fn mapped_value(
  node: &FlowNode,
  name: &str,
  source: &str,
  path: &str,
  scope: &InputScope<'_>,
) -> Result<Value, InputResolutionError> {
  let output = scope
    .outputs
    .get(source)
    .ok_or_else(|| InputResolutionError::MissingOutput {
      node_id: node.node_id.clone(),
      input: name.to_string(),
      source_node: source.to_string(),
    })?;
  select_path(output, path)
    .cloned()
    .ok_or_else(|| InputResolutionError::MissingPath {
      node_id: node.node_id.clone(),
      input: name.to_string(),
      source_node: source.to_string(),
      path: path.to_string(),
    })
}

/// Variables at the top level, upstream outputs under `nodes`.
fn template_context(scope: &InputScope<'_>) -> Value {
  let mut ctx = scope.variables.clone();
  let nodes: Inputs = scope
    .outputs
    .iter()
    .map(|(id, output)| (id.clone(), output.clone()))
    .collect();
  ctx.insert(NODES_CONTEXT_KEY.to_string(), Value::Object(nodes));
  Value::Object(ctx)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn vars(value: Value) -> Inputs {
    value.as_object().cloned().unwrap_or_default()
  }

  fn outputs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
      .iter()
      .map(|(id, v)| (id.to_string(), v.clone()))
      .collect()
  }

  #[test]
  fn test_select_path() {
    let value = json!({ "items": [{ "title": "first" }], "count": 2 });
    assert_eq!(select_path(&value, ""), Some(&value));
    assert_eq!(select_path(&value, "count"), Some(&json!(2)));
    assert_eq!(select_path(&value, "items.0.title"), Some(&json!("first")));
    assert_eq!(select_path(&value, "items.5"), None);
    assert_eq!(select_path(&value, "count.deeper"), None);
  }

  #[test]
  fn test_declared_bindings() {
    let node = FlowNode::new("b", "transform")
      .with_input("fixed", InputBinding::literal(7))
      .with_input("topic", InputBinding::variable("topic"))
      .with_input("tone", InputBinding::variable("tone").with_default("dry"))
      .with_input("title", InputBinding::node("a", Some("meta.title")))
      .with_input("line", InputBinding::template("{{ topic }}: {{ nodes.a.meta.title }}"));

    let variables = vars(json!({ "topic": "rust" }));
    let outputs = outputs(&[("a", json!({ "meta": { "title": "Ownership" } }))]);
    let scope = InputScope {
      variables: &variables,
      outputs: &outputs,
      active_edges: &[],
    };

    let inputs = resolve_inputs(&node, &scope).unwrap();
    assert_eq!(inputs["fixed"], json!(7));
    assert_eq!(inputs["topic"], json!("rust"));
    assert_eq!(inputs["tone"], json!("dry"));
    assert_eq!(inputs["title"], json!("Ownership"));
    assert_eq!(inputs["line"], json!("rust: Ownership"));
  }

  #[test]
  fn test_missing_variable_names_node_and_key() {
    let node = FlowNode::new("b", "transform").with_input("topic", InputBinding::variable("topic"));
    let variables = Inputs::new();
    let outputs = HashMap::new();
    let scope = InputScope {
      variables: &variables,
      outputs: &outputs,
      active_edges: &[],
    };

    let err = resolve_inputs(&node, &scope).unwrap_err();
    assert_eq!(
      err,
      InputResolutionError::MissingVariable {
        node_id: "b".to_string(),
        input: "topic".to_string(),
        variable: "topic".to_string(),
      }
    );
  }

  #[test]
  fn test_edge_mapping() {
    let edge = FlowEdge::new("a", "b").map("summary", "content").map("whole", "");
    let node = FlowNode::new("b", "transform")
      .with_input("summary", InputBinding::edge())
      .with_input("extra", InputBinding::edge().with_default("none"));

    let variables = Inputs::new();
    let outputs = outputs(&[("a", json!({ "content": "short" }))]);
    let edges = [&edge];
    let scope = InputScope {
      variables: &variables,
      outputs: &outputs,
      active_edges: &edges,
    };

    let inputs = resolve_inputs(&node, &scope).unwrap();
    assert_eq!(inputs["summary"], json!("short"));
    assert_eq!(inputs["extra"], json!("none"));
    assert_eq!(inputs["whole"], json!({ "content": "short" }));
  }

  #[test]
  fn test_unbound_node_receives_upstream_outputs() {
    let left = FlowEdge::new("left", "merge");
    let right = FlowEdge::new("right", "merge");
    let node = FlowNode::new("merge", "passthrough");

    let variables = Inputs::new();
    let outputs = outputs(&[("left", json!(1)), ("right", json!(2))]);
    let edges = [&left, &right];
    let scope = InputScope {
      variables: &variables,
      outputs: &outputs,
      active_edges: &edges,
    };

    let inputs = resolve_inputs(&node, &scope).unwrap();
    assert_eq!(Value::Object(inputs), json!({ "left": 1, "right": 2 }));
  }
}
