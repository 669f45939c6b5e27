use std::collections::{HashMap, VecDeque};

use flowlab_config::{FlowDefinition, FlowNode};

use crate::error::WorkflowError;

/// A resolved edge between two arena indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
  /// Position of the edge in [`FlowDefinition::edges`].
  pub edge_index: usize,
  pub from: usize,
  pub to: usize,
}

/// An edge with at least one endpoint that names no node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingEdge {
  pub edge_index: usize,
  pub missing: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
  White,
  Gray,
  Black,
}

/// Arena representation of a flow graph.
///
/// Nodes are addressed by their index in a flat vector; adjacency is stored as
/// edge indices, resolved once from node ids. The graph holds no references
/// into the definition, so it can be shared across tasks behind an `Arc`.
///
/// Construction never fails: duplicate node ids keep their first definition
/// and edges naming unknown nodes are set aside as dangling. The validator
/// reports both.
#[derive(Debug, Clone)]
pub struct FlowGraph {
  node_ids: Vec<String>,
  /// Arena index -> position in [`FlowDefinition::nodes`].
  positions: Vec<usize>,
  index: HashMap<String, usize>,
  duplicates: Vec<String>,
  edges: Vec<GraphEdge>,
  dangling: Vec<DanglingEdge>,
  outgoing: Vec<Vec<usize>>,
  incoming: Vec<Vec<usize>>,
}

impl FlowGraph {
  /// Build the graph for a flow definition.
  pub fn new(flow: &FlowDefinition) -> Self {
    let mut node_ids = Vec::with_capacity(flow.nodes.len());
    let mut positions = Vec::with_capacity(flow.nodes.len());
    let mut index = HashMap::with_capacity(flow.nodes.len());
    let mut duplicates = Vec::new();

    for (position, node) in flow.nodes.iter().enumerate() {
      if index.contains_key(&node.node_id) {
        duplicates.push(node.node_id.clone());
        continue;
      }
      index.insert(node.node_id.clone(), node_ids.len());
      node_ids.push(node.node_id.clone());
      positions.push(position);
    }

    let mut edges = Vec::with_capacity(flow.edges.len());
    let mut dangling = Vec::new();
    let mut outgoing = vec![Vec::new(); node_ids.len()];
    let mut incoming = vec![Vec::new(); node_ids.len()];

    for (edge_index, edge) in flow.edges.iter().enumerate() {
      match (index.get(&edge.from), index.get(&edge.to)) {
        (Some(&from), Some(&to)) => {
          outgoing[from].push(edges.len());
          incoming[to].push(edges.len());
          edges.push(GraphEdge {
            edge_index,
            from,
            to,
          });
        }
        (from, to) => {
          let mut missing = Vec::new();
          if from.is_none() {
            missing.push(edge.from.clone());
          }
          if to.is_none() && (edge.to != edge.from || from.is_some()) {
            missing.push(edge.to.clone());
          }
          dangling.push(DanglingEdge {
            edge_index,
            missing,
          });
        }
      }
    }

    Self {
      node_ids,
      positions,
      index,
      duplicates,
      edges,
      dangling,
      outgoing,
      incoming,
    }
  }

  pub fn len(&self) -> usize {
    self.node_ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.node_ids.is_empty()
  }

  pub fn index_of(&self, node_id: &str) -> Option<usize> {
    self.index.get(node_id).copied()
  }

  pub fn node_id(&self, idx: usize) -> &str {
    &self.node_ids[idx]
  }

  /// The node definition behind an arena index.
  pub fn node<'a>(&self, flow: &'a FlowDefinition, idx: usize) -> &'a FlowNode {
    &flow.nodes[self.positions[idx]]
  }

  pub fn edges(&self) -> &[GraphEdge] {
    &self.edges
  }

  pub fn edge(&self, edge: usize) -> &GraphEdge {
    &self.edges[edge]
  }

  /// Indices into [`FlowGraph::edges`] leaving a node.
  pub fn outgoing(&self, idx: usize) -> &[usize] {
    &self.outgoing[idx]
  }

  /// Indices into [`FlowGraph::edges`] entering a node.
  pub fn incoming(&self, idx: usize) -> &[usize] {
    &self.incoming[idx]
  }

  pub fn successors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
    self.outgoing[idx].iter().map(|&e| self.edges[e].to)
  }

  pub fn predecessors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
    self.incoming[idx].iter().map(|&e| self.edges[e].from)
  }

  /// Nodes with no incoming edges.
  pub fn entry_points(&self) -> Vec<usize> {
    (0..self.len())
      .filter(|&idx| self.incoming[idx].is_empty())
      .collect()
  }

  /// Nodes with no outgoing edges.
  pub fn leaves(&self) -> Vec<usize> {
    (0..self.len())
      .filter(|&idx| self.outgoing[idx].is_empty())
      .collect()
  }

  /// Number of incoming edges per node.
  pub fn in_degrees(&self) -> Vec<usize> {
    self.incoming.iter().map(Vec::len).collect()
  }

  pub fn duplicates(&self) -> &[String] {
    &self.duplicates
  }

  pub fn dangling_edges(&self) -> &[DanglingEdge] {
    &self.dangling
  }

  /// Find cycles with an iterative depth-first search.
  ///
  /// Each back-edge yields one chain, starting and ending at the node the
  /// back-edge points to. Traversal order follows node and edge definition
  /// order, so the result is deterministic.
  pub fn find_cycles(&self) -> Vec<Vec<usize>> {
    let n = self.len();
    let mut color = vec![Color::White; n];
    let mut depth = vec![0usize; n];
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut cycles = Vec::new();

    for start in 0..n {
      if color[start] != Color::White {
        continue;
      }
      color[start] = Color::Gray;
      depth[start] = 0;
      stack.push((start, 0));

      while let Some(top) = stack.len().checked_sub(1) {
        let (node, pos) = stack[top];
        if pos < self.outgoing[node].len() {
          stack[top].1 += 1;
          let next = self.edges[self.outgoing[node][pos]].to;
          match color[next] {
            Color::White => {
              color[next] = Color::Gray;
              depth[next] = stack.len();
              stack.push((next, 0));
            }
            Color::Gray => {
              let mut chain: Vec<usize> = stack[depth[next]..].iter().map(|&(n, _)| n).collect();
              chain.push(next);
              cycles.push(chain);
            }
            Color::Black => {}
          }
        } else {
          color[node] = Color::Black;
          stack.pop();
        }
      }
    }

    cycles
  }

  /// A topological order of all nodes (Kahn's algorithm).
  pub fn topological_order(&self) -> Result<Vec<usize>, WorkflowError> {
    let mut remaining = self.in_degrees();
    let mut queue: VecDeque<usize> = self.entry_points().into();
    let mut order = Vec::with_capacity(self.len());

    while let Some(idx) = queue.pop_front() {
      order.push(idx);
      for &e in &self.outgoing[idx] {
        let to = self.edges[e].to;
        remaining[to] -= 1;
        if remaining[to] == 0 {
          queue.push_back(to);
        }
      }
    }

    if order.len() != self.len() {
      let chain = self
        .find_cycles()
        .first()
        .map(|c| self.describe_chain(c))
        .unwrap_or_default();
      return Err(WorkflowError::CyclicDependency { chain });
    }
    Ok(order)
  }

  /// All transitive successors of a node, as a membership vector.
  pub fn descendants(&self, idx: usize) -> Vec<bool> {
    let mut seen = vec![false; self.len()];
    let mut queue: VecDeque<usize> = self.successors(idx).collect();
    while let Some(down) = queue.pop_front() {
      if seen[down] {
        continue;
      }
      seen[down] = true;
      queue.extend(self.successors(down));
    }
    seen
  }

  /// Render a chain of arena indices as `a -> b -> a`.
  pub fn describe_chain(&self, chain: &[usize]) -> String {
    chain
      .iter()
      .map(|&idx| self.node_ids[idx].as_str())
      .collect::<Vec<_>>()
      .join(" -> ")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flowlab_config::{FlowEdge, FlowNode};

  fn flow(nodes: &[&str], edges: &[(&str, &str)]) -> FlowDefinition {
    let mut flow = FlowDefinition::new("f", "F");
    for id in nodes {
      flow = flow.with_node(FlowNode::new(*id, "transform"));
    }
    for (from, to) in edges {
      flow = flow.with_edge(FlowEdge::new(*from, *to));
    }
    flow
  }

  #[test]
  fn test_adjacency() {
    let graph = FlowGraph::new(&flow(&["a", "b", "c"], &[("a", "b"), ("a", "c")]));
    let a = graph.index_of("a").unwrap();

    assert_eq!(graph.entry_points(), vec![a]);
    assert_eq!(graph.successors(a).count(), 2);
    assert_eq!(graph.leaves().len(), 2);
    assert_eq!(graph.in_degrees(), vec![0, 1, 1]);
  }

  #[test]
  fn test_dangling_and_duplicates() {
    let mut f = flow(&["a", "a", "b"], &[("a", "z"), ("a", "b")]);
    f.edges.push(FlowEdge::new("y", "y"));
    let graph = FlowGraph::new(&f);

    assert_eq!(graph.len(), 2);
    assert_eq!(graph.duplicates(), ["a".to_string()]);
    assert_eq!(graph.dangling_edges().len(), 2);
    assert_eq!(graph.dangling_edges()[0].missing, vec!["z".to_string()]);
    assert_eq!(graph.dangling_edges()[1].missing, vec!["y".to_string()]);
    assert_eq!(graph.edges().len(), 1);
  }

  #[test]
  fn test_find_cycle_chain() {
    let graph = FlowGraph::new(&flow(
      &["a", "b", "c", "d"],
      &[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")],
    ));
    let cycles = graph.find_cycles();

    assert_eq!(cycles.len(), 1);
    assert_eq!(graph.describe_chain(&cycles[0]), "a -> b -> c -> a");
    assert!(graph.topological_order().is_err());
  }

  #[test]
  fn test_self_loop_is_cycle() {
    let graph = FlowGraph::new(&flow(&["a"], &[("a", "a")]));
    assert_eq!(graph.describe_chain(&graph.find_cycles()[0]), "a -> a");
  }

  #[test]
  fn test_deep_chain_does_not_overflow() {
    let ids: Vec<String> = (0..50_000).map(|i| format!("n{i}")).collect();
    let mut f = FlowDefinition::new("f", "F");
    for id in &ids {
      f.nodes.push(FlowNode::new(id.clone(), "transform"));
    }
    for pair in ids.windows(2) {
      f.edges.push(FlowEdge::new(pair[0].clone(), pair[1].clone()));
    }
    let graph = FlowGraph::new(&f);

    assert!(graph.find_cycles().is_empty());
    assert_eq!(graph.topological_order().unwrap().len(), ids.len());
  }

  #[test]
  fn test_descendants() {
    let graph = FlowGraph::new(&flow(
      &["a", "b", "c", "d"],
      &[("a", "b"), ("b", "c"), ("d", "c")],
    ));
    let seen = graph.descendants(graph.index_of("a").unwrap());

    assert!(seen[graph.index_of("b").unwrap()]);
    assert!(seen[graph.index_of("c").unwrap()]);
    assert!(!seen[graph.index_of("a").unwrap()]);
    assert!(!seen[graph.index_of("d").unwrap()]);
  }
}
