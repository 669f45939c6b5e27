//! Per-execution scheduling state.
//!
//! One mutex guards the in-degree counters, edge states, node records and
//! outputs of an execution. It is never held across an await. Counter
//! decrements and ready detection happen under the same lock, so two
//! predecessors finishing at once cannot schedule a successor twice.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use flowlab_config::{FlowDefinition, FlowEdge, FlowNode};
use flowlab_store::{FailureReason, Json, NodeExecution, NodeStatus};
use flowlab_task_runtime::Inputs;
use flowlab_workflow::{FlowGraph, expr};
use serde_json::Value;

use crate::error::InputResolutionError;
use crate::input::{InputScope, resolve_inputs};
use crate::node::NodeExecutionResult;

#[derive(Debug, Clone, PartialEq)]
enum EdgeState {
  Pending,
  Active,
  Inactive,
  SourceFailed,
  ConditionFailed(String),
}

enum Disposition {
  Run,
  Skip,
  Fail(FailureReason, String),
}

/// State changes produced by one scheduling step.
#[derive(Debug, Default)]
pub(crate) struct Advance {
  /// Nodes whose dependencies are satisfied and that should run, in order.
  pub ready: Vec<usize>,
  /// Records that reached a terminal state without running or just finished.
  pub finished: Vec<NodeExecution>,
}

/// The final attempt of a node plus how many attempts were made.
#[derive(Debug, Clone)]
pub(crate) struct NodeRun {
  pub result: NodeExecutionResult,
  pub attempts: u32,
}

struct State {
  remaining: Vec<usize>,
  edges: Vec<EdgeState>,
  records: Vec<Option<NodeExecution>>,
  outputs: HashMap<String, Value>,
  finished: usize,
  first_error: Option<String>,
  total_tokens: u64,
  total_cost: f64,
}

pub(crate) struct ExecutionContext {
  execution_id: String,
  flow: Arc<FlowDefinition>,
  graph: Arc<FlowGraph>,
  variables: Inputs,
  state: Mutex<State>,
}

impl ExecutionContext {
  pub fn new(
    execution_id: impl Into<String>,
    flow: Arc<FlowDefinition>,
    graph: Arc<FlowGraph>,
    variables: Inputs,
  ) -> Self {
    let state = State {
      remaining: graph.in_degrees(),
      edges: vec![EdgeState::Pending; graph.edges().len()],
      records: vec![None; graph.len()],
      outputs: HashMap::new(),
      finished: 0,
      first_error: None,
      total_tokens: 0,
      total_cost: 0.0,
    };
    Self {
      execution_id: execution_id.into(),
      flow,
      graph,
      variables,
      state: Mutex::new(state),
    }
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn node(&self, idx: usize) -> &FlowNode {
    self.graph.node(&self.flow, idx)
  }

  pub fn flow_node(&self, node_id: &str) -> Option<&FlowNode> {
    self.graph.index_of(node_id).map(|idx| self.node(idx))
  }

  /// Admit the entry points.
  pub fn start(&self) -> Advance {
    let mut state = self.lock();
    let mut advance = Advance::default();
    let mut settled = VecDeque::new();
    for idx in self.graph.entry_points() {
      self.admit(&mut state, idx, &mut advance, &mut settled);
    }
    self.settle(&mut state, &mut settled, &mut advance);
    advance
  }

  /// Resolve a ready node's inputs and mark it running.
  pub fn begin(&self, idx: usize) -> Result<Inputs, InputResolutionError> {
    let mut state = self.lock();
    let active: Vec<&FlowEdge> = self
      .graph
      .incoming(idx)
      .iter()
      .filter(|&&e| state.edges[e] == EdgeState::Active)
      .map(|&e| &self.flow.edges[self.graph.edge(e).edge_index])
      .collect();
    let scope = InputScope {
      variables: &self.variables,
      outputs: &state.outputs,
      active_edges: &active,
    };
    let resolved = resolve_inputs(self.node(idx), &scope);

    if let Some(record) = state.records[idx].as_mut() {
      record.status = NodeStatus::Running;
      record.started_at = Some(Utc::now());
      if let Ok(inputs) = &resolved {
        record.input = Some(Json(Value::Object(inputs.clone())));
      }
    }
    resolved
  }

  /// Record a node's final attempt and release its successors.
  pub fn complete(&self, idx: usize, run: NodeRun) -> Advance {
    let mut state = self.lock();
    let mut advance = Advance::default();
    let node = self.node(idx);
    let mut record = state.records[idx]
      .take()
      .unwrap_or_else(|| NodeExecution::pending(&self.execution_id, &node.node_id, &node.node_type));

    let NodeRun { result, attempts } = run;
    let started_at = record.started_at.unwrap_or(result.started_at);
    record.status = result.status;
    record.attempts = i32::try_from(attempts).unwrap_or(i32::MAX);
    record.error = result.error;
    record.failure_reason = result.failure_reason;
    record.started_at = Some(started_at);
    record.completed_at = Some(result.completed_at);
    record.duration_ms = Some((result.completed_at - started_at).num_milliseconds().max(0));
    if let Some(usage) = &result.usage {
      record.tokens_used = i64::try_from(usage.tokens_used).unwrap_or(i64::MAX);
      record.cost_estimate = usage.cost_estimate;
      state.total_tokens = state.total_tokens.saturating_add(usage.tokens_used);
      state.total_cost += usage.cost_estimate;
    }
    if let Some(output) = result.output {
      if record.status == NodeStatus::Completed {
        state.outputs.insert(node.node_id.clone(), output.clone());
      }
      record.output = Some(Json(output));
    }

    self.finish(&mut state, idx, record, &mut advance);
    let mut settled = VecDeque::from([idx]);
    self.settle(&mut state, &mut settled, &mut advance);
    advance
  }

  fn finish(&self, state: &mut State, idx: usize, record: NodeExecution, advance: &mut Advance) {
    state.finished += 1;
    if record.status == NodeStatus::Failed
      && record.failure_reason != Some(FailureReason::UpstreamDependencyFailed)
      && state.first_error.is_none()
    {
      state.first_error = Some(format!(
        "node '{}' failed: {}",
        record.node_id,
        record.error.as_deref().unwrap_or("unknown error")
      ));
    }
    advance.finished.push(record.clone());
    state.records[idx] = Some(record);
  }

  /// Create the record of a node whose in-degree reached zero and decide
  /// whether it runs, fails or is skipped.
  fn admit(&self, state: &mut State, idx: usize, advance: &mut Advance, settled: &mut VecDeque<usize>) {
    let node = self.node(idx);
    let mut record = NodeExecution::pending(&self.execution_id, &node.node_id, &node.node_type);

    match self.disposition(state, idx) {
      Disposition::Run => {
        state.records[idx] = Some(record);
        advance.ready.push(idx);
      }
      Disposition::Skip => {
        record.status = NodeStatus::Skipped;
        record.completed_at = Some(Utc::now());
        self.finish(state, idx, record, advance);
        settled.push_back(idx);
      }
      Disposition::Fail(reason, error) => {
        record.status = NodeStatus::Failed;
        record.failure_reason = Some(reason);
        record.error = Some(error);
        record.completed_at = Some(Utc::now());
        self.finish(state, idx, record, advance);
        settled.push_back(idx);
      }
    }
  }

  fn disposition(&self, state: &State, idx: usize) -> Disposition {
    let incoming = self.graph.incoming(idx);
    if incoming.is_empty() {
      return Disposition::Run;
    }

    let mut active = false;
    let mut condition_error = None;
    for &e in incoming {
      match &state.edges[e] {
        EdgeState::SourceFailed => {
          let source = self.graph.node_id(self.graph.edge(e).from);
          return Disposition::Fail(
            FailureReason::UpstreamDependencyFailed,
            format!("upstream node '{}' failed", source),
          );
        }
        EdgeState::ConditionFailed(message) => {
          if condition_error.is_none() {
            condition_error = Some(message.clone());
          }
        }
        EdgeState::Active => active = true,
        EdgeState::Inactive | EdgeState::Pending => {}
      }
    }

    match (condition_error, active) {
      (Some(message), _) => Disposition::Fail(FailureReason::ConditionEvaluation, message),
      (None, true) => Disposition::Run,
      (None, false) => Disposition::Skip,
    }
  }

  /// Resolve the outgoing edges of terminal nodes, admitting successors whose
  /// in-degree drops to zero. Skips and upstream failures cascade through the
  /// queue without recursion.
  fn settle(&self, state: &mut State, settled: &mut VecDeque<usize>, advance: &mut Advance) {
    while let Some(done) = settled.pop_front() {
      let status = state.records[done].as_ref().map(|r| r.status);
      let output = state.outputs.get(self.graph.node_id(done)).cloned();
      let mut condition_ctx: Option<Value> = None;

      for &e in self.graph.outgoing(done) {
        let edge = *self.graph.edge(e);
        let definition = &self.flow.edges[edge.edge_index];

        state.edges[e] = match (status, &definition.condition) {
          (Some(NodeStatus::Completed), None) => EdgeState::Active,
          (Some(NodeStatus::Completed), Some(condition)) => {
            let ctx = condition_ctx.get_or_insert_with(|| self.condition_context(output.as_ref()));
            match expr::evaluate_condition(condition, ctx) {
              Ok(true) => EdgeState::Active,
              Ok(false) => EdgeState::Inactive,
              Err(err) => EdgeState::ConditionFailed(format!(
                "condition on edge {} -> {} failed: {}",
                definition.from, definition.to, err
              )),
            }
          }
          (Some(NodeStatus::Failed), _) => EdgeState::SourceFailed,
          _ => EdgeState::Inactive,
        };

        state.remaining[edge.to] = state.remaining[edge.to].saturating_sub(1);
        if state.remaining[edge.to] == 0 {
          self.admit(state, edge.to, advance, settled);
        }
      }
    }
  }

  /// Flow variables at the top level and the source output under `output`.
  fn condition_context(&self, output: Option<&Value>) -> Value {
    let mut ctx = self.variables.clone();
    ctx.insert(
      "output".to_string(),
      output.cloned().unwrap_or(Value::Null),
    );
    Value::Object(ctx)
  }

  pub fn percent_complete(&self) -> u8 {
    let state = self.lock();
    percent(state.finished, self.graph.len())
  }

  pub fn is_finished(&self) -> bool {
    self.lock().finished == self.graph.len()
  }

  pub fn first_error(&self) -> Option<String> {
    self.lock().first_error.clone()
  }

  pub fn totals(&self) -> (u64, f64) {
    let state = self.lock();
    (state.total_tokens, state.total_cost)
  }

  /// Every record created so far, in definition order.
  pub fn records(&self) -> Vec<NodeExecution> {
    self.lock().records.iter().flatten().cloned().collect()
  }

  /// Output of the flow: a single leaf's output directly, otherwise the
  /// completed leaf outputs keyed by node id.
  pub fn final_output(&self) -> Value {
    let state = self.lock();
    let leaves = self.graph.leaves();
    if let [leaf] = leaves.as_slice() {
      return state
        .outputs
        .get(self.graph.node_id(*leaf))
        .cloned()
        .unwrap_or(Value::Null);
    }
    let outputs: Inputs = leaves
      .iter()
      .filter_map(|&leaf| {
        let id = self.graph.node_id(leaf);
        state.outputs.get(id).map(|output| (id.to_string(), output.clone()))
      })
      .collect();
    Value::Object(outputs)
  }
}

pub(crate) fn percent(finished: usize, total: usize) -> u8 {
  if total == 0 {
    return 100;
  }
  u8::try_from(finished.min(total) * 100 / total).unwrap_or(100)
}
