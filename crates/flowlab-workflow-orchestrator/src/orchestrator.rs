//! Flow orchestrator implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use flowlab_config::FlowDefinition;
use flowlab_store::{
  FailureReason, FlowExecution, FlowStatus, Json, NodeExecution, NodeStatus, Store,
};
use flowlab_task_runtime::{ExecutorRegistry, Inputs};
use flowlab_workflow::{FlowGraph, ValidationReport, Validator};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{FlowOptions, OrchestratorConfig, Settings};
use crate::context::{Advance, ExecutionContext, NodeRun, percent};
use crate::error::OrchestratorError;
use crate::events::{EventSink, ExecutionEvent, ExecutionNotifier, ProgressEvent, progress_channel};
use crate::node::{NodeExecutionResult, NodeRunner};
use crate::result::{ExecutionDetails, FlowExecutionResult};

/// Why scheduling stopped before every node finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
  /// A node failed under `halt_on_failure`, with `fail_flow`, or timed out.
  Failure,
  Cancelled,
  TimedOut,
}

/// A flow started in the background with [`FlowOrchestrator::start_flow`].
pub struct FlowRun {
  pub execution_id: String,
  /// Progress stream. Ends when the run finishes and the sender is dropped.
  pub events: mpsc::UnboundedReceiver<ProgressEvent>,
  /// Cancels this run cooperatively.
  pub cancel: CancellationToken,
  pub handle: JoinHandle<Result<FlowExecutionResult, OrchestratorError>>,
}

impl FlowRun {
  /// Wait for the run to finish. Unconsumed events are dropped.
  pub async fn wait(self) -> Result<FlowExecutionResult, OrchestratorError> {
    self
      .handle
      .await
      .map_err(|e| OrchestratorError::TaskJoin {
        message: e.to_string(),
      })?
  }
}

/// Removes an execution from the active set when dropped.
struct ActiveGuard {
  active: Arc<Mutex<HashMap<String, CancellationToken>>>,
  execution_id: String,
}

impl Drop for ActiveGuard {
  fn drop(&mut self) {
    self
      .active
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&self.execution_id);
  }
}

/// Executes flows.
///
/// Handles validation, Kahn scheduling over the flow graph, concurrency
/// limits, retries, cancellation and persistence. Individual nodes are run
/// through [`NodeRunner`], which dispatches to the [`ExecutorRegistry`].
#[derive(Clone)]
pub struct FlowOrchestrator {
  registry: Arc<ExecutorRegistry>,
  store: Arc<dyn Store>,
  config: Arc<OrchestratorConfig>,
  active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl FlowOrchestrator {
  pub fn new(registry: ExecutorRegistry, store: Arc<dyn Store>) -> Self {
    Self {
      registry: Arc::new(registry),
      store,
      config: Arc::new(OrchestratorConfig::default()),
      active: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
    self.config = Arc::new(config);
    self
  }

  pub fn registry(&self) -> &ExecutorRegistry {
    &self.registry
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  /// Validate a definition against the registered node types.
  pub fn validate(&self, flow: &FlowDefinition) -> ValidationReport {
    Validator::new()
      .with_node_types(self.registry.node_types())
      .validate(flow)
  }

  /// Load a flow from the store and execute it.
  pub async fn execute_flow(
    &self,
    flow_id: &str,
    inputs: Inputs,
    options: FlowOptions,
    notifier: Arc<dyn ExecutionNotifier>,
    cancel: CancellationToken,
  ) -> Result<FlowExecutionResult, OrchestratorError> {
    let flow = self.store.load_flow_definition(flow_id).await?;
    self
      .execute_definition(flow, inputs, options, notifier, cancel)
      .await
  }

  /// Execute a definition the caller already holds.
  ///
  /// Returns `Err` only for definition problems and store failures. Node
  /// failures, timeouts and cancellation produce an `Ok` result with the
  /// matching status.
  pub async fn execute_definition(
    &self,
    flow: FlowDefinition,
    inputs: Inputs,
    options: FlowOptions,
    notifier: Arc<dyn ExecutionNotifier>,
    cancel: CancellationToken,
  ) -> Result<FlowExecutionResult, OrchestratorError> {
    let report = self.validate(&flow);
    if !report.is_valid {
      warn!(
        flow_id = %flow.flow_id,
        errors = %report.summary(),
        "flow_rejected"
      );
      return Err(OrchestratorError::InvalidFlowDefinition {
        flow_id: flow.flow_id.clone(),
        report,
      });
    }
    if !flow.active {
      return Err(OrchestratorError::InactiveFlow {
        flow_id: flow.flow_id.clone(),
      });
    }

    let variables = flow.apply_variable_defaults(&inputs);
    if let Some(missing) = flow
      .variables
      .iter()
      .find(|v| v.required && !variables.contains_key(&v.name))
    {
      return Err(OrchestratorError::MissingRequiredVariable {
        flow_id: flow.flow_id.clone(),
        variable: missing.name.clone(),
      });
    }

    let execution_id = options
      .execution_id
      .clone()
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let settings = Settings::resolve(&self.config, &options, &flow);

    let token = cancel.child_token();
    let _guard = self.register(&execution_id, token.clone());

    self
      .run(
        Arc::new(flow),
        execution_id,
        inputs,
        variables,
        settings,
        notifier,
        token,
      )
      .await
  }

  /// Start a flow in the background and stream its progress.
  ///
  /// The execution id is known before the run begins, so the caller can
  /// cancel it or query the store while it runs.
  pub fn start_flow(
    &self,
    flow_id: impl Into<String>,
    inputs: Inputs,
    options: FlowOptions,
  ) -> FlowRun {
    let execution_id = options
      .execution_id
      .clone()
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let options = options.with_execution_id(execution_id.clone());
    let (notifier, events) = progress_channel();
    let cancel = CancellationToken::new();

    let this = self.clone();
    let flow_id = flow_id.into();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
      this
        .execute_flow(&flow_id, inputs, options, notifier, token)
        .await
    });

    FlowRun {
      execution_id,
      events,
      cancel,
      handle,
    }
  }

  /// Current status of an execution as stored.
  pub async fn get_execution_status(
    &self,
    execution_id: &str,
  ) -> Result<FlowStatus, OrchestratorError> {
    Ok(self.store.get_flow_execution(execution_id).await?.status)
  }

  /// A stored execution with its node records.
  pub async fn get_execution(&self, execution_id: &str) -> Result<ExecutionDetails, OrchestratorError> {
    let execution = self.store.get_flow_execution(execution_id).await?;
    let nodes = self.store.list_node_executions(execution_id).await?;
    Ok(ExecutionDetails { execution, nodes })
  }

  /// Request cancellation of a running execution.
  ///
  /// Returns false when no execution with that id is running in this
  /// orchestrator.
  pub fn cancel_execution(&self, execution_id: &str) -> bool {
    let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
    match active.get(execution_id) {
      Some(token) => {
        info!(execution_id = %execution_id, "flow cancellation requested");
        token.cancel();
        true
      }
      None => false,
    }
  }

  /// Ids of executions currently running in this orchestrator.
  pub fn active_executions(&self) -> Vec<String> {
    let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
    let mut ids: Vec<String> = active.keys().cloned().collect();
    ids.sort();
    ids
  }

  fn register(&self, execution_id: &str, token: CancellationToken) -> ActiveGuard {
    self
      .active
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(execution_id.to_string(), token);
    ActiveGuard {
      active: self.active.clone(),
      execution_id: execution_id.to_string(),
    }
  }

  #[instrument(
    name = "flow_execute",
    skip_all,
    fields(
      flow_id = %flow.flow_id,
      execution_id = %execution_id,
    )
  )]
  #[allow(clippy::too_many_arguments)]
  async fn run(
    &self,
    flow: Arc<FlowDefinition>,
    execution_id: String,
    inputs: Inputs,
    variables: Inputs,
    settings: Settings,
    notifier: Arc<dyn ExecutionNotifier>,
    token: CancellationToken,
  ) -> Result<FlowExecutionResult, OrchestratorError> {
    let sink = EventSink::new(&execution_id, notifier);
    let graph = Arc::new(FlowGraph::new(&flow));

    let mut execution = FlowExecution::start(
      &execution_id,
      &flow.flow_id,
      &flow.version,
      serde_json::Value::Object(inputs),
    );
    self.store.save_flow_execution(&execution).await?;

    info!(
      execution_id = %execution_id,
      flow_id = %flow.flow_id,
      node_count = graph.len(),
      "flow_started"
    );
    sink.emit(
      0,
      ExecutionEvent::FlowStarted {
        flow_id: flow.flow_id.clone(),
        node_count: graph.len(),
      },
    );

    let ctx = Arc::new(ExecutionContext::new(
      &execution_id,
      flow.clone(),
      graph.clone(),
      variables,
    ));
    let runner = NodeRunner::new(self.registry.clone(), &execution_id, &flow.flow_id);
    let settings = Arc::new(settings);
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrency));
    // Keeps queued nodes from starting; cancelled with the run or at the deadline.
    let stop = token.child_token();
    // Handed to executors. Only the deadline interrupts work already running.
    let node_cancel = CancellationToken::new();

    let mut scheduler = Scheduler {
      ctx: ctx.clone(),
      sink: sink.clone(),
      store: self.store.clone(),
      settings: settings.clone(),
      ready: VecDeque::new(),
      halt: None,
      store_error: None,
      internal_error: None,
    };

    let deadline = settings.flow_timeout_ms.map(Duration::from_millis);
    let timer = tokio::time::sleep(deadline.unwrap_or(Duration::MAX));
    tokio::pin!(timer);

    let mut tasks: JoinSet<(usize, Option<NodeRun>)> = JoinSet::new();
    scheduler.apply(ctx.start()).await;

    loop {
      while scheduler.can_schedule() {
        if token.is_cancelled() {
          scheduler.halt(Halt::Cancelled);
          break;
        }
        let Some(idx) = scheduler.ready.pop_front() else {
          break;
        };
        tasks.spawn(run_node(
          idx,
          ctx.clone(),
          runner.clone(),
          semaphore.clone(),
          settings.clone(),
          sink.clone(),
          stop.clone(),
          node_cancel.clone(),
        ));
      }

      if tasks.is_empty() {
        break;
      }

      tokio::select! {
        biased;

        _ = token.cancelled(), if scheduler.halt.is_none() => {
          warn!(execution_id = %execution_id, "flow cancelled during node execution");
          scheduler.halt(Halt::Cancelled);
          stop.cancel();
        }
        _ = &mut timer, if deadline.is_some() && scheduler.halt.is_none() => {
          warn!(execution_id = %execution_id, "flow deadline reached");
          scheduler.halt(Halt::TimedOut);
          stop.cancel();
          node_cancel.cancel();
        }
        joined = tasks.join_next() => match joined {
          Some(Ok((idx, Some(run)))) => {
            let advance = ctx.complete(idx, run);
            scheduler.apply(advance).await;
          }
          // Never started: cancelled while waiting for a permit.
          Some(Ok((_, None))) | None => {}
          Some(Err(e)) => {
            error!(execution_id = %execution_id, error = %e, "node task join error");
            scheduler.internal_error = Some(format!("node task join error: {}", e));
            scheduler.halt(Halt::Failure);
          }
        },
      }
    }

    // The last node may have finished in the same poll that saw the cancel.
    if token.is_cancelled() {
      scheduler.halt(Halt::Cancelled);
    }

    if let Some(err) = scheduler.store_error.take() {
      error!(execution_id = %execution_id, error = %err, "flow aborted by store error");
      return Err(err.into());
    }

    // Records of nodes that became ready but never ran.
    let records = ctx.records();
    for record in records.iter().filter(|r| !r.status.is_terminal()) {
      self.store.save_node_execution(record).await?;
    }

    let finished = ctx.is_finished();
    let failure = scheduler.internal_error.take().or_else(|| ctx.first_error());
    // A cancel or deadline that arrives after every node succeeded changes nothing.
    let interrupted = !finished || failure.is_some();
    let (status, error) = match (scheduler.halt, failure) {
      (Some(Halt::Cancelled), _) if interrupted => {
        (FlowStatus::Cancelled, Some("flow cancelled".to_string()))
      }
      (Some(Halt::TimedOut), _) if interrupted => {
        (FlowStatus::Failed, Some("flow timed out".to_string()))
      }
      (_, Some(error)) => (FlowStatus::Failed, Some(error)),
      (_, None) if !finished => (
        FlowStatus::Failed,
        Some("flow halted before all nodes finished".to_string()),
      ),
      (_, None) => (FlowStatus::Completed, None),
    };

    let output = ctx.final_output();
    let (total_tokens, total_cost) = ctx.totals();
    let completed_at = Utc::now();
    execution.status = status;
    execution.output = Some(Json(output.clone()));
    execution.error = error.clone();
    execution.completed_at = Some(completed_at);
    execution.duration_ms = Some((completed_at - execution.started_at).num_milliseconds().max(0));
    execution.total_tokens = i64::try_from(total_tokens).unwrap_or(i64::MAX);
    execution.total_cost = total_cost;
    self.store.save_flow_execution(&execution).await?;

    let percent_complete = percent(
      records.iter().filter(|r| r.status.is_terminal()).count(),
      graph.len(),
    );
    match status {
      FlowStatus::Completed => {
        info!(
          execution_id = %execution_id,
          duration_ms = execution.duration_ms.unwrap_or(0),
          total_tokens,
          "flow_completed"
        );
        sink.emit(percent_complete, ExecutionEvent::FlowCompleted { output });
      }
      FlowStatus::Cancelled => {
        warn!(execution_id = %execution_id, "flow_cancelled");
        sink.emit(percent_complete, ExecutionEvent::FlowCancelled);
      }
      FlowStatus::Failed | FlowStatus::Running => {
        let error = error.unwrap_or_default();
        error!(execution_id = %execution_id, error = %error, "flow_failed");
        sink.emit(percent_complete, ExecutionEvent::FlowFailed { error });
      }
    }

    Ok(FlowExecutionResult::new(&execution, records))
  }
}

/// Bookkeeping of the scheduling loop of one execution.
struct Scheduler {
  ctx: Arc<ExecutionContext>,
  sink: EventSink,
  store: Arc<dyn Store>,
  settings: Arc<Settings>,
  ready: VecDeque<usize>,
  halt: Option<Halt>,
  store_error: Option<flowlab_store::Error>,
  internal_error: Option<String>,
}

impl Scheduler {
  fn can_schedule(&self) -> bool {
    self.halt.is_none() && self.store_error.is_none() && !self.ready.is_empty()
  }

  fn halt(&mut self, halt: Halt) {
    if self.halt.is_none() {
      self.halt = Some(halt);
    }
  }

  /// Persist and announce terminal records, then queue ready nodes.
  async fn apply(&mut self, advance: Advance) {
    let Advance { ready, finished } = advance;
    let percent_complete = self.ctx.percent_complete();

    for record in finished {
      if self.store_error.is_none() {
        if let Err(err) = self.store.save_node_execution(&record).await {
          self.store_error = Some(err);
        }
      }
      self.announce(&record, percent_complete);
    }

    for idx in ready {
      self.sink.emit(
        percent_complete,
        ExecutionEvent::NodeScheduled {
          node_id: self.ctx.node(idx).node_id.clone(),
        },
      );
      self.ready.push_back(idx);
    }
  }

  fn announce(&mut self, record: &NodeExecution, percent_complete: u8) {
    match record.status {
      NodeStatus::Completed => {
        info!(
          execution_id = %record.execution_id,
          node_id = %record.node_id,
          attempts = record.attempts,
          duration_ms = record.duration_ms.unwrap_or(0),
          "node_completed"
        );
        self.sink.emit(
          percent_complete,
          ExecutionEvent::NodeCompleted {
            node_id: record.node_id.clone(),
            output: record
              .output
              .as_ref()
              .map(|o| o.0.clone())
              .unwrap_or(serde_json::Value::Null),
          },
        );
      }
      NodeStatus::Skipped => {
        info!(
          execution_id = %record.execution_id,
          node_id = %record.node_id,
          "node_skipped"
        );
        self.sink.emit(
          percent_complete,
          ExecutionEvent::NodeSkipped {
            node_id: record.node_id.clone(),
          },
        );
      }
      NodeStatus::Failed => {
        let reason = record
          .failure_reason
          .unwrap_or(FailureReason::ExecutorError);
        let error = record.error.clone().unwrap_or_default();
        error!(
          execution_id = %record.execution_id,
          node_id = %record.node_id,
          reason = ?reason,
          error = %error,
          "node_failed"
        );

        let halts = match reason {
          FailureReason::UpstreamDependencyFailed => false,
          FailureReason::NodeTimeout => true,
          _ => self
            .ctx
            .flow_node(&record.node_id)
            .is_some_and(|node| self.settings.halts_on_failure(node)),
        };
        if halts {
          self.halt(Halt::Failure);
        }

        self.sink.emit(
          percent_complete,
          ExecutionEvent::NodeFailed {
            node_id: record.node_id.clone(),
            error,
            reason,
          },
        );
      }
      NodeStatus::Pending | NodeStatus::Running => {}
    }
  }
}

/// Body of one spawned node task.
///
/// `stop` prevents the node from starting and ends its retries. `cancel` is
/// what the executor sees. Returns `None` when the node never started because
/// the run stopped while it waited for a concurrency permit.
#[allow(clippy::too_many_arguments)]
async fn run_node(
  idx: usize,
  ctx: Arc<ExecutionContext>,
  runner: NodeRunner,
  semaphore: Arc<Semaphore>,
  settings: Arc<Settings>,
  sink: EventSink,
  stop: CancellationToken,
  cancel: CancellationToken,
) -> (usize, Option<NodeRun>) {
  let _permit = tokio::select! {
    permit = semaphore.acquire_owned() => match permit {
      Ok(permit) => permit,
      Err(_) => return (idx, None),
    },
    _ = stop.cancelled() => return (idx, None),
  };
  if stop.is_cancelled() {
    return (idx, None);
  }

  let node = ctx.node(idx);
  let inputs = match ctx.begin(idx) {
    Ok(inputs) => inputs,
    Err(err) => {
      let result = NodeExecutionResult::failed_now(
        &node.node_id,
        FailureReason::InputResolution,
        err.to_string(),
      );
      return (idx, Some(NodeRun { result, attempts: 0 }));
    }
  };

  let retry = settings.node_retry(node);
  let timeout = settings.node_timeout_ms(node).map(Duration::from_millis);
  let mut attempt = 1;

  loop {
    info!(
      execution_id = %runner.execution_id(),
      node_id = %node.node_id,
      attempt,
      "node_started"
    );
    sink.emit(
      ctx.percent_complete(),
      ExecutionEvent::NodeStarted {
        node_id: node.node_id.clone(),
        attempt,
      },
    );

    let result = runner
      .execute_node(node, &inputs, attempt, timeout, cancel.clone())
      .await;

    let exhausted = attempt > retry.max_retry_attempts;
    if result.is_success() || !result.retryable || exhausted || stop.is_cancelled() {
      return (
        idx,
        Some(NodeRun {
          result,
          attempts: attempt,
        }),
      );
    }

    let delay = retry.delay(attempt);
    let error = result.error.clone().unwrap_or_default();
    warn!(
      execution_id = %runner.execution_id(),
      node_id = %node.node_id,
      attempt,
      delay_ms = delay.as_millis() as u64,
      error = %error,
      "node_retrying"
    );
    sink.emit(
      ctx.percent_complete(),
      ExecutionEvent::NodeRetrying {
        node_id: node.node_id.clone(),
        attempt,
        error,
      },
    );

    tokio::select! {
      _ = tokio::time::sleep(delay) => {}
      _ = stop.cancelled() => {
        return (idx, Some(NodeRun { result, attempts: attempt }));
      }
    }
    attempt += 1;
  }
}
