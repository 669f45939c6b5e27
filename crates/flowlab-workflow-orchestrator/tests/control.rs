mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{SCRIPT, SlowProvider, harness, harness_with, inputs, sleep_config};
use flowlab_config::{FailurePolicy, FlowDefinition, FlowEdge, FlowNode, RetryBackoff};
use flowlab_store::{FailureReason, FlowStatus, MemoryStore, NodeStatus, Store};
use flowlab_task_runtime::ExecutorRegistry;
use flowlab_workflow_orchestrator::{
  ExecutionEvent, FlowOptions, FlowOrchestrator, NoopNotifier, OrchestratorConfig, RetryPolicy,
  progress_channel,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn independent(count: usize, sleep_ms: u64) -> FlowDefinition {
  (0..count).fold(FlowDefinition::new("wide", "Wide"), |flow, i| {
    flow.with_node(FlowNode::new(format!("n{}", i), SCRIPT).with_config(sleep_config(sleep_ms)))
  })
}

fn chain(sleep_ms: u64) -> FlowDefinition {
  FlowDefinition::new("chain", "Chain")
    .with_node(FlowNode::new("a", SCRIPT).with_config(sleep_config(sleep_ms)))
    .with_node(FlowNode::new("b", SCRIPT))
    .with_edge(FlowEdge::new("a", "b"))
}

fn cancel_after(ms: u64) -> CancellationToken {
  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    trigger.cancel();
  });
  cancel
}

#[tokio::test]
async fn test_cancellation_stops_scheduling() {
  let h = harness();

  let started = Instant::now();
  let result = h
    .orchestrator
    .execute_definition(
      chain(300),
      inputs(json!({})),
      FlowOptions::new(),
      Arc::new(NoopNotifier),
      cancel_after(50),
    )
    .await
    .unwrap();

  assert!(started.elapsed() < Duration::from_secs(2));
  assert_eq!(result.status, FlowStatus::Cancelled);
  assert!(!result.success);
  // Started before the cancel, so it runs to the end.
  assert_eq!(result.node("a").unwrap().status, NodeStatus::Completed);
  assert_eq!(h.recorder.calls_for("a").len(), 1);
  assert_ne!(result.node("b").unwrap().status, NodeStatus::Completed);
  assert!(h.recorder.calls_for("b").is_empty());

  let stored = h.store.get_flow_execution(&result.execution_id).await.unwrap();
  assert_eq!(stored.status, FlowStatus::Cancelled);
  assert!(h.orchestrator.active_executions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_status_is_stable() {
  for round in 0..5 {
    let h = harness();
    let result = h
      .orchestrator
      .execute_definition(
        chain(100),
        inputs(json!({})),
        FlowOptions::new(),
        Arc::new(NoopNotifier),
        cancel_after(20),
      )
      .await
      .unwrap();

    assert_eq!(result.status, FlowStatus::Cancelled, "round {}", round);
    assert_eq!(result.node("a").unwrap().status, NodeStatus::Completed, "round {}", round);
    assert!(h.recorder.calls_for("b").is_empty(), "round {}", round);
  }
}

#[tokio::test]
async fn test_cancel_lets_running_prompt_finish() {
  let provider = Arc::new(SlowProvider::new(300));
  let store = Arc::new(MemoryStore::new());
  let orchestrator = FlowOrchestrator::new(
    ExecutorRegistry::with_builtins(provider.clone()),
    store.clone() as Arc<dyn Store>,
  );
  let flow = FlowDefinition::new("prompts", "Prompts")
    .with_node(FlowNode::new("a", "prompt").with_config(json!({ "template": "first" })))
    .with_node(FlowNode::new("b", "prompt").with_config(json!({ "template": "second" })))
    .with_edge(FlowEdge::new("a", "b"));

  let result = orchestrator
    .execute_definition(
      flow,
      inputs(json!({})),
      FlowOptions::new(),
      Arc::new(NoopNotifier),
      cancel_after(50),
    )
    .await
    .unwrap();

  assert_eq!(result.status, FlowStatus::Cancelled);
  let a = result.node("a").unwrap();
  assert_eq!(a.status, NodeStatus::Completed);
  assert_eq!(a.output.as_ref().unwrap().0["content"], json!("first"));
  assert_ne!(result.node("b").unwrap().status, NodeStatus::Completed);
  assert_eq!(provider.prompts.load(Ordering::SeqCst), 1);

  let stored = store.list_node_executions(&result.execution_id).await.unwrap();
  assert!(
    stored
      .iter()
      .any(|r| r.node_id == "a" && r.status == NodeStatus::Completed)
  );
}

#[tokio::test]
async fn test_cancel_execution_by_id() {
  let h = harness();
  h.store.save_flow_definition(&chain(300)).await.unwrap();

  let mut run = h
    .orchestrator
    .start_flow("chain", inputs(json!({})), FlowOptions::new());

  // Wait until the run is live.
  loop {
    let event = run.events.recv().await.unwrap();
    if matches!(event.event, ExecutionEvent::FlowStarted { .. }) {
      break;
    }
  }
  assert_eq!(h.orchestrator.active_executions(), vec![run.execution_id.clone()]);
  assert!(h.orchestrator.cancel_execution(&run.execution_id));
  assert!(!h.orchestrator.cancel_execution("no-such-execution"));

  let execution_id = run.execution_id.clone();
  let result = run.wait().await.unwrap();
  assert_eq!(result.execution_id, execution_id);
  assert_eq!(result.status, FlowStatus::Cancelled);
  assert_eq!(
    h.orchestrator.get_execution_status(&execution_id).await.unwrap(),
    FlowStatus::Cancelled
  );
  assert!(!h.orchestrator.cancel_execution(&execution_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_limit() {
  let h = harness_with(OrchestratorConfig {
    max_concurrency: 2,
    ..OrchestratorConfig::default()
  });

  let result = h
    .orchestrator
    .execute_definition(
      independent(6, 40),
      inputs(json!({})),
      FlowOptions::new(),
      Arc::new(NoopNotifier),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert!(result.success);
  assert_eq!(h.recorder.calls().len(), 6);
  assert!(h.recorder.max_running() <= 2, "ran {} at once", h.recorder.max_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_nodes_run_in_parallel() {
  let h = harness();
  let started = Instant::now();

  let result = h
    .orchestrator
    .execute_definition(
      independent(4, 200),
      inputs(json!({})),
      FlowOptions::new(),
      Arc::new(NoopNotifier),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert!(result.success);
  assert!(started.elapsed() < Duration::from_millis(700));
  assert!(h.recorder.max_running() >= 2);
}

#[tokio::test]
async fn test_retries_until_success() {
  let h = harness();
  let flow = FlowDefinition::new("flaky", "Flaky")
    .with_node(FlowNode::new("flaky", SCRIPT).with_config(json!({ "fail_times": 2, "output": "ok" })));

  let (notifier, mut events) = progress_channel();
  let result = h
    .orchestrator
    .execute_definition(
      flow.clone(),
      inputs(json!({})),
      FlowOptions::new().with_retry(RetryPolicy::attempts(2).with_backoff(RetryBackoff::Constant, 1)),
      notifier,
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert!(result.success);
  assert_eq!(result.output, json!("ok"));
  assert_eq!(result.node("flaky").unwrap().attempts, 3);
  let attempts: Vec<u32> = h.recorder.calls().iter().map(|c| c.attempt).collect();
  assert_eq!(attempts, vec![1, 2, 3]);

  let mut retries = 0;
  while let Ok(event) = events.try_recv() {
    if matches!(event.event, ExecutionEvent::NodeRetrying { .. }) {
      retries += 1;
    }
  }
  assert_eq!(retries, 2);

  // One retry is not enough.
  let h = harness();
  let result = h
    .orchestrator
    .execute_definition(
      flow,
      inputs(json!({})),
      FlowOptions::new().with_retry(RetryPolicy::attempts(1).with_backoff(RetryBackoff::Constant, 1)),
      Arc::new(NoopNotifier),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  let record = result.node("flaky").unwrap();
  assert_eq!(record.status, NodeStatus::Failed);
  assert_eq!(record.attempts, 2);
  assert_eq!(record.failure_reason, Some(FailureReason::ExecutorError));
}

#[tokio::test]
async fn test_node_timeout_is_not_retried() {
  let h = harness();
  let flow = FlowDefinition::new("slow", "Slow").with_node(
    FlowNode::new("slow", SCRIPT)
      .with_config(sleep_config(5_000))
      .with_timeout_ms(50),
  );

  let started = Instant::now();
  let result = h
    .orchestrator
    .execute_definition(
      flow,
      inputs(json!({})),
      FlowOptions::new().with_retry(RetryPolicy::attempts(3).with_backoff(RetryBackoff::Constant, 1)),
      Arc::new(NoopNotifier),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert!(started.elapsed() < Duration::from_secs(2));
  assert_eq!(result.status, FlowStatus::Failed);
  let record = result.node("slow").unwrap();
  assert_eq!(record.failure_reason, Some(FailureReason::NodeTimeout));
  assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn test_flow_deadline() {
  let h = harness();

  let started = Instant::now();
  let result = h
    .orchestrator
    .execute_definition(
      chain(5_000),
      inputs(json!({})),
      FlowOptions::new().with_timeout_ms(50),
      Arc::new(NoopNotifier),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert!(started.elapsed() < Duration::from_secs(2));
  assert_eq!(result.status, FlowStatus::Failed);
  assert_eq!(result.error.as_deref(), Some("flow timed out"));
  assert!(h.recorder.calls_for("b").is_empty());
}

fn failing_with_sibling() -> FlowDefinition {
  FlowDefinition::new("policy", "Policy")
    .with_node(FlowNode::new("bad", SCRIPT).with_config(json!({ "fail": true })))
    .with_node(FlowNode::new("slow", SCRIPT).with_config(sleep_config(50)))
    .with_node(FlowNode::new("after_slow", SCRIPT))
    .with_edge(FlowEdge::new("slow", "after_slow"))
}

#[tokio::test]
async fn test_failure_policies() {
  let run = |policy: FailurePolicy| async move {
    let h = harness();
    let result = h
      .orchestrator
      .execute_definition(
        failing_with_sibling(),
        inputs(json!({})),
        FlowOptions::new().with_failure_policy(policy),
        Arc::new(NoopNotifier),
        CancellationToken::new(),
      )
      .await
      .unwrap();
    (result, h)
  };

  let (result, h) = run(FailurePolicy::ContinueIndependent).await;
  assert_eq!(result.status, FlowStatus::Failed);
  assert_eq!(result.node("after_slow").unwrap().status, NodeStatus::Completed);
  assert_eq!(h.recorder.calls_for("after_slow").len(), 1);

  let (result, h) = run(FailurePolicy::HaltOnFailure).await;
  assert_eq!(result.status, FlowStatus::Failed);
  assert!(result.error.as_deref().unwrap().contains("'bad'"));
  // Already running when the failure happened.
  assert_eq!(result.node("slow").unwrap().status, NodeStatus::Completed);
  assert_eq!(result.node("after_slow").unwrap().status, NodeStatus::Pending);
  assert!(h.recorder.calls_for("after_slow").is_empty());

  let stored = h.store.list_node_executions(&result.execution_id).await.unwrap();
  assert!(
    stored
      .iter()
      .any(|r| r.node_id == "after_slow" && r.status == NodeStatus::Pending)
  );
}

#[tokio::test]
async fn test_fail_flow_node_overrides_policy() {
  let h = harness();
  let mut flow = failing_with_sibling();
  flow.nodes[0].fail_flow = Some(true);

  let result = h
    .orchestrator
    .execute_definition(
      flow,
      inputs(json!({})),
      FlowOptions::new(),
      Arc::new(NoopNotifier),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(result.node("after_slow").unwrap().status, NodeStatus::Pending);
}

#[tokio::test]
async fn test_progress_events() {
  let h = harness();
  let flow = FlowDefinition::new("steps", "Steps")
    .with_node(FlowNode::new("a", SCRIPT).with_config(json!({ "output": 1 })))
    .with_node(FlowNode::new("b", SCRIPT).with_config(json!({ "output": 2 })))
    .with_edge(FlowEdge::new("a", "b"));

  let (notifier, mut events) = progress_channel();
  let result = h
    .orchestrator
    .execute_definition(
      flow,
      inputs(json!({})),
      FlowOptions::new().with_execution_id("exec-1"),
      notifier,
      CancellationToken::new(),
    )
    .await
    .unwrap();
  assert_eq!(result.execution_id, "exec-1");

  let mut received = Vec::new();
  while let Ok(event) = events.try_recv() {
    received.push(event);
  }

  assert!(received.iter().all(|e| e.execution_id == "exec-1"));
  assert!(matches!(
    received.first().map(|e| &e.event),
    Some(ExecutionEvent::FlowStarted { node_count: 2, .. })
  ));
  let last = received.last().unwrap();
  assert!(matches!(last.event, ExecutionEvent::FlowCompleted { .. }));
  assert_eq!(last.percent_complete, 100);

  let completed: Vec<&str> = received
    .iter()
    .filter_map(|e| match &e.event {
      ExecutionEvent::NodeCompleted { node_id, .. } => Some(node_id.as_str()),
      _ => None,
    })
    .collect();
  assert_eq!(completed, vec!["a", "b"]);

  let percents: Vec<u8> = received.iter().map(|e| e.percent_complete).collect();
  assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);

  let json = serde_json::to_value(last).unwrap();
  assert_eq!(json["type"], "flow_completed");
  assert_eq!(json["execution_id"], "exec-1");
}
