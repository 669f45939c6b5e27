#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use flowlab_store::{MemoryStore, Store};
use flowlab_task_runtime::{
  ExecutorRegistry, Inputs, ModelProvider, NodeContext, NodeError, NodeExecutor, NodeOutput,
  ProviderError, TemplateRequest, TemplateResponse, Usage,
};
use flowlab_workflow_orchestrator::{FlowOrchestrator, OrchestratorConfig};
use serde_json::{Value, json};

pub const SCRIPT: &str = "script";

/// One executor invocation as recorded.
#[derive(Debug, Clone)]
pub struct Call {
  pub node_id: String,
  pub attempt: u32,
  pub started: Instant,
  pub finished: Instant,
}

/// Records what scripted executors did.
#[derive(Debug, Default)]
pub struct Recorder {
  calls: Mutex<Vec<Call>>,
  running: AtomicUsize,
  max_running: AtomicUsize,
}

impl Recorder {
  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_for(&self, node_id: &str) -> Vec<Call> {
    self
      .calls()
      .into_iter()
      .filter(|c| c.node_id == node_id)
      .collect()
  }

  pub fn max_running(&self) -> usize {
    self.max_running.load(Ordering::SeqCst)
  }

  /// The last invocation of each node, keyed by node id.
  pub fn last_calls(&self) -> HashMap<String, Call> {
    self
      .calls()
      .into_iter()
      .map(|c| (c.node_id.clone(), c))
      .collect()
  }
}

/// Executor driven by its node config:
///
/// - `sleep_ms`: wait before answering, or until cancelled
/// - `fail`: always fail
/// - `fail_times`: fail the first N attempts
/// - `output`: value to return; defaults to the inputs object
pub struct ScriptedExecutor {
  recorder: Arc<Recorder>,
}

#[async_trait]
impl NodeExecutor for ScriptedExecutor {
  async fn execute(
    &self,
    ctx: &NodeContext,
    config: &Value,
    inputs: &Inputs,
  ) -> Result<NodeOutput, NodeError> {
    let started = Instant::now();
    let now_running = self.recorder.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.recorder.max_running.fetch_max(now_running, Ordering::SeqCst);

    let mut cancelled = false;
    if let Some(ms) = config["sleep_ms"].as_u64() {
      tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
        _ = ctx.cancel.cancelled() => cancelled = true,
      }
    }

    let fail_times = config["fail_times"].as_u64().unwrap_or(0);
    let result = if cancelled {
      Err(NodeError::Cancelled)
    } else if config["fail"].as_bool().unwrap_or(false) || u64::from(ctx.attempt) <= fail_times {
      Err(NodeError::failed(format!("{} failed on attempt {}", ctx.node_id, ctx.attempt)))
    } else {
      let value = config
        .get("output")
        .cloned()
        .unwrap_or_else(|| Value::Object(inputs.clone()));
      Ok(NodeOutput::new(value))
    };

    self.recorder.running.fetch_sub(1, Ordering::SeqCst);
    self.recorder.calls.lock().unwrap().push(Call {
      node_id: ctx.node_id.clone(),
      attempt: ctx.attempt,
      started,
      finished: Instant::now(),
    });
    result
  }
}

/// Provider answering every prompt with its rendered length in tokens.
pub struct CountingProvider;

#[async_trait]
impl ModelProvider for CountingProvider {
  async fn execute(&self, request: TemplateRequest) -> Result<TemplateResponse, ProviderError> {
    let body = request.template.body.unwrap_or_default();
    let tokens = body.split_whitespace().count() as u64;
    Ok(TemplateResponse {
      content: format!("answer to: {}", body),
      tokens_used: tokens,
      cost_estimate: tokens as f64 * 0.01,
      duration_ms: 1,
      model: Some("counting".to_string()),
    })
  }
}

/// Provider that takes `delay` to answer and counts the prompts it saw.
pub struct SlowProvider {
  pub delay: Duration,
  pub prompts: AtomicUsize,
}

impl SlowProvider {
  pub fn new(delay_ms: u64) -> Self {
    Self {
      delay: Duration::from_millis(delay_ms),
      prompts: AtomicUsize::new(0),
    }
  }
}

#[async_trait]
impl ModelProvider for SlowProvider {
  async fn execute(&self, request: TemplateRequest) -> Result<TemplateResponse, ProviderError> {
    self.prompts.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(self.delay).await;
    Ok(TemplateResponse {
      content: request.template.body.unwrap_or_default(),
      tokens_used: 1,
      cost_estimate: 0.0,
      duration_ms: self.delay.as_millis() as u64,
      model: None,
    })
  }
}

pub fn registry(recorder: &Arc<Recorder>) -> ExecutorRegistry {
  ExecutorRegistry::with_builtins(Arc::new(CountingProvider)).with(
    SCRIPT,
    ScriptedExecutor {
      recorder: recorder.clone(),
    },
  )
}

pub struct Harness {
  pub orchestrator: FlowOrchestrator,
  pub store: Arc<MemoryStore>,
  pub recorder: Arc<Recorder>,
}

pub fn harness() -> Harness {
  harness_with(OrchestratorConfig::default())
}

pub fn harness_with(config: OrchestratorConfig) -> Harness {
  let recorder = Arc::new(Recorder::default());
  let store = Arc::new(MemoryStore::new());
  let orchestrator =
    FlowOrchestrator::new(registry(&recorder), store.clone() as Arc<dyn Store>).with_config(config);
  Harness {
    orchestrator,
    store,
    recorder,
  }
}

pub fn inputs(value: Value) -> Inputs {
  value.as_object().cloned().unwrap_or_default()
}

pub fn sleep_config(ms: u64) -> Value {
  json!({ "sleep_ms": ms })
}
