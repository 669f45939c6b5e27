//! Progress events and notifiers.
//!
//! Events are emitted after every node state transition and at flow start and
//! end so that consumers can stream progress, persist it, or render it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowlab_store::FailureReason;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
  FlowStarted {
    flow_id: String,
    node_count: usize,
  },

  /// A node's dependencies are satisfied and it is waiting to run.
  NodeScheduled { node_id: String },

  NodeStarted { node_id: String, attempt: u32 },

  /// An attempt failed and the node will be tried again.
  NodeRetrying {
    node_id: String,
    attempt: u32,
    error: String,
  },

  NodeCompleted {
    node_id: String,
    output: serde_json::Value,
  },

  NodeFailed {
    node_id: String,
    error: String,
    reason: FailureReason,
  },

  /// Every incoming conditional edge was inactive.
  NodeSkipped { node_id: String },

  FlowCompleted { output: serde_json::Value },

  FlowFailed { error: String },

  FlowCancelled,
}

/// An [`ExecutionEvent`] stamped with its execution and overall progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
  pub execution_id: String,
  pub timestamp: DateTime<Utc>,
  /// Share of nodes in a terminal state, 0 to 100.
  pub percent_complete: u8,
  #[serde(flatten)]
  pub event: ExecutionEvent,
}

/// Trait for receiving progress events.
///
/// The orchestrator calls `notify` for each event. Implementations must not
/// block; slow consumers should hand events off to a channel.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ProgressEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ProgressEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// The channel is unbounded: a slow consumer never stalls scheduling.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ProgressEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ProgressEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// A notifier backed by a callback.
pub struct FnNotifier<F>(F);

impl<F> FnNotifier<F>
where
  F: Fn(ProgressEvent) + Send + Sync,
{
  pub fn new(callback: F) -> Self {
    Self(callback)
  }
}

impl<F> ExecutionNotifier for FnNotifier<F>
where
  F: Fn(ProgressEvent) + Send + Sync,
{
  fn notify(&self, event: ProgressEvent) {
    (self.0)(event)
  }
}

/// A channel notifier together with its receiving end.
pub fn progress_channel() -> (Arc<ChannelNotifier>, mpsc::UnboundedReceiver<ProgressEvent>) {
  let (sender, receiver) = mpsc::unbounded_channel();
  (Arc::new(ChannelNotifier::new(sender)), receiver)
}

/// Stamps events for one execution before handing them to the notifier.
#[derive(Clone)]
pub(crate) struct EventSink {
  execution_id: String,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl EventSink {
  pub(crate) fn new(execution_id: impl Into<String>, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    Self {
      execution_id: execution_id.into(),
      notifier,
    }
  }

  pub(crate) fn emit(&self, percent_complete: u8, event: ExecutionEvent) {
    self.notifier.notify(ProgressEvent {
      execution_id: self.execution_id.clone(),
      timestamp: Utc::now(),
      percent_complete,
      event,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_progress_event_serializes_flat() {
    let event = ProgressEvent {
      execution_id: "exec-1".to_string(),
      timestamp: Utc::now(),
      percent_complete: 50,
      event: ExecutionEvent::NodeFailed {
        node_id: "b".to_string(),
        error: "boom".to_string(),
        reason: FailureReason::ExecutorError,
      },
    };

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], json!("node_failed"));
    assert_eq!(value["node_id"], json!("b"));
    assert_eq!(value["reason"], json!("executor_error"));
    assert_eq!(value["percent_complete"], json!(50));
  }

  #[tokio::test]
  async fn test_channel_notifier_survives_dropped_receiver() {
    let (notifier, receiver) = progress_channel();
    drop(receiver);
    EventSink::new("exec-1", notifier).emit(0, ExecutionEvent::FlowCancelled);
  }
}
