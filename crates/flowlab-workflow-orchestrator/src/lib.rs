//! Flowlab Workflow Orchestrator
//!
//! Executes flow definitions as DAGs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     FlowOrchestrator                        │
//! │  - execute_flow(flow_id, inputs, options, notifier, cancel) │
//! │  - validation, Kahn scheduling, concurrency limit            │
//! │  - retries, flow deadline, persistence, progress events     │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        NodeRunner                           │
//! │  - execute_node(node, inputs, attempt, timeout, cancel)     │
//! │  - timing, timeout, panic capture, error translation        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              ExecutorRegistry → NodeExecutor                │
//! │  - prompt (ModelProvider), transform, conditional, ...      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let registry = ExecutorRegistry::with_builtins(Arc::new(EchoProvider::new()));
//! let orchestrator = FlowOrchestrator::new(registry, Arc::new(MemoryStore::new()));
//!
//! let result = orchestrator
//!   .execute_definition(flow, inputs, FlowOptions::new(), Arc::new(NoopNotifier), CancellationToken::new())
//!   .await?;
//! ```

mod config;
mod context;
mod error;
mod events;
mod input;
mod node;
mod orchestrator;
mod result;
mod retry;

pub use config::{DEFAULT_MAX_CONCURRENCY, FlowOptions, OrchestratorConfig};
pub use error::{InputResolutionError, OrchestratorError};
pub use events::{
  ChannelNotifier, ExecutionEvent, ExecutionNotifier, FnNotifier, NoopNotifier, ProgressEvent,
  progress_channel,
};
pub use input::{InputScope, resolve_inputs, select_path};
pub use node::{NodeExecutionResult, NodeRunner};
pub use orchestrator::{FlowOrchestrator, FlowRun};
pub use result::{ExecutionDetails, FlowExecutionResult};
pub use retry::RetryPolicy;
