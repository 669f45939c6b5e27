//! Node execution runtime for flowlab.
//!
//! Defines the [`NodeExecutor`] seam the orchestrator dispatches to, the
//! [`ModelProvider`] capability used by prompt nodes, and the
//! [`ExecutorRegistry`] mapping node-type tags to executors.

mod error;
mod executor;
pub mod nodes;
mod provider;
mod registry;

pub use error::{NodeError, ProviderError};
pub use executor::{Inputs, NodeContext, NodeExecutor, NodeOutput, Usage};
pub use provider::{ModelProvider, TemplateRef, TemplateRequest, TemplateResponse};
pub use registry::ExecutorRegistry;
