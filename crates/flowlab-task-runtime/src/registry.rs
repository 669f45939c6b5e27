//! Node executor registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::executor::NodeExecutor;
use crate::nodes::{
  CONDITIONAL_NODE, ConditionalExecutor, PASSTHROUGH_NODE, PROMPT_NODE, PassthroughExecutor,
  PromptExecutor, TRANSFORM_NODE, TransformExecutor,
};
use crate::provider::ModelProvider;

/// Maps node-type tags to executors.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
  executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with the built-in node types. Prompt nodes use `provider`.
  pub fn with_builtins(provider: Arc<dyn ModelProvider>) -> Self {
    Self::new()
      .with(PROMPT_NODE, PromptExecutor::new(provider))
      .with(TRANSFORM_NODE, TransformExecutor)
      .with(CONDITIONAL_NODE, ConditionalExecutor)
      .with(PASSTHROUGH_NODE, PassthroughExecutor)
  }

  /// Register an executor, replacing any previous one for the same tag.
  pub fn register(&mut self, node_type: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
    self.executors.insert(node_type.into(), executor);
  }

  pub fn with(mut self, node_type: impl Into<String>, executor: impl NodeExecutor + 'static) -> Self {
    self.register(node_type, Arc::new(executor));
    self
  }

  pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
    self.executors.get(node_type).cloned()
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.executors.contains_key(node_type)
  }

  /// Registered tags, sorted.
  pub fn node_types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.executors.keys().cloned().collect();
    types.sort();
    types
  }
}

impl fmt::Debug for ExecutorRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutorRegistry")
      .field("node_types", &self.node_types())
      .finish()
  }
}
