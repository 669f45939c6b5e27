//! Built-in node types.

mod conditional;
mod passthrough;
mod prompt;
mod transform;

pub use conditional::ConditionalExecutor;
pub use passthrough::PassthroughExecutor;
pub use prompt::{PromptConfig, PromptExecutor};
pub use transform::TransformExecutor;

pub const PROMPT_NODE: &str = "prompt";
pub const TRANSFORM_NODE: &str = "transform";
pub const CONDITIONAL_NODE: &str = "conditional";
pub const PASSTHROUGH_NODE: &str = "passthrough";

/// Deserialize a node's `config`, treating `null` as an empty object.
fn parse_config<T: serde::de::DeserializeOwned>(
  config: &serde_json::Value,
) -> Result<T, crate::NodeError> {
  let config = if config.is_null() {
    serde_json::Value::Object(serde_json::Map::new())
  } else {
    config.clone()
  };
  serde_json::from_value(config).map_err(|e| crate::NodeError::invalid_config(e.to_string()))
}
