//! Flowlab Store
//!
//! Storage for flow definitions and their execution history.
//!
//! The [`Store`] trait defines operations for:
//! - Saving and loading flow definitions
//! - Saving flow executions and their node records
//! - Querying execution history
//!
//! Execution records become immutable once they reach a terminal status.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlx::types::Json;
pub use sqlite::SqliteStore;
pub use types::{FailureReason, FlowExecution, FlowStatus, NodeExecution, NodeStatus};

use async_trait::async_trait;
use flowlab_config::FlowDefinition;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// The record already reached a terminal status.
  #[error("record is terminal and cannot be updated: {0}")]
  Immutable(String),

  /// A stored document could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for flow definitions and executions.
#[async_trait]
pub trait Store: Send + Sync {
  /// Load a flow definition by id.
  async fn load_flow_definition(&self, flow_id: &str) -> Result<FlowDefinition, Error>;

  /// Insert or replace a flow definition.
  async fn save_flow_definition(&self, flow: &FlowDefinition) -> Result<(), Error>;

  /// Insert or update a flow execution. Fails with [`Error::Immutable`] when
  /// the stored record is already terminal.
  async fn save_flow_execution(&self, execution: &FlowExecution) -> Result<(), Error>;

  /// Get a flow execution by id.
  async fn get_flow_execution(&self, execution_id: &str) -> Result<FlowExecution, Error>;

  /// List executions of a flow, newest first.
  async fn list_flow_executions(&self, flow_id: &str) -> Result<Vec<FlowExecution>, Error>;

  /// Insert or update a node record. Fails with [`Error::Immutable`] when
  /// the stored record is already terminal.
  async fn save_node_execution(&self, node: &NodeExecution) -> Result<(), Error>;

  /// List the node records of an execution, in creation order.
  async fn list_node_executions(&self, execution_id: &str) -> Result<Vec<NodeExecution>, Error>;

  /// Delete an execution together with its node records.
  async fn delete_flow_execution(&self, execution_id: &str) -> Result<(), Error>;
}
