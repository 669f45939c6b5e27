use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use flowlab_config::FlowDefinition;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::{Error, FlowExecution, NodeExecution, Store};

const FLOW_EXECUTION_COLUMNS: &str = "execution_id, flow_id, flow_version, status, inputs, output, error, \
   started_at, completed_at, duration_ms, total_tokens, total_cost";

const NODE_EXECUTION_COLUMNS: &str = "execution_id, node_id, node_type, status, attempts, input, output, \
   error, failure_reason, created_at, started_at, completed_at, duration_ms, tokens_used, cost_estimate";

/// SQLite-based store implementation.
#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// A private in-memory database, migrated and ready to use.
  pub async fn in_memory() -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    // Every connection to `:memory:` is a separate database.
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn load_flow_definition(&self, flow_id: &str) -> Result<FlowDefinition, Error> {
    let row: Option<(String,)> =
      sqlx::query_as("SELECT definition FROM flow_definitions WHERE flow_id = ?")
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await?;
    let (definition,) = row.ok_or_else(|| Error::NotFound(format!("flow {}", flow_id)))?;
    Ok(serde_json::from_str(&definition)?)
  }

  async fn save_flow_definition(&self, flow: &FlowDefinition) -> Result<(), Error> {
    let definition = serde_json::to_string(flow)?;
    sqlx::query(
      r#"
      INSERT INTO flow_definitions (flow_id, version, definition, updated_at)
      VALUES (?, ?, ?, ?)
      ON CONFLICT (flow_id) DO UPDATE SET
        version = excluded.version,
        definition = excluded.definition,
        updated_at = excluded.updated_at
      "#,
    )
    .bind(&flow.flow_id)
    .bind(&flow.version)
    .bind(definition)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn save_flow_execution(&self, execution: &FlowExecution) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      INSERT INTO flow_executions (execution_id, flow_id, flow_version, status, inputs, output, error,
        started_at, completed_at, duration_ms, total_tokens, total_cost)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (execution_id) DO UPDATE SET
        status = excluded.status,
        output = excluded.output,
        error = excluded.error,
        completed_at = excluded.completed_at,
        duration_ms = excluded.duration_ms,
        total_tokens = excluded.total_tokens,
        total_cost = excluded.total_cost
      WHERE flow_executions.status = 'running'
      "#,
    )
    .bind(&execution.execution_id)
    .bind(&execution.flow_id)
    .bind(&execution.flow_version)
    .bind(execution.status)
    .bind(&execution.inputs)
    .bind(&execution.output)
    .bind(&execution.error)
    .bind(execution.started_at)
    .bind(execution.completed_at)
    .bind(execution.duration_ms)
    .bind(execution.total_tokens)
    .bind(execution.total_cost)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::Immutable(format!(
        "execution {}",
        execution.execution_id
      )));
    }
    Ok(())
  }

  async fn get_flow_execution(&self, execution_id: &str) -> Result<FlowExecution, Error> {
    let query = format!(
      "SELECT {} FROM flow_executions WHERE execution_id = ?",
      FLOW_EXECUTION_COLUMNS
    );
    sqlx::query_as(&query)
      .bind(execution_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("execution {}", execution_id)))
  }

  async fn list_flow_executions(&self, flow_id: &str) -> Result<Vec<FlowExecution>, Error> {
    let query = format!(
      "SELECT {} FROM flow_executions WHERE flow_id = ? ORDER BY started_at DESC",
      FLOW_EXECUTION_COLUMNS
    );
    Ok(
      sqlx::query_as(&query)
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?,
    )
  }

  async fn save_node_execution(&self, node: &NodeExecution) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      INSERT INTO node_executions (execution_id, node_id, node_type, status, attempts, input, output,
        error, failure_reason, created_at, started_at, completed_at, duration_ms, tokens_used, cost_estimate)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (execution_id, node_id) DO UPDATE SET
        status = excluded.status,
        attempts = excluded.attempts,
        input = excluded.input,
        output = excluded.output,
        error = excluded.error,
        failure_reason = excluded.failure_reason,
        started_at = excluded.started_at,
        completed_at = excluded.completed_at,
        duration_ms = excluded.duration_ms,
        tokens_used = excluded.tokens_used,
        cost_estimate = excluded.cost_estimate
      WHERE node_executions.status IN ('pending', 'running')
      "#,
    )
    .bind(&node.execution_id)
    .bind(&node.node_id)
    .bind(&node.node_type)
    .bind(node.status)
    .bind(node.attempts)
    .bind(&node.input)
    .bind(&node.output)
    .bind(&node.error)
    .bind(node.failure_reason)
    .bind(node.created_at)
    .bind(node.started_at)
    .bind(node.completed_at)
    .bind(node.duration_ms)
    .bind(node.tokens_used)
    .bind(node.cost_estimate)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::Immutable(format!(
        "node {} of execution {}",
        node.node_id, node.execution_id
      )));
    }
    Ok(())
  }

  async fn list_node_executions(&self, execution_id: &str) -> Result<Vec<NodeExecution>, Error> {
    let query = format!(
      "SELECT {} FROM node_executions WHERE execution_id = ? ORDER BY created_at ASC, node_id ASC",
      NODE_EXECUTION_COLUMNS
    );
    Ok(
      sqlx::query_as(&query)
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?,
    )
  }

  async fn delete_flow_execution(&self, execution_id: &str) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    sqlx::query("DELETE FROM node_executions WHERE execution_id = ?")
      .bind(execution_id)
      .execute(&mut *tx)
      .await?;
    let result = sqlx::query("DELETE FROM flow_executions WHERE execution_id = ?")
      .bind(execution_id)
      .execute(&mut *tx)
      .await?;
    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("execution {}", execution_id)));
    }
    tx.commit().await?;
    Ok(())
  }
}
