use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use flowlab_config::FlowDefinition;

use crate::{Error, FlowExecution, NodeExecution, Store};

#[derive(Debug, Default)]
struct Inner {
  definitions: HashMap<String, FlowDefinition>,
  executions: HashMap<String, FlowExecution>,
  // Keyed by execution id, in insertion order.
  nodes: HashMap<String, Vec<NodeExecution>>,
}

/// In-process store. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: RwLock<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn load_flow_definition(&self, flow_id: &str) -> Result<FlowDefinition, Error> {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    inner
      .definitions
      .get(flow_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("flow {}", flow_id)))
  }

  async fn save_flow_definition(&self, flow: &FlowDefinition) -> Result<(), Error> {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    inner.definitions.insert(flow.flow_id.clone(), flow.clone());
    Ok(())
  }

  async fn save_flow_execution(&self, execution: &FlowExecution) -> Result<(), Error> {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = inner.executions.get(&execution.execution_id) {
      if existing.status.is_terminal() {
        return Err(Error::Immutable(format!(
          "execution {}",
          execution.execution_id
        )));
      }
    }
    inner
      .executions
      .insert(execution.execution_id.clone(), execution.clone());
    Ok(())
  }

  async fn get_flow_execution(&self, execution_id: &str) -> Result<FlowExecution, Error> {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    inner
      .executions
      .get(execution_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("execution {}", execution_id)))
  }

  async fn list_flow_executions(&self, flow_id: &str) -> Result<Vec<FlowExecution>, Error> {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    let mut executions: Vec<FlowExecution> = inner
      .executions
      .values()
      .filter(|e| e.flow_id == flow_id)
      .cloned()
      .collect();
    executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(executions)
  }

  async fn save_node_execution(&self, node: &NodeExecution) -> Result<(), Error> {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    let records = inner.nodes.entry(node.execution_id.clone()).or_default();
    match records.iter_mut().find(|n| n.node_id == node.node_id) {
      Some(existing) if existing.status.is_terminal() => Err(Error::Immutable(format!(
        "node {} of execution {}",
        node.node_id, node.execution_id
      ))),
      Some(existing) => {
        *existing = node.clone();
        Ok(())
      }
      None => {
        records.push(node.clone());
        Ok(())
      }
    }
  }

  async fn list_node_executions(&self, execution_id: &str) -> Result<Vec<NodeExecution>, Error> {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    let mut nodes = inner.nodes.get(execution_id).cloned().unwrap_or_default();
    nodes.sort_by(|a, b| {
      a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.node_id.cmp(&b.node_id))
    });
    Ok(nodes)
  }

  async fn delete_flow_execution(&self, execution_id: &str) -> Result<(), Error> {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    inner
      .executions
      .remove(execution_id)
      .ok_or_else(|| Error::NotFound(format!("execution {}", execution_id)))?;
    inner.nodes.remove(execution_id);
    Ok(())
  }
}
