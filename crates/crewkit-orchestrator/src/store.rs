//! Persistence boundary for executions and their task graphs.
//!
//! The canonical state of an execution is what the store holds; the
//! driver and the integration units re-read through it on every entry
//! and never carry task lists between invocations.

use crate::types::{CrewExecution, TaskExecution};
use async_trait::async_trait;
use crewkit_core::{CrewError, CrewResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Async persistence trait for crew executions and tasks.
///
/// `load_tasks` returns the execution's tasks ordered by `sort_order`.
/// The backing technology is the embedder's choice.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a new execution row.
    async fn create_execution(&self, execution: &CrewExecution) -> CrewResult<()>;

    /// Load one execution by id.
    async fn load_execution(&self, id: Uuid) -> CrewResult<Option<CrewExecution>>;

    /// Overwrite an existing execution row.
    async fn save_execution(&self, execution: &CrewExecution) -> CrewResult<()>;

    /// Persist a batch of new task rows.
    async fn insert_tasks(&self, tasks: &[TaskExecution]) -> CrewResult<()>;

    /// Load one task by id.
    async fn load_task(&self, id: Uuid) -> CrewResult<Option<TaskExecution>>;

    /// Load an execution's tasks, ordered by `sort_order`.
    async fn load_tasks(&self, execution_id: Uuid) -> CrewResult<Vec<TaskExecution>>;

    /// Overwrite an existing task row.
    async fn save_task(&self, task: &TaskExecution) -> CrewResult<()>;
}

/// In-memory store backed by `RwLock`-guarded maps. Used by the test
/// suite and by embedders that don't need durability.
#[derive(Default)]
pub struct MemoryStore {
    executions: RwLock<HashMap<Uuid, CrewExecution>>,
    tasks: RwLock<HashMap<Uuid, TaskExecution>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_execution(&self, execution: &CrewExecution) -> CrewResult<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(CrewError::Store(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, id: Uuid) -> CrewResult<Option<CrewExecution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn save_execution(&self, execution: &CrewExecution) -> CrewResult<()> {
        let mut executions = self.executions.write().await;
        if !executions.contains_key(&execution.id) {
            return Err(CrewError::Store(format!(
                "execution {} not found",
                execution.id
            )));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn insert_tasks(&self, new_tasks: &[TaskExecution]) -> CrewResult<()> {
        let mut tasks = self.tasks.write().await;
        for task in new_tasks {
            tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn load_task(&self, id: Uuid) -> CrewResult<Option<TaskExecution>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn load_tasks(&self, execution_id: Uuid) -> CrewResult<Vec<TaskExecution>> {
        let tasks = self.tasks.read().await;
        let mut result: Vec<TaskExecution> = tasks
            .values()
            .filter(|t| t.execution_id == execution_id)
            .cloned()
            .collect();
        result.sort_by_key(|t| t.sort_order);
        Ok(result)
    }

    async fn save_task(&self, task: &TaskExecution) -> CrewResult<()> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(&task.id) {
            return Err(CrewError::Store(format!("task {} not found", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }
}
