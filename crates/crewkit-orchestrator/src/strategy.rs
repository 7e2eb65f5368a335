//! Dispatch strategies, one per process type.
//!
//! The driver selects the strategy for an execution's process type once
//! per entry and delegates; the scheduling differences between the three
//! disciplines live entirely here.

use crate::contracts::WorkUnit;
use crate::driver::{CrewDriver, DEADLOCK_MESSAGE};
use crate::resolver;
use crate::types::CrewExecution;
use async_trait::async_trait;
use crewkit_core::CrewResult;
use tracing::debug;
use uuid::Uuid;

/// One scheduling discipline. Implementations decide which task(s) to
/// hand to the job infrastructure whenever the driver (re-)enters
/// dispatch for an execution.
#[async_trait]
pub trait DispatchStrategy: Send + Sync {
    /// Re-evaluate the execution and dispatch whatever should run next.
    async fn dispatch(&self, driver: &CrewDriver, execution: &CrewExecution) -> CrewResult<()>;

    /// Resume orchestration after a task exhausted its retry budget.
    async fn on_exhausted(&self, driver: &CrewDriver, execution: &CrewExecution) -> CrewResult<()> {
        driver.check_continuation(execution).await
    }
}

/// One task in flight at a time, in graph order.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialStrategy;

#[async_trait]
impl DispatchStrategy for SequentialStrategy {
    async fn dispatch(&self, driver: &CrewDriver, execution: &CrewExecution) -> CrewResult<()> {
        let tasks = driver.store().load_tasks(execution.id).await?;
        let ready = resolver::ready(&tasks);

        if ready.is_empty() {
            if resolver::all_terminal(&tasks) {
                return driver.synthesize_and_complete(execution.id).await;
            }
            if resolver::has_deadlock(&tasks) {
                return driver.fail_execution(execution.id, DEADLOCK_MESSAGE).await;
            }
            // Still waiting on an in-flight task.
            debug!(execution_id = %execution.id, "sequential: nothing ready, waiting");
            return Ok(());
        }

        // One at a time: only the first ready task by graph order.
        let next = ready[0].id;
        driver.dispatch_task(execution, next).await
    }
}

/// Every ready task dispatched together as one wave sharing a batch id.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelStrategy;

#[async_trait]
impl DispatchStrategy for ParallelStrategy {
    async fn dispatch(&self, driver: &CrewDriver, execution: &CrewExecution) -> CrewResult<()> {
        let tasks = driver.store().load_tasks(execution.id).await?;
        let ready = resolver::ready(&tasks);

        if ready.is_empty() {
            if resolver::all_terminal(&tasks) {
                return driver.synthesize_and_complete(execution.id).await;
            }
            if resolver::has_deadlock(&tasks) {
                return driver.fail_execution(execution.id, DEADLOCK_MESSAGE).await;
            }
            debug!(execution_id = %execution.id, "parallel: nothing ready, waiting");
            return Ok(());
        }

        // No concurrency cap here: throttling belongs to the job
        // infrastructure behind the queue.
        let wave: Vec<Uuid> = ready.iter().map(|t| t.id).collect();
        let batch_id = Uuid::new_v4();
        let mut units = Vec::with_capacity(wave.len());
        for task_id in wave {
            if let Some(unit) = driver.stage_task(execution, task_id, Some(batch_id)).await? {
                units.push(unit);
            }
        }

        debug!(
            execution_id = %execution.id,
            batch_id = %batch_id,
            wave_size = units.len(),
            "parallel: dispatching wave"
        );
        driver.queue().enqueue_batch(units, batch_id).await
    }
}

/// The static graph is bypassed; a coordinator round decides what runs
/// next.
#[derive(Debug, Default, Clone, Copy)]
pub struct HierarchicalStrategy;

#[async_trait]
impl DispatchStrategy for HierarchicalStrategy {
    async fn dispatch(&self, driver: &CrewDriver, execution: &CrewExecution) -> CrewResult<()> {
        driver
            .queue()
            .enqueue(WorkUnit::CoordinatorRound {
                execution_id: execution.id,
            })
            .await
    }

    async fn on_exhausted(&self, driver: &CrewDriver, execution: &CrewExecution) -> CrewResult<()> {
        // The coordinator, not the graph, decides what an exhausted task
        // means for the rest of the run.
        self.dispatch(driver, execution).await
    }
}
