//! The worker unit: executes exactly one dispatched task attempt and
//! reports the outcome to the driver through exactly one callback.
//!
//! In production the surrounding job infrastructure runs one of these per
//! [`WorkUnit::RunTask`](crate::contracts::WorkUnit). Task-level failures
//! never escape: they are recorded on the task row and routed through
//! [`CrewDriver::on_task_failed`].

use crate::contracts::TaskExecutor;
use crate::driver::CrewDriver;
use crate::types::{TaskExecution, TaskStatus};
use chrono::Utc;
use crewkit_core::CrewResult;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Processes one `RunTask` unit end to end: execute, validate, call back.
pub struct TaskWorker {
    driver: Arc<CrewDriver>,
    executor: Arc<dyn TaskExecutor>,
}

impl TaskWorker {
    /// Create a worker bound to a driver and a task executor.
    pub fn new(driver: Arc<CrewDriver>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { driver, executor }
    }

    /// Run one task attempt.
    ///
    /// No-ops when the task or execution is missing, when the execution
    /// is no longer Executing (cooperative cancellation), or when the
    /// task is not in the Assigned state (a stale duplicate unit).
    pub async fn run_task(&self, execution_id: Uuid, task_id: Uuid) -> CrewResult<()> {
        let store = self.driver.store();

        let Some(execution) = store.load_execution(execution_id).await? else {
            warn!(execution_id = %execution_id, "execution not found for task run");
            return Ok(());
        };
        let Some(mut task) = store.load_task(task_id).await? else {
            warn!(task_id = %task_id, "task not found for task run");
            return Ok(());
        };

        if !execution.is_running() {
            debug!(
                execution_id = %execution_id,
                status = ?execution.status,
                "execution no longer executing, dropping task run"
            );
            return Ok(());
        }
        if task.status != TaskStatus::Assigned {
            debug!(task_id = %task_id, status = %task.status, "task not assigned, dropping unit");
            return Ok(());
        }

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        self.inject_retry_feedback(&mut task);
        store.save_task(&task).await?;

        let start = Instant::now();
        match self.executor.execute(&task).await {
            Ok(outcome) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                task.output = Some(outcome.output);
                task.cost_credits = outcome.cost_credits;
                task.duration_ms = Some(duration_ms);
                task.status = TaskStatus::Completed;
                task.completed_at = Some(Utc::now());
                store.save_task(&task).await?;

                if let Some(mut execution) = store.load_execution(execution_id).await? {
                    execution.add_cost(outcome.cost_credits);
                    store.save_execution(&execution).await?;
                }

                self.validate_task(execution_id, task).await
            }
            Err(e) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                task.duration_ms = Some(duration_ms);
                task.error_message = Some(e.to_string());
                task.completed_at = Some(Utc::now());
                store.save_task(&task).await?;

                warn!(
                    task_id = %task_id,
                    execution_id = %execution_id,
                    error = %e,
                    "task execution failed"
                );
                self.driver.on_task_failed(execution_id, task_id).await
            }
        }
    }

    /// Retry attempts carry the previous verdict forward so the agent can
    /// address it.
    fn inject_retry_feedback(&self, task: &mut TaskExecution) {
        if task.attempt_number <= 1 {
            return;
        }
        let Some(feedback) = task.qa_feedback.clone() else {
            return;
        };
        task.input_context
            .insert("previous_feedback".to_string(), feedback);
        task.input_context.insert(
            "retry_instructions".to_string(),
            json!(format!(
                "This is retry attempt #{}. Address the feedback from the previous attempt.",
                task.attempt_number
            )),
        );
    }

    /// Run the quality gate over a completed task and invoke exactly one
    /// driver callback. A validator error counts as a task failure.
    async fn validate_task(&self, execution_id: Uuid, mut task: TaskExecution) -> CrewResult<()> {
        let store = self.driver.store();

        let Some(mut execution) = store.load_execution(execution_id).await? else {
            return Ok(());
        };
        if !execution.is_running() {
            debug!(
                execution_id = %execution_id,
                "execution no longer executing, skipping validation"
            );
            return Ok(());
        }

        match self
            .driver
            .validator()
            .validate(&task, &execution)
            .await
        {
            Ok(validation) => {
                execution.add_cost(validation.cost_credits);
                store.save_execution(&execution).await?;

                let passed = validation.passed && validation.score >= execution.quality_threshold;
                task.qa_score = Some(validation.score);
                task.qa_feedback = Some(serde_json::to_value(&validation)?);

                if passed {
                    task.status = TaskStatus::Validated;
                    task.completed_at = Some(Utc::now());
                    store.save_task(&task).await?;
                    self.driver.on_task_validated(execution_id, task.id).await
                } else {
                    store.save_task(&task).await?;
                    self.driver.on_task_rejected(execution_id, task.id).await
                }
            }
            Err(e) => {
                task.error_message = Some(format!("QA validation error: {e}"));
                store.save_task(&task).await?;

                warn!(
                    task_id = %task.id,
                    execution_id = %execution_id,
                    error = %e,
                    "QA validation errored"
                );
                self.driver.on_task_failed(execution_id, task.id).await
            }
        }
    }
}
