//! The orchestration driver: the stateful control loop over persisted
//! execution rows.
//!
//! The driver is not a long-lived process. Each entry point — the initial
//! [`CrewDriver::run`] or one of the three outcome callbacks — loads
//! fresh state from the store, makes one round of decisions, persists,
//! and returns. Everything needed to resume lives in the persisted rows,
//! so any invocation may happen on any worker.

use crate::contracts::{
    GoalDecomposer, JobQueue, OutputValidator, ResultSynthesizer, Validation, WorkUnit,
};
use crate::events::{CrewEvent, EventSink, TracingEventSink};
use crate::resolver;
use crate::store::ExecutionStore;
use crate::strategy::{
    DispatchStrategy, HierarchicalStrategy, ParallelStrategy, SequentialStrategy,
};
use crate::types::{
    CrewExecution, ExecutionStatus, ProcessType, TaskExecution, TaskSpec, TaskStatus,
    DEPENDENCY_OUTPUTS_KEY,
};
use chrono::Utc;
use crewkit_core::{CrewError, CrewResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Failure message used when pending tasks can no longer become ready.
pub const DEADLOCK_MESSAGE: &str = "Deadlock: remaining tasks depend on failed tasks.";

/// Failure message used when decomposition yields no tasks.
pub const EMPTY_PLAN_MESSAGE: &str = "Coordinator produced an empty task plan.";

/// The crew execution driver.
///
/// Holds the persistence boundary, the collaborator seams, and one
/// strategy instance per process type. Safe to share behind an [`Arc`]
/// and re-enter from any callback.
pub struct CrewDriver {
    store: Arc<dyn ExecutionStore>,
    decomposer: Arc<dyn GoalDecomposer>,
    validator: Arc<dyn OutputValidator>,
    synthesizer: Arc<dyn ResultSynthesizer>,
    queue: Arc<dyn JobQueue>,
    events: Arc<dyn EventSink>,
    sequential: SequentialStrategy,
    parallel: ParallelStrategy,
    hierarchical: HierarchicalStrategy,
}

impl CrewDriver {
    /// Create a driver with the default tracing event sink.
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        decomposer: Arc<dyn GoalDecomposer>,
        validator: Arc<dyn OutputValidator>,
        synthesizer: Arc<dyn ResultSynthesizer>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            store,
            decomposer,
            validator,
            synthesizer,
            queue,
            events: Arc::new(TracingEventSink),
            sequential: SequentialStrategy,
            parallel: ParallelStrategy,
            hierarchical: HierarchicalStrategy,
        }
    }

    /// Replace the event sink.
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The persistence boundary.
    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// The job infrastructure seam.
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// The quality gate seam (shared with the worker unit).
    pub fn validator(&self) -> &Arc<dyn OutputValidator> {
        &self.validator
    }

    /// The event sink.
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    fn strategy_for(&self, process_type: ProcessType) -> &dyn DispatchStrategy {
        match process_type {
            ProcessType::Sequential => &self.sequential,
            ProcessType::Parallel => &self.parallel,
            ProcessType::Hierarchical => &self.hierarchical,
        }
    }

    /// Run the plan → execute → validate → synthesize lifecycle for a
    /// pending execution: decompose the goal, persist the task graph,
    /// and dispatch the first round for the execution's process type.
    ///
    /// No-ops if the execution is missing or not Pending (a duplicate
    /// delivery of the initial job).
    pub async fn run(&self, execution_id: Uuid) -> CrewResult<()> {
        let Some(mut execution) = self.store.load_execution(execution_id).await? else {
            warn!(execution_id = %execution_id, "execution not found");
            return Ok(());
        };
        if execution.status != ExecutionStatus::Pending {
            info!(
                execution_id = %execution_id,
                status = ?execution.status,
                "execution not pending, skipping run"
            );
            return Ok(());
        }

        let specs = match self.decomposer.decompose(&execution).await {
            Ok(specs) => specs,
            Err(e) => {
                return self.fail_loaded(&mut execution, e.to_string()).await;
            }
        };

        if specs.is_empty() {
            return self
                .fail_loaded(&mut execution, EMPTY_PLAN_MESSAGE.to_string())
                .await;
        }

        // A cyclic plan would hang forever with no deadlock signal; catch
        // it before anything is persisted.
        if let Err(e) = resolver::validate_acyclic(&specs) {
            return self.fail_loaded(&mut execution, e.to_string()).await;
        }

        let tasks: Vec<TaskExecution> = specs
            .iter()
            .map(|spec| TaskExecution::from_spec(&execution, spec))
            .collect();
        self.store.insert_tasks(&tasks).await?;
        self.events.emit(&CrewEvent::TasksPlanned {
            execution_id,
            task_count: tasks.len(),
        });

        execution.status = ExecutionStatus::Executing;
        self.store.save_execution(&execution).await?;
        self.events
            .emit(&CrewEvent::ExecutionStarted { execution_id });

        self.strategy_for(execution.process_type)
            .dispatch(self, &execution)
            .await
    }

    /// Callback: a task's output passed the quality gate. Re-enters
    /// dispatch for the execution's process type.
    pub async fn on_task_validated(&self, execution_id: Uuid, task_id: Uuid) -> CrewResult<()> {
        let Some(execution) = self.guarded_execution(execution_id).await? else {
            return Ok(());
        };

        let qa_score = self
            .store
            .load_task(task_id)
            .await?
            .and_then(|t| t.qa_score);
        self.events.emit(&CrewEvent::TaskValidated {
            execution_id,
            task_id,
            qa_score,
        });

        self.strategy_for(execution.process_type)
            .dispatch(self, &execution)
            .await
    }

    /// Callback: the quality gate rejected a task's output. Retries with
    /// an incremented attempt when budget remains, otherwise marks the
    /// task QaFailed and resumes per the strategy.
    pub async fn on_task_rejected(&self, execution_id: Uuid, task_id: Uuid) -> CrewResult<()> {
        self.handle_setback(execution_id, task_id, TaskStatus::QaFailed)
            .await
    }

    /// Callback: the worker failed while executing a task. Same retry
    /// logic as rejection, with Failed as the terminal outcome.
    pub async fn on_task_failed(&self, execution_id: Uuid, task_id: Uuid) -> CrewResult<()> {
        self.handle_setback(execution_id, task_id, TaskStatus::Failed)
            .await
    }

    async fn handle_setback(
        &self,
        execution_id: Uuid,
        task_id: Uuid,
        terminal_status: TaskStatus,
    ) -> CrewResult<()> {
        let Some(execution) = self.guarded_execution(execution_id).await? else {
            return Ok(());
        };
        let Some(mut task) = self.store.load_task(task_id).await? else {
            warn!(task_id = %task_id, "task not found for setback callback");
            return Ok(());
        };

        if task.can_retry() {
            // Immediate retry, no backoff. QA feedback survives the reset
            // so the next attempt can address it.
            task.status = TaskStatus::Pending;
            task.attempt_number += 1;
            task.output = None;
            if terminal_status == TaskStatus::QaFailed {
                task.error_message = None;
            }
            self.store.save_task(&task).await?;
            self.events.emit(&CrewEvent::TaskRetried {
                execution_id,
                task_id,
                attempt: task.attempt_number,
            });
            return self.dispatch_task(&execution, task_id).await;
        }

        task.status = terminal_status;
        task.completed_at = Some(Utc::now());
        self.store.save_task(&task).await?;
        self.events.emit(&CrewEvent::TaskExhausted {
            execution_id,
            task_id,
            status: terminal_status.as_str().to_string(),
        });

        self.strategy_for(execution.process_type)
            .on_exhausted(self, &execution)
            .await
    }

    /// After an exhausted-retry terminal: synthesize, fail, or resume
    /// dispatch depending on what remains workable.
    pub(crate) async fn check_continuation(&self, execution: &CrewExecution) -> CrewResult<()> {
        let tasks = self.store.load_tasks(execution.id).await?;

        if resolver::all_terminal(&tasks) {
            if resolver::validated_count(&tasks) > 0 {
                return self.synthesize_and_complete(execution.id).await;
            }
            return self
                .fail_execution(
                    execution.id,
                    "All tasks failed: no validated outputs to synthesize.",
                )
                .await;
        }

        if resolver::has_deadlock(&tasks) {
            // Partial completion beats failing outright.
            if resolver::validated_count(&tasks) > 0 {
                return self.synthesize_and_complete(execution.id).await;
            }
            return self
                .fail_execution(execution.id, "Deadlock with no validated outputs.")
                .await;
        }

        // More tasks remain workable.
        self.strategy_for(execution.process_type)
            .dispatch(self, execution)
            .await
    }

    /// Stage a task for dispatch: merge validated dependency outputs into
    /// its input context under [`DEPENDENCY_OUTPUTS_KEY`], mark it
    /// Assigned, persist, and return the work unit to enqueue.
    ///
    /// Returns `None` when the task is not Pending (only a Pending task
    /// is eligible for dispatch).
    pub(crate) async fn stage_task(
        &self,
        execution: &CrewExecution,
        task_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> CrewResult<Option<WorkUnit>> {
        let tasks = self.store.load_tasks(execution.id).await?;
        let Some(task) = tasks.iter().find(|t| t.id == task_id) else {
            return Err(CrewError::Orchestrator(format!(
                "task {task_id} not found in execution {}",
                execution.id
            )));
        };
        let mut task = task.clone();

        if !task.is_pending() {
            debug!(
                task_id = %task_id,
                status = %task.status,
                "task not pending, skipping dispatch"
            );
            return Ok(None);
        }

        let outputs = resolver::dependency_outputs(&task, &tasks);
        if !outputs.is_empty() {
            task.input_context
                .insert(DEPENDENCY_OUTPUTS_KEY.to_string(), Value::Object(outputs));
        }

        task.status = TaskStatus::Assigned;
        if batch_id.is_some() {
            task.batch_id = batch_id;
        }
        self.store.save_task(&task).await?;

        self.events.emit(&CrewEvent::TaskDispatched {
            execution_id: execution.id,
            task_id,
            attempt: task.attempt_number,
            batch_id: task.batch_id,
        });

        Ok(Some(WorkUnit::RunTask {
            execution_id: execution.id,
            task_id,
        }))
    }

    /// Shared dispatch routine: stage one task and enqueue it.
    pub(crate) async fn dispatch_task(
        &self,
        execution: &CrewExecution,
        task_id: Uuid,
    ) -> CrewResult<()> {
        if let Some(unit) = self.stage_task(execution, task_id, None).await? {
            self.queue.enqueue(unit).await?;
        }
        Ok(())
    }

    /// Assemble the final result from validated task outputs, run the
    /// final quality check, and complete the execution.
    ///
    /// A synthesis error fails the execution with a "Synthesis failed:"
    /// message. A final-QA error does not block completion; it degrades
    /// the quality score to 0 with the feedback recorded.
    pub async fn synthesize_and_complete(&self, execution_id: Uuid) -> CrewResult<()> {
        let Some(mut execution) = self.guarded_execution(execution_id).await? else {
            return Ok(());
        };

        let tasks = self.store.load_tasks(execution_id).await?;

        match self.synthesizer.synthesize(&execution, &tasks).await {
            Err(e) => {
                self.fail_loaded(&mut execution, format!("Synthesis failed: {e}"))
                    .await
            }
            Ok(synthesis) => {
                execution.final_output = Some(synthesis.result);
                execution.add_cost(synthesis.cost_credits);
                self.store.save_execution(&execution).await?;

                let final_qa = self.run_final_qa(&execution).await;
                execution.add_cost(final_qa.cost_credits);
                execution.quality_score = Some(final_qa.score);
                execution.status = ExecutionStatus::Completed;
                execution.completed_at = Some(Utc::now());
                execution.duration_ms = Some(execution.elapsed_ms());
                self.store.save_execution(&execution).await?;

                let quality_feedback = if final_qa.passed {
                    None
                } else {
                    Some(final_qa.feedback)
                };
                self.events.emit(&CrewEvent::ExecutionCompleted {
                    execution_id,
                    quality_score: final_qa.score,
                    quality_feedback,
                    total_cost_credits: execution.total_cost_credits,
                    duration_ms: execution.duration_ms.unwrap_or(0),
                });
                Ok(())
            }
        }
    }

    /// Run the final quality check against a transient virtual task
    /// wrapping the assembled result. Never persisted.
    async fn run_final_qa(&self, execution: &CrewExecution) -> Validation {
        let spec = TaskSpec::new(
            "Final Result",
            format!("Assembled result for goal: {}", execution.goal),
            0,
        )
        .with_expected_output("Complete, cohesive result matching the original goal");
        let mut virtual_task = TaskExecution::from_spec(execution, &spec);
        virtual_task.output = execution.final_output.clone();

        match self.validator.validate(&virtual_task, execution).await {
            Ok(validation) => validation,
            Err(e) => {
                warn!(
                    execution_id = %execution.id,
                    error = %e,
                    "final QA validation failed, completing with zero score"
                );
                Validation {
                    passed: false,
                    score: 0.0,
                    feedback: format!("Final QA validation failed: {e}"),
                    issues: Vec::new(),
                    cost_credits: 0,
                }
            }
        }
    }

    /// Mark the execution Failed with a human-readable cause.
    pub async fn fail_execution(
        &self,
        execution_id: Uuid,
        message: impl Into<String> + Send,
    ) -> CrewResult<()> {
        let Some(mut execution) = self.store.load_execution(execution_id).await? else {
            warn!(execution_id = %execution_id, "execution not found");
            return Ok(());
        };
        self.fail_loaded(&mut execution, message.into()).await
    }

    async fn fail_loaded(&self, execution: &mut CrewExecution, message: String) -> CrewResult<()> {
        execution.status = ExecutionStatus::Failed;
        execution.error_message = Some(message.clone());
        execution.completed_at = Some(Utc::now());
        execution.duration_ms = Some(execution.elapsed_ms());
        self.store.save_execution(execution).await?;

        self.events.emit(&CrewEvent::ExecutionFailed {
            execution_id: execution.id,
            error: message,
        });
        Ok(())
    }

    /// Cooperatively cancel the execution. In-flight tasks finish, but
    /// their callbacks will find the Terminated status and no-op.
    pub async fn terminate(
        &self,
        execution_id: Uuid,
        reason: impl Into<String> + Send,
    ) -> CrewResult<()> {
        let Some(mut execution) = self.store.load_execution(execution_id).await? else {
            warn!(execution_id = %execution_id, "execution not found");
            return Ok(());
        };
        if execution.is_terminal() {
            return Ok(());
        }

        let reason = reason.into();
        execution.status = ExecutionStatus::Terminated;
        execution.error_message = Some(reason.clone());
        execution.completed_at = Some(Utc::now());
        execution.duration_ms = Some(execution.elapsed_ms());
        self.store.save_execution(&execution).await?;

        self.events.emit(&CrewEvent::ExecutionTerminated {
            execution_id,
            reason,
        });
        Ok(())
    }

    /// Load the execution and return it only if orchestration may still
    /// make progress on it. Every callback goes through this guard so a
    /// Terminated (or otherwise finished) execution is never resumed.
    async fn guarded_execution(&self, execution_id: Uuid) -> CrewResult<Option<CrewExecution>> {
        let Some(execution) = self.store.load_execution(execution_id).await? else {
            warn!(execution_id = %execution_id, "execution not found");
            return Ok(None);
        };
        if !execution.is_running() {
            debug!(
                execution_id = %execution_id,
                status = ?execution.status,
                "execution not executing, ignoring callback"
            );
            return Ok(None);
        }
        Ok(Some(execution))
    }
}
