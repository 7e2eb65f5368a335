//! Lifecycle event emission, decoupled from the scheduling logic.
//!
//! The driver and integration units report orchestration transitions
//! through an [`EventSink`] instead of logging inline, so embedders can
//! route them to an audit trail, a dashboard socket, or nothing at all.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A lifecycle event emitted by the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CrewEvent {
    /// An execution entered the Executing state.
    ExecutionStarted {
        /// The execution.
        execution_id: Uuid,
    },
    /// Decomposition produced a task graph.
    TasksPlanned {
        /// The execution.
        execution_id: Uuid,
        /// Number of nodes in the graph.
        task_count: usize,
    },
    /// A task was handed to the job infrastructure.
    TaskDispatched {
        /// The execution.
        execution_id: Uuid,
        /// The task.
        task_id: Uuid,
        /// Attempt number being dispatched.
        attempt: u32,
        /// Wave identifier when dispatched as part of a Parallel batch.
        batch_id: Option<Uuid>,
    },
    /// A task's output passed the quality gate.
    TaskValidated {
        /// The execution.
        execution_id: Uuid,
        /// The task.
        task_id: Uuid,
        /// QA score of the accepted output.
        qa_score: Option<f64>,
    },
    /// A rejected or failed task was reset for another attempt.
    TaskRetried {
        /// The execution.
        execution_id: Uuid,
        /// The task.
        task_id: Uuid,
        /// The attempt number the task was reset to.
        attempt: u32,
    },
    /// A task exhausted its retry budget and reached a terminal state.
    TaskExhausted {
        /// The execution.
        execution_id: Uuid,
        /// The task.
        task_id: Uuid,
        /// The terminal status as a snake_case string.
        status: String,
    },
    /// The execution completed with a synthesized result.
    ExecutionCompleted {
        /// The execution.
        execution_id: Uuid,
        /// Final quality score (0 when the final QA check failed).
        quality_score: f64,
        /// Feedback from the final QA check, when it had something to say.
        quality_feedback: Option<String>,
        /// Total accrued cost.
        total_cost_credits: u64,
        /// Wall-clock duration.
        duration_ms: u64,
    },
    /// The execution failed.
    ExecutionFailed {
        /// The execution.
        execution_id: Uuid,
        /// Human-readable cause.
        error: String,
    },
    /// The execution was cooperatively cancelled.
    ExecutionTerminated {
        /// The execution.
        execution_id: Uuid,
        /// Why it was cut off.
        reason: String,
    },
}

/// Receives lifecycle events. Implementations must be cheap and
/// non-blocking; the engine emits from its hot path.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: &CrewEvent);
}

/// Default sink: structured `tracing` records, one per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &CrewEvent) {
        match event {
            CrewEvent::ExecutionStarted { execution_id } => {
                tracing::info!(execution_id = %execution_id, "crew.execution_started");
            }
            CrewEvent::TasksPlanned {
                execution_id,
                task_count,
            } => {
                tracing::info!(
                    execution_id = %execution_id,
                    task_count,
                    "crew.tasks_planned"
                );
            }
            CrewEvent::TaskDispatched {
                execution_id,
                task_id,
                attempt,
                batch_id,
            } => {
                tracing::info!(
                    execution_id = %execution_id,
                    task_id = %task_id,
                    attempt,
                    batch_id = ?batch_id,
                    "crew.task_dispatched"
                );
            }
            CrewEvent::TaskValidated {
                execution_id,
                task_id,
                qa_score,
            } => {
                tracing::info!(
                    execution_id = %execution_id,
                    task_id = %task_id,
                    qa_score = ?qa_score,
                    "crew.task_validated"
                );
            }
            CrewEvent::TaskRetried {
                execution_id,
                task_id,
                attempt,
            } => {
                tracing::info!(
                    execution_id = %execution_id,
                    task_id = %task_id,
                    attempt,
                    "crew.task_retried"
                );
            }
            CrewEvent::TaskExhausted {
                execution_id,
                task_id,
                status,
            } => {
                tracing::warn!(
                    execution_id = %execution_id,
                    task_id = %task_id,
                    status = %status,
                    "crew.task_exhausted"
                );
            }
            CrewEvent::ExecutionCompleted {
                execution_id,
                quality_score,
                quality_feedback,
                total_cost_credits,
                duration_ms,
            } => {
                tracing::info!(
                    execution_id = %execution_id,
                    quality_score,
                    quality_feedback = ?quality_feedback,
                    total_cost_credits,
                    duration_ms,
                    "crew.execution_completed"
                );
            }
            CrewEvent::ExecutionFailed {
                execution_id,
                error,
            } => {
                tracing::error!(
                    execution_id = %execution_id,
                    error = %error,
                    "crew.execution_failed"
                );
            }
            CrewEvent::ExecutionTerminated {
                execution_id,
                reason,
            } => {
                tracing::warn!(
                    execution_id = %execution_id,
                    reason = %reason,
                    "crew.execution_terminated"
                );
            }
        }
    }
}
