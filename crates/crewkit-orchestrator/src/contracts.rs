//! Contracts for the collaborators the engine consumes.
//!
//! The engine never produces task content itself: decomposition, task
//! execution, quality scoring, synthesis, and coordination are all behind
//! these seams, and the job infrastructure that carries work between them
//! is behind [`JobQueue`]. Implementations live outside this crate (the
//! test suite ships in-process mocks).

use crate::types::{CrewExecution, TaskExecution, TaskSpec};
use async_trait::async_trait;
use crewkit_core::CrewResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Decomposes a goal into a task plan.
///
/// An empty plan is a valid, meaningful result: the driver fails the
/// execution immediately rather than treating it as an error here.
#[async_trait]
pub trait GoalDecomposer: Send + Sync {
    /// Produce the task plan for the execution's goal.
    async fn decompose(&self, execution: &CrewExecution) -> CrewResult<Vec<TaskSpec>>;
}

/// Output of a single task attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// The produced output blob.
    pub output: Value,
    /// Cost of the attempt in credits.
    pub cost_credits: u64,
}

/// Executes exactly one task attempt. Invoked once per dispatch by the
/// worker unit; an `Err` is a worker-level failure and consumes one
/// attempt from the task's retry budget.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run the task with its (already enriched) input context.
    async fn execute(&self, task: &TaskExecution) -> CrewResult<TaskOutcome>;
}

/// Verdict from the quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    /// Whether the gate itself considered the output acceptable. The
    /// worker additionally compares `score` against the execution's
    /// quality threshold.
    pub passed: bool,
    /// Quality score in `[0, 1]`.
    pub score: f64,
    /// Free-form reviewer feedback, fed back into retries.
    pub feedback: String,
    /// Specific issues found.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Cost of the validation call in credits.
    #[serde(default)]
    pub cost_credits: u64,
}

/// Scores a task output against its description and expected output.
/// Also used for the final quality check on the synthesized result.
#[async_trait]
pub trait OutputValidator: Send + Sync {
    /// Evaluate the task's output.
    async fn validate(
        &self,
        task: &TaskExecution,
        execution: &CrewExecution,
    ) -> CrewResult<Validation>;
}

/// Assembled final result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    /// The execution's final output blob.
    pub result: Value,
    /// Cost of the synthesis call in credits.
    pub cost_credits: u64,
}

/// Assembles validated task outputs into the execution's final result.
#[async_trait]
pub trait ResultSynthesizer: Send + Sync {
    /// Synthesize from the validated subset of `tasks`.
    async fn synthesize(
        &self,
        execution: &CrewExecution,
        tasks: &[TaskExecution],
    ) -> CrewResult<Synthesis>;
}

/// One round's decision from the Hierarchical coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CoordinatorDecision {
    /// Run one more task.
    Delegate {
        /// Title for the new task.
        title: String,
        /// What the new task should do.
        description: String,
        /// Agent to assign, if the coordinator picked one.
        #[serde(default)]
        agent: Option<String>,
    },
    /// The goal is achieved; synthesize now.
    Complete,
}

/// Dynamic decision-maker used only by the Hierarchical strategy. Decides
/// the next task each round instead of consulting the static graph.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Decide what to do next given the execution's progress so far.
    async fn decide(
        &self,
        execution: &CrewExecution,
        tasks: &[TaskExecution],
    ) -> CrewResult<CoordinatorDecision>;
}

/// One unit of asynchronous work carried by the job infrastructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkUnit {
    /// Execute one task attempt and report its outcome to the driver.
    RunTask {
        /// Owning execution.
        execution_id: Uuid,
        /// The task to run.
        task_id: Uuid,
    },
    /// Ask the coordinator for its next decision.
    CoordinatorRound {
        /// Owning execution.
        execution_id: Uuid,
    },
}

/// Fire-and-forget dispatch into the surrounding worker-pool/job-queue
/// infrastructure.
///
/// A batch groups a wave of units for observability; the infrastructure
/// must tolerate individual unit failures without aborting siblings. Any
/// throttling or timeout policy lives behind this trait, not in the
/// driver.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a single unit of work.
    async fn enqueue(&self, unit: WorkUnit) -> CrewResult<()>;

    /// Enqueue a wave of units sharing a batch identifier.
    async fn enqueue_batch(&self, units: Vec<WorkUnit>, batch_id: Uuid) -> CrewResult<()>;
}
