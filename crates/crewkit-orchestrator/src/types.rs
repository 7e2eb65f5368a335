use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Reserved `input_context` key under which validated dependency outputs
/// are merged before a task is handed to a worker.
pub const DEPENDENCY_OUTPUTS_KEY: &str = "dependency_outputs";

/// Scheduling discipline for a crew execution. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    /// One task in flight at a time, in graph order.
    Sequential,
    /// Every ready task dispatched together as a wave.
    Parallel,
    /// A coordinator picks the next task dynamically; the static graph is
    /// bypassed.
    Hierarchical,
}

impl std::fmt::Display for ProcessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessType::Sequential => write!(f, "sequential"),
            ProcessType::Parallel => write!(f, "parallel"),
            ProcessType::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

/// Lifecycle state of a [`CrewExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, decomposition not yet run.
    Pending,
    /// Task graph persisted, workers in flight.
    Executing,
    /// Final output synthesized.
    Completed,
    /// Planning or synthesis failed, or nothing was left to synthesize.
    Failed,
    /// Cooperatively cancelled; in-flight work finishes but cannot resume
    /// orchestration.
    Terminated,
}

impl ExecutionStatus {
    /// Whether this status is final for the execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Terminated
        )
    }
}

/// Lifecycle state of a single [`TaskExecution`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its dependencies (or for a dispatch slot).
    Pending,
    /// Handed to the job infrastructure, worker not yet started.
    Assigned,
    /// A worker is executing it.
    Running,
    /// Output produced, quality gate not yet passed.
    Completed,
    /// Output accepted by the quality gate.
    Validated,
    /// Rejected by the quality gate with no retry budget left.
    QaFailed,
    /// Worker failure with no retry budget left.
    Failed,
    /// Deliberately bypassed; never dispatched again.
    Skipped,
}

impl TaskStatus {
    /// Whether this status is permanent for the node — no further dispatch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Validated | TaskStatus::QaFailed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Whether the task is currently owned by the worker infrastructure.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }

    /// Wire name of the status, matching its serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Validated => "validated",
            TaskStatus::QaFailed => "qa_failed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One planned task as produced by goal decomposition.
///
/// `sort_order` is the node's identity inside the graph; `depends_on`
/// entries reference other specs' `sort_order` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Short task title; also the key under which this task's output is
    /// fed forward to dependents.
    pub title: String,
    /// What the assigned agent should do.
    pub description: String,
    /// Position and identity of the node within the execution's graph.
    pub sort_order: u32,
    /// `sort_order` values of prerequisite nodes.
    #[serde(default)]
    pub depends_on: Vec<u32>,
    /// Agent assigned to the task, if the decomposer picked one.
    #[serde(default)]
    pub agent: Option<String>,
    /// Per-task provider override.
    #[serde(default)]
    pub provider_override: Option<String>,
    /// Per-task model override.
    #[serde(default)]
    pub model_override: Option<String>,
    /// Expected shape of the output, passed to the quality gate.
    #[serde(default)]
    pub expected_output: Option<String>,
}

impl TaskSpec {
    /// Create a spec with no dependencies and no agent assignment.
    pub fn new(title: impl Into<String>, description: impl Into<String>, sort_order: u32) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            sort_order,
            depends_on: Vec::new(),
            agent: None,
            provider_override: None,
            model_override: None,
            expected_output: None,
        }
    }

    /// Set the prerequisite nodes.
    pub fn with_dependencies(mut self, deps: Vec<u32>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Assign an agent by name.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Describe the expected output for the quality gate.
    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }
}

/// One run of a crew against a goal. Owns a task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewExecution {
    /// Unique identifier.
    pub id: Uuid,
    /// The goal handed to decomposition.
    pub goal: String,
    /// Current lifecycle state.
    pub status: ExecutionStatus,
    /// Scheduling discipline; immutable for the lifetime of the execution.
    pub process_type: ProcessType,
    /// Minimum QA score in `[0, 1]` for a task output to validate.
    pub quality_threshold: f64,
    /// Retry budget applied to every task created for this execution.
    pub max_task_attempts: u32,
    /// Hard cap on coordinator rounds in Hierarchical mode.
    pub max_coordinator_iterations: u32,
    /// Synthesized result, set on completion.
    pub final_output: Option<Value>,
    /// Accumulated cost across decomposition, tasks, QA, and synthesis.
    /// Only ever increases; mutate through [`CrewExecution::add_cost`].
    pub total_cost_credits: u64,
    /// Final QA score of the synthesized result.
    pub quality_score: Option<f64>,
    /// Number of coordinator rounds consumed (Hierarchical only).
    pub coordinator_iterations: u32,
    /// Human-readable failure cause, set on Failed/Terminated.
    pub error_message: Option<String>,
    /// When the execution was created.
    pub started_at: DateTime<Utc>,
    /// When the execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration from start to terminal state.
    pub duration_ms: Option<u64>,
}

impl CrewExecution {
    /// Create a pending execution with default quality threshold (0.7),
    /// task retry budget (3), and coordinator cap (30).
    pub fn new(goal: impl Into<String>, process_type: ProcessType) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            status: ExecutionStatus::Pending,
            process_type,
            quality_threshold: 0.7,
            max_task_attempts: 3,
            max_coordinator_iterations: 30,
            final_output: None,
            total_cost_credits: 0,
            quality_score: None,
            coordinator_iterations: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Set the QA acceptance threshold.
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    /// Set the per-task retry budget.
    pub fn with_max_task_attempts(mut self, attempts: u32) -> Self {
        self.max_task_attempts = attempts;
        self
    }

    /// Set the Hierarchical coordinator round cap.
    pub fn with_max_coordinator_iterations(mut self, iterations: u32) -> Self {
        self.max_coordinator_iterations = iterations;
        self
    }

    /// Whether the driver may still make progress on this execution.
    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Executing
    }

    /// Whether the execution has reached a final state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Accrue collaborator cost. Total cost is monotonically increasing.
    pub fn add_cost(&mut self, credits: u64) {
        self.total_cost_credits = self.total_cost_credits.saturating_add(credits);
    }

    /// Milliseconds elapsed since the execution started.
    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// One node in an execution's dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning execution.
    pub execution_id: Uuid,
    /// Assigned agent name, if any.
    pub agent: Option<String>,
    /// Short task title.
    pub title: String,
    /// What the assigned agent should do.
    pub description: String,
    /// Node identity within the execution's graph. Unique per execution.
    pub sort_order: u32,
    /// `sort_order` values of prerequisite nodes.
    pub depends_on: Vec<u32>,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Input mapping handed to the worker; dependency outputs are merged
    /// in under [`DEPENDENCY_OUTPUTS_KEY`] at dispatch time.
    pub input_context: Map<String, Value>,
    /// Output produced by the worker.
    pub output: Option<Value>,
    /// Structured feedback from the quality gate's last verdict.
    pub qa_feedback: Option<Value>,
    /// Score from the quality gate's last verdict.
    pub qa_score: Option<f64>,
    /// Current attempt, starting at 1.
    pub attempt_number: u32,
    /// Retry budget for this node.
    pub max_attempts: u32,
    /// Cost of the most recent attempt.
    pub cost_credits: u64,
    /// Worker wall-clock time for the most recent attempt.
    pub duration_ms: Option<u64>,
    /// Per-node diagnostic from the most recent failure.
    pub error_message: Option<String>,
    /// Wave identifier shared by tasks dispatched together (Parallel mode).
    pub batch_id: Option<Uuid>,
    /// When a worker last picked the task up.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task last reached Completed or a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskExecution {
    /// Materialize a graph node from a decomposition spec.
    ///
    /// Seeds `input_context` with the spec's expected output and overrides
    /// so workers see them without consulting the plan again.
    pub fn from_spec(execution: &CrewExecution, spec: &TaskSpec) -> Self {
        let mut input_context = Map::new();
        if let Some(expected) = &spec.expected_output {
            input_context.insert("expected_output".to_string(), Value::String(expected.clone()));
        }
        if let Some(provider) = &spec.provider_override {
            input_context.insert("provider".to_string(), Value::String(provider.clone()));
        }
        if let Some(model) = &spec.model_override {
            input_context.insert("model".to_string(), Value::String(model.clone()));
        }

        Self {
            id: Uuid::new_v4(),
            execution_id: execution.id,
            agent: spec.agent.clone(),
            title: spec.title.clone(),
            description: spec.description.clone(),
            sort_order: spec.sort_order,
            depends_on: spec.depends_on.clone(),
            status: TaskStatus::Pending,
            input_context,
            output: None,
            qa_feedback: None,
            qa_score: None,
            attempt_number: 1,
            max_attempts: execution.max_task_attempts,
            cost_credits: 0,
            duration_ms: None,
            error_message: None,
            batch_id: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the task is waiting to be dispatched.
    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Whether the task's output passed the quality gate.
    pub fn is_validated(&self) -> bool {
        self.status == TaskStatus::Validated
    }

    /// Whether the task's status is permanent.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the task is owned by the worker infrastructure right now.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether a retry budget remains for this node.
    pub fn can_retry(&self) -> bool {
        self.attempt_number < self.max_attempts
    }
}
