//! End-to-end orchestration tests.
//!
//! Drives the full engine with mock collaborators and an in-process job
//! queue pump: the queue collects work units, the pump runs each through
//! the worker or coordinator runner, and their callbacks re-enter the
//! driver until the queue drains.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use crewkit_core::{CrewError, CrewResult};
use crewkit_orchestrator::*;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

struct PlanDecomposer {
    specs: Vec<TaskSpec>,
}

#[async_trait]
impl GoalDecomposer for PlanDecomposer {
    async fn decompose(&self, _execution: &CrewExecution) -> CrewResult<Vec<TaskSpec>> {
        Ok(self.specs.clone())
    }
}

enum ExecScript {
    AlwaysFail,
}

/// Executor scripted per task title; records every call it sees.
#[derive(Default)]
struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, ExecScript>>,
    fail_all: Mutex<bool>,
    calls: Mutex<Vec<(String, u32, Map<String, Value>)>>,
}

impl ScriptedExecutor {
    fn always_fail(&self, title: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(title.to_string(), ExecScript::AlwaysFail);
    }

    fn fail_everything(&self) {
        *self.fail_all.lock().unwrap() = true;
    }

    fn calls_for(&self, title: &str) -> Vec<(u32, Map<String, Value>)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == title)
            .map(|(_, attempt, input)| (*attempt, input.clone()))
            .collect()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, task: &TaskExecution) -> CrewResult<TaskOutcome> {
        self.calls.lock().unwrap().push((
            task.title.clone(),
            task.attempt_number,
            task.input_context.clone(),
        ));

        let fail = *self.fail_all.lock().unwrap()
            || matches!(
                self.scripts.lock().unwrap().get(&task.title),
                Some(ExecScript::AlwaysFail)
            );
        if fail {
            return Err(CrewError::Worker(format!("agent crashed on {}", task.title)));
        }

        Ok(TaskOutcome {
            output: json!({ "text": format!("{} output", task.title) }),
            cost_credits: 5,
        })
    }
}

enum Verdict {
    Score(f64),
    Error,
}

/// Validator scripted per task title; unscripted calls pass at 0.9.
#[derive(Default)]
struct ScriptedValidator {
    steps: Mutex<HashMap<String, VecDeque<Verdict>>>,
}

impl ScriptedValidator {
    fn script(&self, title: &str, verdicts: Vec<Verdict>) {
        self.steps
            .lock()
            .unwrap()
            .insert(title.to_string(), verdicts.into());
    }
}

#[async_trait]
impl OutputValidator for ScriptedValidator {
    async fn validate(
        &self,
        task: &TaskExecution,
        _execution: &CrewExecution,
    ) -> CrewResult<Validation> {
        let step = self
            .steps
            .lock()
            .unwrap()
            .get_mut(&task.title)
            .and_then(|q| q.pop_front());

        match step {
            Some(Verdict::Error) => Err(CrewError::Validation(
                "validator backend unavailable".to_string(),
            )),
            Some(Verdict::Score(score)) => Ok(Validation {
                passed: score >= 0.7,
                score,
                feedback: format!("scored {score:.2}"),
                issues: if score >= 0.7 {
                    Vec::new()
                } else {
                    vec!["below threshold".to_string()]
                },
                cost_credits: 2,
            }),
            None => Ok(Validation {
                passed: true,
                score: 0.9,
                feedback: "looks good".to_string(),
                issues: Vec::new(),
                cost_credits: 2,
            }),
        }
    }
}

/// Joins validated outputs into one blob, keyed by task title.
struct JoinSynthesizer;

#[async_trait]
impl ResultSynthesizer for JoinSynthesizer {
    async fn synthesize(
        &self,
        execution: &CrewExecution,
        tasks: &[TaskExecution],
    ) -> CrewResult<Synthesis> {
        let outputs: Map<String, Value> = tasks
            .iter()
            .filter(|t| t.is_validated())
            .filter_map(|t| t.output.clone().map(|o| (t.title.clone(), o)))
            .collect();
        Ok(Synthesis {
            result: json!({ "goal": execution.goal, "outputs": outputs }),
            cost_credits: 7,
        })
    }
}

struct FailingSynthesizer;

#[async_trait]
impl ResultSynthesizer for FailingSynthesizer {
    async fn synthesize(
        &self,
        _execution: &CrewExecution,
        _tasks: &[TaskExecution],
    ) -> CrewResult<Synthesis> {
        Err(CrewError::Synthesis("model exploded".to_string()))
    }
}

/// Coordinator that plays back a decision script, then keeps delegating
/// or completes depending on `always_delegate`.
#[derive(Default)]
struct ScriptedCoordinator {
    decisions: Mutex<VecDeque<CoordinatorDecision>>,
    always_delegate: bool,
}

impl ScriptedCoordinator {
    fn with_decisions(decisions: Vec<CoordinatorDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            always_delegate: false,
        }
    }

    fn always_delegating() -> Self {
        Self {
            decisions: Mutex::new(VecDeque::new()),
            always_delegate: true,
        }
    }
}

#[async_trait]
impl Coordinator for ScriptedCoordinator {
    async fn decide(
        &self,
        execution: &CrewExecution,
        _tasks: &[TaskExecution],
    ) -> CrewResult<CoordinatorDecision> {
        if let Some(decision) = self.decisions.lock().unwrap().pop_front() {
            return Ok(decision);
        }
        if self.always_delegate {
            return Ok(CoordinatorDecision::Delegate {
                title: format!("round {}", execution.coordinator_iterations + 1),
                description: "another round".to_string(),
                agent: None,
            });
        }
        Ok(CoordinatorDecision::Complete)
    }
}

struct ErrCoordinator;

#[async_trait]
impl Coordinator for ErrCoordinator {
    async fn decide(
        &self,
        _execution: &CrewExecution,
        _tasks: &[TaskExecution],
    ) -> CrewResult<CoordinatorDecision> {
        Err(CrewError::Coordinator("no decision".to_string()))
    }
}

/// In-process job queue: collects units for the pump, records batches and
/// the high-water mark of task units waiting at once.
#[derive(Default)]
struct InProcessQueue {
    units: Mutex<VecDeque<WorkUnit>>,
    batches: Mutex<Vec<(Vec<WorkUnit>, Uuid)>>,
    max_task_depth: Mutex<usize>,
}

impl InProcessQueue {
    fn pop(&self) -> Option<WorkUnit> {
        self.units.lock().unwrap().pop_front()
    }

    fn record_depth(&self, units: &VecDeque<WorkUnit>) {
        let depth = units
            .iter()
            .filter(|u| matches!(u, WorkUnit::RunTask { .. }))
            .count();
        let mut max = self.max_task_depth.lock().unwrap();
        if depth > *max {
            *max = depth;
        }
    }

    fn batches(&self) -> Vec<(Vec<WorkUnit>, Uuid)> {
        self.batches.lock().unwrap().clone()
    }

    fn max_task_depth(&self) -> usize {
        *self.max_task_depth.lock().unwrap()
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn enqueue(&self, unit: WorkUnit) -> CrewResult<()> {
        let mut units = self.units.lock().unwrap();
        units.push_back(unit);
        self.record_depth(&units);
        Ok(())
    }

    async fn enqueue_batch(&self, batch: Vec<WorkUnit>, batch_id: Uuid) -> CrewResult<()> {
        self.batches.lock().unwrap().push((batch.clone(), batch_id));
        let mut units = self.units.lock().unwrap();
        units.extend(batch);
        self.record_depth(&units);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<CrewEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<CrewEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &CrewEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryStore>,
    driver: Arc<CrewDriver>,
    worker: TaskWorker,
    runner: CoordinatorRunner,
    queue: Arc<InProcessQueue>,
    events: Arc<RecordingSink>,
    executor: Arc<ScriptedExecutor>,
    validator: Arc<ScriptedValidator>,
}

impl Harness {
    fn new(specs: Vec<TaskSpec>) -> Self {
        Self::build(
            Arc::new(PlanDecomposer { specs }),
            Arc::new(JoinSynthesizer),
            Arc::new(ScriptedCoordinator::default()),
        )
    }

    fn build(
        decomposer: Arc<dyn GoalDecomposer>,
        synthesizer: Arc<dyn ResultSynthesizer>,
        coordinator: Arc<dyn Coordinator>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(InProcessQueue::default());
        let events = Arc::new(RecordingSink::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let validator = Arc::new(ScriptedValidator::default());

        let driver = Arc::new(
            CrewDriver::new(
                store.clone(),
                decomposer,
                validator.clone(),
                synthesizer,
                queue.clone(),
            )
            .with_event_sink(events.clone()),
        );
        let worker = TaskWorker::new(driver.clone(), executor.clone());
        let runner = CoordinatorRunner::new(driver.clone(), coordinator);

        Self {
            store,
            driver,
            worker,
            runner,
            queue,
            events,
            executor,
            validator,
        }
    }

    async fn start(&self, execution: &CrewExecution) {
        self.store.create_execution(execution).await.unwrap();
        self.driver.run(execution.id).await.unwrap();
        self.pump().await;
    }

    /// Drain the queue, running each unit through the worker or the
    /// coordinator runner, until no work remains.
    async fn pump(&self) {
        let mut processed = 0;
        while let Some(unit) = self.queue.pop() {
            processed += 1;
            assert!(processed < 1000, "job queue did not quiesce");
            match unit {
                WorkUnit::RunTask {
                    execution_id,
                    task_id,
                } => self.worker.run_task(execution_id, task_id).await.unwrap(),
                WorkUnit::CoordinatorRound { execution_id } => {
                    self.runner.run_round(execution_id).await.unwrap();
                }
            }
        }
    }

    async fn execution(&self, id: Uuid) -> CrewExecution {
        self.store.load_execution(id).await.unwrap().unwrap()
    }

    async fn tasks(&self, id: Uuid) -> Vec<TaskExecution> {
        self.store.load_tasks(id).await.unwrap()
    }
}

fn chain_specs(titles: &[&str]) -> Vec<TaskSpec> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            let spec = TaskSpec::new(*title, format!("do {title}"), i as u32);
            if i == 0 {
                spec
            } else {
                spec.with_dependencies(vec![i as u32 - 1])
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Sequential happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sequential_happy_path_completes() {
    let harness = Harness::new(vec![
        TaskSpec::new("Research", "collect sources", 0),
        TaskSpec::new("Write", "write it up", 1),
    ]);
    let execution = CrewExecution::new("Write a report", ProcessType::Sequential);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.quality_score, Some(0.9));
    assert!(done.error_message.is_none());
    assert!(done.duration_ms.is_some());

    let output = done.final_output.unwrap();
    assert_eq!(output["outputs"]["Research"]["text"], "Research output");
    assert_eq!(output["outputs"]["Write"]["text"], "Write output");

    let tasks = harness.tasks(execution.id).await;
    assert!(tasks.iter().all(|t| t.is_validated()));
}

#[tokio::test]
async fn test_sequential_runs_one_task_at_a_time() {
    let harness = Harness::new(chain_specs(&["A", "B", "C"]));
    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    assert_eq!(
        harness.execution(execution.id).await.status,
        ExecutionStatus::Completed
    );
    // Never more than one task unit waiting: one in flight at a time.
    assert_eq!(harness.queue.max_task_depth(), 1);
}

#[tokio::test]
async fn test_dependency_outputs_fed_forward() {
    let harness = Harness::new(chain_specs(&["A", "B"]));
    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    let calls = harness.executor.calls_for("B");
    assert_eq!(calls.len(), 1);
    let deps = &calls[0].1[DEPENDENCY_OUTPUTS_KEY];
    assert_eq!(deps["A"]["text"], "A output");
}

// ---------------------------------------------------------------------------
// Parallel waves
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_parallel_first_wave_is_roots_only() {
    let harness = Harness::new(vec![
        TaskSpec::new("A", "a", 0),
        TaskSpec::new("B", "b", 1),
        TaskSpec::new("C", "c", 2).with_dependencies(vec![0, 1]),
    ]);
    let execution = CrewExecution::new("goal", ProcessType::Parallel);
    harness.start(&execution).await;

    let batches = harness.queue.batches();
    assert_eq!(batches.len(), 2);
    // First wave: exactly the two roots, dispatched together.
    assert_eq!(batches[0].0.len(), 2);
    // Second wave: C alone, only after both roots validated.
    assert_eq!(batches[1].0.len(), 1);

    let tasks = harness.tasks(execution.id).await;
    assert_eq!(tasks[0].batch_id, Some(batches[0].1));
    assert_eq!(tasks[1].batch_id, Some(batches[0].1));
    assert_eq!(tasks[2].batch_id, Some(batches[1].1));

    // C saw both dependency outputs.
    let calls = harness.executor.calls_for("C");
    let deps = &calls[0].1[DEPENDENCY_OUTPUTS_KEY];
    assert_eq!(deps["A"]["text"], "A output");
    assert_eq!(deps["B"]["text"], "B output");

    assert_eq!(
        harness.execution(execution.id).await.status,
        ExecutionStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Retries and exhaustion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_retry_bound_exhausts_to_failed() {
    let harness = Harness::new(vec![TaskSpec::new("Flaky", "never works", 0)]);
    harness.executor.always_fail("Flaky");

    let execution =
        CrewExecution::new("goal", ProcessType::Sequential).with_max_task_attempts(3);
    harness.start(&execution).await;

    // Exactly three attempts, never a fourth dispatch.
    assert_eq!(harness.executor.calls_for("Flaky").len(), 3);

    let tasks = harness.tasks(execution.id).await;
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert_eq!(tasks[0].attempt_number, 3);
    assert!(tasks[0].error_message.as_deref().unwrap().contains("agent crashed"));

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert!(done
        .error_message
        .unwrap()
        .contains("no validated outputs to synthesize"));
}

#[tokio::test]
async fn test_qa_rejection_exhausts_to_qa_failed() {
    let harness = Harness::new(vec![TaskSpec::new("Sloppy", "low quality", 0)]);
    harness.validator.script(
        "Sloppy",
        vec![Verdict::Score(0.2), Verdict::Score(0.3), Verdict::Score(0.1)],
    );

    let execution =
        CrewExecution::new("goal", ProcessType::Sequential).with_max_task_attempts(3);
    harness.start(&execution).await;

    let tasks = harness.tasks(execution.id).await;
    assert_eq!(tasks[0].status, TaskStatus::QaFailed);
    assert_eq!(tasks[0].attempt_number, 3);
    assert_eq!(tasks[0].qa_score, Some(0.1));

    assert_eq!(
        harness.execution(execution.id).await.status,
        ExecutionStatus::Failed
    );
}

#[tokio::test]
async fn test_retry_carries_previous_feedback() {
    let harness = Harness::new(vec![TaskSpec::new("Draft", "write a draft", 0)]);
    harness
        .validator
        .script("Draft", vec![Verdict::Score(0.4), Verdict::Score(0.95)]);

    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    let calls = harness.executor.calls_for("Draft");
    assert_eq!(calls.len(), 2);
    // First attempt carries no feedback.
    assert!(!calls[0].1.contains_key("previous_feedback"));
    // The retry sees the previous verdict and retry instructions.
    assert_eq!(calls[1].0, 2);
    assert_eq!(calls[1].1["previous_feedback"]["score"], 0.4);
    assert!(calls[1].1["retry_instructions"]
        .as_str()
        .unwrap()
        .contains("retry attempt #2"));

    assert_eq!(
        harness.execution(execution.id).await.status,
        ExecutionStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Deadlock and partial completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_partial_deadlock_synthesizes_partial_result() {
    let harness = Harness::new(vec![
        TaskSpec::new("A", "a", 0),
        TaskSpec::new("B", "b", 1),
        TaskSpec::new("C", "c", 2).with_dependencies(vec![1]),
    ]);
    harness.validator.script(
        "B",
        vec![Verdict::Score(0.2), Verdict::Score(0.2), Verdict::Score(0.2)],
    );

    let execution = CrewExecution::new("goal", ProcessType::Parallel);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    // Partial completion beats failing: A validated, so we synthesize.
    assert_eq!(done.status, ExecutionStatus::Completed);

    let output = done.final_output.unwrap();
    assert!(output["outputs"].get("A").is_some());
    assert!(output["outputs"].get("B").is_none());

    let tasks = harness.tasks(execution.id).await;
    assert_eq!(tasks[1].status, TaskStatus::QaFailed);
    // C never became ready and was never dispatched.
    assert_eq!(tasks[2].status, TaskStatus::Pending);
    assert!(harness.executor.calls_for("C").is_empty());
}

#[tokio::test]
async fn test_deadlock_without_validated_outputs_fails() {
    let harness = Harness::new(vec![
        TaskSpec::new("A", "a", 0),
        TaskSpec::new("B", "b", 1).with_dependencies(vec![0]),
    ]);
    harness.validator.script(
        "A",
        vec![Verdict::Score(0.1), Verdict::Score(0.1), Verdict::Score(0.1)],
    );

    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert!(done
        .error_message
        .unwrap()
        .contains("Deadlock with no validated outputs"));
}

#[tokio::test]
async fn test_total_failure_reports_no_validated_outputs() {
    let harness = Harness::new(vec![
        TaskSpec::new("A", "a", 0),
        TaskSpec::new("B", "b", 1),
    ]);
    harness.executor.fail_everything();

    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert!(done
        .error_message
        .unwrap()
        .contains("no validated outputs to synthesize"));

    let tasks = harness.tasks(execution.id).await;
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Failed));
}

// ---------------------------------------------------------------------------
// Planning and synthesis failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_empty_plan_fails_immediately() {
    let harness = Harness::new(Vec::new());
    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.error_message.as_deref(), Some(EMPTY_PLAN_MESSAGE));
    assert!(harness.tasks(execution.id).await.is_empty());
}

#[tokio::test]
async fn test_cyclic_plan_rejected_at_build_time() {
    let harness = Harness::new(vec![
        TaskSpec::new("A", "a", 0).with_dependencies(vec![1]),
        TaskSpec::new("B", "b", 1).with_dependencies(vec![0]),
    ]);
    let execution = CrewExecution::new("goal", ProcessType::Parallel);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert!(done.error_message.unwrap().contains("cycle"));
    // Nothing was persisted or dispatched.
    assert!(harness.tasks(execution.id).await.is_empty());
    assert!(harness.executor.calls_for("A").is_empty());
}

#[tokio::test]
async fn test_synthesis_error_fails_execution() {
    let harness = Harness::build(
        Arc::new(PlanDecomposer {
            specs: vec![TaskSpec::new("A", "a", 0)],
        }),
        Arc::new(FailingSynthesizer),
        Arc::new(ScriptedCoordinator::default()),
    );
    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert!(done
        .error_message
        .unwrap()
        .starts_with("Synthesis failed: "));
}

#[tokio::test]
async fn test_final_qa_error_degrades_quality_score() {
    let harness = Harness::new(vec![TaskSpec::new("A", "a", 0)]);
    harness.validator.script("Final Result", vec![Verdict::Error]);

    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    // A broken final check never blocks completion.
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.quality_score, Some(0.0));

    let feedback = harness.events.events().iter().find_map(|e| match e {
        CrewEvent::ExecutionCompleted {
            quality_feedback, ..
        } => quality_feedback.clone(),
        _ => None,
    });
    assert!(feedback.unwrap().contains("Final QA validation failed"));
}

// ---------------------------------------------------------------------------
// Cooperative cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_terminated_execution_ignores_callbacks() {
    let harness = Harness::new(vec![TaskSpec::new("A", "a", 0)]);
    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.store.create_execution(&execution).await.unwrap();

    // Dispatch, then cancel before the worker gets to run.
    harness.driver.run(execution.id).await.unwrap();
    harness
        .driver
        .terminate(execution.id, "operator cancelled")
        .await
        .unwrap();
    harness.pump().await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Terminated);
    assert_eq!(done.error_message.as_deref(), Some("operator cancelled"));
    assert!(done.final_output.is_none());

    // The in-flight unit was dropped without resuming orchestration.
    let tasks = harness.tasks(execution.id).await;
    assert_eq!(tasks[0].status, TaskStatus::Assigned);
    assert!(harness.executor.calls_for("A").is_empty());
}

// ---------------------------------------------------------------------------
// Hierarchical coordination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_hierarchical_coordinator_flow() {
    let harness = Harness::build(
        Arc::new(PlanDecomposer {
            specs: vec![TaskSpec::new("Kickoff", "initial plan", 0)],
        }),
        Arc::new(JoinSynthesizer),
        Arc::new(ScriptedCoordinator::with_decisions(vec![
            CoordinatorDecision::Delegate {
                title: "Draft".to_string(),
                description: "write the draft".to_string(),
                agent: Some("writer".to_string()),
            },
            CoordinatorDecision::Delegate {
                title: "Review".to_string(),
                description: "review the draft".to_string(),
                agent: None,
            },
            CoordinatorDecision::Complete,
        ])),
    );

    let execution = CrewExecution::new("goal", ProcessType::Hierarchical);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.coordinator_iterations, 2);

    // The kickoff task from the plan was bypassed: the coordinator's own
    // tasks ran instead.
    let tasks = harness.tasks(execution.id).await;
    let titles: Vec<&str> = tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Kickoff", "Draft", "Review"]);
    assert_eq!(tasks[0].status, TaskStatus::Pending);
    assert!(tasks[1].is_validated());
    assert!(tasks[2].is_validated());
    assert_eq!(tasks[1].agent.as_deref(), Some("writer"));
    assert_eq!(tasks[1].input_context["coordinator_iteration"], json!(1));
}

#[tokio::test]
async fn test_hierarchical_cap_synthesizes_partial() {
    let harness = Harness::build(
        Arc::new(PlanDecomposer {
            specs: vec![TaskSpec::new("Kickoff", "k", 0)],
        }),
        Arc::new(JoinSynthesizer),
        Arc::new(ScriptedCoordinator::always_delegating()),
    );

    let execution = CrewExecution::new("goal", ProcessType::Hierarchical)
        .with_max_coordinator_iterations(2);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.coordinator_iterations, 2);
    assert!(done.final_output.is_some());
}

#[tokio::test]
async fn test_hierarchical_cap_terminates_without_outputs() {
    let harness = Harness::build(
        Arc::new(PlanDecomposer {
            specs: vec![TaskSpec::new("Kickoff", "k", 0)],
        }),
        Arc::new(JoinSynthesizer),
        Arc::new(ScriptedCoordinator::always_delegating()),
    );
    harness.executor.fail_everything();

    let execution = CrewExecution::new("goal", ProcessType::Hierarchical)
        .with_max_task_attempts(1)
        .with_max_coordinator_iterations(2);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Terminated);
    assert!(done
        .error_message
        .unwrap()
        .contains("Max coordinator iterations reached"));
}

#[tokio::test]
async fn test_coordinator_error_fails_execution() {
    let harness = Harness::build(
        Arc::new(PlanDecomposer {
            specs: vec![TaskSpec::new("Kickoff", "k", 0)],
        }),
        Arc::new(JoinSynthesizer),
        Arc::new(ErrCoordinator),
    );

    let execution = CrewExecution::new("goal", ProcessType::Hierarchical);
    harness.start(&execution).await;

    let done = harness.execution(execution.id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert!(done
        .error_message
        .unwrap()
        .starts_with("Coordinator decision failed: "));
}

// ---------------------------------------------------------------------------
// Accounting and events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cost_accrues_across_collaborators() {
    let harness = Harness::new(vec![
        TaskSpec::new("A", "a", 0),
        TaskSpec::new("B", "b", 1),
    ]);
    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    // 2 executions at 5 + 2 validations at 2 + final QA at 2 + synthesis at 7.
    let done = harness.execution(execution.id).await;
    assert_eq!(done.total_cost_credits, 23);

    let tasks = harness.tasks(execution.id).await;
    assert_eq!(tasks[0].cost_credits, 5);
}

#[tokio::test]
async fn test_lifecycle_events_emitted_in_order() {
    let harness = Harness::new(vec![TaskSpec::new("A", "a", 0)]);
    let execution = CrewExecution::new("goal", ProcessType::Sequential);
    harness.start(&execution).await;

    let events = harness.events.events();
    let names: Vec<&str> = events
        .iter()
        .map(|e| match e {
            CrewEvent::TasksPlanned { .. } => "planned",
            CrewEvent::ExecutionStarted { .. } => "started",
            CrewEvent::TaskDispatched { .. } => "dispatched",
            CrewEvent::TaskValidated { .. } => "validated",
            CrewEvent::ExecutionCompleted { .. } => "completed",
            _ => "other",
        })
        .collect();
    assert_eq!(
        names,
        vec!["planned", "started", "dispatched", "validated", "completed"]
    );
}
