//! Crew orchestration engine: dependency-graph scheduling over persisted
//! state with callback-driven resumption.
//!
//! A crew execution decomposes a goal into interdependent tasks, runs
//! them under one of three scheduling disciplines (sequential, parallel
//! waves, or coordinator-driven), gates each output through a quality
//! check with bounded retries, detects deadlocks, and synthesizes a final
//! result — preferring partial completion over outright failure whenever
//! at least one task validated.
//!
//! The driver is re-entrant and stateless between invocations: each entry
//! point reads fresh rows from the [`ExecutionStore`], decides, persists,
//! and returns. Concurrency comes entirely from the surrounding job
//! infrastructure behind the [`JobQueue`] seam.
//!
//! # Main types
//!
//! - [`CrewDriver`] — The orchestration driver: initial run plus the
//!   three outcome callbacks.
//! - [`TaskWorker`] / [`CoordinatorRunner`] — Integration units the job
//!   infrastructure runs per unit of work.
//! - [`CrewExecution`] / [`TaskExecution`] — The persisted state model.
//! - [`resolver`] — Pure readiness/termination/deadlock decisions over a
//!   task snapshot.
//! - [`MemoryStore`] — In-memory [`ExecutionStore`] for tests and
//!   embedding.

/// Collaborator contracts: decomposition, execution, QA, synthesis,
/// coordination, and the job-queue seam.
pub mod contracts;
/// The Hierarchical coordinator round runner.
pub mod coordinator;
/// The orchestration driver.
pub mod driver;
/// Lifecycle event emission.
pub mod events;
/// Pure dependency-resolution functions.
pub mod resolver;
/// The persistence boundary and in-memory store.
pub mod store;
/// Dispatch strategies, one per process type.
pub mod strategy;
/// The task-graph state model.
pub mod types;
/// The per-task worker unit.
pub mod worker;

pub use contracts::{
    Coordinator, CoordinatorDecision, GoalDecomposer, JobQueue, OutputValidator,
    ResultSynthesizer, Synthesis, TaskExecutor, TaskOutcome, Validation, WorkUnit,
};
pub use coordinator::CoordinatorRunner;
pub use driver::{CrewDriver, DEADLOCK_MESSAGE, EMPTY_PLAN_MESSAGE};
pub use events::{CrewEvent, EventSink, TracingEventSink};
pub use store::{ExecutionStore, MemoryStore};
pub use strategy::{
    DispatchStrategy, HierarchicalStrategy, ParallelStrategy, SequentialStrategy,
};
pub use types::{
    CrewExecution, ExecutionStatus, ProcessType, TaskExecution, TaskSpec, TaskStatus,
    DEPENDENCY_OUTPUTS_KEY,
};
pub use worker::TaskWorker;
