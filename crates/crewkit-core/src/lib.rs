//! Core error types shared across the crewkit workspace.
//!
//! Every crewkit crate reports failures through the unified [`CrewError`]
//! enum, with one variant per subsystem that can produce errors.
//!
//! # Main types
//!
//! - [`CrewError`] — Unified error enum for all crewkit subsystems.
//! - [`CrewResult`] — Convenience alias for `Result<T, CrewError>`.

/// Top-level error type for the crewkit engine.
///
/// Each variant corresponds to a subsystem or collaborator that can
/// produce errors.
#[derive(Debug, thiserror::Error)]
pub enum CrewError {
    /// An error from the execution/task persistence layer.
    #[error("Store error: {0}")]
    Store(String),

    /// Goal decomposition produced an error (not an empty plan — an empty
    /// plan is a valid decomposition result handled by the driver).
    #[error("Decompose error: {0}")]
    Decompose(String),

    /// A worker-level failure while executing a single task.
    #[error("Worker error: {0}")]
    Worker(String),

    /// The quality gate collaborator failed to produce a verdict.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Final result assembly failed.
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// The dynamic coordinator failed to produce a decision.
    #[error("Coordinator error: {0}")]
    Coordinator(String),

    /// An error in the orchestration driver itself (invalid graph, missing
    /// rows, dispatch failures).
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`CrewError`].
pub type CrewResult<T> = Result<T, CrewError>;
