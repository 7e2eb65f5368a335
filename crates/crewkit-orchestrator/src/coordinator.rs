//! The coordinator runner: one Hierarchical decision round.
//!
//! In production the job infrastructure runs one of these per
//! [`WorkUnit::CoordinatorRound`](crate::contracts::WorkUnit). The
//! coordinator bypasses the static graph: each round it either delegates
//! one more task or signals completion, bounded by the execution's
//! iteration cap.

use crate::contracts::{Coordinator, CoordinatorDecision};
use crate::driver::CrewDriver;
use crate::resolver;
use crate::types::{TaskExecution, TaskSpec};
use crewkit_core::CrewResult;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Termination reason once the coordinator round cap is hit.
pub const MAX_ITERATIONS_MESSAGE: &str = "Max coordinator iterations reached.";

/// Processes one `CoordinatorRound` unit.
pub struct CoordinatorRunner {
    driver: Arc<CrewDriver>,
    coordinator: Arc<dyn Coordinator>,
}

impl CoordinatorRunner {
    /// Create a runner bound to a driver and a coordinator.
    pub fn new(driver: Arc<CrewDriver>, coordinator: Arc<dyn Coordinator>) -> Self {
        Self { driver, coordinator }
    }

    /// Run one coordinator round.
    ///
    /// No-ops unless the execution exists and is Executing. When the
    /// iteration cap is reached, completes with a partial synthesis if
    /// any task validated, otherwise terminates the execution.
    pub async fn run_round(&self, execution_id: Uuid) -> CrewResult<()> {
        let store = self.driver.store();

        let Some(mut execution) = store.load_execution(execution_id).await? else {
            warn!(execution_id = %execution_id, "execution not found for coordinator round");
            return Ok(());
        };
        if !execution.is_running() {
            debug!(
                execution_id = %execution_id,
                status = ?execution.status,
                "execution not executing, dropping coordinator round"
            );
            return Ok(());
        }

        let tasks = store.load_tasks(execution_id).await?;

        if execution.coordinator_iterations >= execution.max_coordinator_iterations {
            info!(
                execution_id = %execution_id,
                iterations = execution.coordinator_iterations,
                "coordinator iteration cap reached"
            );
            if resolver::validated_count(&tasks) > 0 {
                return self.driver.synthesize_and_complete(execution_id).await;
            }
            return self
                .driver
                .terminate(execution_id, MAX_ITERATIONS_MESSAGE)
                .await;
        }

        match self.coordinator.decide(&execution, &tasks).await {
            Ok(CoordinatorDecision::Complete) => {
                self.driver.synthesize_and_complete(execution_id).await
            }
            Ok(CoordinatorDecision::Delegate {
                title,
                description,
                agent,
            }) => {
                execution.coordinator_iterations += 1;
                store.save_execution(&execution).await?;

                // Next free graph position; coordinator tasks never carry
                // dependencies.
                let sort_order = tasks
                    .iter()
                    .map(|t| t.sort_order + 1)
                    .max()
                    .unwrap_or(0);
                let mut spec = TaskSpec::new(title, description, sort_order);
                spec.agent = agent;

                let mut task = TaskExecution::from_spec(&execution, &spec);
                task.input_context.insert(
                    "coordinator_iteration".to_string(),
                    json!(execution.coordinator_iterations),
                );
                store.insert_tasks(std::slice::from_ref(&task)).await?;

                self.driver.dispatch_task(&execution, task.id).await
            }
            Err(e) => {
                self.driver
                    .fail_execution(execution_id, format!("Coordinator decision failed: {e}"))
                    .await
            }
        }
    }
}
