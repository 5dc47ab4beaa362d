//! Execution service
//!
//! Drives one execution through its lifecycle:
//! - Moving the record from `pending` to `running`
//! - Running clone, checkout, build, test and (production only) deploy in a
//!   fresh workspace, stopping at the first failing step
//! - Honouring cancellation and the optional execution deadline
//! - Releasing the workspace and persisting exactly one terminal status

use conveyor_core::domain::execution::{Execution, ExecutionStatus, StatusEvent};
use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::domain::step::StepKind;
use conveyor_core::dto::execution::ExecutionEvent;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::EventPublisher;
use crate::registry::RunningHandle;
use crate::service::log_sink::LogSink;
use crate::service::step::{StepCommand, StepExit, StepRunner};
use crate::service::workspace::WorkspaceManager;
use crate::store::RecordStore;

/// One entry of an execution's step plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedStep {
    Run(StepCommand),
    Skip { step: StepKind, reason: String },
}

/// Builds the fixed step sequence for an execution of `pipeline`
pub fn plan(pipeline: &Pipeline, execution: &Execution) -> Vec<PlannedStep> {
    let env_vars = &pipeline.config.env_vars;

    StepKind::SEQUENCE
        .iter()
        .map(|&step| {
            let command = match step {
                // Repository and branch never parse as git options.
                StepKind::Clone => git(step)
                    .arg("clone")
                    .arg("--")
                    .arg(&pipeline.repository)
                    .arg("."),
                StepKind::Checkout => git(step)
                    .arg("checkout")
                    .arg("--end-of-options")
                    .arg(&execution.branch)
                    .arg("--"),
                StepKind::Build => StepCommand::shell(step, &pipeline.config.build_command),
                StepKind::Test => StepCommand::shell(step, &pipeline.config.test_command),
                StepKind::Deploy if !execution.environment.deploys() => {
                    return PlannedStep::Skip {
                        step,
                        reason: format!("environment is {}", execution.environment),
                    };
                }
                StepKind::Deploy => StepCommand::shell(step, &pipeline.config.deploy_command),
            };
            PlannedStep::Run(command.envs(env_vars.clone()))
        })
        .collect()
}

fn git(step: StepKind) -> StepCommand {
    // Never block on a credential prompt.
    StepCommand::new(step, "git").envs([("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())])
}

/// How the step sequence ended, before the cancellation seal is applied
enum Outcome {
    Completed,
    Failed(EngineError),
    Cancelled,
}

/// Runs executions to a terminal state
pub struct ExecutionMachine {
    config: EngineConfig,
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    workspaces: WorkspaceManager,
    steps: StepRunner,
}

impl ExecutionMachine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let workspaces = WorkspaceManager::new(config.workspace_root.clone());
        let steps = StepRunner::new(config.termination_grace);
        Self {
            config,
            store,
            publisher,
            workspaces,
            steps,
        }
    }

    /// Runs a `pending` execution until it reaches a terminal status
    ///
    /// The caller owns the handle's registration; the handle is sealed here
    /// before the terminal status is decided.
    pub async fn run(
        &self,
        execution: Execution,
        pipeline: Pipeline,
        handle: RunningHandle,
    ) -> ExecutionStatus {
        let id = execution.id;
        let status = match execution.status.transition(StatusEvent::Begin) {
            Ok(status) => status,
            Err(e) => {
                warn!("Execution {} cannot start: {}", id, e);
                handle.seal();
                return execution.status;
            }
        };

        let outcome = match self.store.begin_execution(id, chrono::Utc::now()).await {
            Ok(true) => {
                info!(
                    "Execution {} of pipeline '{}' running ({} on {})",
                    id, pipeline.name, execution.branch, execution.environment
                );
                self.publisher.publish(ExecutionEvent::StatusChanged {
                    execution_id: id,
                    status,
                });
                None
            }
            Ok(false) => {
                warn!("Execution {} is no longer pending, not running it", id);
                handle.seal();
                return self.stored_status(id).await;
            }
            Err(e) => Some(Outcome::Failed(EngineError::Store(e))),
        };

        let sink = Arc::new(LogSink::start(
            id,
            Arc::clone(&self.store),
            Arc::clone(&self.publisher),
            &self.config,
        ));

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                let deadline = self.config.execution_timeout.map(|t| Instant::now() + t);
                self.run_in_workspace(&execution, &pipeline, &handle, &sink, status, deadline)
                    .await
            }
        };

        // An accepted cancel always wins, even over a step that just ended.
        let outcome = if handle.seal() {
            Outcome::Cancelled
        } else {
            outcome
        };

        let mut trailing = sink.close().await;
        let event = match &outcome {
            Outcome::Completed => {
                info!("Execution {} completed", id);
                StatusEvent::Complete
            }
            Outcome::Failed(err) => {
                error!("Execution {} failed: {}", id, err);
                trailing.push_str(&format!("\n{}\n", err));
                StatusEvent::Fail
            }
            Outcome::Cancelled => {
                info!("Execution {} cancelled", id);
                trailing.push_str("\nExecution cancelled\n");
                StatusEvent::Cancel
            }
        };

        let terminal = match status.transition(event) {
            Ok(terminal) => terminal,
            Err(e) => {
                error!("Execution {}: {}", id, e);
                ExecutionStatus::Failed
            }
        };

        self.finalize(id, terminal, &trailing).await;
        terminal
    }

    async fn run_in_workspace(
        &self,
        execution: &Execution,
        pipeline: &Pipeline,
        handle: &RunningHandle,
        sink: &Arc<LogSink>,
        status: ExecutionStatus,
        deadline: Option<Instant>,
    ) -> Outcome {
        let workspace = match self.workspaces.acquire(execution.id).await {
            Ok(workspace) => workspace,
            Err(e) => return Outcome::Failed(e),
        };

        let outcome = match self
            .run_steps(execution, pipeline, handle, sink, workspace.path(), status, deadline)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(e),
        };

        if let Err(e) = workspace.release().await {
            warn!("Execution {}: {}", execution.id, e);
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_steps(
        &self,
        execution: &Execution,
        pipeline: &Pipeline,
        handle: &RunningHandle,
        sink: &Arc<LogSink>,
        working_dir: &Path,
        mut status: ExecutionStatus,
        deadline: Option<Instant>,
    ) -> Result<Outcome> {
        let cancel = handle.cancellation();

        for planned in plan(pipeline, execution) {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(self.timed_out());
            }

            let command = match planned {
                PlannedStep::Run(command) => command,
                PlannedStep::Skip { step, reason } => {
                    debug!("Execution {}: skipping {} ({})", execution.id, step, reason);
                    sink.append(&format!("==> {}: skipped ({})\n", step, reason))
                        .await;
                    continue;
                }
            };

            sink.append(&format!("==> {}: {}\n", command.step, command.display()))
                .await;

            let running = self.steps.spawn(&command, working_dir, sink.clone())?;
            handle.set_active_pid(running.pid());
            let exit = running.wait(cancel, deadline).await;
            handle.set_active_pid(None);

            match exit? {
                StepExit::Exited(0) => {
                    debug!("Execution {}: {} succeeded", execution.id, command.step);
                    status = status.transition(StatusEvent::StepSucceeded)?;
                }
                StepExit::Exited(exit_code) => {
                    return Err(EngineError::StepFailure {
                        step: command.step,
                        exit_code,
                    });
                }
                StepExit::Cancelled => return Ok(Outcome::Cancelled),
                StepExit::TimedOut => return Err(self.timed_out()),
            }
        }

        Ok(Outcome::Completed)
    }

    fn timed_out(&self) -> EngineError {
        EngineError::TimedOut(self.config.execution_timeout.unwrap_or(Duration::ZERO))
    }

    /// Persists the terminal status, retrying a bounded number of times
    async fn finalize(&self, id: Uuid, status: ExecutionStatus, trailing_logs: &str) {
        let attempts = self.config.finalize_retries.max(1);

        for attempt in 1..=attempts {
            match self
                .store
                .finalize_execution(id, status, chrono::Utc::now(), trailing_logs)
                .await
            {
                Ok(true) => {
                    self.publisher.publish(ExecutionEvent::StatusChanged {
                        execution_id: id,
                        status,
                    });
                    return;
                }
                Ok(false) => {
                    warn!("Execution {} was already terminal, keeping stored status", id);
                    return;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Persisting {} for execution {} failed (attempt {}/{}): {:#}",
                        status, id, attempt, attempts, e
                    );
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(e) => {
                    error!(
                        "Giving up persisting {} for execution {} after {} attempts: {:#}",
                        status, id, attempts, e
                    );
                }
            }
        }
    }

    /// Marks an execution `failed` outside the normal step flow
    pub(crate) async fn fail(&self, id: Uuid, message: &str) {
        self.finalize(id, ExecutionStatus::Failed, &format!("\n{}\n", message))
            .await;
    }

    async fn stored_status(&self, id: Uuid) -> ExecutionStatus {
        match self.store.find_execution(id).await {
            Ok(Some(execution)) => execution.status,
            Ok(None) => ExecutionStatus::Failed,
            Err(e) => {
                warn!("Could not read execution {}: {:#}", id, e);
                ExecutionStatus::Failed
            }
        }
    }
}
