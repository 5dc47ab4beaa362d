//! Execution engine
//!
//! Entry point embedders use to trigger, cancel and inspect executions. Each
//! triggered execution runs on its own tokio task; the engine registers its
//! handle before the task starts, so a cancel issued right after the trigger
//! returns always finds it.

use conveyor_core::domain::execution::{Execution, ExecutionStatus, StatusEvent};
use conveyor_core::domain::pipeline::{DEFAULT_BRANCH, Environment, Pipeline};
use conveyor_core::dto::execution::{ExecutionEvent, ExecutionStatusView, LogSnapshot};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::EventPublisher;
use crate::registry::{ExecutionRegistry, RunningHandle};
use crate::service::ExecutionMachine;
use crate::store::RecordStore;

/// Handle to the execution engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    registry: Arc<ExecutionRegistry>,
    machine: ExecutionMachine,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
        registry: Arc<ExecutionRegistry>,
    ) -> Self {
        let machine = ExecutionMachine::new(config, Arc::clone(&store), Arc::clone(&publisher));
        Self {
            inner: Arc::new(EngineInner {
                store,
                publisher,
                registry,
                machine,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.inner.registry
    }

    /// Creates a `pending` execution and starts running it in the background
    ///
    /// An empty or missing branch falls back to the pipeline's default branch.
    pub async fn trigger(
        &self,
        pipeline_id: Uuid,
        branch: Option<&str>,
        environment: &str,
    ) -> Result<Uuid> {
        let environment: Environment = environment.trim().parse()?;

        let pipeline = self
            .inner
            .store
            .find_pipeline(pipeline_id)
            .await?
            .ok_or(EngineError::PipelineNotFound(pipeline_id))?;

        if !pipeline.allows(environment) {
            return Err(EngineError::InvalidEnvironment(format!(
                "pipeline '{}' does not target {}",
                pipeline.name, environment
            )));
        }

        let branch = branch
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .or_else(|| Some(pipeline.default_branch.trim()).filter(|b| !b.is_empty()))
            .unwrap_or(DEFAULT_BRANCH)
            .to_string();

        let execution = self
            .inner
            .store
            .create_execution(pipeline.id, &branch, environment)
            .await?;
        let id = execution.id;

        let handle = match self.inner.registry.register(id) {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.machine.fail(id, &e.to_string()).await;
                return Err(e);
            }
        };

        info!(
            "Triggered execution {} of pipeline '{}' ({} on {})",
            id, pipeline.name, branch, environment
        );
        self.inner.publisher.publish(ExecutionEvent::StatusChanged {
            execution_id: id,
            status: ExecutionStatus::Pending,
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.drive(execution, pipeline, handle).await;
        });

        Ok(id)
    }

    /// Requests cancellation of an in-flight execution
    ///
    /// Returns false for unknown executions and those already finalizing or
    /// terminal.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        let accepted = self.inner.registry.cancel(execution_id);
        if accepted {
            let pid = self
                .inner
                .registry
                .lookup(execution_id)
                .and_then(|handle| handle.active_pid());
            match pid {
                Some(pid) => info!(
                    "Cancellation requested for execution {} (step pid {})",
                    execution_id, pid
                ),
                None => info!(
                    "Cancellation requested for execution {} between steps",
                    execution_id
                ),
            }
        } else {
            debug!("Cancellation of execution {} not accepted", execution_id);
        }
        accepted
    }

    pub async fn status(&self, execution_id: Uuid) -> Result<Option<ExecutionStatusView>> {
        let execution = self.inner.store.find_execution(execution_id).await?;
        Ok(execution.as_ref().map(ExecutionStatusView::from))
    }

    /// Persisted log text of an execution
    pub async fn logs(&self, execution_id: Uuid) -> Result<Option<LogSnapshot>> {
        let execution = self.inner.store.find_execution(execution_id).await?;
        Ok(execution.map(|e| LogSnapshot {
            execution_id: e.id,
            status: e.status,
            logs: e.logs,
        }))
    }

    /// Fails executions left in flight by a previous process
    ///
    /// Running handles are never persisted, so an in-flight row without a
    /// live handle whose start (or creation) is older than `staleness` can
    /// never finish on its own. Returns the number of executions failed.
    pub async fn reconcile_orphans(&self, staleness: Duration) -> Result<usize> {
        let now = chrono::Utc::now();
        let Some(cutoff) = chrono::Duration::from_std(staleness)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
        else {
            return Ok(0);
        };

        let mut reconciled = 0;
        for execution in self.inner.store.list_in_flight().await? {
            if self.inner.registry.lookup(execution.id).is_some() {
                continue;
            }
            let since = execution.started_at.unwrap_or(execution.created_at);
            if since > cutoff {
                continue;
            }

            let mut status = execution.status;
            if status == ExecutionStatus::Pending {
                status = status.transition(StatusEvent::Begin)?;
            }
            let terminal = status.transition(StatusEvent::Fail)?;

            let note = format!(
                "\nExecution orphaned: left {} by a previous orchestrator process\n",
                execution.status
            );
            if self
                .inner
                .store
                .finalize_execution(execution.id, terminal, now, &note)
                .await?
            {
                warn!(
                    "Marked orphaned execution {} ({} since {}) as failed",
                    execution.id, execution.status, since
                );
                self.inner.publisher.publish(ExecutionEvent::StatusChanged {
                    execution_id: execution.id,
                    status: terminal,
                });
                reconciled += 1;
            }
        }

        if reconciled > 0 {
            info!("Reconciled {} orphaned executions", reconciled);
        }
        Ok(reconciled)
    }
}

impl EngineInner {
    async fn drive(
        self: Arc<Self>,
        execution: Execution,
        pipeline: Pipeline,
        handle: RunningHandle,
    ) {
        let id = execution.id;
        let run = AssertUnwindSafe(self.machine.run(execution, pipeline, handle.clone()))
            .catch_unwind()
            .await;

        if let Err(panic) = run {
            let message = panic_message(panic.as_ref());
            error!("Execution {} panicked: {}", id, message);
            handle.seal();
            self.machine
                .fail(id, &format!("internal error: {}", message))
                .await;
        }

        self.registry.unregister(id);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingPublisher;
    use crate::store::MemoryRecordStore;
    use conveyor_core::domain::pipeline::PipelineConfig;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Harness {
        root: TempDir,
        repo: String,
        store: Arc<MemoryRecordStore>,
        publisher: Arc<RecordingPublisher>,
        engine: Engine,
    }

    fn sh(dir: &Path, script: &str) {
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "setup script failed: {}", script);
    }

    fn harness_with(configure: impl FnOnce(&mut EngineConfig)) -> Harness {
        let root = tempfile::tempdir().unwrap();

        let repo = root.path().join("repo");
        std::fs::create_dir(&repo).unwrap();
        sh(
            &repo,
            "git init -q . && git symbolic-ref HEAD refs/heads/main \
             && echo hello > README && git add README \
             && git -c user.email=ci@example.com -c user.name=ci commit -q -m init",
        );

        let mut config = EngineConfig::new(root.path().join("workspaces"));
        config.log_flush_interval = Duration::from_millis(50);
        config.termination_grace = Duration::from_secs(2);
        configure(&mut config);

        let store = Arc::new(MemoryRecordStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = Engine::new(
            config,
            store.clone(),
            publisher.clone(),
            Arc::new(ExecutionRegistry::new()),
        );

        Harness {
            repo: repo.display().to_string(),
            root,
            store,
            publisher,
            engine,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    /// Step headers echo the command, so output is matched by whole lines
    fn has_line(logs: &str, line: &str) -> bool {
        logs.lines().any(|l| l == line)
    }

    impl Harness {
        fn pipeline(&self, build: &str, test: &str, deploy: &str) -> Uuid {
            let now = chrono::Utc::now();
            let pipeline = Pipeline {
                id: Uuid::new_v4(),
                name: "web".to_string(),
                description: None,
                repository: self.repo.clone(),
                default_branch: "main".to_string(),
                environments: Vec::new(),
                created_at: now,
                updated_at: now,
                config: PipelineConfig {
                    build_command: build.to_string(),
                    test_command: test.to_string(),
                    deploy_command: deploy.to_string(),
                    ..PipelineConfig::default()
                },
            };
            let id = pipeline.id;
            self.store.insert_pipeline(pipeline);
            id
        }

        fn workspace(&self, id: Uuid) -> PathBuf {
            self.root.path().join("workspaces").join(id.to_string())
        }

        async fn execution(&self, id: Uuid) -> Execution {
            self.store.find_execution(id).await.unwrap().unwrap()
        }

        async fn wait_terminal(&self, id: Uuid) -> Execution {
            let execution = tokio::time::timeout(Duration::from_secs(30), async {
                loop {
                    let execution = self.execution(id).await;
                    if execution.status.is_terminal() {
                        return execution;
                    }
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            })
            .await
            .expect("execution did not finish");

            // The handle goes away right after the terminal write.
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.engine.registry().lookup(id).is_some() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("handle was not unregistered");

            execution
        }

        async fn wait_for_log(&self, id: Uuid, needle: &str) {
            tokio::time::timeout(Duration::from_secs(15), async {
                while !self.execution(id).await.logs.contains(needle) {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            })
            .await
            .expect("log line never appeared");
        }
    }

    #[tokio::test]
    async fn test_staging_completes_without_deploy() {
        let h = harness();
        let pipeline = h.pipeline("echo building", "echo testing", "echo deploying");

        let id = h.engine.trigger(pipeline, None, "staging").await.unwrap();
        let execution = h.wait_terminal(id).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.branch, "main");
        assert!(execution.started_at.is_some());
        assert!(execution.ended_at.is_some());
        assert!(execution.logs.contains("==> clone: git clone"));
        assert!(has_line(&execution.logs, "building"));
        assert!(has_line(&execution.logs, "testing"));
        assert!(execution.logs.contains("==> deploy: skipped"));
        assert!(!execution.logs.contains("deploying"));
        assert!(!h.workspace(id).exists());
    }

    #[tokio::test]
    async fn test_production_runs_deploy() {
        let h = harness();
        let pipeline = h.pipeline("echo building", "echo testing", "echo deploying");

        let id = h.engine.trigger(pipeline, Some("main"), "production").await.unwrap();
        let execution = h.wait_terminal(id).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let lines: Vec<&str> = execution.logs.lines().collect();
        let position = |line: &str| lines.iter().position(|l| *l == line).unwrap();
        assert!(position("building") < position("testing"));
        assert!(position("testing") < position("deploying"));
    }

    #[tokio::test]
    async fn test_failing_test_stops_before_deploy() {
        let h = harness();
        let pipeline = h.pipeline("echo building", "echo broken >&2; exit 1", "echo deploying");

        let id = h.engine.trigger(pipeline, None, "production").await.unwrap();
        let execution = h.wait_terminal(id).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(has_line(&execution.logs, "broken"));
        assert!(execution.logs.ends_with("test failed with exit code 1\n"));
        assert!(!execution.logs.contains("==> deploy"));
        assert!(!h.workspace(id).exists());
    }

    #[tokio::test]
    async fn test_unreachable_repository_fails_clone() {
        let mut h = harness();
        h.repo = h.root.path().join("missing").display().to_string();
        let pipeline = h.pipeline("echo building", "echo testing", "echo deploying");

        let id = h.engine.trigger(pipeline, None, "production").await.unwrap();
        let execution = h.wait_terminal(id).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.logs.contains("fatal:"), "git stderr missing: {}", execution.logs);
        assert!(execution.logs.contains("clone failed with exit code"));
        assert!(!execution.logs.contains("==> checkout"));
        assert!(!execution.logs.contains("building"));
    }

    #[tokio::test]
    async fn test_cancel_during_build() {
        let h = harness();
        let pipeline = h.pipeline("echo started; sleep 10", "echo testing", "echo deploying");

        let id = h.engine.trigger(pipeline, None, "staging").await.unwrap();
        h.wait_for_log(id, "\nstarted\n").await;
        let handle = h.engine.registry().lookup(id).unwrap();
        assert!(handle.active_pid().is_some());

        let cancelled_at = std::time::Instant::now();
        assert!(h.engine.cancel(id));
        assert!(!h.engine.cancel(id));

        let execution = h.wait_terminal(id).await;
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));
        assert!(has_line(&execution.logs, "started"));
        assert!(!execution.logs.contains("==> test"));
        assert!(execution.ended_at.is_some());
        assert!(!h.workspace(id).exists());
    }

    #[tokio::test]
    async fn test_cancel_right_after_trigger() {
        let h = harness();
        let pipeline = h.pipeline("echo building", "echo testing", "echo deploying");

        let id = h.engine.trigger(pipeline, None, "staging").await.unwrap();
        assert!(h.engine.cancel(id));

        let execution = h.wait_terminal(id).await;
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(!has_line(&execution.logs, "testing"));
    }

    #[tokio::test]
    async fn test_cancel_terminal_execution_changes_nothing() {
        let h = harness();
        let pipeline = h.pipeline("true", "true", "true");

        let id = h.engine.trigger(pipeline, None, "development").await.unwrap();
        let before = h.wait_terminal(id).await;

        assert!(!h.engine.cancel(id));
        assert!(!h.engine.cancel(Uuid::new_v4()));

        let after = h.execution(id).await;
        assert_eq!(after.status, ExecutionStatus::Completed);
        assert_eq!(after.logs, before.logs);
        assert_eq!(after.ended_at, before.ended_at);
    }

    #[tokio::test]
    async fn test_log_snapshots_only_grow() {
        let h = harness();
        let pipeline = h.pipeline(
            "for i in 1 2 3 4 5 6 7 8; do echo line $i; sleep 0.1; done",
            "true",
            "true",
        );

        let id = h.engine.trigger(pipeline, None, "staging").await.unwrap();
        let mut previous = String::new();
        loop {
            let snapshot = h.engine.logs(id).await.unwrap().unwrap();
            assert!(snapshot.logs.starts_with(&previous));
            previous = snapshot.logs;
            if snapshot.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert!(has_line(&previous, "line 8"));
    }

    #[tokio::test]
    async fn test_execution_timeout_fails() {
        let h = harness_with(|config| {
            config.execution_timeout = Some(Duration::from_millis(1500));
        });
        let pipeline = h.pipeline("sleep 10", "true", "true");

        let id = h.engine.trigger(pipeline, None, "staging").await.unwrap();
        let execution = h.wait_terminal(id).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.logs.contains("timed out"));
        assert!(!h.workspace(id).exists());
    }

    #[tokio::test]
    async fn test_trigger_validation() {
        let h = harness();
        let pipeline = h.pipeline("true", "true", "true");

        let err = h.engine.trigger(pipeline, None, "qa").await.err().unwrap();
        assert!(matches!(err, EngineError::InvalidEnvironment(_)));

        let missing = Uuid::new_v4();
        let err = h.engine.trigger(missing, None, "staging").await.err().unwrap();
        assert!(matches!(err, EngineError::PipelineNotFound(id) if id == missing));

        let mut restricted = h.store.find_pipeline(pipeline).await.unwrap().unwrap();
        restricted.id = Uuid::new_v4();
        restricted.environments = vec![Environment::Staging];
        let restricted_id = restricted.id;
        h.store.insert_pipeline(restricted);

        let err = h
            .engine
            .trigger(restricted_id, None, "production")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::InvalidEnvironment(_)));
        assert!(h.store.list_in_flight().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_view_and_events() {
        let h = harness();
        let pipeline = h.pipeline("true", "true", "true");

        let id = h.engine.trigger(pipeline, Some("  "), "staging").await.unwrap();
        h.wait_terminal(id).await;

        let view = h.engine.status(id).await.unwrap().unwrap();
        assert_eq!(view.status, ExecutionStatus::Completed);
        assert!(view.duration_seconds.is_some());
        assert!(h.engine.status(Uuid::new_v4()).await.unwrap().is_none());

        let statuses: Vec<ExecutionStatus> = h
            .publisher
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ExecutionEvent::StatusChanged { execution_id, status } if execution_id == id => {
                    Some(status)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                ExecutionStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_orphans() {
        let h = harness();
        let pipeline = Uuid::new_v4();
        let an_hour_ago = chrono::Utc::now() - chrono::Duration::hours(1);

        let running = h
            .store
            .create_execution(pipeline, "main", Environment::Staging)
            .await
            .unwrap();
        h.store.begin_execution(running.id, an_hour_ago).await.unwrap();
        let pending = h
            .store
            .create_execution(pipeline, "main", Environment::Staging)
            .await
            .unwrap();
        let live = h
            .store
            .create_execution(pipeline, "main", Environment::Staging)
            .await
            .unwrap();
        let _handle = h.engine.registry().register(live.id).unwrap();

        assert_eq!(
            h.engine
                .reconcile_orphans(Duration::from_secs(3600 * 24))
                .await
                .unwrap(),
            0
        );
        assert_eq!(h.engine.reconcile_orphans(Duration::ZERO).await.unwrap(), 2);

        for id in [running.id, pending.id] {
            let execution = h.execution(id).await;
            assert_eq!(execution.status, ExecutionStatus::Failed);
            assert!(execution.ended_at.is_some());
            assert!(execution.logs.contains("orphaned"));
        }
        assert_eq!(h.execution(live.id).await.status, ExecutionStatus::Pending);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
