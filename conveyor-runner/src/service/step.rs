//! Step runner
//!
//! Runs one external command per step, streaming its output chunk by chunk
//! as it is produced. Each step process leads its own process group so that
//! termination reaches everything the step started, not just the shell.
//!
//! Termination (cancellation or the execution deadline) sends SIGTERM to the
//! group, waits for the grace period, then escalates to SIGKILL. When a step
//! exits on its own, whatever it left running in its group is killed.

use async_trait::async_trait;
use conveyor_core::domain::step::StepKind;
use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

/// Size of a single read from a step's stdout or stderr
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long output readers may lag behind process exit
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives step output as it becomes available
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn on_output(&self, stream: OutputStream, chunk: String);
}

/// Command line of a single step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommand {
    pub step: StepKind,
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl StepCommand {
    pub fn new(step: StepKind, program: impl Into<String>) -> Self {
        Self {
            step,
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Runs `script` through `sh -c`
    pub fn shell(step: StepKind, script: &str) -> Self {
        Self::new(step, "sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Human-readable form used in log headers
    pub fn display(&self) -> String {
        if self.program == "sh" && self.args.len() == 2 && self.args[0] == "-c" {
            return self.args[1].clone();
        }
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepExit {
    /// The process exited on its own (-1 when killed by a signal)
    Exited(i32),
    /// Cancellation was observed before the exit status
    Cancelled,
    /// The execution deadline passed while the step ran
    TimedOut,
}

/// Spawns step processes
#[derive(Debug, Clone)]
pub struct StepRunner {
    grace: Duration,
}

impl StepRunner {
    /// Creates a runner whose terminations wait `grace` before killing
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Starts a step process and begins forwarding its output to `sink`
    pub fn spawn(
        &self,
        command: &StepCommand,
        working_dir: &Path,
        sink: Arc<dyn OutputSink>,
    ) -> Result<RunningStep> {
        debug!(
            "Spawning {} in {}: {}",
            command.step,
            working_dir.display(),
            command.display()
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| EngineError::Process {
            step: command.step,
            source,
        })?;

        let pid = child.id();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_output(
                stdout,
                OutputStream::Stdout,
                Arc::clone(&sink),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_output(
                stderr,
                OutputStream::Stderr,
                sink,
            )));
        }

        Ok(RunningStep {
            step: command.step,
            child,
            pid,
            readers,
            grace: self.grace,
        })
    }

    /// Spawns a step and waits for it to end
    pub async fn run(
        &self,
        command: &StepCommand,
        working_dir: &Path,
        sink: Arc<dyn OutputSink>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<StepExit> {
        self.spawn(command, working_dir, sink)?
            .wait(cancel, deadline)
            .await
    }
}

/// A step process that has been started
pub struct RunningStep {
    step: StepKind,
    child: Child,
    pid: Option<u32>,
    readers: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl RunningStep {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits for the process to exit, be cancelled, or outlive `deadline`
    ///
    /// Cancellation is checked first, so a signal that is already pending
    /// wins over an exit status that is also ready. All output produced
    /// before the process ended has been delivered when this returns.
    pub async fn wait(
        mut self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<StepExit> {
        enum Waited {
            Exited(std::io::Result<ExitStatus>),
            Cancelled,
            TimedOut,
        }

        let expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => Waited::Cancelled,
            _ = expiry => Waited::TimedOut,
            status = self.child.wait() => Waited::Exited(status),
        };

        let exit = match waited {
            Waited::Exited(Ok(status)) => {
                self.kill_leftovers();
                StepExit::Exited(status.code().unwrap_or(-1))
            }
            Waited::Exited(Err(source)) => {
                warn!("Failed to wait for {}: {}", self.step, source);
                self.terminate_logged().await;
                self.drain_output().await;
                return Err(EngineError::Process {
                    step: self.step,
                    source,
                });
            }
            Waited::Cancelled => {
                info!("Cancelling {} (pid {:?})", self.step, self.pid);
                self.terminate_logged().await;
                StepExit::Cancelled
            }
            Waited::TimedOut => {
                warn!("{} exceeded the execution deadline (pid {:?})", self.step, self.pid);
                self.terminate_logged().await;
                StepExit::TimedOut
            }
        };

        self.drain_output().await;
        debug!("{} ended: {:?}", self.step, exit);
        Ok(exit)
    }

    /// Kills background processes the step left in its group
    ///
    /// Runs right after the leader is reaped, while the group id cannot have
    /// been handed out again if any member is still alive.
    fn kill_leftovers(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            signal_group(pid, libc::SIGKILL);
        }
    }

    async fn terminate_logged(&mut self) {
        if let Err(e) = self.terminate().await {
            warn!("{}", e);
        }
    }

    /// SIGTERM, grace period, then SIGKILL
    ///
    /// Returns `Cancellation` when the process had to be killed.
    async fn terminate(&mut self) -> Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        #[cfg(unix)]
        signal_group(pid, libc::SIGTERM);
        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        if tokio::time::timeout(self.grace, self.child.wait())
            .await
            .is_ok()
        {
            return Ok(());
        }

        #[cfg(unix)]
        signal_group(pid, libc::SIGKILL);
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill {} (pid {}): {}", self.step, pid, e);
        }

        Err(EngineError::Cancellation {
            pid,
            grace: self.grace,
        })
    }

    async fn drain_output(&mut self) {
        for reader in self.readers.drain(..) {
            let abort = reader.abort_handle();
            match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{} output reader failed: {}", self.step, e),
                Err(_) => {
                    warn!(
                        "{} output still open {:?} after exit, abandoning it",
                        self.step, OUTPUT_DRAIN_TIMEOUT
                    );
                    abort.abort();
                }
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // Negative pid addresses the process group the step leads.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc != 0 {
        debug!(
            "Signal {} to process group {} not delivered: {}",
            signal,
            pid,
            std::io::Error::last_os_error()
        );
    }
}

/// Forwards every read to `sink` as soon as it completes
///
/// A multi-byte character split across two reads is held back until its
/// remaining bytes arrive.
async fn forward_output<R>(mut reader: R, stream: OutputStream, sink: Arc<dyn OutputSink>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut pending: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE + 3);

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let keep = incomplete_utf8_tail(&pending);
                let tail = pending.split_off(pending.len() - keep);
                if !pending.is_empty() {
                    sink.on_output(stream, String::from_utf8_lossy(&pending).into_owned())
                        .await;
                }
                pending = tail;
            }
            Err(e) => {
                warn!("Error reading {:?}: {}", stream, e);
                break;
            }
        }
    }

    if !pending.is_empty() {
        sink.on_output(stream, String::from_utf8_lossy(&pending).into_owned())
            .await;
    }
}

/// Length of a UTF-8 sequence cut short at the end of `bytes`, or 0
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}
