//! Execution registry
//!
//! Tracks in-flight executions and the handle used to cancel each of them.
//! The map lock is only held to look up, insert or remove an entry; every
//! handle carries its own lock, so cancelling one execution never waits on
//! another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// In-memory handle of an in-flight execution
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct RunningHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    execution_id: Uuid,
    cancel: CancellationToken,
    state: Mutex<HandleState>,
}

#[derive(Default)]
struct HandleState {
    cancel_requested: bool,
    sealed: bool,
    active_pid: Option<u32>,
}

impl RunningHandle {
    fn new(execution_id: Uuid) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                execution_id,
                cancel: CancellationToken::new(),
                state: Mutex::new(HandleState::default()),
            }),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.inner.execution_id
    }

    /// Signal observed by the step runner
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.state().cancel_requested
    }

    /// Pid of the step process currently running, if any
    pub fn active_pid(&self) -> Option<u32> {
        self.state().active_pid
    }

    pub fn set_active_pid(&self, pid: Option<u32>) {
        self.state().active_pid = pid;
    }

    /// Fires the cancellation signal once, unless the handle is sealed
    fn request_cancel(&self) -> bool {
        let mut state = self.state();
        if state.sealed || state.cancel_requested {
            return false;
        }
        state.cancel_requested = true;
        self.inner.cancel.cancel();
        true
    }

    /// Closes the handle to further cancellation
    ///
    /// Returns whether a cancellation was accepted before the seal. Once
    /// sealed, `cancel` reports false for this execution.
    pub fn seal(&self) -> bool {
        let mut state = self.state();
        state.sealed = true;
        state.cancel_requested
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HandleState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owned registry of running handles, injected into the engine
#[derive(Default)]
pub struct ExecutionRegistry {
    handles: Mutex<HashMap<Uuid, RunningHandle>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the handle of an execution
    ///
    /// A second registration while a handle is live is a defect in the
    /// caller and is reported, never overwritten.
    pub fn register(&self, execution_id: Uuid) -> Result<RunningHandle> {
        let mut handles = self.map();
        if handles.contains_key(&execution_id) {
            error!("Execution {} registered twice", execution_id);
            return Err(EngineError::RegistryConflict(execution_id));
        }

        let handle = RunningHandle::new(execution_id);
        handles.insert(execution_id, handle.clone());
        debug!("Registered execution {} ({} live)", execution_id, handles.len());
        Ok(handle)
    }

    pub fn lookup(&self, execution_id: Uuid) -> Option<RunningHandle> {
        self.map().get(&execution_id).cloned()
    }

    pub fn unregister(&self, execution_id: Uuid) -> Option<RunningHandle> {
        let removed = self.map().remove(&execution_id);
        if removed.is_some() {
            debug!("Unregistered execution {}", execution_id);
        }
        removed
    }

    /// Requests cancellation of an in-flight execution
    ///
    /// Returns false if the execution is unknown, already finalizing, or was
    /// cancelled before.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.lookup(execution_id) {
            Some(handle) => handle.request_cancel(),
            None => false,
        }
    }

    /// Seals the handle of an execution for finalization
    ///
    /// `None` if no handle is registered, otherwise whether a cancel was
    /// accepted before the seal.
    pub fn seal(&self, execution_id: Uuid) -> Option<bool> {
        self.lookup(execution_id).map(|handle| handle.seal())
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.map().keys().copied().collect()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, RunningHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}
