//! Workspace manager
//!
//! Allocates one fresh working directory per execution and removes it again.
//! A [`Workspace`] is a scoped guard: if an exit path skips [`Workspace::release`]
//! (including a panic) the directory is removed when the guard drops.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Creates and removes per-execution working directories
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory an execution's workspace lives in
    pub fn path_for(&self, execution_id: Uuid) -> PathBuf {
        self.root.join(execution_id.to_string())
    }

    /// Creates a fresh, empty workspace for an execution
    ///
    /// Fails if the directory already exists; workspaces are never reused.
    pub async fn acquire(&self, execution_id: Uuid) -> Result<Workspace> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| EngineError::Workspace {
                path: self.root.clone(),
                source,
            })?;

        let path = self.path_for(execution_id);
        tokio::fs::create_dir(&path)
            .await
            .map_err(|source| EngineError::Workspace {
                path: path.clone(),
                source,
            })?;

        debug!("Acquired workspace {}", path.display());
        Ok(Workspace {
            path,
            released: false,
        })
    }
}

/// Working directory owned by one execution
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recursively removes the workspace
    pub async fn release(mut self) -> Result<()> {
        release_dir(&self.path).await?;
        self.released = true;
        debug!("Released workspace {}", self.path.display());
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Released workspace {} on drop", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove workspace {} on drop: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Removes a workspace directory; a missing directory counts as removed
pub async fn release_dir(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(EngineError::Workspace {
            path: path.to_path_buf(),
            source,
        }),
    }
}
