//! In-process lock set: one active operation per staging folder.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::OperateError;

/// Staging folders with an operation in flight, keyed by canonical path.
#[derive(Clone, Default)]
pub struct StagingLocks {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl StagingLocks {
    /// Create an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `staging`, creating it if needed.
    ///
    /// Fails with [`OperateError::StagingBusy`] if another operation holds it.
    pub fn acquire(&self, staging: &Path) -> Result<StagingGuard, OperateError> {
        std::fs::create_dir_all(staging)?;
        let key = staging.canonicalize()?;
        if !self.active.lock().insert(key.clone()) {
            return Err(OperateError::StagingBusy(staging.display().to_string()));
        }
        debug!(staging = %key.display(), "locked staging folder");
        Ok(StagingGuard {
            active: Arc::clone(&self.active),
            key,
        })
    }

    /// Whether `staging` is currently locked.
    pub fn is_locked(&self, staging: &Path) -> bool {
        staging
            .canonicalize()
            .is_ok_and(|key| self.active.lock().contains(&key))
    }
}

/// Releases the staging folder when dropped.
pub struct StagingGuard {
    active: Arc<Mutex<HashSet<PathBuf>>>,
    key: PathBuf,
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        let _ = self.active.lock().remove(&self.key);
        debug!(staging = %self.key.display(), "released staging folder");
    }
}
