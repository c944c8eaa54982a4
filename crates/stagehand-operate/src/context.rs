//! Operation lifecycle and the context bound to one staging folder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stagehand_core::StateSink;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::OperateError;
use crate::subcontext::SubcontextStore;

/// Where an operation stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationState {
    /// Checking caller parameters; nothing on disk yet.
    Validating,
    /// Staging folder locked and intent persisted.
    Loaded,
    /// Operation kind matched and running.
    Dispatched,
    /// Finished; checkpoints still on disk.
    Succeeded,
    /// Ended with an error; checkpoints kept for resume.
    Failed,
    /// Checkpoints removed. Terminal.
    Retired,
}

impl OperationState {
    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: OperationState) -> bool {
        use OperationState::{Dispatched, Failed, Loaded, Retired, Succeeded, Validating};
        matches!(
            (self, next),
            (Validating, Loaded | Failed)
                | (Loaded, Dispatched | Failed)
                | (Dispatched, Succeeded | Failed)
                | (Succeeded, Retired | Failed)
        )
    }
}

/// State machine guard for one operation run.
#[derive(Debug)]
pub struct Lifecycle {
    state: OperationState,
}

impl Lifecycle {
    /// Start in [`OperationState::Validating`].
    pub fn new() -> Self {
        Self {
            state: OperationState::Validating,
        }
    }

    /// Current state.
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: OperationState) -> Result<(), OperateError> {
        if !self.state.can_advance_to(next) {
            return Err(OperateError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "operation state");
        self.state = next;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory (under the staging folder) holding checkpoints and downloads.
pub const STATE_DIR: &str = ".stagehand";

/// One operation's view of its staging folder.
pub struct OperationContext {
    staging: PathBuf,
    subcontexts: SubcontextStore,
    sink: Arc<dyn StateSink>,
    cancel: CancellationToken,
    lifecycle: Lifecycle,
}

impl OperationContext {
    /// Bind to `staging`, taking over `lifecycle`.
    pub fn new(
        staging: impl Into<PathBuf>,
        sink: Arc<dyn StateSink>,
        cancel: CancellationToken,
        lifecycle: Lifecycle,
    ) -> Self {
        let staging = staging.into();
        let subcontexts = SubcontextStore::new(staging.join(STATE_DIR).join("checkpoints"));
        Self {
            staging,
            subcontexts,
            sink,
            cancel,
            lifecycle,
        }
    }

    /// The staging folder.
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Where in-progress downloads live.
    pub fn downloads_dir(&self) -> PathBuf {
        self.staging.join(STATE_DIR).join("downloads")
    }

    /// Checkpoint storage for this staging folder.
    pub fn subcontexts(&self) -> &SubcontextStore {
        &self.subcontexts
    }

    /// Log/progress sink.
    pub fn sink(&self) -> &Arc<dyn StateSink> {
        &self.sink
    }

    /// The operation's cancellation scope.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail with [`OperateError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), OperateError> {
        if self.cancel.is_cancelled() {
            Err(OperateError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OperationState {
        self.lifecycle.state()
    }

    /// Advance the lifecycle.
    pub fn advance(&mut self, next: OperationState) -> Result<(), OperateError> {
        self.lifecycle.advance(next)
    }

    /// Remove every checkpoint and the download area.
    ///
    /// Only legal once the operation has succeeded.
    pub fn retire(&mut self) -> Result<(), OperateError> {
        if !self.state().can_advance_to(OperationState::Retired) {
            return Err(OperateError::IllegalTransition {
                from: self.state(),
                to: OperationState::Retired,
            });
        }
        self.subcontexts
            .clear()
            .map_err(|e| OperateError::Retire(format!("removing checkpoints: {e}")))?;
        remove_dir_if_present(&self.downloads_dir())
            .map_err(|e| OperateError::Retire(format!("removing downloads: {e}")))?;
        // Only removed when empty.
        let _ = std::fs::remove_dir(self.staging.join(STATE_DIR));
        self.advance(OperationState::Retired)?;
        info!(staging = %self.staging.display(), "retired operation context");
        Ok(())
    }
}

fn remove_dir_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subcontext::Subcontext;
    use serde::{Deserialize, Serialize};
    use stagehand_core::TracingSink;

    #[derive(Default, Serialize, Deserialize)]
    struct Marker {
        n: u8,
    }

    impl Subcontext for Marker {
        const KEY: &'static str = "marker";
    }

    fn ctx(dir: &Path) -> OperationContext {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(OperationState::Loaded).unwrap();
        OperationContext::new(dir, Arc::new(TracingSink), CancellationToken::new(), lifecycle)
    }

    #[test]
    fn legal_path_to_retired() {
        let mut l = Lifecycle::new();
        for s in [
            OperationState::Loaded,
            OperationState::Dispatched,
            OperationState::Succeeded,
            OperationState::Retired,
        ] {
            l.advance(s).unwrap();
        }
        assert_eq!(l.state(), OperationState::Retired);
    }

    #[test]
    fn illegal_transitions_are_errors() {
        let mut l = Lifecycle::new();
        assert!(matches!(
            l.advance(OperationState::Succeeded),
            Err(OperateError::IllegalTransition { .. })
        ));
        l.advance(OperationState::Failed).unwrap();
        assert!(l.advance(OperationState::Retired).is_err());
        assert!(l.advance(OperationState::Loaded).is_err());
        assert!(!OperationState::Retired.can_advance_to(OperationState::Failed));
        assert!(!OperationState::Dispatched.can_advance_to(OperationState::Retired));
    }

    #[test]
    fn retire_requires_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = ctx(dir.path());
        c.subcontexts().save(&Marker { n: 1 }).unwrap();
        assert!(c.retire().is_err());
        assert_eq!(c.subcontexts().keys().unwrap(), vec!["marker"]);
    }

    #[test]
    fn retire_removes_checkpoints_and_downloads_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = ctx(dir.path());
        c.subcontexts().save(&Marker { n: 1 }).unwrap();
        std::fs::create_dir_all(c.downloads_dir()).unwrap();
        std::fs::write(c.downloads_dir().join("a.bin"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("install")).unwrap();

        c.advance(OperationState::Dispatched).unwrap();
        c.advance(OperationState::Succeeded).unwrap();
        c.retire().unwrap();

        assert_eq!(c.state(), OperationState::Retired);
        assert!(!dir.path().join(STATE_DIR).exists());
        assert!(dir.path().join("install").exists());
    }

    #[test]
    fn check_cancelled_follows_token() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        assert!(c.check_cancelled().is_ok());
        c.cancel_token().cancel();
        assert!(matches!(c.check_cancelled(), Err(OperateError::Cancelled)));
    }
}
