//! # stagehand-operate
//!
//! Long-running operations driven through the RPC layer. An operation is
//! bound to a staging folder; every step persists its own checkpoint there so
//! a restarted operation resumes where the previous run stopped.
//!
//! - [`orchestrator`]: validate → load → dispatch → succeed/fail → retire
//! - [`subcontext`]: typed, keyed checkpoint files
//! - [`install`]: the `install` operation (download, verify, apply)
//! - [`handlers`]: `Operation.Start` / `Operation.Cancel`

#![deny(unsafe_code)]

pub mod context;
pub mod error;
pub mod handlers;
pub mod host;
pub mod install;
pub mod locks;
pub mod orchestrator;
pub mod params;
pub mod subcontext;

#[cfg(test)]
mod testing;

pub use context::{Lifecycle, OperationContext, OperationState};
pub use error::{OperateError, SubcontextError};
pub use host::OperationHost;
pub use install::{ArchiveInstaller, CopyInstaller};
pub use orchestrator::Orchestrator;
pub use params::{InstallParams, InstallResult, OperationResult, OperationStartParams};
pub use subcontext::{Subcontext, SubcontextStore};
