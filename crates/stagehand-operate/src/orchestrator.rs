//! Drives one operation end to end against its staging folder.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::context::{Lifecycle, OperationContext, OperationState};
use crate::error::OperateError;
use crate::host::OperationHost;
use crate::install::{self, ArchiveInstaller};
use crate::locks::StagingLocks;
use crate::params::{INSTALL, MetaSubcontext, OperationResult, OperationStartParams};

/// Runs operations, one at a time per staging folder.
pub struct Orchestrator {
    locks: StagingLocks,
    installer: Arc<dyn ArchiveInstaller>,
}

impl Orchestrator {
    /// Orchestrator placing archives with `installer`.
    pub fn new(installer: Arc<dyn ArchiveInstaller>) -> Self {
        Self {
            locks: StagingLocks::new(),
            installer,
        }
    }

    /// Staging folders currently in use.
    pub fn locks(&self) -> &StagingLocks {
        &self.locks
    }

    /// Validate, load intent, dispatch, then retire on success.
    ///
    /// On failure every checkpoint is left in place so the next start against
    /// the same staging folder resumes.
    #[instrument(skip_all, fields(staging = %params.staging_folder, operation = %params.operation))]
    pub async fn start(
        &self,
        host: &dyn OperationHost,
        params: OperationStartParams,
    ) -> Result<OperationResult, OperateError> {
        let mut lifecycle = Lifecycle::new();
        if let Err(e) = validate(&params) {
            lifecycle.advance(OperationState::Failed)?;
            return Err(e);
        }

        let staging = PathBuf::from(&params.staging_folder);
        let _guard = self.locks.acquire(&staging)?;
        lifecycle.advance(OperationState::Loaded)?;
        let mut ctx = OperationContext::new(
            staging,
            host.progress_sink(),
            host.cancellation(),
            lifecycle,
        );

        let outcome = self.run(&mut ctx, host, &params).await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                ctx.advance(OperationState::Failed)?;
                if e.is_cancelled() {
                    info!("operation cancelled, checkpoints kept");
                } else {
                    warn!(error = %e, "operation failed, checkpoints kept");
                }
                return Err(e);
            }
        };

        ctx.advance(OperationState::Succeeded)?;
        if let Err(e) = ctx.retire() {
            ctx.advance(OperationState::Failed)?;
            return Err(e);
        }
        info!("operation succeeded");
        Ok(result)
    }

    async fn run(
        &self,
        ctx: &mut OperationContext,
        host: &dyn OperationHost,
        params: &OperationStartParams,
    ) -> Result<OperationResult, OperateError> {
        let mut meta = MetaSubcontext::from(params);
        if ctx.subcontexts().load(&mut meta)? {
            info!(operation = %meta.operation, "resuming persisted operation");
        } else {
            // Never persist an incomplete intent.
            require_nested_params(&meta)?;
        }
        ctx.subcontexts().save(&meta)?;

        ctx.advance(OperationState::Dispatched)?;
        match meta.operation.as_str() {
            INSTALL => {
                let install_params = meta.install_params.as_ref().ok_or_else(missing_install_params)?;
                let result = install::run(ctx, host, self.installer.as_ref(), install_params)
                    .await
                    .map_err(|e| e.in_step(INSTALL))?;
                Ok(OperationResult {
                    success: true,
                    install_result: Some(result),
                })
            }
            other => Err(OperateError::UnknownOperation(other.to_owned())),
        }
    }
}

fn validate(params: &OperationStartParams) -> Result<(), OperateError> {
    if params.staging_folder.is_empty() {
        return Err(OperateError::Validation("No staging folder specified".into()));
    }
    if params.operation.is_empty() {
        return Err(OperateError::Validation("No operation specified".into()));
    }
    Ok(())
}

fn require_nested_params(meta: &MetaSubcontext) -> Result<(), OperateError> {
    if meta.operation == INSTALL && meta.install_params.is_none() {
        return Err(missing_install_params());
    }
    Ok(())
}

fn missing_install_params() -> OperateError {
    OperateError::Validation("No install params specified".into())
}
