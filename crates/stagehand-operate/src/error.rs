//! Operation error types.

use stagehand_rpc::RpcError;
use stagehand_rpc::errors::STAGING_BUSY;

use crate::context::OperationState;

/// Checkpoint persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum SubcontextError {
    /// Keys are limited to `[A-Za-z0-9_-]`.
    #[error("invalid subcontext key '{0}'")]
    InvalidKey(String),

    /// Another payload type already owns this key.
    #[error("subcontext key '{key}' already claimed by {owner}, cannot be claimed by {claimant}")]
    KeyClaimed {
        /// Contested key.
        key: String,
        /// Type that claimed it first.
        owner: &'static str,
        /// Type that tried to claim it.
        claimant: &'static str,
    },

    /// The persisted payload no longer matches the expected shape.
    #[error("subcontext '{key}' is corrupt or has an unexpected shape: {source}")]
    Shape {
        /// Key being loaded.
        key: String,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// Encoding the payload failed.
    #[error("could not encode subcontext '{key}': {source}")]
    Encode {
        /// Key being saved.
        key: String,
        /// Encoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure.
    #[error("subcontext '{key}': {source}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Everything that can end an operation.
#[derive(Debug, thiserror::Error)]
pub enum OperateError {
    /// Caller parameters are unusable.
    #[error("{0}")]
    Validation(String),

    /// The persisted operation kind is not supported.
    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    /// Another operation is active on the staging folder.
    #[error("Staging folder {0} is already in use by another operation")]
    StagingBusy(String),

    /// The peer cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// The archive does not match the expected checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected SHA-256 (lowercase hex).
        expected: String,
        /// Computed SHA-256 (lowercase hex).
        actual: String,
    },

    /// The lifecycle was driven out of order.
    #[error("illegal operation transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state.
        from: OperationState,
        /// Requested state.
        to: OperationState,
    },

    /// Removing the operation's checkpoints failed.
    #[error("retiring operation context: {0}")]
    Retire(String),

    /// A step failed.
    #[error("{step}: {source}")]
    Step {
        /// Step name.
        step: &'static str,
        /// Cause.
        #[source]
        source: Box<OperateError>,
    },

    /// Checkpoint persistence failed.
    #[error(transparent)]
    Subcontext(#[from] SubcontextError),

    /// The remote API failed.
    #[error("API error: {0}")]
    Api(#[from] stagehand_rpc::api::ApiError),

    /// Filesystem failure outside checkpoints.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error raised by the request context (e.g. profile lookup).
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl OperateError {
    /// Wrap `self` as the cause of a failed step.
    pub fn in_step(self, step: &'static str) -> Self {
        Self::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The innermost cause, looking through step wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    fn into_root(self) -> Self {
        match self {
            Self::Step { source, .. } => source.into_root(),
            other => other,
        }
    }

    /// Whether the operation ended because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}

impl From<OperateError> for RpcError {
    fn from(err: OperateError) -> Self {
        let message = err.to_string();
        match err.into_root() {
            OperateError::Validation(m) => RpcError::invalid_params(m),
            OperateError::UnknownOperation(_) => RpcError::invalid_params(message),
            OperateError::StagingBusy(_) => RpcError::known(STAGING_BUSY, message),
            OperateError::Cancelled => RpcError::cancelled(),
            OperateError::Rpc(RpcError::Internal { stack, .. }) => {
                RpcError::internal_with_stack(message, stack)
            }
            OperateError::Rpc(known) => known,
            _ => RpcError::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_rpc::errors::{INTERNAL_ERROR, INVALID_PARAMS, OPERATION_CANCELLED};

    #[test]
    fn step_wrapping_keeps_cause_in_message() {
        let err = OperateError::Io(std::io::Error::other("disk on fire"))
            .in_step("download")
            .in_step("install");
        assert_eq!(err.to_string(), "install: download: IO error: disk on fire");
        assert!(matches!(err.root(), OperateError::Io(_)));
    }

    #[test]
    fn cancellation_survives_wrapping() {
        let err = OperateError::Cancelled.in_step("download").in_step("install");
        assert!(err.is_cancelled());
        let rpc: RpcError = err.into();
        assert_eq!(rpc.code(), OPERATION_CANCELLED);
    }

    #[test]
    fn validation_maps_to_invalid_params() {
        let rpc: RpcError = OperateError::Validation("No staging folder specified".into()).into();
        assert_eq!(rpc.code(), INVALID_PARAMS);
        assert_eq!(rpc.to_string(), "No staging folder specified");
        let rpc: RpcError = OperateError::UnknownOperation("frobnicate".into()).into();
        assert_eq!(rpc.code(), INVALID_PARAMS);
        assert_eq!(rpc.to_string(), "Unknown operation 'frobnicate'");
    }

    #[test]
    fn busy_maps_to_409() {
        let rpc: RpcError = OperateError::StagingBusy("/tmp/x".into()).into();
        assert_eq!(rpc.code(), STAGING_BUSY);
    }

    #[test]
    fn everything_else_is_internal_with_full_message() {
        let err = OperateError::Retire("permission denied".into());
        let rpc: RpcError = err.into();
        assert_eq!(rpc.code(), INTERNAL_ERROR);
        assert_eq!(rpc.to_string(), "retiring operation context: permission denied");

        let err = OperateError::Rpc(RpcError::internal("Could not find profile 4")).in_step("install");
        let rpc: RpcError = err.into();
        assert!(rpc.is_internal());
        assert_eq!(rpc.to_string(), "install: Could not find profile 4");
    }
}
