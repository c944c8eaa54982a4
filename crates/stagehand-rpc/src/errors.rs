//! RPC error codes and error type.

use std::backtrace::Backtrace;

use serde_json::json;
use stagehand_store::StoreError;

use crate::types::RpcErrorObject;

// ── Error code constants ────────────────────────────────────────────

/// The line was not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Valid JSON, but not a request envelope.
pub const INVALID_REQUEST: i64 = -32600;
/// No handler registered for the method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Parameters failed to decode or validate.
pub const INVALID_PARAMS: i64 = -32602;
/// Anything else, including handler panics.
pub const INTERNAL_ERROR: i64 = -32603;
/// The operation was cancelled by the peer.
pub const OPERATION_CANCELLED: i64 = 499;
/// Another operation is already active on the staging location.
pub const STAGING_BUSY: i64 = 409;

/// Error type returned by handlers.
///
/// `Known` errors are replied verbatim. `Internal` errors get the generic
/// internal code and carry a captured stack, sent as diagnostic data.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Well-known structured error.
    #[error("{message}")]
    Known {
        /// Wire code.
        code: i64,
        /// Human-readable message.
        message: String,
    },

    /// Unexpected failure.
    #[error("{message}")]
    Internal {
        /// Human-readable message.
        message: String,
        /// Backtrace captured where the error was raised.
        stack: String,
    },
}

impl RpcError {
    /// A well-known error with an explicit code.
    pub fn known(code: i64, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
        }
    }

    /// No handler is registered for `method`.
    pub fn method_not_found(method: &str) -> Self {
        Self::known(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// Parameters failed to decode or validate.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::known(INVALID_PARAMS, message)
    }

    /// The operation was cancelled.
    pub fn cancelled() -> Self {
        Self::known(OPERATION_CANCELLED, "Operation cancelled")
    }

    /// Internal error, capturing the current stack.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            stack: Backtrace::force_capture().to_string(),
        }
    }

    /// Internal error with a stack captured elsewhere (e.g. in a panic hook).
    pub fn internal_with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// Wire code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::Known { code, .. } => *code,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Whether this is the generic internal error.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Convert to the wire-format error object.
    ///
    /// Only internal errors carry `data: {stack, version}`.
    pub fn to_error_object(&self, version: &str) -> RpcErrorObject {
        match self {
            Self::Known { code, message } => RpcErrorObject {
                code: *code,
                message: message.clone(),
                data: None,
            },
            Self::Internal { message, stack } => RpcErrorObject {
                code: INTERNAL_ERROR,
                message: message.clone(),
                data: Some(json!({ "stack": stack, "version": version })),
            },
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(e: StoreError) -> Self {
        Self::internal(e.to_string())
    }
}
