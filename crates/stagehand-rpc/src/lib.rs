//! # stagehand-rpc
//!
//! The request/response/notification control plane a front-end drives the
//! installer through.
//!
//! - [`registry`]: immutable method table and the dispatch boundary that turns
//!   every handler outcome (including panics) into exactly one reply
//! - [`context`]: per-request execution context (cancellation scope, progress
//!   bridge, notification interception, lazy store handle, API clients)
//! - [`cancel`]: connection-scoped operation id → cancel trigger map
//! - [`progress`]: progress callbacks → throttled `Progress` notifications
//! - [`server`]: newline-delimited JSON transport over stdio or TCP

#![deny(unsafe_code)]

pub mod api;
pub mod builtin;
pub mod cancel;
pub mod connection;
pub mod context;
pub mod errors;
pub mod notify;
pub mod panics;
pub mod progress;
pub mod registry;
pub mod server;
pub mod types;

pub use cancel::{CancelFuncs, CancelRegistration};
pub use connection::Connection;
pub use context::{FileStoreOpener, RequestContext, ServiceContext, StoreOpener};
pub use errors::RpcError;
pub use registry::{MethodHandler, Router, RouterBuilder};
pub use types::{RpcNotification, RpcRequest, RpcResponse};
