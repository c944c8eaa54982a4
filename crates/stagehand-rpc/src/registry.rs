//! Method table and the dispatch boundary.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::connection::Connection;
use crate::context::{RequestContext, ServiceContext};
use crate::errors::RpcError;
use crate::panics;
use crate::types::{RpcRequest, RpcResponse};

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Serve one request.
    async fn handle(&self, rc: &RequestContext) -> Result<Value, RpcError>;
}

/// Collects handlers before serving begins.
#[derive(Default)]
pub struct RouterBuilder {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl RouterBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `method`.
    ///
    /// # Panics
    ///
    /// Registering the same method twice is a startup misconfiguration and
    /// panics.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) -> &mut Self {
        assert!(
            !self.handlers.contains_key(method),
            "Can't register handler twice for {method}"
        );
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
        self
    }

    /// Freeze the table into a [`Router`].
    pub fn build(self, services: impl Into<Arc<ServiceContext>>) -> Router {
        panics::install_hook();
        Router {
            handlers: self.handlers,
            services: services.into(),
        }
    }
}

/// Immutable method table shared by all connections.
pub struct Router {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    services: Arc<ServiceContext>,
}

impl Router {
    /// Shared services handed to every request.
    pub fn services(&self) -> &Arc<ServiceContext> {
        &self.services
    }

    /// All registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Run one request to completion.
    ///
    /// Every handler outcome, including a panic, becomes a response. Returns
    /// `None` for peer notifications (requests without an id).
    #[instrument(skip_all, fields(method = %request.method, conn_id = %conn.id()))]
    pub async fn dispatch(
        &self,
        conn: &Arc<Connection>,
        request: RpcRequest,
        scope: &CancellationToken,
    ) -> Option<RpcResponse> {
        let RpcRequest {
            method, params, id, ..
        } = request;
        let start = Instant::now();

        let outcome = match self.handlers.get(&method) {
            None => {
                warn!("method not found");
                Err(RpcError::method_not_found(&method))
            }
            Some(handler) => {
                let rc = RequestContext::new(
                    Arc::clone(&self.services),
                    Arc::clone(conn),
                    method.clone(),
                    id.clone(),
                    params,
                    scope,
                );
                let caught = AssertUnwindSafe(handler.handle(&rc)).catch_unwind().await;
                rc.release_store();
                caught.unwrap_or_else(|panic| {
                    let message = panics::panic_message(&panic);
                    let stack = panics::take_backtrace()
                        .unwrap_or_else(|| std::backtrace::Backtrace::force_capture().to_string());
                    error!(panic = %message, "handler panicked");
                    Err(RpcError::internal_with_stack(message, stack))
                })
            }
        };

        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(_) => debug!(elapsed_ms, "request succeeded"),
            Err(e) if e.is_internal() => error!(elapsed_ms, error = %e, "request failed"),
            Err(e) => debug!(elapsed_ms, code = e.code(), error = %e, "request rejected"),
        }

        let id = id?;
        Some(match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => RpcResponse::error(id, e.to_error_object(&self.services.version)),
        })
    }
}
