//! `Operation.Start` and `Operation.Cancel`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use stagehand_core::ids::OperationId;
use stagehand_rpc::{MethodHandler, RequestContext, RouterBuilder, RpcError};
use tracing::info;

use crate::orchestrator::Orchestrator;
use crate::params::OperationStartParams;

/// Starts (or resumes) an operation. Cancellable through `Operation.Cancel`
/// with the same `id`.
pub struct StartHandler {
    orchestrator: Arc<Orchestrator>,
}

impl StartHandler {
    /// Handler running operations on `orchestrator`.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MethodHandler for StartHandler {
    async fn handle(&self, rc: &RequestContext) -> Result<Value, RpcError> {
        let params: OperationStartParams = rc.params()?;
        let id = params
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map_or_else(OperationId::new, OperationId::from_raw);

        let _registration = rc.cancel_funcs().register(id, rc.cancel_token().clone());
        let result = self.orchestrator.start(rc, params).await?;
        serde_json::to_value(result).map_err(|e| RpcError::internal(format!("encoding result: {e}")))
    }
}

#[derive(Deserialize)]
struct CancelParams {
    id: String,
}

/// Fires the cancel trigger registered for an operation id.
pub struct CancelHandler;

#[async_trait]
impl MethodHandler for CancelHandler {
    async fn handle(&self, rc: &RequestContext) -> Result<Value, RpcError> {
        let params: CancelParams = rc.params()?;
        let did_cancel = rc.cancel_funcs().call(&OperationId::from_raw(params.id.as_str()));
        info!(operation_id = %params.id, did_cancel, "cancel requested");
        Ok(json!({ "didCancel": did_cancel }))
    }
}

/// Register the operation methods.
pub fn register(builder: &mut RouterBuilder, orchestrator: Arc<Orchestrator>) {
    let _ = builder
        .register("Operation.Start", StartHandler::new(orchestrator))
        .register("Operation.Cancel", CancelHandler);
}
