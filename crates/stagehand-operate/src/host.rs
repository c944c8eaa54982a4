//! What an operation needs from the request that started it.

use std::sync::Arc;

use stagehand_core::StateSink;
use stagehand_rpc::api::ApiClient;
use stagehand_rpc::{RequestContext, RpcError};
use tokio_util::sync::CancellationToken;

/// The request-side services an operation runs against.
pub trait OperationHost: Send + Sync {
    /// Log/progress sink.
    fn progress_sink(&self) -> Arc<dyn StateSink>;

    /// Cancellation scope of the request.
    fn cancellation(&self) -> CancellationToken;

    /// Begin tracking progress.
    fn begin_progress(&self, initial: f64, total_bytes: u64);

    /// Stop tracking progress.
    fn finish_progress(&self);

    /// API client for `profile_id`, or the unauthenticated one.
    fn api_client(&self, profile_id: Option<i64>) -> Result<Arc<dyn ApiClient>, RpcError>;
}

impl OperationHost for RequestContext {
    fn progress_sink(&self) -> Arc<dyn StateSink> {
        self.sink()
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel_token().clone()
    }

    fn begin_progress(&self, initial: f64, total_bytes: u64) {
        self.start_progress_with_initial_and_total(initial, total_bytes);
    }

    fn finish_progress(&self) {
        self.end_progress();
    }

    fn api_client(&self, profile_id: Option<i64>) -> Result<Arc<dyn ApiClient>, RpcError> {
        match profile_id {
            Some(id) => self.profile_client(id).map(|(_, client)| client),
            None => self.root_client(),
        }
    }
}
