//! Per-connection outbound state.

use std::sync::atomic::{AtomicU64, Ordering};

use stagehand_core::ids::ConnectionId;
use tokio::sync::mpsc;
use tracing::debug;

use crate::cancel::CancelFuncs;
use crate::types::{Outgoing, RpcNotification, RpcResponse};

/// The writer task has gone away.
#[derive(Debug, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// One peer connection: the outbound queue feeding the writer task, plus the
/// connection-scoped cancellation registry.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Outgoing>,
    cancel_funcs: CancelFuncs,
    dropped_notifications: AtomicU64,
}

impl Connection {
    /// Create a connection feeding `tx`.
    pub fn new(tx: mpsc::Sender<Outgoing>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
            cancel_funcs: CancelFuncs::new(),
            dropped_notifications: AtomicU64::new(0),
        }
    }

    /// Connection identifier, for logs.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Operation id → cancel trigger, scoped to this connection.
    pub fn cancel_funcs(&self) -> &CancelFuncs {
        &self.cancel_funcs
    }

    /// Enqueue a notification without waiting.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped notification counter.
    pub fn notify(&self, notification: RpcNotification) -> bool {
        if self.tx.try_send(Outgoing::Notification(notification)).is_ok() {
            true
        } else {
            let dropped = self.dropped_notifications.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(conn_id = %self.id, dropped, "notification dropped");
            false
        }
    }

    /// Enqueue a reply, waiting for queue space.
    pub async fn reply(&self, response: RpcResponse) -> Result<(), ConnectionClosed> {
        self.tx
            .send(Outgoing::Response(response))
            .await
            .map_err(|_| ConnectionClosed)
    }

    /// Total notifications dropped on this connection.
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped_notifications.load(Ordering::Relaxed)
    }
}
