//! Outbound notifications with per-method interception.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::connection::Connection;
use crate::errors::RpcError;
use crate::types::RpcNotification;

/// Replaces delivery of one notification method for the duration of a request.
pub type NotificationInterceptor = Arc<dyn Fn(&str, &Value) -> Result<(), RpcError> + Send + Sync>;

/// Routes a request's notifications either to an interceptor or to the peer.
pub struct Notifier {
    conn: Arc<Connection>,
    interceptors: Mutex<HashMap<String, NotificationInterceptor>>,
}

impl Notifier {
    /// Create a notifier delivering to `conn`.
    pub fn new(conn: Arc<Connection>) -> Self {
        Self {
            conn,
            interceptors: Mutex::new(HashMap::new()),
        }
    }

    /// Route `method` to `interceptor` instead of the peer.
    pub fn intercept(&self, method: &str, interceptor: NotificationInterceptor) {
        let _ = self.interceptors.lock().insert(method.to_owned(), interceptor);
    }

    /// Restore normal delivery for `method`.
    pub fn stop_intercepting(&self, method: &str) {
        let _ = self.interceptors.lock().remove(method);
    }

    /// Deliver a notification.
    ///
    /// Only an interceptor can fail; a full or closed peer queue drops the
    /// notification (counted on the connection).
    pub fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        let interceptor = self.interceptors.lock().get(method).cloned();
        if let Some(interceptor) = interceptor {
            return interceptor(method, &params);
        }
        let _ = self.conn.notify(RpcNotification::new(method, params));
        Ok(())
    }
}
