//! Per-request execution context.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stagehand_core::StateSink;
use stagehand_store::{Database, Profile, ProfileRepo, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiClientFactory};
use crate::cancel::CancelFuncs;
use crate::connection::Connection;
use crate::errors::RpcError;
use crate::notify::{NotificationInterceptor, Notifier};
use crate::progress::ProgressBridge;

/// Opens the local database on demand.
pub trait StoreOpener: Send + Sync {
    /// Open a fresh handle.
    fn open(&self) -> Result<Database, StoreError>;
}

/// Opens the database file at a fixed path.
#[derive(Clone, Debug)]
pub struct FileStoreOpener {
    path: PathBuf,
}

impl FileStoreOpener {
    /// Opener for the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreOpener for FileStoreOpener {
    fn open(&self) -> Result<Database, StoreError> {
        Database::open(&self.path)
    }
}

/// Process-wide dependencies shared by every request.
pub struct ServiceContext {
    /// Version reported by `Version.Get` and attached to internal errors.
    pub version: String,
    /// Builds remote API clients.
    pub api: Arc<dyn ApiClientFactory>,
    /// Opens the local database.
    pub store: Arc<dyn StoreOpener>,
    /// Minimum spacing between `Progress` notifications.
    pub progress_interval: Duration,
}

/// Everything one request's handler runs with.
///
/// The store handle is opened on first use and released by the dispatcher
/// when the handler returns, whatever the outcome.
pub struct RequestContext {
    method: String,
    id: Option<Value>,
    params: Option<Value>,
    services: Arc<ServiceContext>,
    conn: Arc<Connection>,
    cancel: CancellationToken,
    notifier: Arc<Notifier>,
    progress: Arc<ProgressBridge>,
    store: Mutex<Option<Database>>,
}

impl RequestContext {
    /// Build a context for one request, scoped under `parent`.
    pub fn new(
        services: Arc<ServiceContext>,
        conn: Arc<Connection>,
        method: impl Into<String>,
        id: Option<Value>,
        params: Option<Value>,
        parent: &CancellationToken,
    ) -> Self {
        let notifier = Arc::new(Notifier::new(Arc::clone(&conn)));
        let progress = Arc::new(ProgressBridge::new(
            Arc::clone(&notifier),
            services.progress_interval,
        ));
        Self {
            method: method.into(),
            id,
            params,
            services,
            conn,
            cancel: parent.child_token(),
            notifier,
            progress,
            store: Mutex::new(None),
        }
    }

    /// Method being served.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request id, `None` for peer notifications.
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    /// Version string of this build.
    pub fn version(&self) -> &str {
        &self.services.version
    }

    /// Decode the parameters into `T`.
    ///
    /// Absent parameters decode as an empty object.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        let raw = self
            .params
            .clone()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        serde_json::from_value(raw)
            .map_err(|e| RpcError::invalid_params(format!("Invalid params for {}: {e}", self.method)))
    }

    /// The request's cancellation scope (child of the connection scope).
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Connection-scoped operation id → cancel trigger map.
    pub fn cancel_funcs(&self) -> &CancelFuncs {
        self.conn.cancel_funcs()
    }

    // ── Store ───────────────────────────────────────────────────────

    /// Run `f` against the request's store handle, opening it on first use.
    pub fn with_store<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StoreError>,
    ) -> Result<T, RpcError> {
        let mut slot = self.store.lock();
        if slot.is_none() {
            let db = self.services.store.open()?;
            debug!(method = %self.method, path = %db.path().display(), "opened store for request");
            *slot = Some(db);
        }
        match slot.as_ref() {
            Some(db) => f(db).map_err(RpcError::from),
            None => Err(RpcError::internal("store handle unavailable")),
        }
    }

    /// Close the store handle if one was opened. Close errors are logged.
    pub fn release_store(&self) {
        let Some(db) = self.store.lock().take() else {
            return;
        };
        if let Err(e) = db.close() {
            warn!(method = %self.method, error = %e, "failed to close store");
        }
    }

    /// Whether a store handle is currently open.
    pub fn has_open_store(&self) -> bool {
        self.store.lock().is_some()
    }

    // ── Notifications ───────────────────────────────────────────────

    /// Send a notification to the peer (or its interceptor).
    pub fn notify<T: Serialize>(&self, method: &str, params: &T) -> Result<(), RpcError> {
        let params = serde_json::to_value(params)
            .map_err(|e| RpcError::internal(format!("encoding {method} notification: {e}")))?;
        self.notifier.notify(method, params)
    }

    /// Route notifications named `method` to `interceptor` for this request.
    pub fn intercept_notification(&self, method: &str, interceptor: NotificationInterceptor) {
        self.notifier.intercept(method, interceptor);
    }

    /// Undo [`intercept_notification`](Self::intercept_notification).
    pub fn stop_intercepting_notification(&self, method: &str) {
        self.notifier.stop_intercepting(method);
    }

    // ── Progress ────────────────────────────────────────────────────

    /// Begin tracking progress from 0 with an unknown size.
    pub fn start_progress(&self) {
        self.start_progress_with_initial_and_total(0.0, 0);
    }

    /// Begin tracking progress from 0 for `total_bytes` of work.
    pub fn start_progress_with_total_bytes(&self, total_bytes: u64) {
        self.start_progress_with_initial_and_total(0.0, total_bytes);
    }

    /// Begin tracking progress from `initial`.
    ///
    /// Calling while already tracking logs a warning and does nothing.
    pub fn start_progress_with_initial_and_total(&self, initial: f64, total_bytes: u64) {
        let _ = self.progress.start(initial, total_bytes);
    }

    /// Stop tracking progress.
    ///
    /// Calling while not tracking logs a warning and does nothing.
    pub fn end_progress(&self) {
        let _ = self.progress.end();
    }

    /// Leveled log + progress sink bound to this request.
    pub fn sink(&self) -> Arc<dyn StateSink> {
        Arc::clone(&self.progress) as Arc<dyn StateSink>
    }

    // ── API clients ─────────────────────────────────────────────────

    /// Unauthenticated client.
    pub fn root_client(&self) -> Result<Arc<dyn ApiClient>, RpcError> {
        self.services
            .api
            .client(None)
            .map_err(|e| RpcError::internal(format!("creating API client: {e}")))
    }

    /// Client authenticated with a raw credential.
    pub fn key_client(&self, key: &str) -> Result<Arc<dyn ApiClient>, RpcError> {
        self.services
            .api
            .client(Some(key))
            .map_err(|e| RpcError::internal(format!("creating API client: {e}")))
    }

    /// Client authenticated as a stored profile.
    ///
    /// A zero id, an unknown profile, or a profile without a credential is an
    /// internal error.
    pub fn profile_client(&self, profile_id: i64) -> Result<(Profile, Arc<dyn ApiClient>), RpcError> {
        if profile_id == 0 {
            return Err(RpcError::internal("profileId must be non-zero"));
        }
        let profile = self
            .with_store(|db| ProfileRepo::new(db).get(profile_id))?
            .ok_or_else(|| RpcError::internal(format!("Could not find profile {profile_id}")))?;
        let client = match profile.credential() {
            Some(key) => self.key_client(key)?,
            None => {
                return Err(RpcError::internal(format!(
                    "Profile {profile_id} lacks an API key"
                )));
            }
        };
        Ok((profile, client))
    }
}
