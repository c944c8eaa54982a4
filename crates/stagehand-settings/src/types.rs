//! Settings structure. Every section has compiled defaults so a partial
//! settings file is always valid.

use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StagehandSettings {
    /// Transport the peer connects over.
    pub server: ServerSettings,
    /// Local database.
    pub store: StoreSettings,
    /// Remote storefront API.
    pub api: ApiSettings,
    /// Progress notification throttling.
    pub progress: ProgressSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// How the peer reaches the service.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON on stdin/stdout.
    #[default]
    Stdio,
    /// Newline-delimited JSON on accepted TCP connections.
    Tcp,
}

/// Transport settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Which transport to serve.
    pub transport: TransportKind,
    /// Bind address when `transport` is `tcp`.
    pub listen_addr: String,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stdio,
            listen_addr: "127.0.0.1:13137".into(),
            outbound_queue: 256,
        }
    }
}

/// Local database settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreSettings {
    /// Database file. Empty means `~/.stagehand/database/stagehand.db`.
    pub db_path: String,
}

/// Remote API settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiSettings {
    /// Base URL of the storefront API.
    pub base_url: String,
    /// Per-request connect timeout.
    pub connect_timeout_ms: u64,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.example.com".into(),
            connect_timeout_ms: 10_000,
            user_agent: concat!("stagehand/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// Progress notification settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgressSettings {
    /// Minimum interval between two `Progress` notifications.
    pub notify_interval_ms: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self { notify_interval_ms: 250 }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = StagehandSettings::default();
        assert_eq!(s.server.transport, TransportKind::Stdio);
        assert_eq!(s.server.outbound_queue, 256);
        assert!(s.store.db_path.is_empty());
        assert_eq!(s.progress.notify_interval_ms, 250);
        assert_eq!(s.logging.level, "info");
        assert!(s.api.user_agent.starts_with("stagehand/"));
    }

    #[test]
    fn partial_document_fills_defaults() {
        let s: StagehandSettings =
            serde_json::from_str(r#"{"server":{"transport":"tcp"}}"#).unwrap();
        assert_eq!(s.server.transport, TransportKind::Tcp);
        assert_eq!(s.server.listen_addr, "127.0.0.1:13137");
        assert_eq!(s.api, ApiSettings::default());
    }

    #[test]
    fn camel_case_keys() {
        let v = serde_json::to_value(StagehandSettings::default()).unwrap();
        assert!(v["server"].get("listenAddr").is_some());
        assert!(v["progress"].get("notifyIntervalMs").is_some());
    }
}
