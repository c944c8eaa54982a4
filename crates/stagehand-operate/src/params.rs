//! Parameters, results and the persisted operation intent.

use serde::{Deserialize, Serialize};

use crate::subcontext::Subcontext;

/// The only operation kind currently supported.
pub const INSTALL: &str = "install";

/// `Operation.Start` parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStartParams {
    /// Cancellation key; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Folder holding the operation's checkpoints and downloads.
    #[serde(default)]
    pub staging_folder: String,
    /// Operation kind (`install`).
    #[serde(default)]
    pub operation: String,
    /// Parameters for `install`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_params: Option<InstallParams>,
}

/// What to install and where.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstallParams {
    /// Game id.
    pub game: i64,
    /// Upload id.
    pub upload: i64,
    /// Build id, for uploads with builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<i64>,
    /// Profile whose credential downloads the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<i64>,
    /// Destination; `<stagingFolder>/install` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_folder: Option<String>,
    /// Archive name inside the download area.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Expected SHA-256 of the archive (hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Persisted intent of the operation, written before any step runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetaSubcontext {
    /// Operation kind.
    pub operation: String,
    /// Staging folder the operation was started against.
    pub staging_folder: String,
    /// Parameters for `install`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_params: Option<InstallParams>,
}

impl Subcontext for MetaSubcontext {
    const KEY: &'static str = "meta";
}

impl From<&OperationStartParams> for MetaSubcontext {
    fn from(params: &OperationStartParams) -> Self {
        Self {
            operation: params.operation.clone(),
            staging_folder: params.staging_folder.clone(),
            install_params: params.install_params.clone(),
        }
    }
}

/// `Operation.Start` result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    /// Always `true`; failures are error replies.
    pub success: bool,
    /// Present for `install`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_result: Option<InstallResult>,
}

/// What was installed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    /// Game id.
    pub game: i64,
    /// Upload id.
    pub upload: i64,
    /// Build id, if any.
    pub build: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields_decode_as_empty() {
        let p: OperationStartParams = serde_json::from_value(json!({})).unwrap();
        assert!(p.staging_folder.is_empty());
        assert!(p.operation.is_empty());
        assert!(p.install_params.is_none());
    }

    #[test]
    fn camel_case_wire_names() {
        let p: OperationStartParams = serde_json::from_value(json!({
            "id": "op-1",
            "stagingFolder": "/tmp/x",
            "operation": "install",
            "installParams": {"game": 7, "upload": 3, "build": 9, "profileId": 1, "installFolder": "/games/x"}
        }))
        .unwrap();
        let ip = p.install_params.unwrap();
        assert_eq!(ip.profile_id, Some(1));
        assert_eq!(ip.install_folder.as_deref(), Some("/games/x"));
        assert_eq!(p.id.as_deref(), Some("op-1"));
    }

    #[test]
    fn result_shape() {
        let r = OperationResult {
            success: true,
            install_result: Some(InstallResult {
                game: 7,
                upload: 3,
                build: Some(9),
            }),
        };
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"success": true, "installResult": {"game": 7, "upload": 3, "build": 9}})
        );
    }

    #[test]
    fn meta_copies_intent() {
        let p = OperationStartParams {
            id: Some("x".into()),
            staging_folder: "/s".into(),
            operation: "install".into(),
            install_params: None,
        };
        let meta = MetaSubcontext::from(&p);
        assert_eq!(meta.operation, "install");
        assert_eq!(meta.staging_folder, "/s");
    }
}
