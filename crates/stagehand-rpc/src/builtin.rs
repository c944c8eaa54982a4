//! Methods every server answers regardless of configuration.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::RequestContext;
use crate::errors::RpcError;
use crate::registry::{MethodHandler, RouterBuilder};

/// `Version.Get` → `{version, versionString}`.
pub struct VersionGetHandler;

#[async_trait]
impl MethodHandler for VersionGetHandler {
    async fn handle(&self, rc: &RequestContext) -> Result<Value, RpcError> {
        let version = rc.version();
        Ok(json!({
            "version": version,
            "versionString": format!("stagehand v{version}"),
        }))
    }
}

/// Register the built-in methods.
pub fn register(builder: &mut RouterBuilder) {
    let _ = builder.register("Version.Get", VersionGetHandler);
}
