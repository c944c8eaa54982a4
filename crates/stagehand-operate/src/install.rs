//! The `install` operation: download → verify → apply.
//!
//! Each step owns one checkpoint. A step whose checkpoint says it finished is
//! skipped on resume, so re-running after an interruption never repeats a
//! completed download or install.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stagehand_core::StateSink;
use stagehand_rpc::api::{ApiClient, Download, DownloadRequest};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::context::OperationContext;
use crate::error::OperateError;
use crate::host::OperationHost;
use crate::params::{InstallParams, InstallResult};
use crate::subcontext::Subcontext;

/// Bytes written between two download checkpoints.
const CHECKPOINT_EVERY: u64 = 1 << 20;

/// Progress of the download step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DownloadCheckpoint {
    /// Bytes durably written to the archive.
    pub offset: u64,
    /// Full archive size, once known.
    pub total_bytes: Option<u64>,
    /// The archive is complete.
    pub complete: bool,
}

impl Subcontext for DownloadCheckpoint {
    const KEY: &'static str = "download";
}

/// Outcome of the verify step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyCheckpoint {
    /// The archive passed verification.
    pub verified: bool,
    /// SHA-256 of the verified archive.
    pub sha256: Option<String>,
}

impl Subcontext for VerifyCheckpoint {
    const KEY: &'static str = "verify";
}

/// Outcome of the apply step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApplyCheckpoint {
    /// The archive was placed in the install folder.
    pub installed: bool,
    /// Installed files, relative to the install folder.
    pub files: Vec<String>,
}

impl Subcontext for ApplyCheckpoint {
    const KEY: &'static str = "apply";
}

/// Places a verified archive into the install folder.
#[async_trait]
pub trait ArchiveInstaller: Send + Sync {
    /// Install `archive` into `destination`, returning the installed files
    /// relative to `destination`.
    async fn install(
        &self,
        archive: &Path,
        destination: &Path,
        sink: &dyn StateSink,
    ) -> Result<Vec<String>, OperateError>;
}

/// Copies the archive as-is into the install folder.
#[derive(Clone, Copy, Debug, Default)]
pub struct CopyInstaller;

#[async_trait]
impl ArchiveInstaller for CopyInstaller {
    async fn install(
        &self,
        archive: &Path,
        destination: &Path,
        sink: &dyn StateSink,
    ) -> Result<Vec<String>, OperateError> {
        let name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OperateError::Validation(format!("bad archive path {}", archive.display())))?
            .to_owned();
        tokio::fs::create_dir_all(destination).await?;
        let bytes = tokio::fs::copy(archive, destination.join(&name)).await?;
        sink.info(&format!("Installed {name} ({bytes} bytes) to {}", destination.display()));
        Ok(vec![name])
    }
}

/// Run the install steps, resuming from whatever checkpoints exist.
pub async fn run(
    ctx: &OperationContext,
    host: &dyn OperationHost,
    installer: &dyn ArchiveInstaller,
    params: &InstallParams,
) -> Result<InstallResult, OperateError> {
    let archive = ctx.downloads_dir().join(archive_name(params)?);
    let destination = install_folder(ctx, params);
    info!(
        game = params.game,
        upload = params.upload,
        build = ?params.build,
        destination = %destination.display(),
        "installing"
    );

    download(ctx, host, params, &archive)
        .await
        .map_err(|e| e.in_step("download"))?;
    verify(ctx, params, &archive)
        .await
        .map_err(|e| e.in_step("verify"))?;
    apply(ctx, installer, &archive, &destination)
        .await
        .map_err(|e| e.in_step("apply"))?;

    Ok(InstallResult {
        game: params.game,
        upload: params.upload,
        build: params.build,
    })
}

fn archive_name(params: &InstallParams) -> Result<String, OperateError> {
    match &params.file_name {
        None => Ok(format!("upload-{}.bin", params.upload)),
        Some(name) => {
            let plain = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name.as_str());
            if plain {
                Ok(name.clone())
            } else {
                Err(OperateError::Validation(format!("Invalid fileName '{name}'")))
            }
        }
    }
}

fn install_folder(ctx: &OperationContext, params: &InstallParams) -> PathBuf {
    params
        .install_folder
        .as_deref()
        .filter(|f| !f.is_empty())
        .map_or_else(|| ctx.staging().join("install"), PathBuf::from)
}

#[allow(clippy::cast_precision_loss)]
fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64).min(1.0)
    }
}

async fn download(
    ctx: &OperationContext,
    host: &dyn OperationHost,
    params: &InstallParams,
    archive: &Path,
) -> Result<(), OperateError> {
    let store = ctx.subcontexts();
    let mut cp = DownloadCheckpoint::default();
    let _ = store.load(&mut cp)?;
    if cp.complete {
        ctx.sink().info("Download already complete, skipping");
        return Ok(());
    }
    ctx.check_cancelled()?;

    let client = host.api_client(params.profile_id)?;
    if let Some(parent) = archive.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(archive)
        .await?;
    // Bytes past the last checkpoint may be torn.
    cp.offset = cp.offset.min(file.metadata().await?.len());
    file.set_len(cp.offset).await?;

    let dl = fetch(client.as_ref(), params, cp.offset).await?;
    if dl.offset != cp.offset {
        warn!(requested = cp.offset, got = dl.offset, "server did not honour range, restarting");
        cp.offset = dl.offset;
        file.set_len(cp.offset).await?;
    }
    let _ = file.seek(SeekFrom::Start(cp.offset)).await?;
    cp.total_bytes = dl.total_bytes.or(cp.total_bytes);
    let total = cp.total_bytes.unwrap_or(0);
    if cp.offset > 0 {
        ctx.sink().info(&format!("Resuming download at byte {}", cp.offset));
    }

    host.begin_progress(fraction(cp.offset, total), total);
    let pumped = pump(ctx, &mut file, dl, &mut cp, total).await;
    host.finish_progress();

    file.flush().await?;
    file.sync_data().await?;
    store.save(&cp)?;
    pumped?;

    if total > 0 && cp.offset != total {
        return Err(OperateError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("download ended at {} of {total} bytes", cp.offset),
        )));
    }
    cp.complete = true;
    store.save(&cp)?;
    debug!(bytes = cp.offset, "download complete");
    Ok(())
}

async fn fetch(
    client: &dyn ApiClient,
    params: &InstallParams,
    offset: u64,
) -> Result<Download, OperateError> {
    let request = DownloadRequest {
        upload_id: params.upload,
        build_id: params.build,
        offset,
    };
    Ok(client.download(&request).await?)
}

/// Copy body chunks to `file`, advancing `cp.offset` only past written bytes.
async fn pump(
    ctx: &OperationContext,
    file: &mut File,
    dl: Download,
    cp: &mut DownloadCheckpoint,
    total: u64,
) -> Result<(), OperateError> {
    let mut body = dl.body;
    let mut since_checkpoint = 0_u64;
    loop {
        let chunk = tokio::select! {
            biased;
            () = ctx.cancel_token().cancelled() => return Err(OperateError::Cancelled),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else {
            return Ok(());
        };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        let len = chunk.len() as u64;
        cp.offset += len;
        since_checkpoint += len;
        ctx.sink().progress(fraction(cp.offset, total));

        if since_checkpoint >= CHECKPOINT_EVERY {
            file.flush().await?;
            file.sync_data().await?;
            ctx.subcontexts().save(cp)?;
            since_checkpoint = 0;
        }
    }
}

async fn verify(
    ctx: &OperationContext,
    params: &InstallParams,
    archive: &Path,
) -> Result<(), OperateError> {
    let store = ctx.subcontexts();
    let mut cp = VerifyCheckpoint::default();
    let _ = store.load(&mut cp)?;
    if cp.verified {
        return Ok(());
    }
    ctx.check_cancelled()?;

    let actual = sha256_file(archive).await?;
    if let Some(expected) = &params.sha256 {
        if !expected.eq_ignore_ascii_case(&actual) {
            warn!(expected, actual, "archive checksum mismatch, discarding download");
            store.save(&DownloadCheckpoint::default())?;
            match tokio::fs::remove_file(archive).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
            return Err(OperateError::ChecksumMismatch {
                expected: expected.to_ascii_lowercase(),
                actual,
            });
        }
    }
    ctx.sink().info(&format!("Archive sha256 {actual}"));
    store.save(&VerifyCheckpoint {
        verified: true,
        sha256: Some(actual),
    })?;
    Ok(())
}

async fn sha256_file(path: &Path) -> Result<String, OperateError> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

async fn apply(
    ctx: &OperationContext,
    installer: &dyn ArchiveInstaller,
    archive: &Path,
    destination: &Path,
) -> Result<(), OperateError> {
    let store = ctx.subcontexts();
    let mut cp = ApplyCheckpoint::default();
    let _ = store.load(&mut cp)?;
    if cp.installed {
        return Ok(());
    }
    ctx.check_cancelled()?;

    let files = installer
        .install(archive, destination, ctx.sink().as_ref())
        .await?;
    store.save(&ApplyCheckpoint {
        installed: true,
        files,
    })?;
    Ok(())
}
