//! In-crate fakes for the operation collaborators.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use stagehand_core::{LogLevel, StateSink};
use stagehand_rpc::RpcError;
use stagehand_rpc::api::{ApiClient, ApiError, Download, DownloadRequest};
use tokio_util::sync::CancellationToken;

use crate::error::OperateError;
use crate::host::OperationHost;
use crate::install::{ArchiveInstaller, CopyInstaller};
use crate::params::InstallParams;

pub fn params(game: i64, upload: i64, build: Option<i64>) -> InstallParams {
    InstallParams {
        game,
        upload,
        build,
        profile_id: None,
        install_folder: None,
        file_name: None,
        sha256: None,
    }
}

/// Serves a fixed payload in fixed-size chunks, recording requested offsets.
pub struct FakeClient {
    data: Vec<u8>,
    chunk: usize,
    ignore_range: bool,
    claimed_total: Option<u64>,
    cancel_after: Option<(usize, CancellationToken)>,
    hang_after: Option<usize>,
    pub offsets: Mutex<Vec<u64>>,
}

impl FakeClient {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            chunk,
            ignore_range: false,
            claimed_total: None,
            cancel_after: None,
            hang_after: None,
            offsets: Mutex::new(Vec::new()),
        }
    }

    /// Fire `token` while producing the `n`th chunk.
    pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    /// Stall forever after `n` chunks.
    pub fn hang_after(mut self, n: usize) -> Self {
        self.hang_after = Some(n);
        self
    }

    pub fn ignore_range(mut self) -> Self {
        self.ignore_range = true;
        self
    }

    pub fn claim_total(mut self, total: u64) -> Self {
        self.claimed_total = Some(total);
        self
    }

    pub fn calls(&self) -> usize {
        self.offsets.lock().len()
    }
}

#[async_trait]
impl ApiClient for FakeClient {
    async fn download(&self, request: &DownloadRequest) -> Result<Download, ApiError> {
        self.offsets.lock().push(request.offset);
        let start = if self.ignore_range {
            0
        } else {
            usize::try_from(request.offset).unwrap_or(usize::MAX).min(self.data.len())
        };
        let chunks: Vec<Bytes> = self.data[start..]
            .chunks(self.chunk)
            .map(Bytes::copy_from_slice)
            .collect();
        let cancel = self.cancel_after.clone();
        let body = stream::iter(chunks.into_iter().enumerate()).map(move |(i, chunk)| {
            if let Some((n, token)) = &cancel {
                if i + 1 == *n {
                    token.cancel();
                }
            }
            Ok::<_, ApiError>(chunk)
        });
        let body = match self.hang_after {
            Some(n) => body.take(n).chain(stream::pending()).boxed(),
            None => body.boxed(),
        };
        Ok(Download {
            offset: start as u64,
            total_bytes: Some(self.claimed_total.unwrap_or(self.data.len() as u64)),
            body,
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub fractions: Mutex<Vec<f64>>,
    pub logs: Mutex<Vec<(LogLevel, String)>>,
}

impl StateSink for RecordingSink {
    fn log(&self, level: LogLevel, message: &str) {
        self.logs.lock().push((level, message.to_owned()));
    }

    fn progress(&self, alpha: f64) {
        self.fractions.lock().push(alpha);
    }
}

pub struct FakeHost {
    pub client: Arc<FakeClient>,
    pub sink: Arc<RecordingSink>,
    pub token: CancellationToken,
    pub profiles_requested: Mutex<Vec<Option<i64>>>,
}

impl FakeHost {
    pub fn new(client: Arc<FakeClient>) -> Self {
        Self::with_token(client, CancellationToken::new())
    }

    pub fn with_token(client: Arc<FakeClient>, token: CancellationToken) -> Self {
        Self {
            client,
            sink: Arc::new(RecordingSink::default()),
            token,
            profiles_requested: Mutex::new(Vec::new()),
        }
    }

    /// Initial fractions passed to `begin_progress` and every reported update.
    pub fn fractions(&self) -> Vec<f64> {
        self.sink.fractions.lock().clone()
    }
}

impl OperationHost for FakeHost {
    fn progress_sink(&self) -> Arc<dyn StateSink> {
        Arc::clone(&self.sink) as Arc<dyn StateSink>
    }

    fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    fn begin_progress(&self, initial: f64, _total_bytes: u64) {
        self.sink.fractions.lock().push(initial);
    }

    fn finish_progress(&self) {}

    fn api_client(&self, profile_id: Option<i64>) -> Result<Arc<dyn ApiClient>, RpcError> {
        self.profiles_requested.lock().push(profile_id);
        Ok(Arc::clone(&self.client) as Arc<dyn ApiClient>)
    }
}

/// Copies like [`CopyInstaller`] after failing a configurable number of times.
#[derive(Default)]
pub struct RecordingInstaller {
    pub calls: AtomicUsize,
    pub failures_left: AtomicUsize,
}

impl RecordingInstaller {
    pub fn failing(times: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(times),
        }
    }
}

#[async_trait]
impl ArchiveInstaller for RecordingInstaller {
    async fn install(
        &self,
        archive: &Path,
        destination: &Path,
        sink: &dyn StateSink,
    ) -> Result<Vec<String>, OperateError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(OperateError::Io(std::io::Error::other("disk full")));
        }
        CopyInstaller.install(archive, destination, sink).await
    }
}

/// Installs, then leaves a plain file where the downloads folder was.
pub struct DownloadsClobberingInstaller;

#[async_trait]
impl ArchiveInstaller for DownloadsClobberingInstaller {
    async fn install(
        &self,
        archive: &Path,
        destination: &Path,
        sink: &dyn StateSink,
    ) -> Result<Vec<String>, OperateError> {
        let files = CopyInstaller.install(archive, destination, sink).await?;
        let downloads = archive.parent().unwrap();
        std::fs::remove_dir_all(downloads).unwrap();
        std::fs::write(downloads, b"not a directory").unwrap();
        Ok(files)
    }
}

/// Panics instead of installing.
pub struct PanickingInstaller;

#[async_trait]
impl ArchiveInstaller for PanickingInstaller {
    async fn install(
        &self,
        _archive: &Path,
        _destination: &Path,
        _sink: &dyn StateSink,
    ) -> Result<Vec<String>, OperateError> {
        panic!("installer blew up");
    }
}
