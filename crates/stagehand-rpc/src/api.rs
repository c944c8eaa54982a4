//! Remote storefront API client, reduced to what install steps need.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

/// Errors raised by the remote API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The client could not be configured.
    #[error("invalid API configuration: {0}")]
    Config(String),
}

/// What to download, and where to resume from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Upload id.
    pub upload_id: i64,
    /// Specific build of the upload, if any.
    pub build_id: Option<i64>,
    /// Byte offset to resume from.
    pub offset: u64,
}

/// A download in progress.
pub struct Download {
    /// Offset the body actually starts at. Zero when the server ignored the
    /// requested range.
    pub offset: u64,
    /// Full size of the file, when the server reported it.
    pub total_bytes: Option<u64>,
    /// Body chunks.
    pub body: BoxStream<'static, Result<Bytes, ApiError>>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("offset", &self.offset)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

/// Storefront API client.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Stream an upload (or one of its builds) starting at `request.offset`.
    async fn download(&self, request: &DownloadRequest) -> Result<Download, ApiError>;
}

/// Builds API clients, optionally authenticated with a credential.
pub trait ApiClientFactory: Send + Sync {
    /// Client using `credential`, or an unauthenticated one when `None`.
    fn client(&self, credential: Option<&str>) -> Result<Arc<dyn ApiClient>, ApiError>;
}

/// `reqwest`-backed factory. All clients share one connection pool.
pub struct HttpApiClientFactory {
    http: Client,
    base_url: String,
}

impl HttpApiClientFactory {
    /// Create a factory targeting `base_url`.
    pub fn new(base_url: &str, user_agent: &str, connect_timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }
}

impl ApiClientFactory for HttpApiClientFactory {
    fn client(&self, credential: Option<&str>) -> Result<Arc<dyn ApiClient>, ApiError> {
        if credential.is_some_and(str::is_empty) {
            return Err(ApiError::Config("empty API key".into()));
        }
        Ok(Arc::new(HttpApiClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            key: credential.map(|k| SecretString::from(k.to_owned())),
        }))
    }
}

/// `reqwest`-backed client.
pub struct HttpApiClient {
    http: Client,
    base_url: String,
    key: Option<SecretString>,
}

impl fmt::Debug for HttpApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpApiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.key.is_some())
            .finish()
    }
}

const MAX_ERROR_BODY: usize = 512;

#[async_trait]
impl ApiClient for HttpApiClient {
    #[instrument(skip(self), fields(upload = request.upload_id, offset = request.offset))]
    async fn download(&self, request: &DownloadRequest) -> Result<Download, ApiError> {
        let url = format!("{}/uploads/{}/download", self.base_url, request.upload_id);
        let mut req = self.http.get(url);
        if let Some(build) = request.build_id {
            req = req.query(&[("build_id", build)]);
        }
        if let Some(key) = &self.key {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", key.expose_secret()));
        }
        if request.offset > 0 {
            req = req.header(header::RANGE, format!("bytes={}-", request.offset));
        }

        let resp = req.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let offset = if status == StatusCode::PARTIAL_CONTENT {
            request.offset
        } else {
            0
        };
        let total_bytes = resp.content_length().map(|len| len + offset);
        debug!(offset, ?total_bytes, "download started");

        let body = resp
            .bytes_stream()
            .map_err(|e| ApiError::Network(e.to_string()))
            .boxed();
        Ok(Download {
            offset,
            total_bytes,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(download: Download) -> Vec<u8> {
        let chunks: Vec<Bytes> = download.body.try_collect().await.unwrap();
        chunks.concat()
    }

    fn factory(server: &MockServer) -> HttpApiClientFactory {
        HttpApiClientFactory::new(&server.uri(), "stagehand-test", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn full_download_with_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/3/download"))
            .and(query_param("build_id", "9"))
            .and(header_is("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .mount(&server)
            .await;

        let client = factory(&server).client(Some("secret")).unwrap();
        let dl = client
            .download(&DownloadRequest {
                upload_id: 3,
                build_id: Some(9),
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(dl.offset, 0);
        assert_eq!(dl.total_bytes, Some(11));
        assert_eq!(collect(dl).await, b"hello world");
    }

    #[tokio::test]
    async fn resumes_with_range_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/3/download"))
            .and(header_is("range", "bytes=6-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"world".to_vec()))
            .mount(&server)
            .await;

        let client = factory(&server).client(None).unwrap();
        let dl = client
            .download(&DownloadRequest {
                upload_id: 3,
                build_id: None,
                offset: 6,
            })
            .await
            .unwrap();
        assert_eq!(dl.offset, 6);
        assert_eq!(dl.total_bytes, Some(11));
        assert_eq!(collect(dl).await, b"world");
    }

    #[tokio::test]
    async fn ignored_range_restarts_at_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/3/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .mount(&server)
            .await;

        let client = factory(&server).client(None).unwrap();
        let dl = client
            .download(&DownloadRequest {
                upload_id: 3,
                build_id: None,
                offset: 6,
            })
            .await
            .unwrap();
        assert_eq!(dl.offset, 0);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let client = factory(&server).client(Some("bad")).unwrap();
        let err = client
            .download(&DownloadRequest {
                upload_id: 1,
                build_id: None,
                offset: 0,
            })
            .await
            .unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn empty_key_is_rejected() {
        let f = HttpApiClientFactory::new("http://localhost", "ua", Duration::from_secs(1)).unwrap();
        assert!(f.client(Some("")).is_err());
        assert!(f.client(None).is_ok());
    }

    #[test]
    fn debug_redacts_key() {
        let f = HttpApiClientFactory::new("http://localhost/", "ua", Duration::from_secs(1)).unwrap();
        let client = HttpApiClient {
            http: f.http.clone(),
            base_url: f.base_url.clone(),
            key: Some(SecretString::from("hunter2".to_owned())),
        };
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("authenticated: true"));
        assert_eq!(f.base_url, "http://localhost");
    }
}
