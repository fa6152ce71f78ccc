//! Default executor: streams the source URL to disk

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Proxy};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ExecutionFailure, ExecutionOutput, ExecutionRequest, Executor};
use crate::progress::{ProgressSink, ProgressThrottle, size_exceeded};

const FALLBACK_FILE_NAME: &str = "download";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub max_redirects: usize,
    /// Minimum spacing between progress reports
    pub progress_interval: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("fetchdeck/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
            max_redirects: 10,
            progress_interval: Duration::from_millis(250),
        }
    }
}

/// Streams a URL into the task's directory, hashing as it goes
pub struct HttpExecutor {
    client: Client,
    progress_interval: Duration,
}

impl HttpExecutor {
    pub fn new(config: HttpConfig) -> Result<Self, ClientError> {
        // No overall request timeout: the scheduler bounds the whole run
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));

        if let Some(url) = &config.proxy {
            let proxy = Proxy::all(url).map_err(|e| ClientError::InvalidProxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self {
            client,
            progress_interval: config.progress_interval,
        })
    }

    async fn fetch(
        &self,
        request: &ExecutionRequest,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionFailure> {
        let max_file_size = request.limits.max_file_size;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecutionFailure::canceled()),
            response = self.client.get(&request.source_url).send() => {
                response.map_err(|e| request_error(&e))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutionFailure::execution(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let total_bytes = response.content_length();
        if let Some(total) = total_bytes {
            if total > max_file_size {
                return Err(size_exceeded(total, max_file_size));
            }
        }
        progress.report(0, total_bytes)?;

        let file_name = file_name_from_url(response.url());
        tokio::fs::create_dir_all(&request.dest_dir)
            .await
            .map_err(|e| io_error("create download directory", &e))?;
        let file_path = request.dest_dir.join(file_name);
        let mut file = tokio::fs::File::create(&file_path)
            .await
            .map_err(|e| io_error("create file", &e))?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut throttle = ProgressThrottle::new(self.progress_interval, 1024 * 1024);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExecutionFailure::canceled()),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| request_error(&e))?;

            downloaded += chunk.len() as u64;
            if downloaded > max_file_size || throttle.should_emit(downloaded) {
                progress.report(downloaded, total_bytes)?;
            }

            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| io_error("write file", &e))?;
        }

        file.flush().await.map_err(|e| io_error("flush file", &e))?;
        progress.report(downloaded, Some(downloaded))?;

        Ok(ExecutionOutput {
            file_path,
            size_bytes: downloaded,
            checksum: format!("sha256:{:x}", hasher.finalize()),
        })
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn run(
        &self,
        request: ExecutionRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionFailure> {
        debug!(task_id = %request.task_id, url = %request.source_url, "Starting download");

        let output = self.fetch(&request, &progress, &cancel).await?;

        info!(
            task_id = %request.task_id,
            size = output.size_bytes,
            path = %output.file_path.display(),
            "Download completed"
        );
        Ok(output)
    }
}

fn request_error(e: &reqwest::Error) -> ExecutionFailure {
    if e.is_redirect() {
        ExecutionFailure::execution("too many redirects")
    } else if e.is_timeout() {
        ExecutionFailure::execution(format!("connection timed out: {e}"))
    } else {
        ExecutionFailure::execution(format!("HTTP request failed: {e}"))
    }
}

fn io_error(action: &str, e: &std::io::Error) -> ExecutionFailure {
    ExecutionFailure::execution(format!("failed to {action}: {e}"))
}

/// Last non-empty path segment, or a fixed fallback.
///
/// Only the bare segment is kept so the file always lands inside the task's
/// directory.
fn file_name_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| segment.trim())
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .and_then(|segment| Path::new(segment).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Limits;
    use crate::observability::Metrics;
    use crate::progress::ProgressTracker;
    use crate::store::FjallTaskStore;
    use crate::task::{ErrorKind, TaskId};
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        temp: TempDir,
        tracker: ProgressTracker,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = Arc::new(FjallTaskStore::open(temp.path().join("tasks")).unwrap());
            let tracker = ProgressTracker::new(store, Arc::new(Metrics::new()));
            Self { temp, tracker }
        }

        fn request(&self, url: String, max_file_size: u64) -> (ExecutionRequest, ProgressSink) {
            let task_id = TaskId::generate();
            let request = ExecutionRequest {
                task_id,
                source_url: url,
                dest_dir: self.temp.path().join("downloads").join(task_id.to_string()),
                limits: Limits {
                    timeout: Duration::from_secs(30),
                    max_file_size,
                },
            };
            let sink = ProgressSink::new(
                task_id,
                self.tracker.clone(),
                max_file_size,
                CancellationToken::new(),
            );
            (request, sink)
        }
    }

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_redirects, 10);
        assert!(config.user_agent.starts_with("fetchdeck/"));
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let config = HttpConfig {
            proxy: Some("::not a proxy::".to_string()),
            ..HttpConfig::default()
        };
        assert!(matches!(
            HttpExecutor::new(config),
            Err(ClientError::InvalidProxy(_))
        ));
    }

    #[test]
    fn test_file_name_from_url() {
        let name = |url: &str| file_name_from_url(&reqwest::Url::parse(url).unwrap());
        assert_eq!(name("https://cdn.example.com/media/clip.mp4?sig=1"), "clip.mp4");
        assert_eq!(name("https://example.com/"), FALLBACK_FILE_NAME);
        assert_eq!(name("https://example.com"), FALLBACK_FILE_NAME);
    }

    #[tokio::test]
    async fn test_download_writes_file_and_checksum() {
        let server = MockServer::start().await;
        let body = b"hello fetchdeck".to_vec();
        Mock::given(method("GET"))
            .and(path("/files/hello.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let fixture = Fixture::new();
        let (request, sink) = fixture.request(format!("{}/files/hello.txt", server.uri()), 1024);
        let executor = HttpExecutor::new(HttpConfig::default()).unwrap();

        let output = executor
            .run(request.clone(), sink, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.size_bytes, body.len() as u64);
        assert_eq!(output.file_path, request.dest_dir.join("hello.txt"));
        assert_eq!(std::fs::read(&output.file_path).unwrap(), body);

        let expected = format!("sha256:{:x}", Sha256::digest(&body));
        assert_eq!(output.checksum, expected);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fixture = Fixture::new();
        let (request, sink) = fixture.request(format!("{}/missing", server.uri()), 1024);
        let executor = HttpExecutor::new(HttpConfig::default()).unwrap();

        let err = executor
            .run(request, sink, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExecutionError);
        assert!(err.message.contains("404"));
    }

    #[tokio::test]
    async fn test_content_length_above_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let fixture = Fixture::new();
        let (request, sink) = fixture.request(format!("{}/big.bin", server.uri()), 1000);
        let executor = HttpExecutor::new(HttpConfig::default()).unwrap();

        let err = executor
            .run(request.clone(), sink, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::SizeExceeded);
        assert!(!request.dest_dir.exists());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let fixture = Fixture::new();
        let (request, sink) = fixture.request("http://127.0.0.1:9/never".to_string(), 1024);
        let executor = HttpExecutor::new(HttpConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor.run(request, sink, cancel).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Canceled);
    }
}
