use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use futures_util::TryStreamExt;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn, Instrument};

use super::state::{DownloadRequest, DownloadState, ProgressTracker};

/// Size of each body chunk copied to disk (80 KiB); only the last chunk may be shorter
pub const COPY_CHUNK_SIZE: usize = 81_920;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors that end a transfer
#[derive(Debug, Error)]
pub enum DownloadError {
    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Reachability probe answered with a non-success status
    #[error("cannot reach {url}: server answered {status}")]
    Unreachable {
        /// Probed URL
        url: String,
        /// Status of the HEAD response
        status: StatusCode,
    },

    /// Reachability probe failed at the transport level
    #[error("no connection to {url}: {source}")]
    Offline {
        /// Probed URL
        url: String,
        /// Transport error
        source: reqwest::Error,
    },

    /// GET request could not be sent
    #[error("request to {url} failed: {source}")]
    Request {
        /// Requested URL
        url: String,
        /// Transport error
        source: reqwest::Error,
    },

    /// GET answered with a non-success status
    #[error("download of {url} failed with status {status}")]
    Http {
        /// Requested URL
        url: String,
        /// Status of the GET response
        status: StatusCode,
    },

    /// Response body broke off mid-transfer
    #[error("transfer of {url} interrupted: {source}")]
    Stream {
        /// Requested URL
        url: String,
        /// Read error
        source: io::Error,
    },

    /// Destination could not be written
    #[error("file error at {path}: {source}")]
    Io {
        /// File being written or renamed
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

impl DownloadError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Where the file now lives
    pub path: PathBuf,
    /// Bytes copied to disk
    pub bytes_written: u64,
    /// Content length the server declared, if any
    pub content_length: Option<u64>,
    /// Terminal state (always [`DownloadState::succeeded`])
    pub state: DownloadState,
}

/// Streams remote files to disk with progress reporting
///
/// Every call tracks its own [`DownloadState`], so one `Downloader` can be
/// shared between concurrent transfers.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    /// Creates a downloader
    ///
    /// # Errors
    /// Returns error if the TLS backend cannot be initialized
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(DownloadError::Client)?;
        Ok(Self { client })
    }

    /// Downloads `request` on the current thread
    ///
    /// `on_progress` sees every state change, ending with either
    /// [`DownloadState::succeeded`] or [`DownloadState::failed`].
    /// Must not be called from inside an async runtime.
    ///
    /// # Errors
    /// Returns error if the probe, the request, the body or the file write fails.
    /// The partial file is removed.
    pub fn download_file<F>(
        &self,
        request: &DownloadRequest,
        on_progress: F,
    ) -> Result<DownloadReport, DownloadError>
    where
        F: FnMut(DownloadState),
    {
        let _span = tracing::info_span!("download", url = %request.url).entered();
        let mut tracker = ProgressTracker::start(on_progress);

        match Self::transfer_blocking(request, &mut tracker) {
            Ok(()) => Ok(finish_ok(request, tracker)),
            Err(e) => {
                remove_partial(&request.partial_path());
                Err(finish_err(tracker, e))
            }
        }
    }

    /// Async form of [`Self::download_file`] with identical semantics
    ///
    /// # Errors
    /// Returns error if the probe, the request, the body or the file write fails.
    /// The partial file is removed.
    pub async fn download_file_async<F>(
        &self,
        request: &DownloadRequest,
        on_progress: F,
    ) -> Result<DownloadReport, DownloadError>
    where
        F: FnMut(DownloadState) + Send,
    {
        let span = tracing::info_span!("download", url = %request.url);
        async move {
            let mut tracker = ProgressTracker::start(on_progress);

            match self.transfer_async(request, &mut tracker).await {
                Ok(()) => Ok(finish_ok(request, tracker)),
                Err(e) => {
                    let partial = request.partial_path();
                    if let Err(err) = tokio::fs::remove_file(&partial).await {
                        log_cleanup_failure(&partial, &err);
                    }
                    Err(finish_err(tracker, e))
                }
            }
        }
        .instrument(span)
        .await
    }

    fn transfer_blocking<F: FnMut(DownloadState)>(
        request: &DownloadRequest,
        tracker: &mut ProgressTracker<F>,
    ) -> Result<(), DownloadError> {
        let url = request.url.as_str();
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(DownloadError::Client)?;

        match client.head(url).send() {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => return Err(unreachable(url, response.status())),
            Err(source) => return Err(offline(url, source)),
        }

        let mut response = client.get(url).send().map_err(|source| DownloadError::Request {
            url: url.to_owned(),
            source,
        })?;
        check_status(url, response.status())?;
        tracker.set_total(response.content_length());
        debug!(content_length = ?tracker.total(), "transfer started");

        fs::create_dir_all(&request.destination_dir)
            .map_err(DownloadError::io(&request.destination_dir))?;
        let partial = request.partial_path();
        let mut file = File::create(&partial).map_err(DownloadError::io(&partial))?;

        let mut buffer = vec![0_u8; COPY_CHUNK_SIZE];
        loop {
            let read = read_chunk(&mut response, &mut buffer).map_err(|source| {
                DownloadError::Stream {
                    url: url.to_owned(),
                    source,
                }
            })?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(DownloadError::io(&partial))?;
            tracker.advance(read);
        }

        // The file must be closed before it is renamed and handed to the caller
        file.flush().map_err(DownloadError::io(&partial))?;
        file.sync_all().map_err(DownloadError::io(&partial))?;
        drop(file);

        let destination = request.destination();
        fs::rename(&partial, &destination).map_err(DownloadError::io(&destination))?;
        Ok(())
    }

    async fn transfer_async<F: FnMut(DownloadState)>(
        &self,
        request: &DownloadRequest,
        tracker: &mut ProgressTracker<F>,
    ) -> Result<(), DownloadError> {
        let url = request.url.as_str();
        info!(url, "download starting");

        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => return Err(unreachable(url, response.status())),
            Err(source) => return Err(offline(url, source)),
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::Request {
                url: url.to_owned(),
                source,
            })?;
        check_status(url, response.status())?;
        tracker.set_total(response.content_length());
        debug!(content_length = ?tracker.total(), "transfer started");

        tokio::fs::create_dir_all(&request.destination_dir)
            .await
            .map_err(DownloadError::io(&request.destination_dir))?;
        let partial = request.partial_path();
        let file = tokio::fs::File::create(&partial)
            .await
            .map_err(DownloadError::io(&partial))?;
        let mut writer = tokio::io::BufWriter::with_capacity(COPY_CHUNK_SIZE, file);

        let body = StreamReader::new(response.bytes_stream().map_err(io::Error::other));
        tokio::pin!(body);
        let mut buffer = vec![0_u8; COPY_CHUNK_SIZE];
        loop {
            let read = read_chunk_async(&mut body, &mut buffer)
                .await
                .map_err(|source| DownloadError::Stream {
                    url: url.to_owned(),
                    source,
                })?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(DownloadError::io(&partial))?;
            tracker.advance(read);
        }

        writer.flush().await.map_err(DownloadError::io(&partial))?;
        let file = writer.into_inner();
        file.sync_all().await.map_err(DownloadError::io(&partial))?;
        drop(file);

        let destination = request.destination();
        tokio::fs::rename(&partial, &destination)
            .await
            .map_err(DownloadError::io(&destination))?;
        Ok(())
    }
}

/// Fills `buffer` from `reader`, stopping early only at end of body
fn read_chunk<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

async fn read_chunk_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut [u8],
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn unreachable(url: &str, status: StatusCode) -> DownloadError {
    warn!(url, %status, "cannot reach the download URL");
    DownloadError::Unreachable {
        url: url.to_owned(),
        status,
    }
}

fn offline(url: &str, source: reqwest::Error) -> DownloadError {
    warn!(url, error = %source, "no internet connection or host unreachable");
    DownloadError::Offline {
        url: url.to_owned(),
        source,
    }
}

fn check_status(url: &str, status: StatusCode) -> Result<(), DownloadError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(DownloadError::Http {
            url: url.to_owned(),
            status,
        })
    }
}

fn finish_ok<F: FnMut(DownloadState)>(
    request: &DownloadRequest,
    tracker: ProgressTracker<F>,
) -> DownloadReport {
    let bytes_written = tracker.bytes_read();
    let content_length = tracker.total();
    let state = tracker.succeed();
    let path = request.destination();
    info!(
        path = %path.display(),
        bytes = bytes_written,
        "download completed"
    );
    DownloadReport {
        path,
        bytes_written,
        content_length,
        state,
    }
}

fn finish_err<F: FnMut(DownloadState)>(
    tracker: ProgressTracker<F>,
    error: DownloadError,
) -> DownloadError {
    tracker.fail();
    warn!(error = %error, "download failed");
    error
}

fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        log_cleanup_failure(path, &err);
    }
}

fn log_cleanup_failure(path: &Path, err: &io::Error) {
    if err.kind() != io::ErrorKind::NotFound {
        warn!(path = %path.display(), error = %err, "failed to remove partial download");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn create_test_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "piper_speak_download_{label}_{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn assert_non_decreasing(states: &[DownloadState]) {
        for pair in states.windows(2) {
            assert!(pair[0].progress <= pair[1].progress, "{states:?}");
        }
    }

    /// Sends part of a chunked body, then breaks the connection
    fn interrupted_body(w: &mut dyn Write) -> io::Result<()> {
        w.write_all(&[7_u8; 50_000])?;
        w.flush()?;
        // Let the headers and first bytes reach the client before the break
        std::thread::sleep(std::time::Duration::from_millis(200));
        Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "upstream closed",
        ))
    }

    fn progress_steps(states: &[DownloadState]) -> Vec<(bool, u8)> {
        states.iter().map(|s| (s.in_progress, s.progress)).collect()
    }

    /// Started, one step per 80 KiB chunk of a four-chunk body, then succeeded
    const FOUR_CHUNK_STEPS: [(bool, u8); 6] = [
        (true, 0),
        (true, 25),
        (true, 50),
        (true, 75),
        (true, 100),
        (false, 100),
    ];

    #[test]
    fn test_download_with_content_length() {
        let mut server = mockito::Server::new();
        let payload = body(300_000);
        let head = server.mock("HEAD", "/model.onnx").with_status(200).create();
        let get = server
            .mock("GET", "/model.onnx")
            .with_status(200)
            .with_body(&payload)
            .create();

        let dir = create_test_dir("length");
        let request = DownloadRequest::new(format!("{}/model.onnx", server.url()), &dir, "model.onnx");
        let mut states = Vec::new();

        let report = Downloader::new()
            .unwrap()
            .download_file(&request, |state| states.push(state))
            .unwrap();

        head.assert();
        get.assert();
        assert_eq!(report.bytes_written, payload.len() as u64);
        assert_eq!(report.content_length, Some(payload.len() as u64));
        assert_eq!(fs::read(dir.join("model.onnx")).unwrap(), payload);
        assert!(!request.partial_path().exists());

        assert_eq!(states.first(), Some(&DownloadState::started()));
        assert_eq!(states.last(), Some(&DownloadState::succeeded()));
        assert!(states.iter().any(|s| s.in_progress && s.progress == 100));
        assert_non_decreasing(&states);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_download_without_content_length_reports_terminal_only() {
        let mut server = mockito::Server::new();
        let payload = body(200_000);
        let expected = payload.clone();
        server.mock("HEAD", "/voices.json").with_status(200).create();
        server
            .mock("GET", "/voices.json")
            .with_status(200)
            .with_chunked_body(move |w| w.write_all(&payload))
            .create();

        let dir = create_test_dir("chunked");
        let request =
            DownloadRequest::new(format!("{}/voices.json", server.url()), &dir, "voices.json");
        let mut states = Vec::new();

        let report = Downloader::new()
            .unwrap()
            .download_file(&request, |state| states.push(state))
            .unwrap();

        assert_eq!(report.content_length, None);
        assert_eq!(fs::read(&report.path).unwrap(), expected);
        let (last, before) = states.split_last().unwrap();
        assert_eq!(*last, DownloadState::succeeded());
        assert!(before.iter().all(|s| s.progress == 0 && !s.completed));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failed_probe_never_completes() {
        let mut server = mockito::Server::new();
        server.mock("HEAD", "/missing.zip").with_status(404).create();
        let get = server.mock("GET", "/missing.zip").expect(0).create();

        let dir = create_test_dir("probe");
        let request =
            DownloadRequest::new(format!("{}/missing.zip", server.url()), &dir, "missing.zip");
        let mut states = Vec::new();

        let result = Downloader::new()
            .unwrap()
            .download_file(&request, |state| states.push(state));

        assert!(matches!(
            result,
            Err(DownloadError::Unreachable { status, .. }) if status == StatusCode::NOT_FOUND
        ));
        get.assert();
        assert!(states.iter().all(|s| !s.completed));
        assert_eq!(states.last(), Some(&DownloadState::failed()));
        assert!(!dir.join("missing.zip").exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_no_connection_is_offline() {
        let dir = create_test_dir("offline");
        let request = DownloadRequest::new("http://127.0.0.1:9/piper.zip", &dir, "piper.zip");

        let result = Downloader::new().unwrap().download_file(&request, |_| {});

        assert!(matches!(result, Err(DownloadError::Offline { .. })));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_get_error_status_is_failure() {
        let mut server = mockito::Server::new();
        server.mock("HEAD", "/flaky.bin").with_status(200).create();
        server.mock("GET", "/flaky.bin").with_status(503).create();

        let dir = create_test_dir("http");
        let request = DownloadRequest::new(format!("{}/flaky.bin", server.url()), &dir, "flaky.bin");
        let mut last = DownloadState::default();

        let result = Downloader::new()
            .unwrap()
            .download_file(&request, |state| last = state);

        assert!(matches!(result, Err(DownloadError::Http { .. })));
        assert_eq!(last, DownloadState::failed());
        assert!(!request.partial_path().exists());
        assert!(!request.destination().exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_download_creates_destination_directory() {
        let mut server = mockito::Server::new();
        server.mock("HEAD", "/a.json").with_status(200).create();
        server
            .mock("GET", "/a.json")
            .with_status(200)
            .with_body("{}")
            .create();

        let dir = create_test_dir("nested");
        let nested = dir.join("models").join("en");
        let request = DownloadRequest::new(format!("{}/a.json", server.url()), &nested, "a.json");

        let report = Downloader::new()
            .unwrap()
            .download_file(&request, |_| {})
            .unwrap();

        assert_eq!(fs::read_to_string(report.path).unwrap(), "{}");

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_async_download_with_content_length() {
        let mut server = mockito::Server::new_async().await;
        let payload = body(250_000);
        server
            .mock("HEAD", "/model.onnx.json")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", "/model.onnx.json")
            .with_status(200)
            .with_body(&payload)
            .create_async()
            .await;

        let dir = create_test_dir("async");
        let request = DownloadRequest::new(
            format!("{}/model.onnx.json", server.url()),
            &dir,
            "model.onnx.json",
        );
        let mut states = Vec::new();

        let report = Downloader::new()
            .unwrap()
            .download_file_async(&request, |state| states.push(state))
            .await
            .unwrap();

        assert_eq!(report.state, DownloadState::succeeded());
        assert_eq!(tokio::fs::read(&report.path).await.unwrap(), payload);
        assert_eq!(states.last(), Some(&DownloadState::succeeded()));
        assert_non_decreasing(&states);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_async_failed_probe() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/gone")
            .with_status(500)
            .create_async()
            .await;

        let dir = create_test_dir("async_probe");
        let request = DownloadRequest::new(format!("{}/gone", server.url()), &dir, "gone");
        let mut completed = false;

        let result = Downloader::new()
            .unwrap()
            .download_file_async(&request, |state| completed |= state.completed)
            .await;

        assert!(matches!(result, Err(DownloadError::Unreachable { .. })));
        assert!(!completed);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_interrupted_body_removes_partial_file() {
        let mut server = mockito::Server::new();
        server.mock("HEAD", "/piper.zip").with_status(200).create();
        server
            .mock("GET", "/piper.zip")
            .with_status(200)
            .with_chunked_body(interrupted_body)
            .create();

        let dir = create_test_dir("interrupted");
        let request = DownloadRequest::new(format!("{}/piper.zip", server.url()), &dir, "piper.zip");
        let mut states = Vec::new();

        let result = Downloader::new()
            .unwrap()
            .download_file(&request, |state| states.push(state));

        assert!(matches!(result, Err(DownloadError::Stream { .. })), "{result:?}");
        assert!(!request.partial_path().exists());
        assert!(!request.destination().exists());
        assert!(states.iter().all(|s| !s.completed));
        assert_eq!(states.last(), Some(&DownloadState::failed()));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_progress_follows_fixed_chunks() {
        let mut server = mockito::Server::new();
        server.mock("HEAD", "/voice.onnx").with_status(200).create();
        server
            .mock("GET", "/voice.onnx")
            .with_status(200)
            .with_body(body(4 * COPY_CHUNK_SIZE))
            .create();

        let dir = create_test_dir("fixed_chunks");
        let request = DownloadRequest::new(format!("{}/voice.onnx", server.url()), &dir, "voice.onnx");
        let mut states = Vec::new();

        Downloader::new()
            .unwrap()
            .download_file(&request, |state| states.push(state))
            .unwrap();

        assert_eq!(progress_steps(&states), FOUR_CHUNK_STEPS);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_async_interrupted_body_removes_partial_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/voices.json")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", "/voices.json")
            .with_status(200)
            .with_chunked_body(interrupted_body)
            .create_async()
            .await;

        let dir = create_test_dir("async_interrupted");
        let request =
            DownloadRequest::new(format!("{}/voices.json", server.url()), &dir, "voices.json");
        let mut states = Vec::new();

        let result = Downloader::new()
            .unwrap()
            .download_file_async(&request, |state| states.push(state))
            .await;

        assert!(matches!(result, Err(DownloadError::Stream { .. })), "{result:?}");
        assert!(!request.partial_path().exists());
        assert!(!request.destination().exists());
        assert!(states.iter().all(|s| !s.completed));
        assert_eq!(states.last(), Some(&DownloadState::failed()));

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_async_download_without_content_length_reports_terminal_only() {
        let mut server = mockito::Server::new_async().await;
        let payload = body(200_000);
        let expected = payload.clone();
        server
            .mock("HEAD", "/voices.json")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", "/voices.json")
            .with_status(200)
            .with_chunked_body(move |w| w.write_all(&payload))
            .create_async()
            .await;

        let dir = create_test_dir("async_chunked");
        let request =
            DownloadRequest::new(format!("{}/voices.json", server.url()), &dir, "voices.json");
        let mut states = Vec::new();

        let report = Downloader::new()
            .unwrap()
            .download_file_async(&request, |state| states.push(state))
            .await
            .unwrap();

        assert_eq!(report.content_length, None);
        assert_eq!(report.bytes_written, expected.len() as u64);
        assert_eq!(tokio::fs::read(&report.path).await.unwrap(), expected);
        let (last, before) = states.split_last().unwrap();
        assert_eq!(*last, DownloadState::succeeded());
        assert!(before.iter().all(|s| s.progress == 0 && !s.completed));

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_async_progress_follows_fixed_chunks() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/voice.onnx")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", "/voice.onnx")
            .with_status(200)
            .with_body(body(4 * COPY_CHUNK_SIZE))
            .create_async()
            .await;

        let dir = create_test_dir("async_fixed_chunks");
        let request = DownloadRequest::new(format!("{}/voice.onnx", server.url()), &dir, "voice.onnx");
        let mut states = Vec::new();

        Downloader::new()
            .unwrap()
            .download_file_async(&request, |state| states.push(state))
            .await
            .unwrap();

        assert_eq!(progress_steps(&states), FOUR_CHUNK_STEPS);

        let _ = fs::remove_dir_all(&dir);
    }

    /// Log sink shared between the test and the subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_async_download_logs_inside_download_span() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/voices.json")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", "/voices.json")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let dir = create_test_dir("async_span");
        let url = format!("{}/voices.json", server.url());
        let request = DownloadRequest::new(url.clone(), &dir, "voices.json");

        Downloader::new()
            .unwrap()
            .download_file_async(&request, |_| {})
            .await
            .unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains(&format!("download{{url={url}}}")), "{output}");

        let _ = fs::remove_dir_all(&dir);
    }
}
