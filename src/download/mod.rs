/// HTTP transfer to disk
pub mod downloader;
/// Requests and progress state
pub mod state;

pub use downloader::{DownloadError, DownloadReport, Downloader, COPY_CHUNK_SIZE};
pub use state::{file_name_from_url, DownloadRequest, DownloadState};
