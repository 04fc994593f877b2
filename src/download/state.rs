use std::path::PathBuf;

/// One file to fetch: where from and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Remote resource
    pub url: String,
    /// Directory receiving the file (created if missing)
    pub destination_dir: PathBuf,
    /// Name of the file inside `destination_dir`
    pub file_name: String,
}

impl DownloadRequest {
    /// Creates a request
    pub fn new(
        url: impl Into<String>,
        destination_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            destination_dir: destination_dir.into(),
            file_name: file_name.into(),
        }
    }

    /// Final location of the downloaded file
    pub fn destination(&self) -> PathBuf {
        self.destination_dir.join(&self.file_name)
    }

    /// Location written during the transfer, renamed onto [`Self::destination`] on success
    pub fn partial_path(&self) -> PathBuf {
        self.destination_dir.join(format!("{}.part", self.file_name))
    }
}

/// Last path segment of a URL, ignoring any query or fragment
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/').next().filter(|segment| !segment.is_empty())
}

/// Observable progress of a single transfer
///
/// `completed` and `in_progress` are never both set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadState {
    /// Transfer running
    pub in_progress: bool,
    /// Transfer finished and the file is in place
    pub completed: bool,
    /// Percentage 0..=100
    pub progress: u8,
}

impl DownloadState {
    /// State right after a transfer starts
    pub const fn started() -> Self {
        Self {
            in_progress: true,
            completed: false,
            progress: 0,
        }
    }

    /// Terminal success state
    pub const fn succeeded() -> Self {
        Self {
            in_progress: false,
            completed: true,
            progress: 100,
        }
    }

    /// Terminal failure state
    pub const fn failed() -> Self {
        Self {
            in_progress: false,
            completed: false,
            progress: 0,
        }
    }

    /// `read * 100 / total` with integer division, capped at 100
    pub fn percent(read: u64, total: u64) -> u8 {
        if total == 0 {
            return 0;
        }
        let percent = (u128::from(read) * 100 / u128::from(total)).min(100);
        u8::try_from(percent).unwrap_or(100)
    }
}

/// Feeds state changes of one transfer to its observer
pub(crate) struct ProgressTracker<F> {
    state: DownloadState,
    total: Option<u64>,
    read: u64,
    observer: F,
}

impl<F: FnMut(DownloadState)> ProgressTracker<F> {
    pub(crate) fn start(mut observer: F) -> Self {
        let state = DownloadState::started();
        observer(state);
        Self {
            state,
            total: None,
            read: 0,
            observer,
        }
    }

    /// Declared content length; zero is treated as unknown
    pub(crate) fn set_total(&mut self, total: Option<u64>) {
        self.total = total.filter(|&len| len > 0);
    }

    pub(crate) const fn total(&self) -> Option<u64> {
        self.total
    }

    pub(crate) const fn bytes_read(&self) -> u64 {
        self.read
    }

    pub(crate) fn advance(&mut self, bytes: usize) {
        self.read = self.read.saturating_add(bytes as u64);
        let Some(total) = self.total else {
            return;
        };
        let percent = DownloadState::percent(self.read, total);
        if percent > self.state.progress {
            self.state.progress = percent;
            (self.observer)(self.state);
        }
    }

    pub(crate) fn succeed(mut self) -> DownloadState {
        self.state = DownloadState::succeeded();
        (self.observer)(self.state);
        self.state
    }

    pub(crate) fn fail(mut self) -> DownloadState {
        self.state = DownloadState::failed();
        (self.observer)(self.state);
        self.state
    }
}
