use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{SettingKey, Settings};
use crate::download::{file_name_from_url, DownloadRequest, DownloadState, Downloader};
use crate::voices::{file_url, VoiceCatalog};

/// File name of the engine executable on this platform
pub const ENGINE_FILE_NAME: &str = if cfg!(windows) { "piper.exe" } else { "piper" };

const VOICES_FILE: &str = "voices.json";

/// Operating systems named in engine release file names
const RELEASE_PLATFORMS: [&str; 3] = ["windows", "linux", "macos"];

/// Engine archive formats that can be unpacked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// `.zip`
    Zip,
    /// `.tar.gz` or `.tgz`
    TarGz,
}

impl ArchiveKind {
    /// Format named by a file name's extension
    pub fn from_file_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// Operating system other than `os` that a release file name is built for
pub fn foreign_platform(archive_name: &str, os: &str) -> Option<&'static str> {
    let name = archive_name.to_ascii_lowercase();
    RELEASE_PLATFORMS
        .into_iter()
        .find(|platform| *platform != os && name.contains(platform))
}

/// Where the engine lives inside its install directory
pub fn engine_executable(piper_dir: &Path) -> PathBuf {
    piper_dir.join("piper").join(ENGINE_FILE_NAME)
}

/// Logs progress of a named download in 10% steps
fn log_progress(label: &'static str) -> impl FnMut(DownloadState) + Send {
    let mut last_logged = 0;
    move |state: DownloadState| {
        if state.in_progress && state.progress >= last_logged + 10 {
            last_logged = state.progress - state.progress % 10;
            info!(asset = label, progress = state.progress, "downloading");
        }
    }
}

/// Ensures the engine is installed, downloading and unpacking it if missing
///
/// Returns the engine executable path.
///
/// # Errors
/// Returns error if the archive format is unknown or built for another
/// platform (both checked before downloading), the download fails, or the
/// archive does not contain the engine
pub async fn ensure_engine(settings: &Settings, downloader: &Downloader) -> Result<PathBuf> {
    let piper_dir = settings.piper_dir()?;
    let executable = engine_executable(&piper_dir);
    if executable.is_file() {
        debug!(path = %executable.display(), "engine already installed");
        return Ok(executable);
    }

    let url = settings.piper_download_url();
    let archive_name = file_name_from_url(&url)
        .with_context(|| format!("engine URL has no file name: {url}"))?
        .to_owned();
    let kind = ArchiveKind::from_file_name(&archive_name).with_context(|| {
        format!("unsupported engine archive '{archive_name}': expected .zip or .tar.gz")
    })?;
    let os = std::env::consts::OS;
    if let Some(platform) = foreign_platform(&archive_name, os) {
        bail!(
            "engine archive '{archive_name}' is built for {platform}, not {os}; \
             set {} to a {os} release",
            SettingKey::PiperDownloadUrl
        );
    }

    info!(url = %url, path = %executable.display(), "engine not found, downloading");
    let request = DownloadRequest::new(url, &piper_dir, archive_name);
    let report = downloader
        .download_file_async(&request, log_progress("engine"))
        .await
        .context("failed to download Piper")?;

    let archive = report.path;
    let destination = piper_dir.clone();
    let archive_for_task = archive.clone();
    let entries = tokio::task::spawn_blocking(move || match kind {
        ArchiveKind::Zip => extract_zip(&archive_for_task, &destination),
        ArchiveKind::TarGz => extract_tar_gz(&archive_for_task, &destination),
    })
    .await
    .context("extraction task failed")??;
    tokio::fs::remove_file(&archive)
        .await
        .with_context(|| format!("failed to delete {}", archive.display()))?;
    info!(entries, dir = %piper_dir.display(), "engine extracted");

    if !executable.is_file() {
        bail!(
            "engine archive did not contain {}",
            executable.display()
        );
    }
    Ok(executable)
}

/// Unpacks a zip archive into `destination`, overwriting existing files
///
/// Returns the number of entries in the archive.
///
/// # Errors
/// Returns error if the file is not a zip archive or cannot be extracted
pub fn extract_zip(archive: &Path, destination: &Path) -> Result<usize> {
    if !is_zip(archive) {
        bail!("not a zip archive: {}", archive.display());
    }
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("failed to read zip archive {}", archive.display()))?;
    let entries = zip.len();
    fs::create_dir_all(destination).context("failed to create extraction directory")?;
    zip.extract(destination)
        .with_context(|| format!("failed to extract {}", archive.display()))?;
    Ok(entries)
}

/// Unpacks a gzip-compressed tar archive into `destination`
///
/// Returns the number of entries unpacked. Entries that would land outside
/// `destination` are skipped.
///
/// # Errors
/// Returns error if the file cannot be opened, decompressed or unpacked
pub fn extract_tar_gz(archive: &Path, destination: &Path) -> Result<usize> {
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive {}", archive.display()))?;
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
    fs::create_dir_all(destination).context("failed to create extraction directory")?;

    let mut entries = 0;
    for entry in tar
        .entries()
        .with_context(|| format!("failed to read tar archive {}", archive.display()))?
    {
        let mut entry =
            entry.with_context(|| format!("corrupt entry in {}", archive.display()))?;
        if entry
            .unpack_in(destination)
            .with_context(|| format!("failed to extract {}", archive.display()))?
        {
            entries += 1;
        } else {
            debug!(path = ?entry.path().ok(), "skipped entry outside destination");
        }
    }
    Ok(entries)
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Loads the voice metadata document, downloading it first if missing
///
/// # Errors
/// Returns error if the download fails or the document is empty or malformed
pub async fn ensure_voice_catalog(
    settings: &Settings,
    downloader: &Downloader,
) -> Result<VoiceCatalog> {
    let path = settings.paths().voices_catalog_path();
    if !path.exists() {
        let url = settings.voices_download_url();
        info!(url = %url, "voice data not found, downloading");
        let dir = path
            .parent()
            .map_or_else(|| settings.paths().app_data_dir.clone(), Path::to_path_buf);
        let request = DownloadRequest::new(url, dir, VOICES_FILE);
        downloader
            .download_file_async(&request, log_progress("voices"))
            .await
            .context("failed to download voice data")?;
    }

    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let catalog = VoiceCatalog::from_json_str(&contents)
        .with_context(|| format!("failed to load voice data from {}", path.display()))?;
    info!(voices = catalog.len(), "voice data loaded");
    Ok(catalog)
}

/// Downloads any missing file of a voice and returns the local model path
///
/// # Errors
/// Returns error if the voice is unknown or a download fails
pub async fn ensure_voice_model(
    settings: &Settings,
    downloader: &Downloader,
    catalog: &VoiceCatalog,
    key: &str,
) -> Result<PathBuf> {
    let files = catalog.model_files(key)?;
    let models_dir = settings.models_dir()?;
    let base_url = settings.voices_base_url();

    for relative in files.paths() {
        let name = file_name_from_url(relative)
            .with_context(|| format!("voice file has no name: {relative}"))?;
        let local = models_dir.join(name);
        if local.is_file() {
            debug!(path = %local.display(), "voice file already present");
            continue;
        }
        let request = DownloadRequest::new(file_url(&base_url, relative), &models_dir, name);
        downloader
            .download_file_async(&request, log_progress("voice model"))
            .await
            .with_context(|| format!("failed to download {name}"))?;
    }

    let model_name = file_name_from_url(&files.model)
        .with_context(|| format!("voice file has no name: {}", files.model))?;
    Ok(models_dir.join(model_name))
}

/// `*.onnx` files of a custom voice directory, sorted by name
///
/// A missing directory has no voices.
///
/// # Errors
/// Returns error if the directory exists but cannot be listed
pub fn list_custom_voices(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut voices: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        })
        .collect();
    voices.sort();
    Ok(voices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_executable_layout() {
        let exe = engine_executable(Path::new("/data"));
        assert_eq!(exe, Path::new("/data").join("piper").join(ENGINE_FILE_NAME));
    }

    #[test]
    fn test_extract_zip_rejects_other_extension() {
        let result = extract_zip(Path::new("/tmp/piper_linux_x86_64.7z"), Path::new("/tmp"));
        assert!(result.is_err());
    }

    #[test]
    fn test_archive_kind_from_file_name() {
        assert_eq!(ArchiveKind::from_file_name("piper_windows_amd64.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_file_name("PIPER.ZIP"), Some(ArchiveKind::Zip));
        assert_eq!(
            ArchiveKind::from_file_name("piper_linux_x86_64.tar.gz"),
            Some(ArchiveKind::TarGz)
        );
        assert_eq!(ArchiveKind::from_file_name("piper.tgz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_file_name("piper_linux_x86_64.tar.bz2"), None);
        assert_eq!(ArchiveKind::from_file_name("piper"), None);
    }

    #[test]
    fn test_foreign_platform() {
        assert_eq!(foreign_platform("piper_windows_amd64.zip", "linux"), Some("windows"));
        assert_eq!(foreign_platform("piper_windows_amd64.zip", "windows"), None);
        assert_eq!(foreign_platform("piper_linux_x86_64.tar.gz", "macos"), Some("linux"));
        assert_eq!(foreign_platform("piper_macos_aarch64.tar.gz", "macos"), None);
        // Names without a platform are trusted
        assert_eq!(foreign_platform("piper_test.zip", "linux"), None);
    }

    #[cfg(any(windows, target_os = "linux", target_os = "macos"))]
    #[test]
    fn test_default_engine_url_fits_this_platform() {
        let name = file_name_from_url(crate::config::PIPER_DOWNLOAD_URL).unwrap();
        assert!(ArchiveKind::from_file_name(name).is_some());
        assert_eq!(foreign_platform(name, std::env::consts::OS), None);
    }

    #[test]
    fn test_extract_tar_gz() {
        let dir = std::env::temp_dir().join("piper_speak_assets_tar_gz");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let files: [(&str, &[u8]); 2] = [
            ("piper/piper", b"#!/bin/sh\n"),
            ("piper/espeak-ng-data/phontab", b"x"),
        ];
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        }
        let archive = dir.join("piper_linux_x86_64.tar.gz");
        fs::write(&archive, builder.into_inner().unwrap().finish().unwrap()).unwrap();

        let entries = extract_tar_gz(&archive, &dir).unwrap();

        assert_eq!(entries, 2);
        assert_eq!(fs::read(dir.join("piper").join("piper")).unwrap(), b"#!/bin/sh\n");
        assert!(dir.join("piper").join("espeak-ng-data").join("phontab").is_file());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.join("piper").join("piper")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }

        let _ = fs::remove_dir_all(&dir);
    }
}
