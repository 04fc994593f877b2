use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default location of the voice metadata document
pub const VOICES_DOWNLOAD_URL: &str =
    "https://huggingface.co/rhasspy/piper-voices/resolve/main/voices.json";
/// Default prefix for the relative paths listed under a voice's `files`
pub const VOICES_BASE_URL: &str = "https://huggingface.co/rhasspy/piper-voices/resolve/main";
/// Default engine distributable for this platform
#[cfg(windows)]
pub const PIPER_DOWNLOAD_URL: &str =
    "https://github.com/rhasspy/piper/releases/download/2023.11.14-2/piper_windows_amd64.zip";
/// Default engine distributable for this platform
#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
pub const PIPER_DOWNLOAD_URL: &str =
    "https://github.com/rhasspy/piper/releases/download/2023.11.14-2/piper_macos_aarch64.tar.gz";
/// Default engine distributable for this platform
#[cfg(all(target_os = "macos", not(target_arch = "aarch64")))]
pub const PIPER_DOWNLOAD_URL: &str =
    "https://github.com/rhasspy/piper/releases/download/2023.11.14-2/piper_macos_x64.tar.gz";
/// Default engine distributable for this platform
#[cfg(all(not(any(windows, target_os = "macos")), target_arch = "aarch64"))]
pub const PIPER_DOWNLOAD_URL: &str =
    "https://github.com/rhasspy/piper/releases/download/2023.11.14-2/piper_linux_aarch64.tar.gz";
/// Default engine distributable for this platform
#[cfg(all(not(any(windows, target_os = "macos")), target_arch = "arm"))]
pub const PIPER_DOWNLOAD_URL: &str =
    "https://github.com/rhasspy/piper/releases/download/2023.11.14-2/piper_linux_armv7l.tar.gz";
/// Default engine distributable for this platform
#[cfg(all(
    not(any(windows, target_os = "macos")),
    not(any(target_arch = "aarch64", target_arch = "arm"))
))]
pub const PIPER_DOWNLOAD_URL: &str =
    "https://github.com/rhasspy/piper/releases/download/2023.11.14-2/piper_linux_x86_64.tar.gz";

const APP_DIR_NAME: &str = ".piper-speak";
const APP_CONFIG_FILE: &str = "appconfig.json";
const USER_CONFIG_FILE: &str = "userconfig.json";
const VOICES_FILE: &str = "voices.json";
const DEFAULT_THEME: &str = "Dark";

/// On-disk layout of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Engine install, metadata document, downloaded models and both config documents
    pub app_data_dir: PathBuf,
    /// User-writable files: custom voices and generated audio
    pub user_files_dir: PathBuf,
}

impl AppPaths {
    /// Layout under ~/.piper-speak
    ///
    /// # Errors
    /// Returns error if no home directory can be determined
    pub fn from_home() -> Result<Self> {
        Ok(Self::rooted(home_dir()?.join(APP_DIR_NAME)))
    }

    /// Layout rooted at an explicit directory
    pub fn rooted(dir: impl Into<PathBuf>) -> Self {
        let app_data_dir = dir.into();
        let user_files_dir = app_data_dir.join("files");
        Self {
            app_data_dir,
            user_files_dir,
        }
    }

    /// Path of the application-scoped document
    pub fn application_config_path(&self) -> PathBuf {
        self.app_data_dir.join(APP_CONFIG_FILE)
    }

    /// Path of the user-scoped document
    pub fn user_config_path(&self) -> PathBuf {
        self.app_data_dir.join(USER_CONFIG_FILE)
    }

    /// Local copy of the voice metadata document
    pub fn voices_catalog_path(&self) -> PathBuf {
        self.app_data_dir.join(VOICES_FILE)
    }

    fn default_models_dir(&self) -> PathBuf {
        self.app_data_dir.join("models")
    }

    fn default_custom_voices_dir(&self) -> PathBuf {
        self.user_files_dir.join("CustomVoices")
    }

    fn default_output_dir(&self) -> PathBuf {
        self.user_files_dir.join("Output")
    }
}

/// Which configuration document a setting lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// appconfig.json
    Application,
    /// userconfig.json
    User,
}

/// Every setting the application reads, mapped to its document and key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    /// URL of the voice metadata document
    VoicesDownloadUrl,
    /// Base URL for voice model files
    VoicesBaseUrl,
    /// URL of the engine archive
    PiperDownloadUrl,
    /// Where downloaded voice models are stored
    ModelsDirectory,
    /// Where the engine is installed
    PiperDirectory,
    /// UI theme name
    Theme,
    /// Directory scanned for user-provided `*.onnx` voices
    CustomVoicesDirectory,
    /// Directory receiving generated audio
    OutputDirectory,
}

impl SettingKey {
    /// All settings, application scope first
    pub const ALL: [Self; 8] = [
        Self::VoicesDownloadUrl,
        Self::VoicesBaseUrl,
        Self::PiperDownloadUrl,
        Self::ModelsDirectory,
        Self::PiperDirectory,
        Self::Theme,
        Self::CustomVoicesDirectory,
        Self::OutputDirectory,
    ];

    /// Key used inside the JSON document
    pub const fn json_key(self) -> &'static str {
        match self {
            Self::VoicesDownloadUrl => "VoicesDownloadUrl",
            Self::VoicesBaseUrl => "VoicesBaseUrl",
            Self::PiperDownloadUrl => "PiperDownloadUrl",
            Self::ModelsDirectory => "ModelsDirectory",
            Self::PiperDirectory => "PiperDirectory",
            Self::Theme => "Theme",
            Self::CustomVoicesDirectory => "CustomVoicesDirectory",
            Self::OutputDirectory => "OutputDirectory",
        }
    }

    /// Document holding this setting
    pub const fn scope(self) -> Scope {
        match self {
            Self::VoicesDownloadUrl
            | Self::VoicesBaseUrl
            | Self::PiperDownloadUrl
            | Self::ModelsDirectory
            | Self::PiperDirectory => Scope::Application,
            Self::Theme | Self::CustomVoicesDirectory | Self::OutputDirectory => Scope::User,
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_key())
    }
}

impl FromStr for SettingKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        Self::ALL
            .into_iter()
            .find(|key| key.json_key().to_lowercase() == wanted)
            .with_context(|| format!("unknown setting '{s}'"))
    }
}

/// A JSON configuration document read by key lookup
///
/// The schema is never validated: unknown keys are preserved and missing
/// keys fall back to the caller's default.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    path: PathBuf,
    values: Map<String, Value>,
}

impl ConfigDocument {
    /// Load the document, writing `defaults` first if the file does not exist
    ///
    /// # Errors
    /// Returns error if the file cannot be written, read or parsed
    pub fn load_or_create(path: &Path, defaults: Map<String, Value>) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "creating default configuration");
            Self {
                path: path.to_path_buf(),
                values: defaults,
            }
            .save()
            .context("failed to create default config")?;
        }
        Self::load(path)
    }

    /// Load an existing document
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not a JSON object
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config JSON {}", path.display()))?;
        let Value::Object(values) = value else {
            bail!("config file {} is not a JSON object", path.display());
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    /// String value of `key`, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// String value of `key`, or `default` when absent
    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or(default).to_owned()
    }

    /// Set a string value (in memory until [`Self::save`])
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_owned(), Value::String(value.into()));
    }

    /// All values in document order
    pub const fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Write the document back as indented JSON
    ///
    /// # Errors
    /// Returns error if serialization or the write fails
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let json = serde_json::to_string_pretty(&self.values)
            .context("failed to serialize config")?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write config file {}", self.path.display()))?;
        Ok(())
    }
}

/// Both configuration documents plus the directory layout they default against
#[derive(Debug, Clone)]
pub struct Settings {
    paths: AppPaths,
    application: ConfigDocument,
    user: ConfigDocument,
}

impl Settings {
    /// Create standard directories and load (or create) both documents
    ///
    /// # Errors
    /// Returns error if a directory or document cannot be created or read
    pub fn load(paths: AppPaths) -> Result<Self> {
        for dir in [
            &paths.app_data_dir,
            &paths.user_files_dir,
            &paths.default_custom_voices_dir(),
            &paths.default_output_dir(),
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }

        let application = ConfigDocument::load_or_create(
            &paths.application_config_path(),
            defaults_for(&paths, Scope::Application),
        )?;
        let user =
            ConfigDocument::load_or_create(&paths.user_config_path(), defaults_for(&paths, Scope::User))?;

        tracing::debug!(
            app_data = %paths.app_data_dir.display(),
            user_files = %paths.user_files_dir.display(),
            "configuration loaded"
        );

        Ok(Self {
            paths,
            application,
            user,
        })
    }

    /// Directory layout
    pub const fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Current value of a setting, falling back to its default
    pub fn get(&self, key: SettingKey) -> String {
        self.document(key.scope())
            .string_or(key.json_key(), &default_value(&self.paths, key))
    }

    /// Change a setting in memory
    pub fn set(&mut self, key: SettingKey, value: impl Into<String>) {
        let document = match key.scope() {
            Scope::Application => &mut self.application,
            Scope::User => &mut self.user,
        };
        document.set(key.json_key(), value);
    }

    /// Persist both documents
    ///
    /// # Errors
    /// Returns error if either write fails
    pub fn save(&self) -> Result<()> {
        self.application.save()?;
        self.user.save()
    }

    /// Document for a scope
    pub const fn document(&self, scope: Scope) -> &ConfigDocument {
        match scope {
            Scope::Application => &self.application,
            Scope::User => &self.user,
        }
    }

    /// URL of the voice metadata document
    pub fn voices_download_url(&self) -> String {
        self.get(SettingKey::VoicesDownloadUrl)
    }

    /// Base URL for voice model files
    pub fn voices_base_url(&self) -> String {
        self.get(SettingKey::VoicesBaseUrl)
    }

    /// URL of the engine archive
    pub fn piper_download_url(&self) -> String {
        self.get(SettingKey::PiperDownloadUrl)
    }

    /// Downloaded voice models
    ///
    /// # Errors
    /// Returns error if a `~/` path cannot be expanded
    pub fn models_dir(&self) -> Result<PathBuf> {
        expand_path(&self.get(SettingKey::ModelsDirectory))
    }

    /// Engine installation root
    ///
    /// # Errors
    /// Returns error if a `~/` path cannot be expanded
    pub fn piper_dir(&self) -> Result<PathBuf> {
        expand_path(&self.get(SettingKey::PiperDirectory))
    }

    /// User-provided voices
    ///
    /// # Errors
    /// Returns error if a `~/` path cannot be expanded
    pub fn custom_voices_dir(&self) -> Result<PathBuf> {
        expand_path(&self.get(SettingKey::CustomVoicesDirectory))
    }

    /// Generated audio
    ///
    /// # Errors
    /// Returns error if a `~/` path cannot be expanded
    pub fn output_dir(&self) -> Result<PathBuf> {
        expand_path(&self.get(SettingKey::OutputDirectory))
    }
}

fn default_value(paths: &AppPaths, key: SettingKey) -> String {
    match key {
        SettingKey::VoicesDownloadUrl => VOICES_DOWNLOAD_URL.to_owned(),
        SettingKey::VoicesBaseUrl => VOICES_BASE_URL.to_owned(),
        SettingKey::PiperDownloadUrl => PIPER_DOWNLOAD_URL.to_owned(),
        SettingKey::ModelsDirectory => paths.default_models_dir().display().to_string(),
        SettingKey::PiperDirectory => paths.app_data_dir.display().to_string(),
        SettingKey::Theme => DEFAULT_THEME.to_owned(),
        SettingKey::CustomVoicesDirectory => paths.default_custom_voices_dir().display().to_string(),
        SettingKey::OutputDirectory => paths.default_output_dir().display().to_string(),
    }
}

fn defaults_for(paths: &AppPaths, scope: Scope) -> Map<String, Value> {
    SettingKey::ALL
        .into_iter()
        .filter(|key| key.scope() == scope)
        .map(|key| (key.json_key().to_owned(), Value::String(default_value(paths, key))))
        .collect()
}

/// Home directory (`HOME`, or `USERPROFILE` on Windows)
///
/// # Errors
/// Returns error if neither variable is set
pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .context("HOME environment variable not set")
}

/// Expand ~ in paths to home directory
///
/// # Errors
/// Returns error if the path starts with `~/` and no home directory is known
pub fn expand_path(path: &str) -> Result<PathBuf> {
    if let Some(stripped) = path.strip_prefix("~/") {
        Ok(home_dir()?.join(stripped))
    } else {
        Ok(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn create_test_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "piper_speak_config_{label}_{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_creates_documents_with_defaults() {
        let dir = create_test_dir("defaults");
        let paths = AppPaths::rooted(&dir);

        let settings = Settings::load(paths.clone()).unwrap();

        assert!(paths.application_config_path().exists());
        assert!(paths.user_config_path().exists());
        assert!(dir.join("files").join("CustomVoices").is_dir());
        assert!(dir.join("files").join("Output").is_dir());
        assert_eq!(settings.voices_download_url(), VOICES_DOWNLOAD_URL);
        assert_eq!(settings.get(SettingKey::Theme), "Dark");
        assert_eq!(settings.models_dir().unwrap(), dir.join("models"));

        let app_doc = ConfigDocument::load(&paths.application_config_path()).unwrap();
        assert_eq!(app_doc.get_str("PiperDownloadUrl"), Some(PIPER_DOWNLOAD_URL));
        assert!(app_doc.get_str("Theme").is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_key_falls_back_to_default() {
        let dir = create_test_dir("fallback");
        let paths = AppPaths::rooted(&dir);
        fs::write(paths.application_config_path(), r#"{"Unrelated": 3}"#).unwrap();

        let settings = Settings::load(paths).unwrap();

        assert_eq!(settings.piper_download_url(), PIPER_DOWNLOAD_URL);
        assert_eq!(settings.piper_dir().unwrap(), dir);
        assert_eq!(
            settings.document(Scope::Application).values().get("Unrelated"),
            Some(&Value::from(3))
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_set_and_save_persists() {
        let dir = create_test_dir("persist");
        let paths = AppPaths::rooted(&dir);

        let mut settings = Settings::load(paths.clone()).unwrap();
        settings.set(SettingKey::Theme, "Light");
        settings.set(SettingKey::PiperDownloadUrl, "http://localhost/piper.zip");
        settings.save().unwrap();

        let reloaded = Settings::load(paths).unwrap();
        assert_eq!(reloaded.get(SettingKey::Theme), "Light");
        assert_eq!(reloaded.piper_download_url(), "http://localhost/piper.zip");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_non_object_document_rejected() {
        let dir = create_test_dir("array");
        let path = dir.join("appconfig.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let result = ConfigDocument::load(&path);
        assert!(result.is_err());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_setting_key_parsing() {
        assert_eq!(
            "OutputDirectory".parse::<SettingKey>().unwrap(),
            SettingKey::OutputDirectory
        );
        assert_eq!(
            "output-directory".parse::<SettingKey>().unwrap(),
            SettingKey::OutputDirectory
        );
        assert_eq!("theme".parse::<SettingKey>().unwrap(), SettingKey::Theme);
        assert!("volume".parse::<SettingKey>().is_err());
    }

    #[test]
    fn test_setting_scopes() {
        assert_eq!(SettingKey::PiperDirectory.scope(), Scope::Application);
        assert_eq!(SettingKey::OutputDirectory.scope(), Scope::User);
        for key in SettingKey::ALL {
            assert_eq!(key.to_string(), key.json_key());
        }
    }

    #[test]
    fn test_expand_path_without_tilde() {
        assert_eq!(
            expand_path("/var/lib/piper").unwrap(),
            PathBuf::from("/var/lib/piper")
        );
    }
}
