use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors reading the voice metadata document
#[derive(Debug, Error)]
pub enum CatalogError {
    /// File could not be read
    #[error("failed to read voice data {path}: {source}")]
    Io {
        /// Document path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Document is not a JSON object
    #[error("voice data is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Document holds no voices
    #[error("voice data is empty")]
    Empty,

    /// An entry lacks a required field
    #[error("voice entry '{key}' is malformed: {source}")]
    Shape {
        /// Voice key of the entry
        key: String,
        /// Deserialization error
        source: serde_json::Error,
    },

    /// No entry with this key
    #[error("voice '{0}' not found")]
    UnknownVoice(String),

    /// Entry lists no `.onnx` model
    #[error("voice '{0}' has no model file")]
    NoModelFile(String),
}

/// Language block of a voice entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceLanguage {
    /// Language name in that language, used for selection
    pub name_native: String,
    /// Locale code such as `en_US`
    #[serde(default)]
    pub code: Option<String>,
    /// English language name
    #[serde(default)]
    pub name_english: Option<String>,
}

/// A downloadable file of a voice
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceFile {
    /// Size in bytes
    #[serde(default)]
    pub size_bytes: u64,
    /// MD5 of the file contents
    #[serde(default)]
    pub md5_digest: Option<String>,
}

/// One voice of the metadata document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceEntry {
    /// Voice name, shared by all qualities of the voice
    pub name: String,
    /// Language of the voice
    pub language: VoiceLanguage,
    /// Quality tier (`x_low`, `low`, `medium`, `high`)
    #[serde(default)]
    pub quality: Option<String>,
    /// Number of speakers in the model
    #[serde(default)]
    pub num_speakers: Option<u32>,
    /// Files keyed by their path relative to the voices base URL
    #[serde(default)]
    pub files: BTreeMap<String, VoiceFile>,
}

/// Files needed to run a voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    /// Relative path of the `.onnx` model
    pub model: String,
    /// Relative path of the `.onnx.json` model config, if listed
    pub config: Option<String>,
}

impl ModelFiles {
    /// Both paths, model first
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.model.as_str()).chain(self.config.as_deref())
    }
}

/// The voice metadata document, in document order
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    entries: Vec<(String, VoiceEntry)>,
}

impl VoiceCatalog {
    /// Reads and parses a metadata document
    ///
    /// # Errors
    /// Returns error if the file cannot be read, is empty or is malformed
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&contents)?;
        debug!(path = %path.display(), voices = catalog.len(), "voice data loaded");
        Ok(catalog)
    }

    /// Parses a metadata document
    ///
    /// # Errors
    /// Returns error if the text is empty, not a JSON object, or an entry is malformed
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        if json.trim().is_empty() {
            return Err(CatalogError::Empty);
        }
        let document: Map<String, Value> = serde_json::from_str(json)?;
        if document.is_empty() {
            return Err(CatalogError::Empty);
        }

        let entries = document
            .into_iter()
            .map(|(key, value)| {
                serde_json::from_value::<VoiceEntry>(value)
                    .map(|entry| (key.clone(), entry))
                    .map_err(|source| CatalogError::Shape { key, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { entries })
    }

    /// Number of voices
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no voices are listed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a voice key
    pub fn get(&self, key: &str) -> Option<&VoiceEntry> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, entry)| entry)
    }

    /// Distinct native language names in first-appearance order
    pub fn languages(&self) -> Vec<&str> {
        distinct(
            self.entries
                .iter()
                .map(|(_, entry)| entry.language.name_native.as_str()),
        )
    }

    /// Distinct voice names of a language
    pub fn voices(&self, language: &str) -> Vec<&str> {
        distinct(
            self.entries
                .iter()
                .filter(|(_, entry)| entry.language.name_native == language)
                .map(|(_, entry)| entry.name.as_str()),
        )
    }

    /// Distinct non-blank qualities of every entry named `voice`, in any language
    pub fn qualities(&self, voice: &str) -> Vec<&str> {
        distinct(
            self.entries
                .iter()
                .filter(|(_, entry)| entry.name == voice)
                .filter_map(|(_, entry)| entry.quality.as_deref())
                .filter(|quality| !quality.trim().is_empty()),
        )
    }

    /// First key containing `"{voice}-{quality}"`
    ///
    /// This is a substring scan, not an exact match: with voices `amy` and
    /// `lamy`, `amy-low` matches whichever key comes first.
    pub fn resolve_key(&self, voice: &str, quality: &str) -> Option<&str> {
        let needle = format!("{voice}-{quality}");
        self.entries
            .iter()
            .map(|(key, _)| key.as_str())
            .find(|key| key.contains(&needle))
    }

    /// Model and model-config paths of a voice
    ///
    /// # Errors
    /// Returns error if the key is unknown or lists no `.onnx` file
    pub fn model_files(&self, key: &str) -> Result<ModelFiles, CatalogError> {
        let entry = self
            .get(key)
            .ok_or_else(|| CatalogError::UnknownVoice(key.to_owned()))?;
        let model = entry
            .files
            .keys()
            .find(|path| path.ends_with(".onnx"))
            .cloned()
            .ok_or_else(|| CatalogError::NoModelFile(key.to_owned()))?;
        let config = entry
            .files
            .keys()
            .find(|path| path.ends_with(".onnx.json"))
            .cloned();
        Ok(ModelFiles { model, config })
    }
}

/// Joins the voices base URL and a relative file path
pub fn file_url(base_url: &str, relative_path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        relative_path.trim_start_matches('/')
    )
}

fn distinct<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}
