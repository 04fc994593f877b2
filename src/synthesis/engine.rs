use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn, Instrument};

use super::output::next_output_path;
use super::prompt::sanitize_prompt;
use crate::audio::AudioPlayer;

/// Pause between engine exit and playback so the output handle is released
pub const SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Errors that can occur during synthesis
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Nothing left to speak after sanitizing
    #[error("prompt is empty")]
    EmptyPrompt,

    /// Speed is not a positive finite number
    #[error("invalid playback speed {0}: must be a positive number")]
    InvalidSpeed(f64),

    /// Model file does not exist
    #[error("model file not found: {0}")]
    MissingModel(PathBuf),

    /// Output directory could not be prepared
    #[error("output directory error at {path}: {source}")]
    Io {
        /// Output directory
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Engine process could not be started
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// Engine executable
        program: PathBuf,
        /// Spawn error
        source: io::Error,
    },

    /// Engine exited unsuccessfully
    #[error("engine failed with {status}: {stderr}")]
    EngineFailed {
        /// Exit status
        status: ExitStatus,
        /// Captured standard error, trimmed
        stderr: String,
    },

    /// Engine reported success without writing the output file
    #[error("engine produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Parameters of one synthesis run
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Directory holding the voice model
    pub model_dir: PathBuf,
    /// `.onnx` file name inside `model_dir`
    pub model_file_name: String,
    /// Text to speak, sanitized before use
    pub prompt: String,
    /// Engine length scale: 1.0 is normal, lower is faster
    pub speed: f64,
    /// Directory receiving the numbered output file
    pub output_dir: PathBuf,
}

impl SynthesisRequest {
    /// Full path of the model
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_file_name)
    }
}

/// What happened after the audio was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// Played to completion
    Played,
    /// No player configured
    Skipped,
    /// Playback failed; the audio file is still in place
    Failed(String),
}

/// Outcome of a successful synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisReport {
    /// Written audio file
    pub output_file: PathBuf,
    /// Playback result
    pub playback: PlaybackStatus,
}

/// Arguments passed to the engine; the prompt goes to stdin, never here
pub fn engine_args(model: &Path, speed: f64, output_file: &Path) -> Vec<OsString> {
    vec![
        OsString::from("--model"),
        model.as_os_str().to_owned(),
        OsString::from("--length_scale"),
        OsString::from(format!("{speed:.2}")),
        OsString::from("--output_file"),
        output_file.as_os_str().to_owned(),
    ]
}

/// Runs the external engine and plays its output
pub struct Synthesizer {
    engine_path: PathBuf,
    player: Option<Arc<dyn AudioPlayer>>,
    settle_delay: Duration,
}

impl Synthesizer {
    /// Synthesizer that plays each result through `player`
    pub fn new(engine_path: impl Into<PathBuf>, player: Arc<dyn AudioPlayer>) -> Self {
        Self {
            engine_path: engine_path.into(),
            player: Some(player),
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Synthesizer that only writes files
    pub fn without_playback(engine_path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: engine_path.into(),
            player: None,
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Overrides the pause before playback
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Engine executable
    pub fn engine_path(&self) -> &Path {
        &self.engine_path
    }

    /// Synthesizes `request` into the next numbered file, then plays it
    ///
    /// # Errors
    /// Returns error if the request is invalid, the engine cannot be launched,
    /// or it exits unsuccessfully. Playback problems are reported in
    /// [`SynthesisReport::playback`] instead.
    pub async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesisReport, SynthesisError> {
        let model_path = request.model_path();
        let span = tracing::info_span!("synthesis", model = %model_path.display());
        self.synthesize_inner(request, model_path)
            .instrument(span)
            .await
    }

    async fn synthesize_inner(
        &self,
        request: &SynthesisRequest,
        model_path: PathBuf,
    ) -> Result<SynthesisReport, SynthesisError> {
        let prompt = sanitize_prompt(&request.prompt);
        if prompt.trim().is_empty() {
            return Err(SynthesisError::EmptyPrompt);
        }
        if !request.speed.is_finite() || request.speed <= 0.0 {
            return Err(SynthesisError::InvalidSpeed(request.speed));
        }
        if !model_path.is_file() {
            return Err(SynthesisError::MissingModel(model_path));
        }

        let output_dir = request.output_dir.clone();
        let output_file = tokio::task::spawn_blocking(move || next_output_path(&output_dir))
            .await
            .map_err(io::Error::other)
            .and_then(|result| result)
            .map_err(|source| SynthesisError::Io {
                path: request.output_dir.clone(),
                source,
            })?;

        self.run_engine(&model_path, request.speed, &output_file, prompt)
            .await?;

        let playback = self.play(&output_file).await;
        Ok(SynthesisReport {
            output_file,
            playback,
        })
    }

    async fn run_engine(
        &self,
        model_path: &Path,
        speed: f64,
        output_file: &Path,
        prompt: String,
    ) -> Result<(), SynthesisError> {
        info!(
            output = %output_file.display(),
            speed,
            chars = prompt.chars().count(),
            "running engine"
        );

        let mut child = Command::new(&self.engine_path)
            .args(engine_args(model_path, speed, output_file))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SynthesisError::Launch {
                program: self.engine_path.clone(),
                source,
            })?;

        // Fed from its own task so a chatty engine cannot fill its stderr pipe
        // while we are still blocked writing stdin
        let stdin_task = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await
            })
        });

        let start = std::time::Instant::now();
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| SynthesisError::Launch {
                program: self.engine_path.clone(),
                source,
            })?;

        if let Some(task) = stdin_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "failed to write prompt to engine"),
                Err(e) => warn!(error = %e, "prompt writer task failed"),
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            error!(status = %output.status, stderr = %stderr, "engine failed");
            return Err(SynthesisError::EngineFailed {
                status: output.status,
                stderr,
            });
        }

        debug!(
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            elapsed_ms = start.elapsed().as_millis(),
            "engine finished"
        );

        if !output_file.exists() {
            return Err(SynthesisError::MissingOutput(output_file.to_path_buf()));
        }
        Ok(())
    }

    async fn play(&self, output_file: &Path) -> PlaybackStatus {
        let Some(player) = &self.player else {
            return PlaybackStatus::Skipped;
        };

        tokio::time::sleep(self.settle_delay).await;

        let player = Arc::clone(player);
        let path = output_file.to_path_buf();
        match tokio::task::spawn_blocking(move || player.play(&path)).await {
            Ok(Ok(())) => PlaybackStatus::Played,
            Ok(Err(e)) => {
                warn!(error = %e, "playback failed");
                PlaybackStatus::Failed(e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "playback task failed");
                PlaybackStatus::Failed(e.to_string())
            }
        }
    }
}
