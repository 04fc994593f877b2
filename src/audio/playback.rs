use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use hound::{SampleFormat, WavReader};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Extra time allowed past the clip length before giving up on the device
const PLAYBACK_MARGIN: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Lets the device flush its last buffer before the stream is dropped
const TAIL: Duration = Duration::from_millis(100);

/// Errors that can occur while playing a file
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// File is missing or not a WAV file
    #[error("failed to decode {path}: {source}")]
    Decode {
        /// Audio file
        path: PathBuf,
        /// Decoder error
        source: hound::Error,
    },

    /// File holds no samples
    #[error("audio file {0} contains no samples")]
    Empty(PathBuf),

    /// Output device or stream failure
    #[error("audio output failed: {0}")]
    Output(#[from] anyhow::Error),
}

/// Plays an audio file to completion
///
/// Use `MockAudioPlayer` (via `mockall`) in tests.
#[cfg_attr(test, mockall::automock)]
pub trait AudioPlayer: Send + Sync {
    /// Blocks until the file has been played
    ///
    /// # Errors
    /// Returns error if the file cannot be decoded or no output is available
    fn play(&self, path: &Path) -> Result<(), PlaybackError>;
}

/// Decoded WAV contents as f32 in [-1, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channels per frame
    pub channels: u16,
}

/// Reads a WAV file, normalising integer samples to f32
///
/// # Errors
/// Returns error if the file cannot be opened or decoded
#[allow(clippy::cast_precision_loss)]
pub fn decode_wav(path: &Path) -> Result<DecodedAudio, PlaybackError> {
    let decode_err = |source| PlaybackError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = WavReader::open(path).map_err(decode_err)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>(),
        SampleFormat::Int => {
            // Full-scale value for the bit depth, e.g. 32768 for 16-bit
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<Result<Vec<_>, _>>()
        }
    }
    .map_err(decode_err)?;

    debug!(
        path = %path.display(),
        samples = samples.len(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        "wav decoded"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Averages interleaved frames down to one channel
#[allow(clippy::cast_possible_truncation)]
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels_f64 = f64::from(channels);
    samples
        .chunks(usize::from(channels))
        .map(|frame| {
            let sum: f64 = frame.iter().map(|&s| f64::from(s)).sum();
            (sum / channels_f64) as f32
        })
        .collect()
}

/// Linear-interpolation resampling of a mono signal
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = ((samples.len() as f64) / ratio).ceil() as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let src = (i as f64) * ratio;
            let floor = (src.floor() as usize).min(last);
            let ceil = (floor + 1).min(last);
            let fract = src - src.floor();
            let s1 = f64::from(samples[floor]);
            let s2 = f64::from(samples[ceil]);
            s1.mul_add(1.0 - fract, s2 * fract) as f32
        })
        .collect()
}

/// Duplicates each mono sample across `channels`
pub fn expand_channels(mono: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    mono.iter()
        .flat_map(|&sample| std::iter::repeat(sample).take(channels))
        .collect()
}

/// Plays through the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalPlayer;

impl AudioPlayer for CpalPlayer {
    fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        let _span = tracing::debug_span!("playback", path = %path.display()).entered();
        let audio = decode_wav(path)?;
        if audio.samples.is_empty() {
            return Err(PlaybackError::Empty(path.to_path_buf()));
        }
        play_samples(&audio)?;
        info!(path = %path.display(), "playback finished");
        Ok(())
    }
}

fn play_samples(audio: &DecodedAudio) -> anyhow::Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no output device available")?;

    let supported_config = device
        .default_output_config()
        .context("failed to get default output config")?;
    let device_sample_rate = supported_config.sample_rate();
    let device_channels = supported_config.channels();
    let sample_format = supported_config.sample_format();
    debug!(
        "output config: {} Hz, {} channels, {:?}",
        device_sample_rate, device_channels, sample_format
    );

    let mono = to_mono(&audio.samples, audio.channels);
    let resampled = resample_linear(&mono, audio.sample_rate, device_sample_rate);
    let frames = expand_channels(&resampled, device_channels);
    #[allow(clippy::cast_precision_loss)]
    let clip = Duration::from_secs_f64(resampled.len() as f64 / f64::from(device_sample_rate));

    let config: cpal::StreamConfig = supported_config.into();
    match sample_format {
        cpal::SampleFormat::I8 => play_stream::<i8>(&device, &config, &frames, clip),
        cpal::SampleFormat::I16 => play_stream::<i16>(&device, &config, &frames, clip),
        cpal::SampleFormat::I32 => play_stream::<i32>(&device, &config, &frames, clip),
        cpal::SampleFormat::U8 => play_stream::<u8>(&device, &config, &frames, clip),
        cpal::SampleFormat::U16 => play_stream::<u16>(&device, &config, &frames, clip),
        cpal::SampleFormat::U32 => play_stream::<u32>(&device, &config, &frames, clip),
        cpal::SampleFormat::F32 => play_stream::<f32>(&device, &config, &frames, clip),
        cpal::SampleFormat::F64 => play_stream::<f64>(&device, &config, &frames, clip),
        other => anyhow::bail!("unsupported output sample format {other}"),
    }
}

fn play_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frames: &[f32],
    clip: Duration,
) -> anyhow::Result<()>
where
    T: SizedSample + FromSample<f32>,
{
    // Whole clip fits in the buffer, so the callback never waits on a producer
    let ring_buffer = HeapRb::<f32>::new(frames.len().max(1));
    let (mut producer, mut consumer) = ring_buffer.split();
    producer.push_slice(frames);

    let drained = Arc::new(AtomicBool::new(false));
    let drained_clone = Arc::clone(&drained);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if fill_output(data, &mut consumer) {
                    drained_clone.store(true, Ordering::Relaxed);
                }
            },
            move |err| {
                warn!("audio stream error: {}", err);
            },
            None,
        )
        .context("failed to build output stream")?;

    stream.play().context("failed to start output stream")?;

    let deadline = Instant::now() + clip + PLAYBACK_MARGIN;
    while !drained.load(Ordering::Relaxed) {
        if Instant::now() >= deadline {
            warn!(clip_ms = clip.as_millis(), "playback did not drain before deadline");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    std::thread::sleep(TAIL);
    drop(stream);

    Ok(())
}

/// Converts queued f32 samples into the device format, padding with silence
///
/// Returns true once the queue has run dry.
fn fill_output<T, C>(data: &mut [T], source: &mut C) -> bool
where
    T: Sample + FromSample<f32>,
    C: Consumer<Item = f32>,
{
    let mut drained = false;
    for slot in data.iter_mut() {
        *slot = match source.try_pop() {
            Some(sample) => sample.to_sample::<T>(),
            None => {
                drained = true;
                T::EQUILIBRIUM
            }
        };
    }
    drained
}
