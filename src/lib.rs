//! Piper Speak - download the Piper engine and voices, then speak text with them
//!
//! This library exports core modules for the command-line front-end and for testing.

/// Engine, voice data and voice model provisioning
pub mod assets;
/// Audio decoding and playback
pub mod audio;
/// Configuration documents and directory layout
pub mod config;
/// Streamed HTTP downloads with progress
pub mod download;
/// Running the external engine
pub mod synthesis;
/// Logging setup
pub mod telemetry;
/// Voice metadata document
pub mod voices;
