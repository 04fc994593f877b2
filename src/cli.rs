use clap::{Parser, Subcommand};
use std::path::PathBuf;

use piper_speak::config::SettingKey;

#[derive(Parser, Debug)]
#[command(name = "piper-speak", version, about = "Speak text with the Piper TTS engine")]
pub struct Args {
    /// Root directory for configuration, engine, voices and output
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download the engine and voice data if missing
    Setup,
    /// List languages with voices
    Languages,
    /// List voices of a language
    Voices {
        /// Native language name, as shown by `languages`
        language: String,
    },
    /// List qualities of a voice
    Qualities {
        /// Voice name, as shown by `voices`
        voice: String,
    },
    /// List models in the custom voice directory
    CustomVoices,
    /// Synthesize text and play it
    Speak(SpeakArgs),
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
pub struct SpeakArgs {
    /// Voice name from the voice data
    #[arg(long, required_unless_present = "model", requires = "quality")]
    pub voice: Option<String>,

    /// Quality of the voice
    #[arg(long)]
    pub quality: Option<String>,

    /// Path to a custom `.onnx` model instead of a catalog voice
    #[arg(long, conflicts_with_all = ["voice", "quality"])]
    pub model: Option<PathBuf>,

    /// Length scale: 1.0 is normal, lower is faster
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Only write the audio file
    #[arg(long)]
    pub no_play: bool,

    /// Text to speak
    #[arg(required = true, num_args = 1..)]
    pub text: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print every setting
    Show,
    /// Print one setting
    Get {
        /// Setting name, e.g. OutputDirectory
        key: SettingKey,
    },
    /// Change one setting
    Set {
        /// Setting name, e.g. OutputDirectory
        key: SettingKey,
        /// New value
        value: String,
    },
}
