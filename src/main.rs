mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use cli::{Args, Command, ConfigAction, SpeakArgs};
use piper_speak::assets;
use piper_speak::audio::CpalPlayer;
use piper_speak::config::{AppPaths, SettingKey, Settings};
use piper_speak::download::Downloader;
use piper_speak::synthesis::{describe_speed, PlaybackStatus, SynthesisRequest, Synthesizer};
use piper_speak::telemetry;
use piper_speak::voices::VoiceCatalog;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = telemetry::init(args.log_file.as_deref(), telemetry::DEFAULT_FILTER) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            println!("✗ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let paths = match args.data_dir {
        Some(dir) => AppPaths::rooted(dir),
        None => AppPaths::from_home()?,
    };
    let mut settings = Settings::load(paths)?;
    tracing::debug!("configuration loaded");

    match args.command {
        Command::Setup => setup(&settings).await,
        Command::Languages => {
            let catalog = load_catalog(&settings).await?;
            for language in catalog.languages() {
                println!("{language}");
            }
            Ok(())
        }
        Command::Voices { language } => {
            let catalog = load_catalog(&settings).await?;
            let voices = catalog.voices(&language);
            if voices.is_empty() {
                bail!("no voices for language '{language}'");
            }
            for voice in voices {
                println!("{voice}");
            }
            Ok(())
        }
        Command::Qualities { voice } => {
            let catalog = load_catalog(&settings).await?;
            let qualities = catalog.qualities(&voice);
            if qualities.is_empty() {
                bail!("no qualities for voice '{voice}'");
            }
            for quality in qualities {
                println!("{quality}");
            }
            Ok(())
        }
        Command::CustomVoices => {
            let dir = settings.custom_voices_dir()?;
            let voices = assets::list_custom_voices(&dir)?;
            if voices.is_empty() {
                println!("No custom voices in {}", dir.display());
            }
            for voice in voices {
                println!("{}", voice.display());
            }
            Ok(())
        }
        Command::Speak(speak_args) => speak(&settings, speak_args).await,
        Command::Config { action } => configure(&mut settings, action),
    }
}

async fn setup(settings: &Settings) -> Result<()> {
    let downloader = Downloader::new()?;

    println!("Checking Piper...");
    let engine = assets::ensure_engine(settings, &downloader).await?;
    println!("✓ Piper ready: {}", engine.display());

    println!("Checking voice data...");
    let catalog = assets::ensure_voice_catalog(settings, &downloader).await?;
    println!(
        "✓ Voice data loaded: {} voices in {} languages",
        catalog.len(),
        catalog.languages().len()
    );
    Ok(())
}

async fn load_catalog(settings: &Settings) -> Result<VoiceCatalog> {
    let downloader = Downloader::new()?;
    assets::ensure_voice_catalog(settings, &downloader).await
}

async fn speak(settings: &Settings, args: SpeakArgs) -> Result<()> {
    let downloader = Downloader::new()?;
    let engine = assets::ensure_engine(settings, &downloader).await?;

    let model_path: PathBuf = match (args.model, args.voice, args.quality) {
        (Some(model), _, _) => model,
        (None, Some(voice), Some(quality)) => {
            let catalog = assets::ensure_voice_catalog(settings, &downloader).await?;
            let key = catalog
                .resolve_key(&voice, &quality)
                .with_context(|| format!("no voice matches '{voice}-{quality}'"))?
                .to_owned();
            println!("Voice: {key}");
            assets::ensure_voice_model(settings, &downloader, &catalog, &key).await?
        }
        _ => bail!("either --model or --voice with --quality is required"),
    };

    let model_dir = model_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();
    let model_file_name = model_path
        .file_name()
        .with_context(|| format!("model path has no file name: {}", model_path.display()))?
        .to_string_lossy()
        .into_owned();

    let request = SynthesisRequest {
        model_dir,
        model_file_name,
        prompt: args.text.join(" "),
        speed: args.speed,
        output_dir: settings.output_dir()?,
    };

    println!("Speed: {}", describe_speed(args.speed));
    let synthesizer = if args.no_play {
        Synthesizer::without_playback(engine)
    } else {
        Synthesizer::new(engine, Arc::new(CpalPlayer))
    };

    let report = synthesizer.synthesize(&request).await?;
    println!("✓ Saved {}", report.output_file.display());
    match report.playback {
        PlaybackStatus::Played => println!("✓ Played"),
        PlaybackStatus::Skipped => {}
        PlaybackStatus::Failed(reason) => println!("! Playback failed: {reason}"),
    }
    Ok(())
}

fn configure(settings: &mut Settings, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            for key in SettingKey::ALL {
                println!("{key} = {}", settings.get(key));
            }
        }
        ConfigAction::Get { key } => println!("{}", settings.get(key)),
        ConfigAction::Set { key, value } => {
            settings.set(key, value);
            settings.save()?;
            println!("✓ {key} = {}", settings.get(key));
        }
    }
    Ok(())
}
