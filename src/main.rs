//! Command line host for the aura engine

use anyhow::{Context, Result};
use audio_io::{AudioContext, DeviceContextFactory, RawPcmLoader};
use aura::app::{Collaborators, Engine, EngineCommand, EngineHandle};
use aura::audio::{BinauralPreset, SleepPreset};
use aura::catalog::{InMemoryCatalog, LoggingInteractionSink};
use aura::ui::{CommandHandler, CommandProcessor, ControlAction};
use aura_core::{EngineEvent, TrackId, CHANNELS};
use clap::Parser;
use log::{debug, info, warn};
use settings_manager::ConfigManager;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

/// Number of visualizer bars shown by /spectrum
const SPECTRUM_BARS: usize = 20;

/// aura - ambient soundscape mixer
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Track catalog in TOML, overriding the configured one
    #[clap(long)]
    catalog: Option<PathBuf>,

    /// Enable debug logging
    #[clap(short, long)]
    verbose: bool,
}

/// Slash commands forwarded to the engine from the stdin thread
struct CliSurface {
    handle: EngineHandle,
    help: Vec<String>,
}

impl CliSurface {
    fn send(&self, command: EngineCommand) -> Result<(), String> {
        self.handle.blocking_send(command).map_err(|e| e.to_string())
    }
}

impl CommandHandler for CliSurface {
    fn feature(&mut self, id: &str) -> Result<(), String> {
        self.send(EngineCommand::FeatureTrackById(TrackId::new(id)))
    }

    fn add_layer(&mut self, id: &str) -> Result<(), String> {
        self.send(EngineCommand::AddSoundById(TrackId::new(id)))
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), String> {
        self.send(EngineCommand::RemoveSound(TrackId::new(id)))
    }

    fn set_volume(&mut self, level: u8) -> Result<(), String> {
        self.send(EngineCommand::SetVolume(level as f32 / 100.0))
    }

    fn apply_mix(&mut self, payload: &str) -> Result<(), String> {
        self.send(EngineCommand::ApplyMixJson(payload.to_string()))
    }

    fn blend(&mut self, x: f32, y: f32) -> Result<(), String> {
        self.send(EngineCommand::BlendPress { x, y })?;
        self.send(EngineCommand::BlendRelease)
    }

    fn binaural(&mut self, preset: Option<BinauralPreset>) -> Result<(), String> {
        match preset {
            Some(preset) => self.send(EngineCommand::ApplyBinauralPreset(preset)),
            None => self.send(EngineCommand::StopBinaural),
        }
    }

    fn sleep_timer(&mut self, preset: Option<SleepPreset>) -> Result<(), String> {
        match preset {
            Some(preset) => self.send(EngineCommand::StartSleepTimer(preset)),
            None => self.send(EngineCommand::CancelSleepTimer),
        }
    }

    fn status(&self) -> Result<Vec<String>, String> {
        let snapshot = self.handle.blocking_snapshot().map_err(|e| e.to_string())?;
        Ok(snapshot.describe())
    }

    fn spectrum(&self) -> Result<Vec<u8>, String> {
        let frame = self.handle.blocking_spectrum().map_err(|e| e.to_string())?;
        Ok(frame.bars(SPECTRUM_BARS))
    }

    fn help(&self) -> Vec<String> {
        self.help.clone()
    }
}

fn describe_event(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::PlaybackFailed { track_id, reason } => Some(match track_id {
            Some(id) => format!("Could not play {}: {}", id, reason),
            None => format!("Could not play: {}", reason),
        }),
        EngineEvent::PlaybackEnded { track_id } => Some(format!("{} finished", track_id)),
        EngineEvent::ChannelFailed { track_id, reason } => {
            Some(format!("Layer {} is silent: {}", track_id, reason))
        }
        EngineEvent::MixApplied {
            channels, skipped, ..
        } => {
            let mut line = format!("Mix ready with {} layers", channels.len());
            if !skipped.is_empty() {
                line.push_str(&format!(", {} unknown", skipped.len()));
            }
            Some(line)
        }
        EngineEvent::MixRejected { reason } => Some(format!("Mix rejected: {}", reason)),
        EngineEvent::SleepTimerExpired => Some("Sleep timer finished, playback paused".to_string()),
        EngineEvent::BinauralFailed { reason } => Some(format!("Binaural failed: {}", reason)),
        EngineEvent::PlaybackStarted { .. } => None,
    }
}

/// Read stdin until EOF or /quit
fn input_loop(handle: EngineHandle) {
    let processor = CommandProcessor::new();
    let help = processor
        .get_commands()
        .into_iter()
        .map(|(name, about)| format!("/{:<10} {}", name, about))
        .collect();
    let mut surface = CliSurface {
        handle: handle.clone(),
        help,
    };

    println!("Type /help for commands. Space toggles play, m mutes.");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read input: {}", e);
                break;
            }
        };
        let input = line.as_str();

        if input.trim_start().starts_with('/') {
            match processor.execute(input, &mut surface) {
                Ok(output) => println!("{}", output),
                Err(e) => println!("Error: {}", e),
            }
            if input.trim() == "/quit" {
                break;
            }
            continue;
        }

        let mut chars = input.chars();
        let action = match (chars.next(), chars.next()) {
            (Some(key), None) => ControlAction::from_key(key),
            _ => ControlAction::from_voice(input),
        };
        match action {
            Some(action) => {
                if let Err(e) = handle.blocking_send(EngineCommand::Control(action)) {
                    warn!("{}", e);
                    break;
                }
            }
            None => debug!("Ignoring input {:?}", input),
        }
    }

    if let Err(e) = handle.blocking_send(EngineCommand::Shutdown) {
        debug!("Engine already stopped: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging based on verbose flag
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
        debug!("Debug logging enabled");
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("Starting aura");

    let config = match &args.config {
        Some(path) => ConfigManager::with_file(path),
        None => ConfigManager::new(),
    }
    .context("Failed to load configuration")?;
    let settings = config.into_settings();

    let catalog = match args.catalog.as_ref().or(settings.catalog_path.as_ref()) {
        Some(path) => InMemoryCatalog::from_toml_file(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => {
            warn!("No catalog configured, track ids will not resolve");
            InMemoryCatalog::new()
        }
    };

    let device = Some(settings.output_device.clone()).filter(|d| !d.is_empty());
    let context = AudioContext::open_device("media", device.clone(), settings.sample_rate)
        .context("Failed to open the output device")?;

    let collaborators = Collaborators {
        catalog: Arc::new(catalog),
        interactions: Arc::new(LoggingInteractionSink),
        media: Arc::new(RawPcmLoader::new(
            &settings.media_root,
            settings.sample_rate,
            CHANNELS,
        )),
        binaural_contexts: Arc::new(DeviceContextFactory::new(device, settings.sample_rate)),
    };

    let (mut engine, handle, mut events) = Engine::new(settings, context, collaborators)?;
    let engine_task = tokio::spawn(async move { engine.run().await });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = describe_event(&event) {
                println!("{}", line);
            }
        }
    });

    let input = tokio::task::spawn_blocking(move || input_loop(handle));
    input.await.context("Input thread panicked")?;

    engine_task.await.context("Engine task panicked")??;
    info!("Goodbye");
    Ok(())
}
