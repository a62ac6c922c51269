pub mod commands;
pub mod engine;
pub mod interpreter;

pub use commands::EngineCommand;
pub use engine::{Collaborators, Engine};
pub use interpreter::{AppliedMix, CommandInterpreter, PendingVolume, ResolvedMix};

use crate::audio::{BlendPosition, ChannelStatus, OscillatorSnapshot, PlaybackState};
use crate::audio::timer::format_clock;
use aura_core::{Error, TrackId};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use visualization::AnalyzerFrame;

/// One mixer layer as seen from outside the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub track_id: TrackId,
    pub title: String,
    pub volume: f32,
    pub status: ChannelStatus,
}

/// Point-in-time copy of everything the host UI renders
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub playback: PlaybackState,
    /// Seconds into the featured track
    pub position: f64,
    pub duration: Option<f64>,
    /// Media for the featured track is still loading
    pub loading: bool,
    /// Mixer layers in insertion order
    pub channels: Vec<ChannelSnapshot>,
    pub mixer_open: bool,
    pub mood: Option<String>,
    pub blend: BlendPosition,
    pub binaural: OscillatorSnapshot,
    pub sleep_remaining: Option<Duration>,
}

impl EngineSnapshot {
    pub fn channel(&self, id: &str) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.track_id.as_str() == id)
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.track_id.to_string()).collect()
    }

    /// Human readable summary, one line per item
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();

        let transport = if self.playback.is_playing { "playing" } else { "paused" };
        match &self.playback.current_track {
            Some(track) => lines.push(format!(
                "Featured: {} ({}) {} at {}%{}",
                track.title,
                track.id,
                transport,
                (self.playback.volume * 100.0).round(),
                if self.playback.is_muted { ", muted" } else { "" }
            )),
            None => lines.push("Featured: none".to_string()),
        }

        if self.channels.is_empty() {
            lines.push("Mixer: empty".to_string());
        } else {
            let mood = self.mood.as_deref().unwrap_or("none");
            lines.push(format!("Mixer ({} layers, mood {}):", self.channels.len(), mood));
            for channel in &self.channels {
                let status = match &channel.status {
                    ChannelStatus::Loading => "loading".to_string(),
                    ChannelStatus::Playing => "playing".to_string(),
                    ChannelStatus::Silent => "no source".to_string(),
                    ChannelStatus::Failed(reason) => format!("failed: {}", reason),
                };
                lines.push(format!(
                    "  {} {}% [{}]",
                    channel.track_id,
                    (channel.volume * 100.0).round(),
                    status
                ));
            }
        }

        if self.binaural.running {
            lines.push(format!(
                "Binaural: {} Hz / {} Hz ({} Hz beat)",
                self.binaural.left_hz(),
                self.binaural.right_hz(),
                self.binaural.beat_hz
            ));
        }

        if let Some(remaining) = self.sleep_remaining {
            lines.push(format!("Sleep timer: {}", format_clock(remaining.as_secs())));
        }
        lines
    }
}

fn stopped() -> Error {
    Error::InvalidState("engine has stopped".to_string())
}

/// Cloneable sender half used by collaborators to drive the engine
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub(crate) fn new(command_tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { command_tx }
    }

    pub async fn send(&self, command: EngineCommand) -> Result<(), Error> {
        self.command_tx.send(command).await.map_err(|_| stopped())
    }

    /// Queue a command without waiting. Fails when the queue is full.
    pub fn dispatch(&self, command: EngineCommand) -> Result<(), Error> {
        self.command_tx
            .try_send(command)
            .map_err(|e| Error::InvalidState(format!("failed to queue command: {}", e)))
    }

    /// For callers outside the runtime, such as the stdin thread
    pub fn blocking_send(&self, command: EngineCommand) -> Result<(), Error> {
        self.command_tx.blocking_send(command).map_err(|_| stopped())
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn spectrum(&self) -> Result<AnalyzerFrame, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::SampleSpectrum(reply)).await?;
        rx.await.map_err(|_| stopped())
    }

    pub fn blocking_snapshot(&self) -> Result<EngineSnapshot, Error> {
        let (reply, rx) = oneshot::channel();
        self.blocking_send(EngineCommand::Snapshot(reply))?;
        rx.blocking_recv().map_err(|_| stopped())
    }

    pub fn blocking_spectrum(&self) -> Result<AnalyzerFrame, Error> {
        let (reply, rx) = oneshot::channel();
        self.blocking_send(EngineCommand::SampleSpectrum(reply))?;
        rx.blocking_recv().map_err(|_| stopped())
    }

    pub async fn shutdown(&self) -> Result<(), Error> {
        self.send(EngineCommand::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}
