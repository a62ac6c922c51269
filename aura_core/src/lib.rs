use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque, unique identifier of a track in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A playable catalog entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    /// Resource locator handed to the media loader. A track without one is
    /// shown to the user but never played.
    #[serde(default, alias = "file_url")]
    pub locator: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl Track {
    pub fn new(id: impl Into<TrackId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            locator: None,
            category: None,
            color: None,
        }
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Locator if it is present and non-blank.
    pub fn playable_locator(&self) -> Option<&str> {
        self.locator
            .as_deref()
            .map(str::trim)
            .filter(|locator| !locator.is_empty())
    }
}

/// Unified error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Malformed mix command: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Basic audio format definitions
pub const SAMPLE_RATE: u32 = 48000;
pub const CHANNELS: u16 = 2; // The graph always renders stereo

/// Interleaved stereo samples.
pub type AudioBuffer = Vec<f32>;

/// Clamp a user supplied level into `[0, 1]`. NaN maps to silence.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub mod events;
pub mod mix;

pub use events::{EngineEvent, InteractionEvent, InteractionKind};
pub use mix::{MixCommand, MixEntry};
