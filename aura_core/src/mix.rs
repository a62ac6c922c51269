//! Declarative mix commands issued by external collaborators (chat
//! assistant, emotion detector, preset generator).

use crate::{Error, TrackId};
use log::debug;
use serde::{Deserialize, Serialize};

/// One requested mixer layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixEntry {
    pub id: TrackId,
    /// Target level. Missing means "use the channel default".
    #[serde(default)]
    pub volume: Option<f32>,
}

impl MixEntry {
    pub fn new(id: impl Into<TrackId>, volume: f32) -> Self {
        Self {
            id: id.into(),
            volume: Some(volume),
        }
    }
}

fn default_open_mixer() -> bool {
    true
}

/// Full description of the desired mixer channel set.
///
/// Wire form: `{ "mix": [ { "id": "rain", "volume": 0.8 } ], "mood": "calm" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixCommand {
    #[serde(default)]
    pub mix: Option<Vec<MixEntry>>,
    #[serde(default)]
    pub mood: Option<String>,
    /// Reveal the mixer panel when the command lands.
    #[serde(default = "default_open_mixer")]
    pub open_mixer: bool,
    /// Pause the featured track so the new layers do not bleed into it.
    #[serde(default)]
    pub pause_focus: bool,
}

impl Default for MixCommand {
    fn default() -> Self {
        Self {
            mix: None,
            mood: None,
            open_mixer: true,
            pause_focus: false,
        }
    }
}

impl MixCommand {
    pub fn new(entries: Vec<MixEntry>) -> Self {
        Self {
            mix: Some(entries),
            ..Self::default()
        }
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    pub fn with_pause_focus(mut self, pause: bool) -> Self {
        self.pause_focus = pause;
        self
    }

    /// Mix for a ranked list of ids: the first layer leads at 0.8, the rest
    /// sit underneath at 0.4. Used by the webcam emotion detector.
    pub fn ranked<I, T>(ids: I, mood: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TrackId>,
    {
        let entries = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| MixEntry::new(id, if i == 0 { 0.8 } else { 0.4 }))
            .collect();

        Self::new(entries).with_mood(mood).with_pause_focus(true)
    }

    /// Parse an already-extracted JSON payload.
    ///
    /// Anything that does not match the wire form rejects the whole command.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        if !value.is_object() {
            debug!("Rejecting mix payload that is not an object: {}", value);
            return Err(Error::Command("payload is not an object".to_string()));
        }

        let command: MixCommand = serde_json::from_value(value).map_err(|e| {
            debug!("Rejecting malformed mix payload: {}", e);
            Error::Command(e.to_string())
        })?;
        command.validate()?;
        debug!("Parsed mix command with {} entries", command.entries().len());
        Ok(command)
    }

    pub fn from_json_str(payload: &str) -> Result<Self, Error> {
        let value: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| Error::Command(e.to_string()))?;
        Self::from_value(value)
    }

    /// Entries in command order, empty when the list is absent.
    pub fn entries(&self) -> &[MixEntry] {
        self.mix.as_deref().unwrap_or(&[])
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.entries().iter().map(|e| e.id.clone()).collect()
    }

    fn validate(&self) -> Result<(), Error> {
        for entry in self.entries() {
            if let Some(volume) = entry.volume {
                if !volume.is_finite() {
                    return Err(Error::Command(format!(
                        "volume for '{}' is not a finite number",
                        entry.id
                    )));
                }
            }
        }
        Ok(())
    }
}
