use crate::TrackId;
use serde::{Deserialize, Serialize};

/// Events emitted by the engine to the host UI
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The featured track started sounding
    PlaybackStarted {
        /// Track that is now audible
        track_id: TrackId,
    },

    /// The featured track could not be played. Non-fatal, shown as a notice
    PlaybackFailed {
        /// Track that failed, if one was set
        track_id: Option<TrackId>,
        /// Human readable reason
        reason: String,
    },

    /// The featured track reached its end
    PlaybackEnded {
        /// Track that finished
        track_id: TrackId,
    },

    /// A mixer layer failed to start and stays present but silent
    ChannelFailed {
        /// Layer that failed
        track_id: TrackId,
        /// Human readable reason
        reason: String,
    },

    /// A mix command replaced the channel set
    MixApplied {
        /// Layers now present, in insertion order
        channels: Vec<TrackId>,
        /// Ids that did not resolve in the catalog
        skipped: Vec<TrackId>,
        /// Mood label set by the command
        mood: Option<String>,
    },

    /// A mix command was rejected and the mixer left untouched
    MixRejected {
        /// Why the command was rejected
        reason: String,
    },

    /// The sleep timer fired and paused playback
    SleepTimerExpired,

    /// The binaural generator could not be started
    BinauralFailed {
        /// Human readable reason
        reason: String,
    },
}

/// Kind of user interaction reported to the analytics collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Play,
}

/// Fire-and-forget analytics record: `{ "trackId": "...", "type": "play" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEvent {
    #[serde(rename = "trackId")]
    pub track_id: TrackId,
    #[serde(rename = "type")]
    pub kind: InteractionKind,
}

impl InteractionEvent {
    pub fn play(track_id: TrackId) -> Self {
        Self {
            track_id,
            kind: InteractionKind::Play,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_wire_form() {
        let event = InteractionEvent::play(TrackId::new("forest"));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"trackId":"forest","type":"play"}"#);
    }
}
