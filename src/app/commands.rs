use super::EngineSnapshot;
use crate::audio::{BinauralPreset, LoadRequest, SleepPreset};
use crate::ui::commands::ControlAction;
use audio_io::{MediaError, PcmBuffer};
use aura_core::{Error, MixCommand, Track, TrackId};
use std::sync::Arc;
use tokio::sync::oneshot;
use visualization::AnalyzerFrame;

/// Commands sent to the engine by its collaborators
#[derive(Debug)]
pub enum EngineCommand {
    /// Make a track the featured one and start it
    FeatureTrack(Track),
    /// Look a track up in the catalog, then feature it
    FeatureTrackById(TrackId),
    TogglePlay,
    SetPlaying(bool),
    /// Featured volume in `[0, 1]`
    SetVolume(f32),
    ToggleMute,
    SetMuted(bool),
    ToggleZenMode,
    /// Seconds into the featured track
    Seek(f64),
    /// Stop the featured track and clear the mixer
    StopAll,

    AddSound(Track),
    AddSoundById(TrackId),
    RemoveSound(TrackId),
    UpdateVolume { id: TrackId, volume: f32 },
    /// Clear the mixer and its mood
    StopMix,
    ToggleMixer,
    SetMixerOpen(bool),
    ApplyMix(MixCommand),
    /// Raw payload, rejected without touching the mixer when malformed
    ApplyMixJson(String),

    BlendPress { x: f32, y: f32 },
    BlendMove { x: f32, y: f32 },
    BlendRelease,

    StartBinaural { base_hz: f32, beat_hz: f32, volume: f32 },
    SetBinauralBase(f32),
    SetBinauralBeat(f32),
    SetBinauralVolume(f32),
    ApplyBinauralPreset(BinauralPreset),
    StopBinaural,

    StartSleepTimer(SleepPreset),
    CancelSleepTimer,

    /// Keyboard or voice action
    Control(ControlAction),

    SampleSpectrum(oneshot::Sender<AnalyzerFrame>),
    Snapshot(oneshot::Sender<EngineSnapshot>),

    Shutdown,
}

/// What a track lookup was for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupPurpose {
    Feature,
    Layer,
}

/// Results of work the engine handed off, delivered back into its loop
#[derive(Debug)]
pub(crate) enum Completion {
    FocusLoaded {
        request: LoadRequest,
        media: Result<Arc<PcmBuffer>, MediaError>,
    },
    LayerLoaded {
        request: LoadRequest,
        media: Result<Arc<PcmBuffer>, MediaError>,
    },
    TrackResolved {
        id: TrackId,
        purpose: LookupPurpose,
        result: Result<Option<Track>, Error>,
    },
    MixResolved {
        ticket: u64,
        result: Result<super::ResolvedMix, Error>,
    },
    StaggerDue {
        generation: u64,
        volumes: Vec<super::PendingVolume>,
    },
    SleepExpired {
        ticket: u64,
    },
}
