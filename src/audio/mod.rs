pub mod binaural;
pub mod mixer;
pub mod playback;
pub mod spatial;
pub mod timer;

pub use binaural::{BinauralPreset, BinauralSynthesizer, OscillatorSnapshot};
pub use mixer::{ChannelStatus, MixerChannel, MixerEngine};
pub use playback::{PlaybackController, PlaybackError, PlaybackState};
pub use spatial::{BlendPosition, SpatialBlender};
pub use timer::{SleepPreset, SleepTimer};

use aura_core::TrackId;

/// Media the engine needs loaded before a source can sound.
///
/// The ticket ties the eventual completion to the request that caused it;
/// a completion whose ticket no longer matches has been superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub ticket: u64,
    pub track_id: TrackId,
    pub locator: String,
}
