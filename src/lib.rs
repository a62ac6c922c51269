// Aura: ambient soundscape engine
// Expose public modules for use in integration tests

pub mod app;
pub mod audio;
pub mod catalog;
pub mod ui;

// Re-export commonly used types for convenience
pub use app::{
    ChannelSnapshot, Collaborators, CommandInterpreter, Engine, EngineCommand, EngineHandle,
    EngineSnapshot,
};
pub use audio::{
    BinauralPreset, BinauralSynthesizer, BlendPosition, MixerEngine, PlaybackController,
    SleepPreset, SleepTimer, SpatialBlender,
};
pub use catalog::{InMemoryCatalog, InteractionLogger, LoggingInteractionSink, TrackCatalog};
pub use ui::{CommandProcessor, ControlAction};
