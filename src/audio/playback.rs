//! Transport for the single featured track.

use super::LoadRequest;
use audio_io::{AudioContext, GraphError, MediaError, NodeId, NodeKind, ParamKind, PcmBuffer};
use aura_core::{clamp_unit, Error, Track, TrackId};
use log::{debug, info, warn};
use settings_manager::PlaybackSettings;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure of a transport action
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Superseded by a newer play request. Never shown to the user.
    #[error("playback request was superseded by a newer one")]
    Interrupted,

    #[error("track '{0}' has no playable source")]
    MissingSource(TrackId),

    #[error("failed to load media: {0}")]
    Load(String),

    #[error("audio device error: {0}")]
    Device(String),
}

impl PlaybackError {
    /// Benign failures are swallowed and leave state untouched
    pub fn is_benign(&self) -> bool {
        matches!(self, PlaybackError::Interrupted)
    }
}

impl From<GraphError> for PlaybackError {
    fn from(e: GraphError) -> Self {
        PlaybackError::Device(e.to_string())
    }
}

impl From<PlaybackError> for Error {
    fn from(e: PlaybackError) -> Self {
        Error::Playback(e.to_string())
    }
}

/// Observable transport state
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    /// Only true while `current_track` is set
    pub is_playing: bool,
    pub is_muted: bool,
    pub volume: f32,
    pub current_track: Option<Track>,
    /// UI visibility flag, no audio effect
    pub is_zen_mode: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_muted: false,
            volume: 0.5,
            current_track: None,
            is_zen_mode: false,
        }
    }
}

struct LoadedSource {
    node: NodeId,
    track_id: TrackId,
}

/// Owns the featured track and its graph nodes: `source -> focus gain -> out`.
///
/// Starting a track is two-phase. Transport calls return a [`LoadRequest`]
/// when media is needed; the caller loads it and hands the result back to
/// [`PlaybackController::fulfil`].
pub struct PlaybackController {
    state: PlaybackState,
    context: AudioContext,
    focus_gain: NodeId,
    source: Option<LoadedSource>,
    next_ticket: u64,
    pending: Option<u64>,
    smoothing: Duration,
}

impl PlaybackController {
    pub fn new(context: AudioContext, settings: &PlaybackSettings) -> Result<Self, Error> {
        let volume = clamp_unit(settings.default_volume);
        let focus_gain = context.with_graph(|graph| {
            let gain = graph.add_node(NodeKind::gain(volume))?;
            graph.connect_to_destination(gain)?;
            Ok(gain)
        })?;

        Ok(Self {
            state: PlaybackState {
                volume,
                ..PlaybackState::default()
            },
            context,
            focus_gain,
            source: None,
            next_ticket: 0,
            pending: None,
            smoothing: settings.volume_smoothing(),
        })
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.state.current_track.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Node whose output is the audible featured track
    pub fn output_node(&self) -> NodeId {
        self.focus_gain
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    /// Level presented to the device
    pub fn effective_volume(&self) -> f32 {
        if self.state.is_muted {
            0.0
        } else {
            self.state.volume
        }
    }

    /// Replace the featured track and start it
    pub fn set_track(&mut self, track: Track) -> Result<Option<LoadRequest>, PlaybackError> {
        info!("Featuring track '{}'", track.id);
        self.release_source();
        self.pending = None;
        self.state.current_track = Some(track);
        self.state.is_playing = true;
        self.start()
    }

    pub fn toggle_play(&mut self) -> Result<Option<LoadRequest>, PlaybackError> {
        let playing = !self.state.is_playing;
        self.set_playing(playing)
    }

    pub fn set_playing(&mut self, playing: bool) -> Result<Option<LoadRequest>, PlaybackError> {
        if !playing {
            self.state.is_playing = false;
            self.pending = None;
            if let Some(source) = &self.source {
                let node = source.node;
                self.context
                    .with_graph(|graph| graph.set_source_playing(node, false))?;
            }
            return Ok(None);
        }

        if self.state.current_track.is_none() {
            debug!("Play requested with no track set");
            return Ok(None);
        }
        if self.state.is_playing && (self.pending.is_some() || self.source_is_playing()) {
            return Ok(None);
        }

        self.state.is_playing = true;
        self.start()
    }

    fn source_is_playing(&self) -> bool {
        match &self.source {
            Some(source) => {
                let node = source.node;
                self.context
                    .with_graph(|graph| graph.source_playing(node))
                    .unwrap_or(false)
            }
            None => false,
        }
    }

    fn start(&mut self) -> Result<Option<LoadRequest>, PlaybackError> {
        let result = self.try_start();
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn try_start(&mut self) -> Result<Option<LoadRequest>, PlaybackError> {
        let track = match &self.state.current_track {
            Some(track) => track,
            None => return Ok(None),
        };
        let locator = track
            .playable_locator()
            .ok_or_else(|| PlaybackError::MissingSource(track.id.clone()))?
            .to_string();

        if let Some(source) = &self.source {
            if source.track_id == track.id {
                let node = source.node;
                self.context.resume()?;
                self.context
                    .with_graph(|graph| graph.set_source_playing(node, true))?;
                return Ok(None);
            }
        }

        self.next_ticket += 1;
        self.pending = Some(self.next_ticket);
        Ok(Some(LoadRequest {
            ticket: self.next_ticket,
            track_id: track.id.clone(),
            locator,
        }))
    }

    /// Complete a load started by a transport call. Returns `true` when the
    /// track is now sounding.
    pub fn fulfil(
        &mut self,
        request: &LoadRequest,
        media: Result<Arc<PcmBuffer>, MediaError>,
    ) -> Result<bool, PlaybackError> {
        if self.pending != Some(request.ticket) {
            debug!("Dropping superseded load for '{}'", request.track_id);
            return Err(PlaybackError::Interrupted);
        }
        self.pending = None;

        let result = self.install(request, media);
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn install(
        &mut self,
        request: &LoadRequest,
        media: Result<Arc<PcmBuffer>, MediaError>,
    ) -> Result<bool, PlaybackError> {
        let buffer = media.map_err(|e| PlaybackError::Load(e.to_string()))?;

        self.release_source();
        let gain = self.focus_gain;
        let play = self.state.is_playing;
        let node = self.context.with_graph(|graph| {
            let node = graph.add_node(NodeKind::buffer_source(false))?;
            graph.set_source_buffer(node, buffer)?;
            graph.connect(node, gain)?;
            Ok(node)
        })?;
        self.source = Some(LoadedSource {
            node,
            track_id: request.track_id.clone(),
        });

        if !play {
            return Ok(false);
        }

        self.context.resume()?;
        self.context
            .with_graph(|graph| graph.set_source_playing(node, true))?;
        info!("Playing '{}'", request.track_id);
        Ok(true)
    }

    fn fail(&mut self, error: &PlaybackError) {
        if error.is_benign() {
            return;
        }
        warn!("Playback failed: {}", error);
        self.state.is_playing = false;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.state.volume = clamp_unit(volume);
        self.state.is_muted = false;
        self.apply_gain();
    }

    pub fn toggle_mute(&mut self) {
        self.state.is_muted = !self.state.is_muted;
        self.apply_gain();
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.state.is_muted != muted {
            self.toggle_mute();
        }
    }

    pub fn toggle_zen_mode(&mut self) {
        self.state.is_zen_mode = !self.state.is_zen_mode;
    }

    fn apply_gain(&self) {
        let target = self.effective_volume();
        let gain = self.focus_gain;
        let smoothing = self.smoothing;
        let result = self.context.with_graph(|graph| {
            graph
                .ramp_param(gain, ParamKind::Gain, target, smoothing)
                .or_else(|_| graph.set_param(gain, ParamKind::Gain, target))
        });
        if let Err(e) = result {
            warn!("Failed to apply featured volume: {}", e);
        }
    }

    pub fn seek(&mut self, seconds: f64) -> Result<(), PlaybackError> {
        if let Some(source) = &self.source {
            let node = source.node;
            self.context.with_graph(|graph| graph.seek_source(node, seconds))?;
        }
        Ok(())
    }

    /// Seconds into the loaded track
    pub fn position(&self) -> f64 {
        self.source
            .as_ref()
            .and_then(|s| {
                let node = s.node;
                self.context.with_graph(|graph| graph.source_position(node)).ok()
            })
            .unwrap_or(0.0)
    }

    pub fn duration(&self) -> Option<f64> {
        self.source.as_ref().and_then(|s| {
            let node = s.node;
            self.context
                .with_graph(|graph| graph.source_duration(node))
                .ok()
                .flatten()
        })
    }

    /// Check for the end of the featured track. Returns the track that just
    /// finished, once.
    pub fn poll(&mut self) -> Option<TrackId> {
        if !self.state.is_playing {
            return None;
        }
        let source = self.source.as_ref()?;
        let node = source.node;
        let ended = self
            .context
            .with_graph(|graph| graph.source_ended(node))
            .unwrap_or(false);

        if ended {
            self.state.is_playing = false;
            info!("Track '{}' ended", source.track_id);
            return Some(source.track_id.clone());
        }
        None
    }

    /// Stop and forget the featured track
    pub fn stop_all(&mut self) {
        self.release_source();
        self.pending = None;
        self.state.is_playing = false;
        self.state.current_track = None;
    }

    fn release_source(&mut self) {
        if let Some(source) = self.source.take() {
            let node = source.node;
            if let Err(e) = self.context.with_graph(|graph| graph.remove_node(node)) {
                debug!("Featured source already released: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> PlaybackController {
        let ctx = AudioContext::offline("media", 1000);
        PlaybackController::new(ctx, &PlaybackSettings::default()).unwrap()
    }

    fn track(id: &str) -> Track {
        Track::new(id, id.to_uppercase()).with_locator(format!("{}.f32", id))
    }

    fn tone(seconds: f32) -> Arc<PcmBuffer> {
        Arc::new(PcmBuffer::sine(100.0, seconds, 1000, 0.5))
    }

    #[test]
    fn defaults() {
        let controller = controller();
        let state = controller.state();
        assert!(!state.is_playing);
        assert!(!state.is_muted);
        assert_eq!(state.volume, 0.5);
        assert!(state.current_track.is_none());
    }

    #[test]
    fn set_track_forces_playing_and_requests_media() {
        let mut controller = controller();
        let request = controller.set_track(track("rain")).unwrap().unwrap();
        assert!(controller.is_playing());
        assert_eq!(request.locator, "rain.f32");

        assert!(controller.fulfil(&request, Ok(tone(1.0))).unwrap());
        assert!(controller.is_playing());
        assert_eq!(controller.context().state(), audio_io::ContextState::Running);
    }

    #[test]
    fn newer_request_interrupts_older_one() {
        let mut controller = controller();
        let first = controller.set_track(track("rain")).unwrap().unwrap();
        let second = controller.set_track(track("fire")).unwrap().unwrap();

        let stale = controller.fulfil(&first, Ok(tone(1.0))).unwrap_err();
        assert!(stale.is_benign());
        assert!(controller.is_playing());

        assert!(controller.fulfil(&second, Ok(tone(1.0))).unwrap());
        assert_eq!(controller.current_track().unwrap().id, TrackId::new("fire"));
    }

    #[test]
    fn load_failure_stops_transport() {
        let mut controller = controller();
        let request = controller.set_track(track("rain")).unwrap().unwrap();
        let err = controller
            .fulfil(&request, Err(MediaError::NotFound("rain.f32".into())))
            .unwrap_err();

        assert!(!err.is_benign());
        assert!(!controller.is_playing());
        assert!(controller.current_track().is_some());
    }

    #[test]
    fn missing_locator_is_reported() {
        let mut controller = controller();
        let err = controller.set_track(Track::new("ghost", "Ghost")).unwrap_err();
        assert_eq!(err, PlaybackError::MissingSource(TrackId::new("ghost")));
        assert!(!controller.is_playing());
    }

    #[test]
    fn toggle_without_track_stays_stopped() {
        let mut controller = controller();
        assert!(controller.toggle_play().unwrap().is_none());
        assert!(!controller.is_playing());
    }

    #[test]
    fn pause_and_resume_reuses_loaded_source() {
        let mut controller = controller();
        let request = controller.set_track(track("rain")).unwrap().unwrap();
        controller.fulfil(&request, Ok(tone(1.0))).unwrap();

        assert!(controller.toggle_play().unwrap().is_none());
        assert!(!controller.is_playing());
        assert!(controller.toggle_play().unwrap().is_none());
        assert!(controller.is_playing());
    }

    #[test]
    fn pause_while_loading_cancels_the_load() {
        let mut controller = controller();
        let request = controller.set_track(track("rain")).unwrap().unwrap();
        controller.set_playing(false).unwrap();

        assert_eq!(
            controller.fulfil(&request, Ok(tone(1.0))),
            Err(PlaybackError::Interrupted)
        );
        assert!(!controller.is_playing());
    }

    #[test]
    fn volume_clamps_and_clears_mute() {
        let mut controller = controller();
        controller.toggle_mute();
        assert!(controller.state().is_muted);
        assert_eq!(controller.effective_volume(), 0.0);

        controller.set_volume(1.4);
        assert!(!controller.state().is_muted);
        assert_eq!(controller.state().volume, 1.0);
        assert_eq!(controller.effective_volume(), 1.0);

        let gain = controller.output_node();
        let target = controller
            .context()
            .with_graph(|g| g.param_target(gain, ParamKind::Gain))
            .unwrap();
        assert_eq!(target, 1.0);
    }

    #[test]
    fn mute_silences_the_focus_gain() {
        let mut controller = controller();
        controller.toggle_mute();
        let gain = controller.output_node();
        let target = controller
            .context()
            .with_graph(|g| g.param_target(gain, ParamKind::Gain))
            .unwrap();
        assert_eq!(target, 0.0);
        assert_eq!(controller.state().volume, 0.5);
    }

    #[test]
    fn zen_mode_has_no_audio_effect() {
        let mut controller = controller();
        controller.toggle_zen_mode();
        assert!(controller.state().is_zen_mode);
        assert_eq!(controller.effective_volume(), 0.5);
    }

    #[test]
    fn end_of_track_stops_transport() {
        let mut controller = controller();
        let request = controller.set_track(track("chime")).unwrap().unwrap();
        controller.fulfil(&request, Ok(tone(0.1))).unwrap();

        assert!(controller.poll().is_none());
        controller.context().render(200).unwrap();
        assert_eq!(controller.poll(), Some(TrackId::new("chime")));
        assert!(!controller.is_playing());
        assert!(controller.poll().is_none());
    }

    #[test]
    fn seek_moves_position() {
        let mut controller = controller();
        let request = controller.set_track(track("rain")).unwrap().unwrap();
        controller.fulfil(&request, Ok(tone(2.0))).unwrap();

        controller.seek(1.25).unwrap();
        assert!((controller.position() - 1.25).abs() < 1e-6);
        assert_eq!(controller.duration(), Some(2.0));
    }

    #[test]
    fn stop_all_resets_track() {
        let mut controller = controller();
        let request = controller.set_track(track("rain")).unwrap().unwrap();
        controller.fulfil(&request, Ok(tone(1.0))).unwrap();

        controller.stop_all();
        assert!(!controller.is_playing());
        assert!(controller.current_track().is_none());
        assert_eq!(controller.position(), 0.0);
    }
}
