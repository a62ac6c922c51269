//! Background layers that loop underneath the featured track.

use super::LoadRequest;
use audio_io::{AudioContext, MediaError, NodeId, NodeKind, ParamKind, PcmBuffer};
use aura_core::{clamp_unit, Error, Track, TrackId};
use log::{debug, error, info, warn};
use settings_manager::MixerSettings;
use std::sync::Arc;
use std::time::Duration;

/// Whether a layer is actually producing sound
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelStatus {
    /// Waiting for media
    Loading,
    Playing,
    /// The track has no locator and never plays
    Silent,
    /// Playback could not start. The layer stays visible but silent.
    Failed(String),
}

/// One independently volumed looping layer
#[derive(Debug, Clone)]
pub struct MixerChannel {
    pub track: Track,
    pub volume: f32,
    pub status: ChannelStatus,
    ticket: u64,
    revision: u64,
    gain: Option<NodeId>,
    source: Option<NodeId>,
}

impl MixerChannel {
    pub fn id(&self) -> &TrackId {
        &self.track.id
    }

    pub fn is_sounding(&self) -> bool {
        self.status == ChannelStatus::Playing
    }
}

/// Owns the layer set. Channels keep insertion order and at most one exists
/// per track id.
pub struct MixerEngine {
    context: AudioContext,
    channels: Vec<MixerChannel>,
    is_open: bool,
    mood: Option<String>,
    generation: u64,
    next_ticket: u64,
    default_volume: f32,
    smoothing: Duration,
}

impl MixerEngine {
    pub fn new(context: AudioContext, settings: &MixerSettings) -> Self {
        Self {
            context,
            channels: Vec::new(),
            is_open: false,
            mood: None,
            generation: 0,
            next_ticket: 0,
            default_volume: clamp_unit(settings.default_channel_volume),
            smoothing: settings.volume_smoothing(),
        }
    }

    pub fn channels(&self) -> &[MixerChannel] {
        &self.channels
    }

    pub fn channel(&self, id: &TrackId) -> Option<&MixerChannel> {
        self.channels.iter().find(|c| &c.track.id == id)
    }

    pub fn channel_ids(&self) -> Vec<TrackId> {
        self.channels.iter().map(|c| c.track.id.clone()).collect()
    }

    pub fn contains(&self, id: &TrackId) -> bool {
        self.channel(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn default_volume(&self) -> f32 {
        self.default_volume
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn mood(&self) -> Option<&str> {
        self.mood.as_deref()
    }

    /// Bumped every time the whole channel set is discarded
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Changes whenever the layer is re-added or its level is set
    pub fn channel_revision(&self, id: &TrackId) -> Option<u64> {
        self.channel(id).map(|c| c.revision)
    }

    pub fn add_sound(&mut self, track: Track) -> Option<LoadRequest> {
        let volume = self.default_volume;
        self.add_sound_with_volume(track, volume)
    }

    /// Add a layer at `volume`. Adding an id that is already present does
    /// nothing. Returns the media that must be attached for it to sound.
    pub fn add_sound_with_volume(&mut self, track: Track, volume: f32) -> Option<LoadRequest> {
        if self.contains(&track.id) {
            debug!("Layer '{}' already present", track.id);
            return None;
        }

        let volume = clamp_unit(volume);
        self.next_ticket += 1;
        let ticket = self.next_ticket;

        let gain = self.context.with_graph(|graph| {
            let gain = graph.add_node(NodeKind::gain(volume))?;
            graph.connect_to_destination(gain)?;
            Ok(gain)
        });

        let (gain, status) = match gain {
            Ok(gain) => match track.playable_locator() {
                Some(_) => (Some(gain), ChannelStatus::Loading),
                None => {
                    warn!("Layer '{}' has no source and will stay silent", track.id);
                    (Some(gain), ChannelStatus::Silent)
                }
            },
            Err(e) => {
                error!("Failed to create layer '{}': {}", track.id, e);
                (None, ChannelStatus::Failed(e.to_string()))
            }
        };

        let request = match (&status, track.playable_locator()) {
            (ChannelStatus::Loading, Some(locator)) => Some(LoadRequest {
                ticket,
                track_id: track.id.clone(),
                locator: locator.to_string(),
            }),
            _ => None,
        };

        info!("Added layer '{}' at {:.2}", track.id, volume);
        self.channels.push(MixerChannel {
            track,
            volume,
            status,
            ticket,
            revision: ticket,
            gain,
            source: None,
        });
        request
    }

    /// Deliver media for a layer. `Ok(false)` means the layer was removed or
    /// re-added since the request was made. A failure leaves the layer in
    /// place, marked failed.
    pub fn attach_media(
        &mut self,
        request: &LoadRequest,
        media: Result<Arc<PcmBuffer>, MediaError>,
    ) -> Result<bool, Error> {
        let context = self.context.clone();
        let channel = match self
            .channels
            .iter_mut()
            .find(|c| c.track.id == request.track_id && c.ticket == request.ticket)
        {
            Some(channel) => channel,
            None => {
                debug!("Dropping media for departed layer '{}'", request.track_id);
                return Ok(false);
            }
        };

        let started = media.map_err(Error::from).and_then(|buffer| {
            let gain = channel
                .gain
                .ok_or_else(|| Error::Audio(format!("layer '{}' has no gain node", channel.track.id)))?;
            let source = context.with_graph(|graph| {
                let source = graph.add_node(NodeKind::buffer_source(true))?;
                graph.set_source_buffer(source, buffer)?;
                graph.connect(source, gain)?;
                graph.set_source_playing(source, true)?;
                Ok(source)
            })?;
            channel.source = Some(source);
            context.resume()?;
            Ok(())
        });

        match started {
            Ok(()) => {
                channel.status = ChannelStatus::Playing;
                debug!("Layer '{}' playing", channel.track.id);
                Ok(true)
            }
            Err(e) => {
                error!("Layer '{}' failed to start: {}", channel.track.id, e);
                channel.status = ChannelStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Stop and discard a layer
    pub fn remove_sound(&mut self, id: &TrackId) -> bool {
        let index = match self.channels.iter().position(|c| &c.track.id == id) {
            Some(index) => index,
            None => return false,
        };
        let channel = self.channels.remove(index);
        self.release(&channel);
        info!("Removed layer '{}'", id);
        true
    }

    /// Set a layer's level, clamped into `[0, 1]`
    pub fn update_volume(&mut self, id: &TrackId, volume: f32) -> bool {
        let volume = clamp_unit(volume);
        let smoothing = self.smoothing;
        let context = self.context.clone();
        let revision = self.next_ticket + 1;

        let channel = match self.channels.iter_mut().find(|c| &c.track.id == id) {
            Some(channel) => channel,
            None => {
                debug!("Volume update for unknown layer '{}'", id);
                return false;
            }
        };
        channel.volume = volume;
        channel.revision = revision;
        self.next_ticket = revision;

        if let Some(gain) = channel.gain {
            let result = context.with_graph(|graph| {
                graph
                    .ramp_param(gain, ParamKind::Gain, volume, smoothing)
                    .or_else(|_| graph.set_param(gain, ParamKind::Gain, volume))
            });
            if let Err(e) = result {
                warn!("Failed to apply volume to layer '{}': {}", id, e);
            }
        }
        true
    }

    /// Level the layer's gain is heading towards
    pub fn channel_gain(&self, id: &TrackId) -> Option<f32> {
        let gain = self.channel(id)?.gain?;
        self.context
            .with_graph(|graph| graph.param_target(gain, ParamKind::Gain))
            .ok()
    }

    /// Discard every layer and the mood
    pub fn stop_all(&mut self) {
        for channel in std::mem::take(&mut self.channels) {
            self.release(&channel);
        }
        self.mood = None;
        self.generation += 1;
        debug!("Mixer cleared (generation {})", self.generation);
    }

    pub fn set_mood(&mut self, mood: Option<String>) {
        self.mood = mood;
    }

    pub fn toggle_mixer(&mut self) {
        self.is_open = !self.is_open;
    }

    pub fn set_mixer_open(&mut self, open: bool) {
        self.is_open = open;
    }

    fn release(&self, channel: &MixerChannel) {
        let nodes = [channel.source, channel.gain];
        let result = self.context.with_graph(|graph| {
            for node in nodes.iter().flatten() {
                if let Err(e) = graph.remove_node(*node) {
                    debug!("Layer node already gone: {}", e);
                }
            }
            Ok(())
        });
        if let Err(e) = result {
            debug!("Could not release layer '{}': {}", channel.track.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer() -> MixerEngine {
        let ctx = AudioContext::offline("media", 1000);
        MixerEngine::new(ctx, &MixerSettings::default())
    }

    fn track(id: &str) -> Track {
        Track::new(id, id).with_locator(format!("{}.f32", id))
    }

    fn tone() -> Arc<PcmBuffer> {
        Arc::new(PcmBuffer::sine(50.0, 0.5, 1000, 0.5))
    }

    #[test]
    fn add_is_idempotent() {
        let mut mixer = mixer();
        assert!(mixer.add_sound(track("rain")).is_some());
        assert!(mixer.add_sound(track("rain")).is_none());
        assert_eq!(mixer.len(), 1);
        assert_eq!(mixer.channels()[0].volume, 0.7);
    }

    #[test]
    fn track_without_locator_never_plays() {
        let mut mixer = mixer();
        assert!(mixer.add_sound(Track::new("hum", "Hum")).is_none());
        assert_eq!(mixer.channels()[0].status, ChannelStatus::Silent);
    }

    #[test]
    fn attached_media_loops() {
        let mut mixer = mixer();
        let request = mixer.add_sound(track("rain")).unwrap();
        assert!(mixer.attach_media(&request, Ok(tone())).unwrap());

        let channel = mixer.channel(&TrackId::new("rain")).unwrap();
        assert!(channel.is_sounding());

        // Twice the buffer length and still going.
        let ctx = mixer.context.clone();
        ctx.render(1000).unwrap();
        let source = channel.source.unwrap();
        assert!(!ctx.with_graph(|g| g.source_ended(source)).unwrap());
    }

    #[test]
    fn failed_media_keeps_the_channel() {
        let mut mixer = mixer();
        let rain = mixer.add_sound(track("rain")).unwrap();
        let fire = mixer.add_sound(track("fire")).unwrap();

        assert!(mixer
            .attach_media(&rain, Err(MediaError::Io("disk".into())))
            .is_err());
        assert!(mixer.attach_media(&fire, Ok(tone())).unwrap());

        assert_eq!(mixer.len(), 2);
        assert!(matches!(
            mixer.channel(&TrackId::new("rain")).unwrap().status,
            ChannelStatus::Failed(_)
        ));
        assert!(mixer.channel(&TrackId::new("fire")).unwrap().is_sounding());
    }

    #[test]
    fn media_for_removed_channel_is_dropped() {
        let mut mixer = mixer();
        let first = mixer.add_sound(track("rain")).unwrap();
        mixer.remove_sound(&TrackId::new("rain"));
        assert!(!mixer.attach_media(&first, Ok(tone())).unwrap());

        // A re-added layer ignores the older request too.
        let _second = mixer.add_sound(track("rain")).unwrap();
        assert!(!mixer.attach_media(&first, Ok(tone())).unwrap());
    }

    #[test]
    fn volume_is_stored_exactly_and_clamped() {
        let mut mixer = mixer();
        mixer.add_sound(track("rain"));
        let id = TrackId::new("rain");

        assert!(mixer.update_volume(&id, 0.3));
        assert_eq!(mixer.channel(&id).unwrap().volume, 0.3);
        assert_eq!(mixer.channel_gain(&id), Some(0.3));

        mixer.update_volume(&id, 1.7);
        assert_eq!(mixer.channel(&id).unwrap().volume, 1.0);
        mixer.update_volume(&id, -0.2);
        assert_eq!(mixer.channel(&id).unwrap().volume, 0.0);

        assert!(!mixer.update_volume(&TrackId::new("nope"), 0.5));
    }

    #[test]
    fn revision_follows_volume_and_readd() {
        let mut mixer = mixer();
        let id = TrackId::new("rain");
        assert!(mixer.channel_revision(&id).is_none());

        mixer.add_sound(track("rain"));
        let added = mixer.channel_revision(&id).unwrap();
        mixer.add_sound(track("rain"));
        assert_eq!(mixer.channel_revision(&id), Some(added));

        mixer.update_volume(&id, 0.4);
        let tuned = mixer.channel_revision(&id).unwrap();
        assert_ne!(tuned, added);

        mixer.remove_sound(&id);
        mixer.add_sound(track("rain"));
        let readded = mixer.channel_revision(&id).unwrap();
        assert_ne!(readded, added);
        assert_ne!(readded, tuned);
    }

    #[test]
    fn volume_change_is_ramped() {
        let mut mixer = mixer();
        mixer.add_sound(track("rain"));
        let id = TrackId::new("rain");
        mixer.update_volume(&id, 0.1);

        let gain = mixer.channel(&id).unwrap().gain.unwrap();
        let ctx = mixer.context.clone();
        ctx.resume().unwrap();
        ctx.render(25).unwrap();
        let mid = ctx.with_graph(|g| g.param_value(gain, ParamKind::Gain)).unwrap();
        assert!(mid < 0.7 && mid > 0.1, "got {}", mid);
    }

    #[test]
    fn stop_all_clears_channels_and_mood() {
        let mut mixer = mixer();
        mixer.add_sound(track("rain"));
        mixer.add_sound(track("fire"));
        mixer.set_mood(Some("cozy".into()));
        let generation = mixer.generation();

        mixer.stop_all();
        assert!(mixer.is_empty());
        assert!(mixer.mood().is_none());
        assert_eq!(mixer.generation(), generation + 1);
        assert_eq!(mixer.context.with_graph(|g| Ok(g.node_count())).unwrap(), 0);
    }

    #[test]
    fn visibility_is_independent_of_audio() {
        let mut mixer = mixer();
        mixer.add_sound(track("rain"));
        mixer.toggle_mixer();
        assert!(mixer.is_open());
        mixer.set_mixer_open(false);
        assert!(!mixer.is_open());
        assert_eq!(mixer.len(), 1);
    }

    #[test]
    fn insertion_order_is_kept() {
        let mut mixer = mixer();
        for id in ["c", "a", "b"] {
            mixer.add_sound(track(id));
        }
        let ids: Vec<_> = mixer.channel_ids().iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
