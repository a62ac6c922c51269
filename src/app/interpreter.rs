//! Turns declarative mix commands into mixer state.

use crate::audio::{LoadRequest, MixerEngine};
use crate::catalog::TrackCatalog;
use aura_core::{clamp_unit, Error, MixCommand, Track, TrackId};
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;

/// A command whose ids have been looked up, in command order
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMix {
    /// Tracks to add with their requested level
    pub layers: Vec<(Track, Option<f32>)>,
    /// Ids the catalog did not know
    pub skipped: Vec<TrackId>,
    pub mood: Option<String>,
    pub open_mixer: bool,
    pub pause_focus: bool,
}

impl ResolvedMix {
    /// Line the catalog's answer up with the command. Duplicate ids keep
    /// their first entry.
    pub fn arrange(command: &MixCommand, tracks: Vec<Track>) -> Self {
        let mut seen = HashSet::new();
        let mut layers = Vec::new();
        let mut skipped = Vec::new();

        for entry in command.entries() {
            if !seen.insert(entry.id.clone()) {
                continue;
            }
            match tracks.iter().find(|t| t.id == entry.id) {
                Some(track) => layers.push((track.clone(), entry.volume)),
                None => skipped.push(entry.id.clone()),
            }
        }

        Self {
            layers,
            skipped,
            mood: command.mood.clone(),
            open_mixer: command.open_mixer,
            pause_focus: command.pause_focus,
        }
    }
}

/// Level a mix layer fades to once the stagger has passed
#[derive(Debug, Clone, PartialEq)]
pub struct PendingVolume {
    pub id: TrackId,
    /// Channel revision when the mix landed. A layer touched since keeps
    /// its own level.
    pub revision: u64,
    pub volume: f32,
}

/// Outcome of replacing the channel set
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMix {
    /// Mixer generation the volumes belong to
    pub generation: u64,
    /// Media to load for the new layers
    pub requests: Vec<LoadRequest>,
    pub volumes: Vec<PendingVolume>,
}

#[derive(Clone)]
pub struct CommandInterpreter {
    catalog: Arc<dyn TrackCatalog>,
}

impl CommandInterpreter {
    pub fn new(catalog: Arc<dyn TrackCatalog>) -> Self {
        Self { catalog }
    }

    /// Look every id up. A catalog failure rejects the whole command.
    pub async fn resolve(&self, command: &MixCommand) -> Result<ResolvedMix, Error> {
        let ids = command.ids();
        let tracks = if ids.is_empty() {
            Vec::new()
        } else {
            self.catalog.resolve(&ids).await?
        };

        let resolved = ResolvedMix::arrange(command, tracks);
        if !resolved.skipped.is_empty() {
            info!("Skipping unknown tracks: {:?}", resolved.skipped);
        }
        Ok(resolved)
    }

    /// Replace the mixer's channel set in one step. New layers start
    /// silent; their levels are returned for the caller to apply after the
    /// stagger.
    pub fn apply(resolved: &ResolvedMix, mixer: &mut MixerEngine) -> AppliedMix {
        mixer.stop_all();
        mixer.set_mood(resolved.mood.clone());
        if resolved.open_mixer {
            mixer.set_mixer_open(true);
        }

        let default_volume = mixer.default_volume();
        let mut requests = Vec::new();
        let mut volumes = Vec::new();

        for (track, volume) in &resolved.layers {
            let id = track.id.clone();
            if let Some(request) = mixer.add_sound_with_volume(track.clone(), 0.0) {
                requests.push(request);
            }
            if let Some(revision) = mixer.channel_revision(&id) {
                volumes.push(PendingVolume {
                    id,
                    revision,
                    volume: clamp_unit(volume.unwrap_or(default_volume)),
                });
            }
        }

        debug!(
            "Mix applied: {} layers, mood {:?}",
            mixer.len(),
            mixer.mood()
        );
        AppliedMix {
            generation: mixer.generation(),
            requests,
            volumes,
        }
    }

    /// Fade the layers of `applied` to their levels. Does nothing when a
    /// newer command or a clear has replaced the channel set, and skips
    /// layers whose level was set or that were re-added in the meantime.
    pub fn apply_volumes(applied_generation: u64, volumes: &[PendingVolume], mixer: &mut MixerEngine) -> bool {
        if mixer.generation() != applied_generation {
            debug!("Dropping staggered volumes for an old mix");
            return false;
        }
        for pending in volumes {
            if mixer.channel_revision(&pending.id) != Some(pending.revision) {
                debug!("Layer '{}' changed since the mix, keeping its level", pending.id);
                continue;
            }
            mixer.update_volume(&pending.id, pending.volume);
        }
        true
    }
}
