//! External collaborators: the track catalog and the interaction log.

use async_trait::async_trait;
use aura_core::{Error, InteractionEvent, Track, TrackId};
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Resolves track ids to playable records.
#[async_trait]
pub trait TrackCatalog: Send + Sync {
    /// Returns the subset of `ids` that exist. Order is not guaranteed to
    /// match the input.
    async fn resolve(&self, ids: &[TrackId]) -> Result<Vec<Track>, Error>;

    async fn get(&self, id: &TrackId) -> Result<Option<Track>, Error> {
        let mut tracks = self.resolve(std::slice::from_ref(id)).await?;
        Ok(tracks.pop())
    }
}

/// Receives `{trackId, type}` analytics records.
#[async_trait]
pub trait InteractionLogger: Send + Sync {
    async fn log(&self, event: InteractionEvent) -> Result<(), Error>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    tracks: Vec<Track>,
}

/// Catalog held in memory, usually loaded from a TOML `[[tracks]]` list
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tracks: HashMap<TrackId, Track>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let mut catalog = Self::new();
        for track in tracks {
            catalog.insert(track);
        }
        catalog
    }

    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        let file: CatalogFile =
            toml::from_str(source).map_err(|e| Error::Catalog(e.to_string()))?;
        Ok(Self::from_tracks(file.tracks))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&source)?;
        info!("Loaded {} tracks from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Later entries with the same id replace earlier ones
    pub fn insert(&mut self, track: Track) {
        self.tracks.insert(track.id.clone(), track);
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// All tracks sorted by id
    pub fn tracks(&self) -> Vec<&Track> {
        let mut tracks: Vec<_> = self.tracks.values().collect();
        tracks.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        tracks
    }
}

#[async_trait]
impl TrackCatalog for InMemoryCatalog {
    async fn resolve(&self, ids: &[TrackId]) -> Result<Vec<Track>, Error> {
        let found: Vec<Track> = self
            .tracks
            .values()
            .filter(|track| ids.contains(&track.id))
            .cloned()
            .collect();
        debug!("Resolved {} of {} ids", found.len(), ids.len());
        Ok(found)
    }
}

/// Writes interaction records to the application log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInteractionSink;

#[async_trait]
impl InteractionLogger for LoggingInteractionSink {
    async fn log(&self, event: InteractionEvent) -> Result<(), Error> {
        let record = serde_json::to_string(&event)?;
        info!("interaction {}", record);
        Ok(())
    }
}
