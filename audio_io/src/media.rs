//! Already-decoded media consumed by buffer sources.
//!
//! The engine never decodes compressed audio. Loaders hand back interleaved
//! f32 PCM which the graph plays as-is.

use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Failure to obtain media for a locator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("media not found: {0}")]
    NotFound(String),

    #[error("media read failed: {0}")]
    Io(String),

    #[error("invalid media: {0}")]
    Invalid(String),
}

/// Interleaved PCM samples with their format
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    sample_rate: u32,
    channels: u16,
    samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Result<Self, MediaError> {
        if sample_rate == 0 {
            return Err(MediaError::Invalid("sample rate must be positive".to_string()));
        }
        if channels != 1 && channels != 2 {
            return Err(MediaError::Invalid(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        if samples.len() % channels as usize != 0 {
            return Err(MediaError::Invalid(
                "sample count is not a whole number of frames".to_string(),
            ));
        }

        Ok(Self {
            sample_rate,
            channels,
            samples,
        })
    }

    /// Mono sine tone, mostly useful for tests and demos
    pub fn sine(frequency: f32, seconds: f32, sample_rate: u32, amplitude: f32) -> Self {
        let frames = (seconds.max(0.0) * sample_rate as f32) as usize;
        let samples = (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * amplitude
            })
            .collect();

        Self {
            sample_rate: sample_rate.max(1),
            channels: 1,
            samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Stereo frame at `index`. Mono buffers feed both sides.
    pub fn frame(&self, index: usize) -> [f32; 2] {
        match self.channels {
            1 => {
                let s = self.samples.get(index).copied().unwrap_or(0.0);
                [s, s]
            }
            _ => {
                let base = index * 2;
                [
                    self.samples.get(base).copied().unwrap_or(0.0),
                    self.samples.get(base + 1).copied().unwrap_or(0.0),
                ]
            }
        }
    }
}

/// Resolves a track locator to playable PCM
pub trait MediaLoader: Send + Sync {
    fn load(&self, locator: &str) -> Result<Arc<PcmBuffer>, MediaError>;
}

/// Loader over buffers registered in memory
#[derive(Default)]
pub struct MemoryLoader {
    buffers: RwLock<HashMap<String, Arc<PcmBuffer>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, buffer: PcmBuffer) {
        if let Ok(mut buffers) = self.buffers.write() {
            buffers.insert(locator.into(), Arc::new(buffer));
        }
    }

    pub fn with_buffer(self, locator: impl Into<String>, buffer: PcmBuffer) -> Self {
        self.insert(locator, buffer);
        self
    }
}

impl MediaLoader for MemoryLoader {
    fn load(&self, locator: &str) -> Result<Arc<PcmBuffer>, MediaError> {
        let buffers = self
            .buffers
            .read()
            .map_err(|_| MediaError::Io("buffer table poisoned".to_string()))?;

        buffers
            .get(locator)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(locator.to_string()))
    }
}

/// Reads raw little-endian f32 interleaved PCM files below a root directory
pub struct RawPcmLoader {
    root: PathBuf,
    sample_rate: u32,
    channels: u16,
}

impl RawPcmLoader {
    pub fn new<P: AsRef<Path>>(root: P, sample_rate: u32, channels: u16) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            sample_rate,
            channels,
        }
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf, MediaError> {
        let relative = Path::new(locator);
        let escapes = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            return Err(MediaError::Invalid(format!(
                "locator '{}' must stay inside the media root",
                locator
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl MediaLoader for RawPcmLoader {
    fn load(&self, locator: &str) -> Result<Arc<PcmBuffer>, MediaError> {
        let path = self.resolve(locator)?;
        if !path.exists() {
            return Err(MediaError::NotFound(path.display().to_string()));
        }

        let bytes = fs::read(&path).map_err(|e| MediaError::Io(e.to_string()))?;
        if bytes.len() % 4 != 0 {
            return Err(MediaError::Invalid(format!(
                "{} is not a whole number of f32 samples",
                path.display()
            )));
        }

        let samples = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect::<Vec<_>>();

        debug!("Loaded {} samples from {:?}", samples.len(), path);
        PcmBuffer::new(self.sample_rate, self.channels, samples).map(Arc::new)
    }
}
