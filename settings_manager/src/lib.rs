//! Configuration management for the aura engine
//!
//! Settings come from `config.toml` in the user's config directory, with
//! `AURA__SECTION__KEY` environment variables layered on top.

use aura_core::Error;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Featured track transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Volume at process start
    pub default_volume: f32,
    /// Gain ramp applied on volume and mute changes
    pub volume_smoothing_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            default_volume: 0.5,
            volume_smoothing_ms: 20,
        }
    }
}

impl PlaybackSettings {
    pub fn volume_smoothing(&self) -> Duration {
        Duration::from_millis(self.volume_smoothing_ms)
    }
}

/// Background layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerSettings {
    /// Level of a freshly added layer
    pub default_channel_volume: f32,
    pub volume_smoothing_ms: u64,
    /// Delay between adding a command's layers and fading them in
    pub command_stagger_ms: u64,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            default_channel_volume: 0.7,
            volume_smoothing_ms: 50,
            command_stagger_ms: 100,
        }
    }
}

impl MixerSettings {
    pub fn volume_smoothing(&self) -> Duration {
        Duration::from_millis(self.volume_smoothing_ms)
    }

    pub fn command_stagger(&self) -> Duration {
        Duration::from_millis(self.command_stagger_ms)
    }
}

/// Binaural beat generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinauralSettings {
    /// Frequency ramp length
    pub ramp_ms: u64,
    /// Time constant of the master gain approach
    pub volume_time_constant_ms: u64,
    pub default_volume: f32,
    pub beat_min_hz: f32,
    pub beat_max_hz: f32,
    pub base_min_hz: f32,
    pub base_max_hz: f32,
}

impl Default for BinauralSettings {
    fn default() -> Self {
        Self {
            ramp_ms: 100,
            volume_time_constant_ms: 100,
            default_volume: 0.5,
            beat_min_hz: 1.0,
            beat_max_hz: 50.0,
            base_min_hz: 50.0,
            base_max_hz: 400.0,
        }
    }
}

impl BinauralSettings {
    pub fn ramp(&self) -> Duration {
        Duration::from_millis(self.ramp_ms)
    }

    pub fn volume_time_constant(&self) -> Duration {
        Duration::from_millis(self.volume_time_constant_ms)
    }
}

/// Visualizer analysis window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 64,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Preferred audio output device (empty string means system default)
    pub output_device: String,

    /// Rate used for offline rendering and requested from devices
    pub sample_rate: u32,

    /// TOML track list loaded into the catalog
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,

    /// Directory that track locators are resolved against
    pub media_root: PathBuf,

    pub playback: PlaybackSettings,
    pub mixer: MixerSettings,
    pub binaural: BinauralSettings,
    pub analyzer: AnalyzerConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            output_device: "".to_string(),
            sample_rate: aura_core::SAMPLE_RATE,
            catalog_path: None,
            media_root: PathBuf::from("media"),
            playback: PlaybackSettings::default(),
            mixer: MixerSettings::default(),
            binaural: BinauralSettings::default(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl EngineSettings {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::Config(format!("{} must be in [0, 1], got {}", name, v)))
            }
        };

        unit("playback.default_volume", self.playback.default_volume)?;
        unit("mixer.default_channel_volume", self.mixer.default_channel_volume)?;
        unit("binaural.default_volume", self.binaural.default_volume)?;

        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        let b = &self.binaural;
        if b.beat_min_hz <= 0.0 || b.beat_min_hz > b.beat_max_hz {
            return Err(Error::Config(format!(
                "invalid beat range {}..{}",
                b.beat_min_hz, b.beat_max_hz
            )));
        }
        if b.base_min_hz <= 0.0 || b.base_min_hz > b.base_max_hz {
            return Err(Error::Config(format!(
                "invalid base range {}..{}",
                b.base_min_hz, b.base_max_hz
            )));
        }
        Ok(())
    }
}

/// Configuration manager
pub struct ConfigManager {
    settings: EngineSettings,
    config_file: PathBuf,
}

impl ConfigManager {
    /// Load from the user's config directory, falling back to defaults
    pub fn new() -> Result<Self, Error> {
        let mut config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Failed to determine config directory".to_string()))?;
        config_dir.push("aura");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        Self::with_file(config_dir.join("config.toml"))
    }

    /// Create a ConfigManager over a custom file path
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_file = path.as_ref().to_path_buf();
        if !config_file.exists() {
            debug!("Config file {:?} not found, using defaults", config_file);
        }

        let settings = Self::load(&config_file)?;
        settings.validate()?;

        Ok(Self {
            settings,
            config_file,
        })
    }

    fn load(path: &Path) -> Result<EngineSettings, Error> {
        let built = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).required(false))
            .add_source(
                config::Environment::with_prefix("AURA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        built
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save settings to the config file
    pub fn save(&self) -> Result<(), Error> {
        let toml = toml::to_string_pretty(&self.settings)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.config_file.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        fs::write(&self.config_file, toml)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved config to {:?}", self.config_file);
        Ok(())
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut EngineSettings {
        &mut self.settings
    }

    pub fn into_settings(self) -> EngineSettings {
        self.settings
    }
}
