use crate::error::ConfigError;
use crate::models::{DistanceModel, SpeakerLayout, StatusReporting};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest ring a stream may use
pub const MIN_STREAM_BUFFERS: usize = 2;
/// Smallest refill block a stream may use
pub const MIN_STREAM_BUFFER_SIZE: usize = 1024;

/// Engine configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_2d_samples: usize,
    pub max_3d_samples: usize,
    pub max_streams: usize,
    pub max_timers: usize,
    /// Number of hardware buffers in each stream's ring
    pub stream_buffer_count: usize,
    /// Bytes read from disk per refill
    pub stream_buffer_size: usize,
    pub output_sample_rate: u32,
    pub preferred_device: Option<String>,
    pub distance_model: DistanceModel,
    pub status_reporting: StatusReporting,
    pub speaker_layout: SpeakerLayout,
    pub master_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_2d_samples: 64,
            max_3d_samples: 64,
            max_streams: 8,
            max_timers: 8,
            stream_buffer_count: 4,
            stream_buffer_size: 32 * 1024,
            output_sample_rate: 44100,
            preferred_device: None,
            distance_model: DistanceModel::InverseClamped,
            status_reporting: StatusReporting::Legacy,
            speaker_layout: SpeakerLayout::Stereo,
            master_volume: 1.0,
        }
    }
}

impl EngineConfig {
    /// Copy with every value forced into its usable range.
    ///
    /// The refill block is kept a multiple of 4 so a refill never splits
    /// a 16-bit stereo frame.
    pub fn validated(&self) -> Self {
        let mut config = self.clone();
        config.max_2d_samples = config.max_2d_samples.max(1);
        config.max_3d_samples = config.max_3d_samples.max(1);
        config.max_streams = config.max_streams.max(1);
        config.max_timers = config.max_timers.max(1);
        config.stream_buffer_count = config.stream_buffer_count.max(MIN_STREAM_BUFFERS);
        config.stream_buffer_size = (config.stream_buffer_size.max(MIN_STREAM_BUFFER_SIZE) / 4) * 4;
        if config.output_sample_rate == 0 {
            config.output_sample_rate = 44100;
        }
        config.master_volume = if config.master_volume.is_finite() {
            config.master_volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        config
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: EngineConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Manager backed by an explicit file; a missing file yields defaults.
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EngineConfig),
    {
        updater(&mut self.config);
        self.config = self.config.validated();
        self.save_config()
    }

    pub fn set_preferred_device(&mut self, device: Option<String>) -> Result<(), ConfigError> {
        self.config.preferred_device = device;
        self.save_config()
    }

    pub fn set_master_volume(&mut self, volume: f32) -> Result<(), ConfigError> {
        self.update_config(|config| config.master_volume = volume)
    }

    pub fn set_status_reporting(&mut self, mode: StatusReporting) -> Result<(), ConfigError> {
        self.config.status_reporting = mode;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = EngineConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("game-audio");

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&config_content)?;

        Ok(config.validated())
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}
