//! Configuration module
//!
//! Handles loading and saving dsidaq configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::daq::DaqConfig;
use crate::protocol::{DEFAULT_ADDRESS, DEFAULT_PORT};

/// Sensor names of the DSI-24 headset, in streamer slot order
pub const DEFAULT_CHANNEL_NAMES: [&str; 25] = [
    "P3", "C3", "F3", "Fz", "F4", "C4", "P4", "Cz", "CM", "A1", "Fp1", "Fp2", "T3", "T5", "O1",
    "O2", "X3", "X2", "F7", "F8", "X1", "A2", "T6", "T4", "TRG",
];

/// Slots carrying EEG; skips CM, X1, X2 and X3
pub const DEFAULT_EEG_CHANNELS: [usize; 21] = [
    0, 1, 2, 3, 4, 5, 6, 7, 9, 10, 11, 12, 13, 14, 15, 18, 19, 21, 22, 23, 24,
];

/// Sample rate assumed until the streamer announces one
pub const DEFAULT_SAMPLE_RATE: u32 = 300;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Streamer connection settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Montage defaults
    #[serde(default)]
    pub channels: ChannelConfig,

    /// Sample buffer settings
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Recording settings
    #[serde(default)]
    pub recording: RecordingConfig,
}

/// Streamer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Streamer host
    #[serde(default = "default_address")]
    pub address: String,
    /// Streamer port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Read timeout in ms; bounds how long stopping can take
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_read_timeout() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            read_timeout_ms: default_read_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// Montage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Sensor names used when the streamer sends no sensor map
    #[serde(default = "default_names")]
    pub names: Vec<String>,
    /// Sensor slots kept as EEG
    #[serde(default = "default_eeg_indices")]
    pub eeg_indices: Vec<usize>,
    /// Sample rate used when the streamer sends no data rate
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_names() -> Vec<String> {
    DEFAULT_CHANNEL_NAMES.iter().map(|s| s.to_string()).collect()
}

fn default_eeg_indices() -> Vec<usize> {
    DEFAULT_EEG_CHANNELS.to_vec()
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            names: default_names(),
            eeg_indices: default_eeg_indices(),
            sample_rate: default_sample_rate(),
        }
    }
}

/// Sample buffer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum buffered samples; the oldest are dropped beyond it (unbounded if not set)
    pub capacity: Option<usize>,
}

/// Recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// CSV file to record into when none is given on the command line
    pub output: Option<PathBuf>,
    /// How often the recorder drains the buffer, in ms
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output: None,
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("dsidaq/config.toml")),
            Some(PathBuf::from("./dsidaq.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check the configuration and build the session parameters from it
    pub fn daq_config(&self) -> ConfigResult<DaqConfig> {
        if self.device.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "device.read_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.channels.eeg_indices.is_empty() {
            return Err(ConfigError::Invalid(
                "channels.eeg_indices must not be empty".to_string(),
            ));
        }

        let n_names = self.channels.names.len();
        if let Some(bad) = self.channels.eeg_indices.iter().find(|&&i| i >= n_names) {
            return Err(ConfigError::Invalid(format!(
                "EEG channel index {} is out of range for {} channel names",
                bad, n_names
            )));
        }

        if self.buffer.capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "buffer.capacity must be greater than zero".to_string(),
            ));
        }

        Ok(DaqConfig {
            address: self.device.address.clone(),
            port: self.device.port,
            read_timeout: Duration::from_millis(self.device.read_timeout_ms),
            connect_timeout: Duration::from_millis(self.device.connect_timeout_ms),
            channel_names: self.channels.names.clone(),
            eeg_channels: self.channels.eeg_indices.clone(),
            sample_rate: self.channels.sample_rate,
            buffer_capacity: self.buffer.capacity,
        })
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        device: DeviceConfig {
            address: "192.168.1.20".to_string(),
            read_timeout_ms: 500,
            ..Default::default()
        },
        buffer: BufferConfig {
            capacity: Some(30 * DEFAULT_SAMPLE_RATE as usize),
        },
        recording: RecordingConfig {
            output: Some(PathBuf::from("session.csv")),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
