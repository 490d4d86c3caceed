//! DAQ module - Acquisition session for the DSI headset
//!
//! Provides:
//! - The session state machine (`DaqDsi`)
//! - The background acquisition worker
//! - The sample buffer shared between worker and consumer
//! - CSV persistence of acquired samples

mod buffer;
mod montage;
mod session;
mod worker;
mod writer;

pub use buffer::*;
pub use montage::*;
pub use session::*;
pub use worker::*;
pub use writer::*;

use std::time::Duration;
use thiserror::Error;

use crate::config::{DEFAULT_CHANNEL_NAMES, DEFAULT_EEG_CHANNELS, DEFAULT_SAMPLE_RATE};
use crate::network::ConnectionError;
use crate::protocol::{DEFAULT_ADDRESS, DEFAULT_PORT};

/// One EEG sample: the EEG channel subset of one sensor reading
pub type Sample = Vec<f32>;

/// Acquisition errors
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Acquisition worker panicked: {0}")]
    WorkerPanicked(String),
}

impl DaqError {
    /// Whether the stream lost packet alignment
    pub fn is_framing(&self) -> bool {
        match self {
            DaqError::Connection(ConnectionError::Protocol(e)) => e.is_framing(),
            _ => false,
        }
    }
}

pub type DaqResult<T> = Result<T, DaqError>;

/// Session parameters, fixed for the lifetime of a session
#[derive(Debug, Clone)]
pub struct DaqConfig {
    /// Streamer host
    pub address: String,
    /// Streamer port
    pub port: u16,
    /// Read timeout; also bounds how long stopping can take
    pub read_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Sensor names used until the streamer sends a sensor map
    pub channel_names: Vec<String>,
    /// Sensor slots kept as EEG, in output order
    pub eeg_channels: Vec<usize>,
    /// Sample rate used until the streamer sends a data rate
    pub sample_rate: u32,
    /// Buffer bound; `None` keeps every sample until drained
    pub buffer_capacity: Option<usize>,
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            read_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            channel_names: DEFAULT_CHANNEL_NAMES.iter().map(|s| s.to_string()).collect(),
            eeg_channels: DEFAULT_EEG_CHANNELS.to_vec(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_capacity: None,
        }
    }
}

impl DaqConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }
}
