//! dsidaq - Acquisition client for the DSI EEG streamer
//!
//! Connects to the DSI streamer over TCP, decodes its binary packet stream
//! on a background task and hands EEG samples to the caller on demand.
//!
//! ```rust,no_run
//! use dsidaq::{DaqConfig, DaqDsi};
//! use std::time::Duration;
//!
//! # async fn run() -> dsidaq::DaqResult<()> {
//! let mut daq = DaqDsi::new(DaqConfig::default());
//! daq.open_device();
//! daq.start_acquisition(None).await?;
//!
//! tokio::time::sleep(Duration::from_secs(1)).await;
//! let samples = daq.get_data();
//! println!("{} samples of {} channels", samples.len(), daq.n_eeg_channels());
//!
//! daq.stop_acquisition().await?;
//! daq.close_device();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod daq;
pub mod network;
pub mod protocol;

pub use daq::{DaqConfig, DaqDsi, DaqError, DaqResult, DaqState, Sample};
