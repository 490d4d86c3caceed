//! Channel layout and sample rate in effect for one acquisition

use super::{DaqConfig, Sample};

/// Channel names, sample rate and EEG channel subset
#[derive(Debug, Clone, PartialEq)]
pub struct Montage {
    channel_names: Vec<String>,
    sample_rate: u32,
    eeg_channels: Vec<usize>,
}

impl Montage {
    pub fn new(channel_names: Vec<String>, sample_rate: u32, eeg_channels: Vec<usize>) -> Self {
        Self {
            channel_names,
            sample_rate,
            eeg_channels,
        }
    }

    /// The montage a session starts from before the streamer announces anything
    pub fn from_config(config: &DaqConfig) -> Self {
        Self::new(
            config.channel_names.clone(),
            config.sample_rate,
            config.eeg_channels.clone(),
        )
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn eeg_channels(&self) -> &[usize] {
        &self.eeg_channels
    }

    pub fn n_eeg_channels(&self) -> usize {
        self.eeg_channels.len()
    }

    /// Names of the EEG channels, in sample order
    pub fn eeg_channel_names(&self) -> Vec<String> {
        self.eeg_channels
            .iter()
            .map(|&i| {
                self.channel_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("Ch{}", i))
            })
            .collect()
    }

    /// Replace channel names from a SENSOR_MAP message (`P3,C3,...`)
    pub fn apply_sensor_map(&mut self, message: &str) -> bool {
        let names: Vec<String> = message.split(',').map(|s| s.trim().to_string()).collect();
        if names.iter().all(|n| n.is_empty()) {
            tracing::warn!("Ignoring empty sensor map");
            return false;
        }

        if let Some(&max) = self.eeg_channels.iter().max() {
            if max >= names.len() {
                tracing::warn!(
                    "Sensor map has {} channels but EEG slot {} is configured",
                    names.len(),
                    max
                );
            }
        }

        self.channel_names = names;
        true
    }

    /// Replace the sample rate from a DATA_RATE message (`<mains>,<rate>`)
    pub fn apply_data_rate(&mut self, message: &str) -> bool {
        match message.split(',').nth(1).map(|f| f.trim().parse::<u32>()) {
            Some(Ok(rate)) if rate > 0 => {
                self.sample_rate = rate;
                true
            }
            _ => {
                tracing::warn!("Ignoring malformed data rate message: {:?}", message);
                false
            }
        }
    }

    /// Pick the EEG channels out of a full sensor reading
    ///
    /// Returns None if the reading has fewer slots than the subset needs.
    pub fn select_eeg(&self, sensor_data: &[f32]) -> Option<Sample> {
        self.eeg_channels
            .iter()
            .map(|&i| sensor_data.get(i).copied())
            .collect()
    }
}
