//! CSV persistence of acquired samples
//!
//! File layout:
//! ```text
//! daq_type,DSI
//! sample_rate,<rate>
//! <EEG channel names>
//! <one row of EEG values per sample>
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::{DaqResult, Montage};

/// Device tag written in the first header row
pub const DAQ_TYPE: &str = "DSI";

/// Writes one acquisition to a CSV file
pub struct SampleWriter<W: Write = File> {
    writer: csv::Writer<W>,
    columns: usize,
    rows_written: u64,
}

impl SampleWriter<File> {
    /// Create the file and write the header rows
    pub fn create(path: &Path, montage: &Montage) -> DaqResult<Self> {
        tracing::info!("Recording samples to {}", path.display());
        Self::from_writer(File::create(path)?, montage)
    }
}

impl<W: Write> SampleWriter<W> {
    /// Write the header rows to `inner`
    pub fn from_writer(inner: W, montage: &Montage) -> DaqResult<Self> {
        // Header rows are shorter than sample rows
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(inner);

        let eeg_names = montage.eeg_channel_names();
        let rate = montage.sample_rate().to_string();
        writer.write_record(["daq_type", DAQ_TYPE])?;
        writer.write_record(["sample_rate", rate.as_str()])?;
        writer.write_record(&eeg_names)?;

        Ok(Self {
            writer,
            columns: eeg_names.len(),
            rows_written: 0,
        })
    }

    /// Append one sample, in header column order
    pub fn write_sample(&mut self, sample: &[f32]) -> DaqResult<()> {
        debug_assert_eq!(sample.len(), self.columns);
        self.writer.write_record(sample.iter().map(|v| v.to_string()))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and release the underlying file
    pub fn finish(mut self) -> DaqResult<W> {
        self.writer.flush()?;
        tracing::debug!("Recording closed after {} samples", self.rows_written);
        self.writer
            .into_inner()
            .map_err(|e| e.into_error().into())
    }
}
