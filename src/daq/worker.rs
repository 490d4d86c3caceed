//! Acquisition worker
//!
//! Decodes packets from the streamer until cancelled. The cancellation token
//! is checked once per packet or read timeout, never during a read, so
//! stopping takes at most one read timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use super::{DaqResult, Montage, SampleBuffer, SampleWriter};
use crate::network::{Connection, ConnectionError};
use crate::protocol::{EventPacket, Packet};

/// Counters reported when the worker exits
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// EEG packets forwarded to the buffer
    pub samples: u64,
    /// EEG packets with too few sensor slots
    pub skipped: u64,
    /// Events received mid-stream
    pub events: u64,
    /// NULL padding packets
    pub nulls: u64,
    /// Read timeouts with no packet
    pub timeouts: u64,
    /// Packets decoded from the connection, of any kind
    pub packets: u64,
    /// Bytes read from the connection
    pub bytes: u64,
}

/// Background loop feeding the sample buffer
pub struct Worker<S> {
    connection: Connection<S>,
    montage: Montage,
    buffer: Arc<SampleBuffer>,
    writer: Option<SampleWriter>,
    read_timeout: Duration,
    cancel: CancellationToken,
    stats: WorkerStats,
}

impl<S: AsyncRead + Unpin> Worker<S> {
    pub fn new(
        connection: Connection<S>,
        montage: Montage,
        buffer: Arc<SampleBuffer>,
        writer: Option<SampleWriter>,
        read_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection,
            montage,
            buffer,
            writer,
            read_timeout,
            cancel,
            stats: WorkerStats::default(),
        }
    }

    /// Run until cancelled or the connection fails
    ///
    /// The recording, if any, is closed on every exit path.
    pub async fn run(mut self) -> DaqResult<WorkerStats> {
        let result = self.acquire().await;
        self.stats.packets = self.connection.stats().packets_received;
        self.stats.bytes = self.connection.stats().bytes_received;

        let closed = match self.writer.take() {
            Some(writer) => writer.finish().map(|_| ()),
            None => Ok(()),
        };

        match &result {
            Ok(()) => tracing::info!("Acquisition worker stopped: {:?}", self.stats),
            Err(e) => tracing::error!("Acquisition worker failed: {}", e),
        }

        result?;
        closed?;
        Ok(self.stats)
    }

    async fn acquire(&mut self) -> DaqResult<()> {
        while !self.cancel.is_cancelled() {
            let packet = match self.connection.recv_timeout(self.read_timeout).await {
                Ok(Some(packet)) => packet,
                Ok(None) => return Err(ConnectionError::Closed.into()),
                Err(e) if e.is_transient() => {
                    self.stats.timeouts += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.dispatch(packet)?;
        }

        Ok(())
    }

    fn dispatch(&mut self, packet: Packet) -> DaqResult<()> {
        match packet {
            Packet::EegData(eeg) => {
                let Some(sample) = self.montage.select_eeg(&eeg.sensor_data) else {
                    self.stats.skipped += 1;
                    tracing::warn!(
                        "Skipping packet {}: {} sensor values",
                        eeg.header.sequence,
                        eeg.sensor_data.len()
                    );
                    return Ok(());
                };

                // Row goes to disk before the sample becomes visible to the consumer
                if let Some(writer) = self.writer.as_mut() {
                    writer.write_sample(&sample)?;
                }
                self.buffer.push(sample);
                self.stats.samples += 1;
            }
            Packet::Event(event) => {
                self.stats.events += 1;
                log_event(&event);
            }
            Packet::Null(_) => {
                self.stats.nulls += 1;
            }
        }

        Ok(())
    }
}

fn log_event(event: &EventPacket) {
    tracing::debug!(
        "Event {:?} from node {} (seq {}): {}",
        event.code,
        event.sending_node,
        event.header.sequence,
        event.message.as_deref().unwrap_or("")
    );
}
