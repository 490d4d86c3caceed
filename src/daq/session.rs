//! DSI acquisition session
//!
//! State machine over Standby, Opened and Running. Transitions requested
//! from any other state are ignored. Callers must not run transitions
//! concurrently; `get_data` may be called at any time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    DaqConfig, DaqError, DaqResult, Montage, Sample, SampleBuffer, SampleWriter, Worker,
    WorkerStats,
};
use crate::network::{resolve_host, Connection, ConnectionError};
use crate::protocol::{EventCode, Packet};

/// Number of leading packets inspected for the sensor map and data rate
const HANDSHAKE_PACKETS: usize = 2;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaqState {
    /// Constructed or closed
    Standby,
    /// Opened, not connected
    Opened,
    /// Connected and acquiring
    Running,
}

/// Acquisition session for a DSI headset behind the DSI streamer
pub struct DaqDsi {
    config: DaqConfig,
    state: DaqState,
    /// Montage of the current or last acquisition
    montage: Montage,
    /// Streamer version, if announced during the handshake
    streamer_version: Option<String>,
    /// Recording target of the current acquisition
    persist_path: Option<PathBuf>,
    buffer: Option<Arc<SampleBuffer>>,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<DaqResult<WorkerStats>>>,
    /// Stats of the last worker that exited
    last_stats: Option<WorkerStats>,
}

impl DaqDsi {
    pub fn new(config: DaqConfig) -> Self {
        let montage = Montage::from_config(&config);

        Self {
            config,
            state: DaqState::Standby,
            montage,
            streamer_version: None,
            persist_path: None,
            buffer: None,
            cancel: None,
            worker: None,
            last_stats: None,
        }
    }

    pub fn state(&self) -> DaqState {
        self.state
    }

    pub fn config(&self) -> &DaqConfig {
        &self.config
    }

    pub fn montage(&self) -> &Montage {
        &self.montage
    }

    pub fn channel_names(&self) -> &[String] {
        self.montage.channel_names()
    }

    pub fn eeg_channel_names(&self) -> Vec<String> {
        self.montage.eeg_channel_names()
    }

    pub fn sample_rate(&self) -> u32 {
        self.montage.sample_rate()
    }

    pub fn n_channels(&self) -> usize {
        self.montage.channel_names().len()
    }

    pub fn n_eeg_channels(&self) -> usize {
        self.montage.n_eeg_channels()
    }

    pub fn streamer_version(&self) -> Option<&str> {
        self.streamer_version.as_deref()
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    pub fn last_stats(&self) -> Option<&WorkerStats> {
        self.last_stats.as_ref()
    }

    /// Samples dropped by a bounded buffer during the current acquisition
    pub fn dropped_samples(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.dropped())
    }

    /// Whether the acquisition worker is alive
    pub fn is_acquiring(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Standby -> Opened. No network activity.
    pub fn open_device(&mut self) {
        if self.state != DaqState::Standby {
            tracing::debug!("open_device ignored in state {:?}", self.state);
            return;
        }

        self.state = DaqState::Opened;
        tracing::info!("Device opened");
    }

    /// Opened -> Running
    ///
    /// Connects to the streamer, reads the sensor map and data rate from the
    /// leading packets, optionally starts a CSV recording, and spawns the
    /// acquisition worker. On error the session stays Opened.
    pub async fn start_acquisition(&mut self, persist_path: Option<&Path>) -> DaqResult<()> {
        if self.state != DaqState::Opened {
            tracing::debug!("start_acquisition ignored in state {:?}", self.state);
            return Ok(());
        }

        let addr = resolve_host(&self.config.address, self.config.port).await?;
        let mut connection = Connection::connect(addr, self.config.connect_timeout).await?;

        let mut montage = Montage::from_config(&self.config);
        let version = negotiate(&mut connection, &mut montage, self.config.read_timeout).await?;

        tracing::info!(
            "Streaming {} channels ({} EEG) at {} Hz",
            montage.channel_names().len(),
            montage.n_eeg_channels(),
            montage.sample_rate()
        );

        let writer = match persist_path {
            Some(path) => Some(SampleWriter::create(path, &montage)?),
            None => None,
        };

        let buffer = Arc::new(SampleBuffer::new(self.config.buffer_capacity));
        let cancel = CancellationToken::new();
        let worker = Worker::new(
            connection,
            montage.clone(),
            buffer.clone(),
            writer,
            self.config.read_timeout,
            cancel.clone(),
        );

        self.montage = montage;
        self.streamer_version = version;
        self.persist_path = persist_path.map(Path::to_path_buf);
        self.buffer = Some(buffer);
        self.cancel = Some(cancel);
        self.last_stats = None;
        self.state = DaqState::Running;
        self.worker = Some(tokio::spawn(worker.run()));

        tracing::info!("Acquisition started");
        Ok(())
    }

    /// Take every sample acquired since the previous call, oldest first
    ///
    /// Empty when nothing arrived or the session is not Running.
    pub fn get_data(&self) -> Vec<Sample> {
        match (&self.state, &self.buffer) {
            (DaqState::Running, Some(buffer)) => buffer.drain(),
            _ => Vec::new(),
        }
    }

    /// Report a worker failure without stopping
    ///
    /// Returns the error once if the worker has exited on its own; later
    /// calls and `stop_acquisition` will not report it again.
    pub async fn take_worker_error(&mut self) -> DaqResult<()> {
        if !self.worker.as_ref().is_some_and(|w| w.is_finished()) {
            return Ok(());
        }

        match self.worker.take() {
            Some(handle) => self.join(handle).await,
            None => Ok(()),
        }
    }

    /// Running -> Opened
    ///
    /// Signals the worker and waits for it, which takes at most one read
    /// timeout. The connection and recording are released by then. Returns
    /// the worker's failure if it had not been reported yet.
    pub async fn stop_acquisition(&mut self) -> DaqResult<()> {
        if self.state != DaqState::Running {
            tracing::debug!("stop_acquisition ignored in state {:?}", self.state);
            return Ok(());
        }

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        let result = match self.worker.take() {
            Some(handle) => self.join(handle).await,
            None => Ok(()),
        };

        self.buffer = None;
        self.persist_path = None;
        self.state = DaqState::Opened;

        tracing::info!("Acquisition stopped");
        result
    }

    /// Opened -> Standby
    pub fn close_device(&mut self) {
        if self.state != DaqState::Opened {
            tracing::debug!("close_device ignored in state {:?}", self.state);
            return;
        }

        self.buffer = None;
        self.worker = None;
        self.cancel = None;
        self.montage = Montage::from_config(&self.config);
        self.streamer_version = None;
        self.state = DaqState::Standby;
        tracing::info!("Device closed");
    }

    async fn join(&mut self, handle: JoinHandle<DaqResult<WorkerStats>>) -> DaqResult<()> {
        match handle.await {
            Ok(Ok(stats)) => {
                self.last_stats = Some(stats);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(e) => Err(DaqError::WorkerPanicked(e.to_string())),
        }
    }
}

impl Drop for DaqDsi {
    fn drop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

/// Read the leading packets for the sensor map, data rate and version
///
/// Anything missing keeps the montage defaults. A read timeout ends the
/// handshake early without error.
async fn negotiate<S: AsyncRead + Unpin>(
    connection: &mut Connection<S>,
    montage: &mut Montage,
    read_timeout: Duration,
) -> DaqResult<Option<String>> {
    let mut version = None;

    for _ in 0..HANDSHAKE_PACKETS {
        let packet = match connection.recv_timeout(read_timeout).await {
            Ok(Some(packet)) => packet,
            Ok(None) => return Err(ConnectionError::Closed.into()),
            Err(e) if e.is_transient() => {
                tracing::warn!("No configuration packets from streamer, using defaults");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let kind = packet.packet_type();
        let Packet::Event(event) = packet else {
            tracing::debug!("Discarding {:?} packet during handshake", kind);
            continue;
        };

        match (event.code, event.message.as_deref()) {
            (EventCode::SensorMap, Some(message)) => {
                montage.apply_sensor_map(message);
            }
            (EventCode::DataRate, Some(message)) => {
                montage.apply_data_rate(message);
            }
            (EventCode::Version, Some(message)) => {
                tracing::info!("Streamer version: {}", message);
                version = Some(message.to_string());
            }
            (code, _) => {
                tracing::debug!("Ignoring {:?} event during handshake", code);
            }
        }
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Streamer, StreamerConfig};
    use crate::protocol::{EegDataPacket, Encoder, EventPacket};
    use bytes::BytesMut;
    use std::net::SocketAddr;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const READ_TIMEOUT: Duration = Duration::from_millis(100);

    fn encode_all(packets: &[Packet]) -> Vec<u8> {
        let encoder = Encoder::new();
        let mut buf = BytesMut::new();
        for packet in packets {
            encoder.encode(packet, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    /// Serve one client: send `bytes`, then stay silent until it disconnects
    async fn scripted_streamer(bytes: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&bytes).await.unwrap();
            let mut scratch = [0u8; 16];
            while let Ok(n) = stream.read(&mut scratch).await {
                if n == 0 {
                    break;
                }
            }
        });

        addr
    }

    fn session(addr: SocketAddr) -> DaqDsi {
        DaqDsi::new(
            DaqConfig::new(addr.ip().to_string(), addr.port()).with_read_timeout(READ_TIMEOUT),
        )
    }

    fn handshake(names: &[String], rate: u32) -> Vec<Packet> {
        vec![
            Packet::Event(EventPacket::new(0, EventCode::SensorMap, 1, Some(names.join(",")))),
            Packet::Event(EventPacket::new(1, EventCode::DataRate, 1, Some(format!("60,{}", rate)))),
        ]
    }

    fn reading(seq: u32) -> Vec<f32> {
        (0..25).map(|c| (seq * 100 + c) as f32).collect()
    }

    async fn collect(daq: &DaqDsi, n: usize) -> Vec<Sample> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut samples = Vec::new();
        while samples.len() < n && Instant::now() < deadline {
            samples.extend(daq.get_data());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        samples
    }

    #[tokio::test]
    async fn test_handshake_accepts_reversed_order() {
        let names: Vec<String> = (0..25).map(|i| format!("S{}", i)).collect();
        let mut packets = handshake(&names, 500);
        packets.reverse();
        packets.push(Packet::EegData(EegDataPacket::new(2, 0.0, reading(2))));
        let mock = tokio_test::io::Builder::new()
            .read(&encode_all(&packets))
            .build();

        let mut connection = Connection::new(mock);
        let mut montage = Montage::from_config(&DaqConfig::default());
        let version = negotiate(&mut connection, &mut montage, READ_TIMEOUT)
            .await
            .unwrap();

        assert!(version.is_none());
        assert_eq!(montage.sample_rate(), 500);
        assert_eq!(montage.channel_names(), &names[..]);

        // Only the two handshake slots are consumed
        let next = connection.recv().await.unwrap().unwrap();
        assert_eq!(next.packet_type(), crate::protocol::PacketType::EegData);
        assert_eq!(next.sequence(), 2);
    }

    #[tokio::test]
    async fn test_out_of_state_calls_are_noops() {
        let mut daq = session("127.0.0.1:1".parse().unwrap());
        assert_eq!(daq.state(), DaqState::Standby);

        daq.start_acquisition(None).await.unwrap();
        assert_eq!(daq.state(), DaqState::Standby);
        daq.stop_acquisition().await.unwrap();
        daq.close_device();
        assert_eq!(daq.state(), DaqState::Standby);
        assert!(daq.get_data().is_empty());

        daq.open_device();
        daq.open_device();
        assert_eq!(daq.state(), DaqState::Opened);
        daq.stop_acquisition().await.unwrap();
        assert_eq!(daq.state(), DaqState::Opened);
        assert!(daq.get_data().is_empty());
    }

    #[tokio::test]
    async fn test_samples_arrive_filtered_and_in_order() {
        let names: Vec<String> = (0..25).map(|i| format!("S{}", i)).collect();
        let mut packets = handshake(&names, 500);
        for seq in 2..12 {
            packets.push(Packet::EegData(EegDataPacket::new(seq, 0.0, reading(seq))));
        }
        let addr = scripted_streamer(encode_all(&packets)).await;

        let mut daq = session(addr);
        daq.open_device();
        daq.start_acquisition(None).await.unwrap();
        assert_eq!(daq.state(), DaqState::Running);
        assert_eq!(daq.sample_rate(), 500);
        assert_eq!(daq.channel_names(), names.as_slice());
        assert_eq!(daq.eeg_channel_names()[8], "S9");

        let samples = collect(&daq, 10).await;
        assert_eq!(samples.len(), 10);
        for (i, sample) in samples.iter().enumerate() {
            let seq = i as u32 + 2;
            let expected = daq.montage().select_eeg(&reading(seq)).unwrap();
            assert_eq!(sample.len(), 21);
            assert_eq!(sample, &expected);
        }
        assert!(daq.get_data().is_empty());

        daq.stop_acquisition().await.unwrap();
        assert_eq!(daq.state(), DaqState::Opened);
        assert_eq!(daq.last_stats().map(|s| s.samples), Some(10));
        assert!(daq.get_data().is_empty());
    }

    #[tokio::test]
    async fn test_missing_handshake_keeps_defaults() {
        let packets: Vec<Packet> = (0..3)
            .map(|seq| Packet::EegData(EegDataPacket::new(seq, 0.0, reading(seq))))
            .collect();
        let addr = scripted_streamer(encode_all(&packets)).await;

        let mut daq = session(addr);
        daq.open_device();
        daq.start_acquisition(None).await.unwrap();
        assert_eq!(daq.sample_rate(), 300);
        assert_eq!(daq.channel_names()[0], "P3");

        // The two leading packets were consumed by the handshake
        let samples = collect(&daq, 1).await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0][0], 200.0);

        daq.stop_acquisition().await.unwrap();
    }

    #[tokio::test]
    async fn test_version_event_is_recorded() {
        let packets = vec![
            Packet::Event(EventPacket::new(
                0,
                EventCode::Version,
                1,
                Some("DSI-Streamer-v.0.7.28".into()),
            )),
            Packet::Event(EventPacket::new(1, EventCode::DataRate, 1, Some("50,600".into()))),
        ];
        let addr = scripted_streamer(encode_all(&packets)).await;

        let mut daq = session(addr);
        daq.open_device();
        daq.start_acquisition(None).await.unwrap();
        assert_eq!(daq.streamer_version(), Some("DSI-Streamer-v.0.7.28"));
        assert_eq!(daq.sample_rate(), 600);
        assert_eq!(daq.n_channels(), 25);

        daq.stop_acquisition().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_returns_within_read_timeout() {
        let names: Vec<String> = (0..25).map(|i| format!("S{}", i)).collect();
        let addr = scripted_streamer(encode_all(&handshake(&names, 300))).await;

        let mut daq = session(addr);
        daq.open_device();
        daq.start_acquisition(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(daq.is_acquiring());

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(2), daq.stop_acquisition())
            .await
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < READ_TIMEOUT * 5);
        assert_eq!(daq.state(), DaqState::Opened);
        assert!(!daq.is_acquiring());
        assert!(daq.last_stats().unwrap().timeouts >= 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle_returns_to_fresh_state() {
        let config = StreamerConfig {
            channel_names: (0..25).map(|i| format!("E{}", i)).collect(),
            sample_rate: 1000,
            ..Default::default()
        };
        let streamer = Streamer::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap();
        let addr = streamer.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(streamer.run(shutdown.clone()));

        let mut daq = session(addr);
        let fresh = session(addr);

        for _ in 0..2 {
            daq.open_device();
            daq.start_acquisition(None).await.unwrap();
            assert_eq!(daq.sample_rate(), 1000);
            assert!(!collect(&daq, 5).await.is_empty());
            daq.stop_acquisition().await.unwrap();
            daq.close_device();
            assert_eq!(daq.state(), DaqState::Standby);
        }

        daq.open_device();
        assert_eq!(daq.state(), DaqState::Opened);
        assert_eq!(daq.montage(), fresh.montage());
        assert!(daq.streamer_version().is_none());
        assert!(daq.get_data().is_empty());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_recording_matches_session_montage() {
        let names: Vec<String> = (0..25).map(|i| format!("S{}", i)).collect();
        let mut packets = handshake(&names, 500);
        for seq in 2..5 {
            packets.push(Packet::EegData(EegDataPacket::new(seq, 0.0, reading(seq))));
        }
        let addr = scripted_streamer(encode_all(&packets)).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.csv");

        let mut daq = session(addr);
        daq.open_device();
        daq.start_acquisition(Some(&path)).await.unwrap();
        assert_eq!(daq.persist_path(), Some(path.as_path()));

        let samples = collect(&daq, 3).await;
        assert_eq!(samples.len(), 3);
        daq.stop_acquisition().await.unwrap();
        assert!(daq.persist_path().is_none());

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].iter().collect::<Vec<_>>(), vec!["daq_type", "DSI"]);
        assert_eq!(rows[1].iter().collect::<Vec<_>>(), vec!["sample_rate", "500"]);
        let header: Vec<String> = rows[2].iter().map(String::from).collect();
        assert_eq!(header, daq.eeg_channel_names());

        for (row, sample) in rows[3..].iter().zip(&samples) {
            let values: Vec<f32> = row.iter().map(|v| v.parse().unwrap()).collect();
            assert_eq!(&values, sample);
        }
    }

    #[tokio::test]
    async fn test_worker_failure_is_reported_by_stop() {
        let names: Vec<String> = (0..25).map(|i| format!("S{}", i)).collect();
        let mut bytes = encode_all(&handshake(&names, 300));
        let eeg = Packet::EegData(EegDataPacket::new(2, 0.0, reading(2)));
        bytes.extend_from_slice(&encode_all(&[eeg]));
        bytes.extend_from_slice(b"#ABCD\x01\x00\x0b\x00\x00\x00\x03");
        let addr = scripted_streamer(bytes).await;

        let mut daq = session(addr);
        daq.open_device();
        daq.start_acquisition(None).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while daq.is_acquiring() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!daq.is_acquiring());
        assert_eq!(daq.state(), DaqState::Running);
        assert_eq!(daq.get_data().len(), 1);

        let err = daq.stop_acquisition().await.unwrap_err();
        assert!(err.is_framing());
        assert_eq!(daq.state(), DaqState::Opened);

        // Reported once
        daq.stop_acquisition().await.unwrap();
    }

    #[tokio::test]
    async fn test_take_worker_error_then_stop() {
        let names: Vec<String> = (0..25).map(|i| format!("S{}", i)).collect();
        let mut bytes = encode_all(&handshake(&names, 300));
        bytes.extend_from_slice(b"@ABCD\x07\x00\x00\x00\x00\x00\x02");
        let addr = scripted_streamer(bytes).await;

        let mut daq = session(addr);
        daq.open_device();
        daq.start_acquisition(None).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while daq.is_acquiring() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = daq.take_worker_error().await.unwrap_err();
        assert!(err.is_framing());
        daq.take_worker_error().await.unwrap();
        daq.stop_acquisition().await.unwrap();
        assert_eq!(daq.state(), DaqState::Opened);
    }

    #[tokio::test]
    async fn test_connection_refused_stays_opened() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut daq = session(addr);
        daq.open_device();
        let err = daq.start_acquisition(None).await.unwrap_err();
        assert!(matches!(err, DaqError::Connection(ConnectionError::Io(_))));
        assert_eq!(daq.state(), DaqState::Opened);
        assert!(daq.get_data().is_empty());
    }

    #[tokio::test]
    async fn test_persist_path_error_leaves_session_opened() {
        let names: Vec<String> = (0..25).map(|i| format!("S{}", i)).collect();
        let addr = scripted_streamer(encode_all(&handshake(&names, 300))).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.csv");

        let mut daq = session(addr);
        daq.open_device();
        assert!(daq.start_acquisition(Some(&path)).await.is_err());
        assert_eq!(daq.state(), DaqState::Opened);
    }
}
