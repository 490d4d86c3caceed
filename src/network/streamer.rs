//! Simulated DSI streamer
//!
//! Accepts acquisition clients and feeds them the same packet sequence the
//! amplifier's streamer produces: sensor map and data rate events, then EEG
//! data at the configured rate with NULL padding packets interleaved.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_CHANNEL_NAMES;
use crate::protocol::{
    CodecError, EegDataPacket, Encoder, EventCode, EventPacket, NullPacket, Packet,
};

/// Streamer errors
#[derive(Error, Debug)]
pub enum StreamerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type StreamerResult<T> = Result<T, StreamerError>;

/// What the simulated streamer sends to each client
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Sensor names announced in the SENSOR_MAP event
    pub channel_names: Vec<String>,
    /// Samples per second, announced in the DATA_RATE event
    pub sample_rate: u32,
    /// Mains frequency, the first DATA_RATE field
    pub mains_frequency: u32,
    /// Stop after this many EEG packets and keep the connection idle
    pub packet_limit: Option<u64>,
    /// Send a NULL packet after every this many EEG packets (0 disables)
    pub null_interval: u64,
    /// Node id reported in events
    pub sending_node: u32,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            channel_names: DEFAULT_CHANNEL_NAMES.iter().map(|s| s.to_string()).collect(),
            sample_rate: 300,
            mains_frequency: 60,
            packet_limit: None,
            null_interval: 50,
            sending_node: 1,
        }
    }
}

/// Simulated streamer bound to a local port
pub struct Streamer {
    listener: TcpListener,
    config: Arc<StreamerConfig>,
}

impl Streamer {
    /// Bind the streamer
    pub async fn bind(addr: SocketAddr, config: StreamerConfig) -> StreamerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StreamerError::BindFailed(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!("Simulated streamer listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    /// Address the streamer is listening on
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve clients until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> StreamerResult<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::info!("New acquisition client from {}", addr);

                            let config = self.config.clone();
                            let shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, config, shutdown).await {
                                    tracing::debug!("Client {} handler ended: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Simulated streamer shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Synthetic signal: a distinct sine per sensor slot, in microvolts
fn synthetic_sample(channels: usize, t: f32) -> Vec<f32> {
    (0..channels)
        .map(|i| 10.0 * (2.0 * std::f32::consts::PI * (5.0 + i as f32) * t).sin())
        .collect()
}

fn event(encoder: &mut Encoder, code: EventCode, node: u32, message: Option<String>) -> Packet {
    Packet::Event(EventPacket::new(encoder.next_sequence(), code, node, message))
}

async fn send(
    stream: &mut TcpStream,
    encoder: &Encoder,
    buf: &mut BytesMut,
    packet: Packet,
) -> StreamerResult<()> {
    buf.clear();
    encoder.encode(&packet, buf)?;
    stream.write_all(&buf[..]).await?;
    Ok(())
}

async fn handle_client(
    mut stream: TcpStream,
    config: Arc<StreamerConfig>,
    shutdown: CancellationToken,
) -> StreamerResult<()> {
    let mut encoder = Encoder::new();
    let mut buf = BytesMut::with_capacity(1024);
    let node = config.sending_node;

    let sensor_map = config.channel_names.join(",");
    let packet = event(&mut encoder, EventCode::SensorMap, node, Some(sensor_map));
    send(&mut stream, &encoder, &mut buf, packet).await?;

    let data_rate = format!("{},{}", config.mains_frequency, config.sample_rate);
    let packet = event(&mut encoder, EventCode::DataRate, node, Some(data_rate));
    send(&mut stream, &encoder, &mut buf, packet).await?;

    let packet = event(&mut encoder, EventCode::DataStart, node, None);
    send(&mut stream, &encoder, &mut buf, packet).await?;

    let rate = config.sample_rate.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / rate as f64));
    let channels = config.channel_names.len();
    let mut sent: u64 = 0;

    loop {
        if config.packet_limit.is_some_and(|limit| sent >= limit) {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.cancelled() => return Ok(()),
        }

        let t = sent as f32 / rate as f32;
        let seq = encoder.next_sequence();
        let packet = Packet::EegData(EegDataPacket::new(seq, t, synthetic_sample(channels, t)));
        send(&mut stream, &encoder, &mut buf, packet).await?;
        sent += 1;

        if config.null_interval > 0 && sent % config.null_interval == 0 {
            let packet = Packet::Null(NullPacket::new(encoder.next_sequence()));
            send(&mut stream, &encoder, &mut buf, packet).await?;
        }
    }

    let packet = event(&mut encoder, EventCode::DataStop, node, None);
    send(&mut stream, &encoder, &mut buf, packet).await?;
    tracing::debug!("Sent {} EEG packets, idling", sent);

    // Keep the connection open and silent until the client leaves
    let mut scratch = [0u8; 64];
    loop {
        tokio::select! {
            result = stream.read(&mut scratch) => {
                if result? == 0 {
                    return Ok(());
                }
            }
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}
