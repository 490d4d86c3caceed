//! dsidaq - DSI EEG acquisition
//!
//! Records EEG from the DSI streamer, or stands in for it during bench tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dsidaq::config::{self, Config};
use dsidaq::network::{Streamer, StreamerConfig};
use dsidaq::protocol;
use dsidaq::DaqDsi;

/// dsidaq - DSI EEG acquisition
#[derive(Parser)]
#[command(name = "dsidaq")]
#[command(author = "dsidaq Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Acquire EEG from the DSI streamer", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire from a streamer, optionally recording to CSV
    Record {
        /// Streamer address
        #[arg(short, long)]
        address: Option<String>,

        /// Streamer port
        #[arg(short, long)]
        port: Option<u16>,

        /// CSV file to record into
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many seconds (runs until Ctrl+C otherwise)
        #[arg(short, long)]
        duration: Option<u64>,

        /// How often to drain the buffer (ms)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Run a simulated streamer
    Simulate {
        /// Port to listen on
        #[arg(short, long, default_value_t = protocol::DEFAULT_PORT)]
        port: u16,

        /// Samples per second
        #[arg(short, long, default_value_t = config::DEFAULT_SAMPLE_RATE)]
        rate: u32,

        /// Stop sending after this many EEG packets per client
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol and montage defaults
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Record {
            address,
            port,
            output,
            duration,
            interval,
        } => {
            run_record(config, address, port, output, duration, interval).await?;
        }
        Commands::Simulate { port, rate, limit } => {
            run_simulate(config, port, rate, limit).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

/// Acquire until the duration elapses or Ctrl+C
async fn run_record(
    mut config: Config,
    address: Option<String>,
    port: Option<u16>,
    output: Option<PathBuf>,
    duration: Option<u64>,
    interval: Option<u64>,
) -> anyhow::Result<()> {
    if let Some(address) = address {
        config.device.address = address;
    }
    if let Some(port) = port {
        config.device.port = port;
    }
    let output = output.or_else(|| config.recording.output.clone());
    let interval = Duration::from_millis(interval.unwrap_or(config.recording.poll_interval_ms));

    let mut daq = DaqDsi::new(config.daq_config()?);
    daq.open_device();
    daq.start_acquisition(output.as_deref()).await?;

    println!("\n========================================");
    println!("  DSI Acquisition Running");
    println!("========================================");
    println!("  Streamer: {}:{}", daq.config().address, daq.config().port);
    if let Some(version) = daq.streamer_version() {
        println!("  Version: {}", version);
    }
    println!("  Sample rate: {} Hz", daq.sample_rate());
    println!("  EEG channels: {}", daq.eeg_channel_names().join(","));
    if let Some(path) = &output {
        println!("  Recording: {}", path.display());
    }
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut last = Instant::now();
    let mut total: u64 = 0;

    let outcome = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = daq.take_worker_error().await {
                    break Err(e);
                }

                let samples = daq.get_data();
                total += samples.len() as u64;
                println!(
                    "{} samples in {:.2} s ({} total)",
                    samples.len(),
                    last.elapsed().as_secs_f64(),
                    total
                );
                last = Instant::now();

                if deadline.is_some_and(|d| Instant::now() >= d) {
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break Ok(());
            }
        }
    };

    let dropped = daq.dropped_samples();
    let stopped = daq.stop_acquisition().await;

    if dropped > 0 {
        tracing::warn!(
            "{} samples dropped by the bounded buffer (capacity {})",
            dropped,
            daq.config().buffer_capacity.unwrap_or_default()
        );
    }
    if let Some(stats) = daq.last_stats() {
        tracing::info!(
            "Received {} packets ({} bytes): {} samples, {} skipped, {} events, {} timeouts",
            stats.packets,
            stats.bytes,
            stats.samples,
            stats.skipped,
            stats.events,
            stats.timeouts
        );
    }
    daq.close_device();
    tracing::info!("Acquired {} samples", total);

    outcome?;
    stopped?;
    Ok(())
}

/// Serve a simulated streamer until Ctrl+C
async fn run_simulate(
    config: Config,
    port: u16,
    rate: u32,
    limit: Option<u64>,
) -> anyhow::Result<()> {
    let streamer_config = StreamerConfig {
        channel_names: config.channels.names.clone(),
        sample_rate: rate,
        packet_limit: limit,
        ..Default::default()
    };

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    let streamer = Streamer::bind(bind_addr, streamer_config).await?;

    println!("Simulated DSI streamer on port {} at {} Hz", port, rate);
    println!("Press Ctrl+C to stop.\n");

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(streamer.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    shutdown.cancel();
    server.await??;

    Ok(())
}

/// Print protocol and montage defaults
fn print_info() {
    let daq = DaqDsi::new(Default::default());

    println!("dsidaq Information");
    println!("==================\n");

    println!("Default streamer: {}:{}", protocol::DEFAULT_ADDRESS, protocol::DEFAULT_PORT);
    println!("Packet marker: {}", String::from_utf8_lossy(&protocol::MARKER));
    println!("Header size: {} bytes", protocol::HEADER_SIZE);
    println!("Known streamer versions: {}", protocol::KNOWN_STREAMER_VERSIONS.join(", "));

    println!("\nDefault sample rate: {} Hz", daq.sample_rate());
    println!("Channels ({}): {}", daq.n_channels(), daq.channel_names().join(","));
    println!(
        "EEG channels ({}): {}",
        daq.n_eeg_channels(),
        daq.eeg_channel_names().join(",")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["dsidaq", "info"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_record_arguments() {
        let cli = Cli::try_parse_from([
            "dsidaq", "record", "--port", "9000", "--output", "run.csv", "--duration", "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Record {
                port,
                output,
                duration,
                ..
            } => {
                assert_eq!(port, Some(9000));
                assert_eq!(output, Some(PathBuf::from("run.csv")));
                assert_eq!(duration, Some(3));
            }
            _ => panic!("Wrong command"),
        }
    }

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from(["dsidaq", "simulate"]).unwrap();
        match cli.command {
            Commands::Simulate { port, rate, limit } => {
                assert_eq!(port, 8844);
                assert_eq!(rate, 300);
                assert!(limit.is_none());
            }
            _ => panic!("Wrong command"),
        }
    }
}
