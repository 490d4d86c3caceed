//! Network module - TCP transport to the DSI streamer
//!
//! Provides:
//! - Packet-level connection to a streamer
//! - A simulated streamer for bench testing without an amplifier

mod connection;
mod streamer;

pub use connection::*;
pub use streamer::*;

use std::net::SocketAddr;

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
