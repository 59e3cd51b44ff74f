//! Reconnecting hub client
//!
//! The original archiver subscribes to an upstream message hub over a
//! plain TCP connection and feeds its byte stream through the same
//! reply-ingestion pipeline used for directly-connected clients. Connection
//! loss is expected during normal operation (hub restarts, network blips)
//! and is handled with exponential backoff rather than treated as fatal.

use crate::engine::Engine;
use crate::protocol::reply_listener::ingest_stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Runs until `shutdown` is set. Never returns an error: every failure
/// mode here is a reconnect-and-retry condition, not a process-fatal one.
pub async fn run(engine: Arc<Engine>, shutdown: Arc<AtomicBool>) {
    let host = engine.config.hub_host.clone();
    let port = engine.config.hub_port;
    if host.is_empty() || port == 0 {
        return;
    }

    let initial = engine.config.hub_initial_delay;
    let factor = engine.config.hub_delay_factor;
    let max_delay = engine.config.hub_max_delay * 3600.0;
    let mut attempt: i32 = 0;

    while !shutdown.load(Ordering::SeqCst) {
        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                info!(host = %host, port, "connected to hub");
                attempt = 0;
                if let Err(e) = ingest_stream(&engine, stream).await {
                    warn!(error = %e, "hub connection lost");
                }
            }
            Err(e) => {
                warn!(error = %e, host = %host, port, "failed to connect to hub");
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let delay = (initial * factor.powi(attempt)).min(max_delay);
        attempt += 1;
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    }
}

#[cfg(test)]
mod tests {
    /// Mirrors the literal backoff scenario: initialDelay=1, factor=2,
    /// maxDelay=10s, delays after 8 consecutive failures are
    /// 1,2,4,8,10,10,10,10.
    #[test]
    fn backoff_sequence_matches_expected_values() {
        let initial = 1.0_f64;
        let factor = 2.0_f64;
        let max_delay = 10.0_f64;
        let delays: Vec<f64> = (0..8).map(|n| (initial * factor.powi(n)).min(max_delay)).collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 8.0, 10.0, 10.0, 10.0, 10.0]);
    }
}
