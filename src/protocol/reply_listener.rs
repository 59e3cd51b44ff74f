//! Reply listener and hub feed: both push bytes through the same
//! reply-ingestion pipeline, grounded on `protocol.py`'s `ReplyReceiver`.

use crate::engine::Engine;
use crate::errors::{ArchiverError, ArchiverResult};
use crate::protocol::line::LineReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Drains `stream` line by line, ingesting each one through `engine`.
/// Returns once the stream reaches EOF. Oversized lines are logged and
/// skipped rather than ending the connection.
pub async fn ingest_stream<R: AsyncRead + Unpin>(engine: &Engine, stream: R) -> ArchiverResult<()> {
    let mut reader = LineReader::new(stream);
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                if let Err(e) = engine.ingest_reply(&line).await {
                    warn!(error = %e, "failed to ingest reply line");
                }
            }
            Ok(None) => return Ok(()),
            Err(ArchiverError::Protocol { message, .. }) => {
                warn!(message = %message, "dropping oversized reply line");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Accepts reply connections on `addr` until `shutdown` is set, dispatching
/// each to its own task that feeds `ingest_stream`.
pub async fn serve(engine: Arc<Engine>, addr: SocketAddr, shutdown: Arc<AtomicBool>) -> ArchiverResult<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "reply listener bound");
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let accepted = tokio::select! {
            res = listener.accept() => Some(res),
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => None,
        };
        let Some(res) = accepted else { continue };
        let (stream, peer) = res?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = ingest_stream(&engine, stream).await {
                warn!(%peer, error = %e, "reply connection closed with error");
            }
        });
    }
    info!("reply listener stopped accepting connections");
    Ok(())
}
