//! Telemetry and command archive server
//!
//! Wires configuration, logging, the engine, the three protocol
//! front-ends, the idle-flush ping loop, and an orderly shutdown drain
//! triggered by Ctrl-C or SIGTERM.

mod actor;
mod backend;
mod config;
mod engine;
mod errors;
mod expr;
mod monitor;
mod protocol;
mod table;
mod time;
mod value;

use anyhow::Result;
use config::Config;
use engine::{Engine, NullDictionaryProvider};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if config.interactive {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        None
    } else {
        let file_appender = tracing_appender::rolling::daily(&config.tmp_path, "archiver.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(non_blocking)
            .init();
        Some(guard)
    }
}

fn listen_addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::load()?;
    config.expand_paths();

    // Logging needs `tmp_path` expanded first; the guard must stay alive
    // for the process lifetime or the non-blocking writer stops flushing.
    let _log_guard = init_logging(&config);

    info!(db_engine = ?config.db_engine, "starting archiver");

    let engine = match Engine::start(config, Box::new(NullDictionaryProvider)).await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "failed to start engine");
            return Err(e.into());
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));

    let mut tasks = Vec::new();

    if engine.config.listen_port > 0 {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        let addr = listen_addr(engine.config.listen_port);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = protocol::reply_listener::serve(engine, addr, shutdown).await {
                error!(error = %e, "reply listener exited");
            }
        }));
    }

    if engine.config.cmd_port > 0 {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        let addr = listen_addr(engine.config.cmd_port);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = protocol::command_listener::serve(engine, addr, shutdown).await {
                error!(error = %e, "command listener exited");
            }
        }));
    }

    {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            protocol::hub_client::run(engine, shutdown).await;
        }));
    }

    {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            idle_flush_loop(engine, shutdown).await;
        }));
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    shutdown.store(true, Ordering::SeqCst);

    for task in tasks {
        let _ = task.await;
    }

    engine.shutdown_drain().await;
    info!("archiver stopped");
    Ok(())
}

async fn idle_flush_loop(engine: Arc<Engine>, shutdown: Arc<AtomicBool>) {
    let interval = std::time::Duration::from_secs_f64(engine.config.ping_interval.max(0.1));
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        engine.idle_flush_tick().await;
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
