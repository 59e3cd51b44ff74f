//! Command listener: `monitor info/create/drop`, `subscribe`, `flush`
//!
//! Grounded on `protocol.py`'s `CommandReceiver`: a recognized command
//! always gets a trailing `ok` line, even when its handler replied with an
//! error describing why the operation itself failed (matching the
//! original, which sends `ok` unconditionally once the grammar matched).
//! A line that matches no command gets `unknown command` and no `ok`.

use crate::engine::Engine;
use crate::errors::{ArchiverError, ArchiverResult};
use crate::protocol::line::{tokenize, LineReader};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{info, warn};

async fn dispatch(engine: &Engine, line: &str) -> Vec<String> {
    let tokens = tokenize(line);
    let t: Vec<&str> = tokens.iter().map(|s| s.as_str()).collect();
    match t.as_slice() {
        ["monitor", "info"] => {
            let mut out = Vec::new();
            let info = engine.monitor_info().await;
            for m in &info {
                out.push(format!("{} = {}", m.name, m.expr));
                out.push(format!("  Subscribers: {}", m.subscriber_count));
                if let Some(help) = &m.help {
                    out.push(format!("  Description: {help}"));
                }
            }
            out.push(format!("Monitoring {} expression(s)", info.len()));
            let subs = engine.subscriber_info().await;
            for s in &subs {
                out.push(format!(
                    "Subscriber {} follows {} with timeout {:.0} (last flush {:.0}s ago)",
                    s.id, s.monitor_name, s.timeout_secs, s.age_secs
                ));
            }
            out.push(format!("Current subscribers: {}", subs.len()));
            out.push("ok".to_string());
            out
        }
        ["monitor", "create", name, expr, help @ ..] => {
            let help_text = if help.is_empty() { None } else { Some(help.join(" ")) };
            match engine.create_monitor(name, expr, help_text).await {
                Ok(()) => vec!["ok".to_string()],
                Err(e) => vec![e.to_string(), "ok".to_string()],
            }
        }
        ["monitor", "drop", name] => match engine.drop_monitor(name).await {
            Ok(()) => vec!["ok".to_string()],
            Err(e) => vec![e.to_string(), "ok".to_string()],
        },
        ["subscribe", name, rest @ ..] => {
            let timeout = rest.first().and_then(|s| s.parse::<f64>().ok());
            let history = rest.get(1).and_then(|s| s.parse::<f64>().ok());
            match engine.subscribe(name, timeout, history).await {
                Ok(id) => vec![format!("Created subscriber id {id}"), "ok".to_string()],
                Err(e) => vec![e.to_string(), "ok".to_string()],
            }
        }
        ["flush", id] => match engine.flush_subscription(id).await {
            Ok(rows) => {
                let mut out: Vec<String> = rows.iter().map(|(tai, v)| format!("({tai}, {v})")).collect();
                out.push(format!("Flush contained {} row(s)", rows.len()));
                out.push("ok".to_string());
                out
            }
            Err(e) => vec![e.to_string(), "ok".to_string()],
        },
        _ => vec!["unknown command".to_string()],
    }
}

async fn handle_connection(engine: Arc<Engine>, stream: tokio::net::TcpStream) -> ArchiverResult<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = LineReader::new(read_half);
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                let response = dispatch(&engine, &line).await;
                for out_line in response {
                    write_half.write_all(out_line.as_bytes()).await?;
                    write_half.write_all(b"\n").await?;
                }
            }
            Ok(None) => return Ok(()),
            Err(ArchiverError::Protocol { message, .. }) => {
                let line = format!("Parse error: {message}\n");
                write_half.write_all(line.as_bytes()).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn serve(engine: Arc<Engine>, addr: SocketAddr, shutdown: Arc<AtomicBool>) -> ArchiverResult<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "command listener bound");
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
            if let Err(e) = handle_connection(engine, stream).await {
                warn!(%peer, error = %e, "command connection closed with error");
            }
        });
    }
    info!("command listener stopped accepting connections");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::DictionaryProvider;
    use crate::config::Config;
    use crate::engine::NullDictionaryProvider;

    async fn test_engine() -> Engine {
        static COUNTER: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut config = Config::for_test();
        config.tmp_path = std::env::temp_dir()
            .join(format!("archiver-cmdtest-{}-{n}", std::process::id()))
            .to_string_lossy()
            .to_string();
        Engine::start(config, Box::new(NullDictionaryProvider) as Box<dyn DictionaryProvider>)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_command_gets_no_ok_line() {
        let engine = test_engine().await;
        let response = dispatch(&engine, "nonsense here").await;
        assert_eq!(response, vec!["unknown command".to_string()]);
    }

    #[tokio::test]
    async fn monitor_create_then_info_reports_it() {
        let engine = test_engine().await;
        let response = dispatch(&engine, r#"monitor create m "1 + 1""#).await;
        assert_eq!(response, vec!["ok".to_string()]);
        let response = dispatch(&engine, "monitor info").await;
        assert!(response.iter().any(|l| l.contains("1 + 1")));
        assert_eq!(response.last().unwrap(), "ok");
    }
}
