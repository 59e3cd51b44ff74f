//! Configuration loading for the archiver
//!
//! Four layers, lowest precedence first: built-in defaults, an optional
//! TOML config file, environment variables (`ARCHIVER_*`), and CLI flags.
//! CLI overrides env overrides file overrides default.

use crate::errors::{ArchiverError, ArchiverResult};
use clap::Parser;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEngine {
    Postgres,
    Mysql,
    None,
}

impl std::str::FromStr for DbEngine {
    type Err = ArchiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(DbEngine::Postgres),
            "mysql" => Ok(DbEngine::Mysql),
            "none" => Ok(DbEngine::None),
            other => Err(ArchiverError::config(format!(
                "dbEngine must be one of postgres, mysql, none, got {other}"
            ))),
        }
    }
}

/// Command-line flags, one per recognized configuration option. Any flag
/// left unset falls through to the environment, then the config file,
/// then the built-in default (applied in `Config::resolve`).
#[derive(Parser, Debug, Default)]
#[command(name = "archiver", about = "Telemetry and command archive server", version)]
struct Args {
    #[arg(long)]
    config: Option<String>,
    #[arg(short, long)]
    interactive: bool,
    #[arg(long = "tmp-path")]
    tmp_path: Option<String>,
    #[arg(long = "listen-path")]
    listen_path: Option<String>,
    #[arg(long = "cmd-path")]
    cmd_path: Option<String>,
    #[arg(long = "db-engine")]
    db_engine: Option<String>,
    #[arg(long = "db-host")]
    db_host: Option<String>,
    #[arg(long = "db-user")]
    db_user: Option<String>,
    #[arg(long = "db-password")]
    db_password: Option<String>,
    #[arg(long = "db-name")]
    db_name: Option<String>,
    #[arg(long = "ping-interval")]
    ping_interval: Option<f64>,
    #[arg(long = "listen-port")]
    listen_port: Option<u16>,
    #[arg(long = "cmd-port")]
    cmd_port: Option<u16>,
    #[arg(long = "http-port")]
    http_port: Option<u16>,
    #[arg(long = "hub-host")]
    hub_host: Option<String>,
    #[arg(long = "hub-port")]
    hub_port: Option<u16>,
    #[arg(long = "raw-buffer-size")]
    raw_buffer_size: Option<usize>,
    #[arg(long = "hdr-buffer-size")]
    hdr_buffer_size: Option<usize>,
    #[arg(long = "key-buffer-size")]
    key_buffer_size: Option<usize>,
    #[arg(long = "trace-list")]
    trace_list: Option<String>,
    #[arg(long = "idle-time")]
    idle_time: Option<f64>,
    #[arg(long = "hub-initial-delay")]
    hub_initial_delay: Option<f64>,
    #[arg(long = "hub-delay-factor")]
    hub_delay_factor: Option<f64>,
    #[arg(long = "hub-max-delay")]
    hub_max_delay: Option<f64>,
    #[arg(long = "system-clock")]
    system_clock: Option<String>,
}

/// Values loaded straight out of an optional `--config <path>` TOML file.
/// Every field is optional; absent fields fall through to env/default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    interactive: Option<bool>,
    tmp_path: Option<String>,
    listen_path: Option<String>,
    cmd_path: Option<String>,
    db_engine: Option<String>,
    db_host: Option<String>,
    db_user: Option<String>,
    db_password: Option<String>,
    db_name: Option<String>,
    ping_interval: Option<f64>,
    listen_port: Option<u16>,
    cmd_port: Option<u16>,
    http_port: Option<u16>,
    hub_host: Option<String>,
    hub_port: Option<u16>,
    raw_buffer_size: Option<usize>,
    hdr_buffer_size: Option<usize>,
    key_buffer_size: Option<usize>,
    trace_list: Option<String>,
    idle_time: Option<f64>,
    hub_initial_delay: Option<f64>,
    hub_delay_factor: Option<f64>,
    hub_max_delay: Option<f64>,
    system_clock: Option<String>,
}

/// Fully resolved configuration for one server run.
#[derive(Debug, Clone)]
pub struct Config {
    pub interactive: bool,
    pub tmp_path: String,
    pub listen_path: String,
    pub cmd_path: String,
    pub db_engine: DbEngine,
    pub db_host: String,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub ping_interval: f64,
    pub listen_port: u16,
    pub cmd_port: u16,
    pub http_port: u16,
    pub hub_host: String,
    pub hub_port: u16,
    pub raw_buffer_size: usize,
    pub hdr_buffer_size: usize,
    pub key_buffer_size: usize,
    pub trace_list: Vec<String>,
    pub idle_time: f64,
    pub hub_initial_delay: f64,
    pub hub_delay_factor: f64,
    pub hub_max_delay: f64,
    pub system_clock: String,
}

fn env_str(name: &str) -> Option<String> {
    env::var(format!("ARCHIVER_{name}")).ok()
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|s| s.parse().ok())
}

macro_rules! resolve {
    ($args:expr, $file:expr, $env_name:expr, $field:ident, $default:expr) => {
        $args
            .$field
            .clone()
            .or_else(|| env_str($env_name))
            .or_else(|| $file.$field.clone().map(|v| v.to_string()))
            .unwrap_or_else(|| $default.to_string())
    };
}

impl Config {
    /// Loads configuration from CLI args (including `--config`), then env,
    /// then the config file, then defaults, per the precedence above.
    pub fn load() -> ArchiverResult<Self> {
        let args = Args::parse();
        Self::from_args(args)
    }

    fn from_args(args: Args) -> ArchiverResult<Self> {
        let config_path = args.config.clone().unwrap_or_else(|| "archiver.toml".to_string());
        let file: FileConfig = if std::path::Path::new(&config_path).exists() {
            let text = std::fs::read_to_string(&config_path)
                .map_err(|e| ArchiverError::config(format!("reading {config_path}: {e}")))?;
            toml::from_str(&text)
                .map_err(|e| ArchiverError::config(format!("parsing {config_path}: {e}")))?
        } else {
            FileConfig::default()
        };

        let interactive = args.interactive
            || env_parsed("INTERACTIVE").unwrap_or(false)
            || file.interactive.unwrap_or(false);

        let tmp_path = args
            .tmp_path
            .clone()
            .or_else(|| env_str("TMP_PATH"))
            .or(file.tmp_path.clone())
            .unwrap_or_else(|| "archiver-PID".to_string());
        let listen_path = args
            .listen_path
            .clone()
            .or_else(|| env_str("LISTEN_PATH"))
            .or(file.listen_path.clone())
            .unwrap_or_default();
        let cmd_path = args
            .cmd_path
            .clone()
            .or_else(|| env_str("CMD_PATH"))
            .or(file.cmd_path.clone())
            .unwrap_or_default();

        let db_engine_str = args
            .db_engine
            .clone()
            .or_else(|| env_str("DB_ENGINE"))
            .or(file.db_engine.clone())
            .unwrap_or_else(|| "none".to_string());
        let db_engine: DbEngine = db_engine_str.parse()?;

        let db_host = resolve!(args, file, "DB_HOST", db_host, "localhost");
        let db_user = resolve!(args, file, "DB_USER", db_user, "archiver");
        let db_password = resolve!(args, file, "DB_PASSWORD", db_password, "");
        let db_name = resolve!(args, file, "DB_NAME", db_name, "archiver");

        let ping_interval = args
            .ping_interval
            .or_else(|| env_parsed("PING_INTERVAL"))
            .or(file.ping_interval)
            .unwrap_or(60.0);
        let listen_port = args
            .listen_port
            .or_else(|| env_parsed("LISTEN_PORT"))
            .or(file.listen_port)
            .unwrap_or(0);
        let cmd_port = args
            .cmd_port
            .or_else(|| env_parsed("CMD_PORT"))
            .or(file.cmd_port)
            .unwrap_or(0);
        let http_port = args
            .http_port
            .or_else(|| env_parsed("HTTP_PORT"))
            .or(file.http_port)
            .unwrap_or(0);
        let hub_host = resolve!(args, file, "HUB_HOST", hub_host, "");
        let hub_port = args
            .hub_port
            .or_else(|| env_parsed("HUB_PORT"))
            .or(file.hub_port)
            .unwrap_or(0);

        let raw_buffer_size = args
            .raw_buffer_size
            .or_else(|| env_parsed("RAW_BUFFER_SIZE"))
            .or(file.raw_buffer_size)
            .unwrap_or(10);
        let hdr_buffer_size = args
            .hdr_buffer_size
            .or_else(|| env_parsed("HDR_BUFFER_SIZE"))
            .or(file.hdr_buffer_size)
            .unwrap_or(10);
        let key_buffer_size = args
            .key_buffer_size
            .or_else(|| env_parsed("KEY_BUFFER_SIZE"))
            .or(file.key_buffer_size)
            .unwrap_or(10);

        let trace_list_str = resolve!(args, file, "TRACE_LIST", trace_list, "");
        let trace_list = trace_list_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let idle_time = args
            .idle_time
            .or_else(|| env_parsed("IDLE_TIME"))
            .or(file.idle_time)
            .unwrap_or(300.0);
        let hub_initial_delay = args
            .hub_initial_delay
            .or_else(|| env_parsed("HUB_INITIAL_DELAY"))
            .or(file.hub_initial_delay)
            .unwrap_or(1.0);
        let hub_delay_factor = args
            .hub_delay_factor
            .or_else(|| env_parsed("HUB_DELAY_FACTOR"))
            .or(file.hub_delay_factor)
            .unwrap_or(2.0);
        let hub_max_delay = args
            .hub_max_delay
            .or_else(|| env_parsed("HUB_MAX_DELAY"))
            .or(file.hub_max_delay)
            .unwrap_or(1.0);
        let system_clock = resolve!(args, file, "SYSTEM_CLOCK", system_clock, "UTC");

        let cfg = Config {
            interactive,
            tmp_path,
            listen_path,
            cmd_path,
            db_engine,
            db_host,
            db_user,
            db_password,
            db_name,
            ping_interval,
            listen_port,
            cmd_port,
            http_port,
            hub_host,
            hub_port,
            raw_buffer_size,
            hdr_buffer_size,
            key_buffer_size,
            trace_list,
            idle_time,
            hub_initial_delay,
            hub_delay_factor,
            hub_max_delay,
            system_clock,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> ArchiverResult<()> {
        if self.hub_port > 0 && self.hub_host.trim().is_empty() {
            return Err(ArchiverError::config("hubPort set without hubHost"));
        }
        self.system_clock.parse::<crate::time::SystemClock>()?;
        Ok(())
    }

    /// Expands `$VAR` segments against the process environment and
    /// substitutes a `PID` literal in `tmp_path` with the current PID.
    pub fn expand_paths(&mut self) {
        self.tmp_path = expand_env_path(&self.tmp_path);
        self.listen_path = expand_env_path(&self.listen_path);
        self.cmd_path = expand_env_path(&self.cmd_path);
        if self.tmp_path.contains("PID") {
            self.tmp_path = self.tmp_path.replace("PID", &std::process::id().to_string());
        }
    }

    pub fn system_clock(&self) -> crate::time::SystemClock {
        self.system_clock.parse().expect("validated at load time")
    }
}

fn expand_env_path(path: &str) -> String {
    if path.is_empty() {
        return path.to_string();
    }
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix('$') {
                env::var(name).unwrap_or_else(|_| segment.to_string())
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
impl Config {
    /// Minimal valid configuration for unit tests that need a `Config`
    /// but exercise no database connectivity.
    pub fn for_test() -> Self {
        Config {
            interactive: true,
            tmp_path: "/tmp".into(),
            listen_path: String::new(),
            cmd_path: String::new(),
            db_engine: DbEngine::None,
            db_host: String::new(),
            db_user: String::new(),
            db_password: String::new(),
            db_name: String::new(),
            ping_interval: 60.0,
            listen_port: 0,
            cmd_port: 0,
            http_port: 0,
            hub_host: String::new(),
            hub_port: 0,
            raw_buffer_size: 10,
            hdr_buffer_size: 10,
            key_buffer_size: 10,
            trace_list: vec![],
            idle_time: 300.0,
            hub_initial_delay: 1.0,
            hub_delay_factor: 2.0,
            hub_max_delay: 1.0,
            system_clock: "UTC".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_path_substitutes_vars() {
        env::set_var("ARCHIVER_TEST_DIR", "/srv/archiver");
        assert_eq!(expand_env_path("$ARCHIVER_TEST_DIR/logs"), "/srv/archiver/logs");
        env::remove_var("ARCHIVER_TEST_DIR");
    }

    #[test]
    fn pid_literal_is_replaced() {
        let mut cfg_args = Args {
            tmp_path: Some("archiver-PID".to_string()),
            ..Default::default()
        };
        cfg_args.db_engine = Some("none".to_string());
        let mut cfg = Config::from_args(cfg_args).expect("valid config");
        cfg.expand_paths();
        assert!(!cfg.tmp_path.contains("PID"));
        assert!(cfg.tmp_path.starts_with("archiver-"));
    }

    #[test]
    fn hub_port_without_host_is_rejected() {
        let mut args = Args::default();
        args.db_engine = Some("none".to_string());
        args.hub_port = Some(1000);
        assert!(Config::from_args(args).is_err());
    }
}
