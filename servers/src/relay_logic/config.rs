use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_relay::{TransportSettings, WorkerSpec};

const DEFAULT_CONFIG_FILE: &str = "server_relay.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "WebSocket broadcast relay server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RELAY_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_BIND_ADDRESS", help = "Address to bind the listener to.")]
    pub bind_address: Option<String>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RELAY_OUTBOUND_QUEUE", help = "Messages buffered per peer before new ones are dropped.")]
    pub outbound_queue: Option<usize>,

    #[clap(long, env = "RELAY_SEND_TIMEOUT_MS", help = "Milliseconds allowed for writing one frame to a peer.")]
    pub send_timeout_ms: Option<u64>,

    #[clap(long, env = "RELAY_WORKER_PROGRAM", help = "Program launched as the auxiliary worker.")]
    pub worker_program: Option<String>,

    #[clap(long, env = "RELAY_WORKER_ARGS", help = "Space separated arguments for the worker program.")]
    pub worker_args: Option<String>,

    #[clap(long, env = "RELAY_WORKER_DIR", help = "Working directory of the worker process.")]
    pub worker_dir: Option<PathBuf>,

    #[clap(
        long,
        env = "RELAY_NO_WORKER",
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Do not launch the auxiliary worker."
    )]
    pub no_worker: Option<bool>,

    #[clap(long, env = "RELAY_WORKER_GRACE_MS", help = "Milliseconds the worker gets to exit after SIGTERM.")]
    pub worker_grace_ms: Option<u64>,

    #[clap(long, env = "RELAY_SHUTDOWN_LIMIT_SECS", help = "Upper bound in seconds for a graceful shutdown.")]
    pub shutdown_limit_secs: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            bind_address: other.bind_address.or(self.bind_address),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            outbound_queue: other.outbound_queue.or(self.outbound_queue),
            send_timeout_ms: other.send_timeout_ms.or(self.send_timeout_ms),
            worker_program: other.worker_program.or(self.worker_program),
            worker_args: other.worker_args.or(self.worker_args),
            worker_dir: other.worker_dir.or(self.worker_dir),
            no_worker: other.no_worker.or(self.no_worker),
            worker_grace_ms: other.worker_grace_ms.or(self.worker_grace_ms),
            shutdown_limit_secs: other.shutdown_limit_secs.or(self.shutdown_limit_secs),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8080),
            bind_address: Some("0.0.0.0".to_string()),
            config_path: Some(PathBuf::from(DEFAULT_CONFIG_FILE)),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            outbound_queue: Some(256),
            send_timeout_ms: Some(10_000),
            worker_program: Some("python".to_string()),
            worker_args: Some("bot.py".to_string()),
            worker_dir: None,
            no_worker: Some(false),
            worker_grace_ms: Some(5_000),
            shutdown_limit_secs: Some(10),
        }
    }
}

/// Fully resolved settings; every knob has a value.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub port: u16,
    pub bind_address: String,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub transport: TransportSettings,
    /// `None` when the worker is disabled.
    pub worker: Option<WorkerSpec>,
    pub worker_grace: Duration,
    pub shutdown_limit: Duration,
}

impl RelayConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl From<Config> for RelayConfig {
    fn from(config: Config) -> Self {
        let defaults = Config::defaults();
        let config = defaults.clone().merge(config);

        let worker = if config.no_worker.unwrap_or(false) {
            None
        } else {
            let program = config
                .worker_program
                .or(defaults.worker_program)
                .unwrap_or_default();
            let args = config
                .worker_args
                .as_deref()
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            Some(WorkerSpec {
                program,
                args,
                current_dir: config.worker_dir,
            })
        };

        RelayConfig {
            port: config.port.unwrap_or(8080),
            bind_address: config.bind_address.unwrap_or_else(|| "0.0.0.0".to_string()),
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            transport: TransportSettings {
                outbound_queue: config.outbound_queue.unwrap_or(256),
                send_timeout: Duration::from_millis(config.send_timeout_ms.unwrap_or(10_000)),
            },
            worker,
            worker_grace: Duration::from_millis(config.worker_grace_ms.unwrap_or(5_000)),
            shutdown_limit: Duration::from_secs(config.shutdown_limit_secs.unwrap_or(10)),
        }
    }
}

/// Reads a JSON config file. A missing file is not an error.
fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let file_config = serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(Some(file_config))
}

/// What happened to the config file while loading. Logging is not set up
/// yet at that point, so the outcome is reported afterwards with [`ConfigFile::log`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigFile {
    Loaded(PathBuf),
    Missing(PathBuf),
    Invalid { path: PathBuf, error: String },
}

impl ConfigFile {
    pub fn log(&self) {
        match self {
            ConfigFile::Loaded(path) => log::info!("Loaded config file {}", path.display()),
            ConfigFile::Missing(path) => log::info!(
                "Config file not found at {}. Using defaults and environment/CLI variables.",
                path.display()
            ),
            ConfigFile::Invalid { error, .. } => {
                log::warn!("{}. Falling back to other sources.", error)
            }
        }
    }
}

/// Layers defaults, the config file, then `cli` (which already carries the environment).
pub fn resolve_config(cli: Config) -> (RelayConfig, ConfigFile) {
    // 1. Load defaults
    let mut current_config = Config::defaults();

    // 2. Load from config file if present; the CLI may point at another file.
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let outcome = match read_config_file(&config_file_path) {
        Ok(Some(file_config)) => {
            current_config = current_config.merge(file_config);
            ConfigFile::Loaded(config_file_path)
        }
        Ok(None) => ConfigFile::Missing(config_file_path),
        Err(e) => ConfigFile::Invalid {
            path: config_file_path,
            error: format!("{:#}", e),
        },
    };

    // 3. Override with environment variables and CLI arguments
    (current_config.merge(cli).into(), outcome)
}

pub fn load_config() -> (RelayConfig, ConfigFile) {
    resolve_config(Config::parse())
}
