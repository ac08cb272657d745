//! Server Configuration
//!
//! Settings come from three layers, later ones overriding earlier ones:
//!
//! 1. [`ServerConfig::default`]
//! 2. an optional `key = value` file (`--config <PATH>`)
//! 3. command-line flags
//!
//! ## File Format
//!
//! ```text
//! # smartkv.conf
//! host = 127.0.0.1
//! port = 9000
//! worker_threads = 8
//! cache_enabled = yes
//! cache_size_mb = 64
//! ```
//!
//! Everything after a `#` is a comment. Lines without `=`, lines with an
//! empty key and unknown keys are ignored. `max_conn_queue` is accepted as
//! another name for `backlog`.

use crate::cache::DEFAULT_SHARDS;
use crate::worker::QueueFullPolicy;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("{0} requires a value")]
    MissingArgument(String),

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// What the command line asked for.
#[derive(Debug)]
pub enum Command {
    Run(ServerConfig),
    Help,
    Version,
}

/// Runtime settings for the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker threads (at least 1)
    pub worker_threads: usize,
    pub cache_enabled: bool,
    pub cache_size_mb: usize,
    pub cache_shards: usize,
    /// Accept backlog passed to `listen`
    pub backlog: i32,
    /// Job queue bound, `0` for unbounded
    pub job_queue_capacity: usize,
    pub queue_full_policy: QueueFullPolicy,
    /// Longest unterminated request line a client may send, `0` for no limit
    pub max_line_bytes: usize,
    /// Append-only log file; `None` keeps data in memory only
    pub store_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: crate::DEFAULT_PORT,
            worker_threads: 3,
            cache_enabled: true,
            cache_size_mb: 10,
            cache_shards: DEFAULT_SHARDS,
            backlog: 128,
            job_queue_capacity: 0,
            queue_full_policy: QueueFullPolicy::Reject,
            max_line_bytes: 0,
            store_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Total cache budget in bytes.
    pub fn cache_bytes(&self) -> usize {
        self.cache_size_mb.saturating_mul(1024 * 1024)
    }

    /// Loads a config file on top of the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.merge_file(path)?;
        Ok(config)
    }

    /// Applies every recognised key in `path` to `self`.
    pub fn merge_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_str(&contents)
    }

    /// Applies `key = value` lines to `self`.
    pub fn merge_str(&mut self, contents: &str) -> Result<(), ConfigError> {
        for raw in contents.lines() {
            let line = raw.split_once('#').map_or(raw, |(before, _)| before);
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            self.set(key, value.trim())?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "host" => self.host = value.to_string(),
            "port" => self.port = parse_value(key, value)?,
            "worker_threads" => self.worker_threads = parse_value::<usize>(key, value)?.max(1),
            "cache_enabled" => self.cache_enabled = parse_bool(key, value)?,
            "cache_size_mb" => self.cache_size_mb = parse_value(key, value)?,
            "cache_shards" => self.cache_shards = parse_value::<usize>(key, value)?.max(1),
            "backlog" | "max_conn_queue" => self.backlog = parse_value(key, value)?,
            "job_queue_capacity" => self.job_queue_capacity = parse_value(key, value)?,
            "max_line_bytes" => self.max_line_bytes = parse_value(key, value)?,
            "queue_full_policy" => {
                self.queue_full_policy = value.parse().map_err(|_| invalid(key, value))?
            }
            "store_path" => {
                self.store_path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            "log_level" => self.log_level = value.to_string(),
            _ => {}
        }
        Ok(())
    }

    /// Parses command-line arguments from the process environment.
    pub fn from_args() -> Result<Command, ConfigError> {
        Self::parse_args(std::env::args().skip(1))
    }

    /// Parses command-line arguments (without the program name).
    ///
    /// `--config` is applied first wherever it appears, so flags always
    /// override the file.
    pub fn parse_args<I, S>(args: I) -> Result<Command, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut config = ServerConfig::default();

        if let Some(pos) = args.iter().position(|a| a == "--config" || a == "-c") {
            let path = args
                .get(pos + 1)
                .ok_or_else(|| ConfigError::MissingArgument(args[pos].clone()))?;
            config.merge_file(path)?;
        }

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--help" => return Ok(Command::Help),
                "--version" | "-v" => return Ok(Command::Version),
                "--no-cache" => {
                    config.cache_enabled = false;
                    i += 1;
                    continue;
                }
                _ => {}
            }

            let value = args
                .get(i + 1)
                .map(String::as_str)
                .ok_or_else(|| match flag {
                    "--config" | "-c" | "--host" | "-h" | "--port" | "-p" | "--workers"
                    | "-w" | "--cache-mb" | "--store" | "--log-level" => {
                        ConfigError::MissingArgument(flag.to_string())
                    }
                    _ => ConfigError::UnknownArgument(flag.to_string()),
                })?;

            match flag {
                "--config" | "-c" => {}
                "--host" | "-h" => config.host = value.to_string(),
                "--port" | "-p" => config.port = parse_value("port", value)?,
                "--workers" | "-w" => {
                    config.worker_threads = parse_value::<usize>("workers", value)?.max(1)
                }
                "--cache-mb" => config.cache_size_mb = parse_value("cache-mb", value)?,
                "--store" => config.store_path = Some(PathBuf::from(value)),
                "--log-level" => config.log_level = value.to_string(),
                _ => return Err(ConfigError::UnknownArgument(flag.to_string())),
            }
            i += 2;
        }

        Ok(Command::Run(config))
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

pub fn help_text() -> String {
    format!(
        r#"
SmartKV v{} - Reactor-based Key-Value Server

USAGE:
    smartkv [OPTIONS]

OPTIONS:
    -c, --config <PATH>      Load settings from a key = value file
    -h, --host <HOST>        Host to bind to (default: 0.0.0.0)
    -p, --port <PORT>        Port to listen on (default: {})
    -w, --workers <N>        Worker threads (default: 3)
        --cache-mb <MB>      Cache budget in megabytes (default: 10)
        --no-cache           Disable the LRU cache
        --store <PATH>       Persist data to an append-only log file
        --log-level <LEVEL>  Log filter when RUST_LOG is unset (default: info)
    -v, --version            Print version information
        --help               Print this help message

PROTOCOL:
    $ nc 127.0.0.1 {}
    PUT name Ariz
    OK
    GET name
    OK cache hitAriz
"#,
        crate::VERSION,
        crate::DEFAULT_PORT,
        crate::DEFAULT_PORT
    )
}
