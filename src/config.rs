//! Configuration Module
//!
//! Server settings come from three layers, later ones winning:
//! built-in defaults, environment variables, command-line flags.
//!
//! # Environment Variables
//! - `CACHED_HOST` - address to bind (default: 127.0.0.1)
//! - `CACHED_PORT` - port to listen on (default: 23333)
//! - `CACHED_WORKERS` - worker threads (default: available parallelism)
//! - `CACHED_MEMORY_LIMIT` - recency queue capacity in megabytes (default: 64)

use crate::connection::{
    ConnectionConfig, DEFAULT_MAX_PENDING_OUTPUT, DEFAULT_MAX_READ_BUFFER,
    DEFAULT_READ_BUFFER_SIZE, REQUEST_BUDGET,
};
use crate::protocol::{ParserLimits, DEFAULT_MAX_ITEM_SIZE, DEFAULT_MAX_KEYS, DEFAULT_MAX_KEY_LEN};
use crate::storage::engine::MAX_HASH_POWER;
use crate::storage::{DEFAULT_HASH_POWER, DEFAULT_MEMORY_LIMIT};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MEGABYTE: usize = 1024 * 1024;

/// Errors produced while building a [`Config`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum CliAction {
    Run(Config),
    Help,
    Version,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// log2 of the bucket count
    pub hash_power: u32,
    pub max_key_len: usize,
    pub max_item_size: usize,
    /// Keys accepted on one get/gets/delete line
    pub max_keys: usize,
    pub read_buffer_size: usize,
    pub max_read_buffer: usize,
    pub max_pending_output: usize,
    /// Recency queue capacity in bytes
    pub memory_limit: usize,
    /// Close connections idle for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            hash_power: DEFAULT_HASH_POWER,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
            max_keys: DEFAULT_MAX_KEYS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_read_buffer: DEFAULT_MAX_READ_BUFFER,
            max_pending_output: DEFAULT_MAX_PENDING_OUTPUT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            idle_timeout: None,
        }
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

impl Config {
    /// Reads the process environment and command line.
    pub fn load() -> Result<CliAction, ConfigError> {
        Self::parse(std::env::args().skip(1), |name| std::env::var(name).ok())
    }

    /// Builds a configuration from `args` (without the program name) on top
    /// of the variables returned by `env`.
    pub fn parse<I, E>(args: I, env: E) -> Result<CliAction, ConfigError>
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.apply_env(env)?;

        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            let mut value = || args.next().ok_or_else(|| ConfigError::MissingValue(flag.clone()));

            match flag.as_str() {
                "--host" | "-h" => config.host = value()?,
                "--port" | "-p" => config.port = parse_value(&flag, &value()?)?,
                "--workers" | "-t" => config.workers = parse_value(&flag, &value()?)?,
                "--hash-power" => config.hash_power = parse_value(&flag, &value()?)?,
                "--memory-limit" | "-m" => {
                    let megabytes: usize = parse_value(&flag, &value()?)?;
                    config.memory_limit = megabytes.saturating_mul(MEGABYTE);
                }
                "--max-item-size" | "-I" => config.max_item_size = parse_value(&flag, &value()?)?,
                "--max-key-len" => config.max_key_len = parse_value(&flag, &value()?)?,
                "--max-keys" => config.max_keys = parse_value(&flag, &value()?)?,
                "--idle-timeout" => {
                    let secs: u64 = parse_value(&flag, &value()?)?;
                    config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "--help" => return Ok(CliAction::Help),
                "--version" | "-v" => return Ok(CliAction::Version),
                _ => return Err(ConfigError::UnknownArgument(flag)),
            }
        }

        config.validate()?;
        Ok(CliAction::Run(config))
    }

    fn apply_env<E>(&mut self, env: E) -> Result<(), ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(host) = env("CACHED_HOST") {
            self.host = host;
        }
        if let Some(port) = env("CACHED_PORT") {
            self.port = parse_value("CACHED_PORT", &port)?;
        }
        if let Some(workers) = env("CACHED_WORKERS") {
            self.workers = parse_value("CACHED_WORKERS", &workers)?;
        }
        if let Some(limit) = env("CACHED_MEMORY_LIMIT") {
            let megabytes: usize = parse_value("CACHED_MEMORY_LIMIT", &limit)?;
            self.memory_limit = megabytes.saturating_mul(MEGABYTE);
        }
        Ok(())
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("at least one worker is required".into()));
        }
        if self.hash_power > MAX_HASH_POWER {
            return Err(ConfigError::Invalid(format!(
                "hash power {} exceeds {}",
                self.hash_power, MAX_HASH_POWER
            )));
        }
        if self.max_key_len == 0 {
            return Err(ConfigError::Invalid("key length limit must be positive".into()));
        }
        if self.max_keys == 0 {
            return Err(ConfigError::Invalid("key count limit must be positive".into()));
        }
        if self.read_buffer_size == 0 || self.read_buffer_size > self.max_read_buffer {
            return Err(ConfigError::Invalid(format!(
                "read buffer size {} must be between 1 and {}",
                self.read_buffer_size, self.max_read_buffer
            )));
        }
        Ok(())
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn parser_limits(&self) -> ParserLimits {
        ParserLimits {
            max_key_len: self.max_key_len,
            max_item_size: self.max_item_size,
            max_keys: self.max_keys,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            read_buffer_size: self.read_buffer_size,
            max_read_buffer: self.max_read_buffer,
            max_pending_output: self.max_pending_output,
            request_budget: REQUEST_BUDGET,
            idle_timeout: self.idle_timeout,
            parser: self.parser_limits(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn run_config(action: CliAction) -> Config {
        match action {
            CliAction::Run(config) => config,
            other => panic!("expected a run configuration, got {:?}", other),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.port, 23333);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.hash_power, 10);
        assert_eq!(config.max_key_len, 250);
        assert_eq!(config.max_keys, 1024);
        assert_eq!(config.max_item_size, 1024 * 1024);
        assert_eq!(config.read_buffer_size, 2048);
        assert!(config.workers >= 1);
        assert!(config.idle_timeout.is_none());
        assert_eq!(config.bind_address(), "127.0.0.1:23333");
    }

    #[test]
    fn test_no_arguments() {
        let config = run_config(Config::parse(args(&[]), no_env).unwrap());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_command_line_flags() {
        let config = run_config(
            Config::parse(
                args(&[
                    "--host", "0.0.0.0", "-p", "11311", "--workers", "3", "-m", "128",
                    "--hash-power", "12", "--idle-timeout", "30",
                ]),
                no_env,
            )
            .unwrap(),
        );

        assert_eq!(config.bind_address(), "0.0.0.0:11311");
        assert_eq!(config.workers, 3);
        assert_eq!(config.memory_limit, 128 * 1024 * 1024);
        assert_eq!(config.hash_power, 12);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_environment_then_flags() {
        let env: HashMap<&str, &str> =
            HashMap::from([("CACHED_PORT", "4000"), ("CACHED_WORKERS", "2")]);
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        let config = run_config(Config::parse(args(&[]), lookup).unwrap());
        assert_eq!(config.port, 4000);
        assert_eq!(config.workers, 2);

        // Flags override the environment
        let config = run_config(Config::parse(args(&["--port", "5000"]), lookup).unwrap());
        assert_eq!(config.port, 5000);
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            Config::parse(args(&["--port", "http"]), no_env),
            Err(ConfigError::InvalidValue {
                name: "--port".into(),
                value: "http".into()
            })
        );
        assert_eq!(
            Config::parse(args(&["--port"]), no_env),
            Err(ConfigError::MissingValue("--port".into()))
        );
        assert_eq!(
            Config::parse(args(&["--verbose"]), no_env),
            Err(ConfigError::UnknownArgument("--verbose".into()))
        );

        let bad_env = |name: &str| (name == "CACHED_PORT").then(|| "99999".to_string());
        assert!(matches!(
            Config::parse(args(&[]), bad_env),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Config::parse(args(&["--workers", "0"]), no_env),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse(args(&["--hash-power", "40"]), no_env),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse(args(&["--max-keys", "0"]), no_env),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(Config::parse(args(&["--help"]), no_env), Ok(CliAction::Help));
        assert_eq!(Config::parse(args(&["-v"]), no_env), Ok(CliAction::Version));
    }

    #[test]
    fn test_connection_config_carries_limits() {
        let config = run_config(
            Config::parse(
                args(&["--max-item-size", "4096", "--max-key-len", "64", "--max-keys", "8"]),
                no_env,
            )
            .unwrap(),
        );
        let conn = config.connection_config();
        assert_eq!(conn.parser.max_item_size, 4096);
        assert_eq!(conn.parser.max_key_len, 64);
        assert_eq!(conn.parser.max_keys, 8);
        assert_eq!(conn.request_budget, 25);
    }
}
