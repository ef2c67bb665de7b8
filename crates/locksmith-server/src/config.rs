//! Configuration management for the Locksmith server
//!
//! Sources are layered, later ones winning:
//! built-in defaults, `conf/application.yml` (or `--config`), `LOCKSMITH_*`
//! environment variables (`__` separates nested keys, e.g.
//! `LOCKSMITH_SERVER__PORT`), then command line flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use locksmith_api::DEFAULT_MAX_FRAME_LENGTH;
use locksmith_core::DEFAULT_LEASE_TIMEOUT;

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8888;
pub const DEFAULT_METRICS_PORT: u16 = 9464;

pub const SERVER_ADDRESS_PROPERTY: &str = "server.address";
pub const SERVER_PORT_PROPERTY: &str = "server.port";
pub const SERVER_MAX_FRAME_LENGTH_PROPERTY: &str = "server.max_frame_length";
pub const LEASE_TIMEOUT_PROPERTY: &str = "lock.lease_timeout_ms";
pub const LOG_LEVEL_PROPERTY: &str = "logging.level";
pub const LOG_DIR_PROPERTY: &str = "logging.dir";
pub const LOG_CONSOLE_PROPERTY: &str = "logging.console";
pub const LOG_FILE_PROPERTY: &str = "logging.file";
pub const METRICS_ENABLED_PROPERTY: &str = "metrics.enabled";
pub const METRICS_PORT_PROPERTY: &str = "metrics.port";

/// Command line arguments for the server
#[derive(Debug, Default, Parser)]
#[command(
    name = "locksmith-server",
    version,
    about = "Centralized read/write lock coordination server"
)]
pub struct Cli {
    /// Configuration file (defaults to conf/application.yml when present)
    #[arg(short = 'c', long = "config", env = "LOCKSMITH_CONFIG")]
    pub config: Option<PathBuf>,
    /// Address to listen on
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,
    /// Port to listen on
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
    /// Lease timeout in milliseconds
    #[arg(long = "lease-timeout-ms")]
    pub lease_timeout_ms: Option<u64>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

/// Settings consumed by the lock server itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub lease_timeout: Duration,
    pub max_frame_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            port: DEFAULT_SERVER_PORT,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration using the process command line.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_cli(&Cli::parse())
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut builder = Config::builder()
            .set_default(SERVER_ADDRESS_PROPERTY, DEFAULT_SERVER_ADDRESS)?
            .set_default(SERVER_PORT_PROPERTY, i64::from(DEFAULT_SERVER_PORT))?
            .set_default(
                SERVER_MAX_FRAME_LENGTH_PROPERTY,
                DEFAULT_MAX_FRAME_LENGTH as i64,
            )?
            .set_default(
                LEASE_TIMEOUT_PROPERTY,
                DEFAULT_LEASE_TIMEOUT.as_millis() as i64,
            )?
            .add_source(file)
            .add_source(
                Environment::with_prefix("LOCKSMITH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = &cli.address {
            builder = builder.set_override(SERVER_ADDRESS_PROPERTY, v.as_str())?;
        }
        if let Some(v) = cli.port {
            builder = builder.set_override(SERVER_PORT_PROPERTY, i64::from(v))?;
        }
        if let Some(v) = cli.lease_timeout_ms {
            builder = builder.set_override(LEASE_TIMEOUT_PROPERTY, v as i64)?;
        }
        if let Some(v) = &cli.log_level {
            builder = builder.set_override(LOG_LEVEL_PROPERTY, v.as_str())?;
        }

        Ok(Configuration {
            config: builder.build()?,
        })
    }

    // ========================================================================
    // Server Configuration
    // ========================================================================

    pub fn server_address(&self) -> String {
        self.config
            .get_string(SERVER_ADDRESS_PROPERTY)
            .unwrap_or(DEFAULT_SERVER_ADDRESS.to_string())
    }

    pub fn server_port(&self) -> u16 {
        self.config
            .get_int(SERVER_PORT_PROPERTY)
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn max_frame_length(&self) -> usize {
        self.config
            .get_int(SERVER_MAX_FRAME_LENGTH_PROPERTY)
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_LENGTH)
    }

    // ========================================================================
    // Lock Configuration
    // ========================================================================

    pub fn lease_timeout(&self) -> Duration {
        self.config
            .get_int(LEASE_TIMEOUT_PROPERTY)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LEASE_TIMEOUT)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            address: self.server_address(),
            port: self.server_port(),
            lease_timeout: self.lease_timeout(),
            max_frame_length: self.max_frame_length(),
        }
    }

    // ========================================================================
    // Logging & Metrics Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string(LOG_DIR_PROPERTY).ok(),
            self.config.get_bool(LOG_CONSOLE_PROPERTY).unwrap_or(true),
            self.config.get_bool(LOG_FILE_PROPERTY).unwrap_or(false),
            self.config
                .get_string(LOG_LEVEL_PROPERTY)
                .unwrap_or("info".to_string()),
        )
    }

    pub fn metrics_enabled(&self) -> bool {
        self.config
            .get_bool(METRICS_ENABLED_PROPERTY)
            .unwrap_or(false)
    }

    pub fn metrics_port(&self) -> u16 {
        self.config
            .get_int(METRICS_PORT_PROPERTY)
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_METRICS_PORT)
    }
}
