//! Configuration management for torchat-control.
//!
//! This module provides configuration parsing from TOML files, command-line arguments,
//! and environment variables. Configuration is applied in order: defaults → config file →
//! command-line arguments, with later sources overriding earlier ones.
//!
//! # Configuration Flow
//!
//! ```text
//!     ┌─────────────────┐
//!     │ Config::default │ ◄── Start with sensible defaults
//!     └────────┬────────┘
//!              │
//!              ▼
//!     ┌─────────────────┐     ┌─────────────────┐
//!     │ Config file     │ ◄───│ torchat.conf    │  (TOML format)
//!     │ exists?         │     │ or --config     │
//!     └────────┬────────┘     └─────────────────┘
//!              │
//!              ▼
//!     ┌─────────────────┐     ┌──────────────────────┐
//!     │ Apply CLI args  │ ◄───│ --listen-port        │
//!     │ (override)      │     │ TORCHAT_SELF_ADDRESS │
//!     └────────┬────────┘     └──────────────────────┘
//!              │
//!              ▼
//!     ┌─────────────────┐
//!     │ Resolve own     │ ◄── <hidden_service_dir>/hostname
//!     │ address         │
//!     └────────┬────────┘
//!              │
//!              ▼
//!     ┌─────────────────┐
//!     │ Validate        │
//!     └─────────────────┘
//! ```
//!
//! # Example Configuration File
//!
//! ```toml
//! # Our own hidden service
//! self_address = "abcdefghijklmnop"
//! # hidden_service_dir = "/var/lib/tor/torchat"  # read hostname from here instead
//!
//! # Listener
//! listen_ip = "127.0.0.1"
//! listen_port = 11009
//!
//! # Logging
//! loglevel = "notice"  # debug, info, notice, warn, error
//! # logfile = ":syslog:"
//!
//! # Limits
//! max_line_length = 65536
//! # max_buddies = 500
//!
//! status = "available"  # available, away, xa
//!
//! [strings]
//! core_cctrl_new_buddy = "Neuer Kontakt"
//! ```
//!
//! # What This Module Does NOT Do
//!
//! - **Runtime reconfiguration**: Config is loaded once at startup
//! - **Buddy list persistence**: Buddies live in memory only

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::protocol::{is_valid_address, Status};
use crate::socket::DEFAULT_MAX_LINE_LENGTH;

/// Smallest accepted `max_line_length`.
pub const MIN_LINE_LENGTH: usize = 512;

/// Log level for torchat-control output.
///
/// From most to least verbose:
/// [`Debug`](LogLevel::Debug) > [`Info`](LogLevel::Info) > [`Notice`](LogLevel::Notice) >
/// [`Warn`](LogLevel::Warn) > [`Error`](LogLevel::Error)
///
/// # Example
///
/// ```rust
/// use torchat_control::LogLevel;
///
/// let level: LogLevel = "warning".parse().unwrap();
/// assert_eq!(level, LogLevel::Warn);
/// assert!(LogLevel::Notice < level);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Low-level debugging information.
    Debug,
    /// Informational messages about normal operation.
    Info,
    /// Notable events that may be of interest.
    #[default]
    Notice,
    /// Warning conditions that don't prevent operation.
    Warn,
    /// Error conditions that may impair functionality.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Notice => write!(f, "NOTICE"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "NOTICE" => Ok(LogLevel::Notice),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" | "ERR" => Ok(LogLevel::Error),
            _ => Err(Error::Config(format!("invalid log level: {}", s))),
        }
    }
}

/// Main configuration struct for torchat-control.
///
/// # Fields Overview
///
/// | Field | Type | Default | Description |
/// |-------|------|---------|-------------|
/// | `self_address` | `Option<String>` | `None` | Our own hidden-service address |
/// | `hidden_service_dir` | `Option<PathBuf>` | `None` | Tor hidden service directory holding `hostname` |
/// | `listen_ip` | `String` | `"127.0.0.1"` | Address the control listener binds to |
/// | `listen_port` | `u16` | `11009` | Port the control listener binds to |
/// | `loglevel` | `LogLevel` | `Notice` | Log verbosity level |
/// | `logfile` | `Option<String>` | `None` | Log destination (file, `:syslog:`, or stdout) |
/// | `max_line_length` | `usize` | `65536` | Longest accepted control line |
/// | `max_buddies` | `Option<usize>` | `None` | Buddy list capacity (None = unbounded) |
/// | `status` | `Status` | `Available` | Status announced in handshakes |
/// | `strings` | table | empty | Localized string overrides |
///
/// # Example
///
/// ```rust
/// use torchat_control::Config;
///
/// let mut config = Config::default();
/// assert_eq!(config.listen_port, 11009);
///
/// config.self_address = Some("abcdefghijklmnop".to_string());
/// config.validate().unwrap();
///
/// config.self_address = Some("not an address".to_string());
/// assert!(config.validate().is_err());
/// ```
///
/// # See Also
///
/// - [`CliArgs`] - Command-line argument parsing
/// - [`load_config`] - Configuration loading function
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Our own hidden-service address, without `.onion`.
    #[serde(default)]
    pub self_address: Option<String>,
    /// Hidden service directory; its `hostname` file supplies `self_address`
    /// when that is not set.
    #[serde(default)]
    pub hidden_service_dir: Option<PathBuf>,
    /// IP address the control listener binds to.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    /// Port the control listener binds to.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Log level for output.
    #[serde(default)]
    pub loglevel: LogLevel,
    /// Log file path. None for stdout, ":syslog:" for syslog.
    #[serde(default)]
    pub logfile: Option<String>,
    /// Longest control line accepted from a peer, in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Maximum number of buddies. None for unbounded.
    #[serde(default)]
    pub max_buddies: Option<usize>,
    /// Status announced to buddies.
    #[serde(default)]
    pub status: Status,
    /// Overrides for localized strings, by key.
    #[serde(default)]
    pub strings: HashMap<String, String>,
}

fn default_listen_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_listen_port() -> u16 {
    11009
}
fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

impl Default for Config {
    fn default() -> Self {
        Self {
            self_address: None,
            hidden_service_dir: None,
            listen_ip: default_listen_ip(),
            listen_port: default_listen_port(),
            loglevel: LogLevel::default(),
            logfile: None,
            max_line_length: default_max_line_length(),
            max_buddies: None,
            status: Status::default(),
            strings: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    /// Returns [`Error::Config`] if the TOML is invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref address) = self.self_address {
            if !is_valid_address(address) {
                return Err(Error::Config(format!(
                    "self_address is not a hidden service address: {}",
                    address
                )));
            }
        }
        if self.listen_ip.parse::<IpAddr>().is_err() {
            return Err(Error::Config(format!(
                "listen_ip is not an IP address: {}",
                self.listen_ip
            )));
        }
        if self.max_line_length < MIN_LINE_LENGTH {
            return Err(Error::Config(format!(
                "max_line_length must be at least {}",
                MIN_LINE_LENGTH
            )));
        }
        Ok(())
    }

    /// Fill in `self_address` from `<hidden_service_dir>/hostname`.
    ///
    /// Does nothing if an address is already set or no directory is
    /// configured. A trailing `.onion` is stripped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the hostname file cannot be read.
    pub fn resolve_self_address(&mut self) -> Result<()> {
        if self.self_address.is_some() {
            return Ok(());
        }
        let Some(ref dir) = self.hidden_service_dir else {
            return Ok(());
        };

        let hostname = std::fs::read_to_string(dir.join("hostname"))?;
        let hostname = hostname.trim();
        let address = hostname.strip_suffix(".onion").unwrap_or(hostname);
        self.self_address = Some(address.to_string());
        Ok(())
    }
}

/// Command-line arguments for torchat-control.
///
/// Arguments override configuration file values.
///
/// # Configuration Precedence
///
/// 1. Built-in defaults
/// 2. Configuration file (TOML)
/// 3. Environment variables (`TORCHAT_CONFIG`, `TORCHAT_SELF_ADDRESS`)
/// 4. Command-line arguments
///
/// # Options
///
/// | Option | Description |
/// |--------|-------------|
/// | `--config <FILE>` | Path to configuration file [env: TORCHAT_CONFIG] [default: torchat.conf] |
/// | `--generate_config <FILE>` | Write default config to file and exit |
/// | `--self-address <ADDR>` | Our hidden-service address [env: TORCHAT_SELF_ADDRESS] |
/// | `--hidden-service-dir <DIR>` | Read our address from `<DIR>/hostname` |
/// | `--listen-ip <IP>` | Listener IP address |
/// | `--listen-port <PORT>` | Listener port |
/// | `--max-buddies <N>` | Buddy list capacity |
/// | `--max-line-length <BYTES>` | Longest accepted control line |
/// | `--loglevel <LEVEL>` | Log verbosity: DEBUG, INFO, NOTICE, WARN, ERROR |
/// | `--logfile <FILE>` | Log to file instead of stdout (use ":syslog:" for syslog) |
///
/// # Examples
///
/// ```bash
/// torchat-control --hidden-service-dir /var/lib/tor/torchat --listen-port 11009
/// torchat-control --generate_config torchat.conf
/// ```
#[derive(Parser, Debug)]
#[command(name = "torchat-control")]
#[command(about = "Control-channel handshake engine for TorChat-style messengers")]
#[command(version)]
pub struct CliArgs {
    /// Write default config to file and exit.
    #[arg(long = "generate_config")]
    pub generate_config: Option<PathBuf>,

    /// Log verbosity (DEBUG, INFO, NOTICE, WARN, ERROR).
    #[arg(long)]
    pub loglevel: Option<String>,

    /// Log to file instead of stdout (use ":syslog:" for syslog).
    #[arg(long)]
    pub logfile: Option<String>,

    /// Path to configuration file.
    #[arg(long = "config", env = "TORCHAT_CONFIG", default_value = "torchat.conf")]
    pub config_file: PathBuf,

    /// Our own hidden-service address, without `.onion`.
    #[arg(long, env = "TORCHAT_SELF_ADDRESS")]
    pub self_address: Option<String>,

    /// Hidden service directory to read our address from.
    #[arg(long)]
    pub hidden_service_dir: Option<PathBuf>,

    /// IP address to listen on.
    #[arg(long)]
    pub listen_ip: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Maximum number of buddies.
    #[arg(long)]
    pub max_buddies: Option<usize>,

    /// Longest accepted control line, in bytes.
    #[arg(long)]
    pub max_line_length: Option<usize>,
}

impl CliArgs {
    /// Apply CLI arguments to a configuration, overriding values.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(ref loglevel) = self.loglevel {
            if let Ok(level) = loglevel.parse() {
                config.loglevel = level;
            }
        }
        if let Some(ref logfile) = self.logfile {
            config.logfile = Some(logfile.clone());
        }
        if let Some(ref address) = self.self_address {
            config.self_address = Some(address.clone());
        }
        if let Some(ref dir) = self.hidden_service_dir {
            config.hidden_service_dir = Some(dir.clone());
        }
        if let Some(ref listen_ip) = self.listen_ip {
            config.listen_ip = listen_ip.clone();
        }
        if let Some(listen_port) = self.listen_port {
            config.listen_port = listen_port;
        }
        if let Some(max_buddies) = self.max_buddies {
            config.max_buddies = Some(max_buddies);
        }
        if let Some(max_line_length) = self.max_line_length {
            config.max_line_length = max_line_length;
        }
    }
}

/// Load configuration from file and CLI arguments.
///
/// 1. Start with defaults
/// 2. Apply config file if it exists
/// 3. Apply CLI arguments (override)
/// 4. Resolve our own address from the hidden service directory
///
/// # Errors
///
/// Returns [`Error::Config`] if configuration is invalid and [`Error::Io`]
/// if a referenced file cannot be read.
pub fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = Config::default();

    if args.config_file.exists() {
        config = Config::from_file(&args.config_file)?;
    }

    args.apply_to(&mut config);
    config.resolve_self_address()?;
    config.validate()?;

    Ok(config)
}
