//! Logging infrastructure for torchat-control.
//!
//! This module provides logging functionality using the tracing ecosystem.
//! It supports output to stdout, files, and syslog, with configurable log levels.
//!
//! # Log Levels
//!
//! | Level | Description | Use Case |
//! |-------|-------------|----------|
//! | [`Debug`](crate::LogLevel::Debug) | Every line and state change | Development only |
//! | [`Info`](crate::LogLevel::Info) | Client lifecycle, new buddies | Verbose operation |
//! | [`Notice`](crate::LogLevel::Notice) | Notable events | Default level |
//! | [`Warn`](crate::LogLevel::Warn) | Rejected handshakes, spoofing attempts | Potential attacks |
//! | [`Error`](crate::LogLevel::Error) | Directory inconsistencies | Failures |
//!
//! Control client notices are logged through [`log_notice`]: info notices at
//! info level and error notices at warn level, since a misbehaving peer is
//! not a failure of this process.
//!
//! # Example
//!
//! ```rust,no_run
//! use torchat_control::{LogLevel, logger};
//!
//! // Log to stdout
//! logger::init(LogLevel::Notice, None).unwrap();
//!
//! // Log to a file
//! logger::init(LogLevel::Debug, Some("/var/log/torchat-control.log")).unwrap();
//!
//! // Log to syslog
//! logger::init(LogLevel::Notice, Some(":syslog:")).unwrap();
//!
//! logger::plog(LogLevel::Notice, "listening for buddies");
//! ```
//!
//! The `RUST_LOG` environment variable overrides the configured level.

use std::io::Write;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::client::ClientId;
use crate::config::LogLevel;
use crate::error::{Error, Result};
use crate::notice::{Notice, NoticeKind};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the logging system.
///
/// Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - The minimum log level to output
/// * `logfile` - Output destination:
///   - `None` - Log to stdout with ANSI colors
///   - `Some(":syslog:")` - Log to system syslog
///   - `Some(path)` - Append to the file at `path`
///
/// # Errors
///
/// Returns [`Error::Io`] if the log file cannot be opened, and
/// [`Error::Config`] if no syslog socket exists or a global subscriber was
/// already installed by someone else.
pub fn init(level: LogLevel, logfile: Option<&str>) -> Result<()> {
    if LOGGER_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Notice => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match logfile {
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_span_events(FmtSpan::NONE)
                .with_ansi(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| Error::Config(format!("failed to set logger: {}", e)))?;
        }
        Some(":syslog:") => {
            init_syslog(env_filter)?;
        }
        Some(path) => {
            init_file_logger(path, env_filter)?;
        }
    }

    LOGGER_INITIALIZED.get_or_init(|| ());
    Ok(())
}

fn init_syslog(env_filter: EnvFilter) -> Result<()> {
    let syslog_path = if Path::new("/dev/log").exists() {
        "/dev/log"
    } else if Path::new("/var/run/syslog").exists() {
        "/var/run/syslog"
    } else {
        return Err(Error::Config("no syslog socket found".to_string()));
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_ansi(false)
        .with_writer(move || SyslogWriter::connect(syslog_path))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("failed to set logger: {}", e)))?;

    Ok(())
}

struct SyslogWriter {
    socket: Option<UnixDatagram>,
}

impl SyslogWriter {
    fn connect(path: &str) -> Self {
        let socket = UnixDatagram::unbound()
            .and_then(|sock| sock.connect(path).map(|()| sock))
            .ok();
        Self { socket }
    }
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(ref socket) = self.socket {
            let msg = format!("torchat-control: {}", String::from_utf8_lossy(buf));
            socket.send(msg.as_bytes())?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn init_file_logger(path: &str, env_filter: EnvFilter) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("failed to set logger: {}", e)))?;

    Ok(())
}

/// Log a message at the specified level.
///
/// | LogLevel | tracing macro |
/// |----------|---------------|
/// | Debug | `debug!` |
/// | Info | `info!` |
/// | Notice | `info!` |
/// | Warn | `warn!` |
/// | Error | `error!` |
///
/// # Example
///
/// ```rust
/// use torchat_control::{LogLevel, logger};
///
/// logger::plog(LogLevel::Notice, "listening on 127.0.0.1:11009");
/// logger::plog(LogLevel::Warn, "accept failed, retrying");
/// ```
pub fn plog(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => debug!("{}", message),
        LogLevel::Info => info!("{}", message),
        LogLevel::Notice => info!("{}", message),
        LogLevel::Warn => warn!("{}", message),
        LogLevel::Error => error!("{}", message),
    }
}

/// Log level a notice is recorded at.
pub fn notice_level(notice: &Notice) -> LogLevel {
    match notice.kind() {
        NoticeKind::Info => LogLevel::Info,
        NoticeKind::Error => LogLevel::Warn,
    }
}

/// Record a notice emitted by a control client.
pub fn log_notice(client: ClientId, notice: &Notice) {
    match notice_level(notice) {
        LogLevel::Warn => warn!(%client, code = %notice.code(), "{}", notice),
        _ => info!(%client, code = %notice.code(), "{}", notice),
    }
}

/// Log a formatted message at the specified level.
///
/// # Example
///
/// ```rust
/// use torchat_control::{LogLevel, plog_fmt};
///
/// plog_fmt!(LogLevel::Notice, "listening on {}:{}", "127.0.0.1", 11009);
/// plog_fmt!(LogLevel::Info, "{} buddies known", 4);
/// ```
#[macro_export]
macro_rules! plog_fmt {
    ($level:expr, $($arg:tt)*) => {
        $crate::logger::plog($level, &format!($($arg)*))
    };
}
