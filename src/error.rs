//! Error types for torchat-control.
//!
//! This module defines the [`enum@Error`] enum covering failures of the crate's
//! own API surface: configuration loading, the buddy directory and I/O on
//! the listening socket.
//!
//! Connection-level failures inside a control client are *not* returned as
//! errors. Decoding failures stay [`ParseError`](crate::ParseError) values
//! and, like transport failures, are turned into [`Notice`](crate::Notice)
//! values delivered to the controller before the connection is torn down.
//!
//! # Error Categories
//!
//! ```text
//!   Error
//!   ├── Io          ◄── Listener / file I/O failures
//!   ├── Config      ◄── Invalid configuration
//!   ├── Directory   ◄── Buddy directory refused an operation
//!   └── Validation  ◄── Invalid input data (addresses, randoms)
//! ```
//!
//! # Recovery Guide
//!
//! | Error | Recoverable | Recommended Action |
//! |-------|-------------|--------------------|
//! | [`Io`](Error::Io) | Sometimes | Check permissions, port availability |
//! | [`Config`](Error::Config) | No | Fix configuration file or CLI flags |
//! | [`Directory`](Error::Directory) | Sometimes | Free directory capacity |
//! | [`Validation`](Error::Validation) | No | Fix input data |
//!
//! # Example
//!
//! ```rust
//! use torchat_control::{Config, Error, Result};
//!
//! fn load_config() -> Result<Config> {
//!     let config = Config::from_file(std::path::Path::new("torchat.conf"))?;
//!     config.validate()?;
//!     Ok(config)
//! }
//!
//! match load_config() {
//!     Ok(_) => println!("Config loaded successfully"),
//!     Err(Error::Io(e)) => eprintln!("File error: {}", e),
//!     Err(Error::Config(msg)) => eprintln!("Config error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Errors that can occur during torchat-control operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during file or network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    ///
    /// Not recoverable without fixing the configuration file or the
    /// command-line arguments.
    #[error("configuration error: {0}")]
    Config(String),

    /// The buddy directory refused an operation.
    ///
    /// Returned by [`Controller::add_buddy`](crate::Controller::add_buddy)
    /// when a buddy cannot be materialized, for example because the
    /// directory is full.
    #[error("buddy directory error: {0}")]
    Directory(String),

    /// Input validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type alias for torchat-control operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{BuddyList, Controller};

    #[test]
    fn test_directory_error_message() {
        let err = BuddyList::new()
            .with_capacity_limit(0)
            .add_buddy("Alice", "abcdefghijklmnop")
            .unwrap_err();
        assert!(matches!(err, Error::Directory(_)));
        assert_eq!(
            err.to_string(),
            "buddy directory error: buddy list is full (0 buddies)"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("port taken"));
    }
}
