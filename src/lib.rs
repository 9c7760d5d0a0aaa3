//! # torchat-control
//!
//! The control-channel engine of a TorChat-style messenger: peers ("buddies")
//! talk exclusively over Tor hidden-service connections and prove which
//! address they own with a ping/pong handshake before any chat traffic flows.
//!
//! # Overview
//!
//! Every accepted connection is handed to a [`ControlClient`]. The client
//! decodes the line protocol, runs the handshake checks against a shared
//! buddy directory and, once the peer echoes a random we issued, moves the
//! authenticated connection into the matching [`Buddy`].
//!
//! ```text
//!   accepted socket
//!        │
//!        ▼
//!   ┌───────────────┐  ping / pong   ┌──────────────────────┐
//!   │ ControlClient │ ─────────────▶ │ Controller           │
//!   │ (one actor    │                │ (BuddyList: address  │
//!   │  per socket)  │ ◀───────────── │  and random indexes) │
//!   └───────┬───────┘    Arc<Buddy>  └──────────────────────┘
//!           │ pong accepted
//!           ▼
//!   Buddy::set_input_connection(socket)
//! ```
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`client`] | Per-connection actor running the handshake |
//! | [`protocol`] | Command decoding and the parse-error taxonomy |
//! | [`directory`] | [`Controller`] trait and the in-memory [`BuddyList`] |
//! | [`buddy`] | Buddies and their handshake state |
//! | [`notice`] | Structured notices delivered to the controller |
//! | [`socket`] | Line-framed asynchronous socket |
//! | [`locale`] | Localized notice messages |
//! | [`server`] | Listener loop used by the binary |
//! | [`config`] | Configuration management (TOML, CLI, environment) |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`logger`] | Logging infrastructure using tracing |
//!
//! # What This Library Does NOT Do
//!
//! - **Launch Tor**: the hidden service is configured and supervised elsewhere
//! - **Outbound connections**: sending our own `ping` is up to the caller
//! - **Chat and file transfer**: commands are decoded but not acted upon
//! - **Persistence**: the buddy list lives in memory
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use torchat_control::{server, Config};
//!
//! #[tokio::main]
//! async fn main() -> torchat_control::Result<()> {
//!     let mut config = Config::default();
//!     config.self_address = Some("abcdefghijklmnop".to_string());
//!     server::run_main(config).await
//! }
//! ```
//!
//! # Security Considerations
//!
//! - Every malformed or unknown line is fatal to its connection
//! - A handshake random resolves at most once, so a replayed `pong` fails
//! - Randoms are wiped from memory when replaced (using zeroize)
//! - Failures never silently drop a connection: a notice always explains why

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod buddy;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod locale;
pub mod logger;
pub mod notice;
pub mod protocol;
pub mod server;
pub mod socket;

pub use buddy::{Buddy, HandshakeRandom, PendingPong};
pub use client::{ClientContext, ClientId, ClientState, ControlClient};
pub use config::{load_config, CliArgs, Config, LogLevel};
pub use directory::{BuddyList, Controller};
pub use error::{Error, Result};
pub use locale::Strings;
pub use notice::{Notice, NoticeCode, NoticeContext, NoticeKind};
pub use protocol::{parse_line, Command, CommandKind, FileChunk, ParseError, Status};
pub use server::{run_main, VERSION};
pub use socket::{LineSocket, SocketError};
