//! Listener loop accepting control connections.
//!
//! [`run_main`] is what the binary runs: it builds the shared buddy
//! directory from configuration, binds the control listener and starts one
//! [`ControlClient`] per accepted connection until CTRL+C.
//!
//! ```text
//!   TcpListener ──accept──▶ LineSocket ──▶ ControlClient::start(directory)
//!        ▲                                        │
//!        └──────────────── loop ◀─────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::debug;

use crate::client::{ClientContext, ControlClient};
use crate::config::{Config, LogLevel};
use crate::directory::{BuddyList, Controller};
use crate::error::Result;
use crate::logger::plog;
use crate::plog_fmt;
use crate::socket::LineSocket;

/// Version of torchat-control.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Run the control listener until CTRL+C.
///
/// # Errors
///
/// Returns an error if the directory cannot be built from `config` or the
/// listener cannot be bound.
pub async fn run_main(config: Config) -> Result<()> {
    let context = Arc::new(ClientContext::from_config(&config));
    let directory = Arc::new(BuddyList::from_config(&config, context.strings())?);

    match config.self_address {
        Some(ref address) => plog_fmt!(LogLevel::Notice, "Own address: {}", address),
        None => plog(
            LogLevel::Warn,
            "Own address unknown; self-loopback handshakes cannot be verified",
        ),
    }

    let listener = TcpListener::bind((config.listen_ip.as_str(), config.listen_port)).await?;
    plog_fmt!(
        LogLevel::Notice,
        "Listening for control connections on {}",
        listener.local_addr()?
    );

    tokio::select! {
        () = serve(listener, context, directory.clone(), config.max_line_length) => {}
        result = tokio::signal::ctrl_c() => {
            if result.is_ok() {
                plog(LogLevel::Notice, "Got CTRL+C. Exiting.");
            }
        }
    }

    plog_fmt!(LogLevel::Info, "{} buddies known at shutdown", directory.len());
    Ok(())
}

/// Accept connections forever, starting a control client for each.
pub async fn serve(
    listener: TcpListener,
    context: Arc<ClientContext>,
    controller: Arc<dyn Controller>,
    max_line_length: usize,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let socket = LineSocket::new(stream).with_max_line_length(max_line_length);
                let client = ControlClient::new(context.clone(), socket);
                debug!(client = %client.id(), %peer, "accepted control connection");
                client.start(controller.clone());
            }
            Err(e) => {
                plog_fmt!(LogLevel::Warn, "Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}
