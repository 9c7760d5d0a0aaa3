//! Structured notices delivered from control clients to their controller.
//!
//! Every outcome a controller may care about (a client starting or stopping,
//! a protocol violation, a spoofing attempt, a transport failure) is expressed
//! as a [`Notice`]: a stable [`NoticeCode`], a localized message and optionally
//! a nested cause and a context reference.
//!
//! ```text
//!   Notice
//!   ├── code      ◄── stable identifier, see NoticeCode::as_str
//!   ├── message   ◄── localized text (Strings::localized)
//!   ├── cause     ◄── nested transport notice, for `socket` errors
//!   └── context   ◄── the buddy or address involved
//! ```
//!
//! Notices are immutable and are not retained once handed to the controller.

use std::fmt;

use crate::protocol::CommandKind;

/// Whether a notice reports normal operation or a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    /// Informational lifecycle notice.
    Info,
    /// A failure. Errors emitted by a control client are fatal to its connection.
    Error,
}

/// Stable identifier of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeCode {
    /// The control client started processing its connection.
    ClientStarted,
    /// The control client stopped.
    ClientStopped,
    /// Transport failure; the transport's own notice is attached as cause.
    Socket,
    /// A line used a keyword outside the command set.
    UnknownCommand,
    /// A known command failed to decode. Build with [`NoticeCode::command`].
    Command(CommandKind),
    /// A second `ping` on the same connection claimed another address.
    FakePing,
    /// A `ping` claimed a buddy that already completed an inbound handshake.
    AlreadyPinged,
    /// A `ping` claimed our own address with a random we never issued.
    Masquerade,
    /// The directory could not materialize a new buddy.
    AddBuddy,
    /// A `pong` carried a random no buddy is waiting for.
    Pong,
    /// The peer closed the connection.
    SocketReadClosed,
    /// Reading from the connection failed.
    SocketReadFailed,
    /// Writing to the connection failed.
    SocketWriteFailed,
    /// The peer sent a line longer than the configured limit.
    SocketLineTooLong,
}

impl NoticeCode {
    /// Parse-error code for a command kind. `filedata_b64` shares `filedata`'s code.
    pub fn command(kind: CommandKind) -> Self {
        match kind {
            CommandKind::FiledataB64 => NoticeCode::Command(CommandKind::Filedata),
            other => NoticeCode::Command(other),
        }
    }

    /// Whether this code reports an informational event or an error.
    pub fn kind(self) -> NoticeKind {
        match self {
            NoticeCode::ClientStarted | NoticeCode::ClientStopped => NoticeKind::Info,
            _ => NoticeKind::Error,
        }
    }

    /// Returns true for error codes.
    pub fn is_error(self) -> bool {
        self.kind() == NoticeKind::Error
    }

    /// Stable machine-readable name.
    pub fn as_str(self) -> &'static str {
        self.names().0
    }

    /// Key looked up in the [`Strings`](crate::Strings) table for the message.
    pub fn localization_key(self) -> &'static str {
        self.names().1
    }

    fn names(self) -> (&'static str, &'static str) {
        match self {
            NoticeCode::ClientStarted => ("client_started", "core_cctrl_note_started"),
            NoticeCode::ClientStopped => ("client_stopped", "core_cctrl_note_stoped"),
            NoticeCode::Socket => ("socket", "core_cctrl_err_socket"),
            NoticeCode::UnknownCommand => ("unknown_command", "core_parser_err_unknown"),
            NoticeCode::Command(kind) => match kind {
                CommandKind::Ping => ("cmd_ping", "core_parser_err_ping"),
                CommandKind::Pong => ("cmd_pong", "core_parser_err_pong"),
                CommandKind::Status => ("cmd_status", "core_parser_err_status"),
                CommandKind::Version => ("cmd_version", "core_parser_err_version"),
                CommandKind::Message => ("cmd_message", "core_parser_err_message"),
                CommandKind::AddMe => ("cmd_add_me", "core_parser_err_addme"),
                CommandKind::RemoveMe => ("cmd_remove_me", "core_parser_err_removeme"),
                CommandKind::Filename => ("cmd_filename", "core_parser_err_filename"),
                CommandKind::Filedata | CommandKind::FiledataB64 => {
                    ("cmd_filedata", "core_parser_err_filedata")
                }
                CommandKind::FiledataOk => ("cmd_filedataok", "core_parser_err_filedataok"),
                CommandKind::FiledataError => {
                    ("cmd_filedataerror", "core_parser_err_filedataerror")
                }
                CommandKind::FileStopSending => {
                    ("cmd_filestopsending", "core_parser_err_filestopsending")
                }
                CommandKind::FileStopReceiving => {
                    ("cmd_filestopreceiving", "core_parser_err_filestopreceiving")
                }
            },
            NoticeCode::FakePing => ("fake_ping", "core_cctrl_err_fake_ping"),
            NoticeCode::AlreadyPinged => ("already_pinged", "core_cctrl_err_already_pinged"),
            NoticeCode::Masquerade => ("masquerade", "core_cctrl_err_masquerade"),
            NoticeCode::AddBuddy => ("add_buddy", "core_cctrl_err_add_buddy"),
            NoticeCode::Pong => ("pong", "core_cctrl_err_pong"),
            NoticeCode::SocketReadClosed => ("socket_read_closed", "core_socket_read_closed"),
            NoticeCode::SocketReadFailed => ("socket_read_failed", "core_socket_read_error"),
            NoticeCode::SocketWriteFailed => ("socket_write_failed", "core_socket_write_error"),
            NoticeCode::SocketLineTooLong => ("socket_line_too_long", "core_socket_line_too_long"),
        }
    }
}

impl fmt::Display for NoticeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a notice is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeContext {
    /// An existing buddy, by address.
    Buddy(String),
    /// An address claimed by the peer that is not (yet) a trusted buddy.
    Address(String),
}

/// An immutable notice record.
///
/// # Example
///
/// ```rust
/// use torchat_control::{Notice, NoticeCode, NoticeKind};
///
/// let cause = Notice::new(NoticeCode::SocketReadClosed, "connection closed");
/// let notice = Notice::new(NoticeCode::Socket, "socket error").with_cause(cause);
///
/// assert_eq!(notice.kind(), NoticeKind::Error);
/// assert_eq!(notice.cause().map(|c| c.code()), Some(NoticeCode::SocketReadClosed));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    code: NoticeCode,
    message: String,
    cause: Option<Box<Notice>>,
    context: Option<NoticeContext>,
}

impl Notice {
    /// Creates a notice with the given code and (already localized) message.
    pub fn new(code: NoticeCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            context: None,
        }
    }

    /// Attaches a lower-layer notice as the cause.
    pub fn with_cause(mut self, cause: Notice) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attaches a context reference.
    pub fn with_context(mut self, context: NoticeContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Info or Error, derived from the code.
    pub fn kind(&self) -> NoticeKind {
        self.code.kind()
    }

    /// The notice code.
    pub fn code(&self) -> NoticeCode {
        self.code
    }

    /// The localized message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The nested cause, if any.
    pub fn cause(&self) -> Option<&Notice> {
        self.cause.as_deref()
    }

    /// The context reference, if any.
    pub fn context(&self) -> Option<&NoticeContext> {
        self.context.as_ref()
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        match &self.context {
            Some(NoticeContext::Buddy(address)) => write!(f, " (buddy {})", address)?,
            Some(NoticeContext::Address(address)) => write!(f, " (address {})", address)?,
            None => {}
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}
