//! Control-channel wire protocol: command decoding and the parse-error taxonomy.
//!
//! The control channel carries newline-delimited commands. The first
//! space-delimited token of a line is the command keyword and the remaining
//! tokens are its arguments:
//!
//! ```text
//! ping <address> <random>
//! pong <random>
//! status available|away|xa
//! version <text...>
//! message <text...>
//! add_me
//! remove_me
//! filename <id> <size> <block_size> <name...>
//! filedata <id> <start> <hash> <data...>
//! filedata_b64 <id> <start> <hash> <base64>
//! filedataok <id> <start>
//! filedataerror <id> <start>
//! filestopsending <id>
//! filestopreceiving <id>
//! ```
//!
//! Free-form arguments are escaped on the wire: a backslash is sent as `\/`
//! and a newline as `\n`. [`parse_line`] unescapes them and [`Command::to_line`]
//! produces the escaped form.
//!
//! The command set is closed. Anything outside it decodes to
//! [`ParseError::UnknownCommand`]; a known keyword with bad arguments decodes
//! to [`ParseError::Malformed`]. Both are fatal for the connection that sent
//! them, see [`ParseError::code`] for the notice code each one maps to.
//!
//! # Example
//!
//! ```rust
//! use torchat_control::protocol::{parse_line, Command, ParseError};
//!
//! let cmd = parse_line(b"pong 8813429735").unwrap();
//! assert_eq!(cmd, Command::Pong { random: "8813429735".to_string() });
//!
//! let err = parse_line(b"pong").unwrap_err();
//! assert_eq!(err.code().as_str(), "cmd_pong");
//!
//! let err = parse_line(b"launch_missiles now").unwrap_err();
//! assert!(matches!(err, ParseError::UnknownCommand(_)));
//! ```

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notice::NoticeCode;

/// Longest handshake random accepted in a `ping` or `pong`.
pub const MAX_RANDOM_LEN: usize = 256;

/// Longest keyword echoed back in [`ParseError::UnknownCommand`].
const MAX_ECHOED_KEYWORD: usize = 32;

/// The closed set of control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `ping <address> <random>`
    Ping,
    /// `pong <random>`
    Pong,
    /// `status <status>`
    Status,
    /// `version <text>`
    Version,
    /// `message <text>`
    Message,
    /// `add_me`
    AddMe,
    /// `remove_me`
    RemoveMe,
    /// `filename <id> <size> <block_size> <name>`
    Filename,
    /// `filedata <id> <start> <hash> <data>`
    Filedata,
    /// `filedata_b64 <id> <start> <hash> <base64>`
    FiledataB64,
    /// `filedataok <id> <start>`
    FiledataOk,
    /// `filedataerror <id> <start>`
    FiledataError,
    /// `filestopsending <id>`
    FileStopSending,
    /// `filestopreceiving <id>`
    FileStopReceiving,
}

impl CommandKind {
    /// Every command kind, in wire-protocol order.
    pub const ALL: [CommandKind; 14] = [
        CommandKind::Ping,
        CommandKind::Pong,
        CommandKind::Status,
        CommandKind::Version,
        CommandKind::Message,
        CommandKind::AddMe,
        CommandKind::RemoveMe,
        CommandKind::Filename,
        CommandKind::Filedata,
        CommandKind::FiledataB64,
        CommandKind::FiledataOk,
        CommandKind::FiledataError,
        CommandKind::FileStopSending,
        CommandKind::FileStopReceiving,
    ];

    /// The keyword that introduces this command on the wire.
    pub fn keyword(self) -> &'static str {
        match self {
            CommandKind::Ping => "ping",
            CommandKind::Pong => "pong",
            CommandKind::Status => "status",
            CommandKind::Version => "version",
            CommandKind::Message => "message",
            CommandKind::AddMe => "add_me",
            CommandKind::RemoveMe => "remove_me",
            CommandKind::Filename => "filename",
            CommandKind::Filedata => "filedata",
            CommandKind::FiledataB64 => "filedata_b64",
            CommandKind::FiledataOk => "filedataok",
            CommandKind::FiledataError => "filedataerror",
            CommandKind::FileStopSending => "filestopsending",
            CommandKind::FileStopReceiving => "filestopreceiving",
        }
    }

    /// Looks up a command kind by its exact keyword.
    pub fn from_keyword(keyword: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.keyword().as_bytes() == keyword)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Presence status announced with the `status` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Online and reachable.
    #[default]
    Available,
    /// Away from the keyboard.
    Away,
    /// Extended away.
    Xa,
}

impl Status {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Available => "available",
            Status::Away => "away",
            Status::Xa => "xa",
        }
    }

    fn from_wire(token: &[u8]) -> Option<Self> {
        match token {
            b"available" => Some(Status::Available),
            b"away" => Some(Status::Away),
            b"xa" => Some(Status::Xa),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One block of a file transfer carried by `filedata` or `filedata_b64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// Transfer identifier chosen by the sender.
    pub id: String,
    /// Offset of the block within the file.
    pub start: u64,
    /// Hash of the block as announced by the sender.
    pub hash: String,
    /// Decoded block contents.
    pub data: Vec<u8>,
}

/// A decoded control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Handshake request: the sender claims `address` and asks us to echo `random`.
    Ping {
        /// Hidden-service address claimed by the sender.
        address: String,
        /// Random the sender expects back in our `pong`.
        random: String,
    },
    /// Handshake answer echoing a random we sent in an earlier `ping`.
    Pong {
        /// The echoed random.
        random: String,
    },
    /// Presence update.
    Status(Status),
    /// Client version string.
    Version(String),
    /// Chat message text.
    Message(String),
    /// Request to be added to the receiver's buddy list.
    AddMe,
    /// Request to be removed from the receiver's buddy list.
    RemoveMe,
    /// Start of a file transfer.
    Filename {
        /// Transfer identifier.
        id: String,
        /// Total file size in bytes.
        size: u64,
        /// Size of each `filedata` block.
        block_size: u64,
        /// File name.
        name: String,
    },
    /// File block with raw (escaped) contents.
    Filedata(FileChunk),
    /// File block with base64 contents.
    FiledataB64(FileChunk),
    /// Receiver acknowledges a block.
    FiledataOk {
        /// Transfer identifier.
        id: String,
        /// Offset of the acknowledged block.
        start: u64,
    },
    /// Receiver rejects a block.
    FiledataError {
        /// Transfer identifier.
        id: String,
        /// Offset of the rejected block.
        start: u64,
    },
    /// Receiver asks the sender to stop sending.
    FileStopSending {
        /// Transfer identifier.
        id: String,
    },
    /// Sender tells the receiver it stopped sending.
    FileStopReceiving {
        /// Transfer identifier.
        id: String,
    },
}

impl Command {
    /// The kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Ping { .. } => CommandKind::Ping,
            Command::Pong { .. } => CommandKind::Pong,
            Command::Status(_) => CommandKind::Status,
            Command::Version(_) => CommandKind::Version,
            Command::Message(_) => CommandKind::Message,
            Command::AddMe => CommandKind::AddMe,
            Command::RemoveMe => CommandKind::RemoveMe,
            Command::Filename { .. } => CommandKind::Filename,
            Command::Filedata(_) => CommandKind::Filedata,
            Command::FiledataB64(_) => CommandKind::FiledataB64,
            Command::FiledataOk { .. } => CommandKind::FiledataOk,
            Command::FiledataError { .. } => CommandKind::FiledataError,
            Command::FileStopSending { .. } => CommandKind::FileStopSending,
            Command::FileStopReceiving { .. } => CommandKind::FileStopReceiving,
        }
    }

    /// Encodes the command into its wire form, without the trailing newline.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = self.kind().keyword().as_bytes().to_vec();
        let mut push = |arg: &[u8]| {
            line.push(b' ');
            line.extend_from_slice(arg);
        };

        match self {
            Command::Ping { address, random } => {
                push(address.as_bytes());
                push(random.as_bytes());
            }
            Command::Pong { random } => push(random.as_bytes()),
            Command::Status(status) => push(status.as_str().as_bytes()),
            Command::Version(text) | Command::Message(text) => push(&escape(text.as_bytes())),
            Command::AddMe | Command::RemoveMe => {}
            Command::Filename {
                id,
                size,
                block_size,
                name,
            } => {
                push(&escape(id.as_bytes()));
                push(size.to_string().as_bytes());
                push(block_size.to_string().as_bytes());
                push(&escape(name.as_bytes()));
            }
            Command::Filedata(chunk) => {
                push(&escape(chunk.id.as_bytes()));
                push(chunk.start.to_string().as_bytes());
                push(&escape(chunk.hash.as_bytes()));
                push(&escape(&chunk.data));
            }
            Command::FiledataB64(chunk) => {
                push(&escape(chunk.id.as_bytes()));
                push(chunk.start.to_string().as_bytes());
                push(&escape(chunk.hash.as_bytes()));
                push(BASE64.encode(&chunk.data).as_bytes());
            }
            Command::FiledataOk { id, start } | Command::FiledataError { id, start } => {
                push(&escape(id.as_bytes()));
                push(start.to_string().as_bytes());
            }
            Command::FileStopSending { id } | Command::FileStopReceiving { id } => {
                push(&escape(id.as_bytes()));
            }
        }

        line
    }
}

/// Why a line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The keyword is not part of the command set.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// The keyword is known but its arguments are not acceptable.
    #[error("malformed {kind} command: {reason}")]
    Malformed {
        /// The command that failed to decode.
        kind: CommandKind,
        /// Short description of the defect.
        reason: &'static str,
    },
}

impl ParseError {
    /// Notice code reported to the controller for this error.
    ///
    /// `filedata` and `filedata_b64` share one code.
    pub fn code(&self) -> NoticeCode {
        match self {
            ParseError::UnknownCommand(_) => NoticeCode::UnknownCommand,
            ParseError::Malformed { kind, .. } => NoticeCode::command(*kind),
        }
    }
}

/// Returns true if `address` is a syntactically valid hidden-service name
/// (16 or 56 characters of lowercase base32, without the `.onion` suffix).
pub fn is_valid_address(address: &str) -> bool {
    matches!(address.len(), 16 | 56)
        && address
            .bytes()
            .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
}

/// Decodes one control line, given without its trailing newline.
///
/// # Errors
///
/// Returns [`ParseError::UnknownCommand`] when the keyword is not in the
/// command set and [`ParseError::Malformed`] when the arguments are missing,
/// superfluous, empty or invalid.
pub fn parse_line(line: &[u8]) -> Result<Command, ParseError> {
    let (keyword, rest) = split_token(line);
    let kind = CommandKind::from_keyword(keyword).ok_or_else(|| {
        let shown = &keyword[..keyword.len().min(MAX_ECHOED_KEYWORD)];
        ParseError::UnknownCommand(String::from_utf8_lossy(shown).into_owned())
    })?;

    let mut args = Args { kind, rest };
    let command = match kind {
        CommandKind::Ping => {
            let address = args.text_token()?;
            if !is_valid_address(&address) {
                return Err(args.malformed("invalid hidden service address"));
            }
            let random = args.random()?;
            Command::Ping { address, random }
        }
        CommandKind::Pong => Command::Pong {
            random: args.random()?,
        },
        CommandKind::Status => {
            let token = args.token()?;
            let status =
                Status::from_wire(token).ok_or_else(|| args.malformed("unknown status"))?;
            Command::Status(status)
        }
        CommandKind::Version => {
            let text = args.text_remainder()?;
            if text.is_empty() {
                return Err(args.malformed("empty version"));
            }
            Command::Version(text)
        }
        CommandKind::Message => Command::Message(args.text_remainder()?),
        CommandKind::AddMe => Command::AddMe,
        CommandKind::RemoveMe => Command::RemoveMe,
        CommandKind::Filename => {
            let id = args.text_token()?;
            let size = args.number()?;
            let block_size = args.number()?;
            if block_size == 0 {
                return Err(args.malformed("zero block size"));
            }
            let name = args.text_remainder()?;
            if name.is_empty() {
                return Err(args.malformed("empty file name"));
            }
            Command::Filename {
                id,
                size,
                block_size,
                name,
            }
        }
        CommandKind::Filedata => {
            let (id, start, hash) = args.chunk_header()?;
            let raw = args.remainder()?;
            let data = args.unescaped(raw)?;
            Command::Filedata(FileChunk {
                id,
                start,
                hash,
                data,
            })
        }
        CommandKind::FiledataB64 => {
            let (id, start, hash) = args.chunk_header()?;
            let encoded = args.token()?;
            let data = BASE64
                .decode(encoded)
                .map_err(|_| args.malformed("invalid base64 data"))?;
            Command::FiledataB64(FileChunk {
                id,
                start,
                hash,
                data,
            })
        }
        CommandKind::FiledataOk => Command::FiledataOk {
            id: args.text_token()?,
            start: args.number()?,
        },
        CommandKind::FiledataError => Command::FiledataError {
            id: args.text_token()?,
            start: args.number()?,
        },
        CommandKind::FileStopSending => Command::FileStopSending {
            id: args.text_token()?,
        },
        CommandKind::FileStopReceiving => Command::FileStopReceiving {
            id: args.text_token()?,
        },
    };

    args.finish()?;
    Ok(command)
}

/// Escapes free-form bytes for the wire (`\` becomes `\/`, newline becomes `\n`).
pub fn escape(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for &b in input {
        match b {
            b'\\' => out.extend_from_slice(b"\\/"),
            b'\n' => out.extend_from_slice(b"\\n"),
            _ => out.push(b),
        }
    }
    out
}

/// Reverses [`escape`]. Returns `None` on an unknown or truncated escape sequence.
pub fn unescape(input: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter();
    while let Some(&b) = bytes.next() {
        if b == b'\\' {
            match bytes.next() {
                Some(b'/') => out.push(b'\\'),
                Some(b'n') => out.push(b'\n'),
                _ => return None,
            }
        } else {
            out.push(b);
        }
    }
    Some(out)
}

fn split_token(input: &[u8]) -> (&[u8], Option<&[u8]>) {
    match input.iter().position(|&b| b == b' ') {
        Some(i) => (&input[..i], Some(&input[i + 1..])),
        None => (input, None),
    }
}

/// Argument cursor over the part of a line after the keyword.
struct Args<'a> {
    kind: CommandKind,
    rest: Option<&'a [u8]>,
}

impl<'a> Args<'a> {
    fn malformed(&self, reason: &'static str) -> ParseError {
        ParseError::Malformed {
            kind: self.kind,
            reason,
        }
    }

    fn token(&mut self) -> Result<&'a [u8], ParseError> {
        let rest = self
            .rest
            .ok_or_else(|| self.malformed("missing argument"))?;
        let (token, tail) = split_token(rest);
        if token.is_empty() {
            return Err(self.malformed("empty argument"));
        }
        self.rest = tail;
        Ok(token)
    }

    fn remainder(&mut self) -> Result<&'a [u8], ParseError> {
        self.rest
            .take()
            .ok_or_else(|| self.malformed("missing argument"))
    }

    fn unescaped(&self, raw: &[u8]) -> Result<Vec<u8>, ParseError> {
        unescape(raw).ok_or_else(|| self.malformed("invalid escape sequence"))
    }

    fn text(&self, raw: &[u8]) -> Result<String, ParseError> {
        let bytes = self.unescaped(raw)?;
        String::from_utf8(bytes).map_err(|_| self.malformed("argument is not valid UTF-8"))
    }

    fn text_token(&mut self) -> Result<String, ParseError> {
        let raw = self.token()?;
        self.text(raw)
    }

    fn text_remainder(&mut self) -> Result<String, ParseError> {
        let raw = self.remainder()?;
        self.text(raw)
    }

    fn number(&mut self) -> Result<u64, ParseError> {
        let raw = self.token()?;
        std::str::from_utf8(raw)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.malformed("invalid number"))
    }

    fn random(&mut self) -> Result<String, ParseError> {
        let raw = self.token()?;
        if raw.len() > MAX_RANDOM_LEN || !raw.iter().all(|b| b.is_ascii_graphic()) {
            return Err(self.malformed("invalid random"));
        }
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn chunk_header(&mut self) -> Result<(String, u64, String), ParseError> {
        let id = self.text_token()?;
        let start = self.number()?;
        let hash = self.text_token()?;
        Ok((id, start, hash))
    }

    fn finish(self) -> Result<(), ParseError> {
        match self.rest {
            None => Ok(()),
            Some(_) => Err(self.malformed("unexpected trailing arguments")),
        }
    }
}
