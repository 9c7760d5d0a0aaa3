//! Buddies: remote peers identified by their hidden-service address.
//!
//! A [`Buddy`] is shared between the directory and the control clients as an
//! `Arc<Buddy>`. Its handshake state is interior and synchronized:
//!
//! | State | Meaning |
//! |-------|---------|
//! | `random` | Our single-use handshake random, sent in our `ping` to this buddy |
//! | `pending_pong` | The buddy pinged us; we owe it a `pong` echoing its random |
//! | `ponged` | The buddy answered our ping; an authenticated input connection exists |
//! | `input` | The authenticated connection, moved in from a control client |
//!
//! `ponged` and `pending_pong` share one lock: once the buddy is ponged, no
//! further inbound handshake can record a pending pong. `ponged` is cleared
//! again when the input connection is taken away or a new outbound attempt
//! starts, so the peer can reconnect.
//!
//! # Handshake
//!
//! ```text
//!   us                                   buddy
//!   ──────────────── ping <self> <our random> ──────────────▶
//!   ◀─────────────── ping <buddy> <its random> ──────────────  (control client)
//!   ──────────────── pong <its random> ─────────────────────▶  (start_handshake)
//!   ◀─────────────── pong <our random> ──────────────────────  (set_input_connection)
//! ```
//!
//! Sending our own `ping` and `pong` belongs to the outbound connection
//! layer; this module records what has to be sent.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::protocol::{Command, Status};
use crate::socket::LineSocket;

/// Number of characters in a generated handshake random.
pub const RANDOM_LEN: usize = 40;

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A single-use handshake random that clears itself on drop.
///
/// Knowledge of a buddy's current random is what authenticates a `pong`, so
/// it is kept out of debug output and wiped from memory when replaced.
///
/// # Example
///
/// ```rust
/// use torchat_control::buddy::HandshakeRandom;
///
/// let random = HandshakeRandom::generate();
/// assert!(random.matches(random.as_str()));
/// assert!(format!("{:?}", random).contains("REDACTED"));
/// ```
#[derive(Clone)]
pub struct HandshakeRandom(String);

impl HandshakeRandom {
    /// Generates a fresh random from the thread RNG.
    pub fn generate() -> Self {
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_LEN)
            .map(char::from)
            .collect();
        Self(random)
    }

    /// Returns the random as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a candidate without exiting early on the first
    /// mismatching byte.
    pub fn matches(&self, candidate: &str) -> bool {
        let ours = self.0.as_bytes();
        let theirs = candidate.as_bytes();
        if ours.len() != theirs.len() {
            return false;
        }
        ours.iter()
            .zip(theirs)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Drop for HandshakeRandom {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for HandshakeRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandshakeRandom([REDACTED])")
    }
}

/// A `pong` we owe a buddy after it pinged us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPong {
    /// The buddy's random, to be echoed.
    pub random: String,
    /// Our status when the ping arrived, announced alongside the pong.
    pub status: Status,
}

#[derive(Default)]
struct Inbound {
    ponged: bool,
    pending_pong: Option<PendingPong>,
}

/// A remote peer.
pub struct Buddy {
    address: String,
    alias: Mutex<String>,
    random: Mutex<HandshakeRandom>,
    inbound: Mutex<Inbound>,
    input: Mutex<Option<LineSocket>>,
    created_at: DateTime<Utc>,
}

impl Buddy {
    /// Creates a buddy with a freshly generated handshake random.
    pub fn new(alias: &str, address: &str) -> Self {
        Self {
            address: address.to_string(),
            alias: Mutex::new(alias.to_string()),
            random: Mutex::new(HandshakeRandom::generate()),
            inbound: Mutex::new(Inbound::default()),
            input: Mutex::new(None),
            created_at: Utc::now(),
        }
    }

    /// Hidden-service address identifying this buddy.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Display name.
    pub fn alias(&self) -> String {
        lock(&self.alias).clone()
    }

    /// Changes the display name.
    pub fn set_alias(&self, alias: &str) {
        *lock(&self.alias) = alias.to_string();
    }

    /// When this buddy entry was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether `candidate` equals our current handshake random for this buddy.
    pub fn random_matches(&self, candidate: &str) -> bool {
        lock(&self.random).matches(candidate)
    }

    /// The `ping` that opens our side of the handshake with this buddy.
    pub fn ping_command(&self, self_address: &str) -> Command {
        Command::Ping {
            address: self_address.to_string(),
            random: lock(&self.random).as_str().to_string(),
        }
    }

    /// Runs `f` on our current handshake random without copying it out.
    pub(crate) fn with_random<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        f(lock(&self.random).as_str())
    }

    /// Replaces our handshake random and returns the retired one.
    pub(crate) fn replace_random(&self, random: HandshakeRandom) -> HandshakeRandom {
        std::mem::replace(&mut *lock(&self.random), random)
    }

    /// Whether an inbound handshake already completed for this buddy.
    pub fn is_ponged(&self) -> bool {
        lock(&self.inbound).ponged
    }

    /// Marks the buddy as ponged. Further pings are refused until the
    /// flag is cleared.
    pub(crate) fn mark_ponged(&self) {
        lock(&self.inbound).ponged = true;
    }

    /// Clears the ponged flag so a new inbound handshake is accepted.
    pub(crate) fn clear_ponged(&self) {
        lock(&self.inbound).ponged = false;
    }

    /// Continues the handshake after the buddy pinged us with `random`.
    ///
    /// Records the `pong` owed to the buddy; a later ping replaces an
    /// earlier unanswered one. Returns false without recording anything if
    /// the buddy is already ponged.
    #[must_use]
    pub fn start_handshake(&self, random: &str, status: Status) -> bool {
        let mut inbound = lock(&self.inbound);
        if inbound.ponged {
            return false;
        }
        debug!(buddy = %self.address, %status, "handshake started, pong pending");
        inbound.pending_pong = Some(PendingPong {
            random: random.to_string(),
            status,
        });
        true
    }

    /// The `pong` currently owed to the buddy, if any.
    pub fn pending_pong(&self) -> Option<PendingPong> {
        lock(&self.inbound).pending_pong.clone()
    }

    /// Takes the owed `pong` for sending.
    pub fn take_pending_pong(&self) -> Option<PendingPong> {
        lock(&self.inbound).pending_pong.take()
    }

    /// Adopts an authenticated connection and marks the buddy as ponged.
    pub fn set_input_connection(&self, socket: LineSocket) {
        let previous = lock(&self.input).replace(socket);
        self.mark_ponged();
        info!(
            buddy = %self.address,
            replaced = previous.is_some(),
            "input connection authenticated"
        );
    }

    /// Whether an authenticated input connection is attached.
    pub fn has_input_connection(&self) -> bool {
        lock(&self.input).is_some()
    }

    /// Takes the authenticated input connection away from the buddy.
    ///
    /// The buddy is no longer ponged afterwards, so the peer may run a new
    /// inbound handshake.
    pub fn take_input_connection(&self) -> Option<LineSocket> {
        let socket = lock(&self.input).take();
        self.clear_ponged();
        socket
    }
}

impl fmt::Debug for Buddy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buddy")
            .field("address", &self.address)
            .field("alias", &self.alias())
            .field("ponged", &self.is_ponged())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
