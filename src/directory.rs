//! The buddy directory and the controller interface consumed by control clients.
//!
//! A [`ControlClient`](crate::ControlClient) never owns buddies. It consults a
//! [`Controller`] to resolve buddies by address or by handshake random, to
//! materialize newly announced buddies and to deliver its notices.
//!
//! [`BuddyList`] is the in-memory implementation. Both indexes live behind
//! one mutex so that every lookup, insert and retirement is atomic with
//! respect to handshakes running on other connections:
//!
//! ```text
//!   BuddyList
//!   └── Mutex<Entries>
//!       ├── by_address: address ──▶ Arc<Buddy>
//!       └── by_random:  random  ──▶ address
//! ```
//!
//! A random resolves through [`Controller::claim_random`] at most once. The
//! claim removes it from `by_random` and marks the buddy as ponged inside the
//! same critical section, so two connections replaying one `pong` cannot both
//! win and a `ping` racing the claim sees the buddy as already ponged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::buddy::{lock, Buddy, HandshakeRandom};
use crate::client::ClientId;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::locale::{Strings, MYSELF_KEY};
use crate::logger;
use crate::notice::Notice;
use crate::protocol::{is_valid_address, Command, Status};

/// Directory and notification sink used by control clients.
///
/// Implementations must be safe for concurrent use by many clients.
pub trait Controller: Send + Sync {
    /// Resolves a buddy by hidden-service address.
    fn buddy_by_address(&self, address: &str) -> Option<Arc<Buddy>>;

    /// Resolves the buddy whose current handshake random is `random`,
    /// without retiring it.
    fn buddy_by_random(&self, random: &str) -> Option<Arc<Buddy>>;

    /// Resolves the buddy holding `random`, retires the random and marks the
    /// buddy as ponged in the same atomic step. Returns `None` if no buddy
    /// holds it.
    fn claim_random(&self, random: &str) -> Option<Arc<Buddy>>;

    /// Materializes a buddy for `address` with display name `alias`.
    ///
    /// Adding an address that is already known succeeds without changes.
    ///
    /// # Errors
    ///
    /// Returns an error when the buddy cannot be created.
    fn add_buddy(&self, alias: &str, address: &str) -> Result<()>;

    /// Our current presence status.
    fn status(&self) -> Status;

    /// Receives a notice emitted by a control client. Must not fail.
    fn client_notice(&self, client: ClientId, notice: Notice);
}

#[derive(Default)]
struct Entries {
    by_address: HashMap<String, Arc<Buddy>>,
    by_random: HashMap<String, String>,
}

impl Entries {
    fn index_random(&mut self, buddy: &Buddy) {
        let random = buddy.with_random(str::to_string);
        self.by_random.insert(random, buddy.address().to_string());
    }

    fn insert(&mut self, buddy: Buddy) {
        self.index_random(&buddy);
        self.by_address
            .insert(buddy.address().to_string(), Arc::new(buddy));
    }
}

/// In-memory buddy directory.
///
/// # Example
///
/// ```rust
/// use torchat_control::{BuddyList, Controller};
///
/// let list = BuddyList::new();
/// list.add_buddy("Alice", "abcdefghijklmnop").unwrap();
///
/// let alice = list.buddy_by_address("abcdefghijklmnop").unwrap();
/// assert_eq!(alice.alias(), "Alice");
/// assert_eq!(list.len(), 1);
/// ```
pub struct BuddyList {
    entries: Mutex<Entries>,
    status: Mutex<Status>,
    capacity: Option<usize>,
    notices: Option<mpsc::UnboundedSender<(ClientId, Notice)>>,
}

impl Default for BuddyList {
    fn default() -> Self {
        Self::new()
    }
}

impl BuddyList {
    /// Creates an empty, unbounded directory.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            status: Mutex::new(Status::default()),
            capacity: None,
            notices: None,
        }
    }

    /// Creates a directory from configuration.
    ///
    /// Applies `max_buddies` and the configured status, and adds an entry for
    /// our own address when it is known, so that self-loopback handshakes
    /// can be verified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the configured self address is invalid.
    pub fn from_config(config: &Config, strings: &Strings) -> Result<Self> {
        let mut list = Self::new();
        list.capacity = config.max_buddies;
        *lock(&list.status) = config.status;

        if let Some(ref address) = config.self_address {
            list.add_buddy(&strings.localized(MYSELF_KEY), address)?;
        }
        Ok(list)
    }

    /// Limits the number of buddies the directory accepts.
    pub fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Forwards every client notice to `sink` in addition to logging it.
    pub fn with_notice_sink(mut self, sink: mpsc::UnboundedSender<(ClientId, Notice)>) -> Self {
        self.notices = Some(sink);
        self
    }

    /// Changes our presence status.
    pub fn set_status(&self, status: Status) {
        *lock(&self.status) = status;
    }

    /// Number of buddies.
    pub fn len(&self) -> usize {
        lock(&self.entries).by_address.len()
    }

    /// Returns true if the directory holds no buddies.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Addresses of all buddies, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = lock(&self.entries).by_address.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Gives the buddy a fresh handshake random for a new outbound attempt.
    ///
    /// The previous random is retired, so a late `pong` echoing it fails,
    /// and the buddy is no longer ponged, so the peer may ping us again.
    /// Returns the `ping` to send, or `None` for an unknown address.
    pub fn renew_random(&self, address: &str, self_address: &str) -> Option<Command> {
        let mut entries = lock(&self.entries);
        let buddy = entries.by_address.get(address)?.clone();

        let retired = buddy.replace_random(HandshakeRandom::generate());
        entries.by_random.remove(retired.as_str());
        entries.index_random(&buddy);
        buddy.clear_ponged();

        Some(buddy.ping_command(self_address))
    }

    /// Removes a buddy and retires its random. Returns true if it existed.
    pub fn remove_buddy(&self, address: &str) -> bool {
        let mut entries = lock(&self.entries);
        match entries.by_address.remove(address) {
            Some(_) => {
                entries.by_random.retain(|_, owner| owner != address);
                true
            }
            None => false,
        }
    }
}

impl Controller for BuddyList {
    fn buddy_by_address(&self, address: &str) -> Option<Arc<Buddy>> {
        lock(&self.entries).by_address.get(address).cloned()
    }

    fn buddy_by_random(&self, random: &str) -> Option<Arc<Buddy>> {
        let entries = lock(&self.entries);
        let address = entries.by_random.get(random)?;
        entries.by_address.get(address).cloned()
    }

    fn claim_random(&self, random: &str) -> Option<Arc<Buddy>> {
        let mut entries = lock(&self.entries);
        let address = entries.by_random.remove(random)?;
        let buddy = entries.by_address.get(&address).cloned()?;
        buddy.mark_ponged();
        Some(buddy)
    }

    fn add_buddy(&self, alias: &str, address: &str) -> Result<()> {
        if !is_valid_address(address) {
            return Err(Error::Validation(format!(
                "invalid hidden service address: {}",
                address
            )));
        }

        let mut entries = lock(&self.entries);
        if entries.by_address.contains_key(address) {
            return Ok(());
        }
        if let Some(capacity) = self.capacity {
            if entries.by_address.len() >= capacity {
                return Err(Error::Directory(format!(
                    "buddy list is full ({} buddies)",
                    capacity
                )));
            }
        }

        entries.insert(Buddy::new(alias, address));
        Ok(())
    }

    fn status(&self) -> Status {
        *lock(&self.status)
    }

    fn client_notice(&self, client: ClientId, notice: Notice) {
        logger::log_notice(client, &notice);
        if let Some(ref sink) = self.notices {
            let _ = sink.send((client, notice));
        }
    }
}
