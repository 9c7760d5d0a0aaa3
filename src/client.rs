//! Per-connection control client running the ping/pong handshake.
//!
//! A [`ControlClient`] owns one accepted connection until the peer proves
//! which buddy it is. Each client is an actor: a tokio task with a private
//! mailbox. Lifecycle requests from other tasks and lines read from the
//! socket are processed one at a time on that task, so no two protocol steps
//! of the same connection ever interleave.
//!
//! # Lifecycle
//!
//! ```text
//!            start(controller)              stop() / fatal error
//!   ┌──────┐ ───────────────────▶ ┌─────────┐ ─────────────────▶ ┌─────────┐
//!   │ Idle │                      │ Running │                    │ Stopped │
//!   └──────┘                      └────┬────┘                    └─────────┘
//!                                      │ pong <random> accepted
//!                                      ▼
//!                          socket moved into the Buddy,
//!                          client keeps running without it
//! ```
//!
//! # Handshake Checks
//!
//! For `ping <address> <random>` the checks run in this order; the first
//! one that fails emits an error notice and stops the client:
//!
//! | Step | Check | Notice on failure |
//! |------|-------|-------------------|
//! | 1 | Address matches every earlier `ping` on this connection | `fake_ping` |
//! | 2 | Known buddy has not completed an inbound handshake yet | `already_pinged` |
//! | 3 | Our own address carries the random we issued | `masquerade` |
//! | 4 | Unknown address can be added to the directory | `add_buddy` |
//! | 5 | [`Buddy::start_handshake`] records the owed `pong` unless a `pong` was claimed meanwhile | `already_pinged` |
//!
//! A `pong <random>` is accepted only if [`Controller::claim_random`]
//! resolves it; the connection then moves into that buddy. Any other
//! decoded command is ignored until authentication, and any line that fails
//! to decode is fatal.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use torchat_control::{BuddyList, ClientContext, ControlClient, LineSocket};
//!
//! # async fn example() -> torchat_control::Result<()> {
//! let buddies = Arc::new(BuddyList::new());
//! let context = Arc::new(ClientContext::default());
//! let listener = TcpListener::bind("127.0.0.1:11009").await?;
//!
//! let (stream, _) = listener.accept().await?;
//! let client = ControlClient::new(context, LineSocket::new(stream));
//! client.start(buddies);
//! client.wait_stopped().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::buddy::Buddy;
use crate::config::Config;
use crate::directory::Controller;
use crate::locale::{Strings, NEW_BUDDY_KEY};
use crate::notice::{Notice, NoticeCode, NoticeContext};
use crate::protocol::{parse_line, Command};
use crate::socket::{LineSocket, SocketError};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a control client, used in notices and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Allocates the next identifier.
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the identifier.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cc-{}", self.0)
    }
}

/// Lifecycle state of a control client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Created, not started yet. Nothing is read from the socket.
    Idle,
    /// Processing lines from the socket.
    Running,
    /// Terminal. The socket is closed or was handed to a buddy.
    Stopped,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Idle => write!(f, "idle"),
            ClientState::Running => write!(f, "running"),
            ClientState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Settings shared by every control client of one node.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    self_address: Option<String>,
    strings: Strings,
}

impl ClientContext {
    /// Creates a context for a node publishing `self_address`.
    pub fn new(self_address: Option<String>, strings: Strings) -> Self {
        Self {
            self_address,
            strings,
        }
    }

    /// Builds the context from a loaded configuration, applying the
    /// configured string overrides.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.self_address.clone(),
            Strings::with_overrides(&config.strings),
        )
    }

    /// Our own hidden-service address, if known.
    pub fn self_address(&self) -> Option<&str> {
        self.self_address.as_deref()
    }

    /// Localized strings used for notices and new buddy aliases.
    pub fn strings(&self) -> &Strings {
        &self.strings
    }

    /// Whether `address` is our own published address.
    pub fn is_self_address(&self, address: &str) -> bool {
        self.self_address.as_deref() == Some(address)
    }
}

enum Task {
    Start(Arc<dyn Controller>),
    Stop,
}

/// Handle to a control client actor.
///
/// Creating the handle spawns the actor on the current tokio runtime.
/// [`start`](Self::start) and [`stop`](Self::stop) only enqueue requests and
/// return immediately. Dropping every handle does not stop a running client;
/// it keeps serving its connection until the connection fails or is handed
/// to a buddy.
#[derive(Debug)]
pub struct ControlClient {
    id: ClientId,
    tasks: mpsc::UnboundedSender<Task>,
    state: watch::Receiver<ClientState>,
}

impl ControlClient {
    /// Wraps `socket` in a new, idle control client.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(context: Arc<ClientContext>, socket: LineSocket) -> Self {
        let id = ClientId::next();
        let (tasks, mailbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ClientState::Idle);

        let core = ClientCore {
            id,
            context,
            state: ClientState::Idle,
            state_tx,
            socket: Some(socket),
            controller: None,
            last_ping_address: None,
            read_armed: false,
        };
        tokio::spawn(core.run(mailbox));

        Self { id, tasks, state }
    }

    /// The client's identifier.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Binds `controller` and starts processing the connection.
    ///
    /// Ignored (and `controller` dropped) unless the client is idle and
    /// still owns its socket.
    pub fn start(&self, controller: Arc<dyn Controller>) {
        if self.tasks.send(Task::Start(controller)).is_err() {
            debug!(client = %self.id, "start requested after client exited");
        }
    }

    /// Stops the client. Stopping a client that is not running is a no-op.
    pub fn stop(&self) {
        if self.tasks.send(Task::Stop).is_err() {
            debug!(client = %self.id, "stop requested after client exited");
        }
    }

    /// Last published lifecycle state.
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Waits until the client has stopped, or its task has exited.
    pub async fn wait_stopped(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ClientState::Stopped).await;
    }
}

struct ClientCore {
    id: ClientId,
    context: Arc<ClientContext>,
    state: ClientState,
    state_tx: watch::Sender<ClientState>,
    socket: Option<LineSocket>,
    controller: Option<Arc<dyn Controller>>,
    last_ping_address: Option<String>,
    read_armed: bool,
}

async fn read_next(socket: &mut Option<LineSocket>) -> Result<Vec<u8>, SocketError> {
    match socket {
        Some(socket) => socket.read_line().await,
        None => std::future::pending().await,
    }
}

impl ClientCore {
    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Task>) {
        let mut mailbox_open = true;

        while self.state != ClientState::Stopped {
            let reading = self.read_armed && self.socket.is_some();
            if !mailbox_open && !reading {
                self.stop();
                break;
            }

            tokio::select! {
                biased;

                task = mailbox.recv(), if mailbox_open => match task {
                    Some(Task::Start(controller)) => self.start(controller),
                    Some(Task::Stop) => self.stop(),
                    None => mailbox_open = false,
                },
                line = read_next(&mut self.socket), if reading => {
                    self.read_armed = false;
                    self.handle_line(line);
                }
            }
        }

        debug!(client = %self.id, state = %self.state, "control client task exiting");
    }

    fn publish_state(&mut self, state: ClientState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn start(&mut self, controller: Arc<dyn Controller>) {
        if self.state != ClientState::Idle || self.socket.is_none() {
            debug!(client = %self.id, state = %self.state, "start rejected");
            return;
        }

        self.controller = Some(controller);
        self.state = ClientState::Running;
        self.read_armed = true;
        self.emit(self.notice(NoticeCode::ClientStarted));
        self.publish_state(ClientState::Running);
        info!(client = %self.id, "control client started");
    }

    fn stop(&mut self) {
        if self.state != ClientState::Running {
            return;
        }

        self.state = ClientState::Stopped;
        self.read_armed = false;
        if self.socket.take().is_some() {
            debug!(client = %self.id, "connection closed");
        }
        self.emit(self.notice(NoticeCode::ClientStopped));
        self.controller = None;
        self.publish_state(ClientState::Stopped);
        info!(client = %self.id, "control client stopped");
    }

    fn notice(&self, code: NoticeCode) -> Notice {
        Notice::new(code, self.context.strings().localized(code.localization_key()))
    }

    fn emit(&self, notice: Notice) {
        if let Some(ref controller) = self.controller {
            controller.client_notice(self.id, notice);
        }
    }

    fn fail(&mut self, code: NoticeCode, context: Option<NoticeContext>) {
        let mut notice = self.notice(code);
        if let Some(context) = context {
            notice = notice.with_context(context);
        }
        self.emit(notice);
        self.stop();
    }

    fn handle_line(&mut self, line: Result<Vec<u8>, SocketError>) {
        if self.state != ClientState::Running {
            return;
        }

        let line = match line {
            Ok(line) => line,
            Err(err) => {
                debug!(client = %self.id, error = %err, "socket failure");
                let cause = self.notice(err.code());
                let notice = self.notice(NoticeCode::Socket).with_cause(cause);
                self.emit(notice);
                self.stop();
                return;
            }
        };

        match parse_line(&line) {
            Ok(command) => self.dispatch(command),
            Err(err) => {
                warn!(client = %self.id, error = %err, "rejecting undecodable line");
                self.fail(err.code(), None);
            }
        }
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Ping { address, random } => self.handle_ping(address, random),
            Command::Pong { random } => self.handle_pong(&random),
            Command::Status(_)
            | Command::Version(_)
            | Command::Message(_)
            | Command::AddMe
            | Command::RemoveMe
            | Command::Filename { .. }
            | Command::Filedata(_)
            | Command::FiledataB64(_)
            | Command::FiledataOk { .. }
            | Command::FiledataError { .. }
            | Command::FileStopSending { .. }
            | Command::FileStopReceiving { .. } => {
                debug!(
                    client = %self.id,
                    command = %command.kind(),
                    "ignoring command before authentication"
                );
                self.read_armed = true;
            }
        }
    }

    fn handle_ping(&mut self, address: String, random: String) {
        let Some(controller) = self.controller.clone() else {
            return;
        };

        match self.last_ping_address {
            Some(ref first) if *first != address => {
                warn!(
                    client = %self.id,
                    first = %first,
                    claimed = %address,
                    "ping address changed on the same connection"
                );
                return self.fail(NoticeCode::FakePing, Some(NoticeContext::Address(address)));
            }
            Some(_) => {}
            None => self.last_ping_address = Some(address.clone()),
        }

        let existing = controller.buddy_by_address(&address);
        if let Some(ref buddy) = existing {
            if buddy.is_ponged() {
                warn!(client = %self.id, buddy = %address, "ping for an already connected buddy");
                return self.fail(NoticeCode::AlreadyPinged, Some(NoticeContext::Buddy(address)));
            }
            if self.context.is_self_address(&address) && !buddy.random_matches(&random) {
                warn!(client = %self.id, "ping claims our own address with a foreign random");
                return self.fail(NoticeCode::Masquerade, Some(NoticeContext::Address(address)));
            }
        }

        let buddy = match existing {
            Some(buddy) => buddy,
            None => match self.materialize(controller.as_ref(), &address) {
                Some(buddy) => buddy,
                None => {
                    return self.fail(NoticeCode::AddBuddy, Some(NoticeContext::Address(address)))
                }
            },
        };

        if !buddy.start_handshake(&random, controller.status()) {
            warn!(client = %self.id, buddy = %address, "buddy was ponged during the ping");
            return self.fail(NoticeCode::AlreadyPinged, Some(NoticeContext::Buddy(address)));
        }
        self.read_armed = true;
    }

    fn materialize(&self, controller: &dyn Controller, address: &str) -> Option<Arc<Buddy>> {
        let alias = self.context.strings().localized(NEW_BUDDY_KEY);
        if let Err(err) = controller.add_buddy(&alias, address) {
            warn!(client = %self.id, %address, error = %err, "unable to add buddy");
            return None;
        }

        let buddy = controller.buddy_by_address(address);
        if buddy.is_none() {
            error!(
                client = %self.id,
                %address,
                "buddy was added but cannot be resolved; directory is inconsistent"
            );
        } else {
            info!(client = %self.id, %address, "new buddy announced itself");
        }
        buddy
    }

    fn handle_pong(&mut self, random: &str) {
        let Some(controller) = self.controller.clone() else {
            return;
        };

        let Some(buddy) = controller.claim_random(random) else {
            warn!(client = %self.id, "pong matches no pending handshake");
            return self.fail(NoticeCode::Pong, None);
        };

        if let Some(socket) = self.socket.take() {
            debug!(client = %self.id, buddy = %buddy.address(), "handing connection to buddy");
            buddy.set_input_connection(socket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::BuddyList;
    use crate::protocol::{CommandKind, Status};
    use std::time::Duration;

    const ALICE: &str = "abcdefghijklmnop";
    const BOB: &str = "bbbbbbbbbbbbbbbb";
    const SELF: &str = "selfselfselfself";

    type Notices = mpsc::UnboundedReceiver<(ClientId, Notice)>;

    fn directory(list: BuddyList) -> (Arc<BuddyList>, Notices) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(list.with_notice_sink(tx)), rx)
    }

    fn connect_with(
        list: &Arc<BuddyList>,
        self_address: Option<&str>,
        socket: impl FnOnce(tokio::io::DuplexStream) -> LineSocket,
    ) -> (ControlClient, LineSocket) {
        let (local, remote) = tokio::io::duplex(4096);
        let context = Arc::new(ClientContext::new(
            self_address.map(String::from),
            Strings::default(),
        ));
        let client = ControlClient::new(context, socket(local));
        client.start(list.clone());
        (client, LineSocket::new(remote))
    }

    fn connect(list: &Arc<BuddyList>) -> (ControlClient, LineSocket) {
        connect_with(list, Some(SELF), LineSocket::new)
    }

    fn connect_to(controller: Arc<dyn Controller>) -> (ControlClient, LineSocket) {
        let (local, remote) = tokio::io::duplex(4096);
        let context = Arc::new(ClientContext::new(Some(SELF.to_string()), Strings::default()));
        let client = ControlClient::new(context, LineSocket::new(local));
        client.start(controller);
        (client, LineSocket::new(remote))
    }

    /// Claims `random` on the wrapped list when a client asks for our status,
    /// which happens after the ponged check and before the pong is recorded.
    struct ClaimingDirectory {
        list: Arc<BuddyList>,
        random: String,
    }

    impl Controller for ClaimingDirectory {
        fn buddy_by_address(&self, address: &str) -> Option<Arc<Buddy>> {
            self.list.buddy_by_address(address)
        }

        fn buddy_by_random(&self, random: &str) -> Option<Arc<Buddy>> {
            self.list.buddy_by_random(random)
        }

        fn claim_random(&self, random: &str) -> Option<Arc<Buddy>> {
            self.list.claim_random(random)
        }

        fn add_buddy(&self, alias: &str, address: &str) -> crate::Result<()> {
            self.list.add_buddy(alias, address)
        }

        fn status(&self) -> Status {
            self.list.claim_random(&self.random);
            self.list.status()
        }

        fn client_notice(&self, client: ClientId, notice: Notice) {
            self.list.client_notice(client, notice);
        }
    }

    /// Accepts every new buddy but never resolves one.
    struct ForgetfulDirectory {
        list: Arc<BuddyList>,
    }

    impl Controller for ForgetfulDirectory {
        fn buddy_by_address(&self, _address: &str) -> Option<Arc<Buddy>> {
            None
        }

        fn buddy_by_random(&self, _random: &str) -> Option<Arc<Buddy>> {
            None
        }

        fn claim_random(&self, _random: &str) -> Option<Arc<Buddy>> {
            None
        }

        fn add_buddy(&self, _alias: &str, _address: &str) -> crate::Result<()> {
            Ok(())
        }

        fn status(&self) -> Status {
            Status::Available
        }

        fn client_notice(&self, client: ClientId, notice: Notice) {
            self.list.client_notice(client, notice);
        }
    }

    async fn next_notice(notices: &mut Notices) -> Notice {
        tokio::time::timeout(Duration::from_secs(2), notices.recv())
            .await
            .expect("timed out waiting for notice")
            .expect("notice channel closed")
            .1
    }

    async fn expect_notice(notices: &mut Notices, code: NoticeCode) -> Notice {
        let notice = next_notice(notices).await;
        assert_eq!(notice.code(), code, "unexpected notice {}", notice);
        notice
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    async fn send(peer: &mut LineSocket, line: &str) {
        peer.send_line(line.as_bytes()).await.unwrap();
    }

    fn pending_random(list: &BuddyList, address: &str) -> Option<String> {
        list.buddy_by_address(address)
            .and_then(|buddy| buddy.pending_pong())
            .map(|pong| pong.random)
    }

    fn our_random(list: &BuddyList, address: &str) -> String {
        list.buddy_by_address(address)
            .unwrap()
            .with_random(str::to_string)
    }

    async fn expect_closed(peer: &mut LineSocket) {
        let read = tokio::time::timeout(Duration::from_secs(2), peer.read_line())
            .await
            .expect("connection was not closed");
        assert!(matches!(read, Err(SocketError::Closed)));
    }

    #[tokio::test]
    async fn test_start_emits_started() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, _peer) = connect(&list);

        let (id, notice) = notices.recv().await.unwrap();
        assert_eq!(id, client.id());
        assert_eq!(notice.code(), NoticeCode::ClientStarted);
        assert_eq!(notice.message(), "Control client started");
        eventually(|| client.state() == ClientState::Running).await;
    }

    #[tokio::test]
    async fn test_idle_client_does_not_read() {
        let (list, mut notices) = directory(BuddyList::new());
        let (local, remote) = tokio::io::duplex(4096);
        let client = ControlClient::new(Arc::new(ClientContext::default()), LineSocket::new(local));
        let mut peer = LineSocket::new(remote);

        send(&mut peer, &format!("ping {} r1", ALICE)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(list.is_empty());
        assert_eq!(client.state(), ClientState::Idle);

        client.start(list.clone());
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        eventually(|| pending_random(&list, ALICE).as_deref() == Some("r1")).await;
    }

    #[tokio::test]
    async fn test_repeated_ping_same_address_allowed() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;

        send(&mut peer, &format!("ping {} r1", ALICE)).await;
        eventually(|| pending_random(&list, ALICE).as_deref() == Some("r1")).await;
        send(&mut peer, &format!("ping {} r2", ALICE)).await;
        eventually(|| pending_random(&list, ALICE).as_deref() == Some("r2")).await;

        assert_eq!(client.state(), ClientState::Running);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_with_other_address_is_fake_ping() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;

        send(&mut peer, &format!("ping {} r1", ALICE)).await;
        eventually(|| pending_random(&list, ALICE).is_some()).await;
        send(&mut peer, &format!("ping {} r2", BOB)).await;

        let notice = expect_notice(&mut notices, NoticeCode::FakePing).await;
        assert_eq!(notice.context(), Some(&NoticeContext::Address(BOB.to_string())));
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;

        assert!(list.buddy_by_address(BOB).is_none());
        expect_closed(&mut peer).await;
    }

    #[tokio::test]
    async fn test_ping_for_ponged_buddy_is_rejected() {
        let (list, mut notices) = directory(BuddyList::new());
        list.add_buddy("Alice", ALICE).unwrap();
        let alice = list.buddy_by_address(ALICE).unwrap();
        let (elsewhere, _other_end) = tokio::io::duplex(64);
        alice.set_input_connection(LineSocket::new(elsewhere));

        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("ping {} r1", ALICE)).await;

        let notice = expect_notice(&mut notices, NoticeCode::AlreadyPinged).await;
        assert_eq!(notice.context(), Some(&NoticeContext::Buddy(ALICE.to_string())));
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;

        assert_eq!(alice.pending_pong(), None);
        assert!(alice.has_input_connection());
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_ping_after_claimed_pong_is_rejected() {
        let (list, mut notices) = directory(BuddyList::new());
        list.add_buddy("Alice", ALICE).unwrap();
        let alice = list.buddy_by_address(ALICE).unwrap();
        assert!(list.claim_random(&our_random(&list, ALICE)).is_some());

        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("ping {} r1", ALICE)).await;

        expect_notice(&mut notices, NoticeCode::AlreadyPinged).await;
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;
        assert_eq!(alice.pending_pong(), None);
    }

    #[tokio::test]
    async fn test_pong_claimed_during_ping_is_rejected() {
        let (list, mut notices) = directory(BuddyList::new());
        list.add_buddy("Alice", ALICE).unwrap();
        let alice = list.buddy_by_address(ALICE).unwrap();
        let racing = Arc::new(ClaimingDirectory {
            list: list.clone(),
            random: our_random(&list, ALICE),
        });

        let (client, mut peer) = connect_to(racing);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("ping {} r1", ALICE)).await;

        let notice = expect_notice(&mut notices, NoticeCode::AlreadyPinged).await;
        assert_eq!(notice.context(), Some(&NoticeContext::Buddy(ALICE.to_string())));
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;

        assert!(alice.is_ponged());
        assert_eq!(alice.pending_pong(), None);
        assert!(!alice.has_input_connection());
    }

    #[tokio::test]
    async fn test_peer_reconnects_after_release() {
        let (list, mut notices) = directory(BuddyList::new());
        list.add_buddy("Alice", ALICE).unwrap();
        let alice = list.buddy_by_address(ALICE).unwrap();
        let (elsewhere, _other_end) = tokio::io::duplex(64);
        alice.set_input_connection(LineSocket::new(elsewhere));

        assert!(alice.take_input_connection().is_some());
        assert!(list.renew_random(ALICE, SELF).is_some());

        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("ping {} r9", ALICE)).await;

        eventually(|| pending_random(&list, ALICE).as_deref() == Some("r9")).await;
        assert_eq!(client.state(), ClientState::Running);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_masquerade_detected() {
        let (list, mut notices) = directory(BuddyList::new());
        list.add_buddy("Myself", SELF).unwrap();

        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("ping {} notourrandom", SELF)).await;

        expect_notice(&mut notices, NoticeCode::Masquerade).await;
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;
        assert_eq!(pending_random(&list, SELF), None);
    }

    #[tokio::test]
    async fn test_self_loopback_with_our_random() {
        let (list, mut notices) = directory(BuddyList::new());
        list.add_buddy("Myself", SELF).unwrap();
        let random = our_random(&list, SELF);

        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("ping {} {}", SELF, random)).await;

        eventually(|| pending_random(&list, SELF).as_deref() == Some(random.as_str())).await;
        assert_eq!(client.state(), ClientState::Running);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_address_becomes_new_buddy() {
        let (list, mut notices) = directory(BuddyList::new());
        list.set_status(Status::Away);

        let (_client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("ping {} r1", ALICE)).await;

        eventually(|| list.buddy_by_address(ALICE).is_some()).await;
        let alice = list.buddy_by_address(ALICE).unwrap();
        eventually(|| alice.pending_pong().is_some()).await;

        assert_eq!(list.len(), 1);
        assert_eq!(alice.alias(), "New buddy");
        let pong = alice.pending_pong().unwrap();
        assert_eq!(pong.random, "r1");
        assert_eq!(pong.status, Status::Away);
    }

    #[tokio::test]
    async fn test_add_buddy_failure_is_fatal() {
        let (list, mut notices) = directory(BuddyList::new().with_capacity_limit(0));

        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("ping {} r1", ALICE)).await;

        let notice = expect_notice(&mut notices, NoticeCode::AddBuddy).await;
        assert_eq!(notice.context(), Some(&NoticeContext::Address(ALICE.to_string())));
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_new_buddy_is_fatal() {
        let (list, mut notices) = directory(BuddyList::new());
        let forgetful = Arc::new(ForgetfulDirectory { list: list.clone() });

        let (client, mut peer) = connect_to(forgetful);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("ping {} r1", ALICE)).await;

        let notice = expect_notice(&mut notices, NoticeCode::AddBuddy).await;
        assert_eq!(notice.context(), Some(&NoticeContext::Address(ALICE.to_string())));
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;
        expect_closed(&mut peer).await;
    }

    #[tokio::test]
    async fn test_pong_hands_connection_to_buddy() {
        let (list, mut notices) = directory(BuddyList::new());
        list.add_buddy("Alice", ALICE).unwrap();
        let random = our_random(&list, ALICE);
        let alice = list.buddy_by_address(ALICE).unwrap();

        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("pong {}", random)).await;

        eventually(|| alice.has_input_connection()).await;
        assert!(alice.is_ponged());
        assert_eq!(client.state(), ClientState::Running);
        assert!(list.buddy_by_random(&random).is_none());

        let mut adopted = alice.take_input_connection().unwrap();
        send(&mut peer, "status xa").await;
        assert_eq!(adopted.read_line().await.unwrap(), b"status xa".to_vec());
        adopted.send_line(b"status available").await.unwrap();
        assert_eq!(peer.read_line().await.unwrap(), b"status available".to_vec());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replayed_pong_is_rejected() {
        let (list, mut notices) = directory(BuddyList::new());
        list.add_buddy("Alice", ALICE).unwrap();
        let random = our_random(&list, ALICE);
        let alice = list.buddy_by_address(ALICE).unwrap();

        let (_first, mut first_peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut first_peer, &format!("pong {}", random)).await;
        eventually(|| alice.has_input_connection()).await;

        let (second, mut second_peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut second_peer, &format!("pong {}", random)).await;

        expect_notice(&mut notices, NoticeCode::Pong).await;
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        second.wait_stopped().await;
        expect_closed(&mut second_peer).await;
    }

    #[tokio::test]
    async fn test_unsolicited_pong_is_rejected() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;

        send(&mut peer, "pong nobodyissuedthis").await;

        expect_notice(&mut notices, NoticeCode::Pong).await;
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;

        client.stop();
        client.stop();
        client.wait_stopped().await;

        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(notices.try_recv().is_err());
        expect_closed(&mut peer).await;

        client.start(list.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.state(), ClientState::Stopped);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, _peer) = connect(&list);
        client.start(list.clone());

        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(notices.try_recv().is_err());
        assert_eq!(client.state(), ClientState::Running);
    }

    #[tokio::test]
    async fn test_every_parse_error_is_fatal() {
        let cases = [
            ("frobnicate now", NoticeCode::UnknownCommand),
            ("ping onlyone", NoticeCode::command(CommandKind::Ping)),
            ("ping notanaddress r1", NoticeCode::command(CommandKind::Ping)),
            ("pong", NoticeCode::command(CommandKind::Pong)),
            ("status sleeping", NoticeCode::command(CommandKind::Status)),
            ("add_me please", NoticeCode::command(CommandKind::AddMe)),
            ("filedata_b64 1 0 hash !!!", NoticeCode::command(CommandKind::Filedata)),
            ("filedataok 1", NoticeCode::command(CommandKind::FiledataOk)),
            ("filestopsending", NoticeCode::command(CommandKind::FileStopSending)),
        ];

        for (line, code) in cases {
            let (list, mut notices) = directory(BuddyList::new());
            let (client, mut peer) = connect(&list);
            expect_notice(&mut notices, NoticeCode::ClientStarted).await;

            send(&mut peer, line).await;

            let notice = next_notice(&mut notices).await;
            assert_eq!(notice.code(), code, "line {:?}", line);
            assert!(notice.code().is_error());
            expect_notice(&mut notices, NoticeCode::ClientStopped).await;
            client.wait_stopped().await;
            assert!(notices.try_recv().is_err(), "line {:?}", line);
            expect_closed(&mut peer).await;
        }
    }

    #[tokio::test]
    async fn test_lines_after_fatal_error_are_not_processed() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;

        let batch = format!("bogus\nping {} r1\n", ALICE);
        peer.send_line(batch.trim_end().as_bytes()).await.unwrap();

        expect_notice(&mut notices, NoticeCode::UnknownCommand).await;
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_other_commands_ignored_before_handshake() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;

        send(&mut peer, "status away").await;
        send(&mut peer, "version 0.9.9.553").await;
        send(&mut peer, "add_me").await;
        send(&mut peer, &format!("ping {} r1", ALICE)).await;

        eventually(|| pending_random(&list, ALICE).is_some()).await;
        assert_eq!(client.state(), ClientState::Running);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_close_reports_socket_error() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;

        drop(peer);

        let notice = expect_notice(&mut notices, NoticeCode::Socket).await;
        assert_eq!(
            notice.cause().map(Notice::code),
            Some(NoticeCode::SocketReadClosed)
        );
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;
    }

    #[tokio::test]
    async fn test_oversized_line_reports_socket_error() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, mut peer) = connect_with(&list, None, |stream| {
            LineSocket::new(stream).with_max_line_length(32)
        });
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;

        send(&mut peer, &"x".repeat(100)).await;

        let notice = expect_notice(&mut notices, NoticeCode::Socket).await;
        assert_eq!(
            notice.cause().map(Notice::code),
            Some(NoticeCode::SocketLineTooLong)
        );
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;
        client.wait_stopped().await;
    }

    #[tokio::test]
    async fn test_dropped_handle_keeps_serving() {
        let (list, mut notices) = directory(BuddyList::new());
        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        drop(client);

        send(&mut peer, &format!("ping {} r1", ALICE)).await;
        eventually(|| pending_random(&list, ALICE).is_some()).await;
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_client_stops_after_handoff_when_handle_dropped() {
        let (list, mut notices) = directory(BuddyList::new());
        list.add_buddy("Alice", ALICE).unwrap();
        let random = our_random(&list, ALICE);
        let alice = list.buddy_by_address(ALICE).unwrap();

        let (client, mut peer) = connect(&list);
        expect_notice(&mut notices, NoticeCode::ClientStarted).await;
        send(&mut peer, &format!("pong {}", random)).await;
        eventually(|| alice.has_input_connection()).await;

        drop(client);
        expect_notice(&mut notices, NoticeCode::ClientStopped).await;

        let mut adopted = alice.take_input_connection().unwrap();
        send(&mut peer, "message hello").await;
        assert_eq!(adopted.read_line().await.unwrap(), b"message hello".to_vec());
    }

    #[test]
    fn test_client_ids_are_unique() {
        let first = ClientId::next();
        let second = ClientId::next();
        assert_ne!(first, second);
        assert_eq!(first.to_string(), format!("cc-{}", first.value()));
    }

    #[test]
    fn test_context_from_config() {
        let mut config = Config::default();
        config.self_address = Some(SELF.to_string());
        config
            .strings
            .insert(NEW_BUDDY_KEY.to_string(), "Stranger".to_string());

        let context = ClientContext::from_config(&config);
        assert!(context.is_self_address(SELF));
        assert_eq!(context.strings().localized(NEW_BUDDY_KEY), "Stranger");
    }

    #[test]
    fn test_context_self_address() {
        let context = ClientContext::new(Some(SELF.to_string()), Strings::default());
        assert!(context.is_self_address(SELF));
        assert!(!context.is_self_address(ALICE));
        assert!(!ClientContext::default().is_self_address(SELF));
    }
}
