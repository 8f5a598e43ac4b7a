//! Connection manager: socket lifecycle, login, request dispatch, and
//! automatic reset when server heartbeats stop.
//!
//! ```text
//! Disconnected -> Connecting -> LoggingIn -> Ready
//!                     ^                        |
//!                     |                  heartbeat lost
//!                     +------ Resetting <------+
//! ```
//!
//! Every socket incarnation gets a new generation number. A reader task and a
//! writer task serve each generation; the reader decodes records and routes
//! them under the manager's single lock, so inbound handling never waits on a
//! caller. Callers suspend on oneshot receivers held in the
//! [`PendingTable`]. Traffic, alarms and closures belonging to an older
//! generation are ignored.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tether_log::{EventClass, EventLog};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::{LoginError, RequestError};
use crate::framing::{FrameConfig, FrameDecoder};
use crate::heartbeat::HeartbeatMonitor;
use crate::messages::{self, Inbound, RequestKind, Response};
use crate::pending::{KeyGenerator, LOGIN_KEY, PendingTable};
use crate::reconnection::{ReconnectConfig, ReconnectState};

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 4096;

/// Timings and endpoint for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub endpoint: String,
    /// TCP connect timeout. Default: 3 s.
    pub connect_timeout: Duration,
    /// Silence longer than this resets the connection. Default: 2 s.
    pub heartbeat_window: Duration,
    /// Age at which a pending request times out. Default: 5 s.
    pub request_timeout: Duration,
    /// How long a login waits for its acknowledgment. Default: 5 s.
    pub login_timeout: Duration,
    /// Spacing of readiness polls during a reset. Default: 1 s.
    pub ready_poll_interval: Duration,
    /// Readiness polls before a request gives up during a reset. Default: 5.
    pub ready_poll_attempts: u32,
    /// Inbound framing limits.
    pub frame: FrameConfig,
    /// Backoff between reconnect attempts.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:8124".to_string(),
            connect_timeout: Duration::from_secs(3),
            heartbeat_window: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            login_timeout: Duration::from_secs(5),
            ready_poll_interval: Duration::from_secs(1),
            ready_poll_attempts: 5,
            frame: FrameConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket. Initial state, and the state after `logout`.
    Disconnected,
    /// Opening the TCP connection.
    Connecting,
    /// Login frame sent, waiting for the acknowledgment.
    LoggingIn,
    /// Logged in; heartbeats are being watched.
    Ready,
    /// Heartbeats stopped; the connection is being re-established.
    Resetting,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
#[derive(Debug)]
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Snapshot of the connection, returned by `login`, `logout` and `info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Identity of the login, if one was made.
    pub identity: Option<String>,
    /// Configured endpoint.
    pub endpoint: String,
    /// Address of the connected server.
    pub peer: Option<SocketAddr>,
    /// Socket incarnation number.
    pub generation: u64,
    /// Lifecycle state when the snapshot was taken.
    pub state: ConnectionState,
}

/// Everything guarded by the manager's lock.
struct Inner {
    generation: u64,
    identity: Option<String>,
    peer: Option<SocketAddr>,
    logged_in: bool,
    resetting: bool,
    outbound: Option<mpsc::UnboundedSender<String>>,
    io_tasks: Vec<AbortHandle>,
    reset_task: Option<AbortHandle>,
    pending: PendingTable,
    heartbeat: HeartbeatMonitor,
    keys: KeyGenerator,
    resets: u64,
    last_error: Option<String>,
}

impl Inner {
    /// Drop the socket of the current generation and invalidate anything
    /// still in flight for it.
    fn teardown_io(&mut self) {
        for task in self.io_tasks.drain(..) {
            task.abort();
        }
        self.outbound = None;
        self.peer = None;
        self.generation += 1;
    }

    /// Queue a frame on the current socket.
    fn send_line(&mut self, line: String) -> bool {
        self.outbound
            .as_ref()
            .is_some_and(|tx| tx.send(line).is_ok())
    }
}

/// Event lines gathered while the lock is held, written once it is released.
#[derive(Default)]
struct EventBatch(Vec<(EventClass, String)>);

impl EventBatch {
    fn push(&mut self, class: EventClass, line: impl Into<String>) {
        self.0.push((class, line.into()));
    }

    fn flush(self, log: &dyn EventLog) {
        for (class, line) in self.0 {
            log.record(class, &line);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.reset_task.take() {
            task.abort();
        }
        for task in self.io_tasks.drain(..) {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    Resetting,
    Idle,
}

struct Shared {
    config: ClientConfig,
    events: Arc<dyn EventLog>,
    state: ConnectionStateWatch,
    inner: Mutex<Inner>,
}

/// Client side of one logical session with the server.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a disconnected manager. `events` receives the session history.
    pub fn new(config: ClientConfig, events: Arc<dyn EventLog>) -> Self {
        let inner = Inner {
            generation: 0,
            identity: None,
            peer: None,
            logged_in: false,
            resetting: false,
            outbound: None,
            io_tasks: Vec::new(),
            reset_task: None,
            pending: PendingTable::new(config.request_timeout),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_window),
            keys: KeyGenerator::new(),
            resets: 0,
            last_error: None,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                events,
                state: ConnectionStateWatch::new(),
                inner: Mutex::new(inner),
            }),
        }
    }

    /// Connect, send the login frame, and wait for the acknowledgment.
    ///
    /// On success the heartbeat watchdog is armed. Fails with
    /// [`LoginError::AlreadyLoggedIn`] when logged in and with
    /// [`LoginError::LoginInProgress`] while another login or a reset is in
    /// flight.
    pub async fn login(&self, identity: &str) -> Result<ConnectionInfo, LoginError> {
        {
            let inner = self.shared.lock();
            if inner.logged_in {
                return Err(LoginError::AlreadyLoggedIn);
            }
            let connecting = self.shared.state.current() == ConnectionState::Connecting;
            if inner.resetting || connecting || inner.pending.has_login() {
                return Err(LoginError::LoginInProgress);
            }
        }
        self.shared.establish(identity).await
    }

    /// Tear down the connection and discard every pending request.
    ///
    /// Idempotent. Stops a reconnect in progress. Discarded requests are not
    /// answered; their callers observe [`RequestError::Aborted`].
    pub fn logout(&self) -> ConnectionInfo {
        let shared = &self.shared;
        let mut inner = shared.lock();
        let info = shared.snapshot(&inner, ConnectionState::Disconnected);

        if let Some(task) = inner.reset_task.take() {
            task.abort();
        }
        inner.heartbeat.disarm();
        inner.teardown_io();
        let discarded = inner.pending.clear();
        inner.logged_in = false;
        inner.resetting = false;
        inner.identity = None;
        shared.state.set(ConnectionState::Disconnected);
        drop(inner);

        tracing::info!(discarded, "Logged out");
        shared
            .events
            .general(&format!("logged out, {discarded} pending request(s) discarded"));
        info
    }

    /// Send a request and wait for its response.
    ///
    /// `payload` holds kind-specific fields; the kind and correlation key are
    /// added to it.
    pub async fn request(
        &self,
        kind: RequestKind,
        payload: Map<String, Value>,
    ) -> Result<Response, RequestError> {
        if kind == RequestKind::Login {
            return Err(RequestError::Rejected(
                "login is not a request kind".to_string(),
            ));
        }
        let mut polls = 0;
        let (key, rx) = loop {
            self.ensure_ready(&mut polls).await?;
            // A reset may have begun since the readiness check.
            if let Some(submitted) = self.shared.submit(kind, &payload)? {
                break submitted;
            }
        };

        let started = Instant::now();
        let outcome = rx.await.unwrap_or(Err(RequestError::Aborted));
        tracing::debug!(%kind, %key, elapsed = ?started.elapsed(), ok = outcome.is_ok(), "Request finished");

        match outcome? {
            Inbound::Msg { msg } => {
                Response::from_reply(kind, &msg).ok_or(RequestError::UnexpectedReply { kind })
            }
            _ => Err(RequestError::UnexpectedReply { kind }),
        }
    }

    /// Ask the server for its counter.
    pub async fn count(&self) -> Result<Response, RequestError> {
        self.request(RequestKind::Count, Map::new()).await
    }

    /// Ask the server for its clock.
    pub async fn time(&self) -> Result<Response, RequestError> {
        self.request(RequestKind::Time, Map::new()).await
    }

    /// Wait until a logged-in connection is available.
    ///
    /// Proceeds at once when logged in and fails at once with
    /// [`RequestError::NotReady`] when idle. During a reset, polls every
    /// `ready_poll_interval` up to `ready_poll_attempts` times before failing
    /// with [`RequestError::ConnectionReset`]. `polls` carries the budget
    /// already spent by this request.
    async fn ensure_ready(&self, polls: &mut u32) -> Result<(), RequestError> {
        let config = &self.shared.config;
        loop {
            match self.shared.readiness() {
                Readiness::Ready => return Ok(()),
                Readiness::Idle => return Err(RequestError::NotReady),
                Readiness::Resetting if *polls < config.ready_poll_attempts => {
                    *polls += 1;
                    tracing::debug!(polls = *polls, "Waiting for reconnection");
                    tokio::time::sleep(config.ready_poll_interval).await;
                }
                Readiness::Resetting => return Err(RequestError::ConnectionReset),
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.current()
    }

    /// Subscribe to lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Snapshot of the current connection.
    pub fn info(&self) -> ConnectionInfo {
        let inner = self.shared.lock();
        self.shared.snapshot(&inner, self.shared.state.current())
    }

    /// Whether a login acknowledgment is in force.
    pub fn is_logged_in(&self) -> bool {
        self.shared.lock().logged_in
    }

    /// Reset cycles begun since construction.
    pub fn reset_count(&self) -> u64 {
        self.shared.lock().resets
    }

    /// Number of outstanding requests, the login included.
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Most recent reconnect failure, cleared by the next successful login.
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, inner: &Inner, state: ConnectionState) -> ConnectionInfo {
        ConnectionInfo {
            identity: inner.identity.clone(),
            endpoint: self.config.endpoint.clone(),
            peer: inner.peer,
            generation: inner.generation,
            state,
        }
    }

    fn readiness(&self) -> Readiness {
        let inner = self.lock();
        if inner.logged_in {
            Readiness::Ready
        } else if inner.resetting {
            Readiness::Resetting
        } else {
            Readiness::Idle
        }
    }

    /// Record a pending entry and write the request frame. Returns `None`
    /// when the session is not logged in at this moment.
    fn submit(
        &self,
        kind: RequestKind,
        payload: &Map<String, Value>,
    ) -> Result<Option<(String, oneshot::Receiver<Result<Inbound, RequestError>>)>, RequestError>
    {
        let mut inner = self.lock();
        if !inner.logged_in {
            return Ok(None);
        }

        let identity = inner.identity.clone().unwrap_or_default();
        let key = inner.keys.next_key(&identity);
        let line = messages::encode_request(kind, &key, payload)
            .map_err(|e| RequestError::Encode(e.to_string()))?;
        let record = line.trim_end().to_string();

        let (tx, rx) = oneshot::channel();
        inner
            .pending
            .insert(key.clone(), kind, tx)
            .map_err(|e| RequestError::Rejected(e.to_string()))?;
        if !inner.send_line(line) {
            inner.pending.remove(&key);
            return Err(RequestError::ConnectionReset);
        }
        drop(inner);

        self.events.sent(&record);
        Ok(Some((key, rx)))
    }

    /// Open a socket for `identity` and run the login exchange.
    async fn establish(self: &Arc<Self>, identity: &str) -> Result<ConnectionInfo, LoginError> {
        let config = &self.config;
        let started = self.lock().generation;
        self.state.set(ConnectionState::Connecting);
        tracing::info!(endpoint = %config.endpoint, identity, "Connecting");

        let stream = match tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(config.endpoint.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(self.login_failed(LoginError::Connect {
                    endpoint: config.endpoint.clone(),
                    source,
                }));
            }
            Err(_) => {
                return Err(self.login_failed(LoginError::ConnectTimeout {
                    endpoint: config.endpoint.clone(),
                    timeout: config.connect_timeout,
                }));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {e}");
        }
        let peer = stream.peer_addr().ok();
        let login_frame = match messages::encode_login(identity) {
            Ok(line) => line,
            Err(e) => return Err(self.login_failed(LoginError::Encode(e))),
        };
        let login_record = login_frame.trim_end().to_string();

        let (reader, writer) = stream.into_split();
        let (tx, rx) = oneshot::channel();
        let (generation, queued) = {
            let mut inner = self.lock();
            if let Err(e) = inner
                .pending
                .insert(LOGIN_KEY.to_string(), RequestKind::Login, tx)
            {
                tracing::warn!("Login refused: {e}");
                return Err(LoginError::LoginInProgress);
            }
            if inner.generation != started {
                inner.pending.remove(LOGIN_KEY);
                return Err(LoginError::Aborted);
            }
            inner.teardown_io();
            let generation = inner.generation;
            inner.identity = Some(identity.to_string());
            inner.peer = peer;

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let weak = Arc::downgrade(self);
            let read_task = tokio::spawn(read_loop(reader, weak.clone(), generation));
            let write_task = tokio::spawn(write_loop(writer, out_rx, weak, generation));
            inner.io_tasks = vec![read_task.abort_handle(), write_task.abort_handle()];
            inner.outbound = Some(out_tx);

            let queued = inner.send_line(login_frame);
            self.state.set(ConnectionState::LoggingIn);
            (generation, queued)
        };
        if queued {
            self.events.sent(&login_record);
        }

        let outcome = tokio::time::timeout(config.login_timeout, rx).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            // Logout (or a newer login) took over while we waited.
            return Err(LoginError::Aborted);
        }
        let result = match outcome {
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(RequestError::Timeout))) => {
                Err(LoginError::NoAcknowledgment(config.request_timeout))
            }
            Ok(Ok(Err(e))) => Err(LoginError::from(e)),
            Ok(Err(_)) => Err(LoginError::Aborted),
            Err(_) => {
                inner.pending.remove(LOGIN_KEY);
                Err(LoginError::NoAcknowledgment(config.login_timeout))
            }
        };

        match result {
            Ok(()) => {
                inner.logged_in = true;
                inner.resetting = false;
                inner.reset_task = None;
                inner.last_error = None;
                self.arm_heartbeat(&mut inner);
                self.state.set(ConnectionState::Ready);
                let info = self.snapshot(&inner, ConnectionState::Ready);
                drop(inner);

                tracing::info!(identity, generation, "Logged in");
                self.events.general(&format!(
                    "logged in as {identity} on {} (generation {generation})",
                    config.endpoint
                ));
                Ok(info)
            }
            Err(e) => {
                inner.teardown_io();
                drop(inner);
                Err(self.login_failed(e))
            }
        }
    }

    /// Report a failed login attempt and settle the visible state.
    fn login_failed(&self, error: LoginError) -> LoginError {
        let inner = self.lock();
        let state = if inner.logged_in {
            ConnectionState::Ready
        } else if inner.resetting {
            ConnectionState::Resetting
        } else {
            ConnectionState::Disconnected
        };
        drop(inner);
        self.state.set(state);

        tracing::warn!("Login failed: {error}");
        self.events.error(&format!("login failed: {error}"));
        error
    }

    /// Build the expiry callback for the heartbeat alarm of `generation`.
    fn heartbeat_alarm(shared: Weak<Self>, generation: u64) -> impl FnOnce(u64) + Send + 'static {
        move |token| {
            if let Some(shared) = shared.upgrade() {
                shared.on_heartbeat_expired(generation, token);
            }
        }
    }

    fn arm_heartbeat(self: &Arc<Self>, inner: &mut Inner) {
        let on_expire = Self::heartbeat_alarm(Arc::downgrade(self), inner.generation);
        inner.heartbeat.arm(on_expire);
    }

    fn on_heartbeat_expired(self: &Arc<Self>, generation: u64, token: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || !inner.heartbeat.expire(token) || !inner.logged_in {
            return;
        }
        let mut events = EventBatch::default();
        self.begin_reset(&mut inner, &mut events);
        drop(inner);
        events.flush(&*self.events);
    }

    /// Drop the dead connection, fail what was waiting on it, and start
    /// reconnecting with the same identity.
    fn begin_reset(self: &Arc<Self>, inner: &mut Inner, events: &mut EventBatch) {
        inner.logged_in = false;
        inner.resetting = true;
        inner.resets += 1;
        inner.heartbeat.disarm();
        inner.teardown_io();
        let failed = inner.pending.drain(RequestError::ConnectionReset);
        self.state.set(ConnectionState::Resetting);

        tracing::warn!(
            window = ?self.config.heartbeat_window,
            failed,
            "Heartbeat lost, resetting connection"
        );
        events.push(
            EventClass::Error,
            format!(
                "no heartbeat within {:?}; resetting connection, {failed} pending request(s) failed",
                self.config.heartbeat_window
            ),
        );

        let Some(identity) = inner.identity.clone() else {
            inner.resetting = false;
            self.state.set(ConnectionState::Disconnected);
            return;
        };
        let task = tokio::spawn(reconnect_loop(Arc::downgrade(self), identity));
        inner.reset_task = Some(task.abort_handle());
    }

    /// Handle one chunk read from the socket of `generation`. Returns `false`
    /// when the generation is gone and the reader should stop.
    fn on_chunk(self: &Arc<Self>, generation: u64, decoder: &mut FrameDecoder, chunk: &[u8]) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        let mut events = EventBatch::default();
        events.push(
            EventClass::Received,
            String::from_utf8_lossy(chunk).trim_end(),
        );

        for record in decoder.decode(chunk) {
            match record {
                Ok(message) => self.route(&mut inner, message, &mut events),
                Err(e) => {
                    tracing::warn!("Dropping inbound record: {e}");
                    events.push(EventClass::Error, format!("dropped record: {e}"));
                }
            }
        }
        drop(inner);
        events.flush(&*self.events);
        true
    }

    fn route(self: &Arc<Self>, inner: &mut Inner, message: Inbound, events: &mut EventBatch) {
        tracing::trace!(tag = message.tag(), "Inbound message");
        match message {
            Inbound::Heartbeat => {
                let on_expire = Self::heartbeat_alarm(Arc::downgrade(self), inner.generation);
                inner.heartbeat.refresh(on_expire);
                let expired = inner.pending.sweep(Instant::now());
                if expired > 0 {
                    events.push(EventClass::Error, format!("{expired} request(s) timed out"));
                }
            }
            Inbound::Login => {
                if !inner.pending.has_login() {
                    tracing::warn!("Unsolicited login acknowledgment");
                    events.push(
                        EventClass::Error,
                        "discarded unsolicited login acknowledgment",
                    );
                    return;
                }
                let others = inner.pending.len() - 1;
                if others > 0 {
                    let detail =
                        format!("login acknowledged while {others} other request(s) pending");
                    tracing::error!("{detail}");
                    inner
                        .pending
                        .fail_login(RequestError::ProtocolViolation(detail));
                    return;
                }
                inner.pending.resolve(LOGIN_KEY, Inbound::Login);
            }
            Inbound::Msg { msg } => {
                if !msg.is_ours() {
                    tracing::warn!(reply = %msg.reply, "Discarding reply with foreign key");
                    events.push(
                        EventClass::Error,
                        format!("discarded reply with foreign key {:?}", msg.reply),
                    );
                    return;
                }
                let key = msg.reply.clone();
                if !inner.pending.resolve(&key, Inbound::Msg { msg }) {
                    tracing::warn!(reply = %key, "Discarding reply for unknown request");
                    events.push(
                        EventClass::Error,
                        format!("discarded reply for unknown request {key:?}"),
                    );
                }
            }
        }
    }

    /// The socket of `generation` stopped working.
    fn on_closed(&self, generation: u64, error: Option<std::io::Error>) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        // Once logged in, the heartbeat watchdog handles recovery.
        if !inner.logged_in {
            inner.pending.fail_login(RequestError::Closed);
        }
        drop(inner);

        let reason = match &error {
            Some(e) => format!("connection error: {e}"),
            None => "connection closed by server".to_string(),
        };
        tracing::warn!("{reason}");
        self.events.error(&reason);
    }
}

async fn read_loop(mut reader: OwnedReadHalf, shared: Weak<Shared>, generation: u64) {
    let Some(frame_config) = shared.upgrade().map(|s| s.config.frame.clone()) else {
        return;
    };
    let mut decoder = FrameDecoder::new(frame_config);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let result = reader.read(&mut buf).await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match result {
            Ok(0) => {
                shared.on_closed(generation, None);
                return;
            }
            Ok(n) => {
                if !shared.on_chunk(generation, &mut decoder, &buf[..n]) {
                    return;
                }
            }
            Err(e) => {
                shared.on_closed(generation, Some(e));
                return;
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut lines: mpsc::UnboundedReceiver<String>,
    shared: Weak<Shared>,
    generation: u64,
) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            if let Some(shared) = shared.upgrade() {
                shared.on_closed(generation, Some(e));
            }
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Re-establish the session after a reset until it succeeds, the budget runs
/// out, or logout aborts this task.
async fn reconnect_loop(shared: Weak<Shared>, identity: String) {
    let Some(config) = shared.upgrade().map(|s| s.config.reconnect.clone()) else {
        return;
    };
    let mut backoff = ReconnectState::new(config);

    while let Some(delay) = backoff.next_attempt() {
        if !delay.is_zero() {
            tracing::info!("Reconnection attempt {} in {:?}", backoff.attempts(), delay);
            tokio::time::sleep(delay).await;
        }
        let Some(manager) = shared.upgrade() else {
            return;
        };
        match manager.establish(&identity).await {
            Ok(_) => {
                tracing::info!("Reconnected after {} attempt(s)", backoff.attempts());
                return;
            }
            Err(LoginError::Aborted) => return,
            Err(e) => {
                tracing::error!("Reconnection attempt {} failed: {e}", backoff.attempts());
                manager.lock().last_error = Some(e.to_string());
            }
        }
    }

    if let Some(manager) = shared.upgrade() {
        let mut inner = manager.lock();
        inner.resetting = false;
        inner.reset_task = None;
        manager.state.set(ConnectionState::Disconnected);
        drop(inner);

        tracing::error!(
            "Giving up after {} reconnection attempt(s)",
            backoff.attempts()
        );
        manager.events.error(&format!(
            "giving up after {} reconnection attempt(s)",
            backoff.attempts()
        ));
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
