use std::fmt::Formatter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::proto::engine::ProtocolEngine;
use crate::proto::transport::TransportTimeouts;
use crate::{
    CvsError, CvsRoot, CycleOutcome, DEFAULT_PSERVER_PORT, EventKind, ExecutionMode, Handler,
    HandlerTable, Reply, SessionId, SessionState,
};

/// Connection settings for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    address: String,
    port: u16,
    mode: ExecutionMode,
    connect_timeout: Duration,
    write_timeout: Duration,
    read_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Creates an async-mode configuration for `address` on the default pserver port.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_PSERVER_PORT,
            mode: ExecutionMode::Async,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(60),
            read_timeout: None,
        }
    }

    /// Creates a configuration for the host and port named by `root`.
    pub fn from_root(root: &CvsRoot) -> Self {
        Self::new(root.host.clone()).with_port(root.port)
    }

    /// Returns the server address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the server port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the write timeout.
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Returns the read timeout, if any.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Sets the server port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the write timeout.
    #[must_use]
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Bounds reads that already started decoding a response.
    ///
    /// Without a read timeout a server that stalls mid-response blocks the
    /// session until the connection drops.
    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }

    fn timeouts(&self) -> TransportTimeouts {
        TransportTimeouts {
            connect: self.connect_timeout,
            write: self.write_timeout,
            read: self.read_timeout,
        }
    }
}

/// State shared by both session variants.
struct SessionCore {
    id: SessionId,
    mode: ExecutionMode,
    engine: ProtocolEngine,
    handlers: HandlerTable,
    shutdown: Arc<AtomicBool>,
}

impl SessionCore {
    fn new(id: SessionId, config: &SessionConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            id,
            mode: config.mode,
            engine: ProtocolEngine::new(config.address.clone(), config.port, config.timeouts()),
            handlers: HandlerTable::new(),
            shutdown,
        }
    }

    fn state(&self) -> SessionState {
        SessionState {
            address: self.engine.address().to_string(),
            port: self.engine.port(),
            mode: self.mode,
            state: self.engine.state(),
            logged_in: self.engine.logged_in(),
            authorized: self.engine.authorized(),
            auth_request_sent: self.engine.auth_request_sent(),
            working_root: self.engine.working_root().to_string(),
            pending: self.engine.pending(),
        }
    }

    /// One engine cycle followed by dispatch of whatever it decoded.
    ///
    /// The engine has finished mutating its queue before any handler runs.
    async fn cycle(&mut self, timeout: Option<Duration>) -> CycleOutcome {
        let outcome = self.engine.cycle(timeout).await;
        for response in self.engine.take_decoded() {
            let event = response.into_event(self.id);
            if let Err(err) = self.handlers.dispatch(&event) {
                return CycleOutcome::Failed(err);
            }
        }
        outcome
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

macro_rules! session_accessors {
    () => {
        /// Returns the session identifier.
        pub fn id(&self) -> SessionId {
            self.core.id
        }

        /// Returns a snapshot of the protocol state.
        pub fn state(&self) -> SessionState {
            self.core.state()
        }

        /// Returns the session-local handler table.
        pub fn handlers(&self) -> &HandlerTable {
            &self.core.handlers
        }

        /// Registers a handler on this session only.
        pub fn register(&mut self, kind: EventKind, priority: i32, handler: Handler) {
            self.core.handlers.register(kind, priority, handler);
        }
    };
}

/// A session whose verbs only queue requests.
///
/// Progress (including the login verdict) happens through repeated calls to
/// [`AsyncSession::poll`], typically via [`crate::Registry::poll_all`].
pub struct AsyncSession {
    core: SessionCore,
}

impl std::fmt::Debug for AsyncSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSession")
            .field("id", &self.core.id)
            .field("state", &self.core.engine.state())
            .field("connected", &self.core.engine.is_connected())
            .finish()
    }
}

impl AsyncSession {
    session_accessors!();

    /// Sends the verification request; the verdict arrives as a `loginok`
    /// or `loginfail` event on a later poll.
    pub async fn login(&mut self, root: &str, user: &str, password: &str) -> Result<Reply, CvsError> {
        self.core.engine.login(root, user, password).await?;
        Ok(Reply::Queued)
    }

    /// Queues a checkout of `module`.
    pub async fn checkout(&mut self, module: &str) -> Result<Reply, CvsError> {
        self.core.engine.queue_checkout(module).await?;
        Ok(Reply::Queued)
    }

    /// Queues a checkout of the whole repository.
    pub async fn checkout_all(&mut self) -> Result<Reply, CvsError> {
        self.core.engine.queue_checkout_all().await?;
        Ok(Reply::Queued)
    }

    /// Queues an `expand-modules` request.
    pub async fn list_modules(&mut self) -> Result<Reply, CvsError> {
        self.core.engine.queue_list_modules().await?;
        Ok(Reply::Queued)
    }

    /// Queues an export of `module` at `revision` (a tag or revision number).
    pub async fn export(&mut self, module: &str, revision: &str) -> Result<Reply, CvsError> {
        self.core.engine.queue_export(module, revision).await?;
        Ok(Reply::Queued)
    }

    /// Queues a `Set` request defining a user variable.
    pub async fn set_variable(&mut self, variable: &str, value: &str) -> Result<Reply, CvsError> {
        self.core.engine.queue_set(variable, value).await?;
        Ok(Reply::Queued)
    }

    /// Runs exactly one protocol cycle, waiting at most `timeout` for data.
    ///
    /// `Duration::ZERO` makes this a non-blocking probe.
    pub async fn poll(&mut self, timeout: Duration) -> CycleOutcome {
        self.core.cycle(Some(timeout)).await
    }
}

/// A session whose verbs return only once the server answered.
///
/// Each verb waits on the connection without a timeout, so a sync session
/// must be driven from its own task or thread: while a verb is waiting,
/// nothing else scheduled on that task makes progress. Raising the shutdown
/// flag is observed between responses; a read that is already waiting is not
/// interrupted.
pub struct SyncSession {
    core: SessionCore,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("id", &self.core.id)
            .field("state", &self.core.engine.state())
            .field("connected", &self.core.engine.is_connected())
            .finish()
    }
}

impl SyncSession {
    session_accessors!();

    /// Logs in and waits until the data connection answered the initial
    /// negotiation.
    ///
    /// Returns [`Reply::LoginFailed`] when the credentials are rejected and
    /// [`Reply::AuthorizationDenied`] when the data connection is refused.
    pub async fn login(&mut self, root: &str, user: &str, password: &str) -> Result<Reply, CvsError> {
        self.core.engine.arm_completion();
        let sent = self.core.engine.login(root, user, password).await;
        let reply = self.finish(sent).await?;
        if reply != Reply::Ok {
            return Ok(reply);
        }
        debug!(session = %self.core.id, "logged in; waiting for negotiation");
        self.core.engine.arm_completion();
        self.drive().await
    }

    /// Checks out `module` and waits for the server's status.
    pub async fn checkout(&mut self, module: &str) -> Result<Reply, CvsError> {
        self.core.engine.arm_completion();
        let queued = self.core.engine.queue_checkout(module).await;
        self.finish(queued).await
    }

    /// Checks out the whole repository and waits for the server's status.
    pub async fn checkout_all(&mut self) -> Result<Reply, CvsError> {
        self.core.engine.arm_completion();
        let queued = self.core.engine.queue_checkout_all().await;
        self.finish(queued).await
    }

    /// Sends `expand-modules` and waits for the server's status.
    pub async fn list_modules(&mut self) -> Result<Reply, CvsError> {
        self.core.engine.arm_completion();
        let queued = self.core.engine.queue_list_modules().await;
        self.finish(queued).await
    }

    /// Exports `module` at `revision` and waits for the server's status.
    pub async fn export(&mut self, module: &str, revision: &str) -> Result<Reply, CvsError> {
        self.core.engine.arm_completion();
        let queued = self.core.engine.queue_export(module, revision).await;
        self.finish(queued).await
    }

    /// Queues a `Set` request.
    ///
    /// `Set` has no reply, so this returns [`Reply::Queued`] without waiting.
    pub async fn set_variable(&mut self, variable: &str, value: &str) -> Result<Reply, CvsError> {
        self.core.engine.queue_set(variable, value).await?;
        Ok(Reply::Queued)
    }

    /// Runs one cycle without waiting on an armed verb.
    pub async fn poll(&mut self, timeout: Duration) -> CycleOutcome {
        self.core.cycle(Some(timeout)).await
    }

    async fn finish(&mut self, started: Result<(), CvsError>) -> Result<Reply, CvsError> {
        if let Err(err) = started {
            self.core.engine.disarm_completion();
            return Err(err);
        }
        self.drive().await
    }

    async fn drive(&mut self) -> Result<Reply, CvsError> {
        loop {
            if let Some(reply) = self.core.engine.take_completion() {
                return Ok(reply);
            }
            if self.core.is_shutdown() {
                self.core.engine.disarm_completion();
                return Ok(Reply::Cancelled);
            }
            match self.core.cycle(None).await {
                CycleOutcome::Progressed | CycleOutcome::NoData => {}
                CycleOutcome::Failed(err) => {
                    self.core.engine.disarm_completion();
                    return Err(err);
                }
            }
        }
    }
}

/// A session of either execution mode.
#[derive(Debug)]
pub enum Session {
    /// Verbs queue; progress comes from polling.
    Async(AsyncSession),
    /// Verbs wait for the server's answer.
    Sync(SyncSession),
}

macro_rules! delegate {
    ($self:ident, $s:ident => $e:expr) => {
        match $self {
            Session::Async($s) => $e,
            Session::Sync($s) => $e,
        }
    };
}

impl Session {
    pub(crate) fn new(id: SessionId, config: &SessionConfig, shutdown: Arc<AtomicBool>) -> Self {
        let core = SessionCore::new(id, config, shutdown);
        debug!(session = %id, addr = config.address(), port = config.port(), mode = ?config.mode(), "session created");
        match config.mode {
            ExecutionMode::Async => Self::Async(AsyncSession { core }),
            ExecutionMode::Sync => Self::Sync(SyncSession { core }),
        }
    }

    /// Returns the session identifier.
    pub fn id(&self) -> SessionId {
        delegate!(self, s => s.id())
    }

    /// Returns the execution mode.
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Async(_) => ExecutionMode::Async,
            Self::Sync(_) => ExecutionMode::Sync,
        }
    }

    /// Returns a snapshot of the protocol state.
    pub fn state(&self) -> SessionState {
        delegate!(self, s => s.state())
    }

    /// Returns the session-local handler table.
    pub fn handlers(&self) -> &HandlerTable {
        delegate!(self, s => s.handlers())
    }

    pub(crate) fn handlers_mut(&mut self) -> &mut HandlerTable {
        delegate!(self, s => &mut s.core.handlers)
    }

    /// Registers a handler on this session only.
    pub fn register(&mut self, kind: EventKind, priority: i32, handler: Handler) {
        delegate!(self, s => s.register(kind, priority, handler))
    }

    /// See [`AsyncSession::login`] and [`SyncSession::login`].
    pub async fn login(&mut self, root: &str, user: &str, password: &str) -> Result<Reply, CvsError> {
        delegate!(self, s => s.login(root, user, password).await)
    }

    /// Checks out `module`.
    pub async fn checkout(&mut self, module: &str) -> Result<Reply, CvsError> {
        delegate!(self, s => s.checkout(module).await)
    }

    /// Checks out the whole repository.
    pub async fn checkout_all(&mut self) -> Result<Reply, CvsError> {
        delegate!(self, s => s.checkout_all().await)
    }

    /// Requests the module list.
    pub async fn list_modules(&mut self) -> Result<Reply, CvsError> {
        delegate!(self, s => s.list_modules().await)
    }

    /// Exports `module` at `revision`.
    pub async fn export(&mut self, module: &str, revision: &str) -> Result<Reply, CvsError> {
        delegate!(self, s => s.export(module, revision).await)
    }

    /// Defines a user variable on the server.
    pub async fn set_variable(&mut self, variable: &str, value: &str) -> Result<Reply, CvsError> {
        delegate!(self, s => s.set_variable(variable, value).await)
    }

    /// Runs one protocol cycle, waiting at most `timeout` for data.
    pub async fn poll(&mut self, timeout: Duration) -> CycleOutcome {
        delegate!(self, s => s.poll(timeout).await)
    }

    /// Returns the async variant, if this is one.
    pub fn as_async_mut(&mut self) -> Option<&mut AsyncSession> {
        match self {
            Self::Async(s) => Some(s),
            Self::Sync(_) => None,
        }
    }

    /// Returns the sync variant, if this is one.
    pub fn as_sync_mut(&mut self) -> Option<&mut SyncSession> {
        match self {
            Self::Sync(s) => Some(s),
            Self::Async(_) => None,
        }
    }
}
