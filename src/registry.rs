use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::{
    CvsError, CycleOutcome, EventKind, Handler, HandlerTable, Session, SessionConfig, SessionId,
};

/// A cloneable handle that stops [`Registry::run`] and waiting sync verbs.
///
/// Stopping is cooperative: the flag is checked between protocol cycles and
/// sockets are left open.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Raises the stop flag.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once the stop flag was raised.
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Owns sessions and the handlers shared by all of them.
///
/// Handlers registered with [`Registry::register_global`] are copied into
/// every session: existing sessions receive them immediately and sessions
/// created later receive them at creation. A session never reads the global
/// table after that copy.
///
/// # Example
///
/// ```rust,no_run
/// # use std::time::Duration;
/// # use cvs::{EventKind, Registry, SessionConfig, handler};
/// # async fn demo() -> cvs::Result<()> {
/// let mut registry = Registry::new();
/// registry.register_global(EventKind::UpdatedFile, 0, handler(|event| {
///     if let Some(file) = event.file() {
///         println!("{} ({} bytes)", file.path, file.size);
///     }
///     Ok(())
/// }));
///
/// let session = registry.create_session(SessionConfig::new("cvs.example.org"));
/// session.login("/cvsroot", "anonymous", "").await?;
/// registry.run(Duration::from_millis(100)).await?;
/// # Ok(())
/// # }
/// ```
pub struct Registry {
    sessions: BTreeMap<SessionId, Session>,
    global: HandlerTable,
    next_id: u64,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("global", &self.global)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            global: HandlerTable::new(),
            next_id: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a session, copies every global handler into it, and stores it.
    pub fn create_session(&mut self, config: SessionConfig) -> &mut Session {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        let mut session = Session::new(id, &config, Arc::clone(&self.shutdown));
        if !self.global.is_empty() {
            debug!(session = %id, "replaying global handlers");
            self.global.replay_into(session.handlers_mut());
        }
        self.sessions.entry(id).or_insert(session)
    }

    /// Registers a handler globally and copies it into every existing session.
    pub fn register_global(&mut self, kind: EventKind, priority: i32, handler: Handler) {
        self.global.register(kind, priority, Arc::clone(&handler));
        for session in self.sessions.values_mut() {
            session.register(kind, priority, Arc::clone(&handler));
        }
    }

    /// Returns the global handler table.
    pub fn global_handlers(&self) -> &HandlerTable {
        &self.global
    }

    /// Returns the session with `id`.
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Returns the session with `id` mutably.
    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Removes a session and hands it to the caller.
    pub fn remove_session(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Identifiers of all stored sessions, in creation order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is stored.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Polls every async session once, in creation order.
    ///
    /// Each session waits at most `timeout` for data to start arriving. Once a
    /// response has started, the rest of it is read under the session's read
    /// timeout; without [`SessionConfig::with_read_timeout`] a server that
    /// stalls mid-response holds up every session behind it. Sync sessions
    /// are skipped: their verbs drive their own connection.
    pub async fn poll_all(&mut self, timeout: Duration) -> Vec<(SessionId, CycleOutcome)> {
        let mut outcomes = Vec::with_capacity(self.sessions.len());
        for (id, session) in &mut self.sessions {
            let Some(session) = session.as_async_mut() else {
                continue;
            };
            outcomes.push((*id, session.poll(timeout).await));
        }
        outcomes
    }

    /// Polls async sessions round-robin until the stop flag is raised.
    ///
    /// Transient failures (connection, transport, readiness) are logged and
    /// retried on the next round. Protocol, session and handler failures end
    /// the loop and are returned.
    ///
    /// A round is bounded by `timeout` per session only when every session
    /// has a read timeout (see [`Registry::poll_all`]).
    pub async fn run(&mut self, timeout: Duration) -> Result<(), CvsError> {
        while !self.is_shutdown() {
            let started = Instant::now();
            let mut progressed = false;
            for (id, outcome) in self.poll_all(timeout).await {
                match outcome {
                    CycleOutcome::Progressed => progressed = true,
                    CycleOutcome::NoData => {}
                    CycleOutcome::Failed(err) if err.is_transient() => {
                        warn!(session = %id, error = %err, "poll failed; retrying");
                    }
                    CycleOutcome::Failed(err) => return Err(err),
                }
            }
            // Disconnected sessions return at once; keep an idle round from spinning.
            let elapsed = started.elapsed();
            if !progressed && elapsed < timeout {
                tokio::time::sleep(timeout - elapsed).await;
            }
        }
        debug!("registry loop stopped");
        Ok(())
    }

    /// Raises the stop flag observed by [`Registry::run`] and sync verbs.
    ///
    /// Sockets are not closed and blocked reads are not interrupted.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Returns `true` once [`Registry::shutdown`] was called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Returns a handle that can raise the stop flag from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }
}
