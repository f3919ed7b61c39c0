use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, warn};

use crate::scramble::scramble_password;
use crate::{
    CvsError, CycleOutcome, Event, EventKind, EventPayload, FileArtifact, ProtocolState, Reply,
    Request, SessionId,
};

use super::transport::{Transport, TransportTimeouts};
use super::wire::{
    CHECKOUT, EXPAND_MODULES, EXPORT, Handshake, USE_UNCHANGED, VALID_REQUESTS, encode_argument,
    encode_bare, encode_directory, encode_handshake, encode_root, encode_set, split_response,
};

/// A decoded server response that produces an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Response {
    LoginOk,
    LoginFail,
    Authorized,
    AuthFail,
    ValidRequests(Vec<String>),
    Updated(FileArtifact),
}

impl Response {
    pub(crate) fn into_event(self, session: SessionId) -> Event {
        let (kind, payload) = match self {
            Self::LoginOk => (EventKind::LoginOk, EventPayload::None),
            Self::LoginFail => (EventKind::LoginFail, EventPayload::None),
            Self::Authorized => (EventKind::Authorized, EventPayload::None),
            Self::AuthFail => (EventKind::AuthFail, EventPayload::None),
            Self::ValidRequests(list) => (EventKind::ValidRequests, EventPayload::ValidRequests(list)),
            Self::Updated(file) => (EventKind::UpdatedFile, EventPayload::File(file)),
        };
        Event {
            kind,
            payload,
            session,
        }
    }
}

struct Credentials {
    user: String,
    scrambled: String,
}

/// The pserver request/response state machine for one server.
///
/// The engine owns the connection and the pending request queue. Requests
/// carry no identifiers on the wire, so every terminal `ok` is matched to the
/// oldest sent, unreplied request; the queue is never reordered.
pub(crate) struct ProtocolEngine {
    address: String,
    port: u16,
    transport: Transport,
    credentials: Option<Credentials>,
    working_root: String,
    logged_in: bool,
    login_failed: bool,
    authorized: bool,
    auth_request_sent: bool,
    queue: VecDeque<Request>,
    next_seq: u64,
    completion_armed: bool,
    completion: Option<Reply>,
    decoded: Vec<Response>,
}

impl ProtocolEngine {
    pub(crate) fn new(address: String, port: u16, timeouts: TransportTimeouts) -> Self {
        Self {
            address,
            port,
            transport: Transport::new(timeouts),
            credentials: None,
            working_root: String::new(),
            logged_in: false,
            login_failed: false,
            authorized: false,
            auth_request_sent: false,
            queue: VecDeque::new(),
            next_seq: 0,
            completion_armed: false,
            completion: None,
            decoded: Vec::new(),
        }
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn logged_in(&self) -> bool {
        self.logged_in
    }

    pub(crate) fn authorized(&self) -> bool {
        self.authorized
    }

    pub(crate) fn auth_request_sent(&self) -> bool {
        self.auth_request_sent
    }

    pub(crate) fn working_root(&self) -> &str {
        &self.working_root
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub(crate) fn pending(&self) -> Vec<Request> {
        self.queue.iter().cloned().collect()
    }

    pub(crate) fn state(&self) -> ProtocolState {
        if self.login_failed {
            ProtocolState::LoginFailed
        } else if self.authorized {
            ProtocolState::Authorized
        } else if self.logged_in {
            ProtocolState::LoggedIn
        } else if self.credentials.is_some() {
            ProtocolState::AwaitingLogin
        } else {
            ProtocolState::Disconnected
        }
    }

    /// Starts reporting `ok`/`error` and login verdicts through [`Self::take_completion`].
    pub(crate) fn arm_completion(&mut self) {
        self.completion_armed = true;
        self.completion = None;
    }

    pub(crate) fn disarm_completion(&mut self) {
        self.completion_armed = false;
        self.completion = None;
    }

    pub(crate) fn take_completion(&mut self) -> Option<Reply> {
        let reply = self.completion.take()?;
        self.completion_armed = false;
        Some(reply)
    }

    /// Responses decoded since the last call, oldest first.
    pub(crate) fn take_decoded(&mut self) -> Vec<Response> {
        std::mem::take(&mut self.decoded)
    }

    /// Opens the login connection and sends the verification request.
    ///
    /// The verdict is decoded by a later [`Self::cycle`].
    pub(crate) async fn login(
        &mut self,
        root: &str,
        user: &str,
        password: &str,
    ) -> Result<(), CvsError> {
        let credentials = Credentials {
            user: user.to_string(),
            scrambled: scramble_password(password),
        };
        self.working_root = root.to_string();
        self.logged_in = false;
        self.login_failed = false;
        self.authorized = false;
        self.auth_request_sent = false;
        self.queue.clear();

        let block = encode_handshake(
            Handshake::Verification,
            root,
            &credentials.user,
            &credentials.scrambled,
        );
        self.credentials = Some(credentials);

        self.transport.connect(&self.address, self.port).await?;
        debug!(root, user, "sending verification request");
        self.transport.send(&block).await
    }

    pub(crate) async fn queue_negotiation(&mut self) -> Result<(), CvsError> {
        let root = self.working_root.clone();
        self.enqueue_all(vec![
            encode_root(&root),
            encode_bare(VALID_REQUESTS),
            encode_bare(USE_UNCHANGED),
        ])
        .await
    }

    pub(crate) async fn queue_checkout(&mut self, module: &str) -> Result<(), CvsError> {
        let directory = encode_directory(".", &self.working_root);
        self.enqueue_all(vec![
            encode_argument("-N"),
            encode_argument(module),
            directory,
            encode_bare(CHECKOUT),
        ])
        .await
    }

    pub(crate) async fn queue_checkout_all(&mut self) -> Result<(), CvsError> {
        self.queue_checkout(".").await
    }

    pub(crate) async fn queue_list_modules(&mut self) -> Result<(), CvsError> {
        let directory = encode_directory(".", &self.working_root);
        self.enqueue_all(vec![
            encode_argument("."),
            directory,
            encode_bare(EXPAND_MODULES),
        ])
        .await
    }

    pub(crate) async fn queue_export(&mut self, module: &str, revision: &str) -> Result<(), CvsError> {
        let directory = encode_directory(".", &self.working_root);
        self.enqueue_all(vec![
            encode_argument("-r"),
            encode_argument(revision),
            encode_argument(module),
            directory,
            encode_bare(EXPORT),
        ])
        .await
    }

    pub(crate) async fn queue_set(&mut self, variable: &str, value: &str) -> Result<(), CvsError> {
        self.enqueue_all(vec![encode_set(variable, value)]).await
    }

    /// Appends requests to the queue, then makes sure the data connection
    /// exists and has an auth request in flight.
    ///
    /// The requests stay queued even if connecting fails; the next cycle
    /// retries the connection.
    pub(crate) async fn enqueue_all(&mut self, payloads: Vec<Vec<u8>>) -> Result<(), CvsError> {
        if !self.logged_in {
            return Err(CvsError::Session("not logged in".into()));
        }
        for payload in payloads {
            let request = Request::new(self.next_seq, payload);
            self.next_seq += 1;
            debug!(seq = request.seq(), request = request.name(), "request queued");
            self.queue.push_back(request);
        }
        self.ensure_authorizing().await
    }

    async fn ensure_authorizing(&mut self) -> Result<(), CvsError> {
        if !self.transport.is_connected() {
            self.reset_connection_state();
            self.transport.connect(&self.address, self.port).await?;
        }
        if self.authorized || self.auth_request_sent {
            return Ok(());
        }
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(CvsError::Session("no credentials".into()));
        };
        let block = encode_handshake(
            Handshake::Auth,
            &self.working_root,
            &credentials.user,
            &credentials.scrambled,
        );
        debug!("sending auth request");
        self.transport.send(&block).await?;
        self.auth_request_sent = true;
        Ok(())
    }

    /// Authorization is per TCP connection: a new data connection starts
    /// unauthorized, and requests sent on the old one will never be answered.
    fn reset_connection_state(&mut self) {
        self.authorized = false;
        self.auth_request_sent = false;
        let before = self.queue.len();
        self.queue.retain(|req| !req.is_sent());
        let dropped = before - self.queue.len();
        if dropped > 0 {
            warn!(dropped, "connection lost; dropping unanswered requests");
        }
    }

    async fn send_due(&mut self) -> Result<(), CvsError> {
        if !self.queue.iter().any(|req| !req.is_sent()) {
            return Ok(());
        }
        if !self.transport.is_connected() {
            self.ensure_authorizing().await?;
        }
        if !self.authorized {
            return Ok(());
        }
        for req in self.queue.iter_mut().filter(|req| !req.is_sent()) {
            self.transport.send(req.payload()).await?;
            req.mark_sent();
            debug!(seq = req.seq(), request = req.name(), "request sent");
        }
        Ok(())
    }

    /// Runs one protocol cycle: send what is due, wait for readiness, decode
    /// at most one response.
    ///
    /// `Some(timeout)` bounds the readiness wait; `None` waits indefinitely.
    pub(crate) async fn cycle(&mut self, timeout: Option<Duration>) -> CycleOutcome {
        if let Err(err) = self.send_due().await {
            return CycleOutcome::Failed(err);
        }
        if !self.transport.is_connected() {
            return match timeout {
                Some(_) => CycleOutcome::NoData,
                None => CycleOutcome::Failed(CvsError::Session("not connected".into())),
            };
        }
        match self.transport.poll_readable(timeout).await {
            Ok(()) => {}
            Err(CvsError::NotReady) => return CycleOutcome::NoData,
            Err(err) => return CycleOutcome::Failed(err),
        }
        match self.decode_response().await {
            Ok(()) => CycleOutcome::Progressed,
            Err(err) => {
                if matches!(err, CvsError::Protocol(_)) {
                    self.transport.close();
                }
                CycleOutcome::Failed(err)
            }
        }
    }

    async fn decode_response(&mut self) -> Result<(), CvsError> {
        let line = self.read_field().await?;
        let (name, rest) = split_response(&line);
        debug!(response = name, "response received");
        match name {
            "I" => return self.on_verdict(rest).await,
            "ok" | "error" => {
                self.on_status(&line);
                return Ok(());
            }
            "Valid-requests" => {
                let requests = rest.split_whitespace().map(str::to_string).collect();
                self.decoded.push(Response::ValidRequests(requests));
            }
            "Updated" => {
                let file = self.read_updated(rest).await?;
                self.decoded.push(Response::Updated(file));
            }
            other => {
                return Err(CvsError::Protocol(format!("unknown response: {other}")));
            }
        }
        let status = self.read_field().await?;
        self.on_status(&status);
        Ok(())
    }

    async fn read_field(&mut self) -> Result<String, CvsError> {
        let line = self.transport.read_line().await?;
        let mut line = String::from_utf8_lossy(&line).into_owned();
        if line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    async fn read_updated(&mut self, directory: &str) -> Result<FileArtifact, CvsError> {
        let path = self.read_field().await?;
        let entry_line = self.read_field().await?;
        let mode = self.read_field().await?;
        let size_text = self.read_field().await?;
        let size: u64 = size_text
            .trim()
            .parse()
            .map_err(|_| CvsError::Protocol(format!("invalid file size: {size_text:?}")))?;
        let len = usize::try_from(size)
            .map_err(|_| CvsError::Protocol(format!("file too large: {size}")))?;
        let data = self.transport.read_exact(len).await?;
        debug!(path = %path, size, "file received");
        Ok(FileArtifact {
            directory: directory.to_string(),
            path,
            entry_line,
            mode,
            size,
            data,
        })
    }

    async fn on_verdict(&mut self, verdict: &str) -> Result<(), CvsError> {
        let granted = match verdict {
            "LOVE YOU" => true,
            "HATE YOU" => false,
            other => {
                return Err(CvsError::Protocol(format!(
                    "unknown answer during login: I {other}"
                )));
            }
        };
        match (self.logged_in, granted) {
            (false, true) => {
                debug!("login accepted");
                // The verification connection is single-use; work happens on
                // a fresh, authorized connection.
                self.transport.close();
                self.logged_in = true;
                self.decoded.push(Response::LoginOk);
                self.complete(Reply::Ok);
                self.queue_negotiation().await
            }
            (false, false) => {
                debug!("login rejected");
                self.transport.close();
                self.login_failed = true;
                self.decoded.push(Response::LoginFail);
                self.complete(Reply::LoginFailed);
                Ok(())
            }
            (true, true) => {
                if self.authorized {
                    warn!("received double authorization");
                } else {
                    debug!("data connection authorized");
                    self.authorized = true;
                    self.decoded.push(Response::Authorized);
                }
                Ok(())
            }
            (true, false) => {
                let dropped = self.queue.len();
                warn!(dropped, "authorization denied; dropping queued requests");
                self.queue.clear();
                self.transport.close();
                self.auth_request_sent = false;
                self.decoded.push(Response::AuthFail);
                self.complete(Reply::AuthorizationDenied);
                Ok(())
            }
        }
    }

    fn on_status(&mut self, line: &str) {
        if line == "ok" {
            match self
                .queue
                .iter_mut()
                .find(|req| req.is_sent() && !req.is_replied())
            {
                Some(req) => {
                    req.mark_replied();
                    debug!(seq = req.seq(), request = req.name(), "request replied");
                }
                None => debug!("ok without a pending request"),
            }
            self.queue.retain(|req| !req.is_replied());
            self.complete(Reply::Ok);
        } else if line == "error" || line.starts_with("error ") {
            warn!(message = line["error".len()..].trim(), "server answered error");
            self.complete(Reply::Error);
        } else {
            warn!(reply = line, "unrecognized reply");
        }
    }

    fn complete(&mut self, reply: Reply) {
        if self.completion_armed {
            self.completion = Some(reply);
        }
    }
}
