//! Public data types produced and consumed by sessions.

use std::fmt::{Display, Formatter};

use crate::CvsError;

/// Identifies a session inside a [`crate::Registry`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// How a session's verbs relate to completion.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Verbs only queue requests; progress comes from repeated polling.
    #[default]
    Async,
    /// Verbs do not return until the server completed the request.
    Sync,
}

/// The names of events a session dispatches.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// The verification request was accepted (`I LOVE YOU` on the login connection).
    LoginOk,
    /// The verification request was rejected (`I HATE YOU` on the login connection).
    LoginFail,
    /// The data connection was authorized.
    Authorized,
    /// The data connection was refused; queued requests were dropped.
    AuthFail,
    /// The server listed the requests it accepts.
    ValidRequests,
    /// A file arrived in an `Updated` response.
    UpdatedFile,
}

impl EventKind {
    /// All event kinds, in declaration order.
    pub const ALL: [EventKind; 6] = [
        EventKind::LoginOk,
        EventKind::LoginFail,
        EventKind::Authorized,
        EventKind::AuthFail,
        EventKind::ValidRequests,
        EventKind::UpdatedFile,
    ];

    /// Returns the event name (`loginok`, `updatedfile`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginOk => "loginok",
            Self::LoginFail => "loginfail",
            Self::Authorized => "authorized",
            Self::AuthFail => "authfail",
            Self::ValidRequests => "validrequests",
            Self::UpdatedFile => "updatedfile",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = CvsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CvsError::Session(format!("unknown event name: {s}")))
    }
}

/// A file delivered by an `Updated` response.
///
/// The engine never touches the local filesystem; whoever handles
/// [`EventKind::UpdatedFile`] decides where (and whether) to persist `data`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileArtifact {
    /// Local directory named on the `Updated` line.
    pub directory: String,
    /// Server-relative path of the file.
    pub path: String,
    /// CVS `Entries` line for the file (`/name/rev/timestamp/options/tag`).
    pub entry_line: String,
    /// Permission string (for example `u=rw,g=r,o=r`).
    pub mode: String,
    /// Declared byte count.
    pub size: u64,
    /// Raw file contents.
    pub data: Vec<u8>,
}

/// Event payloads.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPayload {
    /// No payload (`loginok`, `loginfail`, `authorized`, `authfail`).
    None,
    /// Request names from a `Valid-requests` response.
    ValidRequests(Vec<String>),
    /// A file from an `Updated` response.
    File(FileArtifact),
}

/// An event dispatched to handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Which event this is.
    pub kind: EventKind,
    /// Event data.
    pub payload: EventPayload,
    /// The session that produced the event.
    pub session: SessionId,
}

impl Event {
    /// Returns the file carried by an `updatedfile` event.
    pub fn file(&self) -> Option<&FileArtifact> {
        match &self.payload {
            EventPayload::File(file) => Some(file),
            _ => None,
        }
    }
}

/// An outgoing request waiting in a session's queue.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    seq: u64,
    payload: Vec<u8>,
    sent: bool,
    replied: bool,
}

impl Request {
    pub(crate) fn new(seq: u64, payload: Vec<u8>) -> Self {
        Self {
            seq,
            payload,
            sent: false,
            replied: false,
        }
    }

    /// Position in the session's queue order (monotonically increasing).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Encoded request lines, including the trailing newline.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The request name (first word of the payload).
    pub fn name(&self) -> &str {
        let end = self
            .payload
            .iter()
            .position(|b| *b == b' ' || *b == b'\n')
            .unwrap_or(self.payload.len());
        std::str::from_utf8(&self.payload[..end]).unwrap_or("<non-utf8>")
    }

    /// Whether the request was written to the connection.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Whether a terminal `ok` was matched to this request.
    pub fn is_replied(&self) -> bool {
        self.replied
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }

    pub(crate) fn mark_replied(&mut self) {
        self.replied = true;
    }
}

/// Where a session is in the login/authorization lifecycle.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolState {
    /// No login attempted yet.
    Disconnected,
    /// Verification request sent; waiting for the login reply.
    AwaitingLogin,
    /// Logged in; the data connection is not authorized yet.
    LoggedIn,
    /// The data connection is authorized and requests flow.
    Authorized,
    /// The server rejected the credentials.
    LoginFailed,
}

/// A point-in-time copy of a session's protocol state.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionState {
    /// Server address.
    pub address: String,
    /// Server port.
    pub port: u16,
    /// Execution mode of the session.
    pub mode: ExecutionMode,
    /// Lifecycle state.
    pub state: ProtocolState,
    /// Whether the login handshake succeeded.
    pub logged_in: bool,
    /// Whether the current data connection is authorized.
    pub authorized: bool,
    /// Whether an auth request was sent on the current data connection.
    pub auth_request_sent: bool,
    /// Repository root used for `Root` and `Directory` requests.
    pub working_root: String,
    /// Requests not yet matched to a reply, oldest first.
    pub pending: Vec<Request>,
}

/// How a verb call finished.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    /// The request was queued; completion is observed through events (async sessions).
    Queued,
    /// The server answered `ok`.
    Ok,
    /// The server answered `error`.
    Error,
    /// The server rejected the login.
    LoginFailed,
    /// The server refused to authorize the data connection.
    AuthorizationDenied,
    /// The shutdown flag was raised while waiting.
    Cancelled,
}

/// Result of one protocol cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A response was decoded (and its events dispatched).
    Progressed,
    /// Nothing was ready within the timeout.
    NoData,
    /// Something broke; see [`CvsError::is_transient`] to decide whether to retry.
    Failed(CvsError),
}

impl CycleOutcome {
    /// Returns `true` if a response was decoded.
    pub fn is_progress(&self) -> bool {
        matches!(self, Self::Progressed)
    }
}
