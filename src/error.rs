use thiserror::Error;

/// Error type returned by event handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
#[non_exhaustive]
/// Errors returned by this crate.
pub enum CvsError {
    /// The provided CVSROOT is syntactically invalid or not a pserver root.
    #[error("invalid cvsroot: {0}")]
    InvalidRoot(String),
    /// Opening the TCP connection to the pserver failed.
    #[error("unable to connect to {addr}: {source}")]
    Connection {
        /// `host:port` that was dialed.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// Sending to or reading from the connection failed (EOF included).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// The server sent something this client does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The operation is not valid in the current session state
    /// (for example a request before a successful login).
    #[error("session error: {0}")]
    Session(String),
    /// A readiness probe found no data within its timeout.
    #[error("connection not ready")]
    NotReady,
    /// An event handler returned an error.
    #[error("handler for `{event}` failed: {source}")]
    Handler {
        /// Name of the event being dispatched.
        event: &'static str,
        /// The handler's error.
        #[source]
        source: HandlerError,
    },
}

impl CvsError {
    /// Returns `true` for failures a polling loop should simply retry.
    ///
    /// Transport and readiness failures are transient; protocol, session and
    /// handler failures are surfaced to the application.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Transport(_) | Self::NotReady
        )
    }

    pub(crate) fn eof() -> Self {
        Self::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        ))
    }

    pub(crate) fn timed_out(what: &str) -> Self {
        Self::Transport(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{what} timed out"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_matches_polling_policy() {
        assert!(CvsError::NotReady.is_transient());
        assert!(CvsError::eof().is_transient());
        assert!(
            CvsError::Connection {
                addr: "example.com:2401".into(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            }
            .is_transient()
        );
        assert!(!CvsError::Protocol("unknown response".into()).is_transient());
        assert!(!CvsError::Session("not logged in".into()).is_transient());
    }

    #[test]
    fn handler_error_names_the_event() {
        let err = CvsError::Handler {
            event: "updatedfile",
            source: "disk full".into(),
        };
        assert_eq!(err.to_string(), "handler for `updatedfile` failed: disk full");
    }
}
