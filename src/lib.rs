//! Async client for the CVS password server (`:pserver:`) protocol.
//!
//! This crate speaks the client side of the pserver protocol: it logs in,
//! authorizes a data connection, sends requests such as `co` and `export`,
//! and turns the server's responses into events. It does **not** implement a
//! working copy; files arrive as [`FileArtifact`] values in `updatedfile`
//! events and the application decides where to write them.
//!
//! Most users should start with a [`Registry`], create a [`Session`] from a
//! [`SessionConfig`], register handlers, and then poll.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cvs::{CvsRoot, EventKind, Registry, SessionConfig, handler};
//!
//! fn main() -> cvs::Result<()> {
//!     let rt = tokio::runtime::Builder::new_current_thread()
//!         .enable_all()
//!         .build()?;
//!
//!     rt.block_on(async {
//!         let root = CvsRoot::parse(":pserver:anonymous@cvs.example.org:/cvsroot")?;
//!         let mut registry = Registry::new();
//!         let stop = registry.shutdown_handle();
//!         registry.register_global(EventKind::LoginFail, 0, handler(move |_| {
//!             stop.shutdown();
//!             Ok(())
//!         }));
//!         registry.register_global(EventKind::UpdatedFile, 0, handler(|event| {
//!             if let Some(file) = event.file() {
//!                 println!("U {}", file.path);
//!             }
//!             Ok(())
//!         }));
//!
//!         let session = registry.create_session(SessionConfig::from_root(&root));
//!         session.login(&root.path, root.user_or_anonymous(), "").await?;
//!         let id = session.id();
//!
//!         // Wait for the login verdict, then queue the checkout.
//!         while !registry.session(id).is_some_and(|s| s.state().logged_in) {
//!             for (_, outcome) in registry.poll_all(Duration::from_millis(200)).await {
//!                 if let cvs::CycleOutcome::Failed(err) = outcome {
//!                     return Err(err);
//!                 }
//!             }
//!         }
//!         if let Some(session) = registry.session_mut(id) {
//!             session.checkout("demo").await?;
//!         }
//!         registry.run(Duration::from_millis(200)).await
//!     })
//! }
//! ```
//!
//! ## Execution modes
//!
//! - [`ExecutionMode::Async`]: verbs queue requests and return
//!   [`Reply::Queued`]; progress happens in [`Registry::poll_all`] or
//!   [`Registry::run`]. Many async sessions can share one task.
//! - [`ExecutionMode::Sync`]: verbs return only once the server answered.
//!   Drive a sync session from its own task (see [`Registry::remove_session`]).
//!
//! ## Protocol notes
//!
//! - Login uses a dedicated connection (`BEGIN VERIFICATION REQUEST`) that
//!   is closed after the verdict; requests flow on a second connection
//!   opened with `BEGIN AUTH REQUEST`.
//! - Requests carry no identifiers, so each `ok` retires the oldest request
//!   that was sent and not yet answered.
//! - Passwords are sent "scrambled" ([`scramble_password`]), which is an
//!   obfuscation, not encryption.
//!
//! ## Features
//!
//! - `serde`: enables `Serialize`/`Deserialize` for public data types.

#![deny(unsafe_code)]

mod dispatch;
mod error;
mod proto;
mod registry;
mod root;
mod scramble;
mod session;
mod types;

pub use dispatch::{Handler, HandlerTable, handler};
pub use error::{CvsError, HandlerError};
/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, CvsError>;
pub use registry::{Registry, ShutdownHandle};
pub use root::{CvsRoot, DEFAULT_PSERVER_PORT};
pub use scramble::{descramble_password, scramble_password};
pub use session::{AsyncSession, Session, SessionConfig, SyncSession};
pub use types::{
    CycleOutcome, Event, EventKind, EventPayload, ExecutionMode, FileArtifact, ProtocolState,
    Reply, Request, SessionId, SessionState,
};
