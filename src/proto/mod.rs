//! pserver protocol internals: connection, request encoding and the state machine.

pub(crate) mod engine;
pub(crate) mod transport;
pub(crate) mod wire;
