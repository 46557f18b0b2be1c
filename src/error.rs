//! The error taxonomy (spec §7): one `thiserror` enum per category, each
//! handled by a fixed policy rather than propagated generically.

use thiserror::Error;

/// Remote-peer transport failure: disconnection or a mid-frame I/O error.
/// Logged by the reader thread, which then loops back to re-accept; never
/// reaches the event loop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("remote peer disconnected")]
    Disconnected,
    #[error("I/O failure reading frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame payload was not valid UTF-8")]
    InvalidUtf8,
}

/// Malformed or unrecognized remote-peer request. Converted to an
/// `ON_ERROR` outbound message; orchestrator state is left unchanged.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unrecognized action tag: {0}")]
    UnknownActionTag(i8),
    #[error("malformed JSON payload: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("missing required key: {0}")]
    MissingKey(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidEnumValue { field: &'static str, value: String },
    #[error("illegal move list: {0}")]
    IllegalMoveList(String),
}

/// Rejected at the point of injection (e.g. `Game::force_moves`'s illegal
/// move in a forced list, or an attempt to pop history past its root); no
/// commit occurs. Kept as a plain string, matching the narrow rejection
/// pattern the rules oracle itself uses for forced-move validation.
pub type RulesError = String;

/// File-backed persistence failure: logged, and surfaces as `ON_ERROR` for
/// the operation that triggered it.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence file not found: {0}")]
    NotFound(String),
    #[error("failed to rename {from} to {to}: {source}")]
    Rename { from: String, to: String, source: std::io::Error },
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize {0}: {1}")]
    Serde(String, #[source] serde_json::Error),
}

/// A violated invariant: wrong-thread call, transition from a released
/// state. Fatal — the event loop is asked to stop after this is logged.
/// Checked by `Orchestrator::dispatch` on every event (spec §7e).
#[derive(Debug, Error)]
pub enum CoreInvariant {
    #[error("operation {0} invoked off the event-loop thread")]
    WrongThread(&'static str),
    #[error("attempted transition from a released state")]
    TransitionFromReleasedState,
}

/// The crate-wide error, used where a function can fail in more than one
/// category (e.g. the orchestrator's top-level dispatch).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("rules error: {0}")]
    Rules(RulesError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Invariant(#[from] CoreInvariant),
}
