//! Our error types, split by layer.
//!
//! [Error] covers a single protocol exchange with the supply and is generic
//! over the byte interface's error type. [IntentError] is what operator
//! intents resolve to; it is plain data so it can cross the session channel.

use thiserror::Error;

use crate::types::SessionState;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Failure of one request/response exchange with the supply.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("serial communication error")]
    Serial(I),
    /// No complete response line arrived within the read timeout.
    #[error("communication timeout")]
    Timeout,
    #[error("malformed frame: {0}")]
    Frame(#[from] crate::frame::FrameError),
    /// The frame was well formed but its payload was not what the request
    /// expects, e.g. a non-numeric value for a monitor query.
    #[error("unexpected response payload")]
    InvalidResponse,
    #[error("value out of range for channel")]
    OutOfRange,
    #[error("response exceeded the line buffer")]
    BufferOverflow,
}

/// Failure to open the serial link.
#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    #[error("cannot open {port}: {reason}")]
    Open { port: String, reason: String },
    /// The port opened but the device never answered the init handshake.
    #[error("device handshake failed: {0}")]
    Handshake(String),
}

/// Outcome delivered to the operator when an intent is rejected or fails.
#[derive(Error, Debug, Clone)]
pub enum IntentError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("setpoint rejected: {0}")]
    Validation(String),
    /// Intent is not legal in the current session state.
    #[error("not allowed while {0}")]
    NotAllowed(SessionState),
    /// A fault is latched; output-enabling intents stay refused until the
    /// fault is acknowledged and the session reset.
    #[error("refused: a safety fault is latched")]
    Faulted,
    /// Reset was requested while unacknowledged faults remain latched.
    #[error("refused: unacknowledged faults remain")]
    Unacknowledged,
    #[error("device exchange failed: {0}")]
    Device(String),
    /// The worker is gone; the session can no longer serve intents.
    #[error("session closed")]
    SessionClosed,
}
