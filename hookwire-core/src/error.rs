use thiserror::Error;

use crate::transport::TransportError;

/// Top-level error for the crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}

/// Errors surfaced by the message bus itself.
///
/// Note that a timed-out or type-mismatched `send_and_wait` is *not* an
/// error; it resolves to `Ok(None)`. Errors here are misuse or transport
/// failures.
#[derive(Error, Debug)]
pub enum BusError {
    /// A waiter is already registered for this correlation id.
    #[error("duplicate pending wait for id {0}")]
    DuplicatePending(u64),
    /// The read half was lost to a transport fault; the bus cannot be
    /// restarted on this stream.
    #[error("stream is no longer readable")]
    StreamLost,
    /// Spawning or wiring the helper process failed.
    #[error("helper process error: {0}")]
    Process(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type BusResult<T> = Result<T, BusError>;
