//! # Error Definitions
//!
//! Per-message errors (`MalformedEnvelope`, `HandlerNotFound`, `IdNotFound`)
//! are logged and the message is dropped; they never reach unrelated calls.
//! Only the handshake failure is surfaced to the caller that opened the
//! connection.

use std::time::Duration;

use crate::connection::State;
use crate::envelope::CorrelationId;
use crate::envelope::Tag;
use crate::transport;

#[derive(Debug, Clone)]
pub enum Error {
    /// The bytes could not be parsed into a `{tag, id, payload}` envelope.
    MalformedEnvelope(String),
    /// The envelope could not be encoded.
    Encode(wirepack::Error),
    /// No handler is registered for the tag.
    HandlerNotFound { tag: Tag },
    /// The tag has handlers, but none at this id.
    IdNotFound { tag: Tag, id: CorrelationId },
    /// The worker never sent its ready signal.
    ConnectionTimeout { worker: String, after: Duration },
    /// A caller-side wait for a reply elapsed. The reply handler stays registered.
    ResponseTimeout { tag: Tag, id: CorrelationId, after: Duration },
    /// The reply handler was discarded before it fired (connection torn down).
    ReplyDropped { tag: Tag, id: CorrelationId },
    /// Traffic attempted outside the `Ready` state.
    NotReady(State),
    /// The underlying channel failed.
    Transport(transport::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedEnvelope(reason) => write!(f, "Malformed envelope: {}", reason),
            Self::Encode(e) => write!(f, "Failed to encode envelope: {}", e),
            Self::HandlerNotFound { tag } => write!(f, "No handlers found for tag {:?}", tag.as_str()),
            Self::IdNotFound { tag, id } => {
                write!(f, "No {:?} handler found for ID {}", tag.as_str(), id)
            }
            Self::ConnectionTimeout { worker, after } => write!(
                f,
                "[{}] timed out after {:?} waiting for initial message from worker",
                worker, after
            ),
            Self::ResponseTimeout { tag, id, after } => write!(
                f,
                "Timed out after {:?} waiting for {:?} reply with ID {}",
                after,
                tag.as_str(),
                id
            ),
            Self::ReplyDropped { tag, id } => {
                write!(f, "Reply handler for {:?} ID {} was dropped", tag.as_str(), id)
            }
            Self::NotReady(state) => write!(f, "Connection is not ready (state: {:?})", state),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<wirepack::Error> for Error {
    fn from(e: wirepack::Error) -> Self {
        Self::Encode(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
