//! # Workerlink
//!
//! Correlated messaging between a host and one isolated worker over a single
//! bidirectional byte channel.
//!
//! Three interaction shapes share the channel:
//!
//! - **Notifications**: `send_message` with no reply handler.
//! - **Request/Reply**: `send_message` with a one-shot handler; the reply echoes
//!   the tag and the auto-allocated id.
//! - **Subscriptions**: a persistent handler registered for an event tag.
//!
//! The [`Connection`] spawns the worker, waits for its ready signal, and owns
//! termination. Everything below it is tag-agnostic: tags are opaque strings.

pub mod channel;
pub mod config;
pub mod connection;
mod dispatcher;
pub mod envelope;
pub mod error;
pub mod local;
pub mod logging;
pub mod process;
pub mod registry;
pub mod spawn;
pub mod transport;
pub mod worker;

pub use config::HandlerConfig;
pub use connection::Connection;
pub use connection::State;
pub use envelope::CorrelationId;
pub use envelope::Envelope;
pub use envelope::INIT_ID;
pub use envelope::READY_TAG;
pub use envelope::Tag;
pub use error::Error;
pub use error::Result;
pub use registry::HandlerFn;
pub use registry::Lifecycle;
pub use registry::Slot;
pub use registry::handler_fn;
pub use spawn::Spawn;
pub use spawn::WorkerOptions;
pub use transport::Transport;
pub use worker::WorkerEndpoint;
