//! # Channelstore
//!
//! Keeps channels and their messages in memory, fed by the events a worker
//! emits over a [`workerlink::Connection`].
//!
//! Events may arrive more than once and in any order. Every update is an
//! idempotent upsert keyed by channel or message id, so replaying an event
//! never creates a second record, and a reply or reaction that arrives before
//! its parent is stored as-is.

pub mod error;
pub mod event;
pub mod model;
pub mod store;

pub use error::Error;
pub use error::Result;
pub use event::Channel;
pub use event::ChannelId;
pub use event::Event;
pub use event::EventTag;
pub use event::Message;
pub use event::MessageId;
pub use event::MessageKind;
pub use event::Post;
pub use event::SentStatus;
pub use model::EventModel;
pub use store::Outcome;
pub use store::Store;

#[cfg(test)]
mod tests;
