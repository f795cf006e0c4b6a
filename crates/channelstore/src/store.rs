//! # In-Memory Store
//!
//! Channels and messages in `DashMap`s keyed by id, so event handlers
//! running on separate tasks never contend on one global lock.
//!
//! Every event handler runs on its own task, so events reach the store in no
//! particular order. A status update for a message that has not arrived yet
//! is held and applied when the message does, and a channel that was left
//! stays left: later posts for it, or a late join, are dropped.
//!
//! ## Invariants
//! - At most one record per channel id and per message id.
//! - Applying the same receive event twice leaves the store as applying it once.
//! - A status never moves backwards from `Delivered` because a late
//!   sent-event for the same message shows up.
//! - Tombstones are checked while the record's entry is held, and `leave`
//!   writes its tombstone before it removes anything, so a post racing a
//!   leave is either ignored or removed.
//! - Lock order is `messages` before `pending_status`, so an update and the
//!   insert it waits for cannot miss each other.

use dashmap::DashMap;
use dashmap::DashSet;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use tracing::warn;

use crate::event::Channel;
use crate::event::ChannelId;
use crate::event::Event;
use crate::event::EventTag;
use crate::event::Message;
use crate::event::MessageId;
use crate::event::MessageKind;
use crate::event::Post;
use crate::event::SentStatus;

/// What applying one event did to the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Updated,
    /// The event matched what was already stored.
    Unchanged,
    Removed,
    /// The event referred to something the store does not hold, or to a
    /// channel that was left.
    Ignored,
    /// A status update held until its message arrives.
    Deferred,
}

#[derive(Default)]
pub struct Store {
    channels: DashMap<ChannelId, Channel>,
    messages: DashMap<MessageId, Message>,
    pending_status: DashMap<MessageId, SentStatus>,
    left: DashSet<ChannelId>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and applies one event payload. Undecodable payloads are logged
    /// and dropped.
    pub fn receive(&self, tag: EventTag, payload: &[u8]) -> Option<Outcome> {
        match Event::decode(tag, payload) {
            Ok(event) => Some(self.apply(event)),
            Err(e) => {
                warn!(%tag, error = %e, "dropping undecodable event");
                None
            }
        }
    }

    pub fn apply(&self, event: Event) -> Outcome {
        let tag = event.tag();
        let outcome = match event {
            Event::JoinChannel(channel) => self.join(channel),
            Event::LeaveChannel(id) => self.leave(&id),
            Event::UpdateSentStatus { message_id, status } => self.update_status(&message_id, status),
            Event::ReceiveMessage(post)
            | Event::ReceiveReply(post)
            | Event::ReceiveReaction(post)
            | Event::MessageSent(post)
            | Event::ReplySent(post)
            | Event::ReactionSent(post) => self.upsert_post(tag, post),
        };
        debug!(%tag, ?outcome, "applied event");
        outcome
    }

    fn join(&self, channel: Channel) -> Outcome {
        let entry = self.channels.entry(channel.id);
        if self.left.contains(&channel.id) {
            debug!(channel_id = %channel.id, "ignoring join for a channel that was left");
            return Outcome::Ignored;
        }
        match entry {
            Entry::Occupied(mut e) if *e.get() != channel => {
                e.insert(channel);
                Outcome::Updated
            }
            Entry::Occupied(_) => Outcome::Unchanged,
            Entry::Vacant(e) => {
                e.insert(channel);
                Outcome::Inserted
            }
        }
    }

    /// Removes the channel and every message stored for it, and remembers
    /// that it was left.
    fn leave(&self, id: &ChannelId) -> Outcome {
        self.left.insert(*id);
        let had_channel = self.channels.remove(id).is_some();
        let before = self.messages.len();
        self.messages.retain(|_, m| m.channel_id != *id);

        if had_channel || self.messages.len() != before {
            Outcome::Removed
        } else {
            Outcome::Ignored
        }
    }

    fn upsert_post(&self, tag: EventTag, post: Post) -> Outcome {
        let kind = tag.kind().unwrap_or(MessageKind::Text);
        let status = if tag.is_sent() { SentStatus::Sent } else { SentStatus::Delivered };
        let mut incoming = Message::from_post(post, kind, status);

        let entry = self.messages.entry(incoming.message_id);
        if self.left.contains(&incoming.channel_id) {
            debug!(
                channel_id = %incoming.channel_id, message_id = %incoming.message_id,
                "ignoring post for a channel that was left"
            );
            return Outcome::Ignored;
        }

        match entry {
            Entry::Vacant(e) => {
                if let Some((_, held)) = self.pending_status.remove(&incoming.message_id) {
                    incoming.status = held;
                }
                e.insert(incoming);
                Outcome::Inserted
            }
            Entry::Occupied(mut e) => {
                if tag.is_sent() {
                    incoming.status = e.get().status;
                }
                if *e.get() == incoming {
                    Outcome::Unchanged
                } else {
                    e.insert(incoming);
                    Outcome::Updated
                }
            }
        }
    }

    fn update_status(&self, id: &MessageId, status: SentStatus) -> Outcome {
        match self.messages.entry(*id) {
            Entry::Occupied(mut e) if e.get().status != status => {
                e.get_mut().status = status;
                Outcome::Updated
            }
            Entry::Occupied(_) => Outcome::Unchanged,
            Entry::Vacant(_) => {
                // The vacant entry keeps the shard locked until the update is held.
                debug!(message_id = %id, ?status, "holding status update for unknown message");
                self.pending_status.insert(*id, status);
                Outcome::Deferred
            }
        }
    }

    pub fn channel(&self, id: &ChannelId) -> Option<Channel> {
        self.channels.get(id).map(|c| c.value().clone())
    }

    /// All joined channels, ordered by id.
    pub fn channels(&self) -> Vec<Channel> {
        let mut all: Vec<Channel> = self.channels.iter().map(|c| c.value().clone()).collect();
        all.sort_by_key(|c| c.id);
        all
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.messages.get(id).map(|m| m.value().clone())
    }

    /// Messages of every kind in a channel, oldest first.
    pub fn messages(&self, channel: &ChannelId) -> Vec<Message> {
        let mut found: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.channel_id == *channel)
            .map(|m| m.value().clone())
            .collect();
        found.sort_by_key(|m| (m.timestamp_ms, m.message_id));
        found
    }

    /// Replies and reactions to `parent`, oldest first. The parent itself need
    /// not be stored.
    pub fn responses(&self, parent: &MessageId) -> Vec<Message> {
        let mut found: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.parent_message_id.as_ref() == Some(parent))
            .map(|m| m.value().clone())
            .collect();
        found.sort_by_key(|m| (m.timestamp_ms, m.message_id));
        found
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Whether `LeaveChannel` has been applied for the channel.
    pub fn has_left(&self, id: &ChannelId) -> bool {
        self.left.contains(id)
    }

    /// Status updates still waiting for their message.
    pub fn pending_status_count(&self) -> usize {
        self.pending_status.len()
    }
}
