//! # Channel Events
//!
//! The records a channel store keeps and the events that change them.
//!
//! Each event travels as its own tag at `INIT_ID`, with a wirepack map as the
//! payload. Unknown fields are skipped; missing, duplicated, or mistyped
//! fields fail the decode.

use std::collections::HashMap;
use std::fmt;

use wirepack::Decoder;
use wirepack::Encoder;
use workerlink::Tag;

use crate::error::Error;
use crate::error::Result;

/// Identifies a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub [u8; 33]);

/// Identifies a message, reply, or reaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub [u8; 32]);

fn hex_prefix(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in bytes.iter().take(6) {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        hex_prefix(&self.0, f)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        hex_prefix(&self.0, f)
    }
}

/// The tag each event is sent under.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventTag {
    JoinChannel,
    LeaveChannel,
    ReceiveMessage,
    ReceiveReply,
    ReceiveReaction,
    MessageSent,
    ReplySent,
    ReactionSent,
    UpdateSentStatus,
}

impl EventTag {
    pub const ALL: [EventTag; 9] = [
        Self::JoinChannel,
        Self::LeaveChannel,
        Self::ReceiveMessage,
        Self::ReceiveReply,
        Self::ReceiveReaction,
        Self::MessageSent,
        Self::ReplySent,
        Self::ReactionSent,
        Self::UpdateSentStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JoinChannel => "JoinChannel",
            Self::LeaveChannel => "LeaveChannel",
            Self::ReceiveMessage => "ReceiveMessage",
            Self::ReceiveReply => "ReceiveReply",
            Self::ReceiveReaction => "ReceiveReaction",
            Self::MessageSent => "MessageSent",
            Self::ReplySent => "ReplySent",
            Self::ReactionSent => "ReactionSent",
            Self::UpdateSentStatus => "UpdateSentStatus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == s)
    }

    /// The kind of message a post event carries, or `None` for the others.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::ReceiveMessage | Self::MessageSent => Some(MessageKind::Text),
            Self::ReceiveReply | Self::ReplySent => Some(MessageKind::Reply),
            Self::ReceiveReaction | Self::ReactionSent => Some(MessageKind::Reaction),
            _ => None,
        }
    }

    /// Whether the event reports the local user's own post.
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::MessageSent | Self::ReplySent | Self::ReactionSent)
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventTag> for Tag {
    fn from(tag: EventTag) -> Self {
        Tag::new(tag.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Reply,
    Reaction,
}

/// Delivery state of a message. Received messages are always `Delivered`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SentStatus {
    Unsent,
    Sent,
    Delivered,
    Failed,
}

impl SentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsent => "unsent",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unsent" => Some(Self::Unsent),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub description: String,
}

/// One post as carried by the receive and sent events. For replies and
/// reactions `parent_message_id` names the message responded to, and for
/// reactions `text` is the reaction itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Post {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub parent_message_id: Option<MessageId>,
    pub sender_username: String,
    pub text: String,
    pub timestamp_ms: i64,
    pub lease_ms: u64,
    pub round_id: u64,
}

/// A stored message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub parent_message_id: Option<MessageId>,
    pub sender_username: String,
    pub text: String,
    pub timestamp_ms: i64,
    pub lease_ms: u64,
    pub round_id: u64,
    pub status: SentStatus,
    pub kind: MessageKind,
}

impl Message {
    pub fn from_post(post: Post, kind: MessageKind, status: SentStatus) -> Self {
        Self {
            message_id: post.message_id,
            channel_id: post.channel_id,
            parent_message_id: post.parent_message_id,
            sender_username: post.sender_username,
            text: post.text,
            timestamp_ms: post.timestamp_ms,
            lease_ms: post.lease_ms,
            round_id: post.round_id,
            status,
            kind,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    JoinChannel(Channel),
    LeaveChannel(ChannelId),
    ReceiveMessage(Post),
    ReceiveReply(Post),
    ReceiveReaction(Post),
    MessageSent(Post),
    ReplySent(Post),
    ReactionSent(Post),
    UpdateSentStatus { message_id: MessageId, status: SentStatus },
}

impl Event {
    pub fn tag(&self) -> EventTag {
        match self {
            Self::JoinChannel(_) => EventTag::JoinChannel,
            Self::LeaveChannel(_) => EventTag::LeaveChannel,
            Self::ReceiveMessage(_) => EventTag::ReceiveMessage,
            Self::ReceiveReply(_) => EventTag::ReceiveReply,
            Self::ReceiveReaction(_) => EventTag::ReceiveReaction,
            Self::MessageSent(_) => EventTag::MessageSent,
            Self::ReplySent(_) => EventTag::ReplySent,
            Self::ReactionSent(_) => EventTag::ReactionSent,
            Self::UpdateSentStatus { .. } => EventTag::UpdateSentStatus,
        }
    }

    /// Encodes the payload. The tag travels separately, see [`Event::tag`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.map_begin()?;
        match self {
            Self::JoinChannel(channel) => {
                enc.field_bytes("id", &channel.id.0)?;
                enc.field_str("name", &channel.name)?;
                enc.field_str("description", &channel.description)?;
            }
            Self::LeaveChannel(id) => {
                enc.field_bytes("channel_id", &id.0)?;
            }
            Self::ReceiveMessage(post)
            | Self::ReceiveReply(post)
            | Self::ReceiveReaction(post)
            | Self::MessageSent(post)
            | Self::ReplySent(post)
            | Self::ReactionSent(post) => encode_post(&mut enc, post)?,
            Self::UpdateSentStatus { message_id, status } => {
                enc.field_bytes("message_id", &message_id.0)?;
                enc.field_str("status", status.as_str())?;
            }
        }
        enc.map_end()?;
        Ok(enc.into_bytes()?)
    }

    pub fn decode(tag: EventTag, payload: &[u8]) -> Result<Self> {
        let mut fields = Fields::read(payload)?;
        let event = match tag {
            EventTag::JoinChannel => Self::JoinChannel(Channel {
                id: ChannelId(fields.array("id")?),
                name: fields.string("name")?,
                description: fields.string("description")?,
            }),
            EventTag::LeaveChannel => Self::LeaveChannel(ChannelId(fields.array("channel_id")?)),
            EventTag::UpdateSentStatus => {
                let message_id = MessageId(fields.array("message_id")?);
                let status = fields.string("status")?;
                let status = SentStatus::parse(&status)
                    .ok_or_else(|| Error::Decode(format!("unknown status {:?}", status)))?;
                Self::UpdateSentStatus { message_id, status }
            }
            post_tag => {
                let post = decode_post(&mut fields)?;
                let needs_parent = post_tag.kind() != Some(MessageKind::Text);
                if needs_parent != post.parent_message_id.is_some() {
                    return Err(Error::Decode(format!(
                        "{} must {}carry a parent message id",
                        post_tag,
                        if needs_parent { "" } else { "not " }
                    )));
                }
                match post_tag {
                    EventTag::ReceiveMessage => Self::ReceiveMessage(post),
                    EventTag::ReceiveReply => Self::ReceiveReply(post),
                    EventTag::ReceiveReaction => Self::ReceiveReaction(post),
                    EventTag::MessageSent => Self::MessageSent(post),
                    EventTag::ReplySent => Self::ReplySent(post),
                    _ => Self::ReactionSent(post),
                }
            }
        };
        Ok(event)
    }
}

fn encode_post(enc: &mut Encoder, post: &Post) -> Result<()> {
    enc.field_bytes("channel_id", &post.channel_id.0)?;
    enc.field_bytes("message_id", &post.message_id.0)?;
    enc.field_opt_bytes("parent_message_id", post.parent_message_id.as_ref().map(|id| &id.0[..]))?;
    enc.field_str("sender_username", &post.sender_username)?;
    enc.field_str("text", &post.text)?;
    enc.field_i64("timestamp_ms", post.timestamp_ms)?;
    enc.field_u64("lease_ms", post.lease_ms)?;
    enc.field_u64("round_id", post.round_id)?;
    Ok(())
}

fn decode_post(fields: &mut Fields<'_>) -> Result<Post> {
    Ok(Post {
        channel_id: ChannelId(fields.array("channel_id")?),
        message_id: MessageId(fields.array("message_id")?),
        parent_message_id: fields.opt_array("parent_message_id")?.map(MessageId),
        sender_username: fields.string("sender_username")?,
        text: fields.string("text")?,
        timestamp_ms: fields.i64("timestamp_ms")?,
        lease_ms: fields.u64("lease_ms")?,
        round_id: fields.u64("round_id")?,
    })
}

fn malformed(e: wirepack::Error) -> Error {
    Error::Decode(e.to_string())
}

/// The fields of one payload map, by name.
struct Fields<'a> {
    values: HashMap<&'a str, Decoder<'a>>,
}

impl<'a> Fields<'a> {
    fn read(bytes: &'a [u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let mut map = dec.map().map_err(malformed)?;
        dec.finish().map_err(malformed)?;

        let mut values = HashMap::new();
        while let Some((name, value)) = map.next().map_err(malformed)? {
            if values.insert(name, value).is_some() {
                return Err(Error::Decode(format!("duplicate field {:?}", name)));
            }
        }
        Ok(Self { values })
    }

    fn take<T>(
        &mut self,
        name: &str,
        read: impl FnOnce(&mut Decoder<'a>) -> wirepack::Result<T>,
    ) -> Result<T> {
        let mut dec = self
            .values
            .remove(name)
            .ok_or_else(|| Error::Decode(format!("missing field {:?}", name)))?;
        let value = read(&mut dec).map_err(malformed)?;
        dec.finish().map_err(malformed)?;
        Ok(value)
    }

    fn string(&mut self, name: &str) -> Result<String> {
        self.take(name, |d| d.str().map(str::to_owned))
    }

    fn u64(&mut self, name: &str) -> Result<u64> {
        self.take(name, |d| d.u64())
    }

    fn i64(&mut self, name: &str) -> Result<i64> {
        self.take(name, |d| d.i64())
    }

    fn array<const N: usize>(&mut self, name: &str) -> Result<[u8; N]> {
        let bytes = self.take(name, |d| d.bytes())?;
        to_array(name, bytes)
    }

    fn opt_array<const N: usize>(&mut self, name: &str) -> Result<Option<[u8; N]>> {
        let bytes = self.take(name, |d| match d.option()? {
            None => Ok(None),
            Some(mut inner) => {
                let bytes = inner.bytes()?;
                inner.finish()?;
                Ok(Some(bytes))
            }
        })?;
        bytes.map(|b| to_array(name, b)).transpose()
    }
}

fn to_array<const N: usize>(name: &str, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::Decode(format!("field {:?} is {} bytes, expected {}", name, bytes.len(), N))
    })
}
