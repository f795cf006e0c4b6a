use crate::event::Channel;
use crate::event::ChannelId;
use crate::event::Event;
use crate::event::EventTag;
use crate::event::MessageId;
use crate::event::MessageKind;
use crate::event::Post;
use crate::event::SentStatus;
use crate::store::Outcome;
use crate::store::Store;
use crate::Error;

fn channel_id(n: u8) -> ChannelId {
    ChannelId([n; 33])
}

fn message_id(n: u8) -> MessageId {
    MessageId([n; 32])
}

fn channel(n: u8) -> Channel {
    Channel {
        id: channel_id(n),
        name: format!("channel-{}", n),
        description: "a test channel".into(),
    }
}

fn post(chan: u8, id: u8, parent: Option<u8>, at: i64) -> Post {
    Post {
        channel_id: channel_id(chan),
        message_id: message_id(id),
        parent_message_id: parent.map(message_id),
        sender_username: "alice".into(),
        text: format!("message {}", id),
        timestamp_ms: at,
        lease_ms: 30_000,
        round_id: 42,
    }
}

#[test]
fn test_every_event_roundtrips() {
    let events = vec![
        Event::JoinChannel(channel(1)),
        Event::LeaveChannel(channel_id(1)),
        Event::ReceiveMessage(post(1, 1, None, 10)),
        Event::ReceiveReply(post(1, 2, Some(1), 11)),
        Event::ReceiveReaction(post(1, 3, Some(1), 12)),
        Event::MessageSent(post(1, 4, None, 13)),
        Event::ReplySent(post(1, 5, Some(4), -1)),
        Event::ReactionSent(post(1, 6, Some(4), i64::MAX)),
        Event::UpdateSentStatus { message_id: message_id(4), status: SentStatus::Failed },
    ];
    for event in events {
        let bytes = event.encode().unwrap();
        assert_eq!(Event::decode(event.tag(), &bytes).unwrap(), event);
    }
}

#[test]
fn test_event_tags_parse() {
    for tag in EventTag::ALL {
        assert_eq!(EventTag::parse(tag.as_str()), Some(tag));
    }
    assert_eq!(EventTag::parse("Ready"), None);
    assert_eq!(workerlink::Tag::from(EventTag::ReceiveReply).as_str(), "ReceiveReply");
}

#[test]
fn test_decode_rejects_bad_payloads() {
    // Wrong tag for the payload shape.
    let join = Event::JoinChannel(channel(1)).encode().unwrap();
    assert!(matches!(Event::decode(EventTag::ReceiveMessage, &join), Err(Error::Decode(_))));

    // A reply must name its parent, a plain message must not.
    let plain = Event::ReceiveMessage(post(1, 1, None, 0)).encode().unwrap();
    assert!(matches!(Event::decode(EventTag::ReceiveReply, &plain), Err(Error::Decode(_))));
    let reply = Event::ReceiveReply(post(1, 2, Some(1), 0)).encode().unwrap();
    assert!(matches!(Event::decode(EventTag::ReceiveMessage, &reply), Err(Error::Decode(_))));

    // Ids of the wrong width.
    let mut enc = wirepack::Encoder::new();
    enc.map_begin().unwrap();
    enc.field_bytes("channel_id", &[1, 2, 3]).unwrap();
    enc.map_end().unwrap();
    let short = enc.into_bytes().unwrap();
    assert!(matches!(Event::decode(EventTag::LeaveChannel, &short), Err(Error::Decode(_))));

    let mut enc = wirepack::Encoder::new();
    enc.map_begin().unwrap();
    enc.field_bytes("message_id", &[0; 32]).unwrap();
    enc.field_str("status", "lost").unwrap();
    enc.map_end().unwrap();
    let unknown = enc.into_bytes().unwrap();
    assert!(matches!(Event::decode(EventTag::UpdateSentStatus, &unknown), Err(Error::Decode(_))));

    assert!(matches!(Event::decode(EventTag::JoinChannel, b"garbage"), Err(Error::Decode(_))));
}

#[test]
fn test_unknown_fields_are_skipped() {
    let mut enc = wirepack::Encoder::new();
    enc.map_begin().unwrap();
    enc.field_str("color", "blue").unwrap();
    enc.field_bytes("channel_id", &[7; 33]).unwrap();
    enc.map_end().unwrap();
    let bytes = enc.into_bytes().unwrap();

    assert_eq!(
        Event::decode(EventTag::LeaveChannel, &bytes).unwrap(),
        Event::LeaveChannel(channel_id(7))
    );
}

#[test]
fn test_duplicate_receive_is_idempotent() {
    let store = Store::new();
    let event = Event::ReceiveMessage(post(1, 1, None, 5));

    assert_eq!(store.apply(event.clone()), Outcome::Inserted);
    assert_eq!(store.apply(event), Outcome::Unchanged);
    assert_eq!(store.message_count(), 1);

    let stored = store.message(&message_id(1)).unwrap();
    assert_eq!(stored.status, SentStatus::Delivered);
    assert_eq!(stored.kind, MessageKind::Text);
}

#[test]
fn test_reply_before_parent_is_kept() {
    let store = Store::new();
    assert_eq!(store.apply(Event::ReceiveReply(post(1, 2, Some(1), 20))), Outcome::Inserted);
    assert_eq!(store.apply(Event::ReceiveReaction(post(1, 3, Some(1), 21))), Outcome::Inserted);
    assert!(store.message(&message_id(1)).is_none());

    assert_eq!(store.apply(Event::ReceiveMessage(post(1, 1, None, 10))), Outcome::Inserted);

    let kinds: Vec<MessageKind> = store.responses(&message_id(1)).iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageKind::Reply, MessageKind::Reaction]);

    let order: Vec<MessageId> = store.messages(&channel_id(1)).iter().map(|m| m.message_id).collect();
    assert_eq!(order, vec![message_id(1), message_id(2), message_id(3)]);
}

#[test]
fn test_sent_status_lifecycle() {
    let store = Store::new();
    let sent = Event::MessageSent(post(1, 9, None, 0));

    assert_eq!(store.apply(sent.clone()), Outcome::Inserted);
    assert_eq!(store.message(&message_id(9)).unwrap().status, SentStatus::Sent);

    let delivered = Event::UpdateSentStatus { message_id: message_id(9), status: SentStatus::Delivered };
    assert_eq!(store.apply(delivered.clone()), Outcome::Updated);
    assert_eq!(store.apply(delivered), Outcome::Unchanged);

    // A replayed sent event does not roll the status back.
    assert_eq!(store.apply(sent), Outcome::Unchanged);
    assert_eq!(store.message(&message_id(9)).unwrap().status, SentStatus::Delivered);
}

#[test]
fn test_status_update_before_its_message_is_held() {
    let store = Store::new();
    let update = Event::UpdateSentStatus { message_id: message_id(1), status: SentStatus::Delivered };
    assert_eq!(store.apply(update.clone()), Outcome::Deferred);
    assert_eq!(store.message_count(), 0);
    assert_eq!(store.pending_status_count(), 1);

    assert_eq!(store.apply(Event::MessageSent(post(1, 1, None, 0))), Outcome::Inserted);
    assert_eq!(store.message(&message_id(1)).unwrap().status, SentStatus::Delivered);
    assert_eq!(store.pending_status_count(), 0);

    // Late duplicates of either event settle on the same state.
    assert_eq!(store.apply(update), Outcome::Unchanged);
    assert_eq!(store.apply(Event::MessageSent(post(1, 1, None, 0))), Outcome::Unchanged);
    assert_eq!(store.message(&message_id(1)).unwrap().status, SentStatus::Delivered);
}

#[test]
fn test_status_order_does_not_matter() {
    let in_order = Store::new();
    let reordered = Store::new();
    let sent = Event::ReplySent(post(2, 5, Some(4), 3));
    let failed = Event::UpdateSentStatus { message_id: message_id(5), status: SentStatus::Failed };

    in_order.apply(sent.clone());
    in_order.apply(failed.clone());
    reordered.apply(failed);
    reordered.apply(sent);

    assert_eq!(in_order.message(&message_id(5)), reordered.message(&message_id(5)));
    assert_eq!(reordered.message(&message_id(5)).unwrap().status, SentStatus::Failed);
}

#[test]
fn test_posts_after_leave_stay_dropped() {
    let store = Store::new();
    store.apply(Event::JoinChannel(channel(1)));
    assert_eq!(store.apply(Event::LeaveChannel(channel_id(1))), Outcome::Removed);
    assert!(store.has_left(&channel_id(1)));

    assert_eq!(store.apply(Event::ReceiveMessage(post(1, 1, None, 0))), Outcome::Ignored);
    assert_eq!(store.apply(Event::ReceiveReply(post(1, 2, Some(1), 1))), Outcome::Ignored);
    assert_eq!(store.apply(Event::JoinChannel(channel(1))), Outcome::Ignored);

    assert_eq!(store.message_count(), 0);
    assert!(store.channels().is_empty());
}

#[test]
fn test_leave_before_join_wins() {
    let store = Store::new();
    assert_eq!(store.apply(Event::LeaveChannel(channel_id(3))), Outcome::Ignored);
    assert_eq!(store.apply(Event::JoinChannel(channel(3))), Outcome::Ignored);
    assert_eq!(store.apply(Event::ReceiveMessage(post(3, 1, None, 0))), Outcome::Ignored);
    assert!(store.channel(&channel_id(3)).is_none());
}

#[test]
fn test_leave_removes_channel_and_its_messages() {
    let store = Store::new();
    store.apply(Event::JoinChannel(channel(1)));
    store.apply(Event::JoinChannel(channel(2)));
    store.apply(Event::ReceiveMessage(post(1, 1, None, 0)));
    store.apply(Event::ReceiveReply(post(1, 2, Some(1), 1)));
    store.apply(Event::ReceiveMessage(post(2, 3, None, 0)));

    assert_eq!(store.apply(Event::LeaveChannel(channel_id(1))), Outcome::Removed);
    assert!(store.channel(&channel_id(1)).is_none());
    assert!(store.messages(&channel_id(1)).is_empty());
    assert_eq!(store.message_count(), 1);
    assert_eq!(store.channels(), vec![channel(2)]);

    assert_eq!(store.apply(Event::LeaveChannel(channel_id(1))), Outcome::Ignored);
}

#[test]
fn test_rejoin_updates_channel() {
    let store = Store::new();
    assert_eq!(store.apply(Event::JoinChannel(channel(1))), Outcome::Inserted);
    assert_eq!(store.apply(Event::JoinChannel(channel(1))), Outcome::Unchanged);

    let mut renamed = channel(1);
    renamed.name = "renamed".into();
    assert_eq!(store.apply(Event::JoinChannel(renamed.clone())), Outcome::Updated);
    assert_eq!(store.channel(&channel_id(1)), Some(renamed));
}

#[test]
fn test_receive_drops_undecodable_payload() {
    let store = Store::new();
    assert_eq!(store.receive(EventTag::ReceiveMessage, b"\x21junk"), None);
    assert_eq!(store.message_count(), 0);

    let bytes = Event::ReceiveMessage(post(1, 1, None, 0)).encode().unwrap();
    assert_eq!(store.receive(EventTag::ReceiveMessage, &bytes), Some(Outcome::Inserted));
}
