//! A worker streams channel events to a host store, shuffled and duplicated.

use std::sync::Arc;
use std::time::Duration;

use channelstore::Channel;
use channelstore::ChannelId;
use channelstore::Event;
use channelstore::EventModel;
use channelstore::MessageId;
use channelstore::Post;
use channelstore::SentStatus;
use channelstore::Store;
use channelstore::model::emit;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use workerlink::Connection;
use workerlink::HandlerConfig;
use workerlink::WorkerEndpoint;
use workerlink::WorkerOptions;
use workerlink::local::LocalSpawner;

const WAIT: Duration = Duration::from_secs(2);

fn random_post(rng: &mut StdRng, channel: ChannelId, parent: Option<MessageId>) -> Post {
    Post {
        channel_id: channel,
        message_id: MessageId(rng.r#gen()),
        parent_message_id: parent,
        sender_username: format!("user{}", rng.gen_range(0..10)),
        text: format!("hello {}", rng.r#gen::<u32>()),
        timestamp_ms: rng.gen_range(0..1_000_000),
        lease_ms: 60_000,
        round_id: rng.r#gen(),
    }
}

fn random_channel(rng: &mut StdRng) -> Channel {
    let mut id = [0u8; 33];
    rng.fill(&mut id[..]);
    Channel {
        id: ChannelId(id),
        name: format!("chan-{}", id[0]),
        description: String::new(),
    }
}

/// A history that touches every store rule: received threads, sent posts
/// with their status updates, and one channel that is left after use.
fn history(rng: &mut StdRng) -> Vec<Event> {
    let mut events = Vec::new();
    for _ in 0..3 {
        let channel = random_channel(rng);
        events.push(Event::JoinChannel(channel.clone()));

        for _ in 0..5 {
            let root = random_post(rng, channel.id, None);
            let parent = root.message_id;
            events.push(Event::ReceiveMessage(root));
            events.push(Event::ReceiveReply(random_post(rng, channel.id, Some(parent))));
            events.push(Event::ReceiveReaction(random_post(rng, channel.id, Some(parent))));
        }

        for n in 0..3 {
            let mine = random_post(rng, channel.id, None);
            let id = mine.message_id;
            let status = if n % 2 == 0 { SentStatus::Delivered } else { SentStatus::Failed };
            events.push(Event::MessageSent(mine));
            events.push(Event::UpdateSentStatus { message_id: id, status });
        }
    }

    let gone = random_channel(rng);
    events.push(Event::JoinChannel(gone.clone()));
    let root = random_post(rng, gone.id, None);
    let parent = root.message_id;
    events.push(Event::ReceiveMessage(root));
    events.push(Event::ReceiveReply(random_post(rng, gone.id, Some(parent))));
    events.push(Event::LeaveChannel(gone.id));
    events
}

/// A worker that replays whatever event list it is given on `replay`.
fn replaying_worker(events: Vec<Event>) -> LocalSpawner {
    let events = Arc::new(events);
    LocalSpawner::new(move |mut endpoint: WorkerEndpoint| {
        let events = events.clone();
        async move {
            let sender = endpoint.sender();
            endpoint.on("replay", move |_| {
                let sender = sender.clone();
                let events = events.clone();
                async move {
                    for event in events.iter() {
                        emit(&sender, event).await.ok()?;
                    }
                    Some(Vec::new())
                }
            });
            let _ = endpoint.sender().signal_ready().await;
            let _ = endpoint.run().await;
        }
    })
}

fn converged(store: &Store, expected: &Store) -> bool {
    store.message_count() == expected.message_count()
        && store.channels() == expected.channels()
        && expected.channels().iter().all(|c| store.messages(&c.id) == expected.messages(&c.id))
}

async fn settle(store: &Store, expected: &Store) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !converged(store, expected) {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shuffled_duplicated_stream_converges() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let canonical = history(&mut rng);

    let expected = Store::new();
    for event in canonical.iter().cloned() {
        expected.apply(event);
    }
    let left: Vec<ChannelId> = canonical
        .iter()
        .filter_map(|e| match e {
            Event::LeaveChannel(id) => Some(*id),
            _ => None,
        })
        .collect();

    // Every event twice, in a random order.
    let mut stream: Vec<Event> = canonical.iter().chain(canonical.iter()).cloned().collect();
    stream.shuffle(&mut rng);

    let conn = Connection::open(&replaying_worker(stream), WorkerOptions::named("replay"), HandlerConfig::default()).await?;
    let model = EventModel::new();
    model.attach(&conn)?;

    conn.request("replay", b"").await?;
    settle(model.store(), &expected).await;

    let store = model.store();
    assert_eq!(store.message_count(), expected.message_count());
    assert_eq!(store.channels(), expected.channels());
    for channel in expected.channels() {
        assert_eq!(store.messages(&channel.id), expected.messages(&channel.id));
    }
    for id in &left {
        assert!(store.has_left(id));
        assert!(store.messages(id).is_empty());
    }
    assert_eq!(store.pending_status_count(), 0);
    conn.terminate();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sent_then_status_update_over_connection() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let channel = ChannelId([3; 33]);
    let mine = random_post(&mut rng, channel, None);
    let id = mine.message_id;

    let stream = vec![
        Event::MessageSent(mine),
        Event::UpdateSentStatus { message_id: id, status: SentStatus::Delivered },
        Event::UpdateSentStatus { message_id: MessageId([0; 32]), status: SentStatus::Failed },
    ];

    let conn = Connection::open(&replaying_worker(stream), WorkerOptions::named("sent"), HandlerConfig::default()).await?;
    let model = EventModel::new();
    model.attach(&conn)?;

    conn.request("replay", b"").await?;

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if model.store().message(&id).is_some_and(|m| m.status == SentStatus::Delivered) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "status update did not arrive");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(model.store().message_count(), 1);
    Ok(())
}
