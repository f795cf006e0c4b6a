//! End-to-end tests against in-process workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use workerlink::Connection;
use workerlink::Error;
use workerlink::HandlerConfig;
use workerlink::INIT_ID;
use workerlink::Lifecycle;
use workerlink::Slot;
use workerlink::State;
use workerlink::WorkerEndpoint;
use workerlink::WorkerOptions;
use workerlink::handler_fn;
use workerlink::local::LocalSpawner;
use workerlink::spawn::Credentials;
use workerlink::spawn::WorkerType;

const WAIT: Duration = Duration::from_secs(2);

/// A worker with a few request handlers, ready as soon as it starts.
fn echo_worker() -> LocalSpawner {
    LocalSpawner::new(|mut endpoint: WorkerEndpoint| async move {
        let sender = endpoint.sender();
        let name = endpoint.options().display_name().to_owned();
        endpoint
            .on("echo", |payload| async move { Some(payload) })
            .on("delay", |payload| async move {
                let ms = payload.first().copied().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(u64::from(ms))).await;
                Some(payload)
            })
            .on("name", move |_| {
                let name = name.clone();
                async move { Some(name.into_bytes()) }
            })
            .on("subscribe", move |payload| {
                let sender = sender.clone();
                async move {
                    for i in payload {
                        sender.emit("tick", &[i]).await.ok()?;
                    }
                    Some(b"done".to_vec())
                }
            })
            .on("notify", |_| async move { None });

        endpoint.sender().signal_ready().await.expect("signal ready");
        endpoint.run().await.expect("worker channel failed");
    })
}

fn quick() -> HandlerConfig {
    HandlerConfig::new()
        .ready_timeout(Duration::from_millis(200))
        .response_timeout(WAIT)
}

#[tokio::test]
async fn test_open_and_request() -> anyhow::Result<()> {
    let _ = workerlink::logging::init();
    let conn = Connection::open(&echo_worker(), WorkerOptions::named("echo"), quick()).await?;

    assert_eq!(conn.state(), State::Ready);
    assert_eq!(conn.name(), "echo");
    assert_eq!(conn.request("echo", b"hello").await?, b"hello");
    assert_eq!(conn.request("echo", b"").await?, b"");
    Ok(())
}

#[tokio::test]
async fn test_worker_without_ready_signal_times_out() {
    let silent = LocalSpawner::new(|endpoint: WorkerEndpoint| async move {
        let _ = endpoint.run().await;
    });

    let err = Connection::open(&silent, WorkerOptions::named("silent"), quick())
        .await
        .err()
        .expect("open should fail");
    assert!(matches!(err, Error::ConnectionTimeout { ref worker, .. } if worker == "silent"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_immediate_ready_signal_on_multi_thread_runtime() -> anyhow::Result<()> {
    let eager = LocalSpawner::new(|endpoint: WorkerEndpoint| async move {
        let _ = endpoint.sender().signal_ready().await;
        let _ = endpoint.run().await;
    });

    for i in 0..100 {
        let conn = Connection::open(&eager, WorkerOptions::named(format!("eager-{}", i)), quick()).await?;
        assert_eq!(conn.state(), State::Ready);
        conn.terminate();
    }
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() -> anyhow::Result<()> {
    let conn = Arc::new(Connection::open(&echo_worker(), WorkerOptions::named("delay"), quick()).await?);

    // Longer delays go first, so replies come back in the opposite order.
    let delays = [60u8, 40, 20, 0];
    let calls = delays.iter().map(|&ms| {
        let conn = conn.clone();
        async move { conn.request("delay", &[ms, ms / 2]).await }
    });
    let replies = futures::future::join_all(calls).await;

    for (ms, reply) in delays.iter().zip(replies) {
        assert_eq!(reply?, vec![*ms, *ms / 2]);
    }
    Ok(())
}

#[tokio::test]
async fn test_event_subscription_receives_every_event() -> anyhow::Result<()> {
    let conn = Connection::open(&echo_worker(), WorkerOptions::default(), quick()).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.register_handler(
        "tick",
        Slot::Id(INIT_ID),
        Lifecycle::Persistent,
        handler_fn(move |payload| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(payload);
            }
        }),
    )?;

    assert_eq!(conn.request("subscribe", &[1, 2, 3]).await?, b"done");
    assert_eq!(conn.request("subscribe", &[4]).await?, b"done");

    let mut seen = Vec::new();
    while seen.len() < 4 {
        let payload = tokio::time::timeout(WAIT, rx.recv()).await?.expect("handler dropped");
        seen.push(payload[0]);
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn test_options_reach_the_worker() -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let spawner = LocalSpawner::new(move |endpoint: WorkerEndpoint| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(endpoint.options().clone());
            let _ = endpoint.sender().signal_ready().await;
            let _ = endpoint.run().await;
        }
    });

    let options = WorkerOptions::named("opts")
        .worker_type(WorkerType::Module)
        .credentials(Credentials::Include);
    let _conn = Connection::open(&spawner, options.clone(), quick()).await?;

    assert_eq!(rx.recv().await, Some(options));
    Ok(())
}

#[tokio::test]
async fn test_notification_without_reply() -> anyhow::Result<()> {
    let conn = Connection::open(&echo_worker(), WorkerOptions::named("n"), quick()).await?;

    assert_eq!(conn.send_message("notify", b"fire and forget", None)?, INIT_ID);
    let err = conn
        .request_with_timeout("notify", b"", Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ResponseTimeout { .. }));

    // The channel is still healthy.
    assert_eq!(conn.request("name", b"").await?, b"n");
    Ok(())
}

#[tokio::test]
async fn test_terminate_stops_worker() -> anyhow::Result<()> {
    let conn = Arc::new(Connection::open(&echo_worker(), WorkerOptions::named("t"), quick()).await?);

    let caller = conn.clone();
    let pending = tokio::spawn(async move { caller.request("delay", &[200]).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    conn.terminate();
    assert_eq!(conn.state(), State::Terminated);
    assert!(matches!(conn.request("echo", b"x").await, Err(Error::NotReady(State::Terminated))));

    // The in-flight request never gets its reply.
    let outcome = pending.await?;
    assert!(matches!(outcome, Err(Error::ResponseTimeout { .. })));
    Ok(())
}

#[tokio::test]
async fn test_worker_exit_fails_the_channel() -> anyhow::Result<()> {
    let short_lived = LocalSpawner::new(|endpoint: WorkerEndpoint| async move {
        let _ = endpoint.sender().signal_ready().await;
    });
    let conn = Connection::open(&short_lived, WorkerOptions::named("gone"), quick()).await?;

    let deadline = tokio::time::Instant::now() + WAIT;
    while !conn.has_failed() {
        assert!(tokio::time::Instant::now() < deadline, "worker exit not noticed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(conn.send_message("echo", b"", None).is_err());
    Ok(())
}
