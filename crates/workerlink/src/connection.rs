//! # Connection Lifecycle
//!
//! ```text
//! Created -> AwaitingReady -> Ready -> Terminated
//!                  |
//!                  +-> Failed   (no ready signal within the timeout)
//! ```
//!
//! `Connection::open` spawns the worker, registers a one-shot handler at
//! `(READY_TAG, INIT_ID)` before the channel's pump starts reading, and
//! suspends only the calling task until the ready envelope arrives or the
//! timeout elapses. Traffic flows only in `Ready`.
//! `terminate` stops the worker at once; unanswered reply handlers are never
//! invoked.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;

use crate::config::HandlerConfig;
use crate::dispatcher::Dispatcher;
use crate::envelope::CorrelationId;
use crate::envelope::INIT_ID;
use crate::envelope::READY_TAG;
use crate::envelope::Tag;
use crate::error::Error;
use crate::error::Result;
use crate::registry::HandlerFn;
use crate::registry::Lifecycle;
use crate::registry::Registry;
use crate::registry::Slot;
use crate::registry::handler_fn;
use crate::spawn::Spawn;
use crate::spawn::WorkerOptions;
use crate::transport::Transport;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Created = 0,
    AwaitingReady = 1,
    Ready = 2,
    Terminated = 3,
    Failed = 4,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::AwaitingReady,
            2 => Self::Ready,
            3 => Self::Terminated,
            _ => Self::Failed,
        }
    }
}

/// A ready connection to one worker. Owns the worker, its channel, and the
/// handler registry for that channel.
pub struct Connection {
    dispatcher: Dispatcher,
    state: AtomicU8,
    config: HandlerConfig,
    /// Fed by the readiness handler; taken by `await_ready`.
    ready: Mutex<Option<oneshot::Receiver<Vec<u8>>>>,
}

impl Connection {
    /// Spawns a worker and waits for it to signal that it is ready.
    ///
    /// Fails with `ConnectionTimeout` if no ready envelope arrives within
    /// `config.ready_timeout`; the worker is terminated in that case.
    pub async fn open(
        spawner: &dyn Spawn,
        options: WorkerOptions,
        config: HandlerConfig,
    ) -> Result<Self> {
        debug!(worker = %options, "spawning worker");
        let transport = spawner.spawn(&options)?;
        let conn = Self::attach(options.display_name(), transport, config);
        conn.await_ready().await?;
        Ok(conn)
    }

    /// Wraps the host end of an already started worker. The result is in
    /// `Created` until `await_ready` succeeds.
    ///
    /// The worker may signal readiness before this returns, so the readiness
    /// handler goes into the registry before the dispatcher starts its pump.
    pub(crate) fn attach(name: &str, transport: Box<dyn Transport>, config: HandlerConfig) -> Self {
        let registry = Registry::new(name);
        let (tx, rx) = oneshot::channel();
        registry.register(Tag::ready(), Slot::Id(INIT_ID), Lifecycle::OneShot, forward_once(tx));

        Self {
            dispatcher: Dispatcher::with_registry(registry, transport),
            state: AtomicU8::new(State::Created as u8),
            config,
            ready: Mutex::new(Some(rx)),
        }
    }

    pub(crate) async fn await_ready(&self) -> Result<()> {
        let rx = self.ready.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(rx) = rx else {
            return Err(Error::NotReady(self.state()));
        };
        self.set_state(State::AwaitingReady);

        let after = self.config.ready_timeout;
        match tokio::time::timeout(after, rx).await {
            Ok(Ok(_)) => {
                self.set_state(State::Ready);
                debug!(worker = %self.name(), "worker is ready");
                Ok(())
            }
            Ok(Err(_)) | Err(_) => {
                self.dispatcher.registry().remove(READY_TAG, INIT_ID);
                self.set_state(State::Failed);
                self.dispatcher.terminate();
                error!(worker = %self.name(), ?after, "timed out waiting for initial message from worker");
                Err(Error::ConnectionTimeout { worker: self.name().to_owned(), after })
            }
        }
    }

    pub fn name(&self) -> &str {
        self.dispatcher.name()
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            State::Ready => Ok(()),
            state => Err(Error::NotReady(state)),
        }
    }

    /// Whether the channel has failed; every later send fails.
    pub fn has_failed(&self) -> bool {
        self.dispatcher.has_failed()
    }

    /// Sends a message to the worker without waiting for anything.
    ///
    /// With a `reply` handler, the handler is registered one-shot at a fresh id
    /// for `tag` before the message is queued. The handler is invoked when the
    /// worker replies with the same tag and id; if it never does, the handler
    /// is simply never invoked. Returns the id carried by the message,
    /// `INIT_ID` when no reply is expected.
    pub fn send_message(
        &self,
        tag: impl Into<Tag>,
        payload: &[u8],
        reply: Option<HandlerFn>,
    ) -> Result<CorrelationId> {
        self.ensure_ready()?;
        self.dispatcher.send_message(tag.into(), payload, reply)
    }

    /// Registers a handler for messages the worker sends on its own, such as
    /// a persistent handler at `INIT_ID` for an event tag. An explicit id
    /// replaces whatever was registered there.
    pub fn register_handler(
        &self,
        tag: impl Into<Tag>,
        slot: Slot,
        lifecycle: Lifecycle,
        handler: HandlerFn,
    ) -> Result<CorrelationId> {
        self.ensure_ready()?;
        Ok(self.dispatcher.register_handler(tag.into(), slot, lifecycle, handler))
    }

    /// Sends a request and waits up to the configured response timeout.
    pub async fn request(&self, tag: impl Into<Tag>, payload: &[u8]) -> Result<Vec<u8>> {
        self.request_with_timeout(tag, payload, self.config.response_timeout).await
    }

    /// Sends a request and waits up to `after` for the reply.
    ///
    /// On timeout the reply handler is left registered; a late reply fires it
    /// and the result is discarded.
    pub async fn request_with_timeout(
        &self,
        tag: impl Into<Tag>,
        payload: &[u8],
        after: Duration,
    ) -> Result<Vec<u8>> {
        let tag = tag.into();
        let (tx, rx) = oneshot::channel();
        let id = self.send_message(tag.clone(), payload, Some(forward_once(tx)))?;

        match tokio::time::timeout(after, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::ReplyDropped { tag, id }),
            Err(_) => {
                debug!(worker = %self.name(), %tag, id, ?after, "timed out waiting for reply");
                Err(Error::ResponseTimeout { tag, id, after })
            }
        }
    }

    /// Stops the worker immediately. In-flight messages are abandoned and
    /// outstanding reply handlers are never invoked.
    pub fn terminate(&self) {
        debug!(worker = %self.name(), "terminating worker");
        self.set_state(State::Terminated);
        self.dispatcher.terminate();
    }

    #[cfg(test)]
    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// A handler that forwards the first payload it sees into `tx`.
fn forward_once(tx: oneshot::Sender<Vec<u8>>) -> HandlerFn {
    let tx = Mutex::new(Some(tx));
    handler_fn(move |payload| {
        let tx = tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        async move {
            if let Some(tx) = tx {
                let _ = tx.send(payload);
            }
        }
    })
}
