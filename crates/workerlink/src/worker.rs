//! # Worker Endpoint
//!
//! The worker's half of the protocol. A worker registers request handlers by
//! tag, signals readiness once, then runs until the host closes the channel.
//! Every reply echoes the tag and id of the request it answers; events the
//! worker emits on its own go out at `INIT_ID`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;
use tracing::warn;

use crate::envelope;
use crate::envelope::CorrelationId;
use crate::envelope::INIT_ID;
use crate::envelope::READY_TAG;
use crate::envelope::Tag;
use crate::error::Result;
use crate::spawn::WorkerOptions;
use crate::transport;
use crate::transport::Transport;

/// Handles one request; `Some` is sent back as the reply.
pub type RequestFn = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Option<Vec<u8>>> + Send + Sync>;

/// Sends envelopes from the worker to the host. Cheap to clone.
#[derive(Clone)]
pub struct WorkerSender {
    name: Arc<str>,
    transport: Arc<dyn Transport>,
}

impl WorkerSender {
    pub async fn send(&self, tag: &str, id: CorrelationId, payload: &[u8]) -> Result<()> {
        debug!(worker = %self.name, tag, id, len = payload.len(), "worker sending message");
        let frame = envelope::encode(tag, id, payload)?;
        self.transport.send(&frame).await?;
        Ok(())
    }

    /// Tells the host the worker is initialized. Send exactly once.
    pub async fn signal_ready(&self) -> Result<()> {
        self.send(READY_TAG, INIT_ID, &[]).await
    }

    /// Sends an event that is not a reply to anything.
    pub async fn emit(&self, tag: &str, payload: &[u8]) -> Result<()> {
        self.send(tag, INIT_ID, payload).await
    }
}

pub struct WorkerEndpoint {
    options: WorkerOptions,
    sender: WorkerSender,
    handlers: HashMap<Tag, RequestFn>,
}

impl WorkerEndpoint {
    pub fn new(options: WorkerOptions, transport: Box<dyn Transport>) -> Self {
        let name: Arc<str> = Arc::from(options.display_name());
        Self {
            options,
            sender: WorkerSender { name, transport: Arc::from(transport) },
            handlers: HashMap::new(),
        }
    }

    /// The options this worker was spawned with.
    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn sender(&self) -> WorkerSender {
        self.sender.clone()
    }

    /// Registers the handler for requests tagged `tag`, replacing any previous one.
    pub fn on<F, Fut>(&mut self, tag: impl Into<Tag>, handler: F) -> &mut Self
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Vec<u8>>> + Send + 'static,
    {
        let handler: RequestFn = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.insert(tag.into(), handler);
        self
    }

    /// Serves requests until the host closes the channel.
    ///
    /// Each request runs on its own task. Malformed frames and unknown tags
    /// are logged and dropped. Returns `Err` only if the channel fails.
    pub async fn run(self) -> transport::Result<()> {
        loop {
            match self.sender.transport.recv().await {
                Ok(Some(frame)) => self.dispatch(&frame),
                Ok(None) => {
                    debug!(worker = %self.sender.name, "host closed the channel");
                    return Ok(());
                }
                Err(e) if !e.is_fatal() => {
                    warn!(worker = %self.sender.name, error = %e, "worker received undeliverable frame");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn dispatch(&self, frame: &[u8]) {
        let msg = match envelope::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(worker = %self.sender.name, error = %e, "worker dropping message");
                return;
            }
        };

        let Some(handler) = self.handlers.get(&msg.tag).cloned() else {
            warn!(worker = %self.sender.name, tag = %msg.tag, id = msg.id, "worker has no handler for tag");
            return;
        };

        let sender = self.sender.clone();
        tokio::spawn(async move {
            let Some(reply) = handler(msg.payload).await else {
                return;
            };
            if let Err(e) = sender.send(msg.tag.as_str(), msg.id, &reply).await {
                warn!(worker = %sender.name, tag = %msg.tag, id = msg.id, error = %e, "failed to send reply");
            }
        });
    }
}
