//! # Dispatcher
//!
//! Routes inbound envelopes to registered handlers and sends outbound ones.
//!
//! Inbound frames arrive on the adapter's pump task in channel order. Each
//! routed message runs on its own tokio task, so a slow handler never delays
//! the next delivery, and no order is implied across `(tag, id)` pairs.

use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::envelope;
use crate::envelope::CorrelationId;
use crate::envelope::INIT_ID;
use crate::envelope::Tag;
use crate::error::Result;
use crate::registry::HandlerFn;
use crate::registry::Lifecycle;
use crate::registry::Registry;
use crate::registry::Slot;
use crate::transport::Adapter;
use crate::transport::Delivery;
use crate::transport::Transport;

/// State the pump task needs; the adapter's sink holds it, not the dispatcher,
/// so there is no reference cycle through the adapter.
struct Router {
    name: Arc<str>,
    registry: Registry,
}

impl Router {
    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Frame(bytes) => {
                if let Err(e) = self.receive_message(&bytes) {
                    warn!(worker = %self.name, error = %e, "failed to receive message from worker");
                }
            }
            Delivery::Error(e) => {
                error!(worker = %self.name, error = %e, "received error from worker");
            }
        }
    }

    fn receive_message(&self, bytes: &[u8]) -> Result<()> {
        let msg = envelope::decode(bytes)?;
        debug!(
            worker = %self.name, tag = %msg.tag, id = msg.id, len = msg.payload.len(),
            "received message"
        );

        let handler = self.registry.take(msg.tag.as_str(), msg.id)?;
        tokio::spawn(handler(msg.payload));
        Ok(())
    }
}

pub(crate) struct Dispatcher {
    router: Arc<Router>,
    adapter: Adapter,
}

impl Dispatcher {
    /// Wires `transport` into a new adapter with an empty registry. Must be
    /// called inside a tokio runtime.
    #[cfg(test)]
    pub(crate) fn new(name: &str, transport: Box<dyn Transport>) -> Self {
        Self::with_registry(Registry::new(name), transport)
    }

    /// Wires `transport` into a new adapter that routes through `registry`.
    ///
    /// The pump starts reading as soon as the adapter exists, so handlers for
    /// frames the worker may already have sent must be in `registry` first.
    pub(crate) fn with_registry(registry: Registry, transport: Box<dyn Transport>) -> Self {
        let name: Arc<str> = Arc::from(registry.name());
        let router = Arc::new(Router { name: name.clone(), registry });

        let sink_router = router.clone();
        let adapter = Adapter::new(name, transport, Arc::new(move |d: Delivery| sink_router.deliver(d)));

        Self { router, adapter }
    }

    pub(crate) fn name(&self) -> &str {
        &self.router.name
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.router.registry
    }

    /// Sends `payload` under `tag`. With a reply handler, the handler is
    /// registered one-shot at a fresh id before the frame is queued, so the
    /// reply cannot outrun it. Returns the id the envelope carries.
    pub(crate) fn send_message(
        &self,
        tag: Tag,
        payload: &[u8],
        reply: Option<HandlerFn>,
    ) -> Result<CorrelationId> {
        let expects_reply = reply.is_some();
        let id = match reply {
            Some(handler) => self.registry().register(tag.clone(), Slot::Auto, Lifecycle::OneShot, handler),
            None => INIT_ID,
        };

        debug!(worker = %self.name(), %tag, id, len = payload.len(), "sending message");

        let sent = envelope::encode(tag.as_str(), id, payload)
            .and_then(|frame| Ok(self.adapter.send(frame)?));
        if sent.is_err() && expects_reply {
            // Nothing went out, so nothing can ever answer this id.
            self.registry().remove(tag.as_str(), id);
        }
        sent.map(|()| id)
    }

    pub(crate) fn register_handler(
        &self,
        tag: Tag,
        slot: Slot,
        lifecycle: Lifecycle,
        handler: HandlerFn,
    ) -> CorrelationId {
        self.registry().register(tag, slot, lifecycle, handler)
    }

    /// Feeds one inbound frame through routing, as the pump would.
    #[cfg(test)]
    pub(crate) fn receive_message(&self, bytes: &[u8]) -> Result<()> {
        self.router.receive_message(bytes)
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.adapter.has_failed()
    }

    pub(crate) fn terminate(&self) {
        self.adapter.terminate();
    }
}
