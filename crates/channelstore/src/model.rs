//! Wiring between a [`Store`] and a worker connection.
//!
//! The host attaches an [`EventModel`] to a ready connection, which registers
//! one persistent handler per [`EventTag`] at `INIT_ID`. The worker side calls
//! [`emit`] to send events.

use std::sync::Arc;

use tracing::debug;
use workerlink::Connection;
use workerlink::INIT_ID;
use workerlink::Lifecycle;
use workerlink::Slot;
use workerlink::handler_fn;
use workerlink::worker::WorkerSender;

use crate::error::Result;
use crate::event::Event;
use crate::event::EventTag;
use crate::store::Store;

#[derive(Clone, Default)]
pub struct EventModel {
    store: Arc<Store>,
}

impl EventModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Subscribes the store to every event tag on `conn`. Attaching twice
    /// replaces the earlier handlers.
    pub fn attach(&self, conn: &Connection) -> Result<()> {
        for tag in EventTag::ALL {
            let store = self.store.clone();
            let handler = handler_fn(move |payload| {
                store.receive(tag, &payload);
                async {}
            });
            conn.register_handler(tag, Slot::Id(INIT_ID), Lifecycle::Persistent, handler)?;
        }
        debug!(worker = %conn.name(), "event model attached");
        Ok(())
    }
}

/// Sends `event` from a worker to its host.
pub async fn emit(sender: &WorkerSender, event: &Event) -> Result<()> {
    let payload = event.encode()?;
    sender.emit(event.tag().as_str(), &payload).await?;
    Ok(())
}
