//! # Handler Registry
//!
//! Maps `(tag, id)` to a handler, and allocates ids per tag.
//!
//! ## Invariants
//! - Both tables sit behind one mutex, held only for the map operation.
//!   Handlers are always invoked after the guard is released, so a handler may
//!   re-enter the registry.
//! - `next_id[tag]` only increases. An id is never reissued for its tag, even
//!   after its handler has been removed.
//! - One-shot entries are removed in the same critical section that hands
//!   them out, so they fire at most once.
//! - A tag's table outlives its last entry, like its id counter: a stale reply
//!   to a known tag is `IdNotFound`, while `HandlerNotFound` means the tag was
//!   never registered on this connection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::envelope::CorrelationId;
use crate::envelope::INIT_ID;
use crate::envelope::Tag;
use crate::error::Error;
use crate::error::Result;

/// Handles the payload of one inbound envelope.
pub type HandlerFn = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`HandlerFn`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| f(payload).boxed())
}

/// Whether an entry survives its first invocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Removed when handed out for its first invocation. Used for replies.
    OneShot,
    /// Stays registered. Used for event streams.
    Persistent,
}

/// Where to register a handler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Allocate the next unused id for the tag.
    Auto,
    /// Use this id, silently replacing any existing entry.
    Id(CorrelationId),
}

struct Entry {
    handler: HandlerFn,
    lifecycle: Lifecycle,
}

#[derive(Default)]
struct Tables {
    handlers: HashMap<Tag, HashMap<CorrelationId, Entry>>,
    next_ids: HashMap<Tag, CorrelationId>,
}

/// The handler table for one connection. Never shared across connections.
pub struct Registry {
    name: Arc<str>,
    tables: Mutex<Tables>,
}

impl Registry {
    /// Creates an empty registry. `name` is used only for logging.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            tables: Mutex::new(Tables::default()),
        }
    }

    /// The worker name this registry logs under.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panicking handler never runs under this lock, so the tables are
        // consistent even if a previous holder panicked.
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `handler` and returns the id it was registered at.
    pub fn register(
        &self,
        tag: impl Into<Tag>,
        slot: Slot,
        lifecycle: Lifecycle,
        handler: HandlerFn,
    ) -> CorrelationId {
        let tag = tag.into();
        let mut tables = self.tables();

        let id = match slot {
            Slot::Id(id) => id,
            Slot::Auto => {
                let next = tables.next_ids.entry(tag.clone()).or_insert(INIT_ID);
                let id = *next;
                *next += 1;
                id
            }
        };

        debug!(
            worker = %self.name, %tag, id, auto = matches!(slot, Slot::Auto), ?lifecycle,
            "registering handler"
        );

        tables
            .handlers
            .entry(tag)
            .or_default()
            .insert(id, Entry { handler, lifecycle });
        id
    }

    /// Looks up the handler for `(tag, id)`, removing it first if it is one-shot.
    ///
    /// Returns `HandlerNotFound` if nothing was ever registered for the tag and
    /// `IdNotFound` if the tag is known but nothing is registered at the id.
    pub fn take(&self, tag: &str, id: CorrelationId) -> Result<HandlerFn> {
        let mut tables = self.tables();

        let Some(handlers) = tables.handlers.get_mut(tag) else {
            return Err(Error::HandlerNotFound { tag: Tag::from(tag) });
        };

        let lifecycle = handlers.get(&id).map(|entry| entry.lifecycle);
        let handler = match lifecycle {
            Some(Lifecycle::Persistent) => handlers.get(&id).map(|entry| entry.handler.clone()),
            Some(Lifecycle::OneShot) => handlers.remove(&id).map(|entry| entry.handler),
            None => None,
        }
        .ok_or_else(|| Error::IdNotFound { tag: Tag::from(tag), id })?;
        Ok(handler)
    }

    /// Drops the entry at `(tag, id)` if present. Not exposed to callers:
    /// only the lifecycle controller discards entries this way.
    pub(crate) fn remove(&self, tag: &str, id: CorrelationId) -> bool {
        let mut tables = self.tables();
        tables
            .handlers
            .get_mut(tag)
            .is_some_and(|handlers| handlers.remove(&id).is_some())
    }

    /// Number of registered entries across all tags.
    pub fn len(&self) -> usize {
        self.tables().handlers.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
