//! In-process workers.
//!
//! [`LocalSpawner`] runs a worker body as a tokio task connected to the host
//! through a [`DuplexChannel`]. Terminating the worker aborts the task.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::AbortHandle;

use crate::channel::DuplexChannel;
use crate::spawn::Spawn;
use crate::spawn::WorkerOptions;
use crate::transport;
use crate::transport::Transport;
use crate::worker::WorkerEndpoint;

pub type WorkerBody = Arc<dyn Fn(WorkerEndpoint) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub struct LocalSpawner {
    body: WorkerBody,
}

impl LocalSpawner {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn(WorkerEndpoint) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self { body: Arc::new(move |endpoint| body(endpoint).boxed()) }
    }
}

impl Spawn for LocalSpawner {
    fn spawn(&self, options: &WorkerOptions) -> transport::Result<Box<dyn Transport>> {
        let (host, worker) = DuplexChannel::pair();
        let endpoint = WorkerEndpoint::new(options.clone(), Box::new(worker));
        let task = tokio::spawn((self.body)(endpoint));
        Ok(Box::new(LocalWorker { channel: host, task: task.abort_handle() }))
    }
}

/// The host end of a local worker.
struct LocalWorker {
    channel: DuplexChannel,
    task: AbortHandle,
}

#[async_trait::async_trait]
impl Transport for LocalWorker {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if self.task.is_finished() {
            return Err(transport::Error::Terminated);
        }
        self.channel.send(payload).await
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        self.channel.recv().await
    }

    fn terminate(&self) {
        self.task.abort();
    }
}
