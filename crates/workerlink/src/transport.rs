//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between a host and a worker,
//! and the adapter that turns it into push-style delivery.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: A Transport knows nothing about envelopes, tags, or ids.
//!   It moves opaque buffers.
//! - **Push Delivery**: The [`Adapter`] pumps `recv` on its own task and pushes
//!   every frame or error into a sink. Nothing above it polls.
//! - **Non-Blocking Send**: `Adapter::send` queues the frame and returns. A
//!   single writer task drains the queue, so frames leave in FIFO order.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

/// Errors that occur at the channel layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the channel was dropped.
    ConnectionLost(String),
    /// One inbound frame could not be delivered or deserialized. The channel
    /// itself is still usable.
    Undeliverable(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
    /// The worker was terminated.
    Terminated,
}

impl Error {
    /// Whether the channel is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Undeliverable(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Undeliverable(msg) => write!(f, "Undeliverable frame: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::Terminated => write!(f, "Worker terminated"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional byte channel to one peer.
///
/// This trait is designed to be object-safe (`Box<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one frame.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Receives the next frame.
    ///
    /// # invariants
    /// - Returns `Ok(None)` once the peer has closed its side.
    /// - Returns `Err(Error::Undeliverable(_))` for a single bad frame; the
    ///   next call may succeed.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Stops the peer immediately, without giving it a chance to finish.
    fn terminate(&self) {}
}

/// What the adapter pushes to its sink.
#[derive(Debug)]
pub enum Delivery {
    Frame(Vec<u8>),
    Error(Error),
}

/// Receives every inbound delivery, on the adapter's pump task.
pub type Sink = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Owns one transport exclusively and runs its pump and writer tasks.
///
/// Must be created inside a tokio runtime.
pub struct Adapter {
    name: Arc<str>,
    transport: Arc<dyn Transport>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    failed: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Adapter {
    pub fn new(name: impl Into<Arc<str>>, transport: Box<dyn Transport>, sink: Sink) -> Self {
        let name = name.into();
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let failed = Arc::new(AtomicBool::new(false));
        let (outbound, queue) = mpsc::unbounded_channel();

        let pump = tokio::spawn(Self::pump(
            name.clone(),
            transport.clone(),
            failed.clone(),
            sink.clone(),
        ));
        let writer = tokio::spawn(Self::write(
            name.clone(),
            transport.clone(),
            failed.clone(),
            queue,
            sink,
        ));

        Self { name, transport, outbound, failed, pump, writer }
    }

    async fn pump(name: Arc<str>, transport: Arc<dyn Transport>, failed: Arc<AtomicBool>, sink: Sink) {
        loop {
            match transport.recv().await {
                Ok(Some(frame)) => sink(Delivery::Frame(frame)),
                Ok(None) => {
                    debug!(worker = %name, "worker closed the channel");
                    failed.store(true, Ordering::Release);
                    sink(Delivery::Error(Error::ConnectionLost("channel closed".into())));
                    return;
                }
                Err(e) if !e.is_fatal() => sink(Delivery::Error(e)),
                Err(e) => {
                    failed.store(true, Ordering::Release);
                    sink(Delivery::Error(e));
                    return;
                }
            }
        }
    }

    async fn write(
        name: Arc<str>,
        transport: Arc<dyn Transport>,
        failed: Arc<AtomicBool>,
        mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
        sink: Sink,
    ) {
        while let Some(frame) = queue.recv().await {
            match transport.send(&frame).await {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => {
                    warn!(worker = %name, error = %e, "dropping outbound frame");
                }
                Err(e) => {
                    error!(worker = %name, error = %e, "failed to post message to worker");
                    failed.store(true, Ordering::Release);
                    sink(Delivery::Error(e));
                    return;
                }
            }
        }
    }

    /// Queues a frame for the worker. Returning `Ok` does not mean the frame
    /// has arrived.
    pub fn send(&self, frame: Vec<u8>) -> Result<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(Error::ConnectionLost(format!("channel to {} has failed", self.name)));
        }
        self.outbound
            .send(frame)
            .map_err(|_| Error::ConnectionLost(format!("writer for {} has stopped", self.name)))
    }

    /// Whether the channel has failed; all sends fail from then on.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Stops the worker and both tasks. Queued frames are abandoned.
    pub fn terminate(&self) {
        self.failed.store(true, Ordering::Release);
        self.transport.terminate();
        self.pump.abort();
        self.writer.abort();
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.pump.abort();
        self.writer.abort();
    }
}
