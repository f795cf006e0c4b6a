//! # Process Workers
//!
//! Runs a worker as a child process and talks to it over its stdin/stdout.
//!
//! ## Framing
//!
//! A byte stream has no message boundaries, so every frame is prefixed with its
//! length: `[Len: u32 LE][Body: Len]`. A length above the configured limit
//! cannot be skipped safely, so it fails the channel.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::ChildStdout;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::warn;

use crate::config::MAX_FRAME_LEN;
use crate::spawn::Spawn;
use crate::spawn::WorkerOptions;
use crate::transport;
use crate::transport::Transport;
use crate::worker::WorkerEndpoint;

/// Length-prefixed frames over any async byte stream pair.
pub struct FramedIo<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    max_frame_len: usize,
}

impl<R, W> FramedIo<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_max_frame_len(reader, writer, MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(reader: R, writer: W, max_frame_len: usize) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            max_frame_len,
        }
    }
}

#[async_trait::async_trait]
impl<R, W> Transport for FramedIo<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if payload.len() > self.max_frame_len {
            return Err(transport::Error::Undeliverable(format!(
                "frame of {} bytes exceeds limit of {}",
                payload.len(),
                self.max_frame_len
            )));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| transport::Error::Undeliverable("frame length exceeds u32".into()))?;

        // Hold the lock across the whole frame so concurrent senders never interleave.
        let mut writer = self.writer.lock().await;
        writer.write_all(&len.to_le_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;

        let mut header = [0u8; 4];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_frame_len {
            return Err(transport::Error::Io(format!(
                "inbound frame of {} bytes exceeds limit of {}",
                len, self.max_frame_len
            )));
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                transport::Error::ConnectionLost("stream ended mid-frame".into())
            }
            _ => e.into(),
        })?;
        Ok(Some(body))
    }
}

/// Spawns workers as child processes.
#[derive(Clone, Debug)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    max_frame_len: usize,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

impl Spawn for ProcessSpawner {
    fn spawn(&self, options: &WorkerOptions) -> transport::Result<Box<dyn Transport>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(options.to_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        debug!(worker = %options, program = ?self.program, pid = ?child.id(), "spawned worker process");

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(transport::Error::Io("worker process has no stdio pipes".into()));
        };

        Ok(Box::new(ProcessWorker {
            io: FramedIo::with_max_frame_len(stdout, stdin, self.max_frame_len),
            child: StdMutex::new(child),
        }))
    }
}

/// The host end of a worker process.
struct ProcessWorker {
    io: FramedIo<ChildStdout, ChildStdin>,
    child: StdMutex<Child>,
}

#[async_trait::async_trait]
impl Transport for ProcessWorker {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        self.io.send(payload).await
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        self.io.recv().await
    }

    fn terminate(&self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = child.start_kill() {
            warn!(pid = ?child.id(), error = %e, "failed to kill worker process");
        }
    }
}

/// The worker side of a process worker: an endpoint over this process's own
/// stdin/stdout, with the options the parent passed through the environment.
///
/// Anything else written to stdout corrupts the channel; log to stderr.
pub fn stdio_endpoint() -> WorkerEndpoint {
    let io = FramedIo::new(tokio::io::stdin(), tokio::io::stdout());
    WorkerEndpoint::new(WorkerOptions::from_env(), Box::new(io))
}
