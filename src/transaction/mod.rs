//! Per-transaction plumbing shared by the request and response paths.
//!
//! A transaction is a cooperative handler task rendezvousing with a
//! host-facing poll/send-chunk pair over two bounded channels: one carrying
//! commands out to the host, one carrying body chunks in from the host. See
//! [`request`] and [`response`] for the concrete state machines built on top
//! of this plumbing.

pub mod request;
pub mod response;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{chunk::ChunkRegistry, command::Command, config::EngineConfig};

pub use request::{RequestCtx, RequestRegistry};
pub use response::{ResponseCtx, ResponseRegistry};

/// A single body chunk delivered by the host via `SendRequestBodyChunk` or
/// `SendResponseBodyChunk`.
#[derive(Debug, Clone)]
pub struct BodyChunk {
    /// The chunk's payload. Empty is legal for a final `last` chunk.
    pub bytes: Bytes,
    /// Whether this is the final chunk of the body.
    pub last: bool,
}

/// The host-facing half of a transaction's channels: the sender used by
/// `Send*BodyChunk` and the receiver used by `Poll*`.
///
/// `cmd_rx` is `Arc`-wrapped so a registry can clone it out while holding
/// its own lock only briefly, then release that lock before the
/// potentially long blocking receive — see `RequestRegistry::poll` /
/// `ResponseRegistry::poll`.
pub(crate) struct HostChannels {
    pub(crate) body_tx: mpsc::Sender<BodyChunk>,
    pub(crate) cmd_rx: Arc<std::sync::Mutex<mpsc::Receiver<Command>>>,
}

/// The handler-task-facing half: plumbing threaded through [`RequestCtx`]
/// and [`ResponseCtx`].
pub(crate) struct TaskChannels {
    pub(crate) cmd_tx: mpsc::Sender<Command>,
    pub(crate) body_rx: mpsc::Receiver<BodyChunk>,
    pub(crate) requested_body: bool,
}

impl TaskChannels {
    /// Request the host start delivering body chunks, if not already
    /// requested, then await the next one.
    ///
    /// The engine emits `RBOD` at most once per transaction: it opens the
    /// gate for a stream of host-pushed chunks rather than demanding one
    /// chunk per call.
    pub(crate) async fn read_body_chunk(&mut self) -> (Bytes, bool) {
        if !self.requested_body {
            self.requested_body = true;
            if self.cmd_tx.send(Command::Rbod).await.is_err() {
                trace!("cmd channel closed before RBOD; treating as cancelled");
                return (Bytes::new(), true);
            }
        }
        match self.body_rx.recv().await {
            Some(chunk) => (chunk.bytes, chunk.last),
            None => (Bytes::new(), true),
        }
    }

    pub(crate) async fn emit(&self, cmd: Command) -> bool {
        self.cmd_tx.send(cmd).await.is_ok()
    }
}

/// Build a paired `(HostChannels, TaskChannels)` set sized per `config`.
pub(crate) fn new_channel_pair(config: &EngineConfig) -> (HostChannels, TaskChannels) {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_queue_capacity);
    let (body_tx, body_rx) = mpsc::channel(config.body_channel_capacity);
    (
        HostChannels { body_tx, cmd_rx: Arc::new(std::sync::Mutex::new(cmd_rx)) },
        TaskChannels { cmd_tx, body_rx, requested_body: false },
    )
}

/// Poll semantics shared by `PollRequest` and `PollResponse`.
///
/// `block == true` suspends the caller until a command is ready or the
/// channel has closed (task finished), in which case `DONE` is returned.
/// `block == false` returns `WAIT` immediately if nothing is ready.
pub(crate) fn poll_channel(rx: &std::sync::Mutex<mpsc::Receiver<Command>>, block: bool) -> Command {
    #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
    let mut rx = rx.lock().unwrap();
    if block {
        rx.blocking_recv().unwrap_or(Command::Done)
    } else {
        match rx.try_recv() {
            Ok(cmd) => cmd,
            Err(mpsc::error::TryRecvError::Empty) => Command::Wait,
            Err(mpsc::error::TryRecvError::Disconnected) => Command::Done,
        }
    }
}

/// Release any chunk IDs a still-queued `WBOD`/`SWCH` command references.
///
/// Called when a transaction is freed so that commands the host never
/// polled do not leak their chunks.
pub(crate) fn drain_and_release(rx: &std::sync::Mutex<mpsc::Receiver<Command>>, chunks: &Arc<ChunkRegistry>) {
    #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
    let mut rx = rx.lock().unwrap();
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            Command::Wbod(id) | Command::Swch(id, _) => chunks.release(id),
            Command::Done | Command::Wait | Command::Whdr(_) | Command::Rbod => {}
        }
    }
}
