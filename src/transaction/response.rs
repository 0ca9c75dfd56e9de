//! The response-side transaction state machine.
//!
//! Mirrors [`super::request`] but is paired with the request that produced
//! it, so a response filter can see the originating request's headers (the
//! built-in test handler routes on the request path, for instance).

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use bytes::Bytes;
use futures_util::FutureExt as _;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

use super::{
    drain_and_release, new_channel_pair, poll_channel, request::panic_message, BodyChunk, RequestRegistry,
    TaskChannels,
};
use crate::{
    chunk::ChunkRegistry,
    command::Command,
    config::EngineConfig,
    handler::{FilterFactory, ResponseFilter},
    headers::{RequestHeaders, ResponseHeaders},
};

/// Handler-facing view of a response transaction.
pub struct ResponseCtx {
    status: u16,
    headers: ResponseHeaders,
    request_headers: Option<RequestHeaders>,
    chunks: Arc<ChunkRegistry>,
    channels: TaskChannels,
    max_buffered_body_bytes: usize,
}

impl ResponseCtx {
    /// The HTTP status code the origin (or a prior `SWCH`) produced.
    #[must_use]
    pub const fn status(&self) -> u16 { self.status }

    /// The soft cap a filter accumulating a body in memory (rather than
    /// streaming it chunk-for-chunk) should honour before it stops growing
    /// its buffer. Advisory only: the engine does not enforce it.
    #[must_use]
    pub const fn max_buffered_body_bytes(&self) -> usize { self.max_buffered_body_bytes }

    /// A read-only snapshot of the parsed response headers.
    #[must_use]
    pub const fn headers(&self) -> &ResponseHeaders { &self.headers }

    /// The originating request's headers, if that request is still live.
    #[must_use]
    pub const fn request_headers(&self) -> Option<&RequestHeaders> { self.request_headers.as_ref() }

    /// Schedule a `WHDR` replacing the response headers.
    pub async fn rewrite_headers(&mut self, headers: &ResponseHeaders) -> bool {
        self.channels.emit(Command::Whdr(headers.serialize())).await
    }

    /// Suspend until the host delivers the next body chunk, requesting the
    /// stream to start (`RBOD`) on the first call.
    pub async fn read_body_chunk(&mut self) -> (Bytes, bool) { self.channels.read_body_chunk().await }

    /// Replace the whole response body with `bytes`, schedule a single
    /// `WBOD`.
    pub async fn write_body(&mut self, bytes: impl Into<Bytes>) -> bool {
        let id = self.chunks.intern(bytes);
        self.channels.emit(Command::Wbod(id)).await
    }

    /// Write one output chunk (`WBOD`). See
    /// [`RequestCtx::write_body_chunk`](super::request::RequestCtx::write_body_chunk)
    /// for the `last` caveat.
    pub async fn write_body_chunk(&mut self, bytes: impl Into<Bytes>, _last: bool) -> bool {
        self.write_body(bytes).await
    }
}

struct ResponseEntry {
    handler: Arc<dyn FilterFactory>,
    request_id: Option<u32>,
    status: Option<u16>,
    headers: Option<ResponseHeaders>,
    cmd_rx: Arc<Mutex<mpsc::Receiver<Command>>>,
    cmd_tx: mpsc::Sender<Command>,
    body_tx: mpsc::Sender<BodyChunk>,
    task_channels: Option<TaskChannels>,
    task: Option<JoinHandle<()>>,
}

/// The response half of the transaction registry: `response_id -> entry`.
#[derive(Default)]
pub struct ResponseRegistry {
    next_id: AtomicU32,
    entries: Mutex<HashMap<u32, ResponseEntry>>,
}

impl ResponseRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self { next_id: AtomicU32::new(1), entries: Mutex::new(HashMap::new()) } }

    fn allocate_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Allocate an ID and pin `handler`'s factory reference. Never
    /// suspends. The paired request is not known until `BeginResponse`.
    pub fn create(&self, handler: Arc<dyn FilterFactory>, config: &EngineConfig) -> u32 {
        let id = self.allocate_id();
        let (host, task_channels) = new_channel_pair(config);
        let entry = ResponseEntry {
            handler,
            request_id: None,
            status: None,
            headers: None,
            cmd_rx: host.cmd_rx,
            cmd_tx: task_channels.cmd_tx.clone(),
            body_tx: host.body_tx,
            task_channels: Some(task_channels),
            task: None,
        };
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        self.entries.lock().unwrap().insert(id, entry);
        info!(response_id = id, "response transaction created");
        id
    }

    /// Parse the header block, pair with the originating request's headers,
    /// and start the handler task. Never blocks.
    pub fn begin(
        &self,
        id: u32,
        request_id: u32,
        status: u16,
        header_block: &str,
        requests: &RequestRegistry,
        chunks: Arc<ChunkRegistry>,
        config: &EngineConfig,
        rt: &tokio::runtime::Handle,
    ) {
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&id) else {
            warn!(response_id = id, "BeginResponse on unknown id");
            return;
        };

        let headers = match ResponseHeaders::parse(header_block) {
            Ok(headers) => headers,
            Err(err) => {
                warn!(response_id = id, error = %err, "malformed response header block");
                let _ = entry.cmd_tx.try_send(Command::Done);
                return;
            }
        };

        let request_headers = requests.headers_of(request_id);
        entry.request_id = Some(request_id);
        entry.status = Some(status);
        entry.headers = Some(headers.clone());
        let Some(channels) = entry.task_channels.take() else {
            warn!(response_id = id, "BeginResponse called twice for the same id");
            return;
        };
        // See `RequestRegistry::begin` for why this is caught here rather than
        // only around `filter.run` in `drive_response`.
        let filter = match catch_unwind(AssertUnwindSafe(|| entry.handler.new_response_filter())) {
            Ok(filter) => filter,
            Err(payload) => {
                error!(response_id = id, panic = %panic_message(&payload), "response filter factory panicked");
                let _ = entry.cmd_tx.try_send(Command::Done);
                return;
            }
        };
        let ctx = ResponseCtx {
            status,
            headers,
            request_headers,
            chunks,
            channels,
            max_buffered_body_bytes: config.max_buffered_body_bytes,
        };
        let done_tx = entry.cmd_tx.clone();
        entry.task = Some(rt.spawn(drive_response(filter, ctx, done_tx)));
    }

    /// `PollResponse`: return the next command, per `block` semantics.
    ///
    /// Only clones the `Arc`-wrapped command channel out of the registry
    /// while `entries` is locked; the registry-wide lock is released before
    /// the (potentially blocking) receive, so one transaction's slow poll
    /// cannot stall `Create`/`Begin`/`Poll`/`Send`/`Free` on every other
    /// transaction.
    #[must_use]
    pub fn poll(&self, id: u32, block: bool) -> Command {
        let cmd_rx = {
            #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
            let entries = self.entries.lock().unwrap();
            entries.get(&id).map(|entry| Arc::clone(&entry.cmd_rx))
        };
        match cmd_rx {
            Some(cmd_rx) => poll_channel(&cmd_rx, block),
            None => Command::Done,
        }
    }

    /// Deliver a body chunk to the running handler task.
    ///
    /// Clones the cheap `mpsc::Sender` out of the registry before the
    /// (potentially blocking, backpressuring) send, for the same reason
    /// `poll` releases its lock before receiving.
    pub fn send_body_chunk(&self, id: u32, last: bool, bytes: Bytes) {
        let body_tx = {
            #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
            let entries = self.entries.lock().unwrap();
            entries.get(&id).map(|entry| entry.body_tx.clone())
        };
        match body_tx {
            Some(body_tx) => {
                let _ = body_tx.blocking_send(BodyChunk { bytes, last });
            }
            None => warn!(response_id = id, "SendResponseBodyChunk on unknown id"),
        }
    }

    /// Terminate the transaction: abort the handler task if it is still
    /// running, drop the body sender, release any queued chunks, and remove
    /// the entry. See `RequestRegistry::free` for why `rt` is needed to wait
    /// out the abort before the final drain.
    pub fn free(&self, id: u32, chunks: &Arc<ChunkRegistry>, rt: &tokio::runtime::Handle) {
        let entry = {
            #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
            let mut entries = self.entries.lock().unwrap();
            entries.remove(&id)
        };
        if let Some(entry) = entry {
            if let Some(task) = entry.task {
                task.abort();
                rt.block_on(async { drop(task.await) });
            }
            drain_and_release(&entry.cmd_rx, chunks);
            drop(entry.body_tx);
            info!(response_id = id, "response transaction freed");
        }
    }
}

/// Runs `filter` to completion and always emits `DONE` afterwards, even if
/// the filter panics; see `drive_request` in the sibling `request` module
/// for why `catch_unwind` in-line, rather than a nested spawn, is needed.
async fn drive_response(filter: Box<dyn ResponseFilter>, ctx: ResponseCtx, done_tx: mpsc::Sender<Command>) {
    if let Err(payload) = AssertUnwindSafe(filter.run(ctx)).catch_unwind().await {
        error!(panic = %panic_message(&payload), "response filter task panicked");
    }
    let _ = done_tx.send(Command::Done).await;
}
