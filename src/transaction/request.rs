//! The request-side transaction state machine.
//!
//! ```text
//!          CreateRequest          BeginRequest        Poll/handler actions
//!  (none) ─────────────▶ READY ─────────────▶ RUNNING ──────────────▶ DONE
//! ```
//!
//! `CreateRequest` and `BeginRequest` never suspend; the handler task spawned
//! by `BeginRequest` is the only thing that ever waits on anything.

use std::{
    any::Any,
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

use super::{drain_and_release, new_channel_pair, poll_channel, BodyChunk, TaskChannels};
use crate::{
    chunk::ChunkRegistry,
    command::Command,
    config::EngineConfig,
    handler::{FilterFactory, RequestFilter},
    headers::RequestHeaders,
};

/// Handler-facing view of a request transaction.
///
/// Passed by value into [`RequestFilter::run`]; every operation either
/// schedules a command for the host to observe via `PollRequest`, or
/// suspends awaiting a body chunk delivered via `SendRequestBodyChunk`.
pub struct RequestCtx {
    headers: RequestHeaders,
    chunks: Arc<ChunkRegistry>,
    channels: TaskChannels,
    max_buffered_body_bytes: usize,
}

impl RequestCtx {
    /// A read-only snapshot of the parsed request headers.
    #[must_use]
    pub const fn headers(&self) -> &RequestHeaders { &self.headers }

    /// The soft cap a filter accumulating a body in memory (rather than
    /// streaming it chunk-for-chunk) should honour before it stops growing
    /// its buffer. Advisory only: the engine does not enforce it.
    #[must_use]
    pub const fn max_buffered_body_bytes(&self) -> usize { self.max_buffered_body_bytes }

    /// Schedule a `WHDR` replacing the request headers.
    pub async fn rewrite_headers(&mut self, headers: &RequestHeaders) -> bool {
        self.channels.emit(Command::Whdr(headers.serialize())).await
    }

    /// Suspend until the host delivers the next body chunk, requesting the
    /// stream to start (`RBOD`) on the first call.
    pub async fn read_body_chunk(&mut self) -> (Bytes, bool) { self.channels.read_body_chunk().await }

    /// Replace the whole request body with `bytes`, schedule a single
    /// `WBOD`.
    pub async fn write_body(&mut self, bytes: impl Into<Bytes>) -> bool {
        let id = self.chunks.intern(bytes);
        self.channels.emit(Command::Wbod(id)).await
    }

    /// Write one output chunk (`WBOD`). Unlike `RBOD`, a `WBOD` is emitted
    /// for every call, so a filter that wants true chunk-for-chunk streaming
    /// output can call this repeatedly; `last` is informational bookkeeping
    /// for the caller, the wire protocol carries no end-of-body marker on
    /// `WBOD`.
    pub async fn write_body_chunk(&mut self, bytes: impl Into<Bytes>, _last: bool) -> bool {
        self.write_body(bytes).await
    }

    /// Emit a synthetic response (`SWCH`), short-circuiting origin contact.
    pub async fn respond(&mut self, status: u16, body: impl Into<Bytes>) -> bool {
        let id = self.chunks.intern(body);
        self.channels.emit(Command::Swch(id, status)).await
    }
}

struct RequestEntry {
    handler: Arc<dyn FilterFactory>,
    headers: Option<RequestHeaders>,
    cmd_rx: Arc<Mutex<mpsc::Receiver<Command>>>,
    cmd_tx: mpsc::Sender<Command>,
    body_tx: mpsc::Sender<BodyChunk>,
    task_channels: Option<TaskChannels>,
    task: Option<JoinHandle<()>>,
}

/// The request half of the transaction registry: `request_id -> entry`.
#[derive(Default)]
pub struct RequestRegistry {
    next_id: AtomicU32,
    entries: Mutex<HashMap<u32, RequestEntry>>,
}

impl RequestRegistry {
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

    /// Allocate an ID and pin `handler`'s factory reference. Never suspends.
    pub fn create(&self, handler: Arc<dyn FilterFactory>, config: &EngineConfig) -> u32 {
        let id = self.allocate_id();
        let (host, task_channels) = new_channel_pair(config);
        let entry = RequestEntry {
            handler,
            headers: None,
            cmd_rx: host.cmd_rx,
            cmd_tx: task_channels.cmd_tx.clone(),
            body_tx: host.body_tx,
            task_channels: Some(task_channels),
            task: None,
        };
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        self.entries.lock().unwrap().insert(id, entry);
        info!(request_id = id, "request transaction created");
        id
    }

    /// Parse the header block and start the handler task. Never blocks.
    pub fn begin(
        &self,
        id: u32,
        header_block: &str,
        chunks: Arc<ChunkRegistry>,
        config: &EngineConfig,
        rt: &tokio::runtime::Handle,
    ) {
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&id) else {
            warn!(request_id = id, "BeginRequest on unknown id");
            return;
        };

        let headers = match RequestHeaders::parse(header_block) {
            Ok(headers) => headers,
            Err(err) => {
                warn!(request_id = id, error = %err, "malformed request header block");
                let _ = entry.cmd_tx.try_send(Command::Done);
                return;
            }
        };

        entry.headers = Some(headers.clone());
        let Some(channels) = entry.task_channels.take() else {
            warn!(request_id = id, "BeginRequest called twice for the same id");
            return;
        };
        // Caught here, not just in `drive_request`: a panic unwinding past this
        // point would poison `self.entries`, wedging every other transaction in
        // the registry rather than just this one.
        let filter = match catch_unwind(AssertUnwindSafe(|| entry.handler.new_request_filter())) {
            Ok(filter) => filter,
            Err(payload) => {
                error!(request_id = id, panic = %panic_message(&payload), "request filter factory panicked");
                let _ = entry.cmd_tx.try_send(Command::Done);
                return;
            }
        };
        let ctx = RequestCtx { headers, chunks, channels, max_buffered_body_bytes: config.max_buffered_body_bytes };
        let done_tx = entry.cmd_tx.clone();
        entry.task = Some(rt.spawn(drive_request(filter, ctx, done_tx)));
    }

    /// `PollRequest`: return the next command, per `block` semantics.
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
            None => warn!(request_id = id, "SendRequestBodyChunk on unknown id"),
        }
    }

    /// The headers recorded at `BeginRequest`, if the transaction is still
    /// live. Used by the response path to pair a response with its
    /// originating request.
    #[must_use]
    pub fn headers_of(&self, id: u32) -> Option<RequestHeaders> {
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        self.entries.lock().unwrap().get(&id).and_then(|e| e.headers.clone())
    }

    /// Terminate the transaction: abort the handler task if it is still
    /// running, drop the body sender (unblocking a suspended read with
    /// end-of-body), release any queued chunks, and remove the entry.
    ///
    /// `rt` is used to wait for the aborted task to actually stop before
    /// draining queued commands: aborting alone only schedules cancellation
    /// at the task's next suspension point, so a drain performed before
    /// that point can miss a `WBOD`/`SWCH` the task sends in the window
    /// between the drain and the abort taking effect, leaking its chunk.
    /// The registry-wide lock is released before this wait so a freed
    /// transaction's handler cannot stall unrelated transactions.
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
            info!(request_id = id, "request transaction freed");
        }
    }
}

/// Runs `filter` to completion and always emits `DONE` afterwards, even if
/// the filter panics.
///
/// `filter.run` is awaited in-line, wrapped in `FutureExt::catch_unwind`,
/// rather than driven via a second nested `tokio::spawn`: this keeps the
/// whole filter execution inside the single task recorded as `entry.task`,
/// so `free()`'s `task.abort()` actually force-stops the filter instead of
/// only cancelling an outer wrapper around an inner task it has no handle
/// to. A panic is still caught here and still reaches the `done_tx.send`
/// below rather than unwinding past it and leaving the transaction's
/// command channel open with no message ever coming.
async fn drive_request(filter: Box<dyn RequestFilter>, ctx: RequestCtx, done_tx: mpsc::Sender<Command>) {
    if let Err(payload) = AssertUnwindSafe(filter.run(ctx)).catch_unwind().await {
        error!(panic = %panic_message(&payload), "request filter task panicked");
    }
    let _ = done_tx.send(Command::Done).await;
}

/// Best-effort human-readable text for a caught panic payload.
pub(super) fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::handler::{FilterCapabilities, FilterFactory, ResponseFilter};
    use crate::transaction::ResponseCtx;

    struct RecordingFactory {
        observed: Arc<Mutex<Option<usize>>>,
    }

    struct RecordingRequestFilter {
        observed: Arc<Mutex<Option<usize>>>,
    }

    #[async_trait]
    impl RequestFilter for RecordingRequestFilter {
        async fn run(self: Box<Self>, ctx: RequestCtx) {
            *self.observed.lock().expect("not poisoned") = Some(ctx.max_buffered_body_bytes());
        }
    }

    struct NoopResponseFilter;

    #[async_trait]
    impl ResponseFilter for NoopResponseFilter {
        async fn run(self: Box<Self>, _ctx: ResponseCtx) {}
    }

    impl FilterFactory for RecordingFactory {
        fn capabilities(&self) -> FilterCapabilities { FilterCapabilities::empty() }

        fn new_request_filter(&self) -> Box<dyn RequestFilter> {
            Box::new(RecordingRequestFilter { observed: Arc::clone(&self.observed) })
        }

        fn new_response_filter(&self) -> Box<dyn ResponseFilter> { Box::new(NoopResponseFilter) }
    }

    #[test]
    fn begin_threads_the_configured_buffering_cap_into_the_filter() {
        // A dedicated runtime, distinct from the test's own thread: `poll`
        // blocks the calling (non-runtime) thread exactly as a real host
        // would, matching how `engine.rs` drives the shared global runtime.
        #[expect(clippy::expect_used, reason = "test setup")]
        let rt = tokio::runtime::Runtime::new().expect("build runtime");

        let observed = Arc::new(Mutex::new(None));
        let factory: Arc<dyn FilterFactory> = Arc::new(RecordingFactory { observed: Arc::clone(&observed) });
        let config = EngineConfig { max_buffered_body_bytes: 4096, ..EngineConfig::default() };
        let chunks = Arc::new(ChunkRegistry::new());
        let registry = RequestRegistry::new();

        let id = registry.create(factory, &config);
        registry.begin(id, "GET /pass HTTP/1.1\r\nHost: x\r\n\r\n", Arc::clone(&chunks), &config, rt.handle());

        assert_eq!(registry.poll(id, true), Command::Done);
        assert_eq!(*observed.lock().expect("not poisoned"), Some(4096));
        registry.free(id, &chunks, rt.handle());
    }
}
