//! Ties the registries together behind a single process-wide instance.
//!
//! The embedding host never sees this type directly; it calls the free
//! functions below (mirrored 1:1 by [`crate::ffi`]), which all operate on
//! the lazily-initialized global [`Engine`].

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tracing::error;

use crate::{
    chunk::ChunkRegistry,
    command::Command,
    config::EngineConfig,
    handler::HandlerRegistry,
    transaction::{RequestRegistry, ResponseRegistry},
};

static CONFIG: OnceLock<EngineConfig> = OnceLock::new();
static ENGINE: OnceLock<Engine> = OnceLock::new();

/// Supply a non-default [`EngineConfig`] before the engine is first used.
///
/// Returns `false` if the engine was already initialized (by a prior call
/// to any `Engine`-using function, including this one), in which case the
/// requested config was not applied and the engine keeps running with
/// whatever it already started with.
pub fn configure(config: EngineConfig) -> bool {
    CONFIG.set(config).is_ok()
}

struct Engine {
    config: EngineConfig,
    runtime: tokio::runtime::Runtime,
    handlers: HandlerRegistry,
    chunks: Arc<ChunkRegistry>,
    requests: RequestRegistry,
    responses: ResponseRegistry,
}

impl Engine {
    fn new(config: EngineConfig) -> Self {
        #[expect(clippy::expect_used, reason = "a multi-threaded runtime is required for this process to function at all")]
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()
            .expect("failed to start tokio runtime");
        Self {
            config,
            runtime,
            handlers: HandlerRegistry::new(),
            chunks: Arc::new(ChunkRegistry::new()),
            requests: RequestRegistry::new(),
            responses: ResponseRegistry::new(),
        }
    }
}

fn engine() -> &'static Engine {
    ENGINE.get_or_init(|| Engine::new(CONFIG.get().copied().unwrap_or_default()))
}

/// `CreateHandler(name, urn)`. Returns `Err` with a human-readable message
/// if `urn` is unrecognized.
///
/// # Errors
/// See [`crate::error::HandlerError`].
pub fn create_handler(name: &str, urn: &str) -> Result<(), String> {
    engine().handlers.create(name, urn).map_err(|err| err.to_string())
}

/// `DestroyHandler(name)`.
pub fn destroy_handler(name: &str) { engine().handlers.destroy(name); }

/// `CreateRequest(handler_name) -> id`. Returns 0 if `handler_name` is not
/// registered.
#[must_use]
pub fn create_request(handler_name: &str) -> u32 {
    let eng = engine();
    match eng.handlers.get(handler_name) {
        Some(factory) => eng.requests.create(factory, &eng.config),
        None => 0,
    }
}

/// `BeginRequest(id, header_block)`.
pub fn begin_request(id: u32, header_block: &str) {
    let eng = engine();
    eng.requests.begin(id, header_block, Arc::clone(&eng.chunks), &eng.config, eng.runtime.handle());
}

/// `PollRequest(id, block) -> command`.
#[must_use]
pub fn poll_request(id: u32, block: bool) -> Command { engine().requests.poll(id, block) }

/// `SendRequestBodyChunk(id, last, bytes)`.
pub fn send_request_body_chunk(id: u32, last: bool, bytes: Bytes) {
    engine().requests.send_body_chunk(id, last, bytes);
}

/// `FreeRequest(id)`.
pub fn free_request(id: u32) {
    let eng = engine();
    eng.requests.free(id, &eng.chunks, eng.runtime.handle());
}

/// `CreateResponse(handler_name) -> rid`. Returns 0 if `handler_name` is not
/// registered.
#[must_use]
pub fn create_response(handler_name: &str) -> u32 {
    let eng = engine();
    match eng.handlers.get(handler_name) {
        Some(factory) => eng.responses.create(factory, &eng.config),
        None => 0,
    }
}

/// `BeginResponse(rid, request_id, status, header_block)`.
pub fn begin_response(rid: u32, request_id: u32, status: u16, header_block: &str) {
    let eng = engine();
    eng.responses.begin(
        rid,
        request_id,
        status,
        header_block,
        &eng.requests,
        Arc::clone(&eng.chunks),
        &eng.config,
        eng.runtime.handle(),
    );
}

/// `PollResponse(rid, block) -> command`.
#[must_use]
pub fn poll_response(rid: u32, block: bool) -> Command { engine().responses.poll(rid, block) }

/// `SendResponseBodyChunk(rid, last, bytes)`.
pub fn send_response_body_chunk(rid: u32, last: bool, bytes: Bytes) {
    engine().responses.send_body_chunk(rid, last, bytes);
}

/// `FreeResponse(rid)`.
pub fn free_response(rid: u32) {
    let eng = engine();
    eng.responses.free(rid, &eng.chunks, eng.runtime.handle());
}

/// `GetChunk(chunk_id) -> bytes`.
#[must_use]
pub fn get_chunk(chunk_id: u32) -> Option<Bytes> { engine().chunks.get_copy(chunk_id) }

/// `GetChunkLength(chunk_id) -> length`.
#[must_use]
pub fn get_chunk_length(chunk_id: u32) -> u32 { engine().chunks.get_length(chunk_id) }

/// `ReleaseChunk(chunk_id)`.
pub fn release_chunk(chunk_id: u32) { engine().chunks.release(chunk_id); }

/// Run `f`, catching any panic so it cannot unwind across the FFI boundary.
/// Logs the panic at `error` level and returns `None` in its place.
pub fn catch_panic<F, T>(f: F) -> Option<T>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(f) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            error!(panic = %message, "panic caught at FFI boundary");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_handler_yields_zero_id() {
        // Uses the shared global engine; only asserts on the failure path so
        // it does not depend on handler registration order with other tests.
        assert_eq!(create_request("definitely-not-registered"), 0);
        assert_eq!(create_response("definitely-not-registered"), 0);
    }

    #[test]
    fn unknown_chunk_returns_none() {
        assert_eq!(get_chunk(u32::MAX), None);
        assert_eq!(get_chunk_length(u32::MAX), 0);
    }

    #[test]
    fn catch_panic_contains_the_unwind() {
        let result = catch_panic(|| -> u32 { panic!("boom") });
        assert_eq!(result, None);
        let ok = catch_panic(|| 42_u32);
        assert_eq!(ok, Some(42));
    }
}
