//! Handler registration: named, URN-configured filter factories.
//!
//! A handler is a `{name, urn, factory}` triple. `urn` selects which
//! compiled-in [`FilterFactory`] backs the handler; there is no dynamic
//! loading, so the set of recognized URNs is fixed at compile time.

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use bitflags::bitflags;
use tracing::info;

use crate::{
    error::HandlerError,
    testing::{UnitTestFactory, UNIT_TEST_URN},
    transaction::{RequestCtx, ResponseCtx},
};

bitflags! {
    /// Describes, for introspection only, which operations a filter may
    /// perform. The engine does not gate command emission on this set —
    /// that falls naturally out of which [`RequestCtx`]/[`ResponseCtx`]
    /// methods the filter actually calls — but a host or test harness can
    /// use it to decide whether a transaction is worth driving with a body
    /// stream at all.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FilterCapabilities: u8 {
        /// The filter may call `ReadBodyChunk`.
        const READS_BODY    = 0b0000_0001;
        /// The filter may call `WriteBody`/`WriteBodyChunk`.
        const WRITES_BODY   = 0b0000_0010;
        /// The filter may call `RewriteHeaders`.
        const REWRITES_HEADERS = 0b0000_0100;
        /// The filter may call `Respond` (request filters only).
        const RESPONDS      = 0b0000_1000;
    }
}

/// A per-transaction request-side filter.
#[async_trait]
pub trait RequestFilter: Send {
    /// Drive the transaction to completion. Returning ends the filter;
    /// the engine emits `DONE` once this future resolves.
    async fn run(self: Box<Self>, ctx: RequestCtx);
}

/// A per-transaction response-side filter.
#[async_trait]
pub trait ResponseFilter: Send {
    /// Drive the transaction to completion. Returning ends the filter;
    /// the engine emits `DONE` once this future resolves.
    async fn run(self: Box<Self>, ctx: ResponseCtx);
}

/// Produces request- and response-side filters for one handler.
pub trait FilterFactory: Send + Sync {
    /// Describes what the produced filters may do. Informational.
    fn capabilities(&self) -> FilterCapabilities;

    /// Instantiate a fresh request filter for a new request transaction.
    fn new_request_filter(&self) -> Box<dyn RequestFilter>;

    /// Instantiate a fresh response filter for a new response transaction.
    fn new_response_filter(&self) -> Box<dyn ResponseFilter>;
}

fn resolve_urn(urn: &str) -> Option<Arc<dyn FilterFactory>> {
    match urn {
        UNIT_TEST_URN => Some(Arc::new(UnitTestFactory) as Arc<dyn FilterFactory>),
        _ => None,
    }
}

/// Maps handler name to configured factory. Shared across all transactions;
/// a handler outlives every transaction created under it, and destroying a
/// handler only removes it from this map — in-flight transactions keep
/// their own `Arc` clone of the factory alive.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Arc<dyn FilterFactory>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self { handlers: Mutex::new(HashMap::new()) } }

    /// Register `name` against `urn`'s compiled-in factory.
    ///
    /// # Errors
    /// Returns [`HandlerError::UnknownUrn`] if `urn` is not recognized.
    pub fn create(&self, name: &str, urn: &str) -> Result<(), HandlerError> {
        let factory = resolve_urn(urn).ok_or_else(|| HandlerError::UnknownUrn(urn.to_owned()))?;
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        self.handlers.lock().unwrap().insert(name.to_owned(), factory);
        info!(handler = name, urn, "handler registered");
        Ok(())
    }

    /// Remove `name`'s registration. Transactions already created against it
    /// keep their own reference to the factory.
    pub fn destroy(&self, name: &str) {
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        let removed = self.handlers.lock().unwrap().remove(name);
        if removed.is_some() {
            info!(handler = name, "handler destroyed");
        }
    }

    /// Look up `name`'s factory, if still registered.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn FilterFactory>> {
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        self.handlers.lock().unwrap().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_urn_is_rejected() {
        let registry = HandlerRegistry::new();
        let err = registry.create("bad", "urn:weaver-proxy:always-bad").unwrap_err();
        assert_eq!(err, HandlerError::UnknownUrn("urn:weaver-proxy:always-bad".to_owned()));
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn known_urn_registers_and_can_be_destroyed() {
        let registry = HandlerRegistry::new();
        registry.create("h", UNIT_TEST_URN).expect("known urn");
        assert!(registry.get("h").is_some());
        registry.destroy("h");
        assert!(registry.get("h").is_none());
    }
}
