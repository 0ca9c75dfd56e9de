//! Owned byte buffers referenced by a 32-bit handle across the FFI boundary.
//!
//! A chunk registry is the language-neutral way to pass ownership of a byte
//! buffer across a C ABI: it avoids pointer-lifetime arguments and makes
//! leaks observable (a chunk ID that is never released is a bug, not a
//! dangling pointer). [`ChunkRegistry::get_copy`] always returns a fresh
//! copy so the host can free it on its own schedule.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU32, Ordering},
    sync::Mutex,
};

use bytes::Bytes;
use tracing::{trace, warn};

/// Registry of interned byte buffers keyed by non-zero `u32` handles.
#[derive(Default)]
pub struct ChunkRegistry {
    next_id: AtomicU32,
    buffers: Mutex<HashMap<u32, Bytes>>,
}

impl ChunkRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    fn allocate_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
            // Wrapped past zero, the reserved "no such chunk" sentinel; retry.
        }
    }

    /// Copy `bytes` into the registry and return a fresh, non-zero handle.
    #[must_use]
    pub fn intern(&self, bytes: impl Into<Bytes>) -> u32 {
        let id = self.allocate_id();
        let bytes = bytes.into();
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        self.buffers.lock().unwrap().insert(id, bytes);
        trace!(chunk_id = id, "interned chunk");
        id
    }

    /// Return a fresh copy of the bytes behind `chunk_id`, or `None` if the
    /// handle is unknown.
    #[must_use]
    pub fn get_copy(&self, chunk_id: u32) -> Option<Bytes> {
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        self.buffers.lock().unwrap().get(&chunk_id).cloned()
    }

    /// Return the length of the bytes behind `chunk_id`, or 0 if unknown.
    #[must_use]
    pub fn get_length(&self, chunk_id: u32) -> u32 {
        #[expect(clippy::cast_possible_truncation, reason = "chunks are capped well below u32::MAX")]
        self.get_copy(chunk_id).map_or(0, |b| b.len() as u32)
    }

    /// Drop the owned buffer behind `chunk_id`. Releasing an unknown or
    /// already-released handle is a no-op at the API surface, though a
    /// caller that does so is relying on undefined behaviour per the spec.
    pub fn release(&self, chunk_id: u32) {
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        let removed = self.buffers.lock().unwrap().remove(&chunk_id);
        if removed.is_none() {
            warn!(chunk_id, "release of unknown chunk id");
        }
    }

    /// Number of chunks still held. Used by tests to assert no leaks.
    #[must_use]
    pub fn live_count(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "poisoned only if a holder already panicked")]
        self.buffers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_assigns_nonzero_monotonic_ids() {
        let reg = ChunkRegistry::new();
        let a = reg.intern(Bytes::from_static(b"one"));
        let b = reg.intern(Bytes::from_static(b"two"));
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert!(b > a);
    }

    #[test]
    fn round_trip_copy_and_length() {
        let reg = ChunkRegistry::new();
        let id = reg.intern(Bytes::from_static(b"Hello! I am the server!"));
        assert_eq!(reg.get_length(id), 23);
        let copy = reg.get_copy(id).expect("chunk present");
        assert_eq!(&copy[..], b"Hello! I am the server!");
        reg.release(id);
        assert_eq!(reg.get_copy(id), None);
        assert_eq!(reg.get_length(id), 0);
    }

    #[test]
    fn unknown_chunk_is_nil() {
        let reg = ChunkRegistry::new();
        assert_eq!(reg.get_copy(999), None);
        assert_eq!(reg.get_length(999), 0);
    }
}
