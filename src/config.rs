//! Process-wide tunables for the engine.
//!
//! The engine takes no configuration from the environment or disk; the only
//! configuration surface is this struct, supplied programmatically by the
//! embedding host before the first handler is created.

/// Tunables governing internal queue capacities and buffering limits.
///
/// Defaults are conservative enough that most embeddings never need to
/// touch this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Per-transaction bound on queued, un-polled commands.
    pub command_queue_capacity: usize,
    /// Per-transaction bound on queued, undelivered body chunks.
    pub body_channel_capacity: usize,
    /// Soft cap on bytes buffered by an aggregate (non-streaming) body read.
    pub max_buffered_body_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 32,
            body_channel_capacity: 8,
            max_buffered_body_bytes: 8 * 1024 * 1024,
        }
    }
}
