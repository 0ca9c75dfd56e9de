//! Error types for the filter engine.
//!
//! Errors here are internal: the public ABI in [`crate::ffi`] always
//! collapses them to the sentinel the spec mandates (a null pointer, a zero
//! handle, or a plain `DONE`) rather than letting a `Result` cross the
//! boundary.

use thiserror::Error;

/// Errors produced while parsing or validating a header block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// The header block had no start-line (requests only).
    #[error("missing start line")]
    MissingStartLine,
    /// The start-line did not have the `METHOD URI VERSION` shape.
    #[error("malformed start line")]
    MalformedStartLine,
    /// A field line had no `:` separator.
    #[error("malformed field line: {0:?}")]
    MalformedField(String),
}

/// Errors surfaced by [`crate::engine::create_handler`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The URN supplied to `CreateHandler` is not recognized.
    #[error("unrecognized handler URN: {0}")]
    UnknownUrn(String),
}
