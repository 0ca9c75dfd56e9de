//! An embeddable HTTP request/response filter runtime with a C-callable
//! boundary.
//!
//! A *handler*, configured by name against a compiled-in URN, produces a
//! *filter* object per transaction. Filters see request or response
//! headers and bodies as straight-line, cooperative async code
//! ([`transaction::RequestCtx`] / [`transaction::ResponseCtx`]); the
//! engine translates their actions into a small wire vocabulary
//! ([`command::Command`]) that a host drains by polling
//! ([`engine::poll_request`] / [`engine::poll_response`]).
//!
//! The [`ffi`] module exposes the same operations as `extern "C"`
//! functions for non-Rust hosts.

pub mod chunk;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod handler;
pub mod headers;
pub mod testing;
pub mod transaction;
