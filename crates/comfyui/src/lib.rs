//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, typed execution-history parsing, and
//! the readiness probe used before a job is submitted to a local
//! ComfyUI server.

pub mod api;
pub mod history;
pub mod readiness;
