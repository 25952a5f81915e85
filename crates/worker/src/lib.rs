//! Per-job bridge between an invocation runtime and a local ComfyUI
//! server.

pub mod config;
pub mod error;
pub mod materialize;
pub mod orchestrator;
pub mod poller;
pub mod resolver;
pub mod runtime;
pub mod storage;
