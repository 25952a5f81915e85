//! Domain types shared by the ComfyUI job bridge.
//!
//! Holds the job envelope and result shapes, the typed workflow model,
//! input validation, the base64 image codec, and the clock abstraction
//! used by every wait loop. Nothing in this crate touches the network.

pub mod clock;
pub mod encoding;
pub mod error;
pub mod job;
pub mod validation;
pub mod workflow;
