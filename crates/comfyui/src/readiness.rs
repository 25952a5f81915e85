//! Readiness probe for a freshly started ComfyUI server.
//!
//! An open port is not enough: ComfyUI answers HTTP before its node
//! registry is loaded. The server counts as ready only once
//! `/object_info` lists a core node type (the marker).

use std::time::Duration;

use bridge_core::clock::Clock;
use serde_json::{Map, Value};

use crate::api::ComfyUIApi;

/// Core node type that is always registered once loading has finished.
pub const DEFAULT_READY_MARKER: &str = "VAELoader";

/// Tunable parameters for the readiness probe.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Give up once this much time has passed since the first attempt.
    pub timeout: Duration,
    /// Delay between attempts.
    pub interval: Duration,
    /// Node type whose presence in `/object_info` signals readiness.
    pub marker_node: String,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_millis(50),
            marker_node: DEFAULT_READY_MARKER.to_string(),
        }
    }
}

/// Outcome of [`wait_until_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

pub fn has_marker(object_info: &Map<String, Value>, marker_node: &str) -> bool {
    object_info.contains_key(marker_node)
}

/// Poll `/object_info` until the marker node appears or the timeout
/// elapses.
///
/// Connection errors, non-2xx statuses and malformed bodies are all
/// treated the same way: log and try again after `interval`.
pub async fn wait_until_ready(
    api: &ComfyUIApi,
    config: &ReadinessConfig,
    clock: &dyn Clock,
) -> Readiness {
    let start = clock.elapsed();
    let mut attempts = 0u32;

    tracing::info!(
        url = %api.api_url(),
        timeout_secs = config.timeout.as_secs_f64(),
        marker = %config.marker_node,
        "Waiting for ComfyUI API to become ready",
    );

    loop {
        if clock.elapsed().saturating_sub(start) > config.timeout {
            tracing::warn!(
                attempts,
                timeout_secs = config.timeout.as_secs_f64(),
                "Timed out waiting for ComfyUI API",
            );
            return Readiness::TimedOut { attempts };
        }

        attempts += 1;
        match api.object_info().await {
            Ok(info) if has_marker(&info, &config.marker_node) => {
                tracing::info!(attempts, "ComfyUI API is ready");
                return Readiness::Ready { attempts };
            }
            Ok(_) => {
                tracing::debug!(attempts, "API up, but node registry is not loaded yet");
            }
            Err(e) => {
                tracing::debug!(attempts, error = %e, "ComfyUI API not ready");
            }
        }

        clock.sleep(config.interval).await;
    }
}
