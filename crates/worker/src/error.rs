use std::path::PathBuf;
use std::time::Duration;

use bridge_comfyui::api::ComfyUIApiError;
use bridge_core::error::ValidationError;
use bridge_core::job::JobResult;

/// Failures while putting input images where ComfyUI can read them.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    /// One or more explicit input images could not be staged. Every
    /// image was attempted; `details` has one line per failure.
    #[error("Failed to stage {failed} of {total} input image(s)")]
    Images {
        failed: usize,
        total: usize,
        details: Vec<String>,
    },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Job-level failure. Every variant ends the job with an error result.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("ComfyUI API did not become ready within {timeout:?}")]
    ReadinessTimeout { timeout: Duration },

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error("Error queuing workflow: {0}")]
    Submission(#[source] ComfyUIApiError),

    #[error("Max retries ({attempts}) reached while waiting for image generation")]
    PollingTimeout { attempts: u32 },

    #[error("Error waiting for image generation: {0}")]
    Polling(#[source] ComfyUIApiError),

    #[error("The image does not exist in the specified output folder: {}", .path.display())]
    OutputMissing { path: PathBuf },

    #[error("No output images could be resolved")]
    NoOutputs { details: Vec<String> },
}

impl JobError {
    /// Per-item detail lines carried into the job result.
    pub fn details(&self) -> Vec<String> {
        match self {
            Self::Materialize(MaterializeError::Images { details, .. })
            | Self::NoOutputs { details } => details.clone(),
            _ => Vec::new(),
        }
    }

    pub fn into_result(self, refresh_worker: bool) -> JobResult {
        JobResult::error(self.to_string(), self.details(), refresh_worker)
    }
}
