//! Job envelope and result types exchanged with the invocation runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::workflow::Workflow;

/// Job id used when the envelope does not carry one (local test runs).
pub const DEFAULT_JOB_ID: &str = "local-test";

/// A single unit of work handed over by the invocation runtime.
///
/// `input` is kept raw: it may be a JSON object or a JSON-encoded string,
/// and is only interpreted by [`validate_input`](crate::validation::validate_input).
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    #[serde(default = "default_job_id")]
    pub id: String,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

fn default_job_id() -> String {
    DEFAULT_JOB_ID.to_string()
}

/// An image the caller wants placed into the service's input directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputImage {
    /// Target filename.
    pub name: String,
    /// Base64 payload, optionally prefixed with a `data:` URI header.
    pub image: String,
}

/// Job input after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInput {
    pub workflow: Workflow,
    pub images: Option<Vec<InputImage>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
}

/// Final structured result returned to the invocation runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    /// Resolved images keyed by output filename. Values are either a
    /// durable-storage URL or an inline base64 string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_images: Option<BTreeMap<String, String>>,
    pub refresh_worker: bool,
}

impl JobResult {
    pub fn success(
        message: impl Into<String>,
        output_images: BTreeMap<String, String>,
        details: Vec<String>,
        refresh_worker: bool,
    ) -> Self {
        Self {
            status: JobStatus::Success,
            message: message.into(),
            details: non_empty(details),
            output_images: Some(output_images),
            refresh_worker,
        }
    }

    pub fn error(message: impl Into<String>, details: Vec<String>, refresh_worker: bool) -> Self {
        Self {
            status: JobStatus::Error,
            message: message.into(),
            details: non_empty(details),
            output_images: None,
            refresh_worker,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

fn non_empty(details: Vec<String>) -> Option<Vec<String>> {
    if details.is_empty() {
        None
    } else {
        Some(details)
    }
}
