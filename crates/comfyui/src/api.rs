//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (node introspection, workflow submission,
//! history retrieval, input image upload) using [`reqwest`].

use std::time::Duration;

use bridge_core::encoding::image_mime_type;
use bridge_core::workflow::Workflow;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::history::History;

/// Timeout for everything except `/object_info`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `/object_info` is polled every few milliseconds during startup, so a
/// hung request must not stall the readiness loop for long.
pub const OBJECT_INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    request_timeout: Duration,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

/// Response returned by `/upload/image`.
#[derive(Debug, Default, Deserialize)]
pub struct UploadResponse {
    /// Name the file was stored under (ComfyUI may rename on collision).
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub folder_type: String,
}

/// Body of `POST /prompt`. ComfyUI requires the top-level `prompt` key.
#[derive(Serialize)]
struct PromptRequest<'a> {
    prompt: &'a Workflow,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// ComfyUI answered 2xx but the body did not have the expected shape.
    #[error("Unexpected ComfyUI response: {0}")]
    InvalidResponse(String),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request timeout used for submission, history and
    /// upload calls.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Base HTTP API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Fetch the node registry.
    ///
    /// Sends `GET /object_info`. The body maps every registered node type
    /// to its schema; it is only populated once models are loaded.
    pub async fn object_info(&self) -> Result<Map<String, Value>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/object_info", self.api_url))
            .timeout(OBJECT_INFO_TIMEOUT)
            .send()
            .await?;

        match Self::parse_response::<Value>(response).await? {
            Value::Object(map) => Ok(map),
            _ => Err(ComfyUIApiError::InvalidResponse(
                "/object_info did not return a JSON object".into(),
            )),
        }
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the workflow wrapped under the
    /// `prompt` key. Returns the server-assigned `prompt_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &Workflow,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .timeout(self.request_timeout)
            .json(&PromptRequest { prompt: workflow })
            .send()
            .await?;

        let body = Self::parse_response::<Value>(response).await?;
        serde_json::from_value(body).map_err(|e| {
            ComfyUIApiError::InvalidResponse(format!("/prompt response lacks a prompt_id: {e}"))
        })
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The result is empty
    /// until ComfyUI has picked the prompt up.
    pub async fn get_history(&self, prompt_id: &str) -> Result<History, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let body = Self::parse_response::<Value>(response).await?;
        serde_json::from_value(body).map_err(|e| {
            ComfyUIApiError::InvalidResponse(format!("/history/{prompt_id} is malformed: {e}"))
        })
    }

    /// Upload an image into ComfyUI's input directory.
    ///
    /// Sends a multipart `POST /upload/image` with the file under the
    /// `image` part and the `overwrite` flag.
    pub async fn upload_image(
        &self,
        name: &str,
        bytes: Vec<u8>,
        overwrite: bool,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str(image_mime_type(name))?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", overwrite.to_string());

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        // Older ComfyUI builds reply with an empty body.
        let text = response.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
