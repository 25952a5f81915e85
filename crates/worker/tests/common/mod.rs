#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bridge_comfyui::readiness::ReadinessConfig;
use bridge_core::job::Job;
use bridge_worker::config::{PollingConfig, WorkerConfig};
use bridge_worker::storage::{object_key, ObjectStore, StorageError};
use serde_json::{json, Value};

pub const PROMPT_ID: &str = "prompt-123";

/// Stand-in for a generated PNG.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot really an image";

/// One scripted `/object_info` reply served before the steady state.
#[derive(Debug, Clone, Copy)]
pub enum Startup {
    /// 503 with a text body.
    Unavailable,
    /// 200 with a body that is not JSON.
    Garbage,
    /// 200 with an empty node registry.
    NotLoaded,
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
    pub overwrite: Option<String>,
}

struct MockInner {
    startup: VecDeque<Startup>,
    object_info_status: StatusCode,
    object_info_calls: u32,
    submit_status: StatusCode,
    submit_body: Value,
    submissions: Vec<Value>,
    history_status: StatusCode,
    /// `None` never completes; `Some(n)` answers `{}` for the first `n`
    /// polls.
    pending_polls: Option<u32>,
    outputs: Value,
    history_calls: u32,
    upload_status: StatusCode,
    uploads: Vec<Upload>,
}

/// In-process ComfyUI double serving the four endpoints the worker uses.
#[derive(Clone)]
pub struct MockComfy {
    inner: Arc<Mutex<MockInner>>,
}

impl MockComfy {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                startup: VecDeque::new(),
                object_info_status: StatusCode::OK,
                object_info_calls: 0,
                submit_status: StatusCode::OK,
                submit_body: json!({ "prompt_id": PROMPT_ID, "number": 1, "node_errors": {} }),
                submissions: Vec::new(),
                history_status: StatusCode::OK,
                pending_polls: Some(0),
                outputs: json!({}),
                history_calls: 0,
                upload_status: StatusCode::OK,
                uploads: Vec::new(),
            })),
        }
    }

    fn with(self, f: impl FnOnce(&mut MockInner)) -> Self {
        f(&mut self.inner.lock().unwrap());
        self
    }

    pub fn startup(self, replies: &[Startup]) -> Self {
        self.with(|m| m.startup = replies.iter().copied().collect())
    }

    pub fn object_info_status(self, status: StatusCode) -> Self {
        self.with(|m| m.object_info_status = status)
    }

    pub fn reject_submission(self, status: StatusCode, body: Value) -> Self {
        self.with(|m| {
            m.submit_status = status;
            m.submit_body = body;
        })
    }

    pub fn submit_body(self, body: Value) -> Self {
        self.with(|m| m.submit_body = body)
    }

    pub fn outputs(self, outputs: Value) -> Self {
        self.with(|m| m.outputs = outputs)
    }

    pub fn complete_after(self, pending_polls: u32) -> Self {
        self.with(|m| m.pending_polls = Some(pending_polls))
    }

    pub fn never_complete(self) -> Self {
        self.with(|m| m.pending_polls = None)
    }

    pub fn history_status(self, status: StatusCode) -> Self {
        self.with(|m| m.history_status = status)
    }

    pub fn upload_status(self, status: StatusCode) -> Self {
        self.with(|m| m.upload_status = status)
    }

    pub fn object_info_calls(&self) -> u32 {
        self.inner.lock().unwrap().object_info_calls
    }

    pub fn history_calls(&self) -> u32 {
        self.inner.lock().unwrap().history_calls
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.inner.lock().unwrap().uploads.clone()
    }

    /// Serve on an ephemeral loopback port. Returns `host:port`.
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/object_info", get(object_info))
            .route("/prompt", post(prompt))
            .route("/history/{prompt_id}", get(history))
            .route("/upload/image", post(upload_image))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }
}

async fn object_info(State(mock): State<MockComfy>) -> Response {
    let mut m = mock.inner.lock().unwrap();
    m.object_info_calls += 1;

    match m.startup.pop_front() {
        Some(Startup::Unavailable) => {
            return (StatusCode::SERVICE_UNAVAILABLE, "starting").into_response()
        }
        Some(Startup::Garbage) => return (StatusCode::OK, "<html>").into_response(),
        Some(Startup::NotLoaded) => return Json(json!({})).into_response(),
        None => {}
    }

    if m.object_info_status != StatusCode::OK {
        return (m.object_info_status, "nope").into_response();
    }
    Json(json!({ "VAELoader": {}, "KSampler": {}, "LoadImage": {} })).into_response()
}

async fn prompt(State(mock): State<MockComfy>, Json(body): Json<Value>) -> Response {
    let mut m = mock.inner.lock().unwrap();
    m.submissions.push(body);
    (m.submit_status, Json(m.submit_body.clone())).into_response()
}

async fn history(State(mock): State<MockComfy>, UrlPath(prompt_id): UrlPath<String>) -> Response {
    let mut m = mock.inner.lock().unwrap();
    m.history_calls += 1;

    if m.history_status != StatusCode::OK {
        return (m.history_status, "history unavailable").into_response();
    }

    let body = match m.pending_polls {
        None => json!({ prompt_id: { "prompt": [], "outputs": {} } }),
        Some(pending) if m.history_calls <= pending => json!({}),
        Some(_) => json!({ prompt_id: { "outputs": m.outputs.clone() } }),
    };
    Json(body).into_response()
}

async fn upload_image(State(mock): State<MockComfy>, mut multipart: Multipart) -> Response {
    let mut upload = Upload {
        file_name: None,
        bytes: Vec::new(),
        overwrite: None,
    };

    while let Some(field) = multipart.next_field().await.unwrap() {
        match field.name() {
            Some("image") => {
                upload.file_name = field.file_name().map(str::to_string);
                upload.bytes = field.bytes().await.unwrap().to_vec();
            }
            Some("overwrite") => upload.overwrite = Some(field.text().await.unwrap()),
            _ => {}
        }
    }

    let mut m = mock.inner.lock().unwrap();
    let name = upload.file_name.clone().unwrap_or_default();
    m.uploads.push(upload);

    if m.upload_status != StatusCode::OK {
        return (m.upload_status, "upload rejected").into_response();
    }
    Json(json!({ "name": name, "subfolder": "", "type": "input" })).into_response()
}

/// Records uploads in memory and hands back deterministic URLs.
#[derive(Default)]
pub struct FakeStore {
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail: bool,
}

impl FakeStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn put_image(
        &self,
        job_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        let key = object_key(job_id, filename);
        if self.fail {
            return Err(StorageError::Upload {
                key,
                message: "bucket unavailable".into(),
            });
        }
        self.uploads.lock().unwrap().push((key.clone(), bytes));
        Ok(format!("https://bucket.test/{key}"))
    }
}

/// Worker config pointing at `host`, with all directories under `root`.
pub fn test_config(host: &str, root: &Path) -> WorkerConfig {
    WorkerConfig {
        comfy_host: host.to_string(),
        readiness: ReadinessConfig {
            timeout: Duration::from_secs(2),
            ..Default::default()
        },
        polling: PollingConfig {
            interval: Duration::from_millis(250),
            max_retries: 20,
        },
        request_timeout: Duration::from_secs(5),
        input_dir: root.join("input"),
        output_dir: root.join("output"),
        temp_dir: root.join("temp"),
        ..Default::default()
    }
}

/// Put a file where ComfyUI would have written it.
pub fn write_output(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// History `outputs` with one save node producing `filenames`.
pub fn image_outputs(filenames: &[&str]) -> Value {
    let images: Vec<Value> = filenames
        .iter()
        .map(|name| json!({ "filename": name, "subfolder": "", "type": "output" }))
        .collect();
    json!({ "9": { "images": images } })
}

pub fn ksampler_workflow() -> Value {
    json!({
        "1": {
            "class_type": "KSampler",
            "inputs": { "seed": 42, "steps": 20, "cfg": 7.0 }
        }
    })
}

pub fn job(input: Value) -> Job {
    Job {
        id: "job-1".into(),
        input: Some(input),
    }
}
