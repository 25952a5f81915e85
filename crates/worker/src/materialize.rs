//! Input image materialization.
//!
//! Gets caller-supplied images into ComfyUI's input directory before the
//! workflow is queued. Two entry styles are handled:
//!
//! - the explicit `images` list of the job input, staged by name;
//! - base64 payloads embedded directly in the `image` input of
//!   image-loading nodes, written under a fresh unique name with the node
//!   rewritten to point at it.

use std::path::{Path, PathBuf};

use bridge_comfyui::api::ComfyUIApi;
use bridge_core::encoding::{decode_image, try_decode_inline};
use bridge_core::job::InputImage;
use bridge_core::workflow::Workflow;

use crate::config::{InputStaging, WorkerConfig};
use crate::error::MaterializeError;

/// Prefix of files synthesized from inline workflow payloads.
pub const INLINE_FILENAME_PREFIX: &str = "bridge_input_";

pub struct Materializer<'a> {
    config: &'a WorkerConfig,
    api: &'a ComfyUIApi,
}

impl<'a> Materializer<'a> {
    pub fn new(config: &'a WorkerConfig, api: &'a ComfyUIApi) -> Self {
        Self { config, api }
    }

    /// Stage every explicit input image.
    ///
    /// A bad item does not stop the batch: all images are attempted and
    /// the failures are reported together. Returns the names the images
    /// were stored under.
    pub async fn stage_images(&self, images: &[InputImage]) -> Result<Vec<String>, MaterializeError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        if self.config.input_staging == InputStaging::Filesystem {
            self.ensure_input_dir().await?;
        }

        let mut staged = Vec::with_capacity(images.len());
        let mut failures = Vec::new();

        for image in images {
            match self.stage_one(image).await {
                Ok(name) => staged.push(name),
                Err(reason) => {
                    tracing::warn!(name = %image.name, error = %reason, "Failed to stage input image");
                    failures.push(format!("Error staging {}: {reason}", image.name));
                }
            }
        }

        if !failures.is_empty() {
            return Err(MaterializeError::Images {
                failed: failures.len(),
                total: images.len(),
                details: failures,
            });
        }

        tracing::info!(count = staged.len(), mode = ?self.config.input_staging, "Input images staged");
        Ok(staged)
    }

    async fn stage_one(&self, image: &InputImage) -> Result<String, String> {
        if !is_bare_filename(&image.name) {
            return Err("name must be a plain filename".into());
        }

        let bytes = decode_image(&image.image).map_err(|e| e.to_string())?;

        match self.config.input_staging {
            InputStaging::Filesystem => {
                let path = self.config.input_dir.join(&image.name);
                tokio::fs::write(&path, &bytes)
                    .await
                    .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
                Ok(image.name.clone())
            }
            InputStaging::Upload => {
                let response = self
                    .api
                    .upload_image(&image.name, bytes, true)
                    .await
                    .map_err(|e| e.to_string())?;
                if response.name.is_empty() {
                    Ok(image.name.clone())
                } else {
                    Ok(response.name)
                }
            }
        }
    }

    /// Replace inline base64 payloads on image-loading nodes with files.
    ///
    /// Values that do not decode are left alone and assumed to name a file
    /// already present in the input directory. Returns how many nodes were
    /// rewritten. If a write fails, the files this call created are removed.
    pub async fn rewrite_inline_images(
        &self,
        workflow: &mut Workflow,
    ) -> Result<usize, MaterializeError> {
        let mut rewritten = 0;
        let mut written = Vec::new();

        for (node_id, value) in workflow.image_inputs_mut() {
            let Some(bytes) = try_decode_inline(value) else {
                tracing::debug!(node_id, "Loader input is not base64, assuming filename");
                continue;
            };

            if rewritten == 0 {
                self.ensure_input_dir().await?;
            }

            let filename = format!("{INLINE_FILENAME_PREFIX}{}.png", uuid::Uuid::new_v4());
            let path = self.config.input_dir.join(&filename);
            write_or_roll_back(path, &bytes, &mut written).await?;

            tracing::info!(node_id, %filename, bytes = bytes.len(), "Decoded inline image input");
            *value = filename;
            rewritten += 1;
        }

        Ok(rewritten)
    }

    async fn ensure_input_dir(&self) -> Result<(), MaterializeError> {
        let dir = &self.config.input_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| MaterializeError::Io {
                path: dir.clone(),
                source,
            })
    }
}

/// Write `bytes` to `path` and record it in `written`. On failure every
/// file in `written` is removed before the error is returned.
async fn write_or_roll_back(
    path: PathBuf,
    bytes: &[u8],
    written: &mut Vec<PathBuf>,
) -> Result<(), MaterializeError> {
    if let Err(source) = tokio::fs::write(&path, bytes).await {
        for earlier in written.drain(..) {
            if let Err(e) = tokio::fs::remove_file(&earlier).await {
                tracing::warn!(path = %earlier.display(), error = %e, "Failed to remove inline input file");
            }
        }
        return Err(MaterializeError::Io { path, source });
    }

    written.push(path);
    Ok(())
}

/// True for names with no directory components, e.g. `a.png` but not
/// `../a.png` or `sub/a.png`.
fn is_bare_filename(name: &str) -> bool {
    let path = Path::new(name);
    path.file_name().is_some_and(|file| file == path.as_os_str())
}
