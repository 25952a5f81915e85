//! Output resolution: turn history image references into URLs or inline
//! base64, removing each local file once it has been handled.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use bridge_comfyui::history::{output_images, FolderType, OutputImageRef, Outputs};
use bridge_core::encoding::encode_image;

use crate::config::{OutputMissingPolicy, WorkerConfig};
use crate::error::JobError;
use crate::storage::ObjectStore;

/// Result of resolving a job's outputs.
#[derive(Debug, Default)]
pub struct ResolvedOutputs {
    /// Filename to URL (upload) or base64 string (inline).
    pub images: BTreeMap<String, String>,
    /// One line per image that could not be resolved.
    pub errors: Vec<String>,
}

pub struct OutputResolver<'a> {
    config: &'a WorkerConfig,
    store: Option<&'a dyn ObjectStore>,
}

impl<'a> OutputResolver<'a> {
    /// With a `store`, images are uploaded; without one they are inlined.
    pub fn new(config: &'a WorkerConfig, store: Option<&'a dyn ObjectStore>) -> Self {
        Self { config, store }
    }

    pub async fn resolve(&self, job_id: &str, outputs: &Outputs) -> Result<ResolvedOutputs, JobError> {
        let mut resolved = ResolvedOutputs::default();
        let mut seen = HashSet::new();

        for (node_id, image) in output_images(outputs) {
            let path = match self.local_path(image) {
                Ok(path) => path,
                Err(reason) => {
                    tracing::warn!(node_id, filename = %image.filename, %reason, "Rejected output reference");
                    resolved
                        .errors
                        .push(format!("Invalid output reference {}: {reason}", image.filename));
                    continue;
                }
            };

            // The same file can be reported by more than one node.
            if !seen.insert(path.clone()) {
                continue;
            }

            if !is_file(&path).await {
                log_directory_listing(path.parent().unwrap_or(&self.config.output_dir)).await;
                let err = JobError::OutputMissing { path };
                match self.config.output_missing {
                    OutputMissingPolicy::FailJob => return Err(err),
                    OutputMissingPolicy::PerImage => {
                        tracing::warn!(node_id, error = %err, "Output image missing");
                        resolved.errors.push(err.to_string());
                        continue;
                    }
                }
            }

            // Results are keyed by filename; a second file with the same name
            // stays on disk instead of replacing the first.
            if resolved.images.contains_key(&image.filename) {
                tracing::warn!(node_id, path = %path.display(), "Duplicate output filename");
                resolved.errors.push(format!(
                    "Duplicate output filename {} at {}",
                    image.filename,
                    path.display()
                ));
                continue;
            }

            match self.resolve_file(job_id, &image.filename, &path).await {
                Ok(value) => {
                    tracing::debug!(node_id, filename = %image.filename, "Resolved output image");
                    resolved.images.insert(image.filename.clone(), value);
                }
                Err(reason) => {
                    tracing::warn!(node_id, filename = %image.filename, %reason, "Failed to resolve output image");
                    resolved
                        .errors
                        .push(format!("Error resolving {}: {reason}", image.filename));
                }
            }
        }

        tracing::info!(
            resolved = resolved.images.len(),
            failed = resolved.errors.len(),
            uploaded = self.store.is_some(),
            "Output images resolved",
        );
        Ok(resolved)
    }

    /// Directory chosen by the reference's type, then subfolder, then name.
    pub fn local_path(&self, image: &OutputImageRef) -> Result<PathBuf, String> {
        if image.filename.is_empty() {
            return Err("empty filename".into());
        }
        if !is_contained(&image.subfolder) || !is_contained(&image.filename) {
            return Err("path escapes the output directory".into());
        }

        let base = match image.folder() {
            FolderType::Output => &self.config.output_dir,
            FolderType::Temp => &self.config.temp_dir,
            FolderType::Input => &self.config.input_dir,
        };

        let mut path = base.clone();
        if !image.subfolder.is_empty() {
            path.push(&image.subfolder);
        }
        path.push(&image.filename);
        Ok(path)
    }

    /// Upload or encode one file, then delete it. A file that fails here is
    /// left on disk.
    async fn resolve_file(&self, job_id: &str, filename: &str, path: &Path) -> Result<String, String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        let value = match self.store {
            Some(store) => store
                .put_image(job_id, filename, bytes)
                .await
                .map_err(|e| e.to_string())?,
            None => encode_image(&bytes),
        };

        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove resolved output file");
        }

        Ok(value)
    }
}

fn is_contained(relative: &str) -> bool {
    Path::new(relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

async fn log_directory_listing(dir: &Path) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Output directory is not readable");
            return;
        }
    };

    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    tracing::debug!(dir = %dir.display(), entries = ?names, "Output directory contents");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(filename: &str, subfolder: &str, folder_type: &str) -> OutputImageRef {
        OutputImageRef {
            filename: filename.into(),
            subfolder: subfolder.into(),
            folder_type: folder_type.into(),
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            output_dir: PathBuf::from("/data/out"),
            temp_dir: PathBuf::from("/data/tmp"),
            input_dir: PathBuf::from("/data/in"),
            ..Default::default()
        }
    }

    #[test]
    fn path_follows_type_and_subfolder() {
        let config = config();
        let resolver = OutputResolver::new(&config, None);

        assert_eq!(
            resolver.local_path(&image("a.png", "", "output")).unwrap(),
            PathBuf::from("/data/out/a.png")
        );
        assert_eq!(
            resolver.local_path(&image("a.png", "batch", "temp")).unwrap(),
            PathBuf::from("/data/tmp/batch/a.png")
        );
        assert_eq!(
            resolver.local_path(&image("a.png", "", "input")).unwrap(),
            PathBuf::from("/data/in/a.png")
        );
        assert_eq!(
            resolver.local_path(&image("a.png", "", "weird")).unwrap(),
            PathBuf::from("/data/out/a.png")
        );
    }

    #[test]
    fn traversal_is_rejected() {
        let config = config();
        let resolver = OutputResolver::new(&config, None);

        assert!(resolver.local_path(&image("a.png", "../etc", "output")).is_err());
        assert!(resolver.local_path(&image("../a.png", "", "output")).is_err());
        assert!(resolver.local_path(&image("a.png", "/abs", "output")).is_err());
        assert!(resolver.local_path(&image("", "", "output")).is_err());
    }
}
