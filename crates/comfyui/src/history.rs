//! Typed ComfyUI execution history.
//!
//! `GET /history/{prompt_id}` returns `{"<prompt_id>": {...}}` once the
//! prompt has been picked up, and `{}` before that. The entry gains an
//! `outputs` map (node id to node output) when execution finishes.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

/// Node id to that node's output.
pub type Outputs = BTreeMap<String, NodeOutput>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: HashMap<String, HistoryEntry>,
}

impl History {
    pub fn entry(&self, prompt_id: &str) -> Option<&HistoryEntry> {
        self.entries.get(prompt_id)
    }

    /// Take the outputs for `prompt_id` if its execution has completed.
    pub fn into_completed_outputs(mut self, prompt_id: &str) -> Option<Outputs> {
        self.entries
            .remove(prompt_id)
            .filter(HistoryEntry::is_complete)
            .and_then(|entry| entry.outputs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: Option<Outputs>,
}

impl HistoryEntry {
    /// An empty `outputs` map is still pending: ComfyUI creates the entry
    /// before any node has produced output.
    pub fn is_complete(&self) -> bool {
        self.outputs.as_ref().is_some_and(|outputs| !outputs.is_empty())
    }
}

/// Output of a single node. Only images are consumed; other output kinds
/// (text, latents) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputImageRef>,
}

/// Location of a produced file relative to one of ComfyUI's directories.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

/// Which ComfyUI directory an [`OutputImageRef`] lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderType {
    Output,
    Temp,
    Input,
}

impl OutputImageRef {
    /// Unknown folder types are treated as `output`.
    pub fn folder(&self) -> FolderType {
        match self.folder_type.as_str() {
            "temp" => FolderType::Temp,
            "input" => FolderType::Input,
            _ => FolderType::Output,
        }
    }
}

/// Every image reference in `outputs`, paired with the producing node id.
pub fn output_images(outputs: &Outputs) -> impl Iterator<Item = (&str, &OutputImageRef)> {
    outputs.iter().flat_map(|(node_id, output)| {
        output
            .images
            .iter()
            .map(move |image| (node_id.as_str(), image))
    })
}
