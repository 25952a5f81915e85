//! Typed view of a ComfyUI API-format workflow.
//!
//! A workflow is a map of node id to node. The bridge only looks inside
//! image-loading nodes; every other field is carried through untouched so
//! the serialized workflow matches what the caller sent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Node types that read a file from the service's input directory via
/// their `image` input.
pub const IMAGE_LOADER_CLASSES: &[&str] = &["LoadImage", "LoadImageMask"];

/// Name of the input that carries the image reference on loader nodes.
pub const IMAGE_INPUT: &str = "image";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Anything else on the node (`_meta`, etc.), preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowNode {
    pub fn is_image_loader(&self) -> bool {
        IMAGE_LOADER_CLASSES.contains(&self.class_type.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow {
    nodes: BTreeMap<String, WorkflowNode>,
}

impl Workflow {
    /// Validate a raw JSON value as a workflow.
    ///
    /// The value must be an object and every node must be an object with a
    /// string `class_type`.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let obj = value.as_object().ok_or_else(|| {
            ValidationError::InvalidWorkflowType(format!(
                "'workflow' must be a JSON object mapping node ids to nodes, got {}",
                json_type_name(value)
            ))
        })?;

        let mut nodes = BTreeMap::new();
        for (node_id, raw) in obj {
            let node: WorkflowNode = serde_json::from_value(raw.clone()).map_err(|e| {
                ValidationError::InvalidWorkflowType(format!("node '{node_id}' is malformed: {e}"))
            })?;
            nodes.insert(node_id.clone(), node);
        }

        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Mutable access to the `image` input of every image-loading node
    /// whose value is a string. Non-string values (links to other nodes)
    /// are skipped.
    pub fn image_inputs_mut(&mut self) -> impl Iterator<Item = (&str, &mut String)> {
        self.nodes
            .iter_mut()
            .filter(|(_, node)| node.is_image_loader())
            .filter_map(|(id, node)| match node.inputs.get_mut(IMAGE_INPUT) {
                Some(Value::String(value)) => Some((id.as_str(), value)),
                _ => None,
            })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
