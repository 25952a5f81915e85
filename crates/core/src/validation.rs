//! Job input validation.
//!
//! Turns the raw `input` field of a job envelope into a [`JobInput`]
//! without side effects.

use serde_json::Value;

use crate::error::ValidationError;
use crate::job::{InputImage, JobInput};
use crate::workflow::Workflow;

/// Keys under which the workflow may be supplied, in priority order.
pub const WORKFLOW_KEYS: &[&str] = &["workflow", "prompt"];

/// Validate a raw job input.
///
/// `raw` may be a JSON object or a string containing one. A `null` value
/// counts as absent, both for the input itself and for its fields.
pub fn validate_input(raw: Option<&Value>) -> Result<JobInput, ValidationError> {
    let raw = raw
        .filter(|v| !v.is_null())
        .ok_or_else(|| ValidationError::InvalidFormat("Please provide input".into()))?;

    let parsed;
    let input = match raw {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).map_err(|_| {
                ValidationError::InvalidFormat("Invalid JSON format in input".into())
            })?;
            &parsed
        }
        other => other,
    };

    let obj = input
        .as_object()
        .ok_or_else(|| ValidationError::InvalidFormat("Input must be a JSON object".into()))?;

    let workflow = WORKFLOW_KEYS
        .iter()
        .find_map(|key| obj.get(*key).filter(|v| !v.is_null()))
        .ok_or(ValidationError::MissingWorkflow)?;
    let workflow = Workflow::from_value(workflow)?;

    let images = match obj.get("images") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_images(value)?),
    };

    Ok(JobInput { workflow, images })
}

fn parse_images(value: &Value) -> Result<Vec<InputImage>, ValidationError> {
    let items = value.as_array().ok_or(ValidationError::InvalidImagesFormat)?;

    items
        .iter()
        .map(|item| {
            let name = item.get("name").and_then(Value::as_str);
            let image = item.get("image").and_then(Value::as_str);
            match (name, image) {
                (Some(name), Some(image)) => Ok(InputImage {
                    name: name.to_string(),
                    image: image.to_string(),
                }),
                _ => Err(ValidationError::InvalidImagesFormat),
            }
        })
        .collect()
}
