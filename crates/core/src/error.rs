/// Reasons a raw job payload is rejected before any network call is made.
///
/// The `Display` text is what ends up in the job result's `message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Input is absent, not JSON, or not a JSON object.
    #[error("{0}")]
    InvalidFormat(String),

    #[error("Missing 'workflow' parameter")]
    MissingWorkflow,

    #[error("Invalid workflow: {0}")]
    InvalidWorkflowType(String),

    #[error("'images' must be a list of objects with 'name' and 'image' keys")]
    InvalidImagesFormat,
}
