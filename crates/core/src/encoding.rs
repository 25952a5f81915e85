//! Base64 image payload codec.
//!
//! Payloads use the standard alphabet with padding. A leading
//! `data:<mime>;base64,` header is accepted and stripped, and ASCII
//! whitespace (line-wrapped payloads) is ignored.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,

    #[error("invalid base64 image payload: {0}")]
    Invalid(#[from] base64::DecodeError),
}

/// Strip a `data:<mime>;base64,` header if present.
pub fn strip_data_uri(payload: &str) -> &str {
    payload
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, data)| data)
        .unwrap_or(payload)
}

/// Decode an image payload into raw bytes.
pub fn decode_image(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let cleaned: String = strip_data_uri(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(STANDARD.decode(cleaned)?)
}

/// Decide whether a loader node's `image` value is an inline payload.
///
/// Returns the decoded bytes when `value` decodes cleanly, `None` when it
/// should be treated as a filename. Any string that happens to be valid
/// base64 is taken as a payload.
pub fn try_decode_inline(value: &str) -> Option<Vec<u8>> {
    decode_image(value).ok().filter(|bytes| !bytes.is_empty())
}

pub fn encode_image(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// MIME type for an image filename, by extension. Defaults to PNG, which
/// is what ComfyUI's save nodes write.
pub fn image_mime_type(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}
