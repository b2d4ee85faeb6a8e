//! Structured actions carried in tool-result tokens.
//!
//! ```json
//! {"action": "image_generation", "message": "Rendered 2 views", "images": ["<b64>", "<b64>"]}
//! ```
//!
//! Any other `action` tag is [`ToolAction::Unrecognized`]. Output that is not
//! a JSON object with a string `action` field is [`ToolAction::Unstructured`].

use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAction {
    ImageGeneration { message: String, images: Vec<Vec<u8>> },
    Unrecognized { action: String },
    Unstructured,
}

/// A recognized action whose payload does not match its schema.
#[derive(Debug, thiserror::Error)]
pub enum ToolActionError {
    #[error("malformed {action} payload: {cause}")]
    Malformed { action: String, cause: String },
    #[error("image {index} is not valid base64: {source}")]
    InvalidImage {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },
}

#[derive(Deserialize)]
struct ImagePayload {
    #[serde(default)]
    message: String,
    #[serde(default)]
    images: Vec<String>,
}

impl ToolAction {
    pub fn parse(raw: &str) -> Result<Self, ToolActionError> {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return Ok(Self::Unstructured);
        };
        let Some(tag) = value.get("action").and_then(Value::as_str) else {
            return Ok(Self::Unstructured);
        };

        match tag {
            "image_generation" => {
                let payload: ImagePayload =
                    serde_json::from_value(value).map_err(|e| ToolActionError::Malformed {
                        action: "image_generation".to_string(),
                        cause: e.to_string(),
                    })?;
                let images = payload
                    .images
                    .iter()
                    .enumerate()
                    .map(|(index, encoded)| {
                        base64::engine::general_purpose::STANDARD
                            .decode(encoded)
                            .map_err(|source| ToolActionError::InvalidImage { index, source })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::ImageGeneration {
                    message: payload.message,
                    images,
                })
            }
            other => Ok(Self::Unrecognized {
                action: other.to_string(),
            }),
        }
    }
}
