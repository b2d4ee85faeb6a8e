//! Wire shapes of inbound and outbound messages.
//!
//! ## Inbound
//!
//! | Frame  | Shape                          | Meaning                              |
//! |--------|--------------------------------|--------------------------------------|
//! | text   | `{"type": "audio" \| "text"}`  | meta frame, declares the next frame  |
//! | text   | anything not starting with `{` | chat text (no meta required)         |
//! | binary | raw bytes                      | audio, only after an audio meta      |
//!
//! ## Outbound
//!
//! Every response is one text frame:
//!
//! ```json
//! {"status": "stream", "code": 200, "action": "agent_response", "message": "..."}
//! ```
//!
//! An `image_generation` response with blobs is followed by a text frame
//! holding the decimal blob count, then one binary frame per blob in order.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Payload kind announced by a meta frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaKind {
    Audio,
    Text,
}

#[derive(Debug, Deserialize)]
struct MetaFrame {
    #[serde(rename = "type")]
    kind: MetaKind,
}

/// A schema violation in an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self(cause.into())
    }
}

/// A text frame received while no payload was announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleText {
    Meta(MetaKind),
    Chat(String),
}

/// Classify a text frame received in the idle state.
///
/// Text that opens like a JSON object must be a valid meta frame; anything
/// else is taken as plain chat text.
pub fn classify_idle_text(text: &str) -> Result<IdleText, ValidationError> {
    if text.trim_start().starts_with('{') {
        decode_meta(text).map(IdleText::Meta)
    } else {
        chat_text(text).map(IdleText::Chat)
    }
}

pub fn decode_meta(text: &str) -> Result<MetaKind, ValidationError> {
    serde_json::from_str::<MetaFrame>(text)
        .map(|meta| meta.kind)
        .map_err(|e| ValidationError::new(format!("invalid meta frame: {e}")))
}

/// Accept `text` as a chat message. Empty or whitespace-only text is rejected.
pub fn chat_text(text: &str) -> Result<String, ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::new("chat text is empty"));
    }
    Ok(text.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Stream,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    AgentResponse,
    ThinkingProcess,
    ImageGeneration,
    ConvertedSpeech,
    UnknownAction,
}

/// One message queued for the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundResponse {
    pub status: Status,
    pub code: u16,
    pub action: Action,
    pub message: String,
    /// Only ever non-empty for `image_generation`.
    #[serde(skip)]
    blobs: Vec<Vec<u8>>,
}

impl OutboundResponse {
    pub fn stream(action: Action, message: impl Into<String>) -> Self {
        Self {
            status: Status::Stream,
            code: StatusCode::OK.as_u16(),
            action,
            message: message.into(),
            blobs: Vec::new(),
        }
    }

    pub fn image_generation(message: impl Into<String>, blobs: Vec<Vec<u8>>) -> Self {
        Self {
            blobs,
            ..Self::stream(Action::ImageGeneration, message)
        }
    }

    /// Error response for a frame the client got wrong.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::error(Action::UnknownAction, StatusCode::BAD_REQUEST, message)
    }

    pub fn error(action: Action, code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            code: code.as_u16(),
            action,
            message: message.into(),
            blobs: Vec::new(),
        }
    }

    pub fn blobs(&self) -> &[Vec<u8>] {
        &self.blobs
    }
}

/// A frame to write, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Lay out `response` as wire frames: header, then blob count and blobs
/// when there are any.
pub fn encode(mut response: OutboundResponse) -> Result<Vec<OutFrame>, serde_json::Error> {
    let blobs = std::mem::take(&mut response.blobs);
    let header = serde_json::to_string(&response)?;

    let mut frames = Vec::with_capacity(2 + blobs.len());
    frames.push(OutFrame::Text(header));
    if !blobs.is_empty() {
        frames.push(OutFrame::Text(blobs.len().to_string()));
        frames.extend(blobs.into_iter().map(OutFrame::Binary));
    }
    Ok(frames)
}

/// Stand-in frame when a response could not be serialized.
pub fn encode_failure(cause: &serde_json::Error) -> Vec<OutFrame> {
    let body = json!({
        "status": Status::Error,
        "code": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        "action": Action::UnknownAction,
        "message": format!("failed to encode response: {cause}"),
    });
    vec![OutFrame::Text(body.to_string())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_frames_decode() {
        assert_eq!(decode_meta(r#"{"type":"audio"}"#), Ok(MetaKind::Audio));
        assert_eq!(decode_meta(r#"{"type": "text"}"#), Ok(MetaKind::Text));
    }

    #[test]
    fn test_meta_with_unknown_type_is_rejected() {
        let err = decode_meta(r#"{"type":"video"}"#).unwrap_err();
        assert!(err.to_string().starts_with("invalid meta frame"));
    }

    #[test]
    fn test_meta_without_type_is_rejected() {
        assert!(decode_meta(r#"{"kind":"audio"}"#).is_err());
    }

    #[test]
    fn test_idle_text_plain_chat() {
        assert_eq!(
            classify_idle_text("draw a lighthouse at dusk"),
            Ok(IdleText::Chat("draw a lighthouse at dusk".to_string()))
        );
    }

    #[test]
    fn test_idle_text_broken_json_is_a_validation_error() {
        assert!(classify_idle_text("{not json").is_err());
        assert!(classify_idle_text("  {\"type\": 3}").is_err());
    }

    #[test]
    fn test_empty_chat_text_is_rejected() {
        assert!(chat_text("").is_err());
        assert!(chat_text(" \n\t").is_err());
    }

    #[test]
    fn test_response_wire_shape() {
        let frames = encode(OutboundResponse::stream(Action::ThinkingProcess, "hmm")).unwrap();
        assert_eq!(frames.len(), 1);
        let OutFrame::Text(ref header) = frames[0] else {
            panic!("header must be text");
        };
        let value: serde_json::Value = serde_json::from_str(header).unwrap();
        assert_eq!(
            value,
            json!({"status": "stream", "code": 200, "action": "thinking_process", "message": "hmm"})
        );
    }

    #[test]
    fn test_rejected_response_is_400() {
        let resp = OutboundResponse::rejected("nope");
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.code, 400);
        assert_eq!(resp.action, Action::UnknownAction);
    }

    #[test]
    fn test_blob_framing() {
        let blobs = vec![vec![1, 2, 3], vec![4], vec![5, 6]];
        let frames = encode(OutboundResponse::image_generation("done", blobs.clone())).unwrap();

        assert_eq!(frames.len(), 1 + 1 + blobs.len());
        let OutFrame::Text(ref header) = frames[0] else {
            panic!("header must be text");
        };
        assert!(header.contains("\"image_generation\""));
        assert!(!header.contains("blobs"));
        assert_eq!(frames[1], OutFrame::Text("3".to_string()));
        for (frame, blob) in frames[2..].iter().zip(blobs) {
            assert_eq!(frame, &OutFrame::Binary(blob));
        }
    }

    #[test]
    fn test_image_generation_without_blobs_has_no_count_frame() {
        let frames = encode(OutboundResponse::image_generation("nothing", Vec::new())).unwrap();
        assert_eq!(frames.len(), 1);
    }
}
