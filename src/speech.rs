//! Speech-to-text collaborator.
//!
//! The reader task hands each audio payload to [`SpeechToText::transcribe`]
//! and treats the transcript as chat text. [`HttpSpeechToText`] posts the
//! raw bytes to `speech.url` and expects `{"text": "..."}` back.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SpeechConfig;

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("speech-to-text misconfigured: {0}")]
    Config(String),
    #[error("speech-to-text request failed: {0}")]
    Transport(String),
    #[error("speech-to-text returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("speech-to-text sent an invalid response: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, SpeechError>;
}

pub struct HttpSpeechToText {
    http: reqwest::Client,
    url: reqwest::Url,
}

#[derive(Deserialize)]
struct Transcript {
    text: String,
}

impl HttpSpeechToText {
    pub fn new(config: &SpeechConfig) -> Result<Self, SpeechError> {
        let raw = config
            .url
            .as_deref()
            .ok_or_else(|| SpeechError::Config("speech.url is not set".to_string()))?;
        let url = reqwest::Url::parse(raw)
            .map_err(|e| SpeechError::Config(format!("invalid speech.url {raw:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SpeechError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, SpeechError> {
        let resp = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio)
            .send()
            .await
            .map_err(|e| SpeechError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SpeechError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SpeechError::Upstream {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str::<Transcript>(&body)
            .map(|t| t.text)
            .map_err(|e| SpeechError::Protocol(e.to_string()))
    }
}
