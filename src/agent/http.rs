//! HTTP agent binding.
//!
//! `POST <agent.url>` with `{"text": ..., "session_id": ...}`. The response
//! body is newline-delimited JSON, one token per line:
//!
//! ```text
//! {"kind": "thinking", "content": "Decomposing the scene"}
//! {"kind": "tool_result", "content": "{\"action\":\"image_generation\",...}"}
//! {"kind": "text", "content": "Here is your lighthouse."}
//! ```
//!
//! Tokens are yielded as the body streams in. Dropping the stream drops the
//! response body, which aborts the request.

use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::{Agent, AgentError, AgentToken, TokenStream};
use crate::config::AgentConfig;

pub struct HttpAgent {
    http: reqwest::Client,
    url: reqwest::Url,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    text: &'a str,
    session_id: &'a str,
}

#[derive(Deserialize)]
struct WireToken {
    kind: String,
    #[serde(default)]
    content: String,
}

impl HttpAgent {
    /// Fails when `agent.url` is unset or not a valid URL.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let raw = config
            .url
            .as_deref()
            .ok_or_else(|| AgentError::Config("agent.url is not set".to_string()))?;
        let url = reqwest::Url::parse(raw)
            .map_err(|e| AgentError::Config(format!("invalid agent.url {raw:?}: {e}")))?;

        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, url })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl Agent for HttpAgent {
    async fn stream_chat(&self, text: &str, session_id: &str) -> Result<TokenStream, AgentError> {
        let resp = self
            .http
            .post(self.url.clone())
            .json(&ChatBody { text, session_id })
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AgentError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        Ok(ndjson_tokens(resp.bytes_stream()))
    }
}

/// Longest token line accepted. Image payloads travel inline as base64, so
/// this is generous.
const MAX_LINE_BYTES: usize = 32 * 1024 * 1024;

struct LineReader<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    done: bool,
}

impl<S> LineReader<S> {
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buffer.len();
            return None;
        };
        let end = self.scanned + offset;
        self.scanned = 0;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn parse_token_line(line: &[u8]) -> Result<AgentToken, AgentError> {
    let token: WireToken = serde_json::from_slice(line)
        .map_err(|e| AgentError::Protocol(format!("invalid token line: {e}")))?;
    Ok(AgentToken::from_kind(&token.kind, token.content))
}

/// Split a chunked body into NDJSON tokens. A transport error, or a line
/// longer than 32 MiB, ends the stream after being yielded once.
pub fn ndjson_tokens<S, B, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    line_tokens(body, MAX_LINE_BYTES)
}

fn line_tokens<S, B, E>(body: S, max_line: usize) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let reader = LineReader {
        body: Box::pin(body),
        buffer: Vec::new(),
        scanned: 0,
        max_line,
        done: false,
    };

    futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(line) = reader.take_line() {
                if is_blank(&line) {
                    continue;
                }
                return Some((parse_token_line(&line), reader));
            }
            if reader.buffer.len() > reader.max_line {
                let limit = reader.max_line;
                let err = AgentError::Protocol(format!("token line exceeds {limit} bytes"));
                reader.done = true;
                reader.buffer.clear();
                reader.scanned = 0;
                return Some((Err(err), reader));
            }
            if reader.done {
                if is_blank(&reader.buffer) {
                    return None;
                }
                let rest = std::mem::take(&mut reader.buffer);
                return Some((parse_token_line(&rest), reader));
            }
            match reader.body.next().await {
                Some(Ok(chunk)) => reader.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    reader.done = true;
                    reader.buffer.clear();
                    reader.scanned = 0;
                    return Some((Err(AgentError::Transport(e.to_string())), reader));
                }
                None => reader.done = true,
            }
        }
    })
    .boxed()
}
