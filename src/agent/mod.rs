//! Agent binding: the narrow streaming-chat contract sessions use to reach
//! the scene-generation agent.
//!
//! A call to [`Agent::stream_chat`] yields a lazy [`TokenStream`]. Dropping
//! the stream cancels the call and releases whatever the agent holds for it;
//! calls made by different sessions are independent.
//!
//! Tool intermediate results arrive as [`AgentToken::ToolResult`] on the same
//! stream. Their payload may encode a structured action, see [`action`].

pub mod action;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use action::{ToolAction, ToolActionError};
pub use http::HttpAgent;

/// One unit of agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentToken {
    /// Text meant for the user.
    Text(String),
    /// Intermediate reasoning.
    Thinking(String),
    /// Raw output of a tool call.
    ToolResult(String),
    /// A token kind this build does not know.
    Unknown { kind: String, content: String },
}

impl AgentToken {
    pub fn from_kind(kind: &str, content: String) -> Self {
        match kind {
            "text" => Self::Text(content),
            "thinking" => Self::Thinking(content),
            "tool_result" => Self::ToolResult(content),
            other => Self::Unknown {
                kind: other.to_string(),
                content,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The binding could not be constructed.
    #[error("agent misconfigured: {0}")]
    Config(String),
    /// No binding is wired (degraded start).
    #[error("agent is not available")]
    Unavailable,
    #[error("agent request failed: {0}")]
    Transport(String),
    #[error("agent returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("agent sent malformed output: {0}")]
    Protocol(String),
    #[error("agent produced no token within {0:?}")]
    Timeout(Duration),
}

pub type TokenStream = BoxStream<'static, Result<AgentToken, AgentError>>;

#[async_trait]
pub trait Agent: Send + Sync {
    /// Start a chat turn for `session_id`. Errors before the first token are
    /// returned here; later failures arrive as `Err` items on the stream.
    async fn stream_chat(&self, text: &str, session_id: &str) -> Result<TokenStream, AgentError>;
}
