//! Transport-agnostic view of one client connection.
//!
//! A [`Connection`] is the pair of halves a session needs: a stream of
//! received [`Frame`]s and a [`FrameSink`] for text writes, binary writes,
//! and close. The WebSocket adapter in [`crate::ws`] builds one from an
//! upgraded socket; tests build one from in-memory channels.

use async_trait::async_trait;
use futures::stream::BoxStream;

/// One discrete unit of data received from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// A frame kind the protocol assigns no meaning to. The label is only
    /// used in error messages and logs.
    Unsupported(&'static str),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Unsupported(label) => *label,
        }
    }
}

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The peer closed the connection (or it was already closed locally).
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Received frames, in arrival order. Ends when the peer goes away.
pub type FrameStream = BoxStream<'static, Result<Frame, ConnectionError>>;

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError>;
    async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), ConnectionError>;
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// A connection handed from the gateway to a client session.
pub struct Connection {
    pub frames: FrameStream,
    pub sink: Box<dyn FrameSink>,
    /// Peer label for logs (remote address when known).
    pub peer: String,
}
