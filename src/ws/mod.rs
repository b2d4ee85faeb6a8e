//! WebSocket transport for client sessions.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET <server.ws_path>` (default `/ws`). While the
//!    gateway is shutting down the upgrade is refused with `503`.
//! 2. The upgraded socket is wrapped as a [`Connection`] and handed to the
//!    [`Gateway`](crate::gateway::Gateway), which runs one
//!    [`ClientSession`](crate::sessions::ClientSession) over it.
//! 3. The handler returns once the session's disconnect signal fires.
//!
//! ## Message flow (client → server)
//!
//! | Frame                         | Next frame expected | Result                        |
//! |-------------------------------|---------------------|-------------------------------|
//! | text `{"type":"text"}`        | text                | chat request                  |
//! | text `{"type":"audio"}`       | binary              | `converted_speech` + chat     |
//! | text, not starting with `{`   | anything            | chat request                  |
//! | anything out of sequence      | anything            | `error` response, code 400    |
//!
//! ## Message flow (server → client)
//!
//! Each agent token becomes one JSON text frame (see [`codec`]). An
//! `image_generation` frame is followed by a blob count frame and that many
//! binary frames.
//!
//! Ping and pong frames are answered by the WebSocket layer and never reach
//! the protocol machine. A close frame ends the session.

pub mod codec;
pub mod fsm;

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tracing::debug;

use crate::connection::{Connection, ConnectionError, Frame, FrameSink};
use crate::AppState;

/// `GET /ws`: WebSocket upgrade handler.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.gateway.is_accepting() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
    }

    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| async move {
        debug!(peer = %addr, "WebSocket upgraded");
        gateway
            .run_connection(socket_connection(socket, addr.to_string()))
            .await;
    })
}

/// Split an upgraded socket into the halves a session consumes.
pub fn socket_connection(socket: WebSocket, peer: String) -> Connection {
    let (sink, stream) = socket.split();

    let frames = stream
        .filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data.to_vec()))),
                Ok(Message::Ping(_) | Message::Pong(_)) => None,
                Ok(Message::Close(_)) => Some(Err(ConnectionError::Closed)),
                Err(e) => Some(Err(ConnectionError::Transport(e.to_string()))),
            }
        })
        .boxed();

    Connection {
        frames,
        sink: Box::new(WsSink(sink)),
        peer,
    }
}

struct WsSink(SplitSink<WebSocket, Message>);

impl WsSink {
    async fn send(&mut self, msg: Message) -> Result<(), ConnectionError> {
        self.0
            .send(msg)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.send(Message::Text(text.into())).await
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), ConnectionError> {
        self.send(Message::Binary(data.into())).await
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        // The peer may already be gone; still flush and close our half.
        let sent = self.send(Message::Close(None)).await;
        self.0
            .close()
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        sent
    }
}
