//! The reader, processor, and writer loops of a [`ClientSession`].
//!
//! Every suspension point sits inside a `select!` against the session's
//! cancellation token (checked first), so a close from any side unwinds all
//! three tasks without leaving half-pushed queue items behind.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures::StreamExt;
use tracing::{debug, error, warn};

use super::{ClientSession, CloseReason, InboundRequest, SessionClosed};
use crate::agent::{AgentError, AgentToken, TokenStream, ToolAction};
use crate::connection::{ConnectionError, FrameStream};
use crate::ws::codec::{self, Action, OutFrame, OutboundResponse};
use crate::ws::fsm::{ProtocolMachine, Step};

pub(super) async fn reader(session: Arc<ClientSession>, mut frames: FrameStream) {
    let mut machine = ProtocolMachine::default();

    let reason = loop {
        let next = tokio::select! {
            biased;
            () = session.cancel.cancelled() => return,
            next = frames.next() => next,
        };
        let frame = match next {
            None | Some(Err(ConnectionError::Closed)) => break CloseReason::RemoteClosed,
            Some(Err(e)) => {
                warn!(session_id = %session.id, "Read failed: {e}");
                break CloseReason::ReadFailed(e.to_string());
            }
            Some(Ok(frame)) => frame,
        };

        let kind = frame.kind();
        let from = machine.state();
        let step = machine.feed(frame);
        debug!(session_id = %session.id, kind, ?from, to = ?machine.state(), "Frame classified");

        let handled = match step {
            Step::Expect => Ok(()),
            Step::Chat(text) => session.enqueue_request(InboundRequest::Chat { text }).await,
            Step::Transcribe(audio) => transcribe(&session, audio).await,
            Step::Reject(err) => {
                warn!(session_id = %session.id, "Rejected {kind} frame: {err}");
                session
                    .enqueue_response(OutboundResponse::rejected(err.to_string()))
                    .await
            }
        };
        if handled.is_err() {
            return;
        }
    };

    session.close(reason).await;
}

async fn transcribe(session: &ClientSession, audio: Vec<u8>) -> Result<(), SessionClosed> {
    let Some(speech) = session.bindings.speech.clone() else {
        warn!(session_id = %session.id, "Audio received but speech-to-text is not configured");
        return session
            .enqueue_response(OutboundResponse::error(
                Action::ConvertedSpeech,
                StatusCode::INTERNAL_SERVER_ERROR,
                "speech-to-text is not available",
            ))
            .await;
    };

    let bytes = audio.len();
    let result = tokio::select! {
        biased;
        () = session.cancel.cancelled() => return Err(SessionClosed),
        result = speech.transcribe(audio) => result,
    };

    match result {
        Ok(transcript) => match codec::chat_text(&transcript) {
            Ok(text) => {
                debug!(session_id = %session.id, bytes, "Audio transcribed");
                let converted = OutboundResponse::stream(Action::ConvertedSpeech, text.clone());
                session.enqueue_response(converted).await?;
                session.enqueue_request(InboundRequest::Chat { text }).await
            }
            Err(_) => {
                session
                    .enqueue_response(OutboundResponse::error(
                        Action::ConvertedSpeech,
                        StatusCode::BAD_REQUEST,
                        "no speech recognized in audio",
                    ))
                    .await
            }
        },
        Err(e) => {
            warn!(session_id = %session.id, bytes, "Transcription failed: {e}");
            session
                .enqueue_response(OutboundResponse::error(
                    Action::ConvertedSpeech,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.to_string(),
                ))
                .await
        }
    }
}

pub(super) async fn processor(session: Arc<ClientSession>) {
    loop {
        let request = tokio::select! {
            biased;
            () = session.cancel.cancelled() => return,
            request = session.inbound.pop() => match request {
                Some(request) => request,
                None => return,
            },
        };

        let outcome = match request {
            InboundRequest::Chat { text } => exchange(&session, &text).await,
        };
        if outcome.is_err() {
            return;
        }
    }
}

/// One chat turn: forward `text` and relay every token in arrival order.
/// Agent failures end the turn with a single error response.
async fn exchange(session: &ClientSession, text: &str) -> Result<(), SessionClosed> {
    let Some(agent) = session.bindings.agent.clone() else {
        warn!(session_id = %session.id, "Chat request rejected: agent binding unavailable");
        return session
            .enqueue_response(agent_failure(&AgentError::Unavailable))
            .await;
    };

    let started = tokio::select! {
        biased;
        () = session.cancel.cancelled() => return Err(SessionClosed),
        started = agent.stream_chat(text, &session.id) => started,
    };
    let mut tokens = match started {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(session_id = %session.id, "Agent call failed: {e}");
            return session.enqueue_response(agent_failure(&e)).await;
        }
    };

    let mut relayed = 0usize;
    loop {
        // Returning here drops `tokens`, which cancels the agent call.
        let next = tokio::select! {
            biased;
            () = session.cancel.cancelled() => return Err(SessionClosed),
            next = next_token(&mut tokens, session.policy.agent_token_timeout) => next,
        };
        match next {
            None => break,
            Some(Ok(token)) => {
                relayed += 1;
                session.enqueue_response(token_response(token)).await?;
            }
            Some(Err(e)) => {
                warn!(session_id = %session.id, relayed, "Agent stream failed: {e}");
                return session.enqueue_response(agent_failure(&e)).await;
            }
        }
    }

    debug!(session_id = %session.id, relayed, "Chat turn complete");
    Ok(())
}

async fn next_token(
    tokens: &mut TokenStream,
    timeout: Option<Duration>,
) -> Option<Result<AgentToken, AgentError>> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, tokens.next())
            .await
            .unwrap_or(Some(Err(AgentError::Timeout(limit)))),
        None => tokens.next().await,
    }
}

fn agent_failure(e: &AgentError) -> OutboundResponse {
    OutboundResponse::error(
        Action::AgentResponse,
        StatusCode::INTERNAL_SERVER_ERROR,
        e.to_string(),
    )
}

/// Map one agent token to the response the client sees.
pub(super) fn token_response(token: AgentToken) -> OutboundResponse {
    match token {
        AgentToken::Text(text) => OutboundResponse::stream(Action::AgentResponse, text),
        AgentToken::Thinking(text) => OutboundResponse::stream(Action::ThinkingProcess, text),
        AgentToken::ToolResult(raw) => match ToolAction::parse(&raw) {
            Ok(ToolAction::ImageGeneration { message, images }) => {
                OutboundResponse::image_generation(message, images)
            }
            Ok(ToolAction::Unrecognized { action }) => {
                debug!(action = %action, "Unrecognized tool action");
                OutboundResponse::stream(Action::UnknownAction, raw)
            }
            Ok(ToolAction::Unstructured) => OutboundResponse::stream(Action::UnknownAction, raw),
            Err(e) => OutboundResponse::error(
                Action::ImageGeneration,
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            ),
        },
        AgentToken::Unknown { kind, content } => {
            debug!(kind = %kind, "Unknown agent token kind");
            OutboundResponse::stream(Action::UnknownAction, content)
        }
    }
}

pub(super) async fn writer(session: Arc<ClientSession>) {
    loop {
        let response = tokio::select! {
            biased;
            () = session.cancel.cancelled() => return,
            response = session.outbound.pop() => match response {
                Some(response) => response,
                None => return,
            },
        };

        let frames = codec::encode(response).unwrap_or_else(|e| {
            error!(session_id = %session.id, "Failed to serialize response: {e}");
            codec::encode_failure(&e)
        });

        let written = tokio::select! {
            biased;
            () = session.cancel.cancelled() => return,
            written = write_frames(&session, frames) => written,
        };
        if let Err(e) = written {
            error!(session_id = %session.id, "Write failed: {e}");
            session.mark_inactive();
            session.close(CloseReason::WriteFailed(e.to_string())).await;
            return;
        }
    }
}

async fn write_frames(
    session: &ClientSession,
    frames: Vec<OutFrame>,
) -> Result<(), ConnectionError> {
    let mut sink = session.sink.lock().await;
    for frame in frames {
        match frame {
            OutFrame::Text(text) => sink.send_text(text).await?,
            OutFrame::Binary(data) => sink.send_binary(data).await?,
        }
    }
    Ok(())
}
