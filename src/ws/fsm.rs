//! Inbound protocol state machine.
//!
//! Each received [`Frame`] is classified against the session's
//! [`ExpectationState`]. The machine never terminates: every completed
//! exchange (or rejected frame) returns it to `Idle`.
//!
//! | State         | Frame                  | Step          | Next          |
//! |---------------|------------------------|---------------|---------------|
//! | Idle          | text, meta `audio`     | `Expect`      | AwaitingAudio |
//! | Idle          | text, meta `text`      | `Expect`      | AwaitingText  |
//! | Idle          | text, plain            | `Chat`        | Idle          |
//! | Idle          | binary                 | `Reject`      | Idle          |
//! | AwaitingText  | text                   | `Chat`        | Idle          |
//! | AwaitingText  | binary                 | `Reject`      | Idle          |
//! | AwaitingAudio | binary                 | `Transcribe`  | Idle          |
//! | AwaitingAudio | text                   | `Reject`      | Idle          |
//! | any           | unsupported            | `Reject`      | Idle          |
//! | any           | invalid meta / empty   | `Reject`      | Idle          |

use crate::connection::Frame;

use super::codec::{self, IdleText, MetaKind, ValidationError};

/// What the reader expects next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpectationState {
    #[default]
    Idle,
    AwaitingAudio,
    AwaitingText,
}

/// Frames the machine refuses. All map to a `400` response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),
    #[error("expected an audio frame after an audio meta frame, got text")]
    TextWhileAwaitingAudio,
    #[error("binary frame received without a preceding audio meta frame")]
    UnexpectedBinary,
    #[error("unsupported frame kind: {0}")]
    UnsupportedFrame(&'static str),
}

/// The reader's next move for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A meta frame was accepted; nothing to emit yet.
    Expect,
    /// Queue a chat request.
    Chat(String),
    /// Convert this audio to text, then queue it as chat.
    Transcribe(Vec<u8>),
    /// Answer with an error response.
    Reject(ProtocolError),
}

/// Pure transition function. Total over every `(state, frame)` pair.
pub fn advance(state: ExpectationState, frame: Frame) -> (ExpectationState, Step) {
    use ExpectationState::{AwaitingAudio, AwaitingText, Idle};

    match (state, frame) {
        (_, Frame::Unsupported(kind)) => {
            (Idle, Step::Reject(ProtocolError::UnsupportedFrame(kind)))
        }
        (Idle, Frame::Text(text)) => match codec::classify_idle_text(&text) {
            Ok(IdleText::Meta(MetaKind::Audio)) => (AwaitingAudio, Step::Expect),
            Ok(IdleText::Meta(MetaKind::Text)) => (AwaitingText, Step::Expect),
            Ok(IdleText::Chat(text)) => (Idle, Step::Chat(text)),
            Err(e) => (Idle, Step::Reject(e.into())),
        },
        (AwaitingText, Frame::Text(text)) => match codec::chat_text(&text) {
            Ok(text) => (Idle, Step::Chat(text)),
            Err(e) => (Idle, Step::Reject(e.into())),
        },
        (AwaitingAudio, Frame::Binary(audio)) => {
            if audio.is_empty() {
                let err = ValidationError::new("audio payload is empty");
                (Idle, Step::Reject(err.into()))
            } else {
                (Idle, Step::Transcribe(audio))
            }
        }
        (AwaitingAudio, Frame::Text(_)) => {
            (Idle, Step::Reject(ProtocolError::TextWhileAwaitingAudio))
        }
        (Idle | AwaitingText, Frame::Binary(_)) => {
            (Idle, Step::Reject(ProtocolError::UnexpectedBinary))
        }
    }
}

/// Session-local holder of the current [`ExpectationState`].
#[derive(Debug, Default)]
pub struct ProtocolMachine {
    state: ExpectationState,
}

impl ProtocolMachine {
    pub fn state(&self) -> ExpectationState {
        self.state
    }

    pub fn feed(&mut self, frame: Frame) -> Step {
        let (next, step) = advance(self.state, frame);
        self.state = next;
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    #[test]
    fn test_text_meta_then_chat() {
        let mut m = ProtocolMachine::default();
        assert_eq!(m.feed(text(r#"{"type":"text"}"#)), Step::Expect);
        assert_eq!(m.state(), ExpectationState::AwaitingText);
        assert_eq!(m.feed(text("hello")), Step::Chat("hello".to_string()));
        assert_eq!(m.state(), ExpectationState::Idle);
    }

    #[test]
    fn test_text_after_text_meta_may_look_like_json() {
        let mut m = ProtocolMachine::default();
        m.feed(text(r#"{"type":"text"}"#));
        assert_eq!(
            m.feed(text(r#"{"scene": "forest"}"#)),
            Step::Chat(r#"{"scene": "forest"}"#.to_string())
        );
    }

    #[test]
    fn test_plain_chat_without_meta() {
        let mut m = ProtocolMachine::default();
        assert_eq!(m.feed(text("a red cube")), Step::Chat("a red cube".to_string()));
        assert_eq!(m.state(), ExpectationState::Idle);
    }

    #[test]
    fn test_binary_without_meta_is_rejected() {
        let mut m = ProtocolMachine::default();
        assert_eq!(
            m.feed(Frame::Binary(vec![0, 1])),
            Step::Reject(ProtocolError::UnexpectedBinary)
        );
        assert_eq!(m.state(), ExpectationState::Idle);
    }

    #[test]
    fn test_audio_meta_then_binary() {
        let mut m = ProtocolMachine::default();
        assert_eq!(m.feed(text(r#"{"type":"audio"}"#)), Step::Expect);
        assert_eq!(m.state(), ExpectationState::AwaitingAudio);
        assert_eq!(m.feed(Frame::Binary(vec![9, 9])), Step::Transcribe(vec![9, 9]));
        assert_eq!(m.state(), ExpectationState::Idle);
    }

    #[test]
    fn test_text_while_awaiting_audio_resets() {
        let mut m = ProtocolMachine::default();
        m.feed(text(r#"{"type":"audio"}"#));
        assert_eq!(
            m.feed(text("hello")),
            Step::Reject(ProtocolError::TextWhileAwaitingAudio)
        );
        assert_eq!(m.state(), ExpectationState::Idle);
    }

    #[test]
    fn test_binary_while_awaiting_text_resets() {
        let mut m = ProtocolMachine::default();
        m.feed(text(r#"{"type":"text"}"#));
        assert_eq!(
            m.feed(Frame::Binary(vec![1])),
            Step::Reject(ProtocolError::UnexpectedBinary)
        );
        assert_eq!(m.state(), ExpectationState::Idle);
    }

    #[test]
    fn test_malformed_meta_then_plain_chat() {
        let mut m = ProtocolMachine::default();
        assert!(matches!(
            m.feed(text("{not json")),
            Step::Reject(ProtocolError::Validation(_))
        ));
        assert_eq!(m.state(), ExpectationState::Idle);
        assert_eq!(m.feed(text("hello")), Step::Chat("hello".to_string()));
    }

    #[test]
    fn test_empty_audio_is_rejected() {
        let mut m = ProtocolMachine::default();
        m.feed(text(r#"{"type":"audio"}"#));
        assert!(matches!(
            m.feed(Frame::Binary(Vec::new())),
            Step::Reject(ProtocolError::Validation(_))
        ));
        assert_eq!(m.state(), ExpectationState::Idle);
    }

    #[test]
    fn test_every_state_and_frame_kind_has_an_outcome() {
        let states = [
            ExpectationState::Idle,
            ExpectationState::AwaitingAudio,
            ExpectationState::AwaitingText,
        ];
        let frames = [
            text("hello"),
            text(""),
            text(r#"{"type":"audio"}"#),
            text(r#"{"type":"text"}"#),
            text("{not json"),
            Frame::Binary(vec![1, 2, 3]),
            Frame::Binary(Vec::new()),
            Frame::Unsupported("ping"),
        ];
        for state in states {
            for frame in frames.clone() {
                let (next, step) = advance(state, frame.clone());
                // Only an accepted meta frame leaves the machine outside Idle.
                if next != ExpectationState::Idle {
                    assert_eq!(state, ExpectationState::Idle, "{frame:?}");
                    assert_eq!(step, Step::Expect);
                }
                if step == Step::Expect {
                    assert_ne!(next, ExpectationState::Idle);
                }
            }
        }
    }

    #[test]
    fn test_unsupported_frame_in_any_state() {
        for start in [r#"{"type":"audio"}"#, r#"{"type":"text"}"#, "x"] {
            let mut m = ProtocolMachine::default();
            m.feed(text(start));
            assert_eq!(
                m.feed(Frame::Unsupported("ping")),
                Step::Reject(ProtocolError::UnsupportedFrame("ping"))
            );
            assert_eq!(m.state(), ExpectationState::Idle);
        }
    }
}
