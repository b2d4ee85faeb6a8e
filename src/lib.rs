#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! # scenewire
//!
//! Session and wire-protocol layer for a conversational 3D-scene assistant.
//!
//! Clients connect over WebSocket and send chat text, optionally announced
//! by a meta frame, or voice input as an audio meta frame followed by a
//! binary payload. Each connection gets a [`ClientSession`] that relays the
//! message to the shared agent and streams every token back as a JSON
//! response, with generated images as binary frames.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          entry point, clap subcommands, tracing, signal handling
//! config.rs        TOML + env-var configuration
//! gateway.rs       session roster, admission, graceful shutdown
//! connection.rs    transport-agnostic frame stream + sink
//! routes/
//!   mod.rs         router and server loop
//!   health.rs      GET /api/health
//! ws/
//!   mod.rs         WebSocket upgrade, socket → Connection adapter
//!   codec.rs       inbound/outbound message shapes and framing
//!   fsm.rs         ExpectationState protocol machine
//! sessions/
//!   mod.rs         ClientSession (start, close, join)
//!   tasks.rs       reader, processor, writer loops
//!   queue.rs       SessionQueue with Notify wakeup
//! agent/
//!   mod.rs         Agent trait, tokens, errors
//!   action.rs      structured tool actions (image generation)
//!   http.rs        NDJSON streaming HTTP agent
//! speech.rs        SpeechToText trait + HTTP client
//! ```

pub mod agent;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod routes;
pub mod sessions;
pub mod speech;
pub mod state;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use gateway::Gateway;
pub use sessions::{ClientSession, SessionPolicy};
pub use state::AppState;
