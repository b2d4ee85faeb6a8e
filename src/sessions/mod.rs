//! Per-connection client sessions.
//!
//! A [`ClientSession`] owns one [`Connection`] and runs three tasks over it:
//!
//! - **reader**: pulls frames, drives the [`ProtocolMachine`], queues chat
//!   requests (or error responses for bad frames)
//! - **processor**: takes one request at a time, streams the agent's tokens
//!   into responses
//! - **writer**: drains responses to the connection in FIFO order
//!
//! ```text
//! frames ──► reader ──► inbound ──► processor ──► outbound ──► writer ──► sink
//!               └──────── error responses ──────────┘
//! ```
//!
//! ## Shutdown
//!
//! [`ClientSession::close`] runs its body exactly once, whoever calls it
//! first (reader on disconnect, writer on write failure, gateway on
//! shutdown). It cancels the session token, which every task observes at its
//! next suspension point, closes the sink (bounded by the policy's close
//! timeout), drains both queues, and finally fires the one-shot
//! [`DisconnectSignal`].
//!
//! [`ProtocolMachine`]: crate::ws::fsm::ProtocolMachine

pub mod queue;
mod tasks;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::config::SessionConfig;
use crate::connection::{Connection, FrameSink};
use crate::speech::SpeechToText;
use crate::ws::codec::OutboundResponse;
use queue::{QueueClosed, SessionQueue};

/// A request the processor acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRequest {
    Chat { text: String },
}

/// Collaborators shared by every session.
#[derive(Clone, Default)]
pub struct Bindings {
    /// `None` when the agent could not be wired at startup.
    pub agent: Option<Arc<dyn Agent>>,
    /// `None` when voice input is disabled.
    pub speech: Option<Arc<dyn SpeechToText>>,
}

/// Queue bounds and timeouts applied to each session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub inbound_capacity: Option<usize>,
    pub outbound_capacity: Option<usize>,
    pub agent_token_timeout: Option<Duration>,
    /// How long `close()` waits for the connection to close.
    pub close_timeout: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl SessionPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            inbound_capacity: (config.inbound_capacity > 0).then_some(config.inbound_capacity),
            outbound_capacity: (config.outbound_capacity > 0).then_some(config.outbound_capacity),
            agent_token_timeout: config.agent_token_timeout(),
            close_timeout: config.close_timeout(),
        }
    }
}

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    RemoteClosed,
    ReadFailed(String),
    WriteFailed(String),
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteClosed => write!(f, "remote closed"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// The session stopped while a task was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session closed")]
pub struct SessionClosed;

impl From<QueueClosed> for SessionClosed {
    fn from(_: QueueClosed) -> Self {
        Self
    }
}

/// Fires once the session's close sequence has finished.
pub struct DisconnectSignal(oneshot::Receiver<()>);

impl DisconnectSignal {
    pub async fn wait(self) {
        // A dropped sender means the session is gone too.
        let _ = self.0.await;
    }
}

pub struct ClientSession {
    id: String,
    peer: String,
    bindings: Bindings,
    policy: SessionPolicy,
    inbound: SessionQueue<InboundRequest>,
    outbound: SessionQueue<OutboundResponse>,
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    active: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    disconnected: Mutex<Option<oneshot::Sender<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ClientSession {
    /// Take ownership of `connection` and spawn the reader, processor, and
    /// writer tasks.
    pub fn start(
        connection: Connection,
        bindings: Bindings,
        policy: SessionPolicy,
    ) -> (Arc<Self>, DisconnectSignal) {
        let Connection { frames, sink, peer } = connection;
        let (disconnect_tx, disconnect_rx) = oneshot::channel();

        let session = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            peer,
            bindings,
            policy,
            inbound: SessionQueue::new(policy.inbound_capacity),
            outbound: SessionQueue::new(policy.outbound_capacity),
            sink: tokio::sync::Mutex::new(sink),
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            disconnected: Mutex::new(Some(disconnect_tx)),
            tasks: Mutex::new(Vec::with_capacity(3)),
        });

        let reader = tokio::spawn(tasks::reader(Arc::clone(&session), frames));
        let processor = tokio::spawn(tasks::processor(Arc::clone(&session)));
        let writer = tokio::spawn(tasks::writer(Arc::clone(&session)));
        lock(&session.tasks).extend([reader, processor, writer]);

        info!(session_id = %session.id, peer = %session.peer, "Client session started");
        (session, DisconnectSignal(disconnect_rx))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `false` once the session hit a fatal error or started closing.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear the session down. Only the first call does anything.
    pub async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(session_id = %self.id, %reason, "Close already in progress");
            return;
        }
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let closed = tokio::time::timeout(self.policy.close_timeout, async {
            self.sink.lock().await.close().await
        })
        .await;
        match closed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session_id = %self.id, "Connection close failed: {e}"),
            Err(_) => warn!(
                session_id = %self.id,
                timeout = ?self.policy.close_timeout,
                "Connection did not close in time, abandoning it"
            ),
        }

        let discarded = self.inbound.drain() + self.outbound.drain();

        if let Some(tx) = lock(&self.disconnected).take() {
            let _ = tx.send(());
        }
        info!(session_id = %self.id, %reason, discarded, "Client session closed");
    }

    /// Wait for all three tasks to finish. Must not be called from one of
    /// the session's own tasks.
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *lock(&self.tasks));
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(session_id = %self.id, "Session task panicked: {e}");
                }
            }
        }
    }

    pub(crate) fn mark_inactive(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Queue a request for the processor. Suspends while the inbound queue
    /// is full.
    async fn enqueue_request(&self, request: InboundRequest) -> Result<(), SessionClosed> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionClosed),
            pushed = self.inbound.push(request) => pushed.map_err(SessionClosed::from),
        }
    }

    /// Queue a response for the writer. Suspends while the outbound queue
    /// is full.
    async fn enqueue_response(&self, response: OutboundResponse) -> Result<(), SessionClosed> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionClosed),
            pushed = self.outbound.push(response) => pushed.map_err(SessionClosed::from),
        }
    }
}
