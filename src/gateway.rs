//! Connection gateway and session roster.
//!
//! [`Gateway`] is the only owner of the roster. Every accepted connection
//! becomes a [`ClientSession`] that stays on the roster until its disconnect
//! signal fires. [`Gateway::shutdown`] stops admissions, closes every live
//! session, and waits (bounded by the grace period) for their tasks.
//!
//! ## Concurrency
//!
//! The roster is behind an `RwLock`. `accept` holds the write lock across the
//! admission check and insert, and `shutdown` flips the admission flag under
//! the same lock, so no session can slip in after the roster snapshot.
//!
//! ## Degraded start
//!
//! The shared agent binding is wired once at construction. If that fails the
//! gateway still accepts connections; sessions answer chat requests with an
//! error response until the process is restarted with a working binding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentError};
use crate::connection::Connection;
use crate::sessions::{Bindings, ClientSession, CloseReason, DisconnectSignal, SessionPolicy};
use crate::speech::SpeechToText;

/// Cloneable handle; all clones share one roster.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    roster: RwLock<HashMap<String, Arc<ClientSession>>>,
    bindings: Bindings,
    policy: SessionPolicy,
    accepting: AtomicBool,
    shutdown_grace: Duration,
}

impl Gateway {
    pub fn new(
        agent: Result<Arc<dyn Agent>, AgentError>,
        speech: Option<Arc<dyn SpeechToText>>,
        policy: SessionPolicy,
        shutdown_grace: Duration,
    ) -> Self {
        let agent = match agent {
            Ok(agent) => Some(agent),
            Err(e) => {
                warn!("Agent binding unavailable, starting degraded: {e}");
                None
            }
        };
        if speech.is_none() {
            info!("Speech-to-text disabled, audio frames will be answered with errors");
        }

        Self {
            inner: Arc::new(GatewayInner {
                roster: RwLock::new(HashMap::new()),
                bindings: Bindings { agent, speech },
                policy,
                accepting: AtomicBool::new(true),
                shutdown_grace,
            }),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn agent_available(&self) -> bool {
        self.inner.bindings.agent.is_some()
    }

    pub fn speech_available(&self) -> bool {
        self.inner.bindings.speech.is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.roster.read().await.len()
    }

    /// Start a session for `connection` and put it on the roster.
    ///
    /// Returns `None` (after closing the connection) once shutdown began.
    pub async fn accept(
        &self,
        mut connection: Connection,
    ) -> Option<(Arc<ClientSession>, DisconnectSignal)> {
        let mut roster = self.inner.roster.write().await;
        if !self.is_accepting() {
            drop(roster);
            debug!(peer = %connection.peer, "Refusing connection during shutdown");
            if let Err(e) = connection.sink.close().await {
                debug!(peer = %connection.peer, "Connection close failed: {e}");
            }
            return None;
        }

        let (session, signal) =
            ClientSession::start(connection, self.inner.bindings.clone(), self.inner.policy);
        roster.insert(session.id().to_string(), Arc::clone(&session));
        debug!(session_id = %session.id(), sessions = roster.len(), "Session added to roster");
        Some((session, signal))
    }

    /// Serve one connection until its session closes.
    pub async fn run_connection(&self, connection: Connection) {
        let Some((session, signal)) = self.accept(connection).await else {
            return;
        };
        signal.wait().await;
        self.remove(session.id()).await;
    }

    async fn remove(&self, session_id: &str) {
        let mut roster = self.inner.roster.write().await;
        if roster.remove(session_id).is_some() {
            debug!(session_id, sessions = roster.len(), "Session removed from roster");
        }
    }

    /// Stop admitting connections, close every live session, and clear the
    /// roster. Safe to call more than once.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<ClientSession>> = {
            let roster = self.inner.roster.write().await;
            self.inner.accepting.store(false, Ordering::SeqCst);
            roster.values().cloned().collect()
        };
        info!(sessions = sessions.len(), "Gateway shutting down");

        futures::future::join_all(sessions.iter().map(|s| s.close(CloseReason::Shutdown))).await;

        let joined = futures::future::join_all(sessions.iter().map(|s| s.join()));
        if tokio::time::timeout(self.inner.shutdown_grace, joined).await.is_err() {
            warn!(
                grace = ?self.inner.shutdown_grace,
                "Session tasks did not stop within the shutdown grace period"
            );
        }

        self.inner.roster.write().await.clear();
        info!("Gateway shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::StreamExt;

    use super::*;
    use crate::agent::{AgentToken, TokenStream};
    use crate::connection::{ConnectionError, FrameSink};
    use crate::connection::memory::pair;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn stream_chat(
            &self,
            text: &str,
            _session_id: &str,
        ) -> Result<TokenStream, AgentError> {
            let token = Ok(AgentToken::Text(text.to_uppercase()));
            Ok(futures::stream::iter([token]).boxed())
        }
    }

    /// A connection whose close never completes and whose peer never speaks.
    struct StalledSink;

    #[async_trait]
    impl FrameSink for StalledSink {
        async fn send_text(&mut self, _text: String) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn send_binary(&mut self, _data: Vec<u8>) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            futures::future::pending().await
        }
    }

    fn stalled_connection() -> Connection {
        Connection {
            frames: futures::stream::pending().boxed(),
            sink: Box::new(StalledSink),
            peer: "stalled".to_string(),
        }
    }

    fn gateway() -> Gateway {
        Gateway::new(
            Ok(Arc::new(EchoAgent)),
            None,
            SessionPolicy::default(),
            Duration::from_secs(1),
        )
    }

    async fn eventually_empty(gateway: &Gateway) {
        for _ in 0..100 {
            if gateway.session_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("roster never emptied");
    }

    #[tokio::test]
    async fn test_session_leaves_roster_on_disconnect() {
        let gw = gateway();
        let (connection, mut peer) = pair();

        let task = tokio::spawn({
            let gw = gw.clone();
            async move { gw.run_connection(connection).await }
        });

        peer.text("hi");
        assert_eq!(peer.next_written().await.json()["message"], "HI");
        assert_eq!(gw.session_count().await, 1);

        peer.disconnect();
        task.await.unwrap();
        assert_eq!(gw.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session() {
        let gw = gateway();
        let mut peers = Vec::new();
        let mut sessions = Vec::new();
        for _ in 0..3 {
            let (connection, peer) = pair();
            let (session, _signal) = gw.accept(connection).await.unwrap();
            peers.push(peer);
            sessions.push(session);
        }
        assert_eq!(gw.session_count().await, 3);

        gw.shutdown().await;

        assert!(!gw.is_accepting());
        assert_eq!(gw.session_count().await, 0);
        for (session, peer) in sessions.iter().zip(&peers) {
            assert!(session.is_closed());
            assert_eq!(peer.closes.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_shutdown_survives_a_stalled_connection() {
        let policy = SessionPolicy {
            close_timeout: Duration::from_millis(100),
            ..SessionPolicy::default()
        };
        let gw = Gateway::new(Ok(Arc::new(EchoAgent)), None, policy, Duration::from_secs(1));

        let (stalled, stalled_signal) = gw.accept(stalled_connection()).await.unwrap();
        let (connection, peer) = pair();
        let (healthy, _signal) = gw.accept(connection).await.unwrap();
        assert_eq!(gw.session_count().await, 2);

        tokio::time::timeout(Duration::from_secs(3), gw.shutdown())
            .await
            .expect("shutdown hung on a stalled connection");

        assert_eq!(gw.session_count().await, 0);
        assert!(stalled.is_closed());
        assert!(!stalled.is_active());
        assert!(healthy.is_closed());
        assert_eq!(peer.closes.load(Ordering::SeqCst), 1);
        tokio::time::timeout(Duration::from_secs(1), stalled_signal.wait())
            .await
            .expect("stalled session never signalled disconnect");
    }

    #[tokio::test]
    async fn test_refuses_connections_after_shutdown() {
        let gw = gateway();
        gw.shutdown().await;

        let (connection, peer) = pair();
        assert!(gw.accept(connection).await.is_none());
        assert_eq!(peer.closes.load(Ordering::SeqCst), 1);
        assert_eq!(gw.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_connection_returns_after_shutdown() {
        let gw = gateway();
        let (connection, _peer) = pair();
        let task = tokio::spawn({
            let gw = gw.clone();
            async move { gw.run_connection(connection).await }
        });

        for _ in 0..100 {
            if gw.session_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        gw.shutdown().await;

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("connection task did not finish")
            .unwrap();
        eventually_empty(&gw).await;
    }

    #[tokio::test]
    async fn test_degraded_start_still_accepts() {
        let gw = Gateway::new(
            Err(AgentError::Config("agent.url is not set".to_string())),
            None,
            SessionPolicy::default(),
            Duration::from_secs(1),
        );
        assert!(!gw.agent_available());
        assert!(gw.is_accepting());

        let (connection, mut peer) = pair();
        let (session, _signal) = gw.accept(connection).await.unwrap();

        peer.text("hello");
        let reply = peer.next_written().await.json();
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["code"], 500);
        assert!(session.is_active());
    }
}
