//! HTTP router and server loop.
//!
//! | Method | Path             | Description                            |
//! |--------|------------------|----------------------------------------|
//! | GET    | `/api/health`    | Liveness probe                         |
//! | GET    | `server.ws_path` | WebSocket upgrade for client sessions  |

pub mod health;

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;
use crate::ws;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route(&state.config.server.ws_path, get(ws::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves, then run the gateway's
/// shutdown sequence before the listener stops.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let gateway = state.gateway.clone();
    let app = router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        info!("Shutting down...");
        gateway.shutdown().await;
    })
    .await
}
