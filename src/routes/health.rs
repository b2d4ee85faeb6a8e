//! Health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health`: liveness probe.
///
/// Reports `shutting_down` once the gateway stopped admitting connections,
/// plus live session count and which collaborators are wired.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let gateway = &state.gateway;
    let status = if gateway.is_accepting() {
        "ok"
    } else {
        "shutting_down"
    };

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "sessions": gateway.session_count().await,
        "agent": gateway.agent_available(),
        "speech": gateway.speech_available(),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::agent::AgentError;
    use crate::config::Config;
    use crate::gateway::Gateway;
    use crate::sessions::SessionPolicy;
    use crate::AppState;

    fn state() -> AppState {
        let gateway = Gateway::new(
            Err(AgentError::Config("agent.url is not set".to_string())),
            None,
            SessionPolicy::default(),
            Duration::from_millis(100),
        );
        AppState::new(Config::default(), gateway)
    }

    async fn get_health(state: AppState) -> serde_json::Value {
        let resp = crate::routes::router(state)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_degraded_bindings() {
        let body = get_health(state()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["agent"], false);
        assert_eq!(body["speech"], false);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_health_after_shutdown() {
        let state = state();
        state.gateway.shutdown().await;
        assert_eq!(get_health(state).await["status"], "shutting_down");
    }
}
