//! Health, liveness, readiness, and discovery endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use docintake_core::WireSchema;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// `GET /`: a constant acknowledgement that the server is up.
pub async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({ "success": true }))
}

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body indicates
/// whether the server is actually healthy, so monitoring tools can tell
/// "up but draining" apart from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let connections = state.registry.count();
    let in_flight = state.shutdown.in_flight_count();
    let uptime_secs = state.start_time.elapsed().as_secs();

    Json(json!({
        "state": health.as_str(),
        "service": state.server.service_name,
        "connections": connections,
        "in_flight": in_flight,
        "uptime_secs": uptime_secs,
    }))
}

/// Liveness probe -- always returns 200 OK.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- 200 when ready, 503 while starting, draining or stopped.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// `GET /schemas`: every registered wire schema, sorted by id.
pub async fn schemas_handler(State(state): State<AppState>) -> Json<Vec<WireSchema>> {
    Json(state.schemas.snapshot())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::network::{test_state, ShutdownController};
    use crate::service::DependencyGraph;

    fn starting_state() -> AppState {
        AppState {
            shutdown: Arc::new(ShutdownController::new()),
            ..test_state(DependencyGraph::empty())
        }
    }

    #[tokio::test]
    async fn root_acknowledges() {
        assert_eq!(root_handler().await.0, json!({"success": true}));
    }

    #[tokio::test]
    async fn health_handler_returns_json_with_all_fields() {
        let response = health_handler(State(test_state(DependencyGraph::empty()))).await;
        let json = response.0;

        assert_eq!(json["state"], "ready");
        assert_eq!(json["service"], "docintake");
        assert_eq!(json["connections"], 0);
        assert_eq!(json["in_flight"], 0);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_handler_reports_starting_state() {
        let response = health_handler(State(starting_state())).await;
        assert_eq!(response.0["state"], "starting");
    }

    #[tokio::test]
    async fn health_handler_reports_draining_state() {
        let state = test_state(DependencyGraph::empty());
        state.shutdown.trigger_shutdown();

        let response = health_handler(State(state)).await;
        assert_eq!(response.0["state"], "draining");
    }

    #[tokio::test]
    async fn health_handler_reports_connection_count() {
        let state = test_state(DependencyGraph::empty());
        let _handle = state.registry.register("/api/v1/legal-advice/stream");

        let response = health_handler(State(state)).await;
        assert_eq!(response.0["connections"], 1);
    }

    #[tokio::test]
    async fn health_handler_reports_in_flight_count() {
        let state = test_state(DependencyGraph::empty());
        let _guard = state.shutdown.in_flight_guard();

        let response = health_handler(State(state)).await;
        assert_eq!(response.0["in_flight"], 1);
    }

    #[tokio::test]
    async fn liveness_handler_always_returns_200() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let state = test_state(DependencyGraph::empty());
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            readiness_handler(State(starting_state())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn schemas_lists_registered_documents() {
        let state = test_state(DependencyGraph::empty());
        state
            .schemas
            .register("b_POST_request", json!({"type": "object"}))
            .unwrap();
        state
            .schemas
            .register("a_POST_request", json!({"type": "object"}))
            .unwrap();

        let listed = schemas_handler(State(state)).await.0;
        let ids: Vec<&str> = listed.iter().map(|schema| schema.id.as_str()).collect();
        assert_eq!(ids, vec!["a_POST_request", "b_POST_request"]);
        assert_eq!(listed[0].document["$id"], "a_POST_request");
    }
}
