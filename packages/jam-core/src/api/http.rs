//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the coordinator.

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::response::{api_created, api_error, api_ok, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{JamError, JamResult};
use crate::protocol_constants::SERVICE_ID;
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateJamRequest {
    host_id: String,
    track_id: String,
    #[serde(default)]
    position: i64,
}

#[derive(Deserialize)]
struct LeaveJamRequest {
    user_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.trusted_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/jams", post(create_jam))
        .route("/api/jams/{room_id}", get(get_jam))
        .route("/api/jams/{room_id}/leave", post(leave_jam))
        .route("/ws/{room_id}", get(ws_handler))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(trusted_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if trusted_origins.is_empty() {
        return base.allow_origin(Any);
    }

    let trusted = trusted_origins.to_vec();
    log::info!("[HTTP] CORS trusted origins: {:?}", trusted);
    base.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let origin = origin.to_str().unwrap_or("");
        trusted.iter().any(|allowed| origin.starts_with(allowed.as_str()))
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "timestamp": now_millis(),
        "connections": state.ws_manager.connection_count(),
        "subscriptions": state.coordinator.subscriptions().active_count()
    }))
}

/// Ready once the Session Store answers.
async fn readiness_check(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => api_success(json!({ "status": "ready", "ready": true })).into_response(),
        Err(e) => {
            log::warn!("[HTTP] Readiness probe failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not_ready", "ready": false, "reason": e.to_string() })),
            )
                .into_response()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Jams
// ─────────────────────────────────────────────────────────────────────────────

async fn create_jam(
    State(state): State<AppState>,
    Json(body): Json<CreateJamRequest>,
) -> JamResult<impl IntoResponse> {
    let (room_id, host_id) = state
        .coordinator
        .create_jam(&body.host_id, &body.track_id, body.position)
        .await?;
    Ok(api_created(json!({ "room_id": room_id, "host_id": host_id })))
}

/// Current `init` snapshot without joining.
async fn get_jam(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> JamResult<impl IntoResponse> {
    let snapshot = state
        .coordinator
        .repository()
        .snapshot(&room_id)
        .await?
        .ok_or(JamError::RoomNotFound(room_id))?;
    Ok(api_success(snapshot))
}

async fn leave_jam(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(body): Json<LeaveJamRequest>,
) -> JamResult<impl IntoResponse> {
    state.coordinator.leave_jam(&room_id, &body.user_id).await?;
    Ok(api_ok())
}

async fn not_found() -> impl IntoResponse {
    api_error(StatusCode::NOT_FOUND, "not_found", "No such route")
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::spawn_test_server;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn health_reports_service() {
        let server = spawn_test_server().await;
        let body: Value = reqwest::get(format!("{}/health", server.base_url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "jam-sync");
    }

    #[tokio::test]
    async fn ready_follows_store_availability() {
        let server = spawn_test_server().await;
        let url = format!("{}/ready", server.base_url);

        assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);
        server.services.store.set_available(false);
        assert_eq!(reqwest::get(&url).await.unwrap().status(), 503);
    }

    #[tokio::test]
    async fn create_then_snapshot_then_close() {
        let server = spawn_test_server().await;
        let client = reqwest::Client::new();

        let created = client
            .post(format!("{}/api/jams", server.base_url))
            .json(&json!({ "host_id": "h1", "track_id": "t1", "position": 1000 }))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), 201);
        let created: Value = created.json().await.unwrap();
        assert_eq!(created["host_id"], "h1");
        let room_id = created["room_id"].as_str().unwrap().to_string();

        let snapshot: Value = client
            .get(format!("{}/api/jams/{}", server.base_url, room_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(snapshot["type"], "init");
        assert_eq!(snapshot["track_id"], "t1");
        assert_eq!(snapshot["position"], 1000);
        assert_eq!(snapshot["paused"], true);

        let left = client
            .post(format!("{}/api/jams/{}/leave", server.base_url, room_id))
            .json(&json!({ "user_id": "h1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(left.status(), 200);

        let gone = client
            .get(format!("{}/api/jams/{}", server.base_url, room_id))
            .send()
            .await
            .unwrap();
        assert_eq!(gone.status(), 404);
        let body: Value = gone.json().await.unwrap();
        assert_eq!(body["error"], "room_not_found");
    }

    #[tokio::test]
    async fn invalid_create_is_bad_request() {
        let server = spawn_test_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/jams", server.base_url))
            .json(&json!({ "host_id": " ", "track_id": "t1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let server = spawn_test_server().await;
        let resp = reqwest::get(format!("{}/nope", server.base_url))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "not_found");
    }
}
