//! HTTP surface of the LiveShare relay
//!
//! Routes:
//! - `GET  /health` - liveness and room count
//! - `GET  /api/rooms` - rooms with their member counts
//! - `POST /api/rooms/{room_id}/end` - terminate a room and notify its members
//!
//! Any WebSocket upgrade, whatever its path, is taken by `websocket_gate` and
//! bound to the room named by its first path segment; an empty segment is
//! closed with code 1008.
//!
//! The administrative routes carry no authentication; CORS allows any origin.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::{Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::control::end_room;
use super::protocol::{HealthResponse, RoomListResponse};
use super::room::RoomRegistry;
use super::websocket::{decode_room_id, websocket_gate};
use crate::core::config::Config;

// ============================================================================
// Application State
// ============================================================================

/// Shared state for the relay and its administrative routes
#[derive(Clone)]
pub struct RelayState {
    /// Room registry shared by every connection and the control endpoint
    pub registry: Arc<RoomRegistry>,
    /// Runtime settings
    pub config: Arc<Config>,
    /// Process start, for the health report
    started_at: Instant,
}

impl RelayState {
    /// Create relay state with an empty registry
    pub fn new(config: Config) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::new()),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Seconds since the state was created
    pub fn uptime(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the full relay router
pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health).options(preflight))
        .route("/api/rooms", get(list_rooms).options(preflight))
        .route(
            "/api/rooms/{room_id}/end",
            post(end_room_handler).options(preflight),
        )
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), websocket_gate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// API Handlers
// ============================================================================

/// Health report
///
/// GET /health
async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    Json(HealthResponse::healthy(
        state.registry.room_count(),
        state.uptime(),
    ))
}

/// List active rooms
///
/// GET /api/rooms
async fn list_rooms(State(state): State<RelayState>) -> impl IntoResponse {
    Json(RoomListResponse {
        rooms: state.registry.list_rooms(),
        total_clients: state.registry.total_member_count(),
    })
}

/// End a room
///
/// POST /api/rooms/{room_id}/end
///
/// Response: EndRoomResponse (200 OK), or `{ error }` (500)
async fn end_room_handler(State(state): State<RelayState>, uri: Uri) -> Response {
    let room_id = control_room_id(uri.path());

    match end_room(&state.registry, &room_id, state.config.send_timeout).await {
        Ok(summary) => (StatusCode::OK, Json(summary.to_response(&room_id))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Room id from `/api/rooms/{room_id}/end`, decoded like the WebSocket path
fn control_room_id(path: &str) -> String {
    path.strip_prefix("/api/rooms/")
        .and_then(|rest| rest.strip_suffix("/end"))
        .map(decode_room_id)
        .unwrap_or_default()
}

/// Answer a bare `OPTIONS` request
async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Unmatched plain HTTP requests
async fn fallback(method: Method) -> StatusCode {
    if method == Method::OPTIONS {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

// ============================================================================
// Tests
// ============================================================================
