//! Wire types for the LiveShare relay
//!
//! Relay traffic itself is opaque and never modelled here. This module only
//! defines the messages the server originates (room notices) and the JSON bodies
//! of the administrative REST API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Type Aliases
// ============================================================================

/// Room identifier, taken verbatim from the connection path
pub type RoomId = String;

/// Per-connection identifier, assigned at accept time
pub type ConnectionId = Uuid;

// ============================================================================
// Close Reasons
// ============================================================================

/// Close reason sent when the connection path carries no room identifier
pub const ROOM_ID_REQUIRED: &str = "Room ID required";

/// Close reason sent to every connection on server shutdown
pub const SERVER_SHUTTING_DOWN: &str = "Server shutting down";

/// Close reason sent when a connection misses its heartbeat
pub const HEARTBEAT_TIMEOUT: &str = "Heartbeat timeout";

/// Human-readable reason carried by the room-ended notice
pub const ROOM_ENDED_MESSAGE: &str = "This room has been ended by an administrator";

// ============================================================================
// Server Notices
// ============================================================================

/// Server-to-client notices, sent as JSON text frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerNotice {
    /// The room was terminated through the control endpoint
    #[serde(rename_all = "camelCase")]
    RoomEnded {
        room_id: RoomId,
        message: String,
        /// ISO 8601, UTC, millisecond precision
        timestamp: String,
    },
}

impl ServerNotice {
    /// Build a room-ended notice stamped with the current time
    pub fn room_ended(room_id: impl Into<RoomId>, message: impl Into<String>) -> Self {
        Self::RoomEnded {
            room_id: room_id.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

// ============================================================================
// REST API DTOs
// ============================================================================

/// Result of `POST /api/rooms/{room_id}/end`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRoomResponse {
    pub success: bool,
    pub message: String,
    /// Members that received the room-ended notice
    pub notified_clients: usize,
    /// Members skipped because their transport was already closed
    pub closed_clients: usize,
    /// Members present when the room was terminated
    pub total_clients: usize,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub active_rooms: usize,
    /// Seconds since the server started
    pub uptime: f64,
}

impl HealthResponse {
    pub fn healthy(active_rooms: usize, uptime: f64) -> Self {
        Self {
            status: "healthy".to_string(),
            active_rooms,
            uptime,
        }
    }
}

/// One entry of the room listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub clients: usize,
}

/// Body of `GET /api/rooms`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListResponse {
    pub rooms: Vec<RoomSummary>,
    pub total_clients: usize,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
