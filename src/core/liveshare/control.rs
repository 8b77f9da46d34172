//! Room termination
//!
//! Ending a room removes it from the registry first and only then notifies the
//! members it had, so any message they send afterwards finds no room to relay to.
//! Member transports are left open; clients are expected to disconnect once they
//! see the notice. Until then their frames are dropped.

use std::time::Duration;

use axum::extract::ws::Message;
use futures::future::join_all;

use super::error::{RelayError, SendError};
use super::protocol::{EndRoomResponse, ROOM_ENDED_MESSAGE, ServerNotice};
use super::room::{Connection, RoomRegistry};

/// Outcome of terminating a room
///
/// `notified + closed + undelivered == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndRoomSummary {
    /// Members that received the notice
    pub notified: usize,
    /// Members whose transport was already closed
    pub closed: usize,
    /// Open members whose outbound queue stayed full for the whole send timeout
    pub undelivered: usize,
    /// Members present when the room was removed
    pub total: usize,
}

impl EndRoomSummary {
    /// Convert to the REST response body
    pub fn to_response(self, room_id: &str) -> EndRoomResponse {
        EndRoomResponse {
            success: true,
            message: format!("Room {} has been ended", room_id),
            notified_clients: self.notified,
            closed_clients: self.closed,
            total_clients: self.total,
        }
    }
}

/// Terminate a room and notify everyone who was in it
///
/// Notices are queued for all members at once, each waiting at most
/// `send_timeout` for space in that member's outbound queue, so the call takes
/// at most one timeout however many members are stuck.
pub async fn end_room(
    registry: &RoomRegistry,
    room_id: &str,
    send_timeout: Duration,
) -> Result<EndRoomSummary, RelayError> {
    let notice = serde_json::to_string(&ServerNotice::room_ended(room_id, ROOM_ENDED_MESSAGE))?;
    let members = registry.terminate(room_id);

    let results = join_all(members.iter().map(|m| notify(m, &notice, send_timeout))).await;

    let mut summary = EndRoomSummary {
        total: members.len(),
        ..Default::default()
    };

    for (member, result) in members.iter().zip(results) {
        match result {
            Ok(()) => summary.notified += 1,
            Err(SendError::Closed) => summary.closed += 1,
            Err(e) => {
                tracing::warn!(
                    room_id = %room_id,
                    connection_id = %member.id,
                    error = %e,
                    "Failed to deliver room-ended notice"
                );
                summary.undelivered += 1;
            }
        }
    }

    tracing::info!(
        room_id = %room_id,
        notified = summary.notified,
        closed = summary.closed,
        undelivered = summary.undelivered,
        total = summary.total,
        "Room ended"
    );

    Ok(summary)
}

async fn notify(
    member: &Connection,
    notice: &str,
    send_timeout: Duration,
) -> Result<(), SendError> {
    if !member.is_open() {
        return Err(SendError::Closed);
    }
    member
        .send_timeout(Message::Text(notice.into()), send_timeout)
        .await
}
