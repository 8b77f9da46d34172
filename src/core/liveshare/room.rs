//! Room registry for LiveShare
//!
//! This module owns the membership bookkeeping for the relay:
//! - `Connection`: the handle through which the relay reaches one client
//! - `RoomRegistry`: room id -> members, with rooms created on first bind and
//!   removed as soon as they become empty
//!
//! Every mutation goes through the `DashMap` entry lock of the affected room, so
//! bind, unbind and terminate on the same room are serialized while different
//! rooms proceed independently.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use uuid::Uuid;

use super::error::SendError;
use super::protocol::{ConnectionId, RoomId, RoomSummary};

// ============================================================================
// Connection
// ============================================================================

/// A live client connection bound to a room
///
/// Cloning is cheap; all clones share the same outbound queue. The queue is
/// drained by the connection's writer task, and once that task stops the
/// connection reports itself as closed.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Diagnostic identifier, unique per accepted socket
    pub id: ConnectionId,
    /// Room this connection belongs to
    pub room_id: RoomId,
    /// When the socket was accepted
    pub connected_at: DateTime<Utc>,
    /// Outbound queue feeding the socket writer
    tx: mpsc::Sender<Message>,
}

impl Connection {
    /// Create a connection handle for a room
    pub fn new(room_id: impl Into<RoomId>, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id: room_id.into(),
            connected_at: Utc::now(),
            tx,
        }
    }

    /// Whether the transport can still accept messages
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a message without waiting
    pub fn try_send(&self, msg: Message) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Queue a message, waiting at most `timeout` for room in the queue
    pub async fn send_timeout(&self, msg: Message, timeout: Duration) -> Result<(), SendError> {
        self.tx.send_timeout(msg, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => SendError::Timeout,
            SendTimeoutError::Closed(_) => SendError::Closed,
        })
    }

    /// Ask the writer to send a close frame and stop
    pub fn close(&self, code: u16, reason: &'static str) -> Result<(), SendError> {
        self.try_send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
    }
}

// ============================================================================
// Room Registry
// ============================================================================

type Members = HashMap<ConnectionId, Connection>;

/// Process-wide mapping of room id to its connected members
///
/// A room is present if and only if it has at least one member.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Members>,
}

impl RoomRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to its room, creating the room on first member
    ///
    /// Returns `false` if the connection was already a member.
    pub fn bind(&self, connection: Connection) -> bool {
        let mut members = self.rooms.entry(connection.room_id.clone()).or_default();
        if members.contains_key(&connection.id) {
            return false;
        }
        members.insert(connection.id, connection);
        true
    }

    /// Remove a connection from its room, deleting the room once empty
    ///
    /// Unknown rooms and members are ignored; the room may already have been
    /// terminated. Returns `true` if the connection was a member.
    pub fn unbind(&self, connection: &Connection) -> bool {
        let mut removed = false;
        self.rooms
            .remove_if_mut(&connection.room_id, |_, members| {
                removed = members.remove(&connection.id).is_some();
                members.is_empty()
            });
        removed
    }

    /// Snapshot of the current members of a room
    pub fn members(&self, room_id: &str) -> Vec<Connection> {
        self.rooms
            .get(room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a room and hand back the members it had at that instant
    pub fn terminate(&self, room_id: &str) -> Vec<Connection> {
        self.rooms
            .remove(room_id)
            .map(|(_, members)| members.into_values().collect())
            .unwrap_or_default()
    }

    /// Number of non-empty rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of members in one room
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of members across all rooms
    pub fn total_member_count(&self) -> usize {
        self.rooms.iter().map(|entry| entry.len()).sum()
    }

    /// All rooms with their member counts, ordered by room id
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|entry| RoomSummary {
                room_id: entry.key().clone(),
                clients: entry.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    /// Send a close frame to every member of every room
    ///
    /// Members stay registered until their own session observes the close.
    /// Returns the number of connections that accepted the close request.
    pub fn close_all(&self, code: u16, reason: &'static str) -> usize {
        let connections: Vec<Connection> = self
            .rooms
            .iter()
            .flat_map(|entry| entry.values().cloned().collect::<Vec<_>>())
            .collect();

        connections
            .iter()
            .filter(|conn| match conn.close(code, reason) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %conn.id,
                        room_id = %conn.room_id,
                        error = %e,
                        "Could not queue close frame"
                    );
                    false
                }
            })
            .count()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_connection(room_id: &str) -> (Connection, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(room_id, tx), rx)
    }

    #[test]
    fn test_bind_creates_room() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = test_connection("doc-1");

        assert!(registry.bind(conn.clone()));
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.member_count("doc-1"), 1);
        assert_eq!(registry.members("doc-1")[0].id, conn.id);
    }

    #[test]
    fn test_bind_is_idempotent() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = test_connection("doc-1");

        assert!(registry.bind(conn.clone()));
        assert!(!registry.bind(conn.clone()));
        assert_eq!(registry.member_count("doc-1"), 1);
    }

    #[test]
    fn test_unbind_last_member_deletes_room() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = test_connection("doc-1");
        let (b, _rx_b) = test_connection("doc-1");
        registry.bind(a.clone());
        registry.bind(b.clone());

        assert!(registry.unbind(&a));
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.member_count("doc-1"), 1);

        assert!(registry.unbind(&b));
        assert_eq!(registry.room_count(), 0);
        assert!(registry.members("doc-1").is_empty());
    }

    #[test]
    fn test_unbind_unknown_is_noop() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = test_connection("doc-1");
        let (stranger, _rx_s) = test_connection("doc-1");

        assert!(!registry.unbind(&a));

        registry.bind(a.clone());
        assert!(!registry.unbind(&stranger));
        assert_eq!(registry.member_count("doc-1"), 1);
    }

    #[test]
    fn test_members_of_unknown_room_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.members("nowhere").is_empty());
        assert_eq!(registry.member_count("nowhere"), 0);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = test_connection("room-a");
        let (b, _rx_b) = test_connection("room-b");
        registry.bind(a.clone());
        registry.bind(b.clone());

        let members_a = registry.members("room-a");
        assert_eq!(members_a.len(), 1);
        assert_eq!(members_a[0].id, a.id);
        assert_eq!(registry.room_count(), 2);
    }

    #[test]
    fn test_terminate_returns_members_and_removes_room() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = test_connection("doc-1");
        let (b, _rx_b) = test_connection("doc-1");
        registry.bind(a.clone());
        registry.bind(b.clone());

        let members = registry.terminate("doc-1");
        assert_eq!(members.len(), 2);
        assert_eq!(registry.room_count(), 0);
        assert!(registry.members("doc-1").is_empty());

        // A late unbind after termination must not resurrect the room
        assert!(!registry.unbind(&a));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_terminate_unknown_room() {
        let registry = RoomRegistry::new();
        assert!(registry.terminate("nowhere").is_empty());
    }

    #[test]
    fn test_never_holds_empty_room() {
        let registry = RoomRegistry::new();
        let mut live = Vec::new();

        // Interleave binds and unbinds across a few rooms
        for i in 0..60 {
            let room = format!("room-{}", i % 3);
            let (conn, rx) = test_connection(&room);
            registry.bind(conn.clone());
            live.push((conn, rx));

            if i % 2 == 1 {
                let (conn, _) = live.remove(0);
                registry.unbind(&conn);
            }

            for summary in registry.list_rooms() {
                assert!(summary.clients > 0, "room {} is empty", summary.room_id);
            }
        }

        for (conn, _) in live.drain(..) {
            registry.unbind(&conn);
        }
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_list_rooms_sorted() {
        let registry = RoomRegistry::new();
        let (b, _rx_b) = test_connection("beta");
        let (a1, _rx_a1) = test_connection("alpha");
        let (a2, _rx_a2) = test_connection("alpha");
        registry.bind(b);
        registry.bind(a1);
        registry.bind(a2);

        let rooms = registry.list_rooms();
        assert_eq!(
            rooms,
            vec![
                RoomSummary {
                    room_id: "alpha".to_string(),
                    clients: 2
                },
                RoomSummary {
                    room_id: "beta".to_string(),
                    clients: 1
                },
            ]
        );
        assert_eq!(registry.total_member_count(), 3);
    }

    #[test]
    fn test_connection_is_open_tracks_receiver() {
        let (conn, rx) = test_connection("doc-1");
        assert!(conn.is_open());

        drop(rx);
        assert!(!conn.is_open());
        assert_eq!(
            conn.try_send(Message::Binary(vec![1].into())),
            Err(SendError::Closed)
        );
    }

    #[test]
    fn test_try_send_reports_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new("doc-1", tx);

        assert!(conn.try_send(Message::Binary(vec![1].into())).is_ok());
        assert_eq!(
            conn.try_send(Message::Binary(vec![2].into())),
            Err(SendError::Full)
        );
    }

    #[test]
    fn test_close_all_queues_close_frames() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = test_connection("doc-1");
        let (b, rx_b) = test_connection("doc-2");
        registry.bind(a);
        registry.bind(b);
        drop(rx_b);

        assert_eq!(registry.close_all(1001, "bye"), 1);
        match rx_a.try_recv() {
            Ok(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("Expected close frame, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_bind_unbind_leaves_no_rooms() {
        let registry = Arc::new(RoomRegistry::new());
        let mut handles = Vec::new();

        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(1);
                let conn = Connection::new(format!("room-{}", i % 4), tx);
                for _ in 0..50 {
                    registry.bind(conn.clone());
                    tokio::task::yield_now().await;
                    registry.unbind(&conn);
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.room_count(), 0);
    }
}
