//! WebSocket relay for LiveShare
//!
//! Every socket is bound to the room named by the first segment of its request
//! path. Text and binary frames received from a member are forwarded unchanged
//! to every other open member of the same room; the payload is never decoded.
//!
//! Upgrades are intercepted before routing, so any first segment names a room,
//! including ones that collide with the REST routes (`/health`, `/api`).
//!
//! WebSocket URL: ws(s)://{host}/{room_id}

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        FromRequestParts, Request, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use percent_encoding::percent_decode_str;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};

use super::api::RelayState;
use super::protocol::{HEARTBEAT_TIMEOUT, ROOM_ID_REQUIRED, RoomId};
use super::room::{Connection, RoomRegistry};

/// How long a heartbeat close frame may take to flush before the socket is dropped
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Room Id Parsing
// ============================================================================

/// Decode a raw path segment into a room id
///
/// Percent-escapes are decoded when the result is valid UTF-8; otherwise the
/// segment is kept as written.
pub fn decode_room_id(segment: &str) -> RoomId {
    match percent_decode_str(segment).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

/// Room id named by the first segment of a request path, if any
pub fn room_id_from_path(path: &str) -> Option<RoomId> {
    let rest = path.strip_prefix('/').unwrap_or(path);
    let segment = rest.split('/').next().unwrap_or_default();

    if segment.is_empty() {
        None
    } else {
        Some(decode_room_id(segment))
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Route WebSocket upgrades to their room ahead of the HTTP routes
///
/// Requests without an `Upgrade: websocket` header pass through untouched.
pub async fn websocket_gate(
    State(state): State<RelayState>,
    request: Request,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let room_id = room_id_from_path(request.uri().path());
    let (mut parts, _body) = request.into_parts();

    match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => upgrade(ws, room_id, state),
        Err(rejection) => rejection.into_response(),
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

fn upgrade(ws: WebSocketUpgrade, room_id: Option<RoomId>, state: RelayState) -> Response {
    match room_id {
        Some(room_id) => ws.on_upgrade(move |socket| handle_socket(socket, room_id, state)),
        None => {
            tracing::warn!("Rejecting connection without room id");
            ws.on_upgrade(reject_socket)
        }
    }
}

/// Close a freshly upgraded socket that named no room
async fn reject_socket(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: ROOM_ID_REQUIRED.into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send policy close frame");
    }
}

/// Drive one bound connection until it closes
async fn handle_socket(socket: WebSocket, room_id: RoomId, state: RelayState) {
    let (ws_sender, ws_receiver) = socket.split();

    // Outbound queue; other sessions and the control endpoint write into it
    let (tx, rx) = mpsc::channel::<Message>(state.config.outgoing_buffer_size);
    let writer = tokio::spawn(writer_task(ws_sender, rx, state.config.send_timeout));

    let session = ConnectionSession::bind(Connection::new(room_id, tx), state.registry.clone());
    session
        .run(ws_receiver, writer, state.config.ping_interval)
        .await;
}

/// Drain the outbound queue into the socket
///
/// Each write is bounded by `send_timeout`. The task stops after a close frame,
/// a failed write or a timed out write, which marks the connection as closed
/// for everyone holding its handle.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    send_timeout: Duration,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));

        match tokio::time::timeout(send_timeout, ws_sender.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket send failed");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = send_timeout.as_millis() as u64,
                    "WebSocket send timed out"
                );
                break;
            }
        }

        if is_close {
            break;
        }
    }
}

// ============================================================================
// Connection Session
// ============================================================================

/// State for a single bound WebSocket connection
struct ConnectionSession {
    /// This connection's handle, as stored in the registry
    connection: Connection,
    /// Shared room registry
    registry: Arc<RoomRegistry>,
    /// Cleared once the connection has been unbound
    bound: bool,
    /// Set when a heartbeat ping is outstanding
    awaiting_pong: bool,
}

impl ConnectionSession {
    /// Register the connection with its room
    fn bind(connection: Connection, registry: Arc<RoomRegistry>) -> Self {
        registry.bind(connection.clone());

        tracing::info!(
            room_id = %connection.room_id,
            connection_id = %connection.id,
            members = registry.member_count(&connection.room_id),
            "Connection joined room"
        );

        Self {
            connection,
            registry,
            bound: true,
            awaiting_pong: false,
        }
    }

    /// Process inbound frames and heartbeats until the connection ends
    async fn run(
        mut self,
        mut ws_receiver: SplitStream<WebSocket>,
        mut writer: JoinHandle<()>,
        ping_interval: Option<Duration>,
    ) {
        let mut heartbeat =
            ping_interval.map(|period| tokio::time::interval_at(Instant::now() + period, period));
        let mut timed_out = false;

        loop {
            tokio::select! {
                incoming = ws_receiver.next() => {
                    match incoming {
                        Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                            self.relay(msg);
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.awaiting_pong = false;
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // Pong is answered by the protocol layer
                            tracing::trace!(connection_id = %self.connection.id, "Received ping");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(
                                connection_id = %self.connection.id,
                                frame = ?frame,
                                "Client closed connection"
                            );
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::debug!(
                                connection_id = %self.connection.id,
                                error = %e,
                                "WebSocket receive error"
                            );
                            break;
                        }
                        None => break,
                    }
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    if !self.heartbeat() {
                        timed_out = true;
                        break;
                    }
                }
                _ = &mut writer => {
                    tracing::debug!(connection_id = %self.connection.id, "Writer stopped");
                    break;
                }
            }
        }

        self.cleanup();
        if timed_out {
            // Let the queued close frame reach the peer
            let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await;
        }
        writer.abort();
    }

    /// Forward a frame to every other open member of the room
    ///
    /// Returns the number of members the frame was queued for. Frames from a
    /// connection that is no longer a member (its room was ended) are dropped.
    fn relay(&self, msg: Message) -> usize {
        let members = self.registry.members(&self.connection.room_id);

        if !members.iter().any(|m| m.id == self.connection.id) {
            tracing::debug!(
                room_id = %self.connection.room_id,
                connection_id = %self.connection.id,
                "Dropping message from connection outside its room"
            );
            return 0;
        }

        let mut delivered = 0;
        for member in members {
            if member.id == self.connection.id || !member.is_open() {
                continue;
            }

            match member.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        room_id = %self.connection.room_id,
                        from = %self.connection.id,
                        to = %member.id,
                        error = %e,
                        "Dropped relayed message"
                    );
                }
            }
        }
        delivered
    }

    /// Send the next heartbeat ping
    ///
    /// Returns `false` when the previous ping went unanswered, after queueing a
    /// going-away close frame.
    fn heartbeat(&mut self) -> bool {
        if self.awaiting_pong {
            tracing::info!(
                room_id = %self.connection.room_id,
                connection_id = %self.connection.id,
                "Heartbeat timeout, closing connection"
            );
            if let Err(e) = self.connection.close(close_code::AWAY, HEARTBEAT_TIMEOUT) {
                tracing::debug!(
                    connection_id = %self.connection.id,
                    error = %e,
                    "Failed to queue close frame"
                );
            }
            return false;
        }

        self.awaiting_pong = true;
        if let Err(e) = self.connection.try_send(Message::Ping(Default::default())) {
            tracing::debug!(connection_id = %self.connection.id, error = %e, "Failed to queue ping");
        }
        true
    }

    /// Remove the connection from its room; runs at most once
    fn cleanup(&mut self) {
        if !self.bound {
            return;
        }
        self.bound = false;
        self.registry.unbind(&self.connection);

        tracing::info!(
            room_id = %self.connection.room_id,
            connection_id = %self.connection.id,
            remaining = self.registry.member_count(&self.connection.room_id),
            connected_secs = (chrono::Utc::now() - self.connection.connected_at).num_seconds(),
            "Connection left room"
        );
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
