//! LiveShare Relay - room-scoped WebSocket relay for collaborative editing
//!
//! Clients join a room by connecting to `ws://{host}/{room_id}`. Every frame a
//! client sends is forwarded unchanged to the other members of that room. Rooms
//! live only in memory and disappear with their last member or when ended
//! through the administrative API.

pub mod core;
