//! LiveShare module for real-time collaborative editing
//!
//! Provides the room relay behind collaborative sessions:
//! - Room registry keyed by client-chosen room ids
//! - Opaque frame forwarding between the members of a room
//! - Administrative room termination with member notification
//! - Health and room listing endpoints

mod api;
mod control;
mod error;
mod protocol;
mod room;
mod websocket;

pub use api::*;
pub use control::*;
pub use error::*;
pub use protocol::*;
pub use room::*;
pub use websocket::*;
