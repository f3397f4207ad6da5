//! Client connection protocol
//!
//! WebSocket message types and the per-connection handler that drives an
//! upload session through collecting, ready, submitted and terminal states.

pub mod handler;
pub mod messages;

pub use handler::ConnectionHandler;
pub use messages::{ClientMessage, ServerMessage};
