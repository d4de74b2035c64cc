//! IRC-over-WebSocket client layer: line grammar, frame classification,
//! and the connection manager.

pub mod client;
pub mod event;
pub mod message;
