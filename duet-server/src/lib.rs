//! duet signaling server library.
//!
//! Pairs exactly two WebSocket peers per named room and relays their
//! connection-negotiation messages (offer, answer, ICE candidates) without
//! inspecting them. Exposed as a library for tests and embedding.

pub mod broadcast;
pub mod config;
pub mod registry;
pub mod router;
pub mod server;
