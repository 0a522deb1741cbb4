//! Shared protocol definitions for the duet signaling wire format.

pub mod codec;
pub mod message;
