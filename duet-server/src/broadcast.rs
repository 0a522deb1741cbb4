//! Broadcast mode: no rooms, every inbound unit goes to every other client.
//!
//! Each text unit `m` is sent to all other open connections as
//! `Someone else said: m`, after which the sender gets an acknowledgement.

use duet_proto::message::PeerId;

use crate::router::SignalingRouter;

/// Acknowledgement sent back to the author of a broadcast.
pub const BROADCAST_ACK: &str = "Message received and broadcasted!";

/// Text delivered to every other client for an inbound unit.
#[must_use]
pub fn broadcast_line(text: &str) -> String {
    format!("Someone else said: {text}")
}

/// Forwards `text` from `sender` to every other open connection, then
/// acknowledges to the sender. Returns the number of recipients reached.
///
/// Connections whose writer has gone are disconnected through the router so
/// any room bookkeeping is cleaned up the same way as in room mode.
pub fn broadcast_text(router: &SignalingRouter, sender: &PeerId, text: &str) -> usize {
    let line = broadcast_line(text);
    let mut reached = 0;
    let mut gone = Vec::new();

    for peer in router.registry().peers() {
        if peer.id() == *sender || peer.is_closed() {
            continue;
        }
        match peer.send_text(line.clone()) {
            Ok(()) => reached += 1,
            Err(closed) => gone.push(closed.0),
        }
    }

    if let Some(author) = router.registry().handle(sender)
        && let Err(closed) = author.send_text(BROADCAST_ACK.to_string())
    {
        gone.push(closed.0);
    }

    for peer in gone {
        tracing::warn!(peer_id = %peer, "broadcast delivery failed, dropping peer");
        router.handle_disconnect(&peer);
    }

    tracing::debug!(peer_id = %sender, reached, "broadcast");
    reached
}
