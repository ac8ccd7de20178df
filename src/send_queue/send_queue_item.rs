use std::time::Instant;

use crate::packet::SharedPacket;

/// A queued packet and the moment it was enqueued.
#[derive(Debug, Clone)]
pub struct SendQueueItem {
    pub packet: SharedPacket,
    pub enqueued_at: Instant,
}
