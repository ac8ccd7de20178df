use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    events::{MediaFrameCreated, PacketsDropped, Signal},
    log::log_sink::LogSink,
    packet::SharedPacket,
    sink_warn,
};

use super::send_queue_item::SendQueueItem;

/// Ordered queue of packets awaiting transmission, oldest first.
///
/// Not synchronized on its own: it lives inside the pacer's state and is
/// reached through [`crate::pacer::PacketSender::queue`], which holds the pacer
/// mutex and wakes the pacer when released.
pub struct RtpSendQueue {
    items: VecDeque<SendQueueItem>,
    packets_dropped: Signal<PacketsDropped>,
    media_frame_created: Signal<MediaFrameCreated>,
    logger: Arc<dyn LogSink>,
}

impl RtpSendQueue {
    pub fn new(logger: Arc<dyn LogSink>) -> Self {
        Self {
            items: VecDeque::new(),
            packets_dropped: Signal::new(),
            media_frame_created: Signal::new(),
            logger,
        }
    }

    /// Appends `packet`. Timestamps earlier than the current tail are raised to
    /// the tail's so the queue stays ordered by enqueue time.
    pub fn push(&mut self, packet: SharedPacket, enqueued_at: Instant) {
        let enqueued_at = match self.items.back() {
            Some(tail) if enqueued_at < tail.enqueued_at => tail.enqueued_at,
            _ => enqueued_at,
        };
        self.items.push_back(SendQueueItem {
            packet,
            enqueued_at,
        });
    }

    /// Removes and returns the oldest item.
    pub fn pop(&mut self) -> Option<SendQueueItem> {
        self.items.pop_front()
    }

    /// The oldest item without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&SendQueueItem> {
        self.items.front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Enqueue time of the head item; `now - oldest` is how far behind the
    /// pacer is.
    #[must_use]
    pub fn oldest_timestamp(&self) -> Option<Instant> {
        self.items.front().map(|item| item.enqueued_at)
    }

    /// Sum of header and payload bytes of everything queued. Walks the whole
    /// queue; meant for periodic statistics.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.items.iter().map(|item| item.packet.total_size()).sum()
    }

    /// Empties the queue and emits [`PacketsDropped`] with the number removed,
    /// 0 included. Returns that number.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        self.packets_dropped.emit(&PacketsDropped(dropped));
        dropped
    }

    /// Clears the queue if its head has been waiting longer than `max_age`.
    /// Returns how many packets were dropped.
    pub fn purge_stale(&mut self, now: Instant, max_age: Duration) -> usize {
        match self.oldest_timestamp() {
            Some(oldest) if now.saturating_duration_since(oldest) > max_age => {
                let behind = now.saturating_duration_since(oldest);
                let dropped = self.clear();
                sink_warn!(
                    self.logger,
                    "[SendQueue] {}ms behind, dropped {} queued packets",
                    behind.as_millis(),
                    dropped
                );
                dropped
            }
            _ => 0,
        }
    }

    /// Reports the size of a frame just enqueued.
    pub fn media_frame_created_emit(&self, frame_bytes: usize) {
        self.media_frame_created
            .emit(&MediaFrameCreated(frame_bytes));
    }

    #[must_use]
    pub fn packets_dropped_signal(&self) -> &Signal<PacketsDropped> {
        &self.packets_dropped
    }

    #[must_use]
    pub fn media_frame_created_signal(&self) -> &Signal<MediaFrameCreated> {
        &self.media_frame_created
    }
}
