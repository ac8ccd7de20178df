/// What happened to one frame handed to [`super::FramePacketizer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSendOutcome {
    pub packets_queued: usize,
    /// Header plus payload bytes of the queued packets.
    pub bytes_queued: usize,
    /// Chunks left behind because the packet pool ran dry.
    pub packets_skipped: usize,
    /// Stale packets cleared from the queue before this frame.
    pub packets_purged: usize,
}

impl FrameSendOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.packets_skipped == 0
    }
}
