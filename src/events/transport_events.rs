use crate::{packet::SharedPacket, pacer::packet_send_error::PacketSendError};

/// The send queue was cleared; carries how many packets were discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketsDropped(pub usize);

/// A complete encoded frame was enqueued; carries its total RTP bytes.
/// Consumed by sender statistics, never by queue admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFrameCreated(pub usize);

/// Outcome of one transport write attempted by the pacer.
#[derive(Debug, Clone)]
pub struct PacketSendResult {
    /// SSRC of the session the packet was sent on.
    pub ssrc: u32,
    pub packet: SharedPacket,
    /// Bytes written on success.
    pub status: Result<usize, PacketSendError>,
}

impl PacketSendResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}
