/// Per-transport parameters that travel with a packet and end up in its RTP
/// header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpParams {
    pub payload_type: u8,
    /// Set on the last packet of a frame.
    pub marker: bool,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}
