/// RTP version written into every header (RFC 3550).
pub const RTP_VERSION: u8 = 2;
/// Size of the fixed RTP header without CSRCs or extensions.
pub const RTP_FIXED_HEADER_LEN: usize = 12;
/// Headroom reserved in front of the payload. Large enough for the fixed
/// header plus CSRCs, extensions and an RTX/NACK prefix when a packet is reused.
pub const MAX_RTP_PACKET_OVERHEAD: usize = 80;
