//! Reusable outbound packet buffers and the pool that hands them out.
pub mod constants;
pub mod packet_pool;
pub mod rtp_packet;
pub mod rtp_params;
pub use packet_pool::{PacketPool, PooledPacket, SharedPacket};
pub use rtp_packet::RtpPacket;
pub use rtp_params::RtpParams;
