//! Turns encoded frames into pooled RTP packets on the pacer's queue.
pub mod frame_packetizer;
pub mod frame_send_outcome;
pub use frame_packetizer::FramePacketizer;
pub use frame_send_outcome::FrameSendOutcome;
