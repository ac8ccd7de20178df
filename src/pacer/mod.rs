//! Dedicated-thread packet pacer draining the send queue at a target bitrate.
pub mod constants;
pub mod interval_budget;
pub mod media_session;
pub mod packet_send_error;
pub mod packet_sender;
pub use interval_budget::IntervalBudget;
pub use media_session::{MediaSession, RtpTransport, UdpMediaSession};
pub use packet_send_error::PacketSendError;
pub use packet_sender::{PacerConfig, PacerStats, PacketSender, SendQueueGuard};
