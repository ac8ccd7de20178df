//! Outbound video channel: packetizer, pacer and send-side flow control.
pub mod record_channel_params;
pub mod video_record_channel;
pub use record_channel_params::RecordChannelParams;
pub use video_record_channel::{VideoRecordChannel, pacing_rate_for};
