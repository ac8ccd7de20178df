//! Adaptive rate control for both directions of a call.
//!
//! [`PlaybackFlowControl`] runs on the receiver and decides the maximum rate to
//! publish to the peer (TMMBR). [`RecordFlowControl`] runs on the sender and
//! climbs toward whatever maximum the peer published.
pub mod acceptable_loss;
pub mod constants;
pub mod playback_flow_control;
pub mod receive_stats;
pub mod record_flow_control;
pub use acceptable_loss::acceptable_loss_at_rate;
pub use playback_flow_control::PlaybackFlowControl;
pub use receive_stats::ReceiveStats;
pub use record_flow_control::RecordFlowControl;
