//! rustypace is the send-side media plumbing of a videophone call.
//!
//! Encoded frames are split into preallocated RTP packets, queued, and paced
//! onto a UDP session at a controlled bitrate. Both ends adapt that bitrate:
//! the receiver watches loss and publishes a maximum, the sender climbs toward
//! it and remembers what worked per remote address.
//!
//! It provides one binary:
//! - `pacer_demo`: streams synthetic frames over loopback with both flow
//!   controllers in the loop.

/// Handles configuration loading and management.
pub mod config;
/// Typed transport notifications and the signal type carrying them.
pub mod events;
/// Receive-side and send-side rate adaptation.
pub mod flow_control;
/// Logging utilities for the application.
pub mod log;
/// The outbound video channel tying the pieces together.
pub mod media_record;
/// Pooled RTP packet buffers.
pub mod packet;
/// Budgeted packet pacing on a dedicated thread.
pub mod pacer;
/// Frame to RTP packet splitting.
pub mod packetizer;
/// Per-remote-address memory of achieved send rates.
pub mod rate_history;
/// Ordered queue of packets awaiting the pacer.
pub mod send_queue;
