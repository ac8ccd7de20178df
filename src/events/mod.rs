//! Typed notifications emitted by the transport: packets dropped from the send
//! queue, media frames enqueued, and per-packet send results.
pub mod signal;
pub mod transport_events;
pub use signal::{Signal, SignalConnection};
pub use transport_events::{MediaFrameCreated, PacketSendResult, PacketsDropped};
