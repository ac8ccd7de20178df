//! Leveled, non-blocking logging shared by every transport component.
pub mod log_level;
pub mod log_macros;
pub mod log_msg;
pub mod log_sink;
pub mod log_throttle;
pub mod logger;
pub mod logger_handle;
pub mod memory_log_sink;
pub mod noop_log_sink;
pub use log_throttle::LogThrottle;
pub use memory_log_sink::MemoryLogSink;
pub use noop_log_sink::NoopLogSink;
