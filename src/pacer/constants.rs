use std::time::Duration;

/// Target time between pacer wake-ups. Short relative to a frame interval so
/// a frame's packets are spread out instead of sent as one burst.
pub const PACE_INTERVAL: Duration = Duration::from_millis(10);

/// Longest elapsed time credited in one budget top-up. After a stall the pacer
/// may burst at most `rate * MAX_PACE_INTERVAL` bytes.
pub const MAX_PACE_INTERVAL: Duration = Duration::from_millis(50);

/// The pacing bitrate is the encoder target times this factor. Pacing faster
/// than the encoder keeps bursty frames from building a backlog.
pub const PACING_RATE_FACTOR: f64 = 1.5;

/// Transport write failures are logged at most once per this period.
pub const SEND_ERROR_LOG_PERIOD: Duration = Duration::from_secs(5);
