/// Defines the severity levels for log messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Per-packet detail (budget top-ups, individual sends).
    Trace,
    /// Rate-control decisions and history updates.
    Debug,
    /// Lifecycle of pacers, channels and flow controllers.
    Info,
    /// Recoverable trouble: pool exhaustion, dropped queues, failed writes.
    Warn,
    /// Misconfiguration and persistence failures.
    Error,
}

impl LogLevel {
    /// Fixed-width tag used by the file logger.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
        }
    }
}
