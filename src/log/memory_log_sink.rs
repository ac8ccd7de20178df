use std::sync::{Mutex, PoisonError};

use crate::log::{log_level::LogLevel, log_sink::LogSink};

/// Sink that keeps every line in memory. Handy for asserting on what a
/// component reported.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded lines at `level` containing `needle`.
    #[must_use]
    pub fn count_matching(&self, level: LogLevel, needle: &str) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(lvl, text)| *lvl == level && text.contains(needle))
            .count()
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, level: LogLevel, msg: &str, _target: &'static str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, msg.to_owned()));
    }
}
