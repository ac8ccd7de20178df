use std::time::{Duration, Instant};

/// Lets one message through per `period`, counting what it holds back.
///
/// Used for transport write failures so a dead socket does not flood the log
/// at the pacing cadence.
#[derive(Debug, Clone)]
pub struct LogThrottle {
    period: Duration,
    last_emit: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_emit: None,
            suppressed: 0,
        }
    }

    /// Returns `Some(suppressed_since_last_emit)` when a line may be written at
    /// `now`, otherwise `None` and the suppressed counter grows.
    pub fn check_at(&mut self, now: Instant) -> Option<u64> {
        let allowed = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.period,
        };

        if allowed {
            self.last_emit = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }

    pub fn check(&mut self) -> Option<u64> {
        self.check_at(Instant::now())
    }
}
