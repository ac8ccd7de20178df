use std::time::Duration;

/// Byte allowance for pacing.
///
/// Grows only through [`IntervalBudget::top_up`], proportional to elapsed time,
/// and shrinks through [`IntervalBudget::debit`]. Sending is allowed while the
/// balance is positive; a packet larger than what is left drives it negative
/// and later top-ups repay that deficit before anything else goes out.
#[derive(Debug, Clone)]
pub struct IntervalBudget {
    target_bits_per_sec: usize,
    balance_bytes: i64,
    max_interval: Duration,
}

impl IntervalBudget {
    #[must_use]
    pub fn new(target_bits_per_sec: usize, max_interval: Duration) -> Self {
        Self {
            target_bits_per_sec,
            balance_bytes: 0,
            max_interval,
        }
    }

    /// Takes effect at the next top-up.
    pub fn target_rate_set(&mut self, bits_per_sec: usize) {
        self.target_bits_per_sec = bits_per_sec;
    }

    #[must_use]
    pub fn target_rate(&self) -> usize {
        self.target_bits_per_sec
    }

    /// Positive balance, 0 while in deficit.
    #[must_use]
    pub fn remaining(&self) -> usize {
        usize::try_from(self.balance_bytes).unwrap_or(0)
    }

    /// Bytes still owed for the last oversized packet.
    #[must_use]
    pub fn deficit(&self) -> usize {
        usize::try_from(-self.balance_bytes.min(0)).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.balance_bytes > 0
    }

    /// Bytes a single top-up may grant at most.
    #[must_use]
    pub fn max_grant(&self) -> usize {
        self.bytes_for(self.max_interval)
    }

    /// Credits `rate * min(elapsed, max_interval)`. Unused allowance carries
    /// over, but the balance is capped at one maximal grant so an idle queue
    /// cannot save up for a burst.
    pub fn top_up(&mut self, elapsed: Duration) -> usize {
        let granted = self.bytes_for(elapsed.min(self.max_interval));
        let cap = i64::try_from(self.max_grant()).unwrap_or(i64::MAX);
        self.balance_bytes = self
            .balance_bytes
            .saturating_add(i64::try_from(granted).unwrap_or(i64::MAX))
            .min(cap);
        granted
    }

    /// Charges a sent packet in full, even past zero.
    pub fn debit(&mut self, bytes: usize) {
        self.balance_bytes = self
            .balance_bytes
            .saturating_sub(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    fn bytes_for(&self, elapsed: Duration) -> usize {
        let bytes = self.target_bits_per_sec as u128 * elapsed.as_micros() / 8_000_000;
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }
}
