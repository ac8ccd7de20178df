use std::{sync::Arc, time::Instant};

use crate::{
    log::log_sink::LogSink, rate_history::RateHistoryManager, sink_debug, sink_error, sink_info,
};

use super::constants::{
    MIN_SEND_RATE_INCREASE_BITS_PER_SEC, MIN_SEND_RATE_INCREASE_INTERVAL,
    MIN_STARTING_SEND_RATE_BITS_PER_SEC, RATE_INCREASE_PERCENTAGE,
};

/// Send-side rate control: climbs the send rate toward the maximum the peer
/// published, in small steps no closer than two seconds apart.
///
/// The first rate comes from the median of rates that worked for the same
/// remote address on earlier calls, so a link that could not sustain the
/// published maximum is not flooded at call start. The rate in use when the
/// controller is dropped is added to that history. An empty address (remote
/// not known) neither reads nor writes the history.
///
/// Not thread-safe; the owner serializes calls.
pub struct RecordFlowControl {
    ip_address: String,
    current_max_rate: u32,
    current_min_rate: u32,
    current_send_rate: u32,
    /// False until the starting rate is chosen. A send rate of 0 is a real
    /// rate once the adjusted maximum drops to 0.
    seeded: bool,
    reserved_bit_rate: u32,

    /// Sum of rate * seconds for every completed step.
    rate_accumulator: u64,
    time_accumulator_secs: u64,
    last_rate_change: Instant,

    rate_history: RateHistoryManager,
    logger: Arc<dyn LogSink>,
}

impl RecordFlowControl {
    pub fn new(
        ip_address: impl Into<String>,
        initial_max_rate: u32,
        rate_history: RateHistoryManager,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        Self::new_at(
            ip_address,
            initial_max_rate,
            rate_history,
            Instant::now(),
            logger,
        )
    }

    pub fn new_at(
        ip_address: impl Into<String>,
        initial_max_rate: u32,
        rate_history: RateHistoryManager,
        now: Instant,
        logger: Arc<dyn LogSink>,
    ) -> Self {
        let ip_address = ip_address.into();
        sink_debug!(
            logger,
            "[RecordFlowControl] {} initial max rate {} bps",
            ip_address,
            initial_max_rate
        );
        Self {
            ip_address,
            current_max_rate: initial_max_rate,
            current_min_rate: 0,
            current_send_rate: 0,
            seeded: false,
            reserved_bit_rate: 0,
            rate_accumulator: 0,
            time_accumulator_secs: 0,
            last_rate_change: now,
            rate_history,
            logger,
        }
    }

    #[must_use]
    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    pub fn max_rate_set(&mut self, max_rate: u32) {
        self.max_rate_set_at(Instant::now(), max_rate);
    }

    /// New ceiling from the peer, usually a TMMBR asking to slow down.
    pub fn max_rate_set_at(&mut self, now: Instant, max_rate: u32) {
        sink_debug!(
            self.logger,
            "[RecordFlowControl] max rate {} -> {} bps",
            self.current_max_rate,
            max_rate
        );
        self.current_max_rate = max_rate;
        self.last_rate_change = now;
        self.current_min_rate = self.current_min_rate.min(max_rate);
    }

    #[must_use]
    pub fn max_rate_get(&self) -> u32 {
        self.current_max_rate
    }

    /// Lowest rate used so far.
    #[must_use]
    pub fn min_rate_get(&self) -> u32 {
        self.current_min_rate
    }

    /// 0 until the first [`RecordFlowControl::send_rate_calculate`].
    #[must_use]
    pub fn send_rate_get(&self) -> u32 {
        self.current_send_rate
    }

    #[must_use]
    pub fn reserved_bit_rate_get(&self) -> u32 {
        self.reserved_bit_rate
    }

    /// Bandwidth set aside for other media (audio) sent alongside.
    pub fn reserved_bit_rate_set(&mut self, reserved: u32) {
        self.reserved_bit_rate = reserved;
    }

    #[must_use]
    pub fn avg_rate_get(&self) -> u32 {
        self.avg_rate_get_at(Instant::now())
    }

    /// Time-weighted average send rate since construction.
    #[must_use]
    pub fn avg_rate_get_at(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.last_rate_change).as_secs();
        let rate_total = self.rate_accumulator + u64::from(self.current_send_rate) * elapsed;
        let time_total = self.time_accumulator_secs + elapsed;
        if rate_total == 0 || time_total == 0 {
            return 0;
        }
        u32::try_from(rate_total / time_total).unwrap_or(u32::MAX)
    }

    /// Starting rate to use instead of the history median. Ignored once a
    /// rate has been established.
    pub fn initial_send_rate_set(&mut self, rate: u32) {
        if !self.seeded {
            self.seeded = true;
            self.current_send_rate = rate.min(self.current_max_rate);
            self.current_min_rate = self.current_send_rate;
            sink_info!(
                self.logger,
                "[RecordFlowControl] initial send rate overridden to {} bps",
                self.current_send_rate
            );
        }
    }

    pub fn send_rate_calculate(&mut self) -> u32 {
        self.send_rate_calculate_at(Instant::now())
    }

    /// Recommends the send rate; call at a steady cadence.
    ///
    /// # Panics
    /// In debug builds, if the reserved bit rate exceeds the maximum rate.
    /// Release builds log, drop the reservation and carry on.
    pub fn send_rate_calculate_at(&mut self, now: Instant) -> u32 {
        if !self.seeded {
            self.seeded = true;
            self.current_send_rate = self.initial_send_rate_get();
            self.current_min_rate = self.current_send_rate;
            return self.current_send_rate;
        }

        let mut max_rate = self.current_max_rate;
        if self.reserved_bit_rate > max_rate {
            sink_error!(
                self.logger,
                "[RecordFlowControl] reserved {} bps exceeds max rate {} bps, clearing reservation",
                self.reserved_bit_rate,
                max_rate
            );
            debug_assert!(
                self.reserved_bit_rate <= max_rate,
                "reserved bit rate {} exceeds max rate {}",
                self.reserved_bit_rate,
                max_rate
            );
            self.reserved_bit_rate = 0;
        } else {
            max_rate -= self.reserved_bit_rate;
        }

        if self.current_send_rate >= max_rate {
            self.current_send_rate = max_rate;
            return max_rate;
        }

        let elapsed = now.saturating_duration_since(self.last_rate_change);
        if elapsed < MIN_SEND_RATE_INCREASE_INTERVAL {
            return self.current_send_rate;
        }

        let step = (self.current_send_rate as f32 * RATE_INCREASE_PERCENTAGE) as u32;
        let delta = step.max(MIN_SEND_RATE_INCREASE_BITS_PER_SEC);
        let new_rate = max_rate.min(self.current_send_rate.saturating_add(delta));

        sink_debug!(
            self.logger,
            "[RecordFlowControl] send rate {} -> {} bps (target {})",
            self.current_send_rate,
            new_rate,
            max_rate
        );

        let elapsed_secs = elapsed.as_secs();
        self.rate_accumulator += u64::from(self.current_send_rate) * elapsed_secs;
        self.time_accumulator_secs += elapsed_secs;
        self.current_send_rate = new_rate;
        self.last_rate_change = now;
        new_rate
    }

    /// History median clamped into `[min(512 kbps, max), max]`, or 512 kbps
    /// without history.
    fn initial_send_rate_get(&mut self) -> u32 {
        let median = if self.ip_address.is_empty() {
            0
        } else {
            self.rate_history.median_rate_get(&self.ip_address)
        };
        let initial = if median > 0 {
            median
                .min(self.current_max_rate)
                .max(MIN_STARTING_SEND_RATE_BITS_PER_SEC.min(self.current_max_rate))
        } else {
            MIN_STARTING_SEND_RATE_BITS_PER_SEC
        };
        sink_info!(
            self.logger,
            "[RecordFlowControl] initial send rate {} bps (median {}, max {})",
            initial,
            median,
            self.current_max_rate
        );
        initial
    }
}

impl Drop for RecordFlowControl {
    fn drop(&mut self) {
        if self.current_send_rate == 0 || self.ip_address.is_empty() {
            return;
        }
        match self
            .rate_history
            .save_rate(&self.ip_address, self.current_send_rate)
        {
            Ok(()) => sink_debug!(
                self.logger,
                "[RecordFlowControl] stored {} bps for {}",
                self.current_send_rate,
                self.ip_address
            ),
            Err(e) => sink_error!(
                self.logger,
                "[RecordFlowControl] could not store rate history: {}",
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::NoopLogSink;
    use rand::RngCore;
    use std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    };

    const IP: &str = "203.0.113.5";

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "rustypace_record_{}.json",
            rand::thread_rng().next_u64()
        ))
    }

    fn controller(path: &Path, max: u32, t0: Instant) -> RecordFlowControl {
        let logger: Arc<dyn LogSink> = Arc::new(NoopLogSink);
        let history = RateHistoryManager::new(path, Arc::clone(&logger));
        RecordFlowControl::new_at(IP, max, history, t0, logger)
    }

    fn secs(t0: Instant, s: u64) -> Instant {
        t0 + Duration::from_secs(s)
    }

    #[test]
    fn without_history_the_first_rate_is_the_floor() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 2_000_000, t0);
        assert_eq!(fc.send_rate_calculate_at(t0), 512_000);
        assert_eq!(fc.min_rate_get(), 512_000);
        drop(fc);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn climbs_by_at_least_8000_every_two_seconds_then_holds_at_max() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 600_000, t0);
        let mut rate = fc.send_rate_calculate_at(t0);
        let mut s = 0;

        loop {
            s += 2;
            let next = fc.send_rate_calculate_at(secs(t0, s));
            if rate == 600_000 {
                assert_eq!(next, 600_000);
                break;
            }
            assert!(next >= (rate + 8_000).min(600_000), "{rate} -> {next}");
            rate = next;
        }
        assert_eq!(fc.send_rate_calculate_at(secs(t0, s + 10)), 600_000);
        drop(fc);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn step_is_one_point_six_percent_above_500k() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 5_000_000, t0);
        fc.initial_send_rate_set(1_000_000);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 2)), 1_016_000);
        drop(fc);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn calls_closer_than_two_seconds_do_not_change_the_rate() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 2_000_000, t0);
        fc.send_rate_calculate_at(t0);
        assert_eq!(fc.send_rate_calculate_at(t0 + Duration::from_millis(1_999)), 512_000);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 2)), 520_192);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 3)), 520_192);
        drop(fc);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reserved_bit_rate_lowers_the_target() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 600_000, t0);
        fc.initial_send_rate_set(580_000);
        fc.reserved_bit_rate_set(64_000);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 2)), 536_000);
        assert_eq!(fc.send_rate_get(), 536_000);
        drop(fc);
        let _ = fs::remove_file(&path);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "exceeds max rate")]
    fn oversized_reservation_panics_in_debug() {
        let t0 = Instant::now();
        let mut fc = controller(&temp_path(), 600_000, t0);
        fc.send_rate_calculate_at(t0);
        fc.reserved_bit_rate_set(700_000);
        fc.send_rate_calculate_at(secs(t0, 2));
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn oversized_reservation_is_cleared_in_release() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 600_000, t0);
        fc.send_rate_calculate_at(t0);
        fc.reserved_bit_rate_set(700_000);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 2)), 520_192);
        assert_eq!(fc.reserved_bit_rate_get(), 0);
        drop(fc);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn lower_max_clamps_the_rate_and_the_minimum() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 2_000_000, t0);
        fc.send_rate_calculate_at(t0);
        fc.max_rate_set_at(secs(t0, 1), 400_000);
        assert_eq!(fc.min_rate_get(), 400_000);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 1)), 400_000);
        assert_eq!(fc.max_rate_get(), 400_000);
        drop(fc);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reservation_equal_to_max_holds_the_rate_at_zero() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 600_000, t0);
        fc.send_rate_calculate_at(t0);
        fc.reserved_bit_rate_set(600_000);

        let rates: Vec<u32> = (1..=6)
            .map(|s| fc.send_rate_calculate_at(secs(t0, s)))
            .collect();
        assert_eq!(rates, vec![0; 6]);
        assert_eq!(fc.reserved_bit_rate_get(), 600_000);
        drop(fc);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn zero_max_is_not_mistaken_for_an_unseeded_controller() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 2_000_000, t0);
        fc.send_rate_calculate_at(t0);
        fc.max_rate_set_at(secs(t0, 1), 0);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 1)), 0);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 2)), 0);

        fc.max_rate_set_at(secs(t0, 3), 600_000);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 4)), 0);
        assert_eq!(fc.send_rate_calculate_at(secs(t0, 5)), 8_000);
        drop(fc);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn unknown_remote_address_skips_the_history() {
        let path = temp_path();
        RateHistoryManager::new(&path, Arc::new(NoopLogSink))
            .save_rate("", 1_500_000)
            .unwrap();
        let logger: Arc<dyn LogSink> = Arc::new(NoopLogSink);
        let history = RateHistoryManager::new(&path, Arc::clone(&logger));
        let t0 = Instant::now();
        let mut fc = RecordFlowControl::new_at("", 2_000_000, history, t0, logger);
        assert_eq!(fc.send_rate_calculate_at(t0), 512_000);
        fc.send_rate_calculate_at(secs(t0, 2));
        drop(fc);

        let mut h = RateHistoryManager::new(&path, Arc::new(NoopLogSink));
        assert_eq!(h.rates(""), vec![1_500_000]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn history_median_seeds_the_first_rate_within_bounds() {
        let path = temp_path();
        {
            let mut h = RateHistoryManager::new(&path, Arc::new(NoopLogSink));
            for rate in [900_000, 1_100_000, 1_000_000] {
                h.save_rate(IP, rate).unwrap();
            }
        }
        let t0 = Instant::now();

        let mut fc = controller(&path, 2_000_000, t0);
        assert_eq!(fc.send_rate_calculate_at(t0), 1_000_000);
        std::mem::forget(fc);

        let mut capped = controller(&path, 800_000, t0);
        assert_eq!(capped.send_rate_calculate_at(t0), 800_000);
        std::mem::forget(capped);

        let mut tiny = controller(&path, 300_000, t0);
        assert_eq!(tiny.send_rate_calculate_at(t0), 300_000);
        std::mem::forget(tiny);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn low_history_is_raised_to_the_starting_floor() {
        let path = temp_path();
        RateHistoryManager::new(&path, Arc::new(NoopLogSink))
            .save_rate(IP, 200_000)
            .unwrap();
        let t0 = Instant::now();
        let mut fc = controller(&path, 2_000_000, t0);
        assert_eq!(fc.send_rate_calculate_at(t0), 512_000);
        std::mem::forget(fc);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn dropping_stores_the_rate_in_use() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 2_000_000, t0);
        fc.send_rate_calculate_at(t0);
        fc.send_rate_calculate_at(secs(t0, 2));
        drop(fc);

        let mut h = RateHistoryManager::new(&path, Arc::new(NoopLogSink));
        assert_eq!(h.rates(IP), vec![520_192]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn unused_controller_stores_nothing() {
        let path = temp_path();
        drop(controller(&path, 2_000_000, Instant::now()));
        assert!(!path.exists());
    }

    #[test]
    fn average_weights_each_rate_by_its_duration() {
        let path = temp_path();
        let t0 = Instant::now();
        let mut fc = controller(&path, 2_000_000, t0);
        fc.initial_send_rate_set(1_000_000);
        assert_eq!(fc.avg_rate_get_at(t0), 0);
        fc.send_rate_calculate_at(secs(t0, 4)); // 1_000_000 for 4s -> 1_016_000
        assert_eq!(fc.avg_rate_get_at(secs(t0, 8)), 1_008_000);
        drop(fc);
        let _ = fs::remove_file(&path);
    }
}
