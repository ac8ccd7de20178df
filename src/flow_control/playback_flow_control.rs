use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{log::log_sink::LogSink, sink_debug, sink_info};

use super::{
    acceptable_loss::acceptable_loss_at_rate,
    constants::{
        AVERAGE_LOSS_SAMPLE_CAP, CEILING_CUT_FRACTION, CEILING_CUT_LOSS_FACTOR,
        CEILING_CUT_RATE_CLIMB_FACTOR, CEILING_INCREASE_MULTIPLIERS, DECREASE_MULTIPLIER_MAX,
        DECREASE_MULTIPLIER_MIN, INCREASE_MULTIPLIER_MIN, INCREASE_MULTIPLIER_SCALAR,
        MIN_TIME_BETWEEN_CEILING_INCREASES, MIN_TIME_BETWEEN_DECREASES,
        MIN_TIME_BETWEEN_INCREASES, MINIMUM_RATE_BYTES_PER_SECOND, RATE_INCREASE_DECAY_MULTIPLIER,
        RATE_UTILIZATION_NEEDED_FOR_INCREASE, RECENT_HISTORY_WINDOW, STATS_HISTORY_WINDOW,
    },
    receive_stats::ReceiveStats,
};

/// Receive-side rate control: turns per-interval reception statistics into the
/// maximum rate published to the sender.
///
/// Two numbers move at different speeds. The *max rate* reacts within seconds:
/// cut on unacceptable loss, raised in steps after sustained clean reception
/// near the current max. The *bandwidth limit* (ceiling) bounds the max rate
/// and moves slowly: raised by a few percent at most once a minute, lowered
/// only when loss coincides with a rate climb. Every ceiling cut makes later
/// increases of both smaller.
///
/// Not thread-safe; feed it from one place.
pub struct PlaybackFlowControl {
    absolute_max_rate: u32,
    current_max_rate: u32,
    bandwidth_limit: u32,

    /// Newest first.
    history: VecDeque<ReceiveStats>,
    average_rate: u32,
    average_loss_ratio: f64,

    rate_increase_count: u32,
    rate_decrease_count: u32,
    bandwidth_limit_decrease_count: u16,

    last_rate_change: Instant,
    last_rate_decrease: Instant,
    last_bandwidth_limit_change: Instant,

    logger: Arc<dyn LogSink>,
}

impl PlaybackFlowControl {
    #[must_use]
    pub fn new(absolute_max_rate: u32, logger: Arc<dyn LogSink>) -> Self {
        Self::new_at(absolute_max_rate, Instant::now(), logger)
    }

    #[must_use]
    pub fn new_at(absolute_max_rate: u32, now: Instant, logger: Arc<dyn LogSink>) -> Self {
        sink_info!(
            logger,
            "[PlaybackFlowControl] absolute max rate {} bps",
            absolute_max_rate
        );
        Self {
            absolute_max_rate,
            current_max_rate: absolute_max_rate,
            bandwidth_limit: absolute_max_rate,
            history: VecDeque::new(),
            average_rate: 0,
            average_loss_ratio: 0.0,
            rate_increase_count: 0,
            rate_decrease_count: 0,
            bandwidth_limit_decrease_count: 0,
            last_rate_change: now,
            last_rate_decrease: now,
            last_bandwidth_limit_change: now,
            logger,
        }
    }

    #[must_use]
    pub fn max_rate_get(&self) -> u32 {
        self.current_max_rate
    }

    #[must_use]
    pub fn absolute_max_rate(&self) -> u32 {
        self.absolute_max_rate
    }

    #[must_use]
    pub fn bandwidth_limit(&self) -> u32 {
        self.bandwidth_limit
    }

    /// Average observed rate over the whole history; 0 until the recent window
    /// is filled.
    #[must_use]
    pub fn average_rate(&self) -> u32 {
        self.average_rate
    }

    #[must_use]
    pub fn average_loss_ratio(&self) -> f64 {
        self.average_loss_ratio
    }

    #[must_use]
    pub fn rate_increase_count(&self) -> u32 {
        self.rate_increase_count
    }

    #[must_use]
    pub fn rate_decrease_count(&self) -> u32 {
        self.rate_decrease_count
    }

    #[must_use]
    pub fn history_duration(&self) -> Duration {
        Duration::from_millis(self.history_duration_ms())
    }

    pub fn max_rate_calculate(
        &mut self,
        duration_ms: u32,
        packets_received: u32,
        packets_lost: u32,
        packet_size_avg: u32,
        actual_packet_loss: u32,
    ) -> u32 {
        self.max_rate_calculate_at(
            Instant::now(),
            ReceiveStats::new(
                duration_ms,
                packets_received,
                packets_lost,
                packet_size_avg,
                actual_packet_loss,
            ),
        )
    }

    /// Folds one feedback interval into the history and returns the new
    /// maximum receive rate.
    ///
    /// A zero-length interval, or one with no packets at all, changes nothing.
    pub fn max_rate_calculate_at(&mut self, now: Instant, sample: ReceiveStats) -> u32 {
        if sample.duration_ms == 0 || sample.total_packets() == 0 {
            return self.current_max_rate;
        }
        self.history_update(sample);

        let mut new_max_rate = self.current_max_rate;

        let limit = self.bandwidth_limit_calculate(now);
        if limit != self.bandwidth_limit {
            if limit < self.bandwidth_limit {
                self.bandwidth_limit_decrease_count =
                    self.bandwidth_limit_decrease_count.saturating_add(1);
            }
            sink_info!(
                self.logger,
                "[PlaybackFlowControl] bandwidth limit {} -> {} bps",
                self.bandwidth_limit,
                limit
            );
            self.bandwidth_limit = limit;
            self.last_bandwidth_limit_change = now;
            new_max_rate = new_max_rate.min(limit);
        }

        if self.rate_decrease_check(now) {
            let lowered = self.rate_decrease_calculate();
            if lowered < self.current_max_rate {
                new_max_rate = lowered;
                self.rate_decrease_count += 1;
                self.last_rate_change = now;
                self.last_rate_decrease = now;
                sink_info!(
                    self.logger,
                    "[PlaybackFlowControl] max rate decrease {} -> {} bps (loss {:.4})",
                    self.current_max_rate,
                    lowered,
                    self.newest().map_or(0.0, ReceiveStats::loss_ratio)
                );
            }
        } else if self.rate_increase_check(now) {
            let raised = self.rate_increase_calculate();
            if raised > self.current_max_rate {
                new_max_rate = raised;
                self.rate_increase_count += 1;
                self.last_rate_change = now;
                sink_info!(
                    self.logger,
                    "[PlaybackFlowControl] max rate increase {} -> {} bps",
                    self.current_max_rate,
                    raised
                );
            }
        }

        self.current_max_rate = new_max_rate;
        new_max_rate
    }

    fn newest(&self) -> Option<&ReceiveStats> {
        self.history.front()
    }

    fn history_duration_ms(&self) -> u64 {
        self.history.iter().map(|rs| u64::from(rs.duration_ms)).sum()
    }

    fn history_update(&mut self, sample: ReceiveStats) {
        sink_debug!(
            self.logger,
            "[PlaybackFlowControl] sample rate {} rcvd {} lost {} size {} dur {}ms",
            sample.observed_rate,
            sample.packets_received,
            sample.packets_lost,
            sample.packet_size_avg,
            sample.duration_ms
        );
        self.history.push_front(sample);

        // Keep the newest samples whose accumulated duration fits the window.
        let window_ms = STATS_HISTORY_WINDOW.as_millis() as u64;
        let mut total_ms = 0_u64;
        let keep = self
            .history
            .iter()
            .take_while(|rs| {
                total_ms += u64::from(rs.duration_ms);
                total_ms <= window_ms
            })
            .count()
            .max(1);
        self.history.truncate(keep);

        let total_ms = self.history_duration_ms();
        if total_ms >= RECENT_HISTORY_WINDOW.as_millis() as u64 {
            self.average_rate = self.average_rate_calculate(total_ms);
            let capped_loss: f64 = self
                .history
                .iter()
                .map(|rs| rs.loss_ratio().min(AVERAGE_LOSS_SAMPLE_CAP))
                .sum();
            self.average_loss_ratio = capped_loss / self.history.len() as f64;
        }
    }

    /// Mean observed rate of the newest samples covering `window_ms`.
    fn average_rate_calculate(&self, window_ms: u64) -> u32 {
        let mut rate_sum = 0_u64;
        let mut duration_ms = 0_u64;
        let mut count = 0_u64;
        for rs in &self.history {
            count += 1;
            rate_sum += u64::from(rs.observed_rate);
            duration_ms += u64::from(rs.duration_ms);
            if duration_ms >= window_ms {
                break;
            }
        }
        match count {
            0 => 0,
            n => u32::try_from(rate_sum / n).unwrap_or(u32::MAX),
        }
    }

    fn recent_average_rate(&self) -> u32 {
        self.average_rate_calculate(RECENT_HISTORY_WINDOW.as_millis() as u64)
    }

    fn bandwidth_limit_calculate(&self, now: Instant) -> u32 {
        let Some(rs) = self.newest() else {
            return self.bandwidth_limit;
        };
        let recent_average = self.recent_average_rate();
        let loss = rs.loss_ratio();
        let acceptable = acceptable_loss_at_rate(rs.observed_rate);

        if loss <= acceptable && rs.actual_loss_ratio() <= acceptable {
            let waited = now.saturating_duration_since(self.last_bandwidth_limit_change)
                >= MIN_TIME_BETWEEN_CEILING_INCREASES;
            let utilized = f64::from(recent_average)
                >= f64::from(self.bandwidth_limit) * RATE_UTILIZATION_NEEDED_FOR_INCREASE;
            if waited && utilized {
                let index = usize::from(self.bandwidth_limit_decrease_count)
                    .min(CEILING_INCREASE_MULTIPLIERS.len() - 1);
                let raised = (self.bandwidth_limit as f32 * CEILING_INCREASE_MULTIPLIERS[index]) as u32;
                return raised.min(self.absolute_max_rate);
            }
        } else if loss > acceptable
            && self.history_duration_ms() >= RECENT_HISTORY_WINDOW.as_millis() as u64
        {
            // Only loss that follows a rate climb says anything about the
            // ceiling; steady background loss does not.
            let rate_climbed = f64::from(rs.observed_rate)
                > f64::from(recent_average) * CEILING_CUT_RATE_CLIMB_FACTOR;
            let loss_spiked = loss > self.average_loss_ratio * CEILING_CUT_LOSS_FACTOR;
            if rate_climbed && loss_spiked {
                let cut = (f64::from(recent_average) * CEILING_CUT_FRACTION) as u32;
                return cut.max(MINIMUM_RATE_BYTES_PER_SECOND);
            }
        }
        self.bandwidth_limit
    }

    fn rate_decrease_check(&self, now: Instant) -> bool {
        let Some(rs) = self.newest() else {
            return false;
        };
        rs.loss_ratio() > acceptable_loss_at_rate(rs.observed_rate)
            && now.saturating_duration_since(self.last_rate_decrease) >= MIN_TIME_BETWEEN_DECREASES
    }

    /// Loss-proportional cut of the observed rate, between 5% and 40%, never
    /// above the ceiling nor below the floor.
    fn rate_decrease_calculate(&self) -> u32 {
        let Some(rs) = self.newest() else {
            return self.current_max_rate;
        };
        let multiplier =
            (1.0 - rs.loss_ratio()).clamp(DECREASE_MULTIPLIER_MIN, DECREASE_MULTIPLIER_MAX);
        let lowered = ((f64::from(rs.observed_rate) * multiplier) as u32).min(self.bandwidth_limit);
        lowered.max(MINIMUM_RATE_BYTES_PER_SECOND)
    }

    fn rate_increase_check(&self, now: Instant) -> bool {
        let Some(rs) = self.newest() else {
            return false;
        };
        if self.current_max_rate >= self.bandwidth_limit
            || self.history_duration_ms() < RECENT_HISTORY_WINDOW.as_millis() as u64
        {
            return false;
        }

        let threshold = f64::from(self.current_max_rate) * RATE_UTILIZATION_NEEDED_FOR_INCREASE;
        let recent_average = self.recent_average_rate();
        if f64::from(recent_average) < threshold || f64::from(rs.observed_rate) < threshold {
            sink_debug!(
                self.logger,
                "[PlaybackFlowControl] utilization too low for increase (observed {}, recent {}, threshold {})",
                rs.observed_rate,
                recent_average,
                threshold
            );
            return false;
        }

        if rs.actual_loss_ratio() > acceptable_loss_at_rate(rs.observed_rate) {
            return false;
        }

        now.saturating_duration_since(self.last_rate_change) >= MIN_TIME_BETWEEN_INCREASES
    }

    /// Steps shrink geometrically with each ceiling cut, never below 2%.
    fn rate_increase_calculate(&self) -> u32 {
        let decay = RATE_INCREASE_DECAY_MULTIPLIER
            .powi(i32::from(self.bandwidth_limit_decrease_count));
        let multiplier = (INCREASE_MULTIPLIER_SCALAR * decay).max(INCREASE_MULTIPLIER_MIN);
        ((f64::from(self.current_max_rate) * multiplier) as u32).min(self.bandwidth_limit)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::NoopLogSink;

    const PACKET: u32 = 1_000; // 8_000 bits per packet per second

    struct Feed {
        fc: PlaybackFlowControl,
        t0: Instant,
        second: u64,
    }

    impl Feed {
        fn new(absolute_max: u32) -> Self {
            let t0 = Instant::now();
            Self {
                fc: PlaybackFlowControl::new_at(absolute_max, t0, Arc::new(NoopLogSink)),
                t0,
                second: 0,
            }
        }

        /// One 1-second sample; `received * 8000` bps observed.
        fn step(&mut self, received: u32, lost: u32) -> u32 {
            self.second += 1;
            let now = self.t0 + Duration::from_secs(self.second);
            self.fc
                .max_rate_calculate_at(now, ReceiveStats::new(1_000, received, lost, PACKET, lost))
        }

        fn steps(&mut self, n: usize, received: u32) -> u32 {
            let mut rate = self.fc.max_rate_get();
            for _ in 0..n {
                rate = self.step(received, 0);
            }
            rate
        }
    }

    #[test]
    fn zero_duration_and_empty_intervals_change_nothing() {
        let mut f = Feed::new(1_000_000);
        let now = f.t0 + Duration::from_secs(5);
        assert_eq!(
            f.fc.max_rate_calculate_at(now, ReceiveStats::new(0, 100, 50, PACKET, 50)),
            1_000_000
        );
        assert_eq!(
            f.fc.max_rate_calculate_at(now, ReceiveStats::new(1_000, 0, 0, 0, 0)),
            1_000_000
        );
        assert_eq!(f.fc.history_duration(), Duration::ZERO);
    }

    #[test]
    fn history_is_bounded_to_the_window() {
        let mut f = Feed::new(2_000_000);
        f.steps(45, 100);
        assert_eq!(f.fc.history_duration(), STATS_HISTORY_WINDOW);
        assert_eq!(f.fc.average_rate(), 800_000);
    }

    #[test]
    fn averages_wait_for_the_recent_window() {
        let mut f = Feed::new(2_000_000);
        f.steps(14, 100);
        assert_eq!(f.fc.average_rate(), 0);
        f.step(100, 0);
        assert_eq!(f.fc.average_rate(), 800_000);
        assert_eq!(f.fc.average_loss_ratio(), 0.0);
    }

    #[test]
    fn average_loss_caps_each_sample() {
        let mut f = Feed::new(2_000_000);
        f.steps(14, 100);
        // 50% loss counts as 5%.
        f.step(50, 50);
        assert!((f.fc.average_loss_ratio() - 0.05 / 15.0).abs() < 1e-12);
    }

    #[test]
    fn loss_cuts_the_rate_but_not_below_the_floor() {
        let mut f = Feed::new(2_000_000);
        f.steps(3, 200);
        let before = f.fc.max_rate_get();

        // 10% loss at 1.6 Mbps; acceptable there is 0.25%.
        let after = f.step(180, 20);
        assert!(after <= before);
        assert!(after >= MINIMUM_RATE_BYTES_PER_SECOND);
        assert_eq!(after, (1_440_000.0 * 0.9) as u32);
        assert_eq!(f.fc.rate_decrease_count(), 1);
    }

    #[test]
    fn cut_is_at_most_forty_percent_and_floored() {
        let mut f = Feed::new(2_000_000);
        f.steps(3, 200);
        assert_eq!(f.step(100, 100), (800_000.0 * 0.60) as u32);

        let mut low = Feed::new(2_000_000);
        low.steps(3, 40);
        assert_eq!(low.step(30, 10), MINIMUM_RATE_BYTES_PER_SECOND);
    }

    #[test]
    fn decreases_are_spaced_two_seconds_apart() {
        let mut f = Feed::new(2_000_000);
        f.steps(3, 200);
        let first = f.step(180, 20);
        let second = f.step(150, 20);
        assert_eq!(first, second);
        assert_eq!(f.fc.rate_decrease_count(), 1);
        let third = f.step(150, 20);
        assert!(third < second);
        assert_eq!(f.fc.rate_decrease_count(), 2);
    }

    #[test]
    fn loss_within_the_table_is_tolerated() {
        let mut f = Feed::new(2_000_000);
        f.steps(3, 60);
        // 1% loss at 396 kbps is under the ~1.45% allowed there.
        let now = f.t0 + Duration::from_secs(4);
        let sample = ReceiveStats::new(1_000, 99, 1, 500, 1);
        assert_eq!(sample.observed_rate, 396_000);
        assert_eq!(f.fc.max_rate_calculate_at(now, sample), 2_000_000);
        assert_eq!(f.fc.rate_decrease_count(), 0);
    }

    #[test]
    fn clean_reception_near_the_max_raises_it_after_ten_seconds() {
        let mut f = Feed::new(2_000_000);
        f.steps(15, 237);
        let cut = f.step(225, 12);
        assert!(cut < 2_000_000);
        assert_eq!(f.fc.bandwidth_limit(), 2_000_000);

        let mut rates = Vec::new();
        for _ in 0..12 {
            rates.push(f.step(237, 0));
        }
        assert_eq!(&rates[..9], &[cut; 9]);
        let raised = ((f64::from(cut) * 1.08) as u32).min(2_000_000);
        assert_eq!(rates[9], raised);
        assert!(raised > cut);
        assert_eq!(f.fc.rate_increase_count(), 1);
        assert!(rates.iter().all(|r| *r <= f.fc.bandwidth_limit()));
    }

    #[test]
    fn low_utilization_blocks_increases() {
        let mut f = Feed::new(2_000_000);
        f.steps(15, 237);
        let cut = f.step(225, 12);
        // 800 kbps is well under 70% of the cut rate.
        assert_eq!(f.steps(30, 100), cut);
        assert_eq!(f.fc.rate_increase_count(), 0);
    }

    #[test]
    fn loss_after_a_rate_climb_lowers_the_ceiling_which_recovers_slowly() {
        let mut f = Feed::new(3_000_000);
        f.steps(15, 125);

        // Jump to 1.28 Mbps with ~5.9% loss.
        let rate = f.step(160, 10);
        let limit = f.fc.bandwidth_limit();
        assert!(limit < 3_000_000);
        assert!(limit >= MINIMUM_RATE_BYTES_PER_SECOND);
        assert_eq!(rate, limit);
        assert_eq!(f.fc.rate_decrease_count(), 1);

        // Steady 800 kbps, above 70% of the new ceiling.
        f.steps(59, 100);
        assert_eq!(f.fc.bandwidth_limit(), limit);
        f.step(100, 0);
        let raised = f.fc.bandwidth_limit();
        assert_eq!(raised, (limit as f32 * 1.0226) as u32);
        assert!(f.fc.max_rate_get() <= raised);
    }

    #[test]
    fn steady_background_loss_leaves_the_ceiling_alone() {
        let mut f = Feed::new(3_000_000);
        for _ in 0..20 {
            f.step(95, 5);
        }
        assert_eq!(f.fc.bandwidth_limit(), 3_000_000);
        assert!(f.fc.max_rate_get() < 3_000_000);
    }

    #[test]
    fn ceiling_never_exceeds_absolute_max() {
        let mut f = Feed::new(1_000_000);
        f.steps(200, 125);
        assert_eq!(f.fc.bandwidth_limit(), 1_000_000);
        assert_eq!(f.fc.max_rate_get(), 1_000_000);
    }
}
