use std::time::Duration;

// ---------------------- Playback (receive side) ----------------------

/// Samples older than this much accumulated duration are discarded.
pub const STATS_HISTORY_WINDOW: Duration = Duration::from_secs(30);

/// History needed before averages, increases and ceiling cuts are trusted.
pub const RECENT_HISTORY_WINDOW: Duration = Duration::from_secs(15);

/// Fraction of the current max (or ceiling) that must be in use to raise it.
pub const RATE_UTILIZATION_NEEDED_FOR_INCREASE: f64 = 0.70;

/// Each ceiling cut shrinks later increase steps by this factor.
pub const RATE_INCREASE_DECAY_MULTIPLIER: f64 = 0.75;

/// Floor for any rate the receive side publishes. Bits per second, despite the
/// historical name.
pub const MINIMUM_RATE_BYTES_PER_SECOND: u32 = 256_000;

/// (rate, acceptable loss fraction), highest rate first.
pub const ACCEPTABLE_LOSS_TABLE: [(u32, f64); 3] =
    [(1_024_000, 0.0025), (512_000, 0.0100), (256_000, 0.0200)];

/// Per-sample loss fraction is capped here before averaging.
pub const AVERAGE_LOSS_SAMPLE_CAP: f64 = 0.05;

pub const MIN_TIME_BETWEEN_DECREASES: Duration = Duration::from_secs(2);
pub const MIN_TIME_BETWEEN_INCREASES: Duration = Duration::from_secs(10);
pub const MIN_TIME_BETWEEN_CEILING_INCREASES: Duration = Duration::from_secs(60);

/// Loss-proportional cut bounds: at least 5%, at most 40%.
pub const DECREASE_MULTIPLIER_MAX: f64 = 0.95;
pub const DECREASE_MULTIPLIER_MIN: f64 = 0.60;

pub const INCREASE_MULTIPLIER_MIN: f64 = 1.02;
pub const INCREASE_MULTIPLIER_SCALAR: f64 = 1.08;

/// Ceiling raise steps indexed by prior ceiling cuts, last entry repeating.
pub const CEILING_INCREASE_MULTIPLIERS: [f32; 5] = [1.0226, 1.0226, 1.0226, 1.0075, 1.003_75];

/// A loss spike only lowers the ceiling when the sample's rate tops the recent
/// average by this factor ...
pub const CEILING_CUT_RATE_CLIMB_FACTOR: f64 = 1.15;
/// ... and its loss tops the average loss ratio by this one.
pub const CEILING_CUT_LOSS_FACTOR: f64 = 1.25;
/// New ceiling as a fraction of the recent average rate.
pub const CEILING_CUT_FRACTION: f64 = 0.80;

// ---------------------- Record (send side) ----------------------

/// Each step raises the send rate by this fraction of itself.
pub const RATE_INCREASE_PERCENTAGE: f32 = 0.016;

pub const MIN_SEND_RATE_INCREASE_INTERVAL: Duration = Duration::from_secs(2);

pub const MIN_SEND_RATE_INCREASE_BITS_PER_SEC: u32 = 8_000;

/// Starting rate without history, and the floor for a history-derived one.
pub const MIN_STARTING_SEND_RATE_BITS_PER_SEC: u32 = 512_000;
