use super::constants::ACCEPTABLE_LOSS_TABLE;

/// Loss fraction tolerated at `rate` bits per second.
///
/// Piecewise linear over [`ACCEPTABLE_LOSS_TABLE`]: exact at each breakpoint,
/// interpolated between neighbours, flat beyond either end. Higher rates
/// tolerate less loss, so the result never grows as `rate` grows.
#[must_use]
pub fn acceptable_loss_at_rate(rate: u32) -> f64 {
    let (top_rate, top_loss) = ACCEPTABLE_LOSS_TABLE[0];
    let (bottom_rate, bottom_loss) = ACCEPTABLE_LOSS_TABLE[ACCEPTABLE_LOSS_TABLE.len() - 1];

    if rate >= top_rate {
        return top_loss;
    }
    if rate <= bottom_rate {
        return bottom_loss;
    }

    // Pairs run high -> low; find the one straddling `rate`.
    for pair in ACCEPTABLE_LOSS_TABLE.windows(2) {
        let (hi_rate, hi_loss) = pair[0];
        let (lo_rate, lo_loss) = pair[1];
        if rate >= lo_rate && rate <= hi_rate {
            let ratio = f64::from(rate - lo_rate) / f64::from(hi_rate - lo_rate);
            return lo_loss + ratio * (hi_loss - lo_loss);
        }
    }
    bottom_loss
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn breakpoints_are_exact() {
        assert_eq!(acceptable_loss_at_rate(1_024_000), 0.0025);
        assert_eq!(acceptable_loss_at_rate(512_000), 0.0100);
        assert_eq!(acceptable_loss_at_rate(256_000), 0.0200);
    }

    #[test]
    fn beyond_the_table_is_flat() {
        assert_eq!(acceptable_loss_at_rate(u32::MAX), 0.0025);
        assert_eq!(acceptable_loss_at_rate(2_000_000), 0.0025);
        assert_eq!(acceptable_loss_at_rate(100_000), 0.0200);
        assert_eq!(acceptable_loss_at_rate(0), 0.0200);
    }

    #[test]
    fn midpoints_interpolate() {
        let mid_high = acceptable_loss_at_rate(768_000);
        assert!(mid_high > 0.0025 && mid_high < 0.01);
        assert!(close(mid_high, 0.00625));
        assert!(close(acceptable_loss_at_rate(384_000), 0.015));
    }

    #[test]
    fn neighbours_of_each_breakpoint_stay_between_segments() {
        for (rate, loss) in ACCEPTABLE_LOSS_TABLE {
            let below = acceptable_loss_at_rate(rate - 1);
            let above = acceptable_loss_at_rate(rate + 1);
            assert!(below >= loss, "{rate}-1 -> {below}");
            assert!(above <= loss, "{rate}+1 -> {above}");
            assert!(close(below, loss) || below - loss < 1e-4);
            assert!(close(above, loss) || loss - above < 1e-4);
        }
    }

    #[test]
    fn never_increases_with_rate() {
        let mut prev = f64::INFINITY;
        for rate in (0..=1_200_000).step_by(1_000) {
            let loss = acceptable_loss_at_rate(rate);
            assert!(loss <= prev, "loss rose at {rate}");
            prev = loss;
        }
    }
}
