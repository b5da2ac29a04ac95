use rand::Rng;

/// Exponent slope of the multiplier curve: 0.003 per 50 ms tick.
pub const GROWTH_PER_MS: f64 = 6e-5;

/// Ticks stop being recorded for the client graph past this many points.
pub const GRAPH_POINT_CAP: usize = 2_500;

/// Weighted pool the crash point is drawn from: (value, weight).
const CRASH_POOL: &[(u32, u32)] = &[
    (1, 50),
    (2, 25),
    (3, 10),
    (4, 9),
    (5, 3),
    (10, 2),
    (100, 1),
];

/// Sample the crash point for a new round, two-decimal precision.
///
/// A value drawn from the weighted pool is re-rolled uniformly down to 1,
/// so large multipliers stay rare even when their bucket is hit. Values at
/// 1 get a small fractional tail; larger values get a random two-digit
/// fraction with a non-zero last digit, capped at 100.
pub fn sample_crash_point<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let total: u32 = CRASH_POOL.iter().map(|(_, w)| w).sum();
    let mut pick = rng.gen_range(0..total);
    let mut v = 1;
    for &(value, weight) in CRASH_POOL {
        if pick < weight {
            v = value;
            break;
        }
        pick -= weight;
    }

    if v > 1 {
        v = rng.gen_range(1..=v);
    }
    if v <= 1 {
        let tail = rng.gen_range(0..10);
        return (100 + tail) as f64 / 100.0;
    }
    let d1 = rng.gen_range(0..10);
    let d2 = rng.gen_range(1..10);
    let cents = v * 100 + d1 * 10 + d2;
    (cents.min(100 * 100)) as f64 / 100.0
}

/// Current multiplier for a running round, rounded to two decimals.
pub fn multiplier_at(elapsed_ms: u64) -> f64 {
    let raw = (GROWTH_PER_MS * elapsed_ms as f64).exp();
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_crash_point_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..10_000 {
            let p = sample_crash_point(&mut rng);
            assert!((1.0..=100.0).contains(&p), "out of range: {p}");
            // two-decimal precision
            let cents = (p * 100.0).round();
            assert!((p * 100.0 - cents).abs() < 1e-9);
        }
    }

    #[test]
    fn test_crash_point_mostly_low() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut low = 0u32;
        let n = 10_000;
        for _ in 0..n {
            if sample_crash_point(&mut rng) < 2.0 {
                low += 1;
            }
        }
        // The pool puts half its weight on 1 and re-rolls high picks down,
        // so well over half of all rounds crash below 2x.
        assert!(low > n / 2, "only {low} of {n} below 2x");
    }

    #[test]
    fn test_multiplier_curve() {
        assert_eq!(multiplier_at(0), 1.0);
        // 0.003 per 50ms tick
        assert_eq!(multiplier_at(50), 1.0);
        assert!(multiplier_at(11_550) > 1.99 && multiplier_at(11_550) < 2.01);
        let mut last = 0.0;
        for ms in (0..60_000).step_by(50) {
            let m = multiplier_at(ms);
            assert!(m >= last);
            last = m;
        }
    }
}
