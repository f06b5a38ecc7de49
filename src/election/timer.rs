use rand::Rng;
use std::time::Duration;

/// Maximum extra fraction added to the retry period of a contender.
pub const JITTER_FACTOR: f64 = 0.2;

/// Stretches `period` by a random fraction in `[0, factor)` so contenders
/// polling the same record drift apart.
pub fn jittered(period: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return period;
    }
    let mut rng = rand::thread_rng();
    let extra = rng.gen_range(0.0..factor);
    period + period.mul_f64(extra)
}
