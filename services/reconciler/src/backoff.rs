//! Bounded exponential backoff with jitter

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Next delay: the current step plus up to half of it again, capped at
    /// `max`. Doubles the step for the following call.
    pub fn next_delay(&mut self) -> Duration {
        let step = self.current;
        self.current = (self.current * 2).min(self.max);

        let half = step.as_millis() as u64 / 2;
        let jitter = if half == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half)
        };
        (step + Duration::from_millis(jitter)).min(self.max)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_stay_bounded() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_millis(1_000);
        let mut backoff = Backoff::new(initial, max);

        let first = backoff.next_delay();
        assert!(first >= initial && first <= Duration::from_millis(150));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(200));

        for _ in 0..20 {
            assert!(backoff.next_delay() <= max);
        }
        assert_eq!(backoff.next_delay(), max);
    }

    #[test]
    fn test_reset_returns_to_initial_step() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_millis(15));
    }

    #[test]
    fn test_initial_above_max_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
