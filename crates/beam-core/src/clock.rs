use spin_sleep::SpinSleeper;
use std::time::{Duration, Instant};

/// Drift-free periodic pacing for the control loop.
///
/// Wake targets form an arithmetic sequence in the monotonic clock domain.
/// A late wake returns immediately and advances the target by exactly one
/// period, so catch-up after an overrun is single-step and bounded: the
/// clock never skips ticks and never tries to replay missed ones.
pub struct PeriodicClock {
    period: Duration,
    next: Instant,
    sleeper: SpinSleeper,
}

impl PeriodicClock {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
            sleeper: SpinSleeper::default(),
        }
    }

    /// Suspend until the next target instant, then advance the target by
    /// one period.
    pub fn wait_until_next_tick(&mut self) {
        let now = Instant::now();
        if self.next > now {
            self.sleeper.sleep(self.next - now);
        }
        self.next += self.period;
    }

    /// Replace the period. The next target is re-based to now + period so
    /// a slow-down does not trigger a burst of catch-up ticks.
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
        self.next = Instant::now() + period;
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Remaining time until the next target; zero when already late.
    pub fn time_to_next(&self) -> Duration {
        self.next.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_periodic() {
        let period = Duration::from_millis(5);
        let mut clock = PeriodicClock::new(period);
        let start = Instant::now();
        for _ in 0..10 {
            clock.wait_until_next_tick();
        }
        let elapsed = start.elapsed();
        // 10 ticks at 5 ms; generous upper bound for loaded CI machines.
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(150));
    }

    #[test]
    fn late_wake_returns_immediately_and_advances_one_period() {
        let period = Duration::from_millis(2);
        let mut clock = PeriodicClock::new(period);
        std::thread::sleep(Duration::from_millis(20));
        // Several periods behind: the next wait must not block.
        let start = Instant::now();
        clock.wait_until_next_tick();
        assert!(start.elapsed() < Duration::from_millis(1));
        assert_eq!(clock.time_to_next(), Duration::ZERO);
    }

    #[test]
    fn set_period_rebases_next_target() {
        let mut clock = PeriodicClock::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        clock.set_period(Duration::from_millis(50));
        let remaining = clock.time_to_next();
        assert!(remaining > Duration::from_millis(40));
        assert!(remaining <= Duration::from_millis(50));
        assert_eq!(clock.period(), Duration::from_millis(50));
    }

    #[test]
    fn time_to_next_is_bounded_by_period() {
        let clock = PeriodicClock::new(Duration::from_millis(10));
        assert!(clock.time_to_next() <= Duration::from_millis(10));
    }
}
