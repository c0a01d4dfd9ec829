use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback invoked with the consecutive-violation count that crossed the
/// configured threshold. Must return without suspending.
pub type ViolationCallback = Box<dyn FnMut(u32) + Send>;

/// Execution-time statistics, shared with any-thread readers while the
/// loop thread writes.
#[derive(Debug)]
pub struct WatchdogStats {
    total_checks: AtomicU64,
    total_violations: AtomicU64,
    total_warnings: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
    sum_ns: AtomicU64,
}

impl WatchdogStats {
    fn new() -> Self {
        Self {
            total_checks: AtomicU64::new(0),
            total_violations: AtomicU64::new(0),
            total_warnings: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
        }
    }

    fn record(&self, exec_ns: u64) {
        self.sum_ns.fetch_add(exec_ns, Ordering::Relaxed);

        // Min/max race against concurrent readers; compare-exchange retry
        // keeps the update lock-free.
        let mut current = self.min_ns.load(Ordering::Relaxed);
        while exec_ns < current {
            match self.min_ns.compare_exchange_weak(
                current,
                exec_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        let mut current = self.max_ns.load(Ordering::Relaxed);
        while exec_ns > current {
            match self.max_ns.compare_exchange_weak(
                current,
                exec_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn clear(&self) {
        self.total_checks.store(0, Ordering::Relaxed);
        self.total_violations.store(0, Ordering::Relaxed);
        self.total_warnings.store(0, Ordering::Relaxed);
        self.min_ns.store(u64::MAX, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
        self.sum_ns.store(0, Ordering::Relaxed);
    }

    pub fn total_checks(&self) -> u64 {
        self.total_checks.load(Ordering::Relaxed)
    }

    pub fn total_violations(&self) -> u64 {
        self.total_violations.load(Ordering::Relaxed)
    }

    pub fn total_warnings(&self) -> u64 {
        self.total_warnings.load(Ordering::Relaxed)
    }

    /// Minimum observed execution time; zero before the first check.
    pub fn min_execution(&self) -> Duration {
        let ns = self.min_ns.load(Ordering::Relaxed);
        if ns == u64::MAX {
            Duration::ZERO
        } else {
            Duration::from_nanos(ns)
        }
    }

    pub fn max_execution(&self) -> Duration {
        Duration::from_nanos(self.max_ns.load(Ordering::Relaxed))
    }

    pub fn mean_execution_ns(&self) -> f64 {
        let checks = self.total_checks();
        if checks == 0 {
            return 0.0;
        }
        self.sum_ns.load(Ordering::Relaxed) as f64 / checks as f64
    }

    /// Fraction of checks that missed the deadline, in [0, 1].
    pub fn violation_rate(&self) -> f64 {
        let checks = self.total_checks();
        if checks == 0 {
            return 0.0;
        }
        self.total_violations() as f64 / checks as f64
    }

    pub fn warning_rate(&self) -> f64 {
        let checks = self.total_checks();
        if checks == 0 {
            return 0.0;
        }
        self.total_warnings() as f64 / checks as f64
    }
}

/// Deadline monitor for the control loop.
///
/// Classifies each iteration against a time budget, keeps running
/// statistics, and notifies on sustained violations. Purely observational:
/// corrective action is the control core's responsibility.
pub struct Watchdog {
    budget: Duration,
    warning_threshold: Duration,
    warning_ratio: f64,

    tripped: AtomicBool,
    consecutive_misses: AtomicU32,
    consecutive_warnings: AtomicU32,

    critical_after: u32,
    warn_after: u32,
    critical_callback: Option<ViolationCallback>,
    warning_callback: Option<ViolationCallback>,

    stats: Arc<WatchdogStats>,
}

impl Watchdog {
    pub fn new(budget: Duration) -> Self {
        Self::with_warning_ratio(budget, 0.8)
    }

    pub fn with_warning_ratio(budget: Duration, warning_ratio: f64) -> Self {
        Self {
            budget,
            warning_threshold: budget.mul_f64(warning_ratio),
            warning_ratio,
            tripped: AtomicBool::new(false),
            consecutive_misses: AtomicU32::new(0),
            consecutive_warnings: AtomicU32::new(0),
            critical_after: 5,
            warn_after: 10,
            critical_callback: None,
            warning_callback: None,
            stats: Arc::new(WatchdogStats::new()),
        }
    }

    /// Consecutive-violation counts at which the callbacks fire.
    pub fn set_thresholds(&mut self, critical_after: u32, warn_after: u32) {
        self.critical_after = critical_after;
        self.warn_after = warn_after;
    }

    pub fn set_critical_callback(&mut self, callback: ViolationCallback) {
        self.critical_callback = Some(callback);
    }

    pub fn set_warning_callback(&mut self, callback: ViolationCallback) {
        self.warning_callback = Some(callback);
    }

    /// Check one iteration's execution window. Returns true on a deadline
    /// miss. Each callback fires exactly once per rising edge of its
    /// consecutive counter.
    pub fn check(&mut self, start: Instant, end: Instant) -> bool {
        self.check_duration(end.saturating_duration_since(start))
    }

    pub fn check_duration(&mut self, execution: Duration) -> bool {
        self.stats.total_checks.fetch_add(1, Ordering::Relaxed);
        self.stats.record(execution.as_nanos() as u64);

        let missed = execution > self.budget;
        self.tripped.store(missed, Ordering::Relaxed);
        if missed {
            self.stats.total_violations.fetch_add(1, Ordering::Relaxed);
            let run = self.consecutive_misses.fetch_add(1, Ordering::Relaxed) + 1;
            if run == self.critical_after {
                if let Some(cb) = self.critical_callback.as_mut() {
                    cb(run);
                }
            }
        } else {
            self.consecutive_misses.store(0, Ordering::Relaxed);
        }

        if execution > self.warning_threshold {
            self.stats.total_warnings.fetch_add(1, Ordering::Relaxed);
            let run = self.consecutive_warnings.fetch_add(1, Ordering::Relaxed) + 1;
            if run == self.warn_after {
                if let Some(cb) = self.warning_callback.as_mut() {
                    cb(run);
                }
            }
        } else {
            self.consecutive_warnings.store(0, Ordering::Relaxed);
        }

        missed
    }

    /// Per-cycle reset: clears only the tripped flag. Called by the loop
    /// at the end of every iteration.
    pub fn clear_tripped(&self) {
        self.tripped.store(false, Ordering::Relaxed);
    }

    /// Clear edge-trigger state (tripped flag and consecutive counters),
    /// preserving cumulative statistics.
    pub fn reset(&self) {
        self.tripped.store(false, Ordering::Relaxed);
        self.consecutive_misses.store(0, Ordering::Relaxed);
        self.consecutive_warnings.store(0, Ordering::Relaxed);
    }

    /// Clear everything, including cumulative statistics and min/max.
    pub fn reset_all(&self) {
        self.reset();
        self.stats.clear();
    }

    /// Replace the budget; the warning threshold is recomputed from the
    /// stored ratio.
    pub fn set_budget(&mut self, budget: Duration) {
        self.budget = budget;
        self.warning_threshold = budget.mul_f64(self.warning_ratio);
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn warning_threshold(&self) -> Duration {
        self.warning_threshold
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses.load(Ordering::Relaxed)
    }

    pub fn consecutive_warnings(&self) -> u32 {
        self.consecutive_warnings.load(Ordering::Relaxed)
    }

    pub fn is_critical(&self) -> bool {
        self.consecutive_misses() >= self.critical_after
    }

    /// Handle for concurrent statistic reads from other threads.
    pub fn stats(&self) -> Arc<WatchdogStats> {
        Arc::clone(&self.stats)
    }
}
