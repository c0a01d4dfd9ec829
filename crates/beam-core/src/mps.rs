use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const DEFAULT_WARNING_THRESHOLD: f64 = 1e-6;
pub const DEFAULT_ABORT_THRESHOLD: f64 = 1e-5;

/// Background loss rate in Gy/s used by the loss estimate.
const BASE_LOSS: f64 = 1e-8;

/// Alarm callback for human-readable protection messages. Notification
/// only: it must not mutate protection state and must return without
/// suspending.
pub type AlarmCallback = Box<dyn FnMut(&str) + Send>;

/// Outcome of one safety evaluation. The control loop interprets this
/// value and applies the resulting state transition itself; the MPS only
/// latches its own permit flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SafetyDecision {
    Safe,
    /// A monitor crossed its warning threshold this tick (rising edge).
    Warn { blm: usize, loss_rate: f64 },
    /// The beam permit is revoked; `blm` indexes the tripping monitor.
    Abort { blm: usize, loss_rate: f64 },
}

impl SafetyDecision {
    pub fn is_safe(&self) -> bool {
        !matches!(self, SafetyDecision::Abort { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlmStats {
    pub total_measurements: u64,
    pub warning_count: u64,
    pub abort_count: u64,
    pub loss_rate: f64,
    pub warning_active: bool,
    pub abort_active: bool,
}

/// A simulated beam-loss monitor: a radiation detector whose estimated
/// loss rate is derived from beam intensity and position.
#[derive(Debug, Clone)]
pub struct BeamLossMonitor {
    id: String,
    position: f64,
    warning_threshold: f64,
    abort_threshold: f64,
    stats: BlmStats,
}

enum BlmEvent {
    Quiet,
    WarningEdge(f64),
    AbortEdge(f64),
}

impl BeamLossMonitor {
    pub fn new(id: impl Into<String>, position: f64) -> Self {
        Self {
            id: id.into(),
            position,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            abort_threshold: DEFAULT_ABORT_THRESHOLD,
            stats: BlmStats::default(),
        }
    }

    pub fn with_thresholds(mut self, warning: f64, abort: f64) -> Self {
        self.warning_threshold = warning;
        self.abort_threshold = abort;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn stats(&self) -> &BlmStats {
        &self.stats
    }

    /// Loss climbs with beam current and with distance off axis.
    fn estimate_loss(&self, intensity: f64, beam_position: f64) -> f64 {
        let position_factor = 1.0 + beam_position.abs() * 0.1;
        let current_factor = intensity / 1000.0;
        BASE_LOSS * position_factor * current_factor
    }

    fn update(&mut self, intensity: f64, beam_position: f64) -> BlmEvent {
        self.stats.total_measurements += 1;
        let loss = self.estimate_loss(intensity, beam_position);
        self.stats.loss_rate = loss;

        let abort = loss > self.abort_threshold;
        let warning = loss > self.warning_threshold;

        if abort && !self.stats.abort_active {
            self.stats.abort_active = true;
            self.stats.abort_count += 1;
            return BlmEvent::AbortEdge(loss);
        }
        if !abort {
            self.stats.abort_active = false;
        }

        if warning && !self.stats.warning_active {
            self.stats.warning_active = true;
            self.stats.warning_count += 1;
            return BlmEvent::WarningEdge(loss);
        }
        if !warning {
            self.stats.warning_active = false;
        }

        BlmEvent::Quiet
    }

    fn reset(&mut self) {
        self.stats = BlmStats::default();
    }
}

/// Machine protection: aggregates the beam-loss monitors and holds beam
/// abort authority. An abort latches until `reset_mps` is called.
pub struct MachineProtection {
    blms: Vec<BeamLossMonitor>,
    beam_permit: AtomicBool,
    abort_latched: AtomicBool,
    total_aborts: AtomicU64,
    tripped_blm: Option<usize>,
    alarm_callback: Option<AlarmCallback>,
}

impl MachineProtection {
    /// Standard beamline layout: one monitor 5 m upstream of the target,
    /// one at the interaction point, one 5 m downstream.
    pub fn new() -> Self {
        Self::with_blms(vec![
            BeamLossMonitor::new("BLM_UPSTREAM", -5.0),
            BeamLossMonitor::new("BLM_TARGET", 0.0),
            BeamLossMonitor::new("BLM_DOWNSTREAM", 5.0),
        ])
    }

    pub fn with_blms(blms: Vec<BeamLossMonitor>) -> Self {
        Self {
            blms,
            beam_permit: AtomicBool::new(true),
            abort_latched: AtomicBool::new(false),
            total_aborts: AtomicU64::new(0),
            tripped_blm: None,
            alarm_callback: None,
        }
    }

    /// Must be registered before the control loop starts and not changed
    /// afterwards.
    pub fn set_alarm_callback(&mut self, callback: AlarmCallback) {
        self.alarm_callback = Some(callback);
    }

    /// Evaluate all monitors against the current beam conditions.
    ///
    /// While an abort is latched the monitors are not re-evaluated; the
    /// previous abort decision is returned so callers stay inhibited.
    /// The abort alarm is emitted exactly once, on the latching edge.
    pub fn check_safety(&mut self, intensity: f64, position: f64) -> SafetyDecision {
        if self.abort_latched.load(Ordering::Relaxed) || !self.beam_permit.load(Ordering::Relaxed) {
            let blm = self.tripped_blm.unwrap_or(0);
            let loss_rate = self
                .blms
                .get(blm)
                .map(|b| b.stats.loss_rate)
                .unwrap_or_default();
            return SafetyDecision::Abort { blm, loss_rate };
        }

        let mut warning: Option<(usize, f64)> = None;
        for index in 0..self.blms.len() {
            match self.blms[index].update(intensity, position) {
                BlmEvent::AbortEdge(loss_rate) => {
                    self.trigger_abort(index, loss_rate);
                    return SafetyDecision::Abort {
                        blm: index,
                        loss_rate,
                    };
                }
                BlmEvent::WarningEdge(loss_rate) => {
                    if warning.is_none() {
                        warning = Some((index, loss_rate));
                    }
                    self.emit_warning(index, loss_rate);
                }
                BlmEvent::Quiet => {}
            }
        }

        match warning {
            Some((blm, loss_rate)) => SafetyDecision::Warn { blm, loss_rate },
            None => SafetyDecision::Safe,
        }
    }

    fn trigger_abort(&mut self, index: usize, loss_rate: f64) {
        self.abort_latched.store(true, Ordering::Relaxed);
        self.beam_permit.store(false, Ordering::Relaxed);
        self.total_aborts.fetch_add(1, Ordering::Relaxed);
        self.tripped_blm = Some(index);

        let id = self.blms[index].id.clone();
        tracing::error!(blm = %id, loss_rate, "beam abort");
        if let Some(cb) = self.alarm_callback.as_mut() {
            cb(&format!(
                "BEAM ABORT: {id} loss rate {loss_rate:.3e} Gy/s exceeds abort threshold"
            ));
        }
    }

    fn emit_warning(&mut self, index: usize, loss_rate: f64) {
        let id = self.blms[index].id.clone();
        tracing::warn!(blm = %id, loss_rate, "beam loss warning");
        if let Some(cb) = self.alarm_callback.as_mut() {
            cb(&format!("BLM WARNING: {id} loss rate {loss_rate:.3e} Gy/s"));
        }
    }

    /// True only when the beam is permitted and no abort is latched.
    pub fn is_beam_permitted(&self) -> bool {
        self.beam_permit.load(Ordering::Relaxed) && !self.abort_latched.load(Ordering::Relaxed)
    }

    pub fn is_abort_latched(&self) -> bool {
        self.abort_latched.load(Ordering::Relaxed)
    }

    pub fn abort_count(&self) -> u64 {
        self.total_aborts.load(Ordering::Relaxed)
    }

    pub fn blm_id(&self, index: usize) -> Option<&str> {
        self.blms.get(index).map(|b| b.id.as_str())
    }

    pub fn blm_stats(&self) -> Vec<BlmStats> {
        self.blms.iter().map(|b| b.stats.clone()).collect()
    }

    /// Restore the operational state after an abort. Thresholds and
    /// monitor identities are untouched; per-monitor counters are cleared.
    pub fn reset_mps(&mut self) {
        self.abort_latched.store(false, Ordering::Relaxed);
        self.beam_permit.store(true, Ordering::Relaxed);
        self.tripped_blm = None;
        for blm in &mut self.blms {
            blm.reset();
        }
    }
}

impl Default for MachineProtection {
    fn default() -> Self {
        Self::new()
    }
}
