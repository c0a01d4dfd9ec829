use crate::clock::PeriodicClock;
use crate::command::{Command, CommandEndpoint, Reply};
use crate::hal::{Actuator, PositionSensor, Sensor};
use crate::mps::{MachineProtection, SafetyDecision};
use crate::pid::Pid;
use crate::sync::{StatusExchange, StatusSnapshot};
use crate::telemetry::{TelemetryRecord, TelemetrySink};
use crate::timebase::TimeBase;
use crate::watchdog::{Watchdog, WatchdogStats};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const MIN_HZ: f64 = 10.0;
pub const MAX_HZ: f64 = 2000.0;

/// Position offset applied to the BPM per unit of magnet current. This
/// closes the simulated plant around the steering magnet; changing sign
/// or magnitude alters the closed-loop poles and invalidates tuning.
pub const PLANT_COUPLING: f64 = -0.4;

/// Misses between adaptive frequency reductions, and the reduction factor.
const ADAPT_MISS_INTERVAL: u64 = 10;
const ADAPT_FACTOR: f64 = 0.8;

pub fn clamp_frequency(hz: f64) -> f64 {
    hz.clamp(MIN_HZ, MAX_HZ)
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub hz: f64,
    pub magnet_min: f64,
    pub magnet_max: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
    pub integrator_min: f64,
    pub integrator_max: f64,
    pub warning_ratio: f64,
    /// When set, reduce the loop frequency by 20% after every ten
    /// deadline misses, through the same path as an operator `set_freq`.
    pub adaptive_frequency: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            hz: 1000.0,
            magnet_min: -2.0,
            magnet_max: 2.0,
            kp: 0.6,
            ki: 0.05,
            kd: 0.0,
            setpoint: 0.0,
            integrator_min: -10.0,
            integrator_max: 10.0,
            warning_ratio: 0.8,
            adaptive_frequency: false,
        }
    }
}

/// Flags and counters shared with other threads. Relaxed ordering
/// throughout: no other memory is published through these.
#[derive(Debug)]
pub struct LoopShared {
    pub running: AtomicBool,
    pub control_enabled: AtomicBool,
    pub emergency_stop: AtomicBool,
    pub cycle: AtomicU64,
    pub deadline_misses: AtomicU64,
}

impl LoopShared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            control_enabled: AtomicBool::new(true),
            emergency_stop: AtomicBool::new(false),
            cycle: AtomicU64::new(0),
            deadline_misses: AtomicU64::new(0),
        }
    }

    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// The real-time control core. Owns the regulator, pacing, deadline
/// monitoring and machine protection; borrows the command and telemetry
/// endpoints for the duration of `run`. Single-threaded: everything here
/// executes on the loop thread.
pub struct RtLoop<P, B, A>
where
    P: PositionSensor,
    B: Sensor,
    A: Actuator,
{
    config: LoopConfig,
    hz: f64,
    pid: Pid,
    clock: PeriodicClock,
    watchdog: Watchdog,
    mps: MachineProtection,
    bpm: P,
    bic: B,
    magnet: A,
    shared: Arc<LoopShared>,
    status: Arc<StatusExchange>,
    timebase: TimeBase,
    /// Cumulative steering offset injected into the BPM, so recommission
    /// can cancel it through the port contract.
    injected_offset: f64,
    avg_loop_time_us: f64,
    max_loop_time_us: f64,
}

impl<P, B, A> RtLoop<P, B, A>
where
    P: PositionSensor,
    B: Sensor,
    A: Actuator,
{
    pub fn new(config: LoopConfig, bpm: P, bic: B, magnet: A) -> Self {
        let hz = clamp_frequency(config.hz);
        let period = Duration::from_secs_f64(1.0 / hz);

        let mut pid = Pid::new(config.kp, config.ki, config.kd);
        pid.set_integrator_limits(config.integrator_min, config.integrator_max);
        pid.setpoint = config.setpoint;

        Self {
            hz,
            pid,
            clock: PeriodicClock::new(period),
            watchdog: Watchdog::with_warning_ratio(period, config.warning_ratio),
            mps: MachineProtection::new(),
            bpm,
            bic,
            magnet,
            shared: Arc::new(LoopShared::new()),
            status: Arc::new(StatusExchange::new()),
            timebase: TimeBase::new(),
            injected_offset: 0.0,
            avg_loop_time_us: 0.0,
            max_loop_time_us: 0.0,
            config,
        }
    }

    /// Replace the default machine protection (custom monitor layout or
    /// thresholds). Call before `run`.
    pub fn with_protection(mut self, mps: MachineProtection) -> Self {
        self.mps = mps;
        self
    }

    /// Register the protection alarm callback. Call before `run`.
    pub fn set_alarm_callback(&mut self, callback: crate::mps::AlarmCallback) {
        self.mps.set_alarm_callback(callback);
    }

    pub fn shared(&self) -> Arc<LoopShared> {
        Arc::clone(&self.shared)
    }

    pub fn status_exchange(&self) -> Arc<StatusExchange> {
        Arc::clone(&self.status)
    }

    pub fn watchdog_stats(&self) -> Arc<WatchdogStats> {
        self.watchdog.stats()
    }

    pub fn hz(&self) -> f64 {
        self.hz
    }

    /// Consume the loop until the shared `running` flag is cleared (by a
    /// `stop` command or an external actor). The actuator is commanded to
    /// zero on the way out.
    pub fn run<C, T>(&mut self, commands: &mut C, telemetry: &T)
    where
        C: CommandEndpoint,
        T: TelemetrySink,
    {
        self.timebase = TimeBase::new();
        info!(
            hz = self.hz,
            kp = self.pid.kp,
            ki = self.pid.ki,
            kd = self.pid.kd,
            setpoint = self.pid.setpoint,
            "control loop starting"
        );

        while self.shared.running.load(Ordering::Relaxed) {
            self.iteration(commands, telemetry);
            self.clock.wait_until_next_tick();
            self.watchdog.clear_tripped();
        }

        self.magnet.set(0.0);
        info!(
            cycles = self.shared.cycle.load(Ordering::Relaxed),
            deadline_misses = self.shared.deadline_misses.load(Ordering::Relaxed),
            "control loop stopped"
        );
    }

    /// One control iteration: sensors, protection, regulation, deadline
    /// accounting, telemetry, then at most one operator command.
    fn iteration<C, T>(&mut self, commands: &mut C, telemetry: &T)
    where
        C: CommandEndpoint,
        T: TelemetrySink,
    {
        let iter_start = Instant::now();
        let dt = self.clock.period().as_secs_f64();

        let position = self.bpm.read();
        let intensity = self.bic.read();

        let decision = self.mps.check_safety(intensity, position);
        if let SafetyDecision::Abort { .. } = decision {
            self.trip_emergency_stop();
        }

        let permitted = self.mps.is_beam_permitted();
        let enabled = self.shared.control_enabled.load(Ordering::Relaxed);
        let stopped = self.shared.emergency_stop.load(Ordering::Relaxed);

        if enabled && !stopped && permitted {
            let output = self
                .pid
                .step(position, dt, self.config.magnet_min, self.config.magnet_max);
            self.magnet.set(output);

            let offset = PLANT_COUPLING * output;
            self.bpm.inject_offset(offset);
            self.injected_offset += offset;
        } else {
            self.magnet.set(0.0);
        }

        let iter_end = Instant::now();
        let missed = self.watchdog.check(iter_start, iter_end);
        if missed {
            self.shared.deadline_misses.fetch_add(1, Ordering::Relaxed);
            if self.config.adaptive_frequency {
                self.maybe_reduce_frequency();
            }
        }

        let loop_time_us = (iter_end - iter_start).as_secs_f64() * 1e6;
        let prior_cycles = self.shared.cycle.fetch_add(1, Ordering::Relaxed);
        let cycle = prior_cycles + 1;
        self.avg_loop_time_us =
            (self.avg_loop_time_us * prior_cycles as f64 + loop_time_us) / cycle as f64;
        if loop_time_us > self.max_loop_time_us {
            self.max_loop_time_us = loop_time_us;
        }

        let record = TelemetryRecord {
            t: self.timebase.now_secs(),
            cycle,
            pos: position,
            intensity,
            mag: self.magnet.get(),
            deadline_miss: missed,
            mps_safe: self.mps.is_beam_permitted(),
            mps_abort: self.mps.is_abort_latched(),
            loop_time_us: loop_time_us as u32,
            pid_p: self.pid.last_proportional(),
            pid_i: self.pid.last_integral(),
            pid_d: self.pid.last_derivative(),
            control_enabled: self.shared.control_enabled.load(Ordering::Relaxed),
            emergency_stop: self.shared.emergency_stop.load(Ordering::Relaxed),
        };
        telemetry.publish(record);
        self.status.publish(self.snapshot());

        if commands.has_pending() {
            if let Some(command) = commands.receive() {
                let reply = self.handle_command(command);
                commands.send_reply(reply);
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Reply {
        match command {
            Command::SetPid { kp, ki, kd } => {
                if let Some(kp) = kp {
                    self.pid.kp = kp;
                }
                if let Some(ki) = ki {
                    self.pid.ki = ki;
                }
                if let Some(kd) = kd {
                    self.pid.kd = kd;
                }
                Reply::Ok
            }
            Command::SetFreq { hz } => {
                self.apply_frequency(clamp_frequency(hz));
                Reply::Ok
            }
            Command::SetSetpoint { sp } => {
                self.pid.set_setpoint(sp, true);
                Reply::Ok
            }
            Command::Recommission => {
                self.pid.reset();
                self.magnet.set(0.0);
                // Cancel the accumulated steering offset so the sensor
                // reads the bare beam again.
                self.bpm.inject_offset(-self.injected_offset);
                self.injected_offset = 0.0;
                self.shared.emergency_stop.store(false, Ordering::Relaxed);
                self.shared.control_enabled.store(true, Ordering::Relaxed);
                self.mps.reset_mps();
                info!("system recommissioned");
                Reply::Ok
            }
            Command::EmergencyStop => {
                self.trip_emergency_stop();
                Reply::Ok
            }
            Command::EnableControl { enable } => {
                if !self.shared.emergency_stop.load(Ordering::Relaxed) {
                    self.shared.control_enabled.store(enable, Ordering::Relaxed);
                    if !enable {
                        self.magnet.set(0.0);
                    }
                }
                Reply::Ok
            }
            Command::GetStatus => Reply::Status(self.snapshot()),
            Command::Stop => {
                self.shared.request_stop();
                Reply::Ok
            }
            Command::Invalid { reason } => Reply::Rejected { error: reason },
        }
    }

    /// Latch the emergency stop: control disabled, actuator to zero.
    /// Recovery requires an explicit recommission.
    fn trip_emergency_stop(&mut self) {
        self.shared.emergency_stop.store(true, Ordering::Relaxed);
        self.shared.control_enabled.store(false, Ordering::Relaxed);
        self.magnet.set(0.0);
    }

    /// Recompute the period from a new frequency, then update the clock
    /// and the watchdog budget, in that order. The new period is sampled
    /// at the start of the next iteration.
    fn apply_frequency(&mut self, hz: f64) {
        self.hz = hz;
        let period = Duration::from_secs_f64(1.0 / hz);
        self.clock.set_period(period);
        self.watchdog.set_budget(period);
    }

    fn maybe_reduce_frequency(&mut self) {
        let misses = self.shared.deadline_misses.load(Ordering::Relaxed);
        if misses == 0 || misses % ADAPT_MISS_INTERVAL != 0 {
            return;
        }
        let reduced = clamp_frequency(self.hz * ADAPT_FACTOR);
        if reduced != self.hz {
            warn!(
                old_hz = self.hz,
                new_hz = reduced,
                deadline_misses = misses,
                "reducing loop frequency after repeated deadline misses"
            );
            self.apply_frequency(reduced);
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            hz: self.hz,
            cycle: self.shared.cycle.load(Ordering::Relaxed),
            deadline_misses: self.shared.deadline_misses.load(Ordering::Relaxed),
            control_enabled: self.shared.control_enabled.load(Ordering::Relaxed),
            emergency_stop: self.shared.emergency_stop.load(Ordering::Relaxed),
            beam_permit: self.mps.is_beam_permitted(),
            abort_latched: self.mps.is_abort_latched(),
            abort_count: self.mps.abort_count(),
            kp: self.pid.kp,
            ki: self.pid.ki,
            kd: self.pid.kd,
            setpoint: self.pid.setpoint,
            integrator: self.pid.integrator(),
            avg_loop_time_us: self.avg_loop_time_us,
            max_loop_time_us: self.max_loop_time_us,
        }
    }
}
