//! Deterministic real-time control core for a simulated accelerator
//! beamline: a single periodic task closing a feedback loop between a
//! beam-position monitor and a steering magnet, under machine-protection
//! override, with non-blocking command and telemetry plumbing.

pub mod clock;
pub mod command;
pub mod control_loop;
pub mod hal;
pub mod hal_sim;
pub mod mps;
pub mod pid;
pub mod sync;
pub mod tags;
pub mod telemetry;
pub mod timebase;
pub mod watchdog;

pub use clock::PeriodicClock;
pub use command::{Command, CommandEndpoint, Reply};
pub use control_loop::{clamp_frequency, LoopConfig, LoopShared, RtLoop, MAX_HZ, MIN_HZ, PLANT_COUPLING};
pub use hal::{Actuator, PositionSensor, Sensor};
pub use hal_sim::{SimBeamline, SimBic, SimBpm, SimMagnet};
pub use mps::{BeamLossMonitor, BlmStats, MachineProtection, SafetyDecision};
pub use pid::Pid;
pub use sync::{StatusExchange, StatusSnapshot};
pub use telemetry::{TelemetryRecord, TelemetrySink};
pub use timebase::TimeBase;
pub use watchdog::{Watchdog, WatchdogStats};
