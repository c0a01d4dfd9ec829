use crate::hal::{Actuator, PositionSensor, Sensor};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// f64 stored as bits so simulated device state can be shared between the
/// loop thread (which owns the port) and a test or operator handle.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn fetch_add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

#[derive(Debug)]
struct BpmShared {
    position: AtomicF64,
    offset: AtomicF64,
}

/// Simulated beam-position monitor. Clones share the underlying beam
/// state; noise is generated from an owned, seeded generator.
#[derive(Debug, Clone)]
pub struct SimBpm {
    shared: Arc<BpmShared>,
    noise_level: f64,
    rng: SmallRng,
}

impl SimBpm {
    pub fn new() -> Self {
        Self::with_noise(0, 0.0)
    }

    pub fn with_noise(seed: u64, noise_level: f64) -> Self {
        Self {
            shared: Arc::new(BpmShared {
                position: AtomicF64::new(0.0),
                offset: AtomicF64::new(0.0),
            }),
            noise_level,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Reposition the underlying beam (simulation control, e.g. an
    /// injected orbit disturbance).
    pub fn set_beam_position(&self, position: f64) {
        self.shared.position.store(position);
    }

    pub fn beam_position(&self) -> f64 {
        self.shared.position.load()
    }

    /// Accumulated steering offset currently applied to readings.
    pub fn offset(&self) -> f64 {
        self.shared.offset.load()
    }
}

impl Default for SimBpm {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for SimBpm {
    fn read(&mut self) -> f64 {
        let mut reading = self.shared.position.load() + self.shared.offset.load();
        if self.noise_level > 0.0 {
            reading += self.rng.random_range(-self.noise_level..self.noise_level);
        }
        reading
    }
}

impl PositionSensor for SimBpm {
    fn inject_offset(&mut self, delta: f64) {
        self.shared.offset.fetch_add(delta);
    }
}

/// Simulated beam-intensity counter.
#[derive(Debug, Clone)]
pub struct SimBic {
    intensity: Arc<AtomicF64>,
    noise_level: f64,
    rng: SmallRng,
}

impl SimBic {
    /// Defaults to a typical stored-beam intensity of 1e4 counts.
    pub fn new() -> Self {
        Self::with_noise(0, 0.0)
    }

    pub fn with_noise(seed: u64, noise_level: f64) -> Self {
        Self {
            intensity: Arc::new(AtomicF64::new(10_000.0)),
            noise_level,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn set_intensity(&self, intensity: f64) {
        self.intensity.store(intensity);
    }

    pub fn intensity(&self) -> f64 {
        self.intensity.load()
    }
}

impl Default for SimBic {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for SimBic {
    fn read(&mut self) -> f64 {
        let mut reading = self.intensity.load();
        if self.noise_level > 0.0 {
            reading += self.rng.random_range(-self.noise_level..self.noise_level);
        }
        reading
    }
}

/// Simulated steering magnet: an ideal current source. `get` returns the
/// most recent commanded current, per the actuator contract.
#[derive(Debug, Clone, Default)]
pub struct SimMagnet {
    current: Arc<AtomicF64>,
    commands: Arc<AtomicU64>,
}

impl SimMagnet {
    pub fn new() -> Self {
        Self {
            current: Arc::new(AtomicF64::new(0.0)),
            commands: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }
}

impl Actuator for SimMagnet {
    fn set(&mut self, value: f64) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        self.current.store(value);
    }

    fn get(&self) -> f64 {
        self.current.load()
    }
}

/// Complete simulated beamline. Clones of the contained devices share
/// state, so one set of handles can be given to the control loop while
/// another drives disturbances from a test or operator console.
#[derive(Debug, Clone)]
pub struct SimBeamline {
    pub bpm: SimBpm,
    pub bic: SimBic,
    pub magnet: SimMagnet,
}

impl SimBeamline {
    pub fn new() -> Self {
        Self {
            bpm: SimBpm::new(),
            bic: SimBic::new(),
            magnet: SimMagnet::new(),
        }
    }

    pub fn with_noise(seed: u64, bpm_noise: f64, bic_noise: f64) -> Self {
        Self {
            bpm: SimBpm::with_noise(seed, bpm_noise),
            bic: SimBic::with_noise(seed.wrapping_add(1), bic_noise),
            magnet: SimMagnet::new(),
        }
    }
}

impl Default for SimBeamline {
    fn default() -> Self {
        Self::new()
    }
}
