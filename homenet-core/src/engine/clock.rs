//! Simulated time and deterministic randomness.

use std::cell::Cell;
use std::fmt;
use std::ops::{Add, Mul};
use std::rc::Rc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};

use crate::SimError;

const NANOS_PER_SEC: u64 = 1_000_000_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_MICRO: u64 = 1_000;

/// Point in simulated time, or a span of it, in nanoseconds.
///
/// Unsigned by construction, so a "negative delay" can only arrive through
/// the fallible float conversions, which reject it with `InvalidDelay`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    /// Simulation start.
    pub const ZERO: SimTime = SimTime(0);
    /// Largest representable instant.
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        SimTime(micros * NANOS_PER_MICRO)
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis * NANOS_PER_MILLI)
    }

    pub const fn from_secs(secs: u64) -> Self {
        SimTime(secs * NANOS_PER_SEC)
    }

    /// Converts floating seconds, rejecting negative, NaN and infinite input.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If `secs` is negative, non-finite or too large
    pub fn try_from_secs_f64(secs: f64) -> Result<Self, SimError> {
        if !secs.is_finite() {
            return Err(SimError::InvalidDelay {
                reason: format!("{secs} is not a finite number of seconds"),
            });
        }
        if secs < 0.0 {
            return Err(SimError::InvalidDelay {
                reason: format!("{secs}s is negative"),
            });
        }
        let nanos = (secs * NANOS_PER_SEC as f64).round();
        if nanos >= u64::MAX as f64 {
            return Err(SimError::InvalidDelay {
                reason: format!("{secs}s exceeds the simulated time range"),
            });
        }
        Ok(SimTime(nanos as u64))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub fn checked_add(self, rhs: SimTime) -> Option<SimTime> {
        self.0.checked_add(rhs.0).map(SimTime)
    }

    pub fn saturating_sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl Mul<u64> for SimTime {
    type Output = SimTime;

    fn mul(self, rhs: u64) -> SimTime {
        SimTime(self.0 * rhs)
    }
}

impl From<Duration> for SimTime {
    fn from(duration: Duration) -> Self {
        SimTime(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl From<SimTime> for Duration {
    fn from(time: SimTime) -> Self {
        Duration::from_nanos(time.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 / NANOS_PER_SEC;
        let frac = self.0 % NANOS_PER_SEC;
        if frac == 0 {
            return write!(f, "{secs}s");
        }
        let digits = format!("{frac:09}");
        write!(f, "{secs}.{}s", digits.trim_end_matches('0'))
    }
}

/// Shared read handle on the current simulated time.
///
/// The event queue is the only writer; every other holder (trace hub,
/// endpoints, samplers) only reads.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    now: Rc<Cell<SimTime>>,
}

impl Clock {
    /// Creates a clock at simulation time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns current simulation time.
    pub fn now(&self) -> SimTime {
        self.now.get()
    }

    /// Advances simulation time to `target`.
    ///
    /// # Errors
    ///
    /// - `SimError::ClockRegression` - If target time is in the past
    pub(crate) fn advance_to(&self, target: SimTime) -> Result<(), SimError> {
        let now = self.now.get();
        if target < now {
            return Err(SimError::ClockRegression {
                now,
                requested: target,
            });
        }
        self.now.set(target);
        Ok(())
    }
}

/// Deterministic random number generator for reproducible simulations.
///
/// ChaCha8 seeded from a `u64`; every stochastic decision in a run draws
/// from the single instance owned by the simulator.
#[derive(Debug)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
    seed: u64,
}

impl DeterministicRng {
    /// Creates deterministic RNG from seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// Returns the seed used for this RNG.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generates random number in range [0, 1).
    pub fn random_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Generates random number in range [min, max).
    pub fn random_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        self.rng.random_range(min..max)
    }

    /// Generates random boolean with given probability.
    pub fn random_bool(&mut self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        self.random_f64() < probability
    }

    /// Draws one value from `distribution`.
    pub fn sample<T, D: Distribution<T>>(&mut self, distribution: &D) -> T {
        distribution.sample(&mut self.rng)
    }
}
