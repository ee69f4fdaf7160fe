//! Self-rescheduling rate sampler.

use std::cell::Cell;
use std::rc::Rc;

use crate::SimError;
use crate::config::SamplerConfig;
use crate::engine::{EventHandle, SimTime, Simulator};
use crate::trace::TraceValue;

/// Monotonic counter exposed by a flow endpoint.
pub trait CounterSource {
    /// Current counter value; must not decrease between samples.
    fn read_counter(&self) -> u64;
}

impl<F: Fn() -> u64> CounterSource for F {
    fn read_counter(&self) -> u64 {
        self()
    }
}

/// State carried from one sampler invocation to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerState {
    pub last_counter: u64,
    pub interval: SimTime,
    pub horizon: SimTime,
}

impl SamplerState {
    /// Returns true if another sample at `now + interval` is still wanted.
    pub fn should_continue(&self, now: SimTime, stopping: bool) -> bool {
        if stopping {
            return false;
        }
        now.checked_add(self.interval)
            .is_some_and(|next| next <= self.horizon)
    }

    /// Counter growth since the last sample.
    ///
    /// A decrease (restarted flow) yields zero; the caller re-baselines on
    /// the new value.
    pub fn delta(&self, current: u64) -> u64 {
        current.saturating_sub(self.last_counter)
    }
}

#[derive(Debug, Default)]
struct SamplerShared {
    pending: Cell<Option<EventHandle>>,
    cancelled: Cell<bool>,
    samples: Cell<u64>,
    last_rate: Cell<Option<f64>>,
}

/// External control over a running sampler.
#[derive(Debug, Clone, Default)]
pub struct SamplerHandle {
    shared: Rc<SamplerShared>,
}

impl SamplerHandle {
    /// Cancels the next invocation; returns false if none was pending.
    pub fn cancel(&self, sim: &mut Simulator) -> bool {
        self.shared.cancelled.set(true);
        match self.shared.pending.take() {
            Some(handle) => sim.cancel(handle),
            None => false,
        }
    }

    /// Returns true while another invocation is scheduled.
    pub fn is_active(&self) -> bool {
        !self.shared.cancelled.get() && self.shared.pending.get().is_some()
    }

    /// Number of samples fired so far.
    pub fn samples_taken(&self) -> u64 {
        self.shared.samples.get()
    }

    /// Most recent rate reported.
    pub fn last_rate(&self) -> Option<f64> {
        self.shared.last_rate.get()
    }
}

/// Reads a counter on a fixed cadence and fires its rate on `signal`.
///
/// The sampler owns its state and moves itself into each scheduled
/// continuation, so samplers over different endpoints never share anything.
pub struct PeriodicSampler<C> {
    signal: String,
    source: C,
    state: SamplerState,
    start: SimTime,
    unit_scale: f64,
    handle: SamplerHandle,
}

impl<C: CounterSource + 'static> PeriodicSampler<C> {
    /// Creates a sampler firing `signal` with rates read from `source`.
    ///
    /// # Errors
    ///
    /// - `SimError::Configuration` - If the interval is zero or the scale is not finite
    pub fn new(signal: &str, source: C, config: &SamplerConfig) -> Result<Self, SimError> {
        if config.interval.is_zero() {
            return Err(SimError::Configuration {
                reason: "sampler interval must be positive".to_string(),
            });
        }
        if !config.unit_scale.is_finite() {
            return Err(SimError::Configuration {
                reason: format!("sampler unit scale {} is not finite", config.unit_scale),
            });
        }

        Ok(Self {
            signal: signal.to_string(),
            source,
            state: SamplerState {
                last_counter: 0,
                interval: config.interval,
                horizon: config.horizon,
            },
            start: config.start,
            unit_scale: config.unit_scale,
            handle: SamplerHandle::default(),
        })
    }

    /// Schedules the first invocation at the configured start time.
    ///
    /// The counter baseline is read one interval before the first sample,
    /// or immediately when that instant has already passed, so a sampler
    /// started late over a busy counter reports the rate, not the total.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If the start time is already in the past
    pub fn start(mut self, sim: &mut Simulator) -> Result<SamplerHandle, SimError> {
        let handle = self.handle.clone();
        let shared = Rc::clone(&handle.shared);
        let start = self.start;
        if start < sim.now() {
            return Err(SimError::InvalidDelay {
                reason: format!("sampler start {start} is before now {}", sim.now()),
            });
        }

        tracing::debug!(
            signal = %self.signal,
            start = %start,
            interval = %self.state.interval,
            horizon = %self.state.horizon,
            "sampler scheduled"
        );
        let baseline_at = start.saturating_sub(self.state.interval).max(sim.now());
        let first = if baseline_at == sim.now() {
            self.state.last_counter = self.source.read_counter();
            sim.schedule_at(start, move |sim| self.sample(sim))?
        } else {
            let pending = Rc::clone(&shared);
            sim.schedule_at(baseline_at, move |sim| {
                self.state.last_counter = self.source.read_counter();
                let first = sim.schedule_at(start, move |sim| self.sample(sim))?;
                pending.pending.set(Some(first));
                Ok(())
            })?
        };
        shared.pending.set(Some(first));

        Ok(handle)
    }

    fn sample(mut self, sim: &mut Simulator) -> Result<(), SimError> {
        let shared = Rc::clone(&self.handle.shared);
        shared.pending.set(None);

        let current = self.source.read_counter();
        if current < self.state.last_counter {
            tracing::warn!(
                signal = %self.signal,
                previous = self.state.last_counter,
                current,
                "counter decreased, re-baselining"
            );
        }
        let delta = self.state.delta(current);
        let rate = delta as f64 * self.unit_scale / self.state.interval.as_secs_f64();

        sim.hub().fire(&self.signal, TraceValue::Rate { value: rate });
        shared.samples.set(shared.samples.get() + 1);
        shared.last_rate.set(Some(rate));
        self.state.last_counter = current;

        if !self.state.should_continue(sim.now(), sim.is_stopping()) {
            tracing::debug!(signal = %self.signal, time = %sim.now(), "sampler finished");
            return Ok(());
        }

        let interval = self.state.interval;
        let next = sim.schedule(interval, move |sim| self.sample(sim))?;
        shared.pending.set(Some(next));
        Ok(())
    }
}
