//! Application lifetime and self-scheduling helpers shared by all endpoints.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use homenet_core::SimError;
use homenet_core::engine::{EventHandle, SimTime, Simulator};

/// An application installed on a node, active between start and stop.
pub trait Application {
    /// Name used in logs and trace payloads.
    fn name(&self) -> &str;

    /// Begins activity. Called once, at the configured start time.
    ///
    /// # Errors
    ///
    /// - Any error is fatal to the run
    fn start(&mut self, sim: &mut Simulator) -> Result<(), SimError>;

    /// Ends activity and cancels pending work. Packets arriving afterwards
    /// are ignored.
    ///
    /// # Errors
    ///
    /// - Any error is fatal to the run
    fn stop(&mut self, sim: &mut Simulator) -> Result<(), SimError>;

    fn is_running(&self) -> bool;
}

/// Schedules `app` to start at `start` and stop at `stop`.
///
/// # Errors
///
/// - `SimError::InvalidDelay` - If either time is already in the past
/// - `SimError::Configuration` - If `stop` precedes `start`
pub fn schedule_lifetime<A>(
    sim: &mut Simulator,
    app: &Rc<RefCell<A>>,
    start: SimTime,
    stop: SimTime,
) -> Result<(EventHandle, EventHandle), SimError>
where
    A: Application + 'static,
{
    if stop < start {
        return Err(SimError::Configuration {
            reason: format!(
                "{} would stop at {stop} before starting at {start}",
                app.borrow().name()
            ),
        });
    }

    let starting = Rc::clone(app);
    let start_handle = sim.schedule_at(start, move |sim| {
        let mut app = starting.borrow_mut();
        tracing::info!(time = %sim.now(), app = %app.name(), "application starting");
        app.start(sim)
    })?;

    let stopping = Rc::clone(app);
    let stop_handle = sim.schedule_at(stop, move |sim| {
        let mut app = stopping.borrow_mut();
        tracing::info!(time = %sim.now(), app = %app.name(), "application stopping");
        app.stop(sim)
    })?;

    Ok((start_handle, stop_handle))
}

/// Schedules `f` to run on `target` after `delay`, if it still exists then.
///
/// # Errors
///
/// - `SimError::InvalidDelay` - If the fire time overflows simulated time
pub fn schedule_on<T, F>(
    sim: &mut Simulator,
    target: &Weak<RefCell<T>>,
    delay: SimTime,
    f: F,
) -> Result<EventHandle, SimError>
where
    T: 'static,
    F: FnOnce(&mut T, &mut Simulator) -> Result<(), SimError> + 'static,
{
    let target = Weak::clone(target);
    sim.schedule(delay, move |sim| {
        let Some(target) = target.upgrade() else {
            return Ok(());
        };
        let mut target = target.borrow_mut();
        f(&mut *target, sim)
    })
}

/// Cancels the event in `slot`, if any, leaving the slot empty.
pub fn cancel_slot(sim: &mut Simulator, slot: &mut Option<EventHandle>) -> bool {
    slot.take().is_some_and(|handle| sim.cancel(handle))
}
