//! Discrete-event engine: simulated clock, event queue and run loop.
//!
//! Execution is single threaded and cooperative. Events pop in
//! `(fire_time, id)` order, so two runs with identical inputs and seed
//! execute identical sequences.

mod clock;
mod events;
mod queue;
mod simulator;

pub use clock::{Clock, DeterministicRng, SimTime};
pub use events::{Action, EventHandle, EventId, ScheduledEvent};
pub use queue::EventQueue;
pub use simulator::{RunReport, Simulator, StopReason};
