//! Homenet Core - Discrete-event harness for home-network experiments
//!
//! This crate provides the building blocks every scenario runs on: a
//! simulated clock and event queue, a named-signal trace hub with sinks,
//! periodic rate sampling, control-message scheduling and the shared
//! configuration.

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod sampler;
pub mod trace;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::HomeNetworkConfig;
pub use control::{ControlEndpoint, ControlMessage, ControlStep, SessionState, Transition};
pub use engine::{EventHandle, EventId, RunReport, SimTime, Simulator, StopReason};
pub use error::SimError;
pub use sampler::{CounterSource, PeriodicSampler, SamplerHandle};
pub use trace::{TraceHub, TraceRecord, TraceSink, TraceValue};
