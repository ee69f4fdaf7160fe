//! Trace dispatch: named signals, payloads and sinks.

mod hub;
mod record;
pub mod signals;
mod sink;

pub use hub::{SubscriptionToken, TraceHub};
pub use record::{ObjectKind, TraceRecord, TraceValue};
pub use sink::{JsonLinesSink, LogSink, MemorySink, TraceSink};
