//! Run loop driving the event queue.

use std::collections::BTreeMap;
use std::fmt;

use super::clock::{Clock, DeterministicRng, SimTime};
use super::events::{EventHandle, ScheduledEvent};
use super::queue::EventQueue;
use crate::SimError;
use crate::trace::TraceHub;

/// Why a call to [`Simulator::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No live events remained
    QueueDrained,
    /// Next live event was due after the stop time
    StopTime,
    /// An action called [`Simulator::stop`]
    StopRequested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::QueueDrained => write!(f, "queue drained"),
            StopReason::StopTime => write!(f, "stop time reached"),
            StopReason::StopRequested => write!(f, "stop requested"),
        }
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunReport {
    /// Seed used for reproduction
    pub seed: u64,
    /// Simulated time when the run returned
    pub final_time: SimTime,
    /// Actions executed during this run
    pub events_executed: u64,
    /// Cancelled events discarded so far
    pub events_discarded: u64,
    /// Live events left in the queue
    pub events_pending: usize,
    /// Why the run returned
    pub stop_reason: StopReason,
    /// Recoverable errors recorded by actions
    pub recoverable: Vec<SimError>,
    /// Fire counts per signal name
    pub signal_counts: BTreeMap<String, u64>,
}

impl RunReport {
    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Run report (seed: {})\n", self.seed));
        summary.push_str(&format!("Final time: {}\n", self.final_time));
        summary.push_str(&format!("Stopped: {}\n", self.stop_reason));
        summary.push_str(&format!("Events executed: {}\n", self.events_executed));
        summary.push_str(&format!("Events cancelled: {}\n", self.events_discarded));
        summary.push_str(&format!("Events pending: {}\n", self.events_pending));

        if !self.signal_counts.is_empty() {
            summary.push_str("\nSignals fired:\n");
            for (signal, count) in &self.signal_counts {
                summary.push_str(&format!("  {signal}: {count}\n"));
            }
        }

        if !self.recoverable.is_empty() {
            summary.push_str("\nRecoverable errors:\n");
            for error in &self.recoverable {
                summary.push_str(&format!("  - {error}\n"));
            }
        }

        summary
    }
}

/// Single-threaded discrete-event simulator.
///
/// Owns the event queue, the trace hub and the RNG. Actions receive
/// `&mut Simulator`, so any continuation is expressed by scheduling a new
/// event rather than by blocking.
pub struct Simulator {
    queue: EventQueue,
    hub: TraceHub,
    rng: DeterministicRng,
    stop_requested: bool,
    executed: u64,
    recoverable: Vec<SimError>,
}

impl Simulator {
    /// Creates a simulator at time zero seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        let clock = Clock::new();
        Self {
            hub: TraceHub::new(clock.clone()),
            queue: EventQueue::new(clock),
            rng: DeterministicRng::from_seed(seed),
            stop_requested: false,
            executed: 0,
            recoverable: Vec::new(),
        }
    }

    /// Returns current simulation time.
    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// Read handle on the simulation clock.
    pub fn clock(&self) -> Clock {
        self.queue.clock().clone()
    }

    /// Trace hub stamped with this simulator's clock.
    pub fn hub(&self) -> &TraceHub {
        &self.hub
    }

    /// Deterministic RNG for stochastic endpoint decisions.
    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    /// Returns the seed used for this simulation.
    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Schedules `action` at `now + delay`.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If the fire time overflows
    /// - `SimError::EventQueueOverflow` - If the queue is full
    pub fn schedule<F>(&mut self, delay: SimTime, action: F) -> Result<EventHandle, SimError>
    where
        F: FnOnce(&mut Simulator) -> Result<(), SimError> + 'static,
    {
        self.queue.schedule(delay, Box::new(action))
    }

    /// Schedules `action` after a delay given in floating seconds.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If `delay_secs` is negative or non-finite
    /// - `SimError::EventQueueOverflow` - If the queue is full
    pub fn schedule_secs<F>(&mut self, delay_secs: f64, action: F) -> Result<EventHandle, SimError>
    where
        F: FnOnce(&mut Simulator) -> Result<(), SimError> + 'static,
    {
        let delay = SimTime::try_from_secs_f64(delay_secs)?;
        self.schedule(delay, action)
    }

    /// Schedules `action` at the absolute time `at`.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If `at` is in the past
    /// - `SimError::EventQueueOverflow` - If the queue is full
    pub fn schedule_at<F>(&mut self, at: SimTime, action: F) -> Result<EventHandle, SimError>
    where
        F: FnOnce(&mut Simulator) -> Result<(), SimError> + 'static,
    {
        self.queue.schedule_at(at, Box::new(action))
    }

    /// Cancels a scheduled event; returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        let cancelled = self.queue.cancel(handle);
        if cancelled {
            tracing::trace!(event = %handle.id(), due = %handle.fire_time(), "event cancelled");
        }
        cancelled
    }

    /// Returns true while the referenced event is still due to fire.
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.queue.is_pending(handle)
    }

    /// Number of live events in the queue.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Requests termination once the current action returns.
    pub fn stop(&mut self) {
        tracing::debug!(time = %self.now(), "stop requested");
        self.stop_requested = true;
    }

    /// Returns true once [`Simulator::stop`] has been called in this run.
    pub fn is_stopping(&self) -> bool {
        self.stop_requested
    }

    /// Records a recoverable error so it shows up in the run report.
    pub fn record_recoverable(&mut self, error: SimError) {
        self.recoverable.push(error);
    }

    /// Executes the next live event, if any.
    ///
    /// Returns `false` when the queue was empty.
    ///
    /// # Errors
    ///
    /// - `SimError::ActionFault` - If the action returned an error
    pub fn step(&mut self) -> Result<bool, SimError> {
        let Some(event) = self.queue.pop_next()? else {
            return Ok(false);
        };
        let ScheduledEvent {
            id,
            fire_time,
            action,
        } = event;

        tracing::trace!(event = %id, time = %fire_time, "executing event");
        self.executed += 1;

        if let Err(source) = action(self) {
            tracing::error!(event = %id, time = %fire_time, error = %source, "action faulted, stopping run");
            self.flush_trace();
            return Err(SimError::ActionFault {
                event: id,
                at: fire_time,
                source: Box::new(source),
            });
        }

        Ok(true)
    }

    /// Runs until the queue drains, `stop()` is called, or the next event is
    /// due after `stop_time`.
    ///
    /// Events due exactly at `stop_time` still execute. When the run ends on
    /// the stop time the clock is left at `stop_time`.
    ///
    /// # Errors
    ///
    /// - `SimError::ActionFault` - If an action failed; trace sinks are flushed first
    pub fn run(&mut self, stop_time: Option<SimTime>) -> Result<RunReport, SimError> {
        self.stop_requested = false;
        let executed_before = self.executed;

        tracing::info!(
            seed = self.seed(),
            start = %self.now(),
            stop = ?stop_time.map(|t| t.to_string()),
            pending = self.queue.len(),
            "simulation run starting"
        );

        let stop_reason = loop {
            if self.stop_requested {
                break StopReason::StopRequested;
            }
            let Some(next) = self.queue.peek_time() else {
                break StopReason::QueueDrained;
            };
            if let Some(stop) = stop_time {
                if next > stop {
                    if stop > self.now() {
                        self.queue.advance_idle(stop)?;
                    }
                    break StopReason::StopTime;
                }
            }
            self.step()?;
        };

        self.flush_trace();

        let report = RunReport {
            seed: self.seed(),
            final_time: self.now(),
            events_executed: self.executed - executed_before,
            events_discarded: self.queue.discarded(),
            events_pending: self.queue.len(),
            stop_reason,
            recoverable: std::mem::take(&mut self.recoverable),
            signal_counts: self.hub.signal_counts(),
        };

        tracing::info!(
            time = %report.final_time,
            executed = report.events_executed,
            reason = %report.stop_reason,
            "simulation run finished"
        );

        Ok(report)
    }

    fn flush_trace(&self) {
        if let Err(e) = self.hub.flush() {
            tracing::warn!(error = %e, "failed to flush trace sinks");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::trace::{JsonLinesSink, TraceRecord, TraceValue};

    fn recorder() -> Rc<RefCell<Vec<(&'static str, SimTime)>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_run_drains_in_order() {
        let mut sim = Simulator::new(1);
        let log = recorder();

        for (name, secs) in [("c", 3), ("a", 1), ("b", 2)] {
            let log = Rc::clone(&log);
            sim.schedule(SimTime::from_secs(secs), move |sim| {
                log.borrow_mut().push((name, sim.now()));
                Ok(())
            })
            .unwrap();
        }

        let report = sim.run(None).unwrap();

        assert_eq!(report.stop_reason, StopReason::QueueDrained);
        assert_eq!(report.events_executed, 3);
        assert_eq!(
            *log.borrow(),
            vec![
                ("a", SimTime::from_secs(1)),
                ("b", SimTime::from_secs(2)),
                ("c", SimTime::from_secs(3)),
            ]
        );
    }

    #[test]
    fn test_actions_can_schedule_follow_ups() {
        let mut sim = Simulator::new(1);
        let log = recorder();
        let outer = Rc::clone(&log);

        sim.schedule(SimTime::from_secs(1), move |sim| {
            outer.borrow_mut().push(("outer", sim.now()));
            let inner = Rc::clone(&outer);
            sim.schedule(SimTime::ZERO, move |sim| {
                inner.borrow_mut().push(("inner", sim.now()));
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();

        sim.run(None).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                ("outer", SimTime::from_secs(1)),
                ("inner", SimTime::from_secs(1)),
            ]
        );
    }

    #[test]
    fn test_stop_time_is_inclusive_and_leaves_later_events() {
        let mut sim = Simulator::new(1);
        let log = recorder();

        for secs in [5, 10, 11] {
            let log = Rc::clone(&log);
            sim.schedule(SimTime::from_secs(secs), move |sim| {
                log.borrow_mut().push(("event", sim.now()));
                Ok(())
            })
            .unwrap();
        }

        let report = sim.run(Some(SimTime::from_secs(10))).unwrap();

        assert_eq!(report.stop_reason, StopReason::StopTime);
        assert_eq!(report.events_executed, 2);
        assert_eq!(report.events_pending, 1);
        assert_eq!(sim.now(), SimTime::from_secs(10));
    }

    #[test]
    fn test_stop_time_advances_idle_clock() {
        let mut sim = Simulator::new(1);
        sim.schedule(SimTime::from_secs(400), |_| Ok(())).unwrap();

        sim.run(Some(SimTime::from_secs(300))).unwrap();

        assert_eq!(sim.now(), SimTime::from_secs(300));
    }

    #[test]
    fn test_stop_time_behind_clock_ends_run_without_moving_time() {
        let mut sim = Simulator::new(1);
        sim.schedule(SimTime::from_secs(10), |_| Ok(())).unwrap();
        sim.schedule(SimTime::from_secs(20), |_| Ok(())).unwrap();
        sim.run(Some(SimTime::from_secs(10))).unwrap();

        let report = sim.run(Some(SimTime::from_secs(5))).unwrap();

        assert_eq!(report.stop_reason, StopReason::StopTime);
        assert_eq!(report.events_executed, 0);
        assert_eq!(report.events_pending, 1);
        assert_eq!(sim.now(), SimTime::from_secs(10));
    }

    #[test]
    fn test_stop_request_ends_after_current_action() {
        let mut sim = Simulator::new(1);
        let log = recorder();

        let first = Rc::clone(&log);
        sim.schedule(SimTime::from_secs(1), move |sim| {
            first.borrow_mut().push(("stopper", sim.now()));
            sim.stop();
            assert!(sim.is_stopping());
            Ok(())
        })
        .unwrap();
        let second = Rc::clone(&log);
        sim.schedule(SimTime::from_secs(1), move |sim| {
            second.borrow_mut().push(("never", sim.now()));
            Ok(())
        })
        .unwrap();

        let report = sim.run(None).unwrap();

        assert_eq!(report.stop_reason, StopReason::StopRequested);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(report.events_pending, 1);
    }

    #[test]
    fn test_action_fault_is_fatal_and_keeps_trace_output() {
        let mut sim = Simulator::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        sim.hub().subscribe("marker", move |record| {
            sink.borrow_mut().push(record.time);
        });

        sim.schedule(SimTime::from_secs(1), |sim| {
            sim.hub().fire("marker", TraceValue::Bytes { bytes: 1 });
            Ok(())
        })
        .unwrap();
        sim.schedule(SimTime::from_secs(2), |_| {
            Err(SimError::Endpoint {
                endpoint: "client".to_string(),
                reason: "corrupted".to_string(),
            })
        })
        .unwrap();
        sim.schedule(SimTime::from_secs(3), |sim| {
            sim.hub().fire("marker", TraceValue::Bytes { bytes: 2 });
            Ok(())
        })
        .unwrap();

        let result = sim.run(None);

        match result {
            Err(SimError::ActionFault { at, source, .. }) => {
                assert_eq!(at, SimTime::from_secs(2));
                assert!(matches!(*source, SimError::Endpoint { .. }));
            }
            other => panic!("Expected ActionFault, got {other:?}"),
        }
        assert_eq!(*seen.borrow(), vec![SimTime::from_secs(1)]);
        assert_eq!(sim.now(), SimTime::from_secs(2));
    }

    #[test]
    fn test_action_fault_flushes_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fault.jsonl");
        let mut sim = Simulator::new(1);
        let sink = JsonLinesSink::create(&path).unwrap();
        sim.hub().attach_sink(Rc::new(sink), &["marker"]);

        sim.schedule(SimTime::from_secs(1), |sim| {
            sim.hub().fire("marker", TraceValue::Bytes { bytes: 7 });
            Ok(())
        })
        .unwrap();
        sim.schedule(SimTime::from_secs(2), |_| {
            Err(SimError::Endpoint {
                endpoint: "server".to_string(),
                reason: "crashed".to_string(),
            })
        })
        .unwrap();

        assert!(matches!(sim.run(None), Err(SimError::ActionFault { .. })));

        // The simulator, and with it the sink, is still alive here
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let record: TraceRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record.time, SimTime::from_secs(1));
        assert_eq!(record.value, TraceValue::Bytes { bytes: 7 });
    }

    #[test]
    fn test_negative_float_delay_is_rejected_without_side_effects() {
        let mut sim = Simulator::new(1);

        let result = sim.schedule_secs(-1.0, |_| Ok(()));

        assert!(matches!(result, Err(SimError::InvalidDelay { .. })));
        assert_eq!(sim.pending_events(), 0);
        assert_eq!(sim.now(), SimTime::ZERO);
    }

    #[test]
    fn test_cancelled_event_never_runs() {
        let mut sim = Simulator::new(1);
        let log = recorder();
        let cancelled = Rc::clone(&log);

        let handle = sim
            .schedule(SimTime::from_secs(1), move |sim| {
                cancelled.borrow_mut().push(("cancelled", sim.now()));
                Ok(())
            })
            .unwrap();
        assert!(sim.cancel(handle));

        let report = sim.run(None).unwrap();

        assert!(log.borrow().is_empty());
        assert_eq!(report.events_executed, 0);
        assert_eq!(report.events_discarded, 1);
        assert!(!sim.cancel(handle));
    }

    #[test]
    fn test_recoverable_errors_reach_report() {
        let mut sim = Simulator::new(3);
        sim.schedule(SimTime::ZERO, |sim| {
            sim.record_recoverable(SimError::InvalidDelay {
                reason: "test".to_string(),
            });
            Ok(())
        })
        .unwrap();

        let report = sim.run(None).unwrap();

        assert_eq!(report.recoverable.len(), 1);
        assert!(report.summary().contains("Recoverable errors"));
    }
}
