//! Time-ordered event queue with lazy cancellation.

use std::collections::{BinaryHeap, HashSet};

use super::clock::{Clock, SimTime};
use super::events::{Action, EventHandle, EventId, ScheduledEvent};
use crate::SimError;

/// Maximum number of live events the queue accepts.
const MAX_PENDING_EVENTS: usize = 1_000_000;

/// Min-heap of events keyed by `(fire_time, id)`.
///
/// Cancelled events stay in the heap and are discarded when they reach the
/// top, so `cancel` is O(1) and never reorders the heap.
#[derive(Debug)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    pending: HashSet<EventId>,
    next_id: u64,
    clock: Clock,
    discarded: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(Clock::new())
    }
}

impl EventQueue {
    /// Creates an empty queue driving `clock`.
    pub fn new(clock: Clock) -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            next_id: 0,
            clock,
            discarded: 0,
        }
    }

    /// Returns current simulation time.
    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    /// Read handle on the queue's clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Schedules `action` at `now + delay`.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If `now + delay` overflows simulated time
    /// - `SimError::EventQueueOverflow` - If the queue is full
    pub fn schedule(&mut self, delay: SimTime, action: Action) -> Result<EventHandle, SimError> {
        let now = self.clock.now();
        let fire_time = now.checked_add(delay).ok_or_else(|| SimError::InvalidDelay {
            reason: format!("{delay} after {now} overflows simulated time"),
        })?;
        self.insert(fire_time, action)
    }

    /// Schedules `action` at the absolute time `at`.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If `at` is earlier than now
    /// - `SimError::EventQueueOverflow` - If the queue is full
    pub fn schedule_at(&mut self, at: SimTime, action: Action) -> Result<EventHandle, SimError> {
        let now = self.clock.now();
        if at < now {
            return Err(SimError::InvalidDelay {
                reason: format!("{at} is before current time {now}"),
            });
        }
        self.insert(at, action)
    }

    fn insert(&mut self, fire_time: SimTime, action: Action) -> Result<EventHandle, SimError> {
        if self.pending.len() >= MAX_PENDING_EVENTS {
            return Err(SimError::EventQueueOverflow {
                count: self.pending.len(),
            });
        }

        let id = EventId::new(self.next_id);
        self.next_id += 1;

        let event = ScheduledEvent::new(id, fire_time, action);
        let handle = event.handle();
        self.pending.insert(id);
        self.heap.push(event);

        Ok(handle)
    }

    /// Marks the referenced event inert.
    ///
    /// Returns `false` when the event already fired or was already
    /// cancelled; neither case is an error.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.pending.remove(&handle.id())
    }

    /// Returns true while the referenced event is scheduled and not cancelled.
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains(&handle.id())
    }

    /// Fire time of the next live event, discarding cancelled ones on top.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.heap.peek().map(|event| event.fire_time)
    }

    /// Removes the next live event and advances the clock to its fire time.
    ///
    /// Cancelled events are dropped without moving time.
    ///
    /// # Errors
    ///
    /// - `SimError::ClockRegression` - If the clock was moved past the event externally
    pub fn pop_next(&mut self) -> Result<Option<ScheduledEvent>, SimError> {
        let Some(fire_time) = self.peek_time() else {
            return Ok(None);
        };
        // The event stays queued if the clock refuses to move
        self.clock.advance_to(fire_time)?;
        let Some(event) = self.heap.pop() else {
            return Ok(None);
        };
        self.pending.remove(&event.id);
        Ok(Some(event))
    }

    /// Moves the clock forward without executing anything.
    ///
    /// # Errors
    ///
    /// - `SimError::ClockRegression` - If `target` is in the past
    /// - `SimError::InvalidDelay` - If a live event is due before `target`
    pub fn advance_idle(&mut self, target: SimTime) -> Result<(), SimError> {
        if let Some(next) = self.peek_time() {
            if next < target {
                return Err(SimError::InvalidDelay {
                    reason: format!("cannot skip to {target}: event pending at {next}"),
                });
            }
        }
        self.clock.advance_to(target)
    }

    fn discard_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.pending.contains(&top.id) {
                break;
            }
            self.heap.pop();
            self.discarded += 1;
        }
    }

    /// Number of live (not cancelled) events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true when no live events remain.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Cancelled events dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Total events ever inserted.
    pub fn inserted(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Action {
        Box::new(|_| Ok(()))
    }

    fn drain_ids(queue: &mut EventQueue) -> Vec<u64> {
        let mut ids = Vec::new();
        while let Some(event) = queue.pop_next().unwrap() {
            ids.push(event.id.raw());
        }
        ids
    }

    #[test]
    fn test_time_ordering() {
        let mut queue = EventQueue::default();
        queue.schedule(SimTime::from_secs(30), noop()).unwrap();
        queue.schedule(SimTime::from_secs(10), noop()).unwrap();
        queue.schedule(SimTime::from_secs(20), noop()).unwrap();

        let mut times = Vec::new();
        while let Some(event) = queue.pop_next().unwrap() {
            times.push(event.fire_time);
            assert_eq!(queue.now(), event.fire_time);
        }

        assert_eq!(
            times,
            vec![
                SimTime::from_secs(10),
                SimTime::from_secs(20),
                SimTime::from_secs(30)
            ]
        );
    }

    #[test]
    fn test_fifo_at_same_time() {
        let mut queue = EventQueue::default();
        for _ in 0..5 {
            queue.schedule(SimTime::from_millis(7), noop()).unwrap();
        }

        assert_eq!(drain_ids(&mut queue), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cancelled_event_is_skipped_without_moving_time() {
        let mut queue = EventQueue::default();
        let early = queue.schedule(SimTime::from_secs(1), noop()).unwrap();
        queue.schedule(SimTime::from_secs(5), noop()).unwrap();

        assert!(queue.cancel(early));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_time(), Some(SimTime::from_secs(5)));

        let next = queue.pop_next().unwrap().unwrap();
        assert_eq!(next.fire_time, SimTime::from_secs(5));
        assert_eq!(queue.discarded(), 1);
        assert!(queue.pop_next().unwrap().is_none());
    }

    #[test]
    fn test_cancel_twice_and_after_fire_are_noops() {
        let mut queue = EventQueue::default();
        let handle = queue.schedule(SimTime::ZERO, noop()).unwrap();
        let fired = queue.pop_next().unwrap().unwrap();
        assert_eq!(fired.id, handle.id());

        assert!(!queue.cancel(handle));

        let other = queue.schedule(SimTime::from_secs(1), noop()).unwrap();
        assert!(queue.cancel(other));
        assert!(!queue.cancel(other));
        assert!(!queue.is_pending(other));
    }

    #[test]
    fn test_schedule_at_rejects_past() {
        let mut queue = EventQueue::default();
        queue.schedule(SimTime::from_secs(2), noop()).unwrap();
        queue.pop_next().unwrap();

        let result = queue.schedule_at(SimTime::from_secs(1), noop());

        assert!(matches!(result, Err(SimError::InvalidDelay { .. })));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_schedule_overflow_is_invalid_delay() {
        let mut queue = EventQueue::default();
        queue.schedule(SimTime::from_secs(1), noop()).unwrap();
        queue.pop_next().unwrap();

        let result = queue.schedule(SimTime::MAX, noop());

        assert!(matches!(result, Err(SimError::InvalidDelay { .. })));
    }

    #[test]
    fn test_advance_idle_refuses_to_skip_events() {
        let mut queue = EventQueue::default();
        queue.schedule(SimTime::from_secs(3), noop()).unwrap();

        assert!(queue.advance_idle(SimTime::from_secs(5)).is_err());
        assert!(queue.advance_idle(SimTime::from_secs(3)).is_ok());
        assert_eq!(queue.now(), SimTime::from_secs(3));
    }

    #[test]
    fn test_clock_regression_keeps_event_queued() {
        let clock = Clock::new();
        let mut queue = EventQueue::new(clock.clone());
        let handle = queue.schedule(SimTime::from_secs(2), noop()).unwrap();
        clock.advance_to(SimTime::from_secs(5)).unwrap();

        let result = queue.pop_next();

        assert!(matches!(result, Err(SimError::ClockRegression { .. })));
        assert!(queue.is_pending(handle));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_time(), Some(SimTime::from_secs(2)));
    }
}
