//! Scheduled events and the handles used to cancel them.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::clock::SimTime;
use super::simulator::Simulator;
use crate::SimError;

/// Deferred work executed by the run loop at its fire time.
pub type Action = Box<dyn FnOnce(&mut Simulator) -> Result<(), SimError>>;

/// Insertion sequence number; also the tie-break for equal fire times.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    pub const fn new(raw: u64) -> Self {
        EventId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reference to a scheduled event.
///
/// Holding a handle does not keep the event alive; it only lets the owner
/// mark the event inert before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    id: EventId,
    fire_time: SimTime,
}

impl EventHandle {
    pub(crate) fn new(id: EventId, fire_time: SimTime) -> Self {
        Self { id, fire_time }
    }

    /// Sequence number of the referenced event.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Time at which the referenced event is due.
    pub fn fire_time(&self) -> SimTime {
        self.fire_time
    }
}

/// Event owned by the queue until popped.
pub struct ScheduledEvent {
    /// Insertion sequence number
    pub id: EventId,
    /// Scheduled execution time
    pub fire_time: SimTime,
    /// Work to run at `fire_time`
    pub action: Action,
}

impl ScheduledEvent {
    pub(crate) fn new(id: EventId, fire_time: SimTime, action: Action) -> Self {
        Self {
            id,
            fire_time,
            action,
        }
    }

    /// Handle referring to this event.
    pub fn handle(&self) -> EventHandle {
        EventHandle::new(self.id, self.fire_time)
    }
}

impl fmt::Debug for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("id", &self.id)
            .field("fire_time", &self.fire_time)
            .finish_non_exhaustive()
    }
}

impl Eq for ScheduledEvent {}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the smallest (fire_time, id) first
        (self.fire_time, self.id)
            .cmp(&(other.fire_time, other.id))
            .reverse()
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_event(id: u64, millis: u64) -> ScheduledEvent {
        ScheduledEvent::new(
            EventId::new(id),
            SimTime::from_millis(millis),
            Box::new(|_| Ok(())),
        )
    }

    #[test]
    fn test_event_timestamp_ordering() {
        let early = noop_event(2, 10);
        let late = noop_event(1, 20);

        // Reversed for min-heap: earlier event compares greater
        assert!(early > late);
    }

    #[test]
    fn test_equal_time_breaks_ties_by_id() {
        let first = noop_event(1, 10);
        let second = noop_event(2, 10);

        assert!(first > second);
    }

    #[test]
    fn test_handle_mirrors_event() {
        let event = noop_event(9, 42);
        let handle = event.handle();

        assert_eq!(handle.id(), EventId::new(9));
        assert_eq!(handle.fire_time(), SimTime::from_millis(42));
        assert_eq!(handle.id().to_string(), "#9");
    }
}
