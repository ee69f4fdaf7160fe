//! Named-signal registry with synchronous, ordered dispatch.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::record::{TraceRecord, TraceValue};
use super::sink::TraceSink;
use crate::SimError;
use crate::engine::Clock;

type Callback = Rc<dyn Fn(&TraceRecord)>;

struct Subscription {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    signals: HashMap<String, Vec<Subscription>>,
    fired: HashMap<String, u64>,
    sinks: Vec<Rc<dyn TraceSink>>,
    next_id: u64,
}

/// Token returned by [`TraceHub::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    signal: String,
    id: u64,
}

impl SubscriptionToken {
    /// Signal this subscription is attached to.
    pub fn signal(&self) -> &str {
        &self.signal
    }
}

/// Registry of subscribers per signal name.
///
/// Cloning yields another handle on the same registry. `fire` snapshots the
/// subscriber list before invoking anyone, so subscribers may subscribe or
/// unsubscribe (or fire further signals) while being called; such changes
/// take effect from the next `fire`.
#[derive(Clone)]
pub struct TraceHub {
    registry: Rc<RefCell<Registry>>,
    clock: Clock,
}

impl TraceHub {
    /// Creates an empty hub stamping records with `clock`.
    pub fn new(clock: Clock) -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry::default())),
            clock,
        }
    }

    /// Appends `callback` to the subscribers of `signal`.
    pub fn subscribe<F>(&self, signal: &str, callback: F) -> SubscriptionToken
    where
        F: Fn(&TraceRecord) + 'static,
    {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .signals
            .entry(signal.to_string())
            .or_default()
            .push(Subscription {
                id,
                callback: Rc::new(callback),
            });

        SubscriptionToken {
            signal: signal.to_string(),
            id,
        }
    }

    /// Removes a subscription; returns false if it was already gone.
    pub fn unsubscribe(&self, token: &SubscriptionToken) -> bool {
        let mut registry = self.registry.borrow_mut();
        let Some(subscribers) = registry.signals.get_mut(&token.signal) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != token.id);
        before != subscribers.len()
    }

    /// Invokes every current subscriber of `signal` with `value`, in
    /// registration order, and returns how many were invoked.
    ///
    /// Unknown or unsubscribed signals are a silent no-op.
    pub fn fire(&self, signal: &str, value: TraceValue) -> usize {
        let snapshot: Vec<Callback> = {
            let mut registry = self.registry.borrow_mut();
            *registry.fired.entry(signal.to_string()).or_insert(0) += 1;
            match registry.signals.get(signal) {
                Some(subscribers) if !subscribers.is_empty() => subscribers
                    .iter()
                    .map(|s| Rc::clone(&s.callback))
                    .collect(),
                _ => return 0,
            }
        };

        let record = TraceRecord {
            time: self.clock.now(),
            signal: signal.to_string(),
            value,
        };
        for callback in &snapshot {
            callback(&record);
        }
        snapshot.len()
    }

    /// Number of current subscribers of `signal`.
    pub fn subscriber_count(&self, signal: &str) -> usize {
        self.registry
            .borrow()
            .signals
            .get(signal)
            .map_or(0, Vec::len)
    }

    /// Number of times `signal` has been fired, with or without subscribers.
    pub fn fire_count(&self, signal: &str) -> u64 {
        self.registry
            .borrow()
            .fired
            .get(signal)
            .copied()
            .unwrap_or(0)
    }

    /// Fire counts for every signal fired so far.
    pub fn signal_counts(&self) -> BTreeMap<String, u64> {
        self.registry
            .borrow()
            .fired
            .iter()
            .map(|(signal, count)| (signal.clone(), *count))
            .collect()
    }

    /// Signals with subscribers that have never been fired, sorted by name.
    ///
    /// A non-empty result after a run usually means a producer and a
    /// consumer disagree on a signal name.
    pub fn dormant_signals(&self) -> Vec<String> {
        let registry = self.registry.borrow();
        let mut dormant: Vec<String> = registry
            .signals
            .iter()
            .filter(|(name, subscribers)| {
                !subscribers.is_empty() && !registry.fired.contains_key(name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();
        dormant.sort();
        dormant
    }

    /// Subscribes `sink` to each of `signals` and registers it for flushing.
    pub fn attach_sink(&self, sink: Rc<dyn TraceSink>, signals: &[&str]) -> Vec<SubscriptionToken> {
        self.registry.borrow_mut().sinks.push(Rc::clone(&sink));
        signals
            .iter()
            .map(|signal| {
                let sink = Rc::clone(&sink);
                self.subscribe(signal, move |record| sink.record(record))
            })
            .collect()
    }

    /// Flushes every attached sink, attempting all of them.
    ///
    /// # Errors
    ///
    /// - `SimError::Io` - First flush failure encountered
    pub fn flush(&self) -> Result<(), SimError> {
        let sinks: Vec<Rc<dyn TraceSink>> = self.registry.borrow().sinks.clone();
        let mut first_error = None;
        for sink in sinks {
            if let Err(e) = sink.flush() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(SimError::Io(e)),
            None => Ok(()),
        }
    }
}
