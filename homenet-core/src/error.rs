//! Error types shared by every homenet subsystem.

use thiserror::Error;

use crate::control::{ControlMessage, SessionState};
use crate::engine::{EventId, SimTime};

/// Errors raised by the simulation harness and its endpoints.
///
/// Scheduling and control validation errors are local and recoverable.
/// `ActionFault` is fatal to the run that produced it.
#[derive(Debug, Error)]
pub enum SimError {
    /// Delay was negative, non-finite, or would overflow simulated time
    #[error("Invalid delay: {reason}")]
    InvalidDelay {
        /// Why the delay was rejected
        reason: String,
    },

    /// Control message not valid from the endpoint's current state
    #[error("Endpoint {endpoint} cannot accept {message:?} in state {state:?}")]
    InvalidState {
        /// Name of the endpoint that rejected the message
        endpoint: String,
        /// Message that was rejected
        message: ControlMessage,
        /// State the endpoint was in at dispatch time
        state: SessionState,
    },

    /// An executing action failed; the run stopped at this event
    #[error("Action {event} faulted at {at}: {source}")]
    ActionFault {
        /// Event whose action failed
        event: EventId,
        /// Simulated time at which the action executed
        at: SimTime,
        /// Underlying failure
        #[source]
        source: Box<SimError>,
    },

    /// Clock was asked to move backwards
    #[error("Clock regression: now {now}, requested {requested}")]
    ClockRegression {
        /// Current simulated time
        now: SimTime,
        /// Rejected target time
        requested: SimTime,
    },

    /// Event queue exceeded maximum capacity
    #[error("Event queue overflow: {count} events pending")]
    EventQueueOverflow {
        /// Number of pending events when the insert was refused
        count: usize,
    },

    /// Configuration rejected before the run started
    #[error("Configuration error: {reason}")]
    Configuration {
        /// What was wrong with the configuration
        reason: String,
    },

    /// Endpoint could not complete an operation it was asked to perform
    #[error("Endpoint {endpoint} failed: {reason}")]
    Endpoint {
        /// Endpoint name
        endpoint: String,
        /// Failure description
        reason: String,
    },

    /// I/O failure in a trace sink or log setup
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Returns true for errors that leave the simulation usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SimError::InvalidDelay { .. } | SimError::InvalidState { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let delay = SimError::InvalidDelay {
            reason: "negative".to_string(),
        };
        let state = SimError::InvalidState {
            endpoint: "client".to_string(),
            message: ControlMessage::Pause,
            state: SessionState::Init,
        };
        let fault = SimError::ActionFault {
            event: EventId::new(3),
            at: SimTime::from_secs(1),
            source: Box::new(SimError::Configuration {
                reason: "broken".to_string(),
            }),
        };

        assert!(delay.is_recoverable());
        assert!(state.is_recoverable());
        assert!(!fault.is_recoverable());
    }

    #[test]
    fn test_action_fault_keeps_source() {
        let fault = SimError::ActionFault {
            event: EventId::new(7),
            at: SimTime::from_millis(1500),
            source: Box::new(SimError::Endpoint {
                endpoint: "server".to_string(),
                reason: "dangling peer".to_string(),
            }),
        };

        let source = std::error::Error::source(&fault).map(|e| e.to_string());
        assert_eq!(
            source.as_deref(),
            Some("Endpoint server failed: dangling peer")
        );
    }
}
