//! Streaming session control: message kinds, session states and
//! time-scheduled dispatch against an endpoint.
//!
//! Validity is checked when the message fires, not when it is scheduled,
//! because earlier messages in the same plan change the state the later
//! ones are judged against.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::SimError;
use crate::engine::{EventHandle, SimTime, Simulator};
use crate::trace::{TraceValue, signals};

/// Control messages a streaming client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    Setup,
    Play,
    Pause,
    Teardown,
}

/// Protocol state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Init,
    Ready,
    Playing,
    Paused,
}

impl SessionState {
    /// State reached by applying `message`, or `None` if it is not allowed.
    pub fn next(self, message: ControlMessage) -> Option<SessionState> {
        use ControlMessage::*;
        use SessionState::*;

        match (self, message) {
            (Init, Setup) => Some(Ready),
            (Ready | Paused, Play) => Some(Playing),
            (Playing, Pause) => Some(Paused),
            (Ready | Playing | Paused, Teardown) => Some(Init),
            _ => None,
        }
    }

    /// Like [`SessionState::next`] but reports refusal as `InvalidState`.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidState` - If `message` is not valid from this state
    pub fn transition(self, endpoint: &str, message: ControlMessage) -> Result<Transition, SimError> {
        self.next(message)
            .map(|to| Transition {
                message,
                from: self,
                to,
            })
            .ok_or_else(|| SimError::InvalidState {
                endpoint: endpoint.to_string(),
                message,
                state: self,
            })
    }

    /// Returns true while media is flowing.
    pub fn is_playing(self) -> bool {
        self == SessionState::Playing
    }

    /// Returns true between setup and teardown.
    pub fn is_open(self) -> bool {
        self != SessionState::Init
    }
}

/// An accepted state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub message: ControlMessage,
    pub from: SessionState,
    pub to: SessionState,
}

/// One entry of a control plan: send `message` at absolute time `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlStep {
    pub at: SimTime,
    pub message: ControlMessage,
}

impl ControlStep {
    pub fn new(at: SimTime, message: ControlMessage) -> Self {
        Self { at, message }
    }
}

/// Endpoint that accepts control messages.
pub trait ControlEndpoint {
    /// Name used in errors and trace payloads.
    fn endpoint_name(&self) -> &str;

    /// Current protocol state.
    fn session_state(&self) -> SessionState;

    /// Validates `message` against the current state and applies it.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidState` - If `message` is not valid now; the
    ///   endpoint must be left unchanged
    /// - Any other error is treated as a fault of the dispatching action
    fn accept_control(
        &mut self,
        message: ControlMessage,
        sim: &mut Simulator,
    ) -> Result<Transition, SimError>;
}

/// Schedules `message` for `endpoint` at absolute time `at`.
///
/// # Errors
///
/// - `SimError::InvalidDelay` - If `at` is in the past
pub fn schedule_message<E>(
    sim: &mut Simulator,
    endpoint: &Rc<RefCell<E>>,
    at: SimTime,
    message: ControlMessage,
) -> Result<EventHandle, SimError>
where
    E: ControlEndpoint + 'static,
{
    let endpoint = Rc::clone(endpoint);
    sim.schedule_at(at, move |sim| apply_message(sim, &endpoint, message))
}

/// Schedules every step of `plan`, in order.
///
/// # Errors
///
/// - `SimError::InvalidDelay` - If a step lies in the past; earlier steps stay scheduled
pub fn schedule_plan<E>(
    sim: &mut Simulator,
    endpoint: &Rc<RefCell<E>>,
    plan: &[ControlStep],
) -> Result<Vec<EventHandle>, SimError>
where
    E: ControlEndpoint + 'static,
{
    plan.iter()
        .map(|step| schedule_message(sim, endpoint, step.at, step.message))
        .collect()
}

/// Offers `message` to `endpoint` now and reports the outcome.
///
/// An accepted message fires `control.transition`. A message the endpoint
/// refuses with `InvalidState` is logged, fired on `control.rejected` and
/// recorded as recoverable; the run continues.
///
/// The endpoint is only borrowed while it handles the message, so
/// subscribers of either signal may read it.
///
/// # Errors
///
/// - Any error from the endpoint other than `InvalidState`
pub fn apply_message<E: ControlEndpoint + ?Sized>(
    sim: &mut Simulator,
    endpoint: &RefCell<E>,
    message: ControlMessage,
) -> Result<(), SimError> {
    let (name, outcome) = {
        let mut endpoint = endpoint.borrow_mut();
        let outcome = endpoint.accept_control(message, sim);
        (endpoint.endpoint_name().to_string(), outcome)
    };
    report_outcome(sim, name, outcome)
}

fn report_outcome(
    sim: &mut Simulator,
    name: String,
    outcome: Result<Transition, SimError>,
) -> Result<(), SimError> {
    match outcome {
        Ok(transition) => {
            tracing::info!(
                time = %sim.now(),
                endpoint = %name,
                message = ?transition.message,
                from = ?transition.from,
                to = ?transition.to,
                "control transition"
            );
            sim.hub().fire(
                signals::CONTROL_TRANSITION,
                TraceValue::Control {
                    endpoint: name,
                    message: transition.message,
                    from: transition.from,
                    to: transition.to,
                },
            );
            Ok(())
        }
        Err(SimError::InvalidState {
            endpoint,
            message,
            state,
        }) => {
            tracing::warn!(
                time = %sim.now(),
                endpoint = %endpoint,
                message = ?message,
                state = ?state,
                "control message rejected"
            );
            sim.hub().fire(
                signals::CONTROL_REJECTED,
                TraceValue::ControlRejected {
                    endpoint: endpoint.clone(),
                    message,
                    state,
                },
            );
            sim.record_recoverable(SimError::InvalidState {
                endpoint,
                message,
                state,
            });
            Ok(())
        }
        Err(other) => Err(other),
    }
}
