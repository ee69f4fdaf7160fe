use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use homenet_core::SimError;
use homenet_core::config::StreamingConfig;
use homenet_core::control::{self, ControlEndpoint, ControlMessage, SessionState, Transition};
use homenet_core::engine::{EventHandle, Simulator};
use homenet_core::trace::{TraceValue, signals};

use super::StreamServer;
use crate::endpoint::{self, Application};
use crate::link::PathChannel;

/// Sequence-gap bookkeeping for one feedback interval.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LossTracker {
    highest: Option<u64>,
    received: u64,
    lost: u64,
}

impl LossTracker {
    fn on_sequence(&mut self, sequence: u64) {
        match self.highest {
            Some(highest) if sequence > highest => {
                self.lost += sequence - highest - 1;
                self.highest = Some(sequence);
            }
            // Duplicate or reordered; the channel keeps order, so never counted
            Some(_) => return,
            None => {
                self.lost += sequence;
                self.highest = Some(sequence);
            }
        }
        self.received += 1;
    }

    /// Fraction lost since the last call, then starts a new interval.
    fn take_fraction(&mut self) -> f64 {
        let expected = self.received + self.lost;
        let fraction = if expected == 0 {
            0.0
        } else {
            self.lost as f64 / expected as f64
        };
        self.received = 0;
        self.lost = 0;
        fraction
    }
}

/// Streaming client on a WiFi station.
///
/// Accepts the scheduled control plan, forwards accepted messages to the
/// server, counts received media bytes and reports loss.
pub struct StreamClient {
    me: Weak<RefCell<StreamClient>>,
    name: String,
    address: SocketAddr,
    server_address: SocketAddr,
    server: Weak<RefCell<StreamServer>>,
    control_link: PathChannel,
    feedback_link: PathChannel,
    config: StreamingConfig,
    running: bool,
    state: SessionState,
    bytes_received: u64,
    packets_received: u64,
    loss: LossTracker,
    reported_loss: Option<f64>,
    feedback_timer: Option<EventHandle>,
}

impl StreamClient {
    /// Creates a client reaching the server over the given uplink channels.
    ///
    /// `control_link` should deliver reliably; `feedback_link` may lose reports.
    pub fn new(
        name: &str,
        address: SocketAddr,
        server_address: SocketAddr,
        control_link: PathChannel,
        feedback_link: PathChannel,
        config: &StreamingConfig,
    ) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me| {
            RefCell::new(Self {
                me: Weak::clone(me),
                name: name.to_string(),
                address,
                server_address,
                server: Weak::new(),
                control_link,
                feedback_link,
                config: config.clone(),
                running: false,
                state: SessionState::Init,
                bytes_received: 0,
                packets_received: 0,
                loss: LossTracker::default(),
                reported_loss: None,
                feedback_timer: None,
            })
        })
    }

    /// Points the uplink at `server`.
    pub fn connect(&mut self, server: &Rc<RefCell<StreamServer>>) {
        self.server = Rc::downgrade(server);
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Media bytes received so far; the sampled counter.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    /// Last loss fraction reported to the server.
    pub fn reported_loss(&self) -> Option<f64> {
        self.reported_loss
    }

    /// Handles one media packet from the server.
    pub fn on_media(&mut self, sim: &mut Simulator, sequence: u64, size: u32) -> Result<(), SimError> {
        if !self.running {
            return Ok(());
        }
        self.bytes_received += u64::from(size);
        self.packets_received += 1;
        self.loss.on_sequence(sequence);

        sim.hub().fire(
            signals::STREAM_CLIENT_RX,
            TraceValue::Packet {
                size,
                peer: Some(self.server_address),
            },
        );
        Ok(())
    }

    fn send_control(&mut self, sim: &mut Simulator, message: ControlMessage) -> Result<(), SimError> {
        let size = self.config.control_message_size;
        let Some(arrival) = self.control_link.transmit(sim, size)? else {
            tracing::warn!(time = %sim.now(), client = %self.name, ?message, "control message lost");
            return Ok(());
        };
        let server = Weak::clone(&self.server);
        sim.schedule_at(arrival, move |sim| match server.upgrade() {
            Some(server) => control::apply_message(sim, &server, message),
            None => Ok(()),
        })?;
        Ok(())
    }

    fn start_feedback(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        endpoint::cancel_slot(sim, &mut self.feedback_timer);
        let timer = endpoint::schedule_on(sim, &self.me, self.config.feedback_interval, |client, sim| {
            client.send_feedback(sim)
        })?;
        self.feedback_timer = Some(timer);
        Ok(())
    }

    fn send_feedback(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.feedback_timer = None;
        if !self.running || !self.state.is_open() {
            return Ok(());
        }

        let fraction = self.loss.take_fraction();
        if self.reported_loss != Some(fraction) {
            sim.hub().fire(
                signals::STREAM_FRACTION_LOSS,
                TraceValue::Fraction { fraction },
            );
        }
        self.reported_loss = Some(fraction);

        let size = self.config.control_message_size;
        self.feedback_link.deliver(sim, size, &self.server, move |server, sim| {
            server.on_feedback(sim, fraction)
        })?;

        self.start_feedback(sim)
    }
}

impl ControlEndpoint for StreamClient {
    fn endpoint_name(&self) -> &str {
        &self.name
    }

    fn session_state(&self) -> SessionState {
        self.state
    }

    fn accept_control(
        &mut self,
        message: ControlMessage,
        sim: &mut Simulator,
    ) -> Result<Transition, SimError> {
        if !self.running {
            // An inactive client cannot take part in any exchange
            return Err(SimError::InvalidState {
                endpoint: self.name.clone(),
                message,
                state: self.state,
            });
        }
        let transition = self.state.transition(&self.name, message)?;
        self.state = transition.to;

        match message {
            ControlMessage::Setup => {
                self.loss = LossTracker::default();
                self.reported_loss = None;
                self.start_feedback(sim)?;
            }
            ControlMessage::Teardown => {
                endpoint::cancel_slot(sim, &mut self.feedback_timer);
            }
            ControlMessage::Play | ControlMessage::Pause => {}
        }

        self.send_control(sim, message)?;
        Ok(transition)
    }
}

impl Application for StreamClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, _sim: &mut Simulator) -> Result<(), SimError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.running = false;
        endpoint::cancel_slot(sim, &mut self.feedback_timer);
        tracing::info!(
            time = %sim.now(),
            client = %self.name,
            bytes = self.bytes_received,
            packets = self.packets_received,
            "streaming client stopped"
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_tracker_counts_gaps() {
        let mut tracker = LossTracker::default();
        for sequence in [0, 1, 4, 5, 9] {
            tracker.on_sequence(sequence);
        }

        // 5 received, 2 + 3 missing
        assert!((tracker.take_fraction() - 0.5).abs() < 1e-12);
        assert_eq!(tracker.take_fraction(), 0.0);

        tracker.on_sequence(10);
        assert_eq!(tracker.take_fraction(), 0.0);
    }

    #[test]
    fn test_loss_tracker_counts_leading_gap() {
        let mut tracker = LossTracker::default();
        tracker.on_sequence(3);

        assert!((tracker.take_fraction() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_loss_tracker_ignores_duplicates() {
        let mut tracker = LossTracker::default();
        tracker.on_sequence(0);
        tracker.on_sequence(1);
        tracker.on_sequence(1);

        assert_eq!(tracker.received, 2);
        assert_eq!(tracker.take_fraction(), 0.0);
    }
}
