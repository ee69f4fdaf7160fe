use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use homenet_core::SimError;
use homenet_core::config::StreamingConfig;
use homenet_core::control::{ControlEndpoint, ControlMessage, SessionState, Transition};
use homenet_core::engine::{EventHandle, SimTime, Simulator};
use homenet_core::trace::{TraceValue, signals};

use super::StreamClient;
use crate::endpoint::{self, Application};
use crate::link::{self, PathChannel};

/// Streaming server on the second backbone segment.
///
/// Mirrors the client's session state from the control messages it
/// receives and paces frames to the client while playing.
pub struct StreamServer {
    me: Weak<RefCell<StreamServer>>,
    name: String,
    address: SocketAddr,
    client: Weak<RefCell<StreamClient>>,
    client_address: Option<SocketAddr>,
    downlink: Option<PathChannel>,
    config: StreamingConfig,
    running: bool,
    state: SessionState,
    next_sequence: u64,
    frame_index: usize,
    quality: f64,
    congestion_level: f64,
    frame_timer: Option<EventHandle>,
    frames_sent: u64,
    bytes_sent: u64,
}

impl StreamServer {
    pub fn new(name: &str, address: SocketAddr, config: &StreamingConfig) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me| {
            RefCell::new(Self {
                me: Weak::clone(me),
                name: name.to_string(),
                address,
                client: Weak::new(),
                client_address: None,
                downlink: None,
                config: config.clone(),
                running: false,
                state: SessionState::Init,
                next_sequence: 0,
                frame_index: 0,
                quality: 1.0,
                congestion_level: 0.0,
                frame_timer: None,
                frames_sent: 0,
                bytes_sent: 0,
            })
        })
    }

    /// Attaches the one client this server streams to.
    pub fn attach_client(&mut self, client: &Rc<RefCell<StreamClient>>, downlink: PathChannel) {
        self.client_address = Some(client.borrow().address());
        self.client = Rc::downgrade(client);
        self.downlink = Some(downlink);
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Current quality factor applied to frame sizes, in `(0, 1]`.
    pub fn quality(&self) -> f64 {
        self.quality
    }

    /// Smoothed loss-derived congestion level.
    pub fn congestion_level(&self) -> f64 {
        self.congestion_level
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Folds a loss report into the congestion level and adapts quality.
    pub fn on_feedback(&mut self, sim: &mut Simulator, fraction_loss: f64) -> Result<(), SimError> {
        if !self.running {
            return Ok(());
        }

        let alpha = self.config.congestion_smoothing;
        let level = (1.0 - alpha) * self.congestion_level + alpha * fraction_loss;
        if (level - self.congestion_level).abs() > f64::EPSILON {
            sim.hub().fire(
                signals::STREAM_CONGESTION_LEVEL,
                TraceValue::Level { level },
            );
        }
        self.congestion_level = level;

        if !self.config.use_congestion_threshold {
            return Ok(());
        }
        let previous = self.quality;
        if level > self.config.congestion_threshold {
            self.quality = (self.quality * self.config.quality_step).max(self.config.min_quality);
        } else {
            self.quality = (self.quality / self.config.quality_step).min(1.0);
        }
        if self.quality != previous {
            tracing::debug!(
                time = %sim.now(),
                server = %self.name,
                level,
                quality = self.quality,
                "stream quality adapted"
            );
        }
        Ok(())
    }

    fn current_frame_size(&self) -> u32 {
        let sizes = &self.config.frame_sizes;
        let base = sizes.get(self.frame_index % sizes.len().max(1)).copied().unwrap_or(0);
        ((f64::from(base) * self.quality).round() as u32).max(1)
    }

    fn schedule_frame(&mut self, sim: &mut Simulator, delay: SimTime) -> Result<(), SimError> {
        endpoint::cancel_slot(sim, &mut self.frame_timer);
        let timer = endpoint::schedule_on(sim, &self.me, delay, |server, sim| server.send_frame(sim))?;
        self.frame_timer = Some(timer);
        Ok(())
    }

    fn send_frame(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.frame_timer = None;
        if !self.running || !self.state.is_playing() {
            return Ok(());
        }
        let frame_size = self.current_frame_size();
        let Some(downlink) = self.downlink.as_mut() else {
            return Err(SimError::Endpoint {
                endpoint: self.name.clone(),
                reason: "playing without an attached client".to_string(),
            });
        };

        for size in link::fragment(frame_size, self.config.max_payload) {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.bytes_sent += u64::from(size);

            sim.hub().fire(
                signals::STREAM_SERVER_TX,
                TraceValue::Packet {
                    size,
                    peer: self.client_address,
                },
            );
            downlink.deliver(sim, size, &self.client, move |client, sim| {
                client.on_media(sim, sequence, size)
            })?;
        }
        self.frames_sent += 1;
        self.frame_index += 1;

        self.schedule_frame(sim, self.config.frame_interval)
    }
}

impl ControlEndpoint for StreamServer {
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
            return Err(SimError::InvalidState {
                endpoint: self.name.clone(),
                message,
                state: self.state,
            });
        }
        let transition = self.state.transition(&self.name, message)?;
        self.state = transition.to;

        match transition.to {
            SessionState::Playing => self.schedule_frame(sim, SimTime::ZERO)?,
            SessionState::Ready => {
                self.next_sequence = 0;
                self.frame_index = 0;
            }
            SessionState::Paused | SessionState::Init => {
                endpoint::cancel_slot(sim, &mut self.frame_timer);
            }
        }
        Ok(transition)
    }
}

impl Application for StreamServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, _sim: &mut Simulator) -> Result<(), SimError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.running = false;
        endpoint::cancel_slot(sim, &mut self.frame_timer);
        tracing::info!(
            time = %sim.now(),
            server = %self.name,
            frames = self.frames_sent,
            bytes = self.bytes_sent,
            quality = self.quality,
            "streaming server stopped"
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
