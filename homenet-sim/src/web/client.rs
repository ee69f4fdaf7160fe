use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use homenet_core::SimError;
use homenet_core::config::{WebClientConfig, WebObjectConfig};
use homenet_core::engine::{EventHandle, Simulator};
use homenet_core::trace::{ObjectKind, TraceValue, signals};

use super::{WebServer, WebVariables};
use crate::endpoint::{self, Application};
use crate::link::PathChannel;

/// Size of the connection request.
const CONNECT_SIZE: u32 = 40;

/// Where the client is in its page cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowsingPhase {
    Idle,
    Connecting,
    AwaitingMainObject,
    Parsing,
    AwaitingEmbeddedObject,
    Reading,
}

#[derive(Debug, Clone, Copy)]
struct Transfer {
    object: ObjectKind,
    size: u32,
    received: u32,
}

/// Browsing client on a WiFi station.
///
/// Loads pages one after another: a main object, then the embedded objects
/// it references one at a time, then a reading pause.
pub struct WebClient {
    me: Weak<RefCell<WebClient>>,
    name: String,
    address: SocketAddr,
    server_address: SocketAddr,
    server: Weak<RefCell<WebServer>>,
    uplink: PathChannel,
    variables: WebVariables,
    request_size: u32,
    running: bool,
    phase: BrowsingPhase,
    transfer: Option<Transfer>,
    embedded_remaining: u32,
    timer: Option<EventHandle>,
    bytes_received: u64,
    objects_received: u64,
    pages_completed: u64,
}

impl WebClient {
    /// Creates a client reaching `server_address` over `uplink`.
    ///
    /// # Errors
    ///
    /// - `SimError::Configuration` - If the object distributions are invalid
    pub fn new(
        name: &str,
        address: SocketAddr,
        server_address: SocketAddr,
        uplink: PathChannel,
        client: &WebClientConfig,
        objects: &WebObjectConfig,
    ) -> Result<Rc<RefCell<Self>>, SimError> {
        let variables = WebVariables::new(objects)?;
        Ok(Rc::new_cyclic(|me| {
            RefCell::new(Self {
                me: Weak::clone(me),
                name: name.to_string(),
                address,
                server_address,
                server: Weak::new(),
                uplink,
                variables,
                request_size: client.request_size,
                running: false,
                phase: BrowsingPhase::Idle,
                transfer: None,
                embedded_remaining: 0,
                timer: None,
                bytes_received: 0,
                objects_received: 0,
                pages_completed: 0,
            })
        }))
    }

    /// Points the uplink at `server`.
    pub fn connect(&mut self, server: &Rc<RefCell<WebServer>>) {
        self.server = Rc::downgrade(server);
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn phase(&self) -> BrowsingPhase {
        self.phase
    }

    /// Payload bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn objects_received(&self) -> u64 {
        self.objects_received
    }

    /// Pages whose main and embedded objects all arrived.
    pub fn pages_completed(&self) -> u64 {
        self.pages_completed
    }

    /// Handles the server accepting the connection.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If the request cannot be scheduled
    pub fn on_connected(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        if !self.running || self.phase != BrowsingPhase::Connecting {
            return Ok(());
        }
        tracing::debug!(time = %sim.now(), client = %self.name, "connected to web server");
        self.request(sim, ObjectKind::Main)
    }

    /// Handles one segment of the object currently being transferred.
    ///
    /// # Errors
    ///
    /// - `SimError::InvalidDelay` - If follow-up work cannot be scheduled
    pub fn on_segment(
        &mut self,
        sim: &mut Simulator,
        object: ObjectKind,
        object_size: u32,
        size: u32,
    ) -> Result<(), SimError> {
        if !self.running {
            return Ok(());
        }
        self.bytes_received += u64::from(size);
        sim.hub().fire(
            signals::WEB_CLIENT_RX,
            TraceValue::Packet {
                size,
                peer: Some(self.server_address),
            },
        );

        let transfer = self.transfer.get_or_insert(Transfer {
            object,
            size: object_size,
            received: 0,
        });
        transfer.received += size;
        if transfer.received < transfer.size {
            return Ok(());
        }
        let Transfer { object, size, .. } = *transfer;
        self.transfer = None;
        self.complete_object(sim, object, size)
    }

    fn request(&mut self, sim: &mut Simulator, object: ObjectKind) -> Result<(), SimError> {
        self.phase = match object {
            ObjectKind::Main => BrowsingPhase::AwaitingMainObject,
            ObjectKind::Embedded => BrowsingPhase::AwaitingEmbeddedObject,
        };
        self.transfer = None;

        let size = self.request_size;
        let from = self.address;
        sim.hub().fire(
            signals::WEB_CLIENT_TX,
            TraceValue::Packet {
                size,
                peer: Some(self.server_address),
            },
        );
        let delivered = self.uplink.deliver(sim, size, &self.server, move |server, sim| {
            server.on_request(sim, from, object, size)
        })?;
        if !delivered {
            tracing::warn!(time = %sim.now(), client = %self.name, %object, "request lost");
        }
        Ok(())
    }

    fn complete_object(
        &mut self,
        sim: &mut Simulator,
        object: ObjectKind,
        size: u32,
    ) -> Result<(), SimError> {
        self.objects_received += 1;
        let intact = TraceValue::Object {
            object,
            size,
            intact: true,
        };

        match object {
            ObjectKind::Main => {
                sim.hub().fire(signals::WEB_CLIENT_RX_MAIN_OBJECT, intact);
                self.phase = BrowsingPhase::Parsing;
                let parsing = self.variables.parsing_time();
                let timer = endpoint::schedule_on(sim, &self.me, parsing, |client, sim| {
                    client.after_parsing(sim)
                })?;
                self.timer = Some(timer);
                Ok(())
            }
            ObjectKind::Embedded => {
                sim.hub().fire(signals::WEB_CLIENT_RX_EMBEDDED_OBJECT, intact);
                self.embedded_remaining = self.embedded_remaining.saturating_sub(1);
                if self.embedded_remaining > 0 {
                    self.request(sim, ObjectKind::Embedded)
                } else {
                    self.finish_page(sim)
                }
            }
        }
    }

    fn after_parsing(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.timer = None;
        if !self.running {
            return Ok(());
        }
        self.embedded_remaining = self.variables.embedded_object_count(sim.rng());
        tracing::trace!(
            time = %sim.now(),
            client = %self.name,
            embedded = self.embedded_remaining,
            "main object parsed"
        );
        if self.embedded_remaining > 0 {
            self.request(sim, ObjectKind::Embedded)
        } else {
            self.finish_page(sim)
        }
    }

    fn finish_page(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.pages_completed += 1;
        self.phase = BrowsingPhase::Reading;

        let reading = self.variables.reading_time(sim.rng());
        tracing::debug!(
            time = %sim.now(),
            client = %self.name,
            pages = self.pages_completed,
            reading = %reading,
            "page loaded"
        );
        let timer = endpoint::schedule_on(sim, &self.me, reading, |client, sim| {
            client.next_page(sim)
        })?;
        self.timer = Some(timer);
        Ok(())
    }

    fn next_page(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.timer = None;
        if !self.running {
            return Ok(());
        }
        self.request(sim, ObjectKind::Main)
    }
}

impl Application for WebClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.running = true;
        self.phase = BrowsingPhase::Connecting;
        let from = self.address;
        self.uplink
            .deliver(sim, CONNECT_SIZE, &self.server, move |server, sim| {
                server.on_connect(sim, from)
            })?;
        Ok(())
    }

    fn stop(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.running = false;
        self.phase = BrowsingPhase::Idle;
        self.transfer = None;
        endpoint::cancel_slot(sim, &mut self.timer);
        tracing::info!(
            time = %sim.now(),
            client = %self.name,
            pages = self.pages_completed,
            bytes = self.bytes_received,
            "web client stopped"
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
