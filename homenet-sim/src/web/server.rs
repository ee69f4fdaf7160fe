use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use homenet_core::SimError;
use homenet_core::config::WebObjectConfig;
use homenet_core::engine::Simulator;
use homenet_core::trace::{ObjectKind, TraceValue, signals};

use super::{WebClient, WebVariables};
use crate::endpoint::Application;
use crate::link::{self, PathChannel};

/// Size of the handshake reply to a connecting client.
const ACCEPT_SIZE: u32 = 40;

struct ClientLink {
    client: Weak<RefCell<WebClient>>,
    downlink: PathChannel,
}

/// HTTP server on the first backbone segment.
///
/// Generates a fresh object for every request and streams it back in
/// segments over a reliable channel.
pub struct WebServer {
    name: String,
    address: SocketAddr,
    running: bool,
    variables: WebVariables,
    mtu: u32,
    clients: BTreeMap<SocketAddr, ClientLink>,
    connections: u64,
    objects_served: u64,
    bytes_sent: u64,
}

impl WebServer {
    /// Creates a server drawing object sizes from `objects`.
    ///
    /// # Errors
    ///
    /// - `SimError::Configuration` - If the object distributions are invalid
    pub fn new(
        name: &str,
        address: SocketAddr,
        objects: &WebObjectConfig,
    ) -> Result<Rc<RefCell<Self>>, SimError> {
        Ok(Rc::new(RefCell::new(Self {
            name: name.to_string(),
            address,
            running: false,
            variables: WebVariables::new(objects)?,
            mtu: objects.mtu,
            clients: BTreeMap::new(),
            connections: 0,
            objects_served: 0,
            bytes_sent: 0,
        })))
    }

    /// Makes `client` reachable from this server over `downlink`.
    pub fn register_client(&mut self, client: &Rc<RefCell<WebClient>>, downlink: PathChannel) {
        let address = client.borrow().address();
        self.clients.insert(
            address,
            ClientLink {
                client: Rc::downgrade(client),
                downlink,
            },
        );
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn connections(&self) -> u64 {
        self.connections
    }

    pub fn objects_served(&self) -> u64 {
        self.objects_served
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn link_for(&mut self, client: SocketAddr) -> Result<&mut ClientLink, SimError> {
        let name = &self.name;
        self.clients.get_mut(&client).ok_or_else(|| SimError::Endpoint {
            endpoint: name.clone(),
            reason: format!("no route back to unregistered client {client}"),
        })
    }

    /// Handles a connection request from `client`.
    ///
    /// # Errors
    ///
    /// - `SimError::Endpoint` - If `client` was never registered
    pub fn on_connect(&mut self, sim: &mut Simulator, client: SocketAddr) -> Result<(), SimError> {
        if !self.running {
            tracing::debug!(time = %sim.now(), %client, "connection refused, server not running");
            return Ok(());
        }
        let server = self.address;
        let link = self.link_for(client)?;
        link.downlink
            .deliver(sim, ACCEPT_SIZE, &link.client, |client, sim| client.on_connected(sim))?;
        self.connections += 1;

        sim.hub().fire(
            signals::WEB_SERVER_CONNECTION_ESTABLISHED,
            TraceValue::Connection { client, server },
        );
        Ok(())
    }

    /// Handles a request for one object and sends the object back.
    ///
    /// # Errors
    ///
    /// - `SimError::Endpoint` - If `client` was never registered
    pub fn on_request(
        &mut self,
        sim: &mut Simulator,
        client: SocketAddr,
        object: ObjectKind,
        request_size: u32,
    ) -> Result<(), SimError> {
        if !self.running {
            return Ok(());
        }
        sim.hub().fire(
            signals::WEB_SERVER_RX,
            TraceValue::Packet {
                size: request_size,
                peer: Some(client),
            },
        );

        let (size, signal) = match object {
            ObjectKind::Main => (
                self.variables.main_object_size(sim.rng()),
                signals::WEB_SERVER_MAIN_OBJECT,
            ),
            ObjectKind::Embedded => (
                self.variables.embedded_object_size(sim.rng()),
                signals::WEB_SERVER_EMBEDDED_OBJECT,
            ),
        };
        sim.hub().fire(
            signal,
            TraceValue::Object {
                object,
                size,
                intact: true,
            },
        );
        tracing::debug!(time = %sim.now(), %client, %object, size, "object generated");

        let mtu = self.mtu;
        let link = self.link_for(client)?;
        let mut sent = 0u64;
        for segment in link::fragment(size, mtu) {
            sim.hub().fire(
                signals::WEB_SERVER_TX,
                TraceValue::Packet {
                    size: segment,
                    peer: Some(client),
                },
            );
            link.downlink.deliver(sim, segment, &link.client, move |client, sim| {
                client.on_segment(sim, object, size, segment)
            })?;
            sent += u64::from(segment);
        }
        self.bytes_sent += sent;
        self.objects_served += 1;
        Ok(())
    }
}

impl Application for WebServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, _sim: &mut Simulator) -> Result<(), SimError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        self.running = false;
        tracing::info!(
            time = %sim.now(),
            server = %self.name,
            connections = self.connections,
            objects = self.objects_served,
            bytes = self.bytes_sent,
            "web server stopped"
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
