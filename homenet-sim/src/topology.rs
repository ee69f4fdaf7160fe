//! Home network topology: nodes, segments and addressing.
//!
//! Two wired backbone segments hang off the access point, one towards the
//! HTTP server and one towards the streaming server. The WiFi cell holds the
//! stations and the access point. Paths between nodes on different segments
//! always cross the access point.

use std::fmt;
use std::net::Ipv4Addr;

use homenet_core::SimError;
use homenet_core::config::{LinkProfile, TopologyConfig};
use homenet_core::engine::SimTime;

/// Index of a node in a [`HomeNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// What a node is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    AccessPoint,
    HttpServer,
    StreamServer,
    Station(u32),
}

/// Medium of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Backbone,
    Wifi,
}

/// Address of a node on one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub segment: usize,
    pub address: Ipv4Addr,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    pub interfaces: Vec<Interface>,
}

/// A shared medium with one `/24` subnet.
#[derive(Debug, Clone)]
pub struct Segment {
    pub kind: SegmentKind,
    pub network: Ipv4Addr,
    pub profile: LinkProfile,
    pub members: Vec<NodeId>,
}

/// End-to-end characteristics of a path, composed from its segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathProfile {
    /// Bottleneck rate in bits per second
    pub data_rate_bps: u64,
    /// Sum of one-way propagation delays
    pub delay: SimTime,
    /// Probability that a packet is lost somewhere on the path
    pub loss_rate: f64,
    /// Number of segments traversed
    pub hops: u32,
}

impl PathProfile {
    fn single(profile: &LinkProfile) -> Self {
        Self {
            data_rate_bps: profile.data_rate_bps,
            delay: profile.delay,
            loss_rate: profile.loss_rate,
            hops: 1,
        }
    }

    /// Appends another segment to the path.
    pub fn then(self, next: &LinkProfile) -> Self {
        Self {
            data_rate_bps: self.data_rate_bps.min(next.data_rate_bps),
            delay: self.delay + next.delay,
            loss_rate: 1.0 - (1.0 - self.loss_rate) * (1.0 - next.loss_rate),
            hops: self.hops + 1,
        }
    }
}

/// The built home network.
#[derive(Debug, Clone)]
pub struct HomeNetwork {
    nodes: Vec<Node>,
    segments: Vec<Segment>,
    access_point: NodeId,
    http_server: NodeId,
    stream_server: NodeId,
    stations: Vec<NodeId>,
}

const HTTP_SUBNET: Ipv4Addr = Ipv4Addr::new(10, 1, 1, 0);
const STREAM_SUBNET: Ipv4Addr = Ipv4Addr::new(10, 1, 2, 0);
const WIFI_SUBNET: Ipv4Addr = Ipv4Addr::new(10, 1, 3, 0);

impl HomeNetwork {
    /// Builds nodes, segments and addresses.
    ///
    /// Hosts on each subnet are numbered from `.1` in attachment order: the
    /// access point comes first on the backbones and last on the WiFi cell.
    ///
    /// # Errors
    ///
    /// - `SimError::Configuration` - If the station count does not fit the WiFi subnet
    pub fn build(config: &TopologyConfig) -> Result<Self, SimError> {
        if config.n_wifi == 0 || config.n_wifi > 253 {
            return Err(SimError::Configuration {
                reason: format!("cannot address {} WiFi stations", config.n_wifi),
            });
        }

        let mut network = Self {
            nodes: Vec::new(),
            segments: Vec::new(),
            access_point: NodeId(0),
            http_server: NodeId(0),
            stream_server: NodeId(0),
            stations: Vec::new(),
        };

        network.access_point = network.add_node(NodeRole::AccessPoint);
        network.http_server = network.add_node(NodeRole::HttpServer);
        network.stream_server = network.add_node(NodeRole::StreamServer);
        for index in 0..config.n_wifi {
            let station = network.add_node(NodeRole::Station(index));
            network.stations.push(station);
        }

        let ap = network.access_point;
        network.add_segment(
            SegmentKind::Backbone,
            HTTP_SUBNET,
            config.backbone,
            &[ap, network.http_server],
        );
        network.add_segment(
            SegmentKind::Backbone,
            STREAM_SUBNET,
            config.backbone,
            &[ap, network.stream_server],
        );
        let mut wifi_members = network.stations.clone();
        wifi_members.push(ap);
        network.add_segment(SegmentKind::Wifi, WIFI_SUBNET, config.wifi, &wifi_members);

        tracing::debug!(
            nodes = network.nodes.len(),
            segments = network.segments.len(),
            stations = config.n_wifi,
            "home network built"
        );

        Ok(network)
    }

    fn add_node(&mut self, role: NodeRole) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            role,
            interfaces: Vec::new(),
        });
        id
    }

    fn add_segment(
        &mut self,
        kind: SegmentKind,
        network: Ipv4Addr,
        profile: LinkProfile,
        members: &[NodeId],
    ) {
        let segment = self.segments.len();
        let [a, b, c, _] = network.octets();
        for (host, node) in members.iter().enumerate() {
            let address = Ipv4Addr::new(a, b, c, host as u8 + 1);
            self.nodes[node.0].interfaces.push(Interface { segment, address });
        }
        self.segments.push(Segment {
            kind,
            network,
            profile,
            members: members.to_vec(),
        });
    }

    pub fn access_point(&self) -> NodeId {
        self.access_point
    }

    pub fn http_server(&self) -> NodeId {
        self.http_server
    }

    pub fn stream_server(&self) -> NodeId {
        self.stream_server
    }

    /// WiFi station by index.
    ///
    /// # Errors
    ///
    /// - `SimError::Configuration` - If there is no such station
    pub fn station(&self, index: usize) -> Result<NodeId, SimError> {
        self.stations
            .get(index)
            .copied()
            .ok_or_else(|| SimError::Configuration {
                reason: format!("station {index} does not exist ({} built)", self.stations.len()),
            })
    }

    pub fn stations(&self) -> &[NodeId] {
        &self.stations
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Address of `node` on its first interface.
    ///
    /// For the access point that is the HTTP backbone address.
    pub fn address(&self, node: NodeId) -> Ipv4Addr {
        self.nodes[node.0]
            .interfaces
            .first()
            .map_or(Ipv4Addr::UNSPECIFIED, |iface| iface.address)
    }

    fn shared_segment(&self, a: NodeId, b: NodeId) -> Option<usize> {
        let node_a = &self.nodes[a.0];
        let node_b = &self.nodes[b.0];
        node_a.interfaces.iter().find_map(|ia| {
            node_b
                .interfaces
                .iter()
                .any(|ib| ib.segment == ia.segment)
                .then_some(ia.segment)
        })
    }

    /// Characteristics of the path from `from` to `to`.
    ///
    /// # Errors
    ///
    /// - `SimError::Configuration` - If the nodes are the same or not connected
    pub fn path(&self, from: NodeId, to: NodeId) -> Result<PathProfile, SimError> {
        if from == to {
            return Err(SimError::Configuration {
                reason: format!("no path from {from} to itself"),
            });
        }
        if let Some(segment) = self.shared_segment(from, to) {
            return Ok(PathProfile::single(&self.segments[segment].profile));
        }

        let first = self.shared_segment(from, self.access_point);
        let second = self.shared_segment(self.access_point, to);
        match (first, second) {
            (Some(first), Some(second)) => Ok(PathProfile::single(&self.segments[first].profile)
                .then(&self.segments[second].profile)),
            _ => Err(SimError::Configuration {
                reason: format!("{from} and {to} are not connected"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> HomeNetwork {
        HomeNetwork::build(&TopologyConfig::default()).unwrap()
    }

    #[test]
    fn test_addressing_matches_subnet_plan() {
        let net = network();

        assert_eq!(net.address(net.http_server()), Ipv4Addr::new(10, 1, 1, 2));
        assert_eq!(net.address(net.stream_server()), Ipv4Addr::new(10, 1, 2, 2));
        assert_eq!(net.address(net.station(0).unwrap()), Ipv4Addr::new(10, 1, 3, 1));
        assert_eq!(net.address(net.station(2).unwrap()), Ipv4Addr::new(10, 1, 3, 3));

        let ap = net.node(net.access_point());
        let ap_addresses: Vec<Ipv4Addr> = ap.interfaces.iter().map(|i| i.address).collect();
        assert_eq!(
            ap_addresses,
            vec![
                Ipv4Addr::new(10, 1, 1, 1),
                Ipv4Addr::new(10, 1, 2, 1),
                Ipv4Addr::new(10, 1, 3, 4),
            ]
        );
    }

    #[test]
    fn test_station_to_server_path_crosses_access_point() {
        let net = network();
        let station = net.station(2).unwrap();

        let path = net.path(net.stream_server(), station).unwrap();

        assert_eq!(path.hops, 2);
        assert_eq!(path.data_rate_bps, 5_000_000);
        assert_eq!(path.delay, SimTime::from_millis(3));
        assert!((path.loss_rate - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_same_segment_path_is_single_hop() {
        let net = network();

        let path = net.path(net.station(0).unwrap(), net.station(1).unwrap()).unwrap();

        assert_eq!(path.hops, 1);
        assert_eq!(path.data_rate_bps, 200_000_000);
    }

    #[test]
    fn test_missing_station_is_configuration_error() {
        let net = network();

        assert!(matches!(
            net.station(7),
            Err(SimError::Configuration { .. })
        ));
        assert!(net.path(net.access_point(), net.access_point()).is_err());
    }

    #[test]
    fn test_losses_compose_independently() {
        let lossy = LinkProfile {
            data_rate_bps: 1_000,
            delay: SimTime::from_millis(1),
            loss_rate: 0.5,
        };

        let path = PathProfile::single(&lossy).then(&lossy);

        assert!((path.loss_rate - 0.75).abs() < 1e-12);
        assert_eq!(path.delay, SimTime::from_millis(2));
    }
}
