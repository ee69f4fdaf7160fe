//! The home network experiment: topology, both traffic patterns, the
//! streaming control plan and throughput sampling, wired onto one simulator.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::rc::Rc;

use homenet_core::config::HomeNetworkConfig;
use homenet_core::control::{self, ControlMessage, SessionState};
use homenet_core::engine::{RunReport, SimTime, Simulator};
use homenet_core::sampler::{PeriodicSampler, SamplerHandle};
use homenet_core::trace::{JsonLinesSink, LogSink, TraceRecord, TraceSink, TraceValue, signals};
use homenet_core::SimError;

use crate::endpoint;
use crate::link::{Delivery, PathChannel};
use crate::streaming::{StreamClient, StreamServer};
use crate::topology::{HomeNetwork, NodeId};
use crate::web::{WebClient, WebServer};

pub const STREAM_CLIENT: &str = "stream-client";
pub const STREAM_SERVER: &str = "stream-server";
pub const WEB_SERVER: &str = "web-server";

/// First ephemeral port handed to web clients.
const WEB_CLIENT_BASE_PORT: u16 = 49153;

/// One sampled throughput value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSample {
    pub time: SimTime,
    pub mbps: f64,
}

/// One accepted control transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub time: SimTime,
    pub endpoint: String,
    pub message: ControlMessage,
    pub from: SessionState,
    pub to: SessionState,
}

/// Sink keeping the measurements a report is built from.
#[derive(Debug, Default)]
struct Collector {
    throughput: RefCell<Vec<ThroughputSample>>,
    transitions: RefCell<Vec<TransitionRecord>>,
    loss_reports: RefCell<Vec<(SimTime, f64)>>,
    congestion_levels: RefCell<Vec<(SimTime, f64)>>,
}

impl Collector {
    const SIGNALS: &'static [&'static str] = &[
        signals::STREAM_THROUGHPUT,
        signals::CONTROL_TRANSITION,
        signals::STREAM_FRACTION_LOSS,
        signals::STREAM_CONGESTION_LEVEL,
    ];
}

impl TraceSink for Collector {
    fn record(&self, record: &TraceRecord) {
        match &record.value {
            TraceValue::Rate { value } if record.signal == signals::STREAM_THROUGHPUT => {
                self.throughput.borrow_mut().push(ThroughputSample {
                    time: record.time,
                    mbps: *value,
                });
            }
            TraceValue::Control {
                endpoint,
                message,
                from,
                to,
            } => self.transitions.borrow_mut().push(TransitionRecord {
                time: record.time,
                endpoint: endpoint.clone(),
                message: *message,
                from: *from,
                to: *to,
            }),
            TraceValue::Fraction { fraction } => {
                self.loss_reports.borrow_mut().push((record.time, *fraction));
            }
            TraceValue::Level { level } => {
                self.congestion_levels.borrow_mut().push((record.time, *level));
            }
            _ => {}
        }
    }
}

/// Outcome of one scenario run.
#[derive(Debug)]
pub struct ScenarioReport {
    pub run: RunReport,
    pub throughput: Vec<ThroughputSample>,
    pub transitions: Vec<TransitionRecord>,
    pub loss_reports: Vec<(SimTime, f64)>,
    pub congestion_levels: Vec<(SimTime, f64)>,
    /// Pages completed, per web client
    pub web_pages_completed: Vec<u64>,
    pub web_bytes_received: u64,
    pub stream_bytes_received: u64,
    pub stream_quality: f64,
    /// Signals that had subscribers but never fired
    pub dormant_signals: Vec<String>,
}

impl ScenarioReport {
    /// Transitions accepted by the streaming client, in firing order.
    pub fn client_transitions(&self) -> Vec<&TransitionRecord> {
        self.transitions
            .iter()
            .filter(|t| t.endpoint == STREAM_CLIENT)
            .collect()
    }

    /// Mean sampled throughput in Mbit/s over all samples.
    pub fn mean_throughput(&self) -> f64 {
        if self.throughput.is_empty() {
            return 0.0;
        }
        self.throughput.iter().map(|s| s.mbps).sum::<f64>() / self.throughput.len() as f64
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let mut out = self.run.summary();
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "streaming: {} bytes received, {} samples, mean {:.3} Mbit/s, quality {:.2}",
            self.stream_bytes_received,
            self.throughput.len(),
            self.mean_throughput(),
            self.stream_quality
        );
        for transition in self.client_transitions() {
            let _ = writeln!(
                out,
                "  {} {:?}: {:?} -> {:?}",
                transition.time, transition.message, transition.from, transition.to
            );
        }
        let _ = write!(
            out,
            "web: {} bytes received, pages per client {:?}",
            self.web_bytes_received, self.web_pages_completed
        );
        out
    }
}

/// The assembled experiment, ready to run.
pub struct HomeNetworkScenario {
    config: HomeNetworkConfig,
    sim: Simulator,
    network: HomeNetwork,
    stream_client: Rc<RefCell<StreamClient>>,
    stream_server: Rc<RefCell<StreamServer>>,
    web_server: Rc<RefCell<WebServer>>,
    web_clients: Vec<Rc<RefCell<WebClient>>>,
    collector: Rc<Collector>,
    sampler: SamplerHandle,
}

impl HomeNetworkScenario {
    /// Builds the network, endpoints, sinks and the initial schedule.
    ///
    /// Servers are scheduled before clients, and application lifetimes
    /// before the control plan, so work due at the same instant runs in
    /// that order.
    ///
    /// # Errors
    ///
    /// - `SimError::Configuration` - If the configuration is invalid
    /// - `SimError::Io` - If the trace file cannot be created
    pub fn build(config: HomeNetworkConfig) -> Result<Self, SimError> {
        config.validate()?;
        let mut sim = Simulator::new(config.run.seed);
        let network = HomeNetwork::build(&config.topology)?;

        let log_signals = if config.run.verbose {
            signals::ALL
        } else {
            signals::MILESTONES
        };
        sim.hub().attach_sink(Rc::new(LogSink), log_signals);
        if let Some(path) = &config.run.trace_file {
            let sink = JsonLinesSink::create(path)?;
            sim.hub().attach_sink(Rc::new(sink), signals::ALL);
            tracing::info!(path = %path.display(), "writing trace records");
        }
        let collector = Rc::new(Collector::default());
        sim.hub().attach_sink(collector.clone(), Collector::SIGNALS);

        let reliable = Delivery::Reliable {
            retransmission_timeout: config.topology.retransmission_timeout,
        };
        let channel = |from: NodeId, to: NodeId, delivery: Delivery| {
            network
                .path(from, to)
                .map(|profile| PathChannel::new(profile, delivery))
        };

        // Streaming
        let streaming = &config.streaming;
        let stream_station = network.station(config.web.clients.len())?;
        let stream_server_address = socket(&network, network.stream_server(), streaming.server_port);
        let stream_client_address = socket(&network, stream_station, streaming.client_port);

        let stream_server = StreamServer::new(STREAM_SERVER, stream_server_address, streaming);
        let stream_client = StreamClient::new(
            STREAM_CLIENT,
            stream_client_address,
            stream_server_address,
            channel(stream_station, network.stream_server(), reliable)?,
            channel(stream_station, network.stream_server(), Delivery::Datagram)?,
            streaming,
        );
        stream_client.borrow_mut().connect(&stream_server);
        stream_server.borrow_mut().attach_client(
            &stream_client,
            channel(network.stream_server(), stream_station, Delivery::Datagram)?,
        );

        // Web
        let web = &config.web;
        let web_server_address = socket(&network, network.http_server(), web.server_port);
        let web_server = WebServer::new(WEB_SERVER, web_server_address, &web.objects)?;
        let mut web_clients = Vec::with_capacity(web.clients.len());
        for (index, client_config) in web.clients.iter().enumerate() {
            let station = network.station(index)?;
            let port = WEB_CLIENT_BASE_PORT + index as u16;
            let client = WebClient::new(
                &format!("web-client-{index}"),
                socket(&network, station, port),
                web_server_address,
                channel(station, network.http_server(), reliable)?,
                client_config,
                &web.objects,
            )?;
            client.borrow_mut().connect(&web_server);
            web_server
                .borrow_mut()
                .register_client(&client, channel(network.http_server(), station, reliable)?);
            web_clients.push(client);
        }

        endpoint::schedule_lifetime(&mut sim, &web_server, web.server_start, web.server_stop)?;
        endpoint::schedule_lifetime(
            &mut sim,
            &stream_server,
            streaming.server_start,
            streaming.server_stop,
        )?;
        for (client, client_config) in web_clients.iter().zip(&web.clients) {
            endpoint::schedule_lifetime(&mut sim, client, client_config.start, client_config.stop)?;
        }
        endpoint::schedule_lifetime(
            &mut sim,
            &stream_client,
            streaming.client_start,
            streaming.client_stop,
        )?;

        control::schedule_plan(&mut sim, &stream_client, &streaming.control_plan)?;

        let counter = Rc::clone(&stream_client);
        let sampler = PeriodicSampler::new(
            signals::STREAM_THROUGHPUT,
            move || counter.borrow().bytes_received(),
            &config.sampler,
        )?
        .start(&mut sim)?;

        tracing::info!(
            seed = config.run.seed,
            stations = config.topology.n_wifi,
            web_clients = web_clients.len(),
            duration = %config.run.simulation_time,
            "home network scenario built"
        );

        Ok(Self {
            config,
            sim,
            network,
            stream_client,
            stream_server,
            web_server,
            web_clients,
            collector,
            sampler,
        })
    }

    pub fn config(&self) -> &HomeNetworkConfig {
        &self.config
    }

    pub fn network(&self) -> &HomeNetwork {
        &self.network
    }

    /// The underlying simulator, for extra subscriptions or events before `run`.
    pub fn simulator(&mut self) -> &mut Simulator {
        &mut self.sim
    }

    pub fn sampler(&self) -> &SamplerHandle {
        &self.sampler
    }

    /// Runs to the configured simulation time.
    ///
    /// # Errors
    ///
    /// - `SimError::ActionFault` - If any endpoint action failed; trace
    ///   sinks have been flushed
    pub fn run(mut self) -> Result<ScenarioReport, SimError> {
        let run = self.sim.run(Some(self.config.run.simulation_time))?;

        let dormant_signals = self.sim.hub().dormant_signals();
        if !dormant_signals.is_empty() {
            tracing::debug!(signals = ?dormant_signals, "subscribed signals never fired");
        }

        let web_pages_completed = self
            .web_clients
            .iter()
            .map(|client| client.borrow().pages_completed())
            .collect();
        let web_bytes_received = self
            .web_clients
            .iter()
            .map(|client| client.borrow().bytes_received())
            .sum();

        tracing::info!(
            served = self.web_server.borrow().objects_served(),
            sent = self.stream_server.borrow().bytes_sent(),
            "scenario finished"
        );

        Ok(ScenarioReport {
            run,
            throughput: self.collector.throughput.take(),
            transitions: self.collector.transitions.take(),
            loss_reports: self.collector.loss_reports.take(),
            congestion_levels: self.collector.congestion_levels.take(),
            web_pages_completed,
            web_bytes_received,
            stream_bytes_received: self.stream_client.borrow().bytes_received(),
            stream_quality: self.stream_server.borrow().quality(),
            dormant_signals,
        })
    }
}

fn socket(network: &HomeNetwork, node: NodeId, port: u16) -> SocketAddr {
    SocketAddr::from((network.address(node), port))
}
