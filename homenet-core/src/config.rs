//! Centralized configuration for a home-network run.
//!
//! All tunable parameters are defined here so the scenario driver, the
//! endpoints and the CLI share one source of defaults. Everything is fixed
//! before `run()` is called.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::SimError;
use crate::control::{ControlMessage, ControlStep};
use crate::engine::SimTime;

/// Top-level configuration, grouped by concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomeNetworkConfig {
    pub run: RunConfig,
    pub topology: TopologyConfig,
    pub sampler: SamplerConfig,
    pub streaming: StreamingConfig,
    pub web: WebConfig,
}

/// Run-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Total simulated duration
    pub simulation_time: SimTime,
    /// Seed for every stochastic decision
    pub seed: u64,
    /// Optional JSON-lines trace output
    pub trace_file: Option<PathBuf>,
    /// Log per-packet signals in addition to milestones
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            simulation_time: SimTime::from_secs(300),
            seed: 1,
            trace_file: None,
            verbose: false,
        }
    }
}

/// Capacity, propagation delay and loss of one network segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkProfile {
    /// Bits per second
    pub data_rate_bps: u64,
    /// One-way propagation delay
    pub delay: SimTime,
    /// Independent per-packet loss probability (0.0 to 1.0)
    pub loss_rate: f64,
}

impl LinkProfile {
    /// Wired point-to-point backbone: 5 Mbit/s, 2 ms.
    pub fn backbone() -> Self {
        Self {
            data_rate_bps: 5_000_000,
            delay: SimTime::from_millis(2),
            loss_rate: 0.0,
        }
    }

    /// Coarse stand-in for an 802.11ac cell.
    pub fn wifi() -> Self {
        Self {
            data_rate_bps: 200_000_000,
            delay: SimTime::from_millis(1),
            loss_rate: 0.01,
        }
    }

    fn validate(&self, name: &str) -> Result<(), SimError> {
        if self.data_rate_bps == 0 {
            return Err(SimError::Configuration {
                reason: format!("{name} link data rate must be positive"),
            });
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(SimError::Configuration {
                reason: format!("{name} link loss rate {} outside [0, 1]", self.loss_rate),
            });
        }
        Ok(())
    }
}

/// Shape of the home network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Number of WiFi stations; the scenario needs at least three
    pub n_wifi: u32,
    /// Profile of both wired backbone segments
    pub backbone: LinkProfile,
    /// Profile of the WiFi cell
    pub wifi: LinkProfile,
    /// Resend delay for a lost packet on reliable (connection-oriented) paths
    pub retransmission_timeout: SimTime,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            n_wifi: 3,
            backbone: LinkProfile::backbone(),
            wifi: LinkProfile::wifi(),
            retransmission_timeout: SimTime::from_millis(200),
        }
    }
}

/// Periodic throughput sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Time of the first sample
    pub start: SimTime,
    /// Fixed distance between samples
    pub interval: SimTime,
    /// No sample is scheduled past this time
    pub horizon: SimTime,
    /// Multiplier from counter units per second to reported units
    pub unit_scale: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            start: SimTime::ZERO,
            interval: SimTime::from_millis(100),
            horizon: SimTime::from_secs(21),
            unit_scale: 8e-6, // bytes/s -> Mbit/s
        }
    }
}

/// Adaptive streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub server_start: SimTime,
    pub server_stop: SimTime,
    pub client_start: SimTime,
    pub client_stop: SimTime,
    pub server_port: u16,
    pub client_port: u16,
    /// Control messages sent by the client, at absolute times
    pub control_plan: Vec<ControlStep>,
    /// Adapt frame sizes to reported congestion
    pub use_congestion_threshold: bool,
    /// Congestion level above which the server degrades quality
    pub congestion_threshold: f64,
    /// EWMA weight given to each new loss report
    pub congestion_smoothing: f64,
    /// Lowest quality factor the server degrades to
    pub min_quality: f64,
    /// Multiplicative quality step on each adaptation
    pub quality_step: f64,
    /// Time between frames while playing
    pub frame_interval: SimTime,
    /// Frame sizes in bytes, cycled
    pub frame_sizes: Vec<u32>,
    /// Largest datagram payload
    pub max_payload: u32,
    /// Time between loss reports from client to server
    pub feedback_interval: SimTime,
    /// Size of a control or feedback message
    pub control_message_size: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            server_start: SimTime::from_secs(5),
            server_stop: SimTime::from_secs(30),
            client_start: SimTime::from_secs(5),
            client_stop: SimTime::from_secs(30),
            server_port: 554,
            client_port: 9000,
            control_plan: vec![
                ControlStep::new(SimTime::from_secs(5), ControlMessage::Setup),
                ControlStep::new(SimTime::from_secs(6), ControlMessage::Play),
                ControlStep::new(SimTime::from_secs(10), ControlMessage::Pause),
                ControlStep::new(SimTime::from_secs(13), ControlMessage::Play),
            ],
            use_congestion_threshold: true,
            congestion_threshold: 0.05,
            congestion_smoothing: 0.3,
            min_quality: 0.25,
            quality_step: 0.8,
            frame_interval: SimTime::from_millis(40),
            // One 8-frame group: a key frame followed by smaller deltas
            frame_sizes: vec![24_000, 6_000, 6_000, 6_000, 12_000, 6_000, 6_000, 6_000],
            max_payload: 1_400,
            feedback_interval: SimTime::from_secs(1),
            control_message_size: 200,
        }
    }
}

/// One browsing client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebClientConfig {
    pub start: SimTime,
    pub stop: SimTime,
    /// Size of each HTTP request in bytes
    pub request_size: u32,
}

/// Object size and timing distributions of browsing sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebObjectConfig {
    pub main_object_size_mean: f64,
    pub main_object_size_std_dev: f64,
    pub main_object_size_min: u32,
    pub main_object_size_max: u32,
    pub embedded_object_size_mean: f64,
    pub embedded_object_size_std_dev: f64,
    pub embedded_object_size_min: u32,
    pub embedded_object_size_max: u32,
    /// Embedded objects per page are drawn uniformly from `0..=max`
    pub max_embedded_objects: u32,
    /// Mean of the exponential reading time between pages
    pub reading_time_mean: SimTime,
    /// Delay between main object arrival and the first embedded request
    pub parsing_time: SimTime,
    /// Segment payload size for object transfer
    pub mtu: u32,
}

impl Default for WebObjectConfig {
    fn default() -> Self {
        Self {
            main_object_size_mean: 102_400.0,
            main_object_size_std_dev: 40_960.0,
            main_object_size_min: 100,
            main_object_size_max: 2_000_000,
            embedded_object_size_mean: 7_758.0,
            embedded_object_size_std_dev: 3_000.0,
            embedded_object_size_min: 50,
            embedded_object_size_max: 2_000_000,
            max_embedded_objects: 5,
            reading_time_mean: SimTime::from_secs(30),
            parsing_time: SimTime::from_millis(130),
            mtu: 536,
        }
    }
}

/// Web browsing traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebConfig {
    pub server_start: SimTime,
    pub server_stop: SimTime,
    pub server_port: u16,
    pub clients: Vec<WebClientConfig>,
    pub objects: WebObjectConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            server_start: SimTime::ZERO,
            server_stop: SimTime::from_secs(300),
            server_port: 80,
            clients: vec![
                WebClientConfig {
                    start: SimTime::from_secs(1),
                    stop: SimTime::from_secs(300),
                    request_size: 402,
                },
                WebClientConfig {
                    start: SimTime::from_secs(3),
                    stop: SimTime::from_secs(300),
                    request_size: 500,
                },
            ],
            objects: WebObjectConfig::default(),
        }
    }
}

impl HomeNetworkConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored with a warning so a typo never
    /// silently changes the experiment into something else.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<f64>("HOMENET_SIMULATION_TIME") {
            match SimTime::try_from_secs_f64(secs) {
                Ok(time) => config.run.simulation_time = time,
                Err(e) => tracing::warn!(error = %e, "ignoring HOMENET_SIMULATION_TIME"),
            }
        }

        if let Some(seed) = env_parse::<u64>("HOMENET_SEED") {
            config.run.seed = seed;
        }

        if let Some(n_wifi) = env_parse::<u32>("HOMENET_N_WIFI") {
            config.topology.n_wifi = n_wifi;
        }

        if let Ok(path) = std::env::var("HOMENET_TRACE_FILE") {
            if !path.is_empty() {
                config.run.trace_file = Some(PathBuf::from(path));
            }
        }

        config
    }

    /// Checks cross-field constraints before a run.
    ///
    /// # Errors
    ///
    /// - `SimError::Configuration` - First violated constraint
    pub fn validate(&self) -> Result<(), SimError> {
        if self.run.simulation_time.is_zero() {
            return Err(configuration("simulation time must be positive"));
        }
        if self.topology.n_wifi < 3 {
            return Err(configuration(format!(
                "need at least 3 WiFi stations (two web clients and one streaming client), got {}",
                self.topology.n_wifi
            )));
        }
        if self.topology.n_wifi > 250 {
            return Err(configuration("WiFi subnet holds at most 250 stations"));
        }
        self.topology.backbone.validate("backbone")?;
        self.topology.wifi.validate("wifi")?;

        if self.sampler.interval.is_zero() {
            return Err(configuration("sampler interval must be positive"));
        }

        let streaming = &self.streaming;
        if streaming.frame_interval.is_zero() || streaming.feedback_interval.is_zero() {
            return Err(configuration("streaming intervals must be positive"));
        }
        if streaming.frame_sizes.is_empty() || streaming.frame_sizes.contains(&0) {
            return Err(configuration("streaming frame sizes must be non-empty and positive"));
        }
        if streaming.max_payload == 0 {
            return Err(configuration("streaming payload size must be positive"));
        }
        if !(0.0..=1.0).contains(&streaming.congestion_smoothing)
            || !(0.0..=1.0).contains(&streaming.min_quality)
            || !(0.0..1.0).contains(&streaming.quality_step)
        {
            return Err(configuration("streaming adaptation factors must lie in [0, 1]"));
        }
        if streaming.server_start > streaming.server_stop
            || streaming.client_start > streaming.client_stop
        {
            return Err(configuration("streaming start must not follow stop"));
        }

        let objects = &self.web.objects;
        if objects.mtu == 0 {
            return Err(configuration("web segment size must be positive"));
        }
        // An empty object has no segments, so the client would wait forever
        if objects.main_object_size_min == 0 || objects.embedded_object_size_min == 0 {
            return Err(configuration("web object size minimum must be at least one byte"));
        }
        if objects.main_object_size_min > objects.main_object_size_max
            || objects.embedded_object_size_min > objects.embedded_object_size_max
        {
            return Err(configuration("web object size bounds are inverted"));
        }
        if objects.main_object_size_std_dev < 0.0 || objects.embedded_object_size_std_dev < 0.0 {
            return Err(configuration("web object size deviation must not be negative"));
        }
        if self.web.server_start > self.web.server_stop {
            return Err(configuration("web server start must not follow stop"));
        }
        for (index, client) in self.web.clients.iter().enumerate() {
            if client.start > client.stop {
                return Err(configuration(format!(
                    "web client {index} start must not follow stop"
                )));
            }
            if client.request_size == 0 {
                return Err(configuration(format!(
                    "web client {index} request size must be positive"
                )));
            }
        }
        if self.web.clients.len() + 1 > self.topology.n_wifi as usize {
            return Err(configuration(format!(
                "{} web clients and a streaming client need more than {} stations",
                self.web.clients.len(),
                self.topology.n_wifi
            )));
        }

        Ok(())
    }
}

fn configuration(reason: impl Into<String>) -> SimError {
    SimError::Configuration {
        reason: reason.into(),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable override");
            None
        }
    }
}
