//! Homenet Simulation - The home network and the traffic running over it.
//!
//! This crate builds on `homenet-core` to model a small home network: a
//! WiFi access point bridging two wired backbone segments, an HTTP server,
//! a streaming server and a handful of stations.
//!
//! # Features
//!
//! - **Topology**: Addressed segments and per-path link profiles
//! - **Link channels**: Serialization, propagation delay, seeded loss and
//!   retransmission for reliable flows
//! - **Streaming**: Session-controlled media stream with loss feedback and
//!   congestion-driven quality adaptation
//! - **Web browsing**: Page loads with random object sizes, embedded
//!   objects and reading pauses
//! - **Scenario**: The reference experiment wired end to end
//!
//! # Example
//!
//! ```rust,no_run
//! use homenet_core::HomeNetworkConfig;
//! use homenet_sim::HomeNetworkScenario;
//!
//! # fn main() -> Result<(), homenet_core::SimError> {
//! let scenario = HomeNetworkScenario::build(HomeNetworkConfig::default())?;
//! let report = scenario.run()?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::missing_errors_doc)]

pub mod endpoint;
pub mod link;
pub mod scenario;
pub mod streaming;
pub mod topology;
pub mod web;

pub use endpoint::Application;
pub use link::{ChannelStats, Delivery, PathChannel};
pub use scenario::{HomeNetworkScenario, ScenarioReport, ThroughputSample, TransitionRecord};
pub use streaming::{StreamClient, StreamServer};
pub use topology::{HomeNetwork, NodeId, NodeRole, PathProfile, SegmentKind};
pub use web::{BrowsingPhase, WebClient, WebServer, WebVariables};
