//! Adaptive streaming session between a WiFi station and the streaming server.
//!
//! The client drives the session with control messages and reports loss
//! back every feedback interval. The server paces frames while playing and
//! scales frame sizes to the congestion it infers from those reports.

mod client;
mod server;

pub use client::StreamClient;
pub use server::StreamServer;
