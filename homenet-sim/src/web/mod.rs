//! Web browsing traffic between WiFi stations and the HTTP server.

mod client;
mod server;
mod variables;

pub use client::{BrowsingPhase, WebClient};
pub use server::WebServer;
pub use variables::WebVariables;

#[cfg(test)]
mod tests;
