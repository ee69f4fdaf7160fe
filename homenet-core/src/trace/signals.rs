//! Signal names fired by the harness and the home-network endpoints.

/// Sampled streaming throughput in Mbit/s.
pub const STREAM_THROUGHPUT: &str = "stream.client.throughput";
/// Fraction of streaming packets lost in the last feedback interval.
pub const STREAM_FRACTION_LOSS: &str = "stream.client.fraction_loss";
/// Streaming packet received by the client.
pub const STREAM_CLIENT_RX: &str = "stream.client.rx";
/// Streaming packet sent by the server.
pub const STREAM_SERVER_TX: &str = "stream.server.tx";
/// Smoothed congestion level computed by the streaming server.
pub const STREAM_CONGESTION_LEVEL: &str = "stream.server.congestion_level";

/// Accepted control transition on any endpoint.
pub const CONTROL_TRANSITION: &str = "control.transition";
/// Control message refused by an endpoint.
pub const CONTROL_REJECTED: &str = "control.rejected";

pub const WEB_SERVER_CONNECTION_ESTABLISHED: &str = "web.server.connection_established";
pub const WEB_SERVER_MAIN_OBJECT: &str = "web.server.main_object";
pub const WEB_SERVER_EMBEDDED_OBJECT: &str = "web.server.embedded_object";
pub const WEB_SERVER_TX: &str = "web.server.tx";
pub const WEB_SERVER_RX: &str = "web.server.rx";
pub const WEB_CLIENT_TX: &str = "web.client.tx";
pub const WEB_CLIENT_RX: &str = "web.client.rx";
pub const WEB_CLIENT_RX_MAIN_OBJECT: &str = "web.client.rx_main_object";
pub const WEB_CLIENT_RX_EMBEDDED_OBJECT: &str = "web.client.rx_embedded_object";

/// Every signal the home-network scenario can fire.
pub const ALL: &[&str] = &[
    STREAM_THROUGHPUT,
    STREAM_FRACTION_LOSS,
    STREAM_CLIENT_RX,
    STREAM_SERVER_TX,
    STREAM_CONGESTION_LEVEL,
    CONTROL_TRANSITION,
    CONTROL_REJECTED,
    WEB_SERVER_CONNECTION_ESTABLISHED,
    WEB_SERVER_MAIN_OBJECT,
    WEB_SERVER_EMBEDDED_OBJECT,
    WEB_SERVER_TX,
    WEB_SERVER_RX,
    WEB_CLIENT_TX,
    WEB_CLIENT_RX,
    WEB_CLIENT_RX_MAIN_OBJECT,
    WEB_CLIENT_RX_EMBEDDED_OBJECT,
];

/// Signals logged by default: measurements, control and object milestones.
///
/// Per-packet signals are left out to keep console output readable.
pub const MILESTONES: &[&str] = &[
    STREAM_THROUGHPUT,
    STREAM_FRACTION_LOSS,
    STREAM_CONGESTION_LEVEL,
    CONTROL_TRANSITION,
    CONTROL_REJECTED,
    WEB_SERVER_CONNECTION_ESTABLISHED,
    WEB_SERVER_MAIN_OBJECT,
    WEB_SERVER_EMBEDDED_OBJECT,
    WEB_CLIENT_RX_MAIN_OBJECT,
    WEB_CLIENT_RX_EMBEDDED_OBJECT,
];
