//! Payloads carried by trace signals.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::control::{ControlMessage, SessionState};
use crate::engine::SimTime;

/// Kind of web object carried by an object signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Main,
    Embedded,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Main => write!(f, "main object"),
            ObjectKind::Embedded => write!(f, "embedded object"),
        }
    }
}

/// Signal-specific measurement or state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceValue {
    /// Delta-based rate from a periodic sampler
    Rate { value: f64 },
    /// Byte count
    Bytes { bytes: u64 },
    /// Fraction in [0, 1]
    Fraction { fraction: f64 },
    /// Unitless level, e.g. congestion
    Level { level: f64 },
    /// Packet sent or received
    Packet {
        size: u32,
        peer: Option<SocketAddr>,
    },
    /// Transport connection established
    Connection {
        client: SocketAddr,
        server: SocketAddr,
    },
    /// Web object generated by a server or completed at a client
    Object {
        object: ObjectKind,
        size: u32,
        intact: bool,
    },
    /// Accepted control transition
    Control {
        endpoint: String,
        message: ControlMessage,
        from: SessionState,
        to: SessionState,
    },
    /// Control message refused in the endpoint's current state
    ControlRejected {
        endpoint: String,
        message: ControlMessage,
        state: SessionState,
    },
}

impl fmt::Display for TraceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceValue::Rate { value } => write!(f, "{value:.6}"),
            TraceValue::Bytes { bytes } => write!(f, "{bytes} bytes"),
            TraceValue::Fraction { fraction } => write!(f, "{:.2}%", fraction * 100.0),
            TraceValue::Level { level } => write!(f, "{level:.4}"),
            TraceValue::Packet {
                size,
                peer: Some(peer),
            } => write!(f, "packet of {size} bytes, peer {peer}"),
            TraceValue::Packet { size, peer: None } => write!(f, "packet of {size} bytes"),
            TraceValue::Connection { client, server } => {
                write!(f, "connection {client} -> {server} established")
            }
            TraceValue::Object {
                object,
                size,
                intact: true,
            } => write!(f, "{object} of {size} bytes"),
            TraceValue::Object {
                object,
                intact: false,
                ..
            } => write!(f, "failed to parse a {object}"),
            TraceValue::Control {
                endpoint,
                message,
                from,
                to,
            } => write!(f, "{endpoint}: {message:?} {from:?} -> {to:?}"),
            TraceValue::ControlRejected {
                endpoint,
                message,
                state,
            } => write!(f, "{endpoint}: {message:?} rejected in {state:?}"),
        }
    }
}

/// One fired signal, stamped with the simulated instant it was fired at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    #[serde(rename = "time_ns")]
    pub time: SimTime,
    pub signal: String,
    pub value: TraceValue,
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.time, self.signal, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_log_lines() {
        let loss = TraceValue::Fraction { fraction: 0.025 };
        let object = TraceValue::Object {
            object: ObjectKind::Main,
            size: 102400,
            intact: true,
        };
        let broken = TraceValue::Object {
            object: ObjectKind::Embedded,
            size: 10,
            intact: false,
        };

        assert_eq!(loss.to_string(), "2.50%");
        assert_eq!(object.to_string(), "main object of 102400 bytes");
        assert_eq!(broken.to_string(), "failed to parse a embedded object");
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let record = TraceRecord {
            time: SimTime::from_millis(100),
            signal: "stream.client.throughput".to_string(),
            value: TraceValue::Rate { value: 1.5 },
        };

        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["time_ns"], 100_000_000);
        assert_eq!(json["value"]["kind"], "rate");
        assert_eq!(json["value"]["value"], 1.5);
    }
}
