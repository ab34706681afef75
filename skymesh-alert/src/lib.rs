//! skymesh-alert: format, throttle, encrypt and deliver watchlist alerts.
//!
//! Consumes [`skymesh_core::AlertEvent`]s from a bounded channel and
//! pushes them to a LoRa mesh radio over a framed serial byte channel
//! and/or an MQTT broker bridge, with per-interface retry, health
//! tracking and failover.

use thiserror::Error;

pub mod crypto;
pub mod dispatch;
pub mod format;
pub mod iface;
pub mod mqtt;
pub mod outbound;
pub mod position;
pub mod route;
pub mod serial;
pub mod throttle;

pub use dispatch::{DispatchView, Dispatcher, DispatcherConfig};
pub use format::MessageTemplate;
pub use iface::{IfaceState, Interface};
pub use outbound::{OutboundMessage, RetryPolicy};
pub use position::CoordinateFormat;
pub use route::{Router, RoutingPolicy};
pub use throttle::{AlertThrottle, ThrottleConfig, ThrottleDecision};

/// All errors produced by skymesh-alert.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("invalid channel key: {0}")]
    InvalidKey(String),
    #[error("message too long: {got} bytes (max {max})")]
    TooLong { got: usize, max: usize },
    #[error("interface {name} is degraded")]
    Degraded { name: String },
    #[error("delivery failed on {name}: {reason}")]
    Delivery { name: String, reason: String },
    #[error("no healthy interface")]
    NoHealthyInterface,
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AlertError>;
