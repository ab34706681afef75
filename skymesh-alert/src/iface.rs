//! Outbound interface wrapper: health state machine over a transport.
//!
//! Transports are a closed enum (serial, MQTT) rather than trait objects;
//! adding a transport is a variant addition. The state machine:
//!
//! ```text
//!  DISCONNECTED ──connect ok──► CONNECTED ──send ok──► CONNECTED
//!       ▲                         │   │
//!       │                         │   └─send fail──► DEGRADED
//!       │                         ▼
//!       └──retries exhausted── DEGRADED ──health probe ok──► CONNECTED
//! ```
//!
//! A DEGRADED interface fails sends fast; the periodic health probe is
//! what brings it back.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::mqtt::MqttTransport;
use crate::outbound::OutboundMessage;
use crate::serial::SerialTransport;
use crate::{AlertError, Result};

/// Interface health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IfaceState {
    Disconnected,
    Connected,
    Degraded,
}

/// The transport variants an interface can sit on.
pub enum Transport {
    Serial(SerialTransport),
    Mqtt(MqttTransport),
    #[cfg(test)]
    Mock(crate::route::testing::MockTransport),
}

impl Transport {
    async fn connect(&mut self) -> Result<()> {
        match self {
            Transport::Serial(t) => t.connect().await,
            Transport::Mqtt(t) => t.connect().await,
            #[cfg(test)]
            Transport::Mock(t) => t.connect(),
        }
    }

    async fn send(&mut self, msg: &OutboundMessage) -> Result<()> {
        match self {
            Transport::Serial(t) => t.send(msg).await,
            Transport::Mqtt(t) => t.send(msg).await,
            #[cfg(test)]
            Transport::Mock(t) => t.send(msg),
        }
    }

    async fn probe(&mut self) -> bool {
        match self {
            Transport::Serial(t) => t.probe().await,
            Transport::Mqtt(t) => t.probe().await,
            #[cfg(test)]
            Transport::Mock(t) => t.probe(),
        }
    }
}

/// Per-interface delivery counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IfaceStats {
    pub sent: u64,
    pub send_failures: u64,
    pub reconnects: u64,
}

/// One outbound interface: a named transport plus its health state.
pub struct Interface {
    pub name: String,
    transport: Transport,
    state: IfaceState,
    degraded_since: Option<f64>,
    recovered_at: Option<f64>,
    last_probe: f64,
    pub stats: IfaceStats,
}

impl Interface {
    pub fn new(name: &str, transport: Transport) -> Self {
        Interface {
            name: name.to_string(),
            transport,
            state: IfaceState::Disconnected,
            degraded_since: None,
            recovered_at: None,
            last_probe: f64::NEG_INFINITY,
            stats: IfaceStats::default(),
        }
    }

    pub fn state(&self) -> IfaceState {
        self.state
    }

    /// True when this interface should be preferred as a fallback-policy
    /// primary: not degraded, and if it recently recovered, healthy for
    /// at least `failover_timeout` seconds.
    pub fn usable_as_primary(&self, now: f64, failover_timeout: f64) -> bool {
        match self.state {
            IfaceState::Degraded => false,
            IfaceState::Connected => self
                .recovered_at
                .map_or(true, |t| now - t >= failover_timeout),
            IfaceState::Disconnected => true, // never tried yet
        }
    }

    /// Attempt delivery. Degraded interfaces fail fast; disconnected ones
    /// try to connect first.
    pub async fn deliver(&mut self, msg: &OutboundMessage, now: f64) -> Result<()> {
        match self.state {
            IfaceState::Degraded => {
                return Err(AlertError::Degraded {
                    name: self.name.clone(),
                })
            }
            IfaceState::Disconnected => {
                if let Err(e) = self.transport.connect().await {
                    self.mark_degraded(now);
                    return Err(e);
                }
                self.state = IfaceState::Connected;
                self.stats.reconnects += 1;
                info!(iface = %self.name, "connected");
            }
            IfaceState::Connected => {}
        }

        match self.transport.send(msg).await {
            Ok(()) => {
                self.stats.sent += 1;
                debug!(iface = %self.name, id = msg.id, "delivered");
                Ok(())
            }
            Err(e) => {
                self.stats.send_failures += 1;
                self.mark_degraded(now);
                warn!(iface = %self.name, id = msg.id, error = %e, "send failed");
                Err(e)
            }
        }
    }

    /// Probe a degraded or disconnected interface; on success it returns
    /// to CONNECTED (with the recovery time recorded for failover
    /// hysteresis).
    pub async fn health_check(&mut self, now: f64) {
        self.last_probe = now;
        match self.state {
            IfaceState::Connected => {
                if !self.transport.probe().await {
                    self.mark_degraded(now);
                    warn!(iface = %self.name, "health probe failed");
                }
            }
            IfaceState::Degraded | IfaceState::Disconnected => {
                let was_degraded = self.state == IfaceState::Degraded;
                let ok = match self.transport.connect().await {
                    Ok(()) => self.transport.probe().await,
                    Err(_) => false,
                };
                if ok {
                    self.state = IfaceState::Connected;
                    self.degraded_since = None;
                    if was_degraded {
                        self.recovered_at = Some(now);
                    }
                    info!(iface = %self.name, "recovered");
                }
            }
        }
    }

    pub fn due_for_probe(&self, now: f64, interval: f64) -> bool {
        now - self.last_probe >= interval
    }

    fn mark_degraded(&mut self, now: f64) {
        if self.state != IfaceState::Degraded {
            self.degraded_since = Some(now);
        }
        self.state = IfaceState::Degraded;
    }

    /// Seconds spent degraded, if currently degraded.
    pub fn degraded_for(&self, now: f64) -> Option<f64> {
        self.degraded_since.map(|t| now - t)
    }
}
