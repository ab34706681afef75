//! Routing policies across outbound interfaces.
//!
//! - `primary`: try interfaces in order, first success wins.
//! - `all`: deliver to every healthy interface.
//! - `fallback`: prefer the first interface, but once it has failed,
//!   route to the second until the first has been healthy again for
//!   `failover_timeout` seconds (hysteresis, so a flapping primary does
//!   not bounce traffic).

use serde::Deserialize;
use tracing::debug;

use crate::iface::{IfaceState, Interface};
use crate::outbound::OutboundMessage;
use crate::{AlertError, Result};

/// Routing policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    #[default]
    Primary,
    All,
    Fallback,
}

/// Outcome of one routed send.
#[derive(Debug, Clone, Default)]
pub struct RouteOutcome {
    pub delivered_on: Vec<String>,
    pub failed_on: Vec<String>,
}

impl RouteOutcome {
    pub fn delivered(&self) -> bool {
        !self.delivered_on.is_empty()
    }
}

/// Owns the interfaces and applies the routing policy.
pub struct Router {
    interfaces: Vec<Interface>,
    policy: RoutingPolicy,
    failover_timeout: f64,
    health_check_interval: f64,
}

impl Router {
    pub fn new(
        interfaces: Vec<Interface>,
        policy: RoutingPolicy,
        failover_timeout: f64,
        health_check_interval: f64,
    ) -> Self {
        Router {
            interfaces,
            policy,
            failover_timeout,
            health_check_interval,
        }
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// All interfaces degraded: alerts will queue until one recovers.
    pub fn all_degraded(&self) -> bool {
        !self.interfaces.is_empty()
            && self
                .interfaces
                .iter()
                .all(|i| i.state() == IfaceState::Degraded)
    }

    /// Send one message per the configured policy. `Ok` when at least one
    /// interface accepted it.
    pub async fn send(&mut self, msg: &OutboundMessage, now: f64) -> Result<RouteOutcome> {
        if self.interfaces.is_empty() {
            return Err(AlertError::NoHealthyInterface);
        }

        let order: Vec<usize> = match self.policy {
            RoutingPolicy::Primary => (0..self.interfaces.len()).collect(),
            RoutingPolicy::All => (0..self.interfaces.len()).collect(),
            RoutingPolicy::Fallback => {
                let primary_ok =
                    self.interfaces[0].usable_as_primary(now, self.failover_timeout);
                if primary_ok || self.interfaces.len() == 1 {
                    (0..self.interfaces.len()).collect()
                } else {
                    debug!(iface = %self.interfaces[0].name, "failover: skipping primary");
                    let mut order: Vec<usize> = (1..self.interfaces.len()).collect();
                    order.push(0);
                    order
                }
            }
        };

        let mut outcome = RouteOutcome::default();
        for idx in order {
            let iface = &mut self.interfaces[idx];
            match iface.deliver(msg, now).await {
                Ok(()) => {
                    outcome.delivered_on.push(iface.name.clone());
                    if self.policy != RoutingPolicy::All {
                        break;
                    }
                }
                Err(_) => {
                    outcome.failed_on.push(iface.name.clone());
                }
            }
        }

        if outcome.delivered() {
            Ok(outcome)
        } else {
            Err(AlertError::NoHealthyInterface)
        }
    }

    /// Probe interfaces that are due for a health check.
    pub async fn health_check(&mut self, now: f64) {
        for iface in &mut self.interfaces {
            if iface.due_for_probe(now, self.health_check_interval) {
                iface.health_check(now).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
