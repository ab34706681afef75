//! Per-aircraft alert throttling.
//!
//! Two gates: a cooldown between alerts for the same aircraft
//! (`min_interval_sec`) and a per-hour hard cap (`max_alerts_per_hour`).
//! Critical alerts (emergency squawks) skip the cooldown but still count
//! against the cap. The clock is passed in, so tests control time.

use std::collections::HashMap;

use skymesh_core::types::Icao;
use skymesh_core::watchlist::Priority;

/// Throttle knobs.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum seconds between alerts per aircraft.
    pub min_interval_sec: f64,
    /// Hard cap on alerts per aircraft per rolling hour.
    pub max_alerts_per_hour: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            min_interval_sec: 300.0,
            max_alerts_per_hour: 10,
        }
    }
}

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Send,
    /// Inside the cooldown window.
    Cooldown,
    /// Hourly cap reached.
    CapExceeded,
}

#[derive(Debug, Default)]
struct AircraftThrottle {
    last_sent: Option<f64>,
    sent_times: Vec<f64>, // within the rolling hour
    suppressed: u64,
}

/// Tracks alert emission per aircraft.
#[derive(Debug, Default)]
pub struct AlertThrottle {
    config: ThrottleConfig,
    per_aircraft: HashMap<Icao, AircraftThrottle>,
    pub suppressed_total: u64,
}

impl AlertThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        AlertThrottle {
            config,
            per_aircraft: HashMap::new(),
            suppressed_total: 0,
        }
    }

    /// Decide whether an alert may go out now, and record the outcome.
    pub fn check(&mut self, icao: &Icao, priority: Priority, now: f64) -> ThrottleDecision {
        let entry = self.per_aircraft.entry(*icao).or_default();

        entry.sent_times.retain(|&t| now - t < 3600.0);

        if entry.sent_times.len() >= self.config.max_alerts_per_hour as usize {
            entry.suppressed += 1;
            self.suppressed_total += 1;
            return ThrottleDecision::CapExceeded;
        }

        let in_cooldown = entry
            .last_sent
            .is_some_and(|t| now - t < self.config.min_interval_sec);
        if in_cooldown && priority != Priority::Critical {
            entry.suppressed += 1;
            self.suppressed_total += 1;
            return ThrottleDecision::Cooldown;
        }

        entry.last_sent = Some(now);
        entry.sent_times.push(now);
        ThrottleDecision::Send
    }

    /// Alerts suppressed for one aircraft.
    pub fn suppressed(&self, icao: &Icao) -> u64 {
        self.per_aircraft.get(icao).map(|e| e.suppressed).unwrap_or(0)
    }

    /// Drop state for aircraft idle longer than an hour.
    pub fn prune(&mut self, now: f64) {
        self.per_aircraft
            .retain(|_, e| e.last_sent.is_some_and(|t| now - t < 3600.0));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
