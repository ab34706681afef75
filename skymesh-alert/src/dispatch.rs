//! The alert dispatcher: throttle, format, encrypt, route, retry.
//!
//! One task owns the whole outbound path, so per-aircraft cooldown
//! decisions are serialized — a burst of matches for the same aircraft
//! produces at most one outbound per cooldown window. Delivered alerts
//! are appended to a plain-text log file, the only durable artifact the
//! system keeps.

use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use skymesh_core::AlertEvent;

use crate::crypto::ChannelKey;
use crate::format::MessageTemplate;
use crate::outbound::{DeliveryTracker, OutboundQueue, RetryPolicy};
use crate::route::Router;
use crate::throttle::{AlertThrottle, ThrottleConfig, ThrottleDecision};
use crate::Result;

/// Dispatcher settings, assembled by the daemon from its config file.
pub struct DispatcherConfig {
    /// Mesh channel name alerts are published on.
    pub channel: String,
    /// Channel PSK; `None` sends plaintext.
    pub psk: Option<ChannelKey>,
    pub template: MessageTemplate,
    pub throttle: ThrottleConfig,
    pub retry: RetryPolicy,
    /// Append-only alert log; `None` disables logging.
    pub log_path: Option<PathBuf>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            channel: "alerts".into(),
            psk: None,
            template: MessageTemplate::default(),
            throttle: ThrottleConfig::default(),
            retry: RetryPolicy::default(),
            log_path: None,
        }
    }
}

/// Dispatcher counters, surfaced through the stats read view.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct DispatchStats {
    pub events: u64,
    pub sent: u64,
    pub suppressed: u64,
    pub queued: u64,
}

/// Point-in-time view of the whole outbound path, published on a watch
/// channel for the HTTP stats surface.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatchView {
    pub stats: DispatchStats,
    pub queue: crate::outbound::OutboundStats,
    pub pending: usize,
    pub interfaces: Vec<IfaceView>,
    pub all_interfaces_degraded: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IfaceView {
    pub name: String,
    pub state: crate::iface::IfaceState,
    pub stats: crate::iface::IfaceStats,
}

/// Consumes alert events and produces delivered mesh messages.
pub struct Dispatcher {
    channel: String,
    psk: Option<ChannelKey>,
    template: MessageTemplate,
    throttle: AlertThrottle,
    queue: OutboundQueue,
    deliveries: DeliveryTracker,
    router: Router,
    log: Option<std::fs::File>,
    pub stats: DispatchStats,
    view_tx: watch::Sender<DispatchView>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, router: Router) -> Result<Self> {
        let log = match &config.log_path {
            Some(path) => Some(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?,
            ),
            None => None,
        };

        let (view_tx, _) = watch::channel(DispatchView::default());
        Ok(Dispatcher {
            channel: config.channel,
            psk: config.psk,
            template: config.template,
            throttle: AlertThrottle::new(config.throttle),
            queue: OutboundQueue::new(config.retry),
            deliveries: DeliveryTracker::new(),
            router,
            log,
            stats: DispatchStats::default(),
            view_tx,
        })
    }

    /// Subscribe to the published stats view (for the HTTP surface).
    pub fn subscribe_view(&self) -> watch::Receiver<DispatchView> {
        self.view_tx.subscribe()
    }

    fn publish_view(&self) {
        let interfaces = self
            .router
            .interfaces()
            .iter()
            .map(|i| IfaceView {
                name: i.name.clone(),
                state: i.state(),
                stats: i.stats,
            })
            .collect();
        let _ = self.view_tx.send(DispatchView {
            stats: self.stats,
            queue: self.queue.stats,
            pending: self.queue.len(),
            interfaces,
            all_interfaces_degraded: self.router.all_degraded(),
        });
    }

    /// Throttle-check, format and enqueue one alert event. Returns the
    /// outbound id when the event survived the throttle.
    pub fn handle_event(&mut self, event: &AlertEvent, now: f64) -> Option<u64> {
        self.stats.events += 1;
        let icao = event.aircraft.icao;

        match self
            .throttle
            .check(&icao, event.matched.priority, now)
        {
            ThrottleDecision::Send => {}
            decision => {
                self.stats.suppressed += 1;
                debug!(%icao, ?decision, "alert suppressed");
                return None;
            }
        }

        let text = self.template.render(event);
        let content = match &self.psk {
            Some(key) => key.encrypt(text.as_bytes()),
            None => text.as_bytes().to_vec(),
        };

        let id = self
            .queue
            .enqueue(&self.channel, event.matched.priority, content, now);
        self.stats.queued += 1;

        self.log_alert(event, &text);
        Some(id)
    }

    /// Push every due outbound through the router; requeue failures.
    pub async fn pump(&mut self, now: f64) {
        for msg in self.queue.due(now) {
            match self.router.send(&msg, now).await {
                Ok(outcome) => {
                    for iface in &outcome.delivered_on {
                        if !self.deliveries.record(iface, msg.id) {
                            warn!(id = msg.id, iface, "duplicate delivery id");
                        }
                    }
                    self.queue.mark_delivered();
                    self.stats.sent += 1;
                }
                Err(e) => {
                    debug!(id = msg.id, error = %e, "delivery failed, requeueing");
                    self.queue.requeue_failed(msg, now);
                }
            }
        }
        self.router.health_check(now).await;
    }

    /// Run until the alert channel closes or shutdown is signalled.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<AlertEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick = interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => {
                            let now = unix_now();
                            self.handle_event(&event, now);
                            self.pump(now).await;
                            self.publish_view();
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    let now = unix_now();
                    self.pump(now).await;
                    self.throttle.prune(now);
                    self.publish_view();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(
            sent = self.stats.sent,
            suppressed = self.stats.suppressed,
            "dispatcher stopped"
        );
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn delivered_on(&self, iface: &str, id: u64) -> bool {
        self.deliveries.was_delivered(iface, id)
    }

    pub fn queue_stats(&self) -> crate::outbound::OutboundStats {
        self.queue.stats
    }

    fn log_alert(&mut self, event: &AlertEvent, text: &str) {
        if let Some(log) = &mut self.log {
            let line = format!(
                "{:.3} {} {} | {}\n",
                event.event_time, event.aircraft.icao, event.matched.reason, text
            );
            if let Err(e) = log.write_all(line.as_bytes()) {
                warn!(error = %e, "alert log write failed");
            }
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::{Interface, Transport};
    use crate::position::CoordinateFormat;
    use crate::route::testing::{MockHandle, MockTransport};
    use crate::route::RoutingPolicy;
    use skymesh_core::decode::decode;
    use skymesh_core::frame::parse_hex_uncached;
    use skymesh_core::track::{Tracker, TrackerConfig};
    use skymesh_core::watchlist::{MatchKind, Priority, WatchlistMatch};

    fn klm_event(t: f64, priority: Priority) -> AlertEvent {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let frame = parse_hex_uncached("8D4840D6202CC371C32CE0576098", t).unwrap();
        for d in decode(&frame) {
            tracker.ingest(&d);
        }
        AlertEvent {
            aircraft: tracker.snapshot().remove(0),
            matched: WatchlistMatch {
                kind: MatchKind::IcaoExact,
                reason: "icao 4840D6".into(),
                label: "watch".into(),
                priority,
            },
            event_time: t,
        }
    }

    fn dispatcher(min_interval: f64) -> (Dispatcher, MockHandle, MockHandle) {
        let (t1, h1) = MockTransport::new();
        let (t2, h2) = MockTransport::new();
        let router = Router::new(
            vec![
                Interface::new("mqtt", Transport::Mock(t1)),
                Interface::new("serial", Transport::Mock(t2)),
            ],
            RoutingPolicy::Fallback,
            30.0,
            60.0,
        );
        let d = Dispatcher::new(
            DispatcherConfig {
                throttle: ThrottleConfig {
                    min_interval_sec: min_interval,
                    max_alerts_per_hour: 10,
                },
                ..DispatcherConfig::default()
            },
            router,
        )
        .unwrap();
        (d, h1, h2)
    }

    #[tokio::test]
    async fn test_watchlist_throttle_scenario() {
        // Ingest at t=0 and t=10 inside a 60 s cooldown: exactly one
        // outbound. A third at t=70: a second outbound.
        let (mut d, h1, _h2) = dispatcher(60.0);

        assert!(d.handle_event(&klm_event(0.0, Priority::High), 0.0).is_some());
        d.pump(0.0).await;
        assert!(d.handle_event(&klm_event(10.0, Priority::High), 10.0).is_none());
        d.pump(10.0).await;
        assert_eq!(h1.sent_count(), 1);

        assert!(d.handle_event(&klm_event(70.0, Priority::High), 70.0).is_some());
        d.pump(70.0).await;
        assert_eq!(h1.sent_count(), 2);
        assert_eq!(d.stats.suppressed, 1);
    }

    #[tokio::test]
    async fn test_critical_bypasses_cooldown() {
        let (mut d, h1, _h2) = dispatcher(300.0);
        d.handle_event(&klm_event(0.0, Priority::High), 0.0);
        d.pump(0.0).await;
        d.handle_event(&klm_event(1.0, Priority::Critical), 1.0);
        d.pump(1.0).await;
        assert_eq!(h1.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_failover_delivery() {
        let (mut d, h1, h2) = dispatcher(0.0);
        h1.set_failing(true);

        let id = d.handle_event(&klm_event(0.0, Priority::High), 0.0).unwrap();
        d.pump(0.0).await;

        assert_eq!(h2.sent_count(), 1, "alert should arrive via serial");
        assert!(d.delivered_on("serial", id));
        assert!(!d.delivered_on("mqtt", id));
    }

    #[tokio::test]
    async fn test_retry_after_total_outage() {
        let (mut d, h1, h2) = dispatcher(0.0);
        h1.set_failing(true);
        h2.set_failing(true);

        let id = d.handle_event(&klm_event(0.0, Priority::High), 0.0).unwrap();
        d.pump(0.0).await;
        assert_eq!(d.pending(), 1, "message queued for retry");

        // Interfaces recover; a later pump (past the backoff) delivers.
        h1.set_failing(false);
        h2.set_failing(false);
        d.pump(60.0).await; // health probes run here
        d.pump(100.0).await;
        assert!(
            d.delivered_on("mqtt", id) || d.delivered_on("serial", id),
            "queued alert eventually delivered"
        );
    }

    #[tokio::test]
    async fn test_encrypted_payload() {
        let (t1, h1) = MockTransport::new();
        let router = Router::new(
            vec![Interface::new("serial", Transport::Mock(t1))],
            RoutingPolicy::Primary,
            30.0,
            60.0,
        );
        let key = ChannelKey::from_base64("AQ==").unwrap();
        let mut d = Dispatcher::new(
            DispatcherConfig {
                psk: Some(key.clone()),
                template: MessageTemplate::new(
                    "{callsign}",
                    CoordinateFormat::Decimal,
                    200,
                ),
                ..DispatcherConfig::default()
            },
            router,
        )
        .unwrap();

        d.handle_event(&klm_event(0.0, Priority::High), 0.0);
        d.pump(0.0).await;
        assert_eq!(h1.sent_count(), 1);
        // The wire payload decrypts back to the rendered text.
        let sent = h1.sent_payloads().remove(0);
        assert_eq!(key.decrypt(&sent).unwrap(), b"KLM1023");
    }

    #[tokio::test]
    async fn test_alert_log_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.log");

        let (t1, _h1) = MockTransport::new();
        let router = Router::new(
            vec![Interface::new("serial", Transport::Mock(t1))],
            RoutingPolicy::Primary,
            30.0,
            60.0,
        );
        let mut d = Dispatcher::new(
            DispatcherConfig {
                log_path: Some(path.clone()),
                ..DispatcherConfig::default()
            },
            router,
        )
        .unwrap();

        d.handle_event(&klm_event(0.0, Priority::High), 0.0);
        let logged = std::fs::read_to_string(&path).unwrap();
        assert!(logged.contains("4840D6"), "{logged}");
        assert!(logged.contains("KLM1023"), "{logged}");
    }
}
