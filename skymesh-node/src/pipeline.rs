//! Pipeline wiring: sources → decode → tracker → matcher → dispatcher.
//!
//! Every stage is a task; every edge is a bounded channel. The tracker
//! task is the single owner of the aircraft store — readers talk to it
//! through [`TrackerHandle`] request/reply messages, so snapshots never
//! block the ingest path for long and no lock leaks outside.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

use skymesh_core::decode::{decode, Decoded};
use skymesh_core::frame::{FrameValidator, ValidatorStats};
use skymesh_core::track::{Tracker, TrackerStats};
use skymesh_core::types::{Icao, SourceId};
use skymesh_core::watchlist::AlertEvent;
use skymesh_core::{Aircraft, TrackerConfig, TrackerUpdate, Watchlist};

use crate::sources::{unix_now, SourceItem};

/// Known-ICAO cache TTL for the frame validator.
const ICAO_CACHE_TTL: f64 = 60.0;

/// Alert channel depth. Alerts are rare; a backlog this deep means the
/// dispatcher died.
const ALERT_CAP: usize = 64;

const MATCH_CAP: usize = 256;
const DECODED_CAP: usize = 1024;

// ---------------------------------------------------------------------------
// Decode stage
// ---------------------------------------------------------------------------

/// Counters owned by the decode stage, shared with the stats view.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DecodeStats {
    pub frames_in: u64,
    pub messages_out: u64,
    pub crc_pass: u64,
    pub crc_fail: u64,
    pub corrected: u64,
    pub dropped_unknown_icao: u64,
    pub rejected_length: u64,
    pub rejected_df: u64,
    /// Frames that validated but produced no message, per (source, df).
    pub empty_decodes: HashMap<String, u64>,
}

impl DecodeStats {
    fn absorb_validator(&mut self, v: &ValidatorStats) {
        self.crc_pass = v.crc_pass;
        self.crc_fail = v.crc_fail;
        self.corrected = v.corrected;
        self.dropped_unknown_icao = v.dropped_unknown_icao;
        self.rejected_length = v.rejected_length;
        self.rejected_df = v.rejected_df;
    }
}

async fn decode_stage(
    mut rx: mpsc::Receiver<SourceItem>,
    tx: mpsc::Sender<Decoded>,
    stats: Arc<Mutex<DecodeStats>>,
) {
    let mut validator = FrameValidator::new(ICAO_CACHE_TTL, true);
    let mut frames_seen = 0u64;

    while let Some(item) = rx.recv().await {
        let msgs: Vec<Decoded> = match item {
            SourceItem::Decoded(d) => vec![d],
            SourceItem::Frame(frame) => {
                let source: SourceId = frame.source;
                let ts = frame.timestamp;
                frames_seen += 1;
                if frames_seen % 1024 == 0 {
                    validator.prune(ts);
                }

                let msgs = match validator.validate(frame) {
                    Ok(mode_frame) => {
                        let df = mode_frame.df;
                        let msgs = decode(&mode_frame);
                        if msgs.is_empty() {
                            let mut s = stats.lock().unwrap();
                            *s.empty_decodes.entry(format!("{source}/{df}")).or_insert(0) += 1;
                        }
                        msgs
                    }
                    Err(reject) => {
                        debug!(?reject, "frame rejected");
                        Vec::new()
                    }
                };

                let mut s = stats.lock().unwrap();
                s.frames_in += 1;
                s.absorb_validator(&validator.stats);
                drop(s);
                msgs
            }
        };

        for msg in msgs {
            stats.lock().unwrap().messages_out += 1;
            if tx.send(msg).await.is_err() {
                return; // tracker gone
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker task
// ---------------------------------------------------------------------------

/// Request messages for the tracker task.
pub enum TrackerCmd {
    Snapshot(oneshot::Sender<Vec<Aircraft>>),
    Get(Icao, oneshot::Sender<Option<Aircraft>>),
    Stats(oneshot::Sender<TrackerStats>),
    SetWatchlist(Watchlist),
    Count(oneshot::Sender<usize>),
}

/// Cloneable handle for read views and the control channel.
#[derive(Clone)]
pub struct TrackerHandle {
    cmd_tx: mpsc::Sender<TrackerCmd>,
    watchlist_tx: Arc<watch::Sender<Watchlist>>,
}

impl TrackerHandle {
    pub async fn snapshot(&self) -> Vec<Aircraft> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(TrackerCmd::Snapshot(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn get(&self, icao: Icao) -> Option<Aircraft> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(TrackerCmd::Get(icao, tx)).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn stats(&self) -> TrackerStats {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(TrackerCmd::Stats(tx)).await.is_err() {
            return TrackerStats::default();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn aircraft_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(TrackerCmd::Count(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Atomic watchlist replacement: both the tracker (for the cached
    /// flag) and the matcher (for evaluation) see the new list.
    pub async fn set_watchlist(&self, watchlist: Watchlist) {
        let _ = self
            .cmd_tx
            .send(TrackerCmd::SetWatchlist(watchlist.clone()))
            .await;
        let _ = self.watchlist_tx.send(watchlist);
    }

    pub fn watchlist(&self) -> Watchlist {
        self.watchlist_tx.borrow().clone()
    }
}

struct MatchCandidate {
    aircraft: Aircraft,
    update: TrackerUpdate,
}

async fn tracker_task(
    mut tracker: Tracker,
    mut decoded_rx: mpsc::Receiver<Decoded>,
    mut cmd_rx: mpsc::Receiver<TrackerCmd>,
    match_tx: mpsc::Sender<MatchCandidate>,
) {
    let mut expire_tick = interval(Duration::from_secs(10));
    expire_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_msg = decoded_rx.recv() => {
                let Some(msg) = maybe_msg else { break };
                let update = tracker.ingest(&msg);

                let interesting = !update.duplicate
                    && (update.is_new
                        || update.ident_changed
                        || update.position_changed
                        || update.emergency);
                if interesting {
                    if let Some(ac) = tracker.get(&update.icao) {
                        // try_send: a stalled matcher must not stall ingest.
                        if match_tx
                            .try_send(MatchCandidate { aircraft: ac.clone(), update })
                            .is_err()
                        {
                            debug!("matcher backlog, dropping candidate");
                        }
                    }
                }
            }
            maybe_cmd = cmd_rx.recv() => {
                let Some(cmd) = maybe_cmd else { break };
                match cmd {
                    TrackerCmd::Snapshot(tx) => { let _ = tx.send(tracker.snapshot()); }
                    TrackerCmd::Get(icao, tx) => { let _ = tx.send(tracker.get(&icao).cloned()); }
                    TrackerCmd::Stats(tx) => { let _ = tx.send(tracker.stats); }
                    TrackerCmd::SetWatchlist(wl) => tracker.set_watchlist(wl),
                    TrackerCmd::Count(tx) => { let _ = tx.send(tracker.len()); }
                }
            }
            _ = expire_tick.tick() => {
                let removed = tracker.expire(unix_now());
                if removed > 0 {
                    debug!(removed, "expired aircraft");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Matcher task
// ---------------------------------------------------------------------------

async fn matcher_task(
    mut candidates: mpsc::Receiver<MatchCandidate>,
    watchlist_rx: watch::Receiver<Watchlist>,
    alert_tx: mpsc::Sender<AlertEvent>,
) {
    while let Some(candidate) = candidates.recv().await {
        let watchlist = watchlist_rx.borrow().clone();
        let matches = watchlist.matches(&candidate.aircraft);
        for matched in matches {
            let event = AlertEvent {
                aircraft: candidate.aircraft.clone(),
                matched,
                event_time: candidate.aircraft.last_seen,
            };
            if alert_tx.try_send(event).is_err() {
                warn!("alert channel full, dropping alert event");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Everything the daemon needs to hold onto after the pipeline starts.
pub struct Pipeline {
    pub tracker: TrackerHandle,
    pub alerts: mpsc::Receiver<AlertEvent>,
    pub decode_stats: Arc<Mutex<DecodeStats>>,
    pub tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Wire up decode → tracker → matcher over the merged source stream.
pub fn spawn_pipeline(
    source_rx: mpsc::Receiver<SourceItem>,
    tracker_config: TrackerConfig,
    watchlist: Watchlist,
) -> Pipeline {
    let decode_stats = Arc::new(Mutex::new(DecodeStats::default()));
    let (decoded_tx, decoded_rx) = mpsc::channel(DECODED_CAP);
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (match_tx, match_rx) = mpsc::channel(MATCH_CAP);
    let (alert_tx, alert_rx) = mpsc::channel(ALERT_CAP);
    let (watchlist_tx, watchlist_rx) = watch::channel(watchlist.clone());

    let mut tracker = Tracker::new(tracker_config);
    tracker.set_watchlist(watchlist);

    let tasks = vec![
        tokio::spawn(decode_stage(source_rx, decoded_tx, decode_stats.clone())),
        tokio::spawn(tracker_task(tracker, decoded_rx, cmd_rx, match_tx)),
        tokio::spawn(matcher_task(match_rx, watchlist_rx, alert_tx)),
    ];

    Pipeline {
        tracker: TrackerHandle {
            cmd_tx,
            watchlist_tx: Arc::new(watchlist_tx),
        },
        alerts: alert_rx,
        decode_stats,
        tasks,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use skymesh_core::frame::RawFrame;
    use skymesh_core::types::{hex_decode, SourceKind};
    use skymesh_core::watchlist::{WatchKind, WatchlistEntry};

    fn frame(hex: &str, ts: f64) -> SourceItem {
        SourceItem::Frame(RawFrame {
            bytes: hex_decode(hex).unwrap(),
            timestamp: ts,
            source: 0,
            source_kind: SourceKind::RawFile,
            signal_level: None,
        })
    }

    fn pipeline_with_watchlist(entries: Vec<WatchlistEntry>) -> (mpsc::Sender<SourceItem>, Pipeline) {
        let (tx, rx) = mpsc::channel(64);
        let p = spawn_pipeline(rx, TrackerConfig::default(), Watchlist::new(entries));
        (tx, p)
    }

    #[tokio::test]
    async fn test_end_to_end_identification() {
        let (tx, p) = pipeline_with_watchlist(vec![]);
        tx.send(frame("8D4840D6202CC371C32CE0576098", 1.0))
            .await
            .unwrap();

        // Poll until the tracker has digested the frame.
        let mut snapshot = Vec::new();
        for _ in 0..50 {
            snapshot = p.tracker.snapshot().await;
            if !snapshot.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].callsign.as_deref(), Some("KLM1023"));
        assert_eq!(p.decode_stats.lock().unwrap().crc_pass, 1);
    }

    #[tokio::test]
    async fn test_crc_fail_dropped_before_tracker() {
        let (tx, p) = pipeline_with_watchlist(vec![]);
        // Scenario 4: last nibble flipped.
        tx.send(frame("8D4840D6202CC371C32CE0576099", 1.0))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(p.tracker.snapshot().await.is_empty());
        assert_eq!(p.decode_stats.lock().unwrap().crc_fail, 1);
    }

    #[tokio::test]
    async fn test_watchlist_match_produces_alert() {
        let entry = WatchlistEntry::new(WatchKind::IcaoExact, "4840D6", "target").unwrap();
        let (tx, mut p) = pipeline_with_watchlist(vec![entry]);

        tx.send(frame("8D4840D6202CC371C32CE0576098", 1.0))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), p.alerts.recv())
            .await
            .expect("alert within 2s")
            .expect("channel open");
        assert_eq!(event.matched.label, "target");
        assert_eq!(event.aircraft.callsign.as_deref(), Some("KLM1023"));
        assert!(event.aircraft.is_watchlist);
    }

    #[tokio::test]
    async fn test_set_watchlist_live() {
        let (tx, mut p) = pipeline_with_watchlist(vec![]);

        tx.send(frame("8D4840D6202CC371C32CE0576098", 1.0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(p.alerts.try_recv().is_err(), "no watchlist, no alert");

        let entry = WatchlistEntry::new(WatchKind::CallsignRegex, "^EZY", "easy").unwrap();
        p.tracker.set_watchlist(Watchlist::new(vec![entry])).await;

        // A new matching aircraft triggers against the swapped-in list.
        tx.send(frame("8D406B902015A678D4D220AA4BDA", 5.0))
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), p.alerts.recv())
            .await
            .expect("alert within 2s")
            .expect("channel open");
        assert_eq!(event.matched.label, "easy");
        assert_eq!(event.aircraft.callsign.as_deref(), Some("EZY85MH"));
    }

    #[tokio::test]
    async fn test_json_decoded_passthrough() {
        use skymesh_core::types::{DecodedMsg, SnapshotMsg};

        let (tx, p) = pipeline_with_watchlist(vec![]);
        let msg = Decoded {
            msg: DecodedMsg::Snapshot(SnapshotMsg {
                icao: Icao([0xAB, 0xCD, 0xEF]),
                callsign: Some("TEST1".into()),
                lat: Some(10.0),
                lon: Some(20.0),
                altitude_ft: Some(10_000),
                ground_speed_kts: None,
                track_deg: None,
                vertical_rate_fpm: None,
                squawk: None,
                on_ground: Some(false),
                timestamp: 1.0,
            }),
            df: None,
            source: 1,
            source_kind: SourceKind::JsonPoll,
        };
        tx.send(SourceItem::Decoded(msg)).await.unwrap();

        let mut found = None;
        for _ in 0..50 {
            found = p.tracker.get(Icao([0xAB, 0xCD, 0xEF])).await;
            if found.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let ac = found.expect("snapshot record tracked");
        assert_eq!(ac.lat, Some(10.0));
    }
}
