//! Aircraft tracker: the single owner of the live aircraft store.
//!
//! All mutation goes through [`Tracker::ingest`]; readers get deep-copied
//! snapshots. Merge policy is per-field last-writer-wins on the *message*
//! timestamp, so out-of-order arrivals across feeders are safe. Two
//! exceptions: the callsign is sticky (only another identification frame
//! replaces it) and quality fields always take the latest value.
//!
//! CPR state lives here, not in the decoder — resolving a position needs
//! the half-frame buffers, the anchor position, and freshness metadata.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::cpr;
use crate::decode::Decoded;
use crate::types::*;
use crate::watchlist::Watchlist;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tracker knobs. Defaults match the shipped config file.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Aircraft silent for longer than this are expired (seconds).
    pub aircraft_timeout: f64,
    /// Positions older than this are cleared from the record (seconds).
    pub position_timeout: f64,
    /// Hard cap on the store; oldest-by-last_seen evicted beyond it.
    pub max_aircraft: usize,
    /// Even/odd pairing window for airborne global CPR (seconds).
    pub airborne_pair_window: f64,
    /// Even/odd pairing window for surface global CPR (seconds).
    pub surface_pair_window: f64,
    /// Local CPR fixes further than this from the reference are refused.
    pub local_range_nm: f64,
    /// Operator-configured receiver location, used as the CPR reference
    /// when no prior fix exists and for all surface decodes.
    pub reference: Option<(f64, f64)>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            aircraft_timeout: 300.0,
            position_timeout: 60.0,
            max_aircraft: 10_000,
            airborne_pair_window: cpr::AIRBORNE_PAIR_WINDOW,
            surface_pair_window: cpr::SURFACE_PAIR_WINDOW,
            local_range_nm: cpr::LOCAL_RANGE_NM,
            reference: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Aircraft record
// ---------------------------------------------------------------------------

/// How the current position was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    GlobalCpr,
    LocalCpr,
    Surface,
    /// Pre-resolved position from a JSON snapshot feeder.
    Feed,
}

/// One CPR half-frame waiting for its counterpart.
#[derive(Debug, Clone, Copy)]
struct CprFrame {
    lat: u32,
    lon: u32,
    time: f64,
}

/// Even/odd buffers, kept separately for airborne and surface frames
/// (the two encodings cannot be paired with each other).
#[derive(Debug, Clone, Default)]
struct CprState {
    even: Option<CprFrame>,
    odd: Option<CprFrame>,
    surface_even: Option<CprFrame>,
    surface_odd: Option<CprFrame>,
}

/// Source timestamps per field group, backing the last-writer-wins merge.
/// NEG_INFINITY means "never written".
#[derive(Debug, Clone)]
struct FieldTimes {
    callsign: f64,
    squawk: f64,
    position: f64,
    alt_baro: f64,
    alt_gnss: f64,
    velocity: f64,
    heading: f64,
    vertical_rate: f64,
    selected: f64,
    on_ground: f64,
}

impl Default for FieldTimes {
    fn default() -> Self {
        const NEVER: f64 = f64::NEG_INFINITY;
        FieldTimes {
            callsign: NEVER,
            squawk: NEVER,
            position: NEVER,
            alt_baro: NEVER,
            alt_gnss: NEVER,
            velocity: NEVER,
            heading: NEVER,
            vertical_rate: NEVER,
            selected: NEVER,
            on_ground: NEVER,
        }
    }
}

/// The durable per-aircraft record, keyed by ICAO address.
#[derive(Debug, Clone, Serialize)]
pub struct Aircraft {
    pub icao: Icao,

    // Identification
    pub callsign: Option<String>,
    pub category: Option<u8>,
    pub squawk: Option<String>,
    pub emergency: bool,

    // Position
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_baro_ft: Option<i32>,
    pub alt_gnss_ft: Option<i32>,
    pub on_ground: bool,
    pub position_source: Option<PositionSource>,
    pub position_time: Option<f64>,

    // Velocity
    pub ground_speed_kts: Option<f64>,
    pub track_deg: Option<f64>,
    pub true_airspeed_kts: Option<f64>,
    pub indicated_airspeed_kts: Option<f64>,
    pub mach: Option<f64>,
    pub magnetic_heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub vertical_rate_source: Option<VerticalRateSource>,

    // Intent
    pub selected_altitude_ft: Option<i32>,
    pub selected_heading_deg: Option<f64>,

    // Quality (always-latest, never sticky)
    pub nac_p: Option<u8>,
    pub sil: Option<u8>,
    pub adsb_version: Option<u8>,
    pub surveillance_status: Option<u8>,

    // Bookkeeping
    pub first_seen: f64,
    pub last_seen: f64,
    pub messages_total: u64,
    pub messages_by_df: HashMap<u8, u64>,
    pub data_sources: BTreeSet<SourceId>,
    pub is_watchlist: bool,

    #[serde(skip)]
    times: FieldTimes,
    #[serde(skip)]
    cpr: CprState,
    #[serde(skip)]
    last_msg: Option<(Option<u8>, DecodedMsg)>,
}

impl Aircraft {
    fn new(icao: Icao, timestamp: f64) -> Self {
        Aircraft {
            icao,
            callsign: None,
            category: None,
            squawk: None,
            emergency: false,
            lat: None,
            lon: None,
            alt_baro_ft: None,
            alt_gnss_ft: None,
            on_ground: false,
            position_source: None,
            position_time: None,
            ground_speed_kts: None,
            track_deg: None,
            true_airspeed_kts: None,
            indicated_airspeed_kts: None,
            mach: None,
            magnetic_heading_deg: None,
            vertical_rate_fpm: None,
            vertical_rate_source: None,
            selected_altitude_ft: None,
            selected_heading_deg: None,
            nac_p: None,
            sil: None,
            adsb_version: None,
            surveillance_status: None,
            first_seen: timestamp,
            last_seen: timestamp,
            messages_total: 0,
            messages_by_df: HashMap::new(),
            data_sources: BTreeSet::new(),
            is_watchlist: false,
            times: FieldTimes::default(),
            cpr: CprState::default(),
            last_msg: None,
        }
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.last_seen
    }
}

// ---------------------------------------------------------------------------
// Ingest result
// ---------------------------------------------------------------------------

/// What an ingest changed; drives the watchlist matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerUpdate {
    pub icao: Icao,
    pub is_new: bool,
    pub duplicate: bool,
    /// Callsign or squawk changed value.
    pub ident_changed: bool,
    /// A position was newly resolved or moved.
    pub position_changed: bool,
    /// Emergency state is active on this aircraft.
    pub emergency: bool,
}

/// Tracker counters, surfaced through the stats read view.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TrackerStats {
    pub messages: u64,
    pub new_aircraft: u64,
    pub duplicates: u64,
    pub stale_writes: u64,
    pub range_errors: u64,
    pub cpr_global: u64,
    pub cpr_local: u64,
    pub cpr_surface: u64,
    pub cpr_incomplete: u64,
    pub expired: u64,
    pub evicted: u64,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Keyed aircraft store with freshness, conflict-resolution and expiry
/// policies. Single-owner: wrap it in one task/thread and feed it
/// decoded messages.
pub struct Tracker {
    config: TrackerConfig,
    aircraft: HashMap<Icao, Aircraft>,
    watchlist: Watchlist,
    pub stats: TrackerStats,
}

/// Duplicate window: identical payloads from different feeders within
/// this many seconds are the same transmission.
const DUP_WINDOW: f64 = 1.0;

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Tracker {
            config,
            aircraft: HashMap::new(),
            watchlist: Watchlist::empty(),
            stats: TrackerStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    pub fn get(&self, icao: &Icao) -> Option<&Aircraft> {
        self.aircraft.get(icao)
    }

    /// Deep-copied list of all aircraft, most recently seen first.
    pub fn snapshot(&self) -> Vec<Aircraft> {
        let mut list: Vec<Aircraft> = self.aircraft.values().cloned().collect();
        list.sort_by(|a, b| b.last_seen.total_cmp(&a.last_seen));
        list
    }

    /// Atomically replace the watchlist and refresh the cached per-aircraft
    /// flag.
    pub fn set_watchlist(&mut self, watchlist: Watchlist) {
        self.watchlist = watchlist;
        for ac in self.aircraft.values_mut() {
            ac.is_watchlist = !self.watchlist.matches(ac).is_empty();
        }
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    /// Ingest one decoded message. Never fails: malformed fields were
    /// already dropped by the decoder, and out-of-range values are counted
    /// and skipped here.
    pub fn ingest(&mut self, decoded: &Decoded) -> TrackerUpdate {
        let msg = &decoded.msg;
        let icao = *msg.icao();
        let timestamp = msg.timestamp();

        self.stats.messages += 1;

        let is_new = !self.aircraft.contains_key(&icao);
        if is_new {
            if self.aircraft.len() >= self.config.max_aircraft {
                self.evict_oldest();
            }
            self.stats.new_aircraft += 1;
            self.aircraft.insert(icao, Aircraft::new(icao, timestamp));
        }

        let mut update = TrackerUpdate {
            icao,
            is_new,
            ..Default::default()
        };

        // Split borrows: the merge needs &mut aircraft plus &stats/config.
        let config = self.config.clone();
        let stats = &mut self.stats;
        let ac = self.aircraft.get_mut(&icao).unwrap();

        // last_seen is monotonic regardless of message timestamps.
        if timestamp > ac.last_seen {
            ac.last_seen = timestamp;
        }
        ac.messages_total += 1;
        if let Some(df) = decoded.df {
            *ac.messages_by_df.entry(df).or_insert(0) += 1;
        }
        ac.data_sources.insert(decoded.source);

        // Exact duplicate from another feeder: counters only.
        if let Some((last_df, last_msg)) = &ac.last_msg {
            if *last_df == decoded.df
                && (timestamp - last_msg.timestamp()).abs() <= DUP_WINDOW
                && same_payload(last_msg, msg)
            {
                stats.duplicates += 1;
                update.duplicate = true;
                update.emergency = ac.emergency;
                return update;
            }
        }
        ac.last_msg = Some((decoded.df, msg.clone()));

        match msg {
            DecodedMsg::Identification(m) => {
                let cs = m.callsign.trim_end().to_string();
                // Sticky: only another identification frame replaces it,
                // and only with a fresher timestamp.
                if !cs.is_empty() && timestamp >= ac.times.callsign {
                    if ac.callsign.as_deref() != Some(&cs) {
                        update.ident_changed = true;
                    }
                    ac.callsign = Some(cs);
                    ac.category = Some(m.category);
                    ac.times.callsign = timestamp;
                }
            }
            DecodedMsg::Position(m) => {
                self::apply_position(ac, m, &config, stats, &mut update);
            }
            DecodedMsg::Velocity(m) => {
                if timestamp >= ac.times.velocity {
                    match m.speed_type {
                        SpeedType::Ground => {
                            if let Some(gs) = m.speed_kts {
                                if (0.0..=5000.0).contains(&gs) {
                                    ac.ground_speed_kts = Some(gs);
                                } else {
                                    stats.range_errors += 1;
                                }
                            }
                            if let Some(trk) = m.heading_deg {
                                if (0.0..360.0).contains(&trk) {
                                    ac.track_deg = Some(trk);
                                } else {
                                    stats.range_errors += 1;
                                }
                            }
                        }
                        SpeedType::TAS => {
                            ac.true_airspeed_kts = m.speed_kts;
                            ac.magnetic_heading_deg = m.heading_deg;
                        }
                        SpeedType::IAS => {
                            ac.indicated_airspeed_kts = m.speed_kts;
                            ac.magnetic_heading_deg = m.heading_deg;
                        }
                    }
                    ac.times.velocity = timestamp;
                }
                if m.vertical_rate_fpm.is_some() && timestamp >= ac.times.vertical_rate {
                    ac.vertical_rate_fpm = m.vertical_rate_fpm;
                    ac.vertical_rate_source = Some(m.vertical_rate_source);
                    ac.times.vertical_rate = timestamp;
                }
            }
            DecodedMsg::Altitude(m) => {
                apply_altitude(ac, m.altitude_ft, false, timestamp, stats);
                if timestamp >= ac.times.on_ground {
                    ac.on_ground = m.on_ground;
                    ac.times.on_ground = timestamp;
                }
            }
            DecodedMsg::Squawk(m) => {
                if timestamp >= ac.times.squawk {
                    if ac.squawk.as_deref() != Some(m.squawk.as_str()) {
                        update.ident_changed = true;
                    }
                    ac.squawk = Some(m.squawk.clone());
                    ac.emergency = is_emergency_squawk(&m.squawk);
                    ac.times.squawk = timestamp;
                }
                if timestamp >= ac.times.on_ground {
                    ac.on_ground = m.on_ground;
                    ac.times.on_ground = timestamp;
                }
            }
            DecodedMsg::AllCall(_) => {}
            DecodedMsg::Status(m) => {
                if let Some(sq) = &m.squawk {
                    if timestamp >= ac.times.squawk {
                        if ac.squawk.as_deref() != Some(sq.as_str()) {
                            update.ident_changed = true;
                        }
                        ac.squawk = Some(sq.clone());
                        ac.times.squawk = timestamp;
                    }
                }
                // Emergency state 0 = none; everything else raises the flag.
                ac.emergency = m.emergency_state != 0
                    || ac.squawk.as_deref().is_some_and(is_emergency_squawk);
            }
            DecodedMsg::TargetState(m) => {
                if timestamp >= ac.times.selected {
                    ac.selected_altitude_ft = m.selected_altitude_ft;
                    ac.selected_heading_deg = m.selected_heading_deg;
                    ac.times.selected = timestamp;
                }
            }
            DecodedMsg::OperationalStatus(m) => {
                // Quality fields: always latest, no sticky semantics.
                ac.adsb_version = Some(m.adsb_version);
                if m.nac_p.is_some() {
                    ac.nac_p = m.nac_p;
                }
                if m.sil.is_some() {
                    ac.sil = m.sil;
                }
            }
            DecodedMsg::CommB(m) => {
                apply_commb(ac, m, timestamp);
            }
            DecodedMsg::Snapshot(m) => {
                apply_snapshot(ac, m, timestamp, stats, &mut update);
            }
        }

        if ac.emergency {
            update.emergency = true;
        }
        if update.ident_changed || update.position_changed || is_new {
            ac.is_watchlist = !self.watchlist.matches(ac).is_empty();
        }

        update
    }

    /// Remove aircraft not heard from within `aircraft_timeout`, and clear
    /// positions older than `position_timeout`. Returns the number of
    /// aircraft removed.
    pub fn expire(&mut self, now: f64) -> usize {
        let timeout = self.config.aircraft_timeout;
        let before = self.aircraft.len();
        self.aircraft.retain(|_, ac| now - ac.last_seen <= timeout);
        let removed = before - self.aircraft.len();
        self.stats.expired += removed as u64;

        let pos_timeout = self.config.position_timeout;
        for ac in self.aircraft.values_mut() {
            if let Some(t) = ac.position_time {
                if now - t > pos_timeout {
                    ac.lat = None;
                    ac.lon = None;
                    ac.position_source = None;
                    ac.position_time = None;
                }
            }
        }

        removed
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .aircraft
            .values()
            .min_by(|a, b| a.last_seen.total_cmp(&b.last_seen))
            .map(|ac| ac.icao)
        {
            self.aircraft.remove(&oldest);
            self.stats.evicted += 1;
        }
    }
}

/// Payload equality ignoring timestamps: clone the older message with the
/// newer timestamp, then compare.
fn same_payload(a: &DecodedMsg, b: &DecodedMsg) -> bool {
    let mut a = a.clone();
    set_timestamp(&mut a, b.timestamp());
    a == *b
}

fn set_timestamp(msg: &mut DecodedMsg, t: f64) {
    match msg {
        DecodedMsg::Identification(m) => m.timestamp = t,
        DecodedMsg::Position(m) => m.timestamp = t,
        DecodedMsg::Velocity(m) => m.timestamp = t,
        DecodedMsg::Altitude(m) => m.timestamp = t,
        DecodedMsg::Squawk(m) => m.timestamp = t,
        DecodedMsg::AllCall(m) => m.timestamp = t,
        DecodedMsg::Status(m) => m.timestamp = t,
        DecodedMsg::TargetState(m) => m.timestamp = t,
        DecodedMsg::OperationalStatus(m) => m.timestamp = t,
        DecodedMsg::CommB(m) => m.timestamp = t,
        DecodedMsg::Snapshot(m) => m.timestamp = t,
    }
}

// ---------------------------------------------------------------------------
// Field application helpers
// ---------------------------------------------------------------------------

fn apply_altitude(
    ac: &mut Aircraft,
    altitude_ft: Option<i32>,
    gnss: bool,
    timestamp: f64,
    stats: &mut TrackerStats,
) {
    // On the surface altitude is meaningless; on_ground is the truth.
    if ac.on_ground {
        return;
    }
    let Some(alt) = altitude_ft else { return };
    if !(-1000..=60_000).contains(&alt) {
        stats.range_errors += 1;
        return;
    }
    if gnss {
        if timestamp >= ac.times.alt_gnss {
            ac.alt_gnss_ft = Some(alt);
            ac.times.alt_gnss = timestamp;
        }
    } else if timestamp >= ac.times.alt_baro {
        ac.alt_baro_ft = Some(alt);
        ac.times.alt_baro = timestamp;
    }
}

fn apply_position(
    ac: &mut Aircraft,
    m: &PositionMsg,
    config: &TrackerConfig,
    stats: &mut TrackerStats,
    update: &mut TrackerUpdate,
) {
    let timestamp = m.timestamp;

    if timestamp >= ac.times.on_ground {
        ac.on_ground = m.is_surface;
        ac.times.on_ground = timestamp;
    }
    apply_altitude(ac, m.altitude_ft, m.gnss_altitude, timestamp, stats);
    ac.surveillance_status = Some(m.surveillance_status);

    if m.is_surface {
        if timestamp >= ac.times.velocity {
            if let Some(gs) = m.ground_speed_kts {
                ac.ground_speed_kts = Some(gs);
            }
            if let Some(trk) = m.ground_track_deg {
                ac.track_deg = Some(trk);
            }
            ac.times.velocity = timestamp;
        }
    }

    // Buffer the half-frame.
    let frame = CprFrame {
        lat: m.cpr_lat,
        lon: m.cpr_lon,
        time: timestamp,
    };
    let slot = match (m.is_surface, m.cpr_odd) {
        (false, false) => &mut ac.cpr.even,
        (false, true) => &mut ac.cpr.odd,
        (true, false) => &mut ac.cpr.surface_even,
        (true, true) => &mut ac.cpr.surface_odd,
    };
    *slot = Some(frame);

    // Resolve: global first, then local off an anchor.
    let resolved = if m.is_surface {
        resolve_surface(ac, config, stats)
    } else {
        resolve_airborne(ac, m.cpr_odd, config, stats)
    };

    let Some((lat, lon, source)) = resolved else {
        stats.cpr_incomplete += 1;
        return;
    };

    // A global fix replaces a local one unconditionally; otherwise the
    // newer observation wins.
    let global_beats_local = source == PositionSource::GlobalCpr
        && ac.position_source == Some(PositionSource::LocalCpr);
    if timestamp >= ac.times.position || global_beats_local {
        ac.lat = Some(lat);
        ac.lon = Some(lon);
        ac.position_source = Some(source);
        ac.position_time = Some(timestamp);
        ac.times.position = timestamp;
        update.position_changed = true;
    } else {
        stats.stale_writes += 1;
    }
}

fn resolve_airborne(
    ac: &Aircraft,
    latest_odd: bool,
    config: &TrackerConfig,
    stats: &mut TrackerStats,
) -> Option<(f64, f64, PositionSource)> {
    // Global decode when both parities are fresh.
    if let (Some(even), Some(odd)) = (ac.cpr.even, ac.cpr.odd) {
        if let Some((lat, lon)) = cpr::global_airborne(
            even.lat,
            even.lon,
            odd.lat,
            odd.lon,
            even.time,
            odd.time,
            config.airborne_pair_window,
        ) {
            stats.cpr_global += 1;
            return Some((lat, lon, PositionSource::GlobalCpr));
        }
    }

    // Local decode: anchor on the last fix, else the receiver location.
    let anchor = match (ac.lat, ac.lon) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => config.reference,
    };
    let (ref_lat, ref_lon) = anchor?;
    let frame = if latest_odd { ac.cpr.odd } else { ac.cpr.even }?;
    let (lat, lon) = cpr::local_decode(
        frame.lat,
        frame.lon,
        latest_odd,
        ref_lat,
        ref_lon,
        false,
        config.local_range_nm,
    )?;
    stats.cpr_local += 1;
    Some((lat, lon, PositionSource::LocalCpr))
}

fn resolve_surface(
    ac: &Aircraft,
    config: &TrackerConfig,
    stats: &mut TrackerStats,
) -> Option<(f64, f64, PositionSource)> {
    // Surface decodes always need the receiver location.
    let (ref_lat, ref_lon) = config.reference?;

    if let (Some(even), Some(odd)) = (ac.cpr.surface_even, ac.cpr.surface_odd) {
        if let Some((lat, lon)) = cpr::global_surface(
            even.lat,
            even.lon,
            odd.lat,
            odd.lon,
            even.time,
            odd.time,
            config.surface_pair_window,
            ref_lat,
            ref_lon,
        ) {
            stats.cpr_surface += 1;
            return Some((lat, lon, PositionSource::Surface));
        }
    }

    // Local decode off the freshest half-frame.
    let (frame, odd) = match (ac.cpr.surface_even, ac.cpr.surface_odd) {
        (Some(e), Some(o)) if o.time >= e.time => (o, true),
        (Some(e), _) => (e, false),
        (None, Some(o)) => (o, true),
        (None, None) => return None,
    };
    let anchor = match (ac.lat, ac.lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => (ref_lat, ref_lon),
    };
    let (lat, lon) = cpr::local_decode(
        frame.lat,
        frame.lon,
        odd,
        anchor.0,
        anchor.1,
        true,
        cpr::SURFACE_LOCAL_RANGE_NM,
    )?;
    stats.cpr_surface += 1;
    Some((lat, lon, PositionSource::Surface))
}

fn apply_commb(ac: &mut Aircraft, m: &CommBMsg, timestamp: f64) {
    use crate::bds::BdsRegister::*;
    match &m.register {
        Bds17 { .. } => {}
        Bds20 { callsign } => {
            // Comm-B identification is weaker evidence than TC 1-4; it only
            // fills an empty callsign, never replaces one.
            if ac.callsign.is_none() {
                let cs = callsign.trim_end().to_string();
                if !cs.is_empty() {
                    ac.callsign = Some(cs);
                }
            }
        }
        Bds40 {
            mcp_selected_altitude_ft,
            fms_selected_altitude_ft,
            ..
        } => {
            if timestamp >= ac.times.selected {
                if let Some(alt) = mcp_selected_altitude_ft.or(*fms_selected_altitude_ft) {
                    ac.selected_altitude_ft = Some(alt);
                    ac.times.selected = timestamp;
                }
            }
        }
        Bds50 {
            true_track_deg,
            ground_speed_kts,
            true_airspeed_kts,
            ..
        } => {
            if timestamp >= ac.times.velocity {
                if let Some(trk) = true_track_deg {
                    ac.track_deg = Some(*trk);
                }
                if let Some(gs) = ground_speed_kts {
                    ac.ground_speed_kts = Some(*gs);
                }
                if let Some(tas) = true_airspeed_kts {
                    ac.true_airspeed_kts = Some(*tas);
                }
                ac.times.velocity = timestamp;
            }
        }
        Bds60 {
            magnetic_heading_deg,
            indicated_airspeed_kts,
            mach,
            baro_vertical_rate_fpm,
            ..
        } => {
            if timestamp >= ac.times.heading {
                if let Some(hdg) = magnetic_heading_deg {
                    ac.magnetic_heading_deg = Some(*hdg);
                    ac.times.heading = timestamp;
                }
            }
            if let Some(ias) = indicated_airspeed_kts {
                ac.indicated_airspeed_kts = Some(*ias);
            }
            if let Some(m) = mach {
                ac.mach = Some(*m);
            }
            if baro_vertical_rate_fpm.is_some() && timestamp >= ac.times.vertical_rate {
                ac.vertical_rate_fpm = *baro_vertical_rate_fpm;
                ac.vertical_rate_source = Some(VerticalRateSource::Baro);
                ac.times.vertical_rate = timestamp;
            }
        }
    }
}

fn apply_snapshot(
    ac: &mut Aircraft,
    m: &SnapshotMsg,
    timestamp: f64,
    stats: &mut TrackerStats,
    update: &mut TrackerUpdate,
) {
    if let Some(cs) = &m.callsign {
        let cs = cs.trim().to_string();
        if !cs.is_empty() && ac.callsign.is_none() {
            ac.callsign = Some(cs);
            update.ident_changed = true;
        }
    }
    if let Some(sq) = &m.squawk {
        if timestamp >= ac.times.squawk {
            if ac.squawk.as_deref() != Some(sq.as_str()) {
                update.ident_changed = true;
            }
            ac.squawk = Some(sq.clone());
            ac.emergency = is_emergency_squawk(sq);
            ac.times.squawk = timestamp;
        }
    }
    if let Some(og) = m.on_ground {
        if timestamp >= ac.times.on_ground {
            ac.on_ground = og;
            ac.times.on_ground = timestamp;
        }
    }
    if let (Some(lat), Some(lon)) = (m.lat, m.lon) {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..180.0).contains(&lon) {
            stats.range_errors += 1;
        } else if timestamp >= ac.times.position {
            if ac.lat != Some(lat) || ac.lon != Some(lon) {
                update.position_changed = true;
            }
            ac.lat = Some(lat);
            ac.lon = Some(lon);
            ac.position_source = Some(PositionSource::Feed);
            ac.position_time = Some(timestamp);
            ac.times.position = timestamp;
        }
    }
    apply_altitude(ac, m.altitude_ft, false, timestamp, stats);
    if timestamp >= ac.times.velocity {
        if let Some(gs) = m.ground_speed_kts {
            if (0.0..=5000.0).contains(&gs) {
                ac.ground_speed_kts = Some(gs);
                ac.times.velocity = timestamp;
            } else {
                stats.range_errors += 1;
            }
        }
        if let Some(trk) = m.track_deg {
            if (0.0..360.0).contains(&trk) {
                ac.track_deg = Some(trk);
                ac.times.velocity = timestamp;
            } else {
                stats.range_errors += 1;
            }
        }
    }
    if m.vertical_rate_fpm.is_some() && timestamp >= ac.times.vertical_rate {
        ac.vertical_rate_fpm = m.vertical_rate_fpm;
        ac.times.vertical_rate = timestamp;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
