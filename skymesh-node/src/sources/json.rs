//! JSON snapshot feeder: periodic GET of a dump1090-style
//! `aircraft.json`, mapped field-by-field into synthetic pre-decoded
//! messages.

use serde::Deserialize;

use skymesh_core::decode::Decoded;
use skymesh_core::types::{DecodedMsg, Icao, SnapshotMsg, SourceId, SourceKind};

/// Top-level snapshot object.
#[derive(Debug, Deserialize)]
pub struct SnapshotJson {
    pub now: f64,
    #[serde(default)]
    pub aircraft: Vec<AircraftJson>,
}

/// One aircraft record. Unknown fields are ignored on purpose — feeders
/// disagree wildly about extras.
#[derive(Debug, Deserialize)]
pub struct AircraftJson {
    pub hex: String,
    pub flight: Option<String>,
    /// Number of feet, or the literal string "ground".
    #[serde(default)]
    pub alt_baro: Option<serde_json::Value>,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub baro_rate: Option<i32>,
    pub squawk: Option<String>,
    /// Seconds since this aircraft was last heard.
    #[serde(default)]
    pub seen: f64,
}

/// Map a snapshot into tracker-ready messages. Records with unparseable
/// ICAO addresses are skipped and counted by the caller.
pub fn map_snapshot(snap: &SnapshotJson, source: SourceId) -> Vec<Decoded> {
    snap.aircraft
        .iter()
        .filter_map(|a| map_aircraft(a, snap.now, source))
        .collect()
}

fn map_aircraft(a: &AircraftJson, now: f64, source: SourceId) -> Option<Decoded> {
    let icao = Icao::parse_hex(&a.hex)?;

    let (altitude_ft, on_ground) = match &a.alt_baro {
        Some(serde_json::Value::String(s)) if s == "ground" => (None, Some(true)),
        Some(serde_json::Value::Number(n)) => (
            n.as_f64().map(|v| v as i32),
            Some(false),
        ),
        _ => (None, None),
    };

    let msg = SnapshotMsg {
        icao,
        callsign: a
            .flight
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
        lat: a.lat,
        lon: a.lon,
        altitude_ft,
        ground_speed_kts: a.gs,
        track_deg: a.track,
        vertical_rate_fpm: a.baro_rate,
        squawk: a.squawk.clone(),
        on_ground,
        timestamp: now - a.seen,
    };

    Some(Decoded {
        msg: DecodedMsg::Snapshot(msg),
        df: None,
        source,
        source_kind: SourceKind::JsonPoll,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "now": 1700000100.5,
        "aircraft": [
            {
                "hex": "4840d6",
                "flight": "KLM1023 ",
                "alt_baro": 38000,
                "gs": 447.0,
                "track": 183.0,
                "lat": 52.2572,
                "lon": 3.9194,
                "baro_rate": -832,
                "squawk": "1000",
                "seen": 0.5
            },
            { "hex": "abc123", "alt_baro": "ground", "seen": 2.0 },
            { "hex": "not-hex", "seen": 0.1 }
        ]
    }"#;

    #[test]
    fn test_map_snapshot() {
        let snap: SnapshotJson = serde_json::from_str(SAMPLE).unwrap();
        let msgs = map_snapshot(&snap, 3);

        // The bad-hex record is dropped.
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].source, 3);
        assert_eq!(msgs[0].source_kind, SourceKind::JsonPoll);
        assert!(msgs[0].df.is_none());

        let DecodedMsg::Snapshot(m) = &msgs[0].msg else {
            panic!("expected snapshot message");
        };
        assert_eq!(m.callsign.as_deref(), Some("KLM1023"));
        assert_eq!(m.altitude_ft, Some(38000));
        assert_eq!(m.on_ground, Some(false));
        assert_eq!(m.lat, Some(52.2572));
        assert_eq!(m.vertical_rate_fpm, Some(-832));
        // timestamp backdated by `seen`
        assert!((m.timestamp - 1_700_000_100.0).abs() < 0.001);
    }

    #[test]
    fn test_ground_altitude_string() {
        let snap: SnapshotJson = serde_json::from_str(SAMPLE).unwrap();
        let msgs = map_snapshot(&snap, 0);
        let DecodedMsg::Snapshot(m) = &msgs[1].msg else {
            panic!("expected snapshot message");
        };
        assert_eq!(m.altitude_ft, None);
        assert_eq!(m.on_ground, Some(true));
    }

    #[test]
    fn test_empty_snapshot() {
        let snap: SnapshotJson = serde_json::from_str(r#"{"now": 1.0}"#).unwrap();
        assert!(map_snapshot(&snap, 0).is_empty());
    }
}
