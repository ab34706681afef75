//! Comm-B Data Selector (BDS) register inference for DF20/21.
//!
//! A Comm-B reply does not announce which register it carries. The
//! identification trick: try to parse each well-known register and accept
//! only when every sub-field status/value pair is consistent and every
//! value falls in its legal range. A payload that parses as more than one
//! register is ambiguous and reported as nothing.
//!
//! Registers handled: 1,7 (common usage), 2,0 (identification),
//! 4,0 (selected vertical intention), 5,0 (track and turn),
//! 6,0 (heading and speed).

use serde::Serialize;

use crate::decode::decode_callsign;

/// An inferred Comm-B register with its decoded fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "bds")]
pub enum BdsRegister {
    /// BDS 1,7 — common usage GICB capability report.
    Bds17 { capabilities: u32 },
    /// BDS 2,0 — aircraft identification.
    Bds20 { callsign: String },
    /// BDS 4,0 — selected vertical intention.
    Bds40 {
        mcp_selected_altitude_ft: Option<i32>,
        fms_selected_altitude_ft: Option<i32>,
        barometric_setting_hpa: Option<f64>,
    },
    /// BDS 5,0 — track and turn report.
    Bds50 {
        roll_angle_deg: Option<f64>,
        true_track_deg: Option<f64>,
        ground_speed_kts: Option<f64>,
        track_rate_dps: Option<f64>,
        true_airspeed_kts: Option<f64>,
    },
    /// BDS 6,0 — heading and speed report.
    Bds60 {
        magnetic_heading_deg: Option<f64>,
        indicated_airspeed_kts: Option<f64>,
        mach: Option<f64>,
        baro_vertical_rate_fpm: Option<i32>,
        inertial_vertical_rate_fpm: Option<i32>,
    },
}

impl BdsRegister {
    pub fn name(&self) -> &'static str {
        match self {
            BdsRegister::Bds17 { .. } => "BDS 1,7",
            BdsRegister::Bds20 { .. } => "BDS 2,0",
            BdsRegister::Bds40 { .. } => "BDS 4,0",
            BdsRegister::Bds50 { .. } => "BDS 5,0",
            BdsRegister::Bds60 { .. } => "BDS 6,0",
        }
    }
}

// ---------------------------------------------------------------------------
// Bit helpers (1-indexed from the MB field MSB, matching the ICAO tables)
// ---------------------------------------------------------------------------

fn mb_u64(mb: &[u8]) -> Option<u64> {
    if mb.len() < 7 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[1..8].copy_from_slice(&mb[..7]);
    Some(u64::from_be_bytes(buf))
}

fn bit(mb: u64, pos: u32) -> u32 {
    ((mb >> (56 - pos)) & 1) as u32
}

fn bits(mb: u64, start: u32, end: u32) -> u32 {
    let len = end - start + 1;
    ((mb >> (56 - end)) & ((1u64 << len) - 1)) as u32
}

/// Two's-complement field of `len` bits starting at `start`.
fn bits_signed(mb: u64, start: u32, end: u32) -> i32 {
    let len = end - start + 1;
    let raw = bits(mb, start, end) as i32;
    if raw >= 1 << (len - 1) {
        raw - (1 << len)
    } else {
        raw
    }
}

/// A status/value pair is wrong when the status bit is clear but the value
/// bits are not all zero.
fn wrong_status(mb: u64, status: u32, start: u32, end: u32) -> bool {
    bit(mb, status) == 0 && bits(mb, start, end) != 0
}

// ---------------------------------------------------------------------------
// Per-register parsers
// ---------------------------------------------------------------------------

fn parse_bds17(mb: u64) -> Option<BdsRegister> {
    // Bits 25-56 are reserved and must be zero.
    if mb & 0xFFFF_FFFF != 0 {
        return None;
    }
    let capabilities = bits(mb, 1, 24);
    // Bit 7 is the BDS 2,0 capability; it is set on any real transponder.
    if capabilities & (1 << 17) == 0 {
        return None;
    }
    Some(BdsRegister::Bds17 { capabilities })
}

fn parse_bds20(mb: u64) -> Option<BdsRegister> {
    if bits(mb, 1, 8) != 0x20 {
        return None;
    }
    let callsign = decode_callsign(mb & 0xFFFF_FFFF_FFFF);
    // '#' marks characters outside the legal A-Z / 0-9 / space set.
    if callsign.contains('#') {
        return None;
    }
    Some(BdsRegister::Bds20 { callsign })
}

fn parse_bds40(mb: u64) -> Option<BdsRegister> {
    if wrong_status(mb, 1, 2, 13)
        || wrong_status(mb, 14, 15, 26)
        || wrong_status(mb, 27, 28, 39)
    {
        return None;
    }
    // Reserved bits 40-47 and 52-53.
    if bits(mb, 40, 47) != 0 || bits(mb, 52, 53) != 0 {
        return None;
    }

    let mcp = (bit(mb, 1) == 1).then(|| bits(mb, 2, 13) as i32 * 16);
    let fms = (bit(mb, 14) == 1).then(|| bits(mb, 15, 26) as i32 * 16);
    let baro = (bit(mb, 27) == 1).then(|| bits(mb, 28, 39) as f64 * 0.1 + 800.0);

    if mcp.is_none() && fms.is_none() && baro.is_none() {
        return None;
    }

    Some(BdsRegister::Bds40 {
        mcp_selected_altitude_ft: mcp,
        fms_selected_altitude_ft: fms,
        barometric_setting_hpa: baro,
    })
}

fn parse_bds50(mb: u64) -> Option<BdsRegister> {
    if wrong_status(mb, 1, 3, 11)
        || wrong_status(mb, 12, 13, 23)
        || wrong_status(mb, 24, 25, 34)
        || wrong_status(mb, 35, 36, 45)
        || wrong_status(mb, 46, 47, 56)
    {
        return None;
    }

    let roll = (bit(mb, 1) == 1).then(|| bits_signed(mb, 2, 11) as f64 * 45.0 / 256.0);
    let track = (bit(mb, 12) == 1).then(|| {
        let t = bits_signed(mb, 13, 23) as f64 * 90.0 / 512.0;
        if t < 0.0 {
            t + 360.0
        } else {
            t
        }
    });
    let gs = (bit(mb, 24) == 1).then(|| bits(mb, 25, 34) as f64 * 2.0);
    let track_rate = (bit(mb, 35) == 1).then(|| bits_signed(mb, 36, 45) as f64 * 8.0 / 256.0);
    let tas = (bit(mb, 46) == 1).then(|| bits(mb, 47, 56) as f64 * 2.0);

    // Plausibility gates: commercial traffic never rolls past 50 degrees
    // or flies faster than 500 kt TAS / 600 kt over the ground.
    if roll.is_some_and(|r| r.abs() > 50.0) {
        return None;
    }
    if gs.is_some_and(|v| v > 600.0) {
        return None;
    }
    if tas.is_some_and(|v| v > 500.0) {
        return None;
    }
    if roll.is_none() && track.is_none() && gs.is_none() && tas.is_none() {
        return None;
    }

    Some(BdsRegister::Bds50 {
        roll_angle_deg: roll,
        true_track_deg: track,
        ground_speed_kts: gs,
        track_rate_dps: track_rate,
        true_airspeed_kts: tas,
    })
}

fn parse_bds60(mb: u64) -> Option<BdsRegister> {
    if wrong_status(mb, 1, 2, 12)
        || wrong_status(mb, 13, 14, 23)
        || wrong_status(mb, 24, 25, 34)
        || wrong_status(mb, 35, 36, 45)
        || wrong_status(mb, 46, 47, 56)
    {
        return None;
    }

    let heading = (bit(mb, 1) == 1).then(|| {
        let h = bits_signed(mb, 2, 12) as f64 * 90.0 / 512.0;
        if h < 0.0 {
            h + 360.0
        } else {
            h
        }
    });
    let ias = (bit(mb, 13) == 1).then(|| bits(mb, 14, 23) as f64);
    let mach = (bit(mb, 24) == 1).then(|| bits(mb, 25, 34) as f64 * 2.048 / 512.0);
    let baro_vr = (bit(mb, 35) == 1).then(|| bits_signed(mb, 36, 45) * 32);
    let inertial_vr = (bit(mb, 46) == 1).then(|| bits_signed(mb, 47, 56) * 32);

    if ias.is_some_and(|v| v > 500.0) {
        return None;
    }
    if mach.is_some_and(|v| v > 1.0) {
        return None;
    }
    if baro_vr.is_some_and(|v| v.abs() > 6000) || inertial_vr.is_some_and(|v| v.abs() > 6000) {
        return None;
    }
    if heading.is_none() && ias.is_none() && mach.is_none() {
        return None;
    }

    Some(BdsRegister::Bds60 {
        magnetic_heading_deg: heading,
        indicated_airspeed_kts: ias,
        mach,
        baro_vertical_rate_fpm: baro_vr,
        inertial_vertical_rate_fpm: inertial_vr,
    })
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Infer the BDS register carried by a Comm-B MB field.
///
/// Returns `None` when no candidate parses or when more than one does
/// (ambiguous payloads are noise more often than data).
pub fn infer_register(mb: &[u8]) -> Option<BdsRegister> {
    let mb = mb_u64(mb)?;

    let candidates = [
        parse_bds17(mb),
        parse_bds20(mb),
        parse_bds40(mb),
        parse_bds50(mb),
        parse_bds60(mb),
    ];

    let mut found = None;
    for c in candidates.into_iter().flatten() {
        if found.is_some() {
            return None; // ambiguous
        }
        found = Some(c);
    }
    found
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hex_decode;

    fn mb_of(msg_hex: &str) -> Vec<u8> {
        hex_decode(msg_hex).unwrap()[4..11].to_vec()
    }

    #[test]
    fn test_bds20_callsign() {
        // Identification payload reused from the DF17 example: KLM1023.
        let mb = mb_of("A000083E202CC371C32CE0575D16");
        match infer_register(&mb) {
            Some(BdsRegister::Bds20 { callsign }) => {
                assert_eq!(callsign.trim_end(), "KLM1023")
            }
            other => panic!("expected BDS 2,0, got {other:?}"),
        }
    }

    #[test]
    fn test_bds40_selected_altitudes() {
        let mb = mb_of("A000029C85E42F313000007047D3");
        match infer_register(&mb) {
            Some(BdsRegister::Bds40 {
                mcp_selected_altitude_ft,
                fms_selected_altitude_ft,
                barometric_setting_hpa,
            }) => {
                assert_eq!(mcp_selected_altitude_ft, Some(3008));
                assert_eq!(fms_selected_altitude_ft, Some(3008));
                let baro = barometric_setting_hpa.unwrap();
                assert!((baro - 1020.0).abs() < 0.01, "baro ~1020, got {baro}");
            }
            other => panic!("expected BDS 4,0, got {other:?}"),
        }
    }

    #[test]
    fn test_bds50_track_and_turn() {
        let mb = mb_of("A000139381951536E024D4CCF6B5");
        match infer_register(&mb) {
            Some(BdsRegister::Bds50 {
                roll_angle_deg,
                true_track_deg,
                ground_speed_kts,
                track_rate_dps,
                true_airspeed_kts,
            }) => {
                let roll = roll_angle_deg.unwrap();
                assert!((roll - 2.1).abs() < 0.05, "roll ~2.1, got {roll}");
                let trk = true_track_deg.unwrap();
                assert!((trk - 114.258).abs() < 0.01, "track ~114.258, got {trk}");
                assert_eq!(ground_speed_kts, Some(438.0));
                let tr = track_rate_dps.unwrap();
                assert!((tr - 0.125).abs() < 0.001);
                assert_eq!(true_airspeed_kts, Some(424.0));
            }
            other => panic!("expected BDS 5,0, got {other:?}"),
        }
    }

    #[test]
    fn test_bds60_heading_and_speed() {
        let mb = mb_of("A00004128F39F91A7E27C46ADC21");
        match infer_register(&mb) {
            Some(BdsRegister::Bds60 {
                magnetic_heading_deg,
                indicated_airspeed_kts,
                mach,
                baro_vertical_rate_fpm,
                inertial_vertical_rate_fpm,
            }) => {
                let hdg = magnetic_heading_deg.unwrap();
                assert!((hdg - 42.72).abs() < 0.05, "heading ~42.72, got {hdg}");
                assert_eq!(indicated_airspeed_kts, Some(252.0));
                let m = mach.unwrap();
                assert!((m - 0.42).abs() < 0.001, "mach ~0.42, got {m}");
                assert_eq!(baro_vertical_rate_fpm, Some(-1920));
                assert_eq!(inertial_vertical_rate_fpm, Some(-1920));
            }
            other => panic!("expected BDS 6,0, got {other:?}"),
        }
    }

    #[test]
    fn test_all_zero_payload_is_ambiguous() {
        // An empty MB parses as several registers at once -> dropped.
        assert_eq!(infer_register(&[0u8; 7]), None);
    }

    #[test]
    fn test_short_mb_rejected() {
        assert_eq!(infer_register(&[0x20, 0x2C]), None);
    }

    #[test]
    fn test_bds50_overspeed_rejected() {
        // Ground speed field maxed out (1023 * 2 kt) fails the 600 kt gate.
        let mut mb = [0u8; 7];
        // status bit 24 set, value bits 25-34 all ones
        mb[2] |= 0x01; // bit 24
        mb[3] = 0xFF; // bits 25-32
        mb[4] |= 0xC0; // bits 33-34
        assert!(parse_bds50(mb_u64(&mb).unwrap()).is_none());
    }
}
