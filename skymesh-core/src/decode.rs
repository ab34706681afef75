//! Decode Mode S frames into typed aircraft messages.
//!
//! Handles all Downlink Formats and ADS-B Type Codes:
//! - DF17/18 TC 1-4:   Aircraft identification (callsign)
//! - DF17/18 TC 5-8:   Surface position (movement + ground track + CPR)
//! - DF17/18 TC 9-18:  Airborne position (barometric alt + CPR)
//! - DF17/18 TC 19:    Airborne velocity (ground speed or airspeed)
//! - DF17/18 TC 20-22: Airborne position (GNSS altitude)
//! - DF17/18 TC 28:    Aircraft status (emergency)
//! - DF17/18 TC 29:    Target state and status (selected alt/heading)
//! - DF17/18 TC 31:    Operational status (version, NACp, SIL)
//! - DF0/4/16/20:      Surveillance/Comm-B altitude reply
//! - DF5/21:           Surveillance/Comm-B identity reply (squawk)
//! - DF11:             All-call reply (ICAO acquisition)
//! - DF20/21:          Comm-B register inference (see `bds`)
//!
//! The decoder is total and pure: sub-fields that fail their range checks
//! come back as `None`, never as errors, and a frame can yield more than
//! one message (a DF20 carries an altitude and possibly a BDS register).

use crate::bds;
use crate::frame::ModeFrame;
use crate::types::*;

/// A decoded message plus transport metadata, as consumed by the tracker.
/// `df` is `None` for synthetic records from a JSON snapshot feeder.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub msg: DecodedMsg,
    pub df: Option<u8>,
    pub source: SourceId,
    pub source_kind: SourceKind,
}

// ---------------------------------------------------------------------------
// Altitude decoding
// ---------------------------------------------------------------------------

/// Decode 12-bit altitude code from DF17 airborne position.
///
/// The Q-bit (bit 4) selects the encoding mode:
/// - Q=1: 25-ft resolution
/// - Q=0: 100-ft Gillham gray code
pub fn decode_altitude(alt_code: u32) -> Option<i32> {
    if alt_code == 0 {
        return None;
    }

    let q_bit = (alt_code >> 4) & 1;

    if q_bit == 1 {
        let n = ((alt_code >> 5) << 4) | (alt_code & 0x0F);
        Some(n as i32 * 25 - 1000)
    } else {
        decode_gillham_altitude(alt_code)
    }
}

/// Decode 100-ft Gillham gray code altitude.
fn decode_gillham_altitude(alt_code: u32) -> Option<i32> {
    let c1 = (alt_code >> 12) & 1;
    let a1 = (alt_code >> 11) & 1;
    let c2 = (alt_code >> 10) & 1;
    let a2 = (alt_code >> 9) & 1;
    let c4 = (alt_code >> 8) & 1;
    let a4 = (alt_code >> 7) & 1;
    // bit 6 = M (metric, zero here)
    let b1 = (alt_code >> 5) & 1;
    // bit 4 = Q (zero if we got here)
    let b2 = (alt_code >> 3) & 1;
    let _d2 = (alt_code >> 2) & 1; // D digit not transmitted in Mode S
    let b4 = (alt_code >> 1) & 1;
    let _d4 = alt_code & 1;

    // 100-ft component from the C digit (Gray code)
    let c_digit = c4 * 4 + c2 * 2 + c1;
    let mut c_bin = c_digit;
    c_bin ^= c_bin >> 2;
    c_bin ^= c_bin >> 1;

    if c_bin == 0 || c_bin >= 6 {
        return None;
    }

    // 500-ft component: Gray code from combined A and B digits
    let ab_gray = (a4 * 4 + a2 * 2 + a1) << 3 | (b4 * 4 + b2 * 2 + b1);
    let mut ab_bin = ab_gray;
    ab_bin ^= ab_bin >> 4;
    ab_bin ^= ab_bin >> 2;
    ab_bin ^= ab_bin >> 1;

    let altitude = ab_bin as i32 * 500 + c_bin as i32 * 100 - 1200;

    if !(-1200..=126750).contains(&altitude) {
        return None;
    }

    Some(altitude)
}

/// Decode 13-bit altitude code from DF0/4/16/20.
///
/// M-bit and Q-bit select the mode:
/// - M=0, Q=1: 25-ft increments
/// - M=0, Q=0: 100-ft Gillham gray code
/// - M=1: metric altitude (rare, not implemented)
pub fn decode_altitude_13bit(alt_code_13: u32) -> Option<i32> {
    if alt_code_13 == 0 {
        return None;
    }

    let m_bit = (alt_code_13 >> 6) & 1;
    let q_bit = (alt_code_13 >> 4) & 1;

    if m_bit == 1 {
        return None;
    }

    if q_bit == 1 {
        let n =
            ((alt_code_13 & 0x1F80) >> 2) | ((alt_code_13 & 0x0020) >> 1) | (alt_code_13 & 0x000F);
        Some(n as i32 * 25 - 1000)
    } else {
        decode_gillham_altitude(alt_code_13)
    }
}

// ---------------------------------------------------------------------------
// Squawk decoding
// ---------------------------------------------------------------------------

/// Decode 13-bit identity code into 4-digit octal squawk.
///
/// Bits are labeled C1 A1 C2 A2 C4 A4 _ B1 D1 B2 D2 B4 D4
pub fn decode_squawk(id_code: u32) -> String {
    let c1 = (id_code >> 12) & 1;
    let a1 = (id_code >> 11) & 1;
    let c2 = (id_code >> 10) & 1;
    let a2 = (id_code >> 9) & 1;
    let c4 = (id_code >> 8) & 1;
    let a4 = (id_code >> 7) & 1;
    // bit 6 is spare
    let b1 = (id_code >> 5) & 1;
    let d1 = (id_code >> 4) & 1;
    let b2 = (id_code >> 3) & 1;
    let d2 = (id_code >> 2) & 1;
    let b4 = (id_code >> 1) & 1;
    let d4 = id_code & 1;

    let a = a4 * 4 + a2 * 2 + a1;
    let b = b4 * 4 + b2 * 2 + b1;
    let c = c4 * 4 + c2 * 2 + c1;
    let d = d4 * 4 + d2 * 2 + d1;

    format!("{a}{b}{c}{d}")
}

// ---------------------------------------------------------------------------
// Callsign coding
// ---------------------------------------------------------------------------

/// Map one 6-bit callsign code to its character. Codes outside the ICAO
/// set (A-Z at 1-26, space at 32, digits at 48-57) render as '#', which
/// downstream code treats as "not a real identification".
fn callsign_char(code: u32) -> char {
    match code {
        1..=26 => (b'A' + code as u8 - 1) as char,
        32 => ' ',
        48..=57 => (b'0' + code as u8 - 48) as char,
        _ => '#',
    }
}

fn callsign_code(c: u8) -> Option<u64> {
    match c {
        b'A'..=b'Z' => Some((c - b'A' + 1) as u64),
        b' ' => Some(32),
        b'0'..=b'9' => Some(c as u64),
        _ => None,
    }
}

/// Decode a 48-bit callsign field into 8 characters.
pub fn decode_callsign(bits48: u64) -> String {
    (0..8)
        .map(|i| callsign_char(((bits48 >> (42 - i * 6)) & 0x3F) as u32))
        .collect()
}

/// Encode an 8-character callsign into the 48-bit field. Inverse of
/// [`decode_callsign`] for every valid field; `None` for characters
/// outside A-Z, 0-9, space.
pub fn encode_callsign(callsign: &str) -> Option<u64> {
    if callsign.len() != 8 {
        return None;
    }
    let mut bits48 = 0u64;
    for (i, c) in callsign.bytes().enumerate() {
        bits48 |= callsign_code(c)? << (42 - i * 6);
    }
    Some(bits48)
}

// ---------------------------------------------------------------------------
// Surface movement
// ---------------------------------------------------------------------------

/// Decode the 7-bit surface movement field into ground speed (knots).
///
/// Non-linear: resolution tightens near zero. Value 0 means "no
/// information", 124 means ">= 175 kt".
pub fn decode_movement(movement: u32) -> Option<f64> {
    Some(match movement {
        0 => return None,
        1 => 0.0,
        2..=8 => 0.125 + (movement - 2) as f64 * 0.125,
        9..=12 => 1.0 + (movement - 9) as f64 * 0.25,
        13..=38 => 2.0 + (movement - 13) as f64 * 0.5,
        39..=93 => 15.0 + (movement - 39) as f64,
        94..=108 => 70.0 + (movement - 94) as f64 * 2.0,
        109..=123 => 100.0 + (movement - 109) as f64 * 5.0,
        124 => 175.0,
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Extended squitter payloads
// ---------------------------------------------------------------------------

fn me_bits(frame: &ModeFrame) -> Option<u64> {
    let me = frame.me();
    if me.len() < 7 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[1..8].copy_from_slice(me);
    Some(u64::from_be_bytes(buf))
}

/// Decode TC 1-4: Aircraft identification (callsign).
pub fn decode_identification(frame: &ModeFrame) -> Option<IdentificationMsg> {
    let tc = frame.type_code()?;
    if !(1..=4).contains(&tc) {
        return None;
    }

    let bits = me_bits(frame)?;
    let category = ((bits >> 48) & 0x07) as u8;

    Some(IdentificationMsg {
        icao: frame.icao,
        callsign: decode_callsign(bits & 0xFFFF_FFFF_FFFF),
        category,
        timestamp: frame.timestamp,
    })
}

/// Decode TC 5-8 (surface) or TC 9-18/20-22 (airborne position).
pub fn decode_position(frame: &ModeFrame) -> Option<PositionMsg> {
    let tc = frame.type_code()?;

    let is_surface = (5..=8).contains(&tc);
    let is_airborne_baro = (9..=18).contains(&tc);
    let is_airborne_gnss = (20..=22).contains(&tc);

    if !is_surface && !is_airborne_baro && !is_airborne_gnss {
        return None;
    }

    let bits = me_bits(frame)?;

    let (surveillance_status, altitude_ft, ground_speed_kts, ground_track_deg) = if is_surface {
        let movement = ((bits >> 44) & 0x7F) as u32;
        let track_valid = (bits >> 43) & 1 == 1;
        let track_raw = ((bits >> 36) & 0x7F) as u32;
        let track = track_valid.then(|| track_raw as f64 * 360.0 / 128.0);
        (0u8, None, decode_movement(movement), track)
    } else {
        let ss = ((bits >> 49) & 0x03) as u8;
        let alt_code = ((bits >> 36) & 0x0FFF) as u32;
        (ss, decode_altitude(alt_code), None, None)
    };

    let cpr_odd = ((bits >> 34) & 1) == 1;
    let cpr_lat = ((bits >> 17) & 0x1FFFF) as u32;
    let cpr_lon = (bits & 0x1FFFF) as u32;

    Some(PositionMsg {
        icao: frame.icao,
        altitude_ft,
        gnss_altitude: is_airborne_gnss,
        cpr_lat,
        cpr_lon,
        cpr_odd,
        surveillance_status,
        is_surface,
        ground_speed_kts,
        ground_track_deg,
        timestamp: frame.timestamp,
    })
}

/// Decode TC 19: Airborne velocity.
pub fn decode_velocity(frame: &ModeFrame) -> Option<VelocityMsg> {
    if frame.type_code()? != 19 {
        return None;
    }

    let bits = me_bits(frame)?;
    let subtype = ((bits >> 48) & 0x07) as u8;

    // Subtypes 2 and 4 are the supersonic encodings: 4x unit.
    let unit = if subtype == 2 || subtype == 4 { 4.0 } else { 1.0 };

    let (speed, heading, speed_type) = match subtype {
        1 | 2 => {
            let ew_dir = (bits >> 42) & 1; // 0=East, 1=West
            let ew_vel = ((bits >> 32) & 0x3FF) as i32 - 1;
            let ns_dir = (bits >> 31) & 1; // 0=North, 1=South
            let ns_vel = ((bits >> 21) & 0x3FF) as i32 - 1;

            if ew_vel >= 0 && ns_vel >= 0 {
                let vx = if ew_dir == 1 { -ew_vel } else { ew_vel } as f64 * unit;
                let vy = if ns_dir == 1 { -ns_vel } else { ns_vel } as f64 * unit;
                let spd = (vx * vx + vy * vy).sqrt();
                let trk = vx.atan2(vy).to_degrees().rem_euclid(360.0);
                (Some(round2(spd)), Some(round2(trk)), SpeedType::Ground)
            } else {
                (None, None, SpeedType::Ground)
            }
        }
        3 | 4 => {
            let hdg_available = (bits >> 42) & 1;
            let hdg_raw = ((bits >> 32) & 0x3FF) as u32;
            let airspeed_type = (bits >> 31) & 1; // 0=IAS, 1=TAS
            let speed_raw = ((bits >> 21) & 0x3FF) as i32;

            let heading = (hdg_available == 1)
                .then(|| round2(hdg_raw as f64 * 360.0 / 1024.0));
            let speed = (speed_raw > 0).then(|| (speed_raw - 1) as f64 * unit);
            let st = if airspeed_type == 1 {
                SpeedType::TAS
            } else {
                SpeedType::IAS
            };
            (speed, heading, st)
        }
        _ => return None,
    };

    let vr_source = if (bits >> 20) & 1 == 0 {
        VerticalRateSource::Baro
    } else {
        VerticalRateSource::Gnss
    };
    let vr_sign = (bits >> 19) & 1; // 0=up, 1=down
    let vr_val = ((bits >> 10) & 0x1FF) as i32 - 1;
    let vertical_rate_fpm = (vr_val >= 0).then(|| {
        let rate = vr_val * 64;
        if vr_sign == 1 {
            -rate
        } else {
            rate
        }
    });

    // GNSS height above/below barometric altitude, 25 ft steps.
    let delta_sign = (bits >> 7) & 1;
    let delta_raw = (bits & 0x7F) as i32 - 1;
    let gnss_baro_delta_ft = (delta_raw >= 0).then(|| {
        let d = delta_raw * 25;
        if delta_sign == 1 {
            -d
        } else {
            d
        }
    });

    Some(VelocityMsg {
        icao: frame.icao,
        speed_kts: speed,
        heading_deg: heading,
        speed_type,
        vertical_rate_fpm,
        vertical_rate_source: vr_source,
        gnss_baro_delta_ft,
        timestamp: frame.timestamp,
    })
}

/// Decode TC 28 subtype 1: emergency / priority status.
pub fn decode_status(frame: &ModeFrame) -> Option<StatusMsg> {
    if frame.type_code()? != 28 {
        return None;
    }
    let bits = me_bits(frame)?;

    let subtype = ((bits >> 48) & 0x07) as u8;
    if subtype != 1 {
        return None;
    }

    let emergency_state = ((bits >> 45) & 0x07) as u8;
    let id_code = ((bits >> 32) & 0x1FFF) as u32;
    let squawk = (id_code != 0).then(|| decode_squawk(id_code));

    Some(StatusMsg {
        icao: frame.icao,
        emergency_state,
        squawk,
        timestamp: frame.timestamp,
    })
}

/// Decode TC 29 subtype 1: target state and status (selected altitude,
/// barometric setting, selected heading).
pub fn decode_target_state(frame: &ModeFrame) -> Option<TargetStateMsg> {
    if frame.type_code()? != 29 {
        return None;
    }
    let bits = me_bits(frame)?;

    let subtype = ((bits >> 49) & 0x03) as u8;
    if subtype != 1 {
        return None;
    }

    let altitude_from_fms = (bits >> 47) & 1 == 1;
    let alt_raw = ((bits >> 36) & 0x7FF) as i32;
    let selected_altitude_ft = (alt_raw > 0).then(|| (alt_raw - 1) * 32);

    let baro_raw = ((bits >> 27) & 0x1FF) as i32;
    let barometric_setting_hpa = (baro_raw > 0).then(|| (baro_raw - 1) as f64 * 0.8 + 800.0);

    let hdg_valid = (bits >> 26) & 1 == 1;
    let hdg_raw = ((bits >> 17) & 0x1FF) as u32;
    let selected_heading_deg = hdg_valid.then(|| round2(hdg_raw as f64 * 180.0 / 256.0));

    Some(TargetStateMsg {
        icao: frame.icao,
        selected_altitude_ft,
        altitude_from_fms,
        selected_heading_deg,
        barometric_setting_hpa,
        timestamp: frame.timestamp,
    })
}

/// Decode TC 31: operational status.
pub fn decode_operational_status(frame: &ModeFrame) -> Option<OperationalStatusMsg> {
    if frame.type_code()? != 31 {
        return None;
    }
    let bits = me_bits(frame)?;

    let subtype = ((bits >> 48) & 0x07) as u8;
    if subtype > 1 {
        return None;
    }
    let is_surface = subtype == 1;

    let adsb_version = ((bits >> 13) & 0x07) as u8;
    let nic_supplement = ((bits >> 12) & 1) as u8;
    let nac_p = ((bits >> 8) & 0x0F) as u8;
    let sil = ((bits >> 4) & 0x03) as u8;

    Some(OperationalStatusMsg {
        icao: frame.icao,
        adsb_version,
        nac_p: (nac_p <= 11).then_some(nac_p),
        nic_supplement,
        sil: Some(sil),
        is_surface,
        timestamp: frame.timestamp,
    })
}

// ---------------------------------------------------------------------------
// Surveillance replies
// ---------------------------------------------------------------------------

/// Flight status field of DF4/5/20/21: values 1 and 3 mean on ground.
fn flight_status_on_ground(frame: &ModeFrame) -> bool {
    matches!(frame.raw[0] & 0x07, 1 | 3)
}

/// Decode DF0/4/16/20: altitude from surveillance replies.
pub fn decode_df_altitude(frame: &ModeFrame) -> Option<AltitudeMsg> {
    if !matches!(frame.df, 0 | 4 | 16 | 20) {
        return None;
    }
    if frame.raw.len() < 4 {
        return None;
    }

    let alt_code = ((frame.raw[2] as u32 & 0x1F) << 8) | frame.raw[3] as u32;
    let on_ground = match frame.df {
        4 | 20 => flight_status_on_ground(frame),
        // DF0/16 carry the VS bit instead of a flight status field.
        _ => frame.raw[0] & 0x04 != 0,
    };

    Some(AltitudeMsg {
        icao: frame.icao,
        altitude_ft: decode_altitude_13bit(alt_code),
        on_ground,
        timestamp: frame.timestamp,
    })
}

/// Decode DF5/21: identity (squawk) from surveillance replies.
pub fn decode_df_squawk(frame: &ModeFrame) -> Option<SquawkMsg> {
    if !matches!(frame.df, 5 | 21) {
        return None;
    }
    if frame.raw.len() < 4 {
        return None;
    }

    let id_code = ((frame.raw[2] as u32 & 0x1F) << 8) | frame.raw[3] as u32;

    Some(SquawkMsg {
        icao: frame.icao,
        squawk: decode_squawk(id_code),
        on_ground: flight_status_on_ground(frame),
        timestamp: frame.timestamp,
    })
}

// ---------------------------------------------------------------------------
// Main decode entry point
// ---------------------------------------------------------------------------

/// Decode a validated frame into zero or more typed messages.
///
/// Most frames yield exactly one message. DF20/21 can yield two: the
/// surveillance altitude/identity plus an inferred Comm-B register.
/// An empty result means the DF/TC combination carried nothing we track.
pub fn decode(frame: &ModeFrame) -> Vec<Decoded> {
    let mut out = Vec::with_capacity(1);
    let mut push = |msg: DecodedMsg| {
        out.push(Decoded {
            msg,
            df: Some(frame.df),
            source: frame.source,
            source_kind: frame.source_kind,
        })
    };

    match frame.df {
        17 | 18 => {
            if let Some(tc) = frame.type_code() {
                match tc {
                    1..=4 => {
                        if let Some(m) = decode_identification(frame) {
                            push(DecodedMsg::Identification(m));
                        }
                    }
                    5..=18 | 20..=22 => {
                        if let Some(m) = decode_position(frame) {
                            push(DecodedMsg::Position(m));
                        }
                    }
                    19 => {
                        if let Some(m) = decode_velocity(frame) {
                            push(DecodedMsg::Velocity(m));
                        }
                    }
                    28 => {
                        if let Some(m) = decode_status(frame) {
                            push(DecodedMsg::Status(m));
                        }
                    }
                    29 => {
                        if let Some(m) = decode_target_state(frame) {
                            push(DecodedMsg::TargetState(m));
                        }
                    }
                    31 => {
                        if let Some(m) = decode_operational_status(frame) {
                            push(DecodedMsg::OperationalStatus(m));
                        }
                    }
                    _ => {}
                }
            }
        }
        11 => push(DecodedMsg::AllCall(AllCallMsg {
            icao: frame.icao,
            timestamp: frame.timestamp,
        })),
        0 | 4 | 16 | 20 => {
            if let Some(m) = decode_df_altitude(frame) {
                push(DecodedMsg::Altitude(m));
            }
            if frame.df == 20 {
                if let Some(reg) = bds::infer_register(frame.mb()) {
                    push(DecodedMsg::CommB(CommBMsg {
                        icao: frame.icao,
                        register: reg,
                        timestamp: frame.timestamp,
                    }));
                }
            }
        }
        5 | 21 => {
            if let Some(m) = decode_df_squawk(frame) {
                push(DecodedMsg::Squawk(m));
            }
            if frame.df == 21 {
                if let Some(reg) = bds::infer_register(frame.mb()) {
                    push(DecodedMsg::CommB(CommBMsg {
                        icao: frame.icao,
                        register: reg,
                        timestamp: frame.timestamp,
                    }));
                }
            }
        }
        _ => {}
    }

    out
}

/// Round to 2 decimal places.
pub(crate) fn round2(val: f64) -> f64 {
    (val * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_hex_uncached;

    fn parse(hex: &str) -> ModeFrame {
        parse_hex_uncached(hex, 1.0).expect("valid frame")
    }

    // -- Identification --

    #[test]
    fn test_decode_identification_klm() {
        let frame = parse("8D4840D6202CC371C32CE0576098");
        let msg = decode_identification(&frame).unwrap();
        assert_eq!(msg.callsign, "KLM1023 ");
        assert_eq!(msg.icao.to_string(), "4840D6");
    }

    #[test]
    fn test_decode_identification_ezy() {
        let frame = parse("8D406B902015A678D4D220AA4BDA");
        let msg = decode_identification(&frame).unwrap();
        assert_eq!(msg.callsign, "EZY85MH ");
        assert_eq!(msg.icao.to_string(), "406B90");
    }

    #[test]
    fn test_callsign_roundtrip_known() {
        for cs in ["KLM1023 ", "EZY85MH ", "N123AB  ", "        "] {
            let bits = encode_callsign(cs).unwrap();
            assert_eq!(decode_callsign(bits), cs, "roundtrip for {cs:?}");
        }
    }

    #[test]
    fn test_callsign_roundtrip_all_valid_chars() {
        // Every valid character in every position survives a roundtrip.
        let alphabet: Vec<char> = ('A'..='Z').chain('0'..='9').chain([' ']).collect();
        for &c in &alphabet {
            let cs: String = std::iter::repeat(c).take(8).collect();
            let bits = encode_callsign(&cs).unwrap();
            assert_eq!(decode_callsign(bits), cs);
        }
    }

    #[test]
    fn test_encode_callsign_rejects_invalid() {
        assert!(encode_callsign("KLM10").is_none()); // wrong length
        assert!(encode_callsign("KLM-1023").is_none()); // bad char
    }

    // -- Position --

    #[test]
    fn test_decode_position_even() {
        let frame = parse("8D40621D58C382D690C8AC2863A7");
        let msg = decode_position(&frame).unwrap();
        assert_eq!(msg.icao.to_string(), "40621D");
        assert_eq!(msg.altitude_ft, Some(38000));
        assert!(!msg.cpr_odd);
        assert!(!msg.is_surface);
        assert!(!msg.gnss_altitude);
        assert_eq!(msg.cpr_lat, 93000);
        assert_eq!(msg.cpr_lon, 51372);
    }

    #[test]
    fn test_decode_position_odd() {
        let frame = parse("8D40621D58C386435CC412692AD6");
        let msg = decode_position(&frame).unwrap();
        assert_eq!(msg.altitude_ft, Some(38000));
        assert!(msg.cpr_odd);
        assert_eq!(msg.cpr_lat, 74158);
        assert_eq!(msg.cpr_lon, 50194);
    }

    #[test]
    fn test_decode_surface_position() {
        // TC=7 surface position frame ("the 1090MHz riddle" example).
        let frame = parse("8C4841753A9A153237AEF0F275BE");
        let msg = decode_position(&frame).unwrap();
        assert!(msg.is_surface);
        assert!(msg.altitude_ft.is_none());
        // movement 41 -> 15 + (41-39) = 17 kt
        assert_eq!(msg.ground_speed_kts, Some(17.0));
        // track raw 33 -> 33 * 2.8125 = 92.8125 deg
        assert_eq!(msg.ground_track_deg, Some(92.8125));
    }

    // -- Movement table --

    #[test]
    fn test_decode_movement_table() {
        assert_eq!(decode_movement(0), None);
        assert_eq!(decode_movement(1), Some(0.0));
        assert_eq!(decode_movement(2), Some(0.125));
        assert_eq!(decode_movement(9), Some(1.0));
        assert_eq!(decode_movement(13), Some(2.0));
        assert_eq!(decode_movement(39), Some(15.0));
        assert_eq!(decode_movement(94), Some(70.0));
        assert_eq!(decode_movement(109), Some(100.0));
        assert_eq!(decode_movement(124), Some(175.0));
        assert_eq!(decode_movement(125), None);
    }

    // -- Velocity --

    #[test]
    fn test_decode_velocity_ground() {
        let frame = parse("8D485020994409940838175B284F");
        let msg = decode_velocity(&frame).unwrap();
        assert_eq!(msg.icao.to_string(), "485020");

        let speed = msg.speed_kts.unwrap();
        assert!((speed - 159.0).abs() < 1.0, "speed ~159, got {speed}");

        let heading = msg.heading_deg.unwrap();
        assert!(
            (heading - 182.88).abs() < 0.1,
            "track ~182.88, got {heading}"
        );

        assert_eq!(msg.vertical_rate_fpm, Some(-832));
        assert_eq!(msg.vertical_rate_source, VerticalRateSource::Baro);
        assert_eq!(msg.speed_type, SpeedType::Ground);
    }

    #[test]
    fn test_decode_velocity_airspeed() {
        // TC19 subtype 3 (airspeed + magnetic heading).
        let frame = parse("8DA05F219B06B6AF189400CBC33F");
        let msg = decode_velocity(&frame).unwrap();
        assert_eq!(msg.speed_type, SpeedType::TAS);
        let heading = msg.heading_deg.unwrap();
        assert!((heading - 244.0).abs() < 1.0, "heading ~244, got {heading}");
        let speed = msg.speed_kts.unwrap();
        assert!((speed - 375.0).abs() < 1.0, "TAS ~375, got {speed}");
    }

    // -- Altitude --

    #[test]
    fn test_decode_altitude_25ft_exact_value() {
        // alt_code 0xC38: Q-bit set, n = 1560, 1560*25 - 1000 = 38000
        assert_eq!(decode_altitude(0xC38), Some(38000));
    }

    #[test]
    fn test_decode_altitude_zero() {
        assert_eq!(decode_altitude(0), None);
        assert_eq!(decode_altitude_13bit(0), None);
    }

    #[test]
    fn test_decode_gillham_range() {
        // All valid Gillham codes produce in-range altitudes.
        let mut valid = 0;
        for code in 0..0x1000u32 {
            if (code >> 4) & 1 == 1 {
                continue; // skip 25ft mode
            }
            if let Some(alt) = decode_altitude(code) {
                assert!(
                    (-1200..=126750).contains(&alt),
                    "code {code:#x} gave {alt}"
                );
                valid += 1;
            }
        }
        assert!(valid > 0);
    }

    // -- Squawk --

    #[test]
    fn test_decode_squawk_emergency_codes() {
        // Bit layout: C1 A1 C2 A2 C4 A4 _ B1 D1 B2 D2 B4 D4
        assert_eq!(decode_squawk(0b0_1_0_1_0_1_0_1_0_0_0_1_0), "7500");
        assert_eq!(decode_squawk(0b0_1_0_1_0_1_0_0_0_1_0_1_0), "7600");
        assert_eq!(decode_squawk(0b0_1_0_1_0_1_0_1_0_1_0_1_0), "7700");
    }

    // -- Status / target state / operational status --

    /// Build a DF17 frame around a hand-crafted ME field, skipping CRC.
    /// The decoder trusts validated frames, so forged payloads are fine
    /// for exercising field extraction.
    fn forge_me(me: [u8; 7]) -> ModeFrame {
        let mut raw = vec![0x8Du8, 0x48, 0x40, 0xD6];
        raw.extend_from_slice(&me);
        raw.extend_from_slice(&[0, 0, 0]);
        ModeFrame {
            df: 17,
            icao: Icao([0x48, 0x40, 0xD6]),
            raw,
            timestamp: 1.0,
            source: 0,
            source_kind: SourceKind::RawFile,
            signal_level: None,
            corrected: false,
        }
    }

    #[test]
    fn test_decode_status_emergency() {
        // TC28 subtype 1, emergency state 5 (unlawful interference),
        // mode A field encoding 7700.
        let frame = forge_me([0xE1, 0xAA, 0xAA, 0x00, 0x00, 0x00, 0x00]);
        let msg = decode_status(&frame).unwrap();
        assert_eq!(msg.emergency_state, 5);
        assert_eq!(msg.squawk.as_deref(), Some("7700"));
    }

    #[test]
    fn test_decode_target_state_selected_altitude() {
        // TC29 subtype 1 ("the 1090MHz riddle" target state example).
        let frame = parse("8DA05629EA21485CBF3F8CADAEEB");
        let msg = decode_target_state(&frame).unwrap();
        assert_eq!(msg.selected_altitude_ft, Some(16992));
        assert!(!msg.altitude_from_fms);
        let hdg = msg.selected_heading_deg.unwrap();
        assert!((hdg - 66.8).abs() < 0.2, "selected heading ~66.8, got {hdg}");
        let baro = msg.barometric_setting_hpa.unwrap();
        assert!((baro - 1012.8).abs() < 0.1, "baro ~1012.8, got {baro}");
    }

    #[test]
    fn test_decode_operational_status_fields() {
        // TC31 subtype 0, version 2, NACp 10, SIL 3.
        let frame = forge_me([0xF8, 0x00, 0x00, 0x00, 0x00, 0x4A, 0x30]);
        let msg = decode_operational_status(&frame).unwrap();
        assert!(!msg.is_surface);
        assert_eq!(msg.adsb_version, 2);
        assert_eq!(msg.nac_p, Some(10));
        assert_eq!(msg.sil, Some(3));
    }

    // -- Full decode routing --

    #[test]
    fn test_decode_routes_identification() {
        let msgs = decode(&parse("8D4840D6202CC371C32CE0576098"));
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0].msg, DecodedMsg::Identification(_)));
        assert_eq!(msgs[0].df, Some(17));
    }

    #[test]
    fn test_decode_routes_position() {
        let msgs = decode(&parse("8D40621D58C382D690C8AC2863A7"));
        assert!(matches!(msgs[0].msg, DecodedMsg::Position(_)));
    }

    #[test]
    fn test_decode_routes_velocity() {
        let msgs = decode(&parse("8D485020994409940838175B284F"));
        assert!(matches!(msgs[0].msg, DecodedMsg::Velocity(_)));
    }

    #[test]
    fn test_decode_unknown_tc_yields_nothing() {
        // TC 23-27 are reserved; decoder emits no message but no error.
        let frame = parse("8D4840D6202CC371C32CE0576098");
        let mut raw = frame.raw.clone();
        raw[4] = 23 << 3; // force TC 23 (breaks CRC, but decode trusts the frame)
        let forged = ModeFrame { raw, ..frame };
        assert!(decode(&forged).is_empty());
    }
}
