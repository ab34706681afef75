//! Compact Position Reporting — CPR decode and encode for ADS-B positions.
//!
//! Decode modes:
//! - Global airborne: even+odd frame pair within a time window, no
//!   reference needed.
//! - Global surface: same pairing, but longitude zones span 90 degrees,
//!   so a receiver reference is needed to pick among four candidates.
//! - Local: single frame + reference position. Only valid within one
//!   half-zone (~180 nm airborne); the decoder fails rather than return a
//!   fix that far out.
//!
//! Key constants:
//! - NZ = 15 (latitude zones per hemisphere)
//! - Nb = 17 (bits per coordinate)
//! - Dlat_even = 360 / (4 * NZ) = 6.0 degrees (airborne)
//! - Dlat_odd = 360 / (4 * NZ - 1) ≈ 6.1017 degrees

/// Number of latitude zones per hemisphere.
const NZ: f64 = 15.0;

/// Bits per CPR coordinate.
const NB: u32 = 17;

/// Maximum CPR value (2^17 = 131072).
const CPR_MAX: f64 = (1u32 << NB) as f64;

/// Maximum time between even/odd frames for airborne global decode (seconds).
pub const AIRBORNE_PAIR_WINDOW: f64 = 10.0;

/// Maximum pair age for surface global decode: surface targets move
/// slowly, so a longer window is safe.
pub const SURFACE_PAIR_WINDOW: f64 = 25.0;

/// Maximum distance from the reference for a local decode (nautical miles).
pub const LOCAL_RANGE_NM: f64 = 180.0;

/// Surface local decodes must sit much closer to the receiver.
pub const SURFACE_LOCAL_RANGE_NM: f64 = 45.0;

/// Number of longitude zones at a given latitude (NL function).
///
/// Ranges from 1 near the poles to 59 at the equator.
pub fn nl(lat: f64) -> i32 {
    if lat.abs() >= 87.0 {
        return 1;
    }

    let a = 1.0 - (std::f64::consts::PI / (2.0 * NZ)).cos();
    let b = (std::f64::consts::PI / 180.0 * lat.abs()).cos().powi(2);
    let nl_val = (2.0 * std::f64::consts::PI / (1.0 - a / b).acos()).floor() as i32;
    nl_val.max(1)
}

/// Modulo that always returns a non-negative result.
fn modulo(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

/// Great-circle distance in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    3440.065 * c // Earth radius in nm
}

// ---------------------------------------------------------------------------
// Global decode
// ---------------------------------------------------------------------------

/// Latitude zone counts for the two parities.
const EVEN_ZONES: f64 = 4.0 * NZ; // 60
const ODD_ZONES: f64 = 4.0 * NZ - 1.0; // 59

/// Scale a raw 17-bit CPR field to a fraction of its zone.
fn zone_fraction(raw: u32) -> f64 {
    raw as f64 / CPR_MAX
}

/// Candidate latitude for one parity given the pair's zone index `j`.
/// `None` when the result is off the planet.
fn pair_latitude(j: f64, frac: f64, zones: f64, span: f64) -> Option<f64> {
    let mut lat = (span / zones) * (modulo(j, zones) + frac);
    if lat >= 270.0 {
        lat -= 360.0;
    }
    (lat.abs() <= 90.0).then_some(lat)
}

/// Global airborne CPR decode from an even/odd frame pair.
///
/// The decoded position sits on the even parity's grid: the canonical
/// even/odd pair resolves to the even frame's position regardless of
/// which frame arrived last. Returns `None` when the pair is stale,
/// straddles a latitude zone boundary, or lands off the planet.
pub fn global_airborne(
    lat_even: u32,
    lon_even: u32,
    lat_odd: u32,
    lon_odd: u32,
    t_even: f64,
    t_odd: f64,
    window: f64,
) -> Option<(f64, f64)> {
    if (t_even - t_odd).abs() > window {
        return None;
    }

    let (ylat_e, ylon_e) = (zone_fraction(lat_even), zone_fraction(lon_even));
    let (ylat_o, ylon_o) = (zone_fraction(lat_odd), zone_fraction(lon_odd));

    // Latitude zone index implied by the pair.
    let j = (ODD_ZONES * ylat_e - EVEN_ZONES * ylat_o + 0.5).floor();

    // Both parities must fall in the same NL band, else the pair
    // straddles a zone boundary and cannot be trusted.
    let lat = pair_latitude(j, ylat_e, EVEN_ZONES, 360.0)?;
    let lat_check = pair_latitude(j, ylat_o, ODD_ZONES, 360.0)?;
    if nl(lat) != nl(lat_check) {
        return None;
    }

    // Longitude on the even grid.
    let zones = nl(lat);
    let m = (ylon_e * (zones - 1) as f64 - ylon_o * zones as f64 + 0.5).floor();
    let n = zones.max(1) as f64;
    let mut lon = (360.0 / n) * (modulo(m, n) + ylon_e);
    if lon >= 180.0 {
        lon -= 360.0;
    }

    Some((round6(lat), round6(lon)))
}

/// Global surface CPR decode.
///
/// Same pairing as airborne but on 90-degree grids, which leaves a
/// hemisphere ambiguity in latitude and four longitude candidates; the
/// candidates nearest the receiver reference win, and a longitude more
/// than 45 degrees out is rejected. Like the airborne decode, the
/// position is reported on the even parity's grid.
pub fn global_surface(
    lat_even: u32,
    lon_even: u32,
    lat_odd: u32,
    lon_odd: u32,
    t_even: f64,
    t_odd: f64,
    window: f64,
    ref_lat: f64,
    ref_lon: f64,
) -> Option<(f64, f64)> {
    if (t_even - t_odd).abs() > window {
        return None;
    }

    let (ylat_e, ylon_e) = (zone_fraction(lat_even), zone_fraction(lon_even));
    let (ylat_o, ylon_o) = (zone_fraction(lat_odd), zone_fraction(lon_odd));

    let j = (ODD_ZONES * ylat_e - EVEN_ZONES * ylat_o + 0.5).floor();

    // Hemisphere pick: the 90-degree grid repeats at lat and lat - 90.
    let near_ref = |lat: f64| {
        if (lat - ref_lat).abs() <= (lat - 90.0 - ref_lat).abs() {
            lat
        } else {
            lat - 90.0
        }
    };
    let lat = near_ref(pair_latitude(j, ylat_e, EVEN_ZONES, 90.0)?);
    let lat_check = near_ref(pair_latitude(j, ylat_o, ODD_ZONES, 90.0)?);
    if nl(lat) != nl(lat_check) {
        return None;
    }

    let zones = nl(lat);
    let m = (ylon_e * (zones - 1) as f64 - ylon_o * zones as f64 + 0.5).floor();
    let n = zones.max(1) as f64;
    let lon90 = (90.0 / n) * (modulo(m, n) + ylon_e);

    // Four longitude candidates, 90 degrees apart.
    let mut best: Option<(f64, f64)> = None;
    for k in 0..4 {
        let mut cand = lon90 + k as f64 * 90.0;
        if cand >= 180.0 {
            cand -= 360.0;
        }
        let dist = (cand - ref_lon).abs().min(360.0 - (cand - ref_lon).abs());
        if best.map_or(true, |(d, _)| dist < d) {
            best = Some((dist, cand));
        }
    }
    let (dist, lon) = best?;
    if dist > 45.0 {
        return None;
    }

    Some((round6(lat), round6(lon)))
}

// ---------------------------------------------------------------------------
// Local decode
// ---------------------------------------------------------------------------

/// Local CPR decode using a reference position.
///
/// Solves for the zone nearest the reference, then verifies the result is
/// within `range_nm` of it (typically [`LOCAL_RANGE_NM`], or
/// [`SURFACE_LOCAL_RANGE_NM`] for surface frames). Out-of-range solutions
/// come back as `None` — a wrong zone produces a plausible-looking fix
/// hundreds of miles off, so the check is the difference between failing
/// loudly and lying.
pub fn local_decode(
    cpr_lat: u32,
    cpr_lon: u32,
    cpr_odd: bool,
    ref_lat: f64,
    ref_lon: f64,
    surface: bool,
    range_nm: f64,
) -> Option<(f64, f64)> {
    let i = if cpr_odd { 1.0 } else { 0.0 };
    let span = if surface { 90.0 } else { 360.0 };
    let dlat = span / (4.0 * NZ - i);

    let cpr_lat_norm = cpr_lat as f64 / CPR_MAX;
    let cpr_lon_norm = cpr_lon as f64 / CPR_MAX;

    let j =
        (ref_lat / dlat).floor() + (modulo(ref_lat, dlat) / dlat - cpr_lat_norm + 0.5).floor();
    let mut lat = dlat * (j + cpr_lat_norm);
    if lat > 90.0 {
        lat -= 360.0;
    }

    let nl_val = nl(lat);
    let n_lon = (nl_val - i as i32).max(1);
    let dlon = span / n_lon as f64;

    let m =
        (ref_lon / dlon).floor() + (modulo(ref_lon, dlon) / dlon - cpr_lon_norm + 0.5).floor();
    let mut lon = dlon * (m + cpr_lon_norm);
    if lon >= 180.0 {
        lon -= 360.0;
    }

    if haversine_nm(lat, lon, ref_lat, ref_lon) > range_nm {
        return None;
    }

    Some((round6(lat), round6(lon)))
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a position into raw 17-bit CPR latitude/longitude.
///
/// The inverse of the decoders, used to synthesize frames in tests and to
/// exercise the round-trip bound.
pub fn encode(lat: f64, lon: f64, odd: bool, surface: bool) -> (u32, u32) {
    let i = if odd { 1.0 } else { 0.0 };
    let span = if surface { 90.0 } else { 360.0 };
    let dlat = span / (4.0 * NZ - i);

    let yz = (CPR_MAX * modulo(lat, dlat) / dlat + 0.5).floor();
    let rlat = dlat * (yz / CPR_MAX + (lat / dlat).floor());

    let n_lon = (nl(rlat) - i as i32).max(1);
    let dlon = span / n_lon as f64;
    let xz = (CPR_MAX * modulo(lon, dlon) / dlon + 0.5).floor();

    (
        (yz as i64 as u32) & 0x1FFFF,
        (xz as i64 as u32) & 0x1FFFF,
    )
}

/// Round to 6 decimal places.
fn round6(val: f64) -> f64 {
    (val * 1_000_000.0).round() / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
