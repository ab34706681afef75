//! Coordinate formatting for alert messages.
//!
//! LoRa airtime is precious, so the operator picks how many bytes a
//! position costs: full decimal degrees, a compact form, DMS for humans
//! with paper charts, a Maidenhead grid square, or UTM.

use serde::Deserialize;

/// Supported coordinate output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateFormat {
    /// `52.25720,3.91937` (5 decimal places, ~1 m)
    #[default]
    Decimal,
    /// `52.257,3.919` (3 decimal places, ~110 m)
    Compact,
    /// `52°15'26"N 3°55'10"E`
    Dms,
    /// `JO22CG` (6-character grid square)
    Maidenhead,
    /// `31U 562364 5790708`
    Utm,
}

/// Format a WGS-84 position in the selected format.
pub fn format_position(lat: f64, lon: f64, fmt: CoordinateFormat) -> String {
    match fmt {
        CoordinateFormat::Decimal => format!("{lat:.5},{lon:.5}"),
        CoordinateFormat::Compact => format!("{lat:.3},{lon:.3}"),
        CoordinateFormat::Dms => format!("{} {}", dms(lat, true), dms(lon, false)),
        CoordinateFormat::Maidenhead => maidenhead(lat, lon),
        CoordinateFormat::Utm => utm(lat, lon),
    }
}

fn dms(deg: f64, is_lat: bool) -> String {
    let hemi = match (is_lat, deg >= 0.0) {
        (true, true) => 'N',
        (true, false) => 'S',
        (false, true) => 'E',
        (false, false) => 'W',
    };
    let abs = deg.abs();
    let d = abs.floor();
    let m = ((abs - d) * 60.0).floor();
    let s = ((abs - d) * 60.0 - m) * 60.0;
    format!("{d:.0}\u{00b0}{m:.0}'{s:.0}\"{hemi}")
}

/// 6-character Maidenhead grid locator.
fn maidenhead(lat: f64, lon: f64) -> String {
    let lon = (lon + 180.0).clamp(0.0, 359.999_999);
    let lat = (lat + 90.0).clamp(0.0, 179.999_999);

    let field_lon = (lon / 20.0).floor() as u8;
    let field_lat = (lat / 10.0).floor() as u8;
    let square_lon = ((lon % 20.0) / 2.0).floor() as u8;
    let square_lat = (lat % 10.0).floor() as u8;
    let sub_lon = ((lon % 2.0) * 12.0).floor() as u8;
    let sub_lat = ((lat % 1.0) * 24.0).floor() as u8;

    let mut s = String::with_capacity(6);
    s.push((b'A' + field_lon) as char);
    s.push((b'A' + field_lat) as char);
    s.push((b'0' + square_lon) as char);
    s.push((b'0' + square_lat) as char);
    s.push((b'a' + sub_lon) as char);
    s.push((b'a' + sub_lat) as char);
    s
}

/// UTM zone + easting/northing via the standard series expansion.
fn utm(lat: f64, lon: f64) -> String {
    let zone = ((lon + 180.0) / 6.0).floor() as i32 + 1;
    let band = utm_band(lat);

    // WGS-84 constants
    const A: f64 = 6_378_137.0;
    const F: f64 = 1.0 / 298.257_223_563;
    const K0: f64 = 0.9996;

    let e2 = F * (2.0 - F);
    let ep2 = e2 / (1.0 - e2);

    let lat_r = lat.to_radians();
    let lon0 = ((zone - 1) as f64 * 6.0 - 180.0 + 3.0).to_radians();
    let dlon = lon.to_radians() - lon0;

    let n = A / (1.0 - e2 * lat_r.sin().powi(2)).sqrt();
    let t = lat_r.tan().powi(2);
    let c = ep2 * lat_r.cos().powi(2);
    let a_ = dlon * lat_r.cos();

    let m = A
        * ((1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2 * e2 * e2 / 256.0) * lat_r
            - (3.0 * e2 / 8.0 + 3.0 * e2 * e2 / 32.0 + 45.0 * e2 * e2 * e2 / 1024.0)
                * (2.0 * lat_r).sin()
            + (15.0 * e2 * e2 / 256.0 + 45.0 * e2 * e2 * e2 / 1024.0) * (4.0 * lat_r).sin()
            - (35.0 * e2 * e2 * e2 / 3072.0) * (6.0 * lat_r).sin());

    let easting = K0
        * n
        * (a_ + (1.0 - t + c) * a_.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a_.powi(5) / 120.0)
        + 500_000.0;

    let mut northing = K0
        * (m + n
            * lat_r.tan()
            * (a_ * a_ / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a_.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a_.powi(6) / 720.0));
    if lat < 0.0 {
        northing += 10_000_000.0;
    }

    format!("{zone}{band} {easting:.0} {northing:.0}")
}

fn utm_band(lat: f64) -> char {
    const BANDS: &[u8] = b"CDEFGHJKLMNPQRSTUVWX";
    let idx = (((lat + 80.0) / 8.0).floor() as i32).clamp(0, 19) as usize;
    BANDS[idx] as char
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal() {
        assert_eq!(
            format_position(52.2572, 3.91937, CoordinateFormat::Decimal),
            "52.25720,3.91937"
        );
    }

    #[test]
    fn test_compact() {
        assert_eq!(
            format_position(52.2572, 3.91937, CoordinateFormat::Compact),
            "52.257,3.919"
        );
    }

    #[test]
    fn test_dms_hemispheres() {
        let n = format_position(52.2572, 3.91937, CoordinateFormat::Dms);
        assert!(n.contains('N') && n.contains('E'), "{n}");

        let s = format_position(-33.946, -151.177, CoordinateFormat::Dms);
        assert!(s.contains('S') && s.contains('W'), "{s}");
    }

    #[test]
    fn test_dms_values() {
        // 52.2572 deg = 52 deg 15' 26"
        let s = format_position(52.2572, 3.91937, CoordinateFormat::Dms);
        assert!(s.starts_with("52\u{00b0}15'26\"N"), "{s}");
    }

    #[test]
    fn test_maidenhead_known_locators() {
        // Dutch coast, just offshore
        assert_eq!(maidenhead(52.2572, 3.91937), "JO12xg");
        // Mount Mitchell, NC
        assert_eq!(&maidenhead(35.765, -82.265)[..4], "EM85");
    }

    #[test]
    fn test_utm_zone_and_band() {
        let s = format_position(52.2572, 3.91937, CoordinateFormat::Utm);
        assert!(s.starts_with("31U "), "{s}");

        let s = format_position(-33.9, 151.2, CoordinateFormat::Utm);
        assert!(s.starts_with("56H "), "{s}");
    }

    #[test]
    fn test_utm_easting_northing_plausible() {
        // Easting stays within [100km, 900km]; northing within [0, 10000km].
        let s = format_position(35.5, -82.55, CoordinateFormat::Utm);
        let parts: Vec<&str> = s.split(' ').collect();
        assert_eq!(parts.len(), 3);
        let e: f64 = parts[1].parse().unwrap();
        let n: f64 = parts[2].parse().unwrap();
        assert!((100_000.0..900_000.0).contains(&e), "easting {e}");
        assert!((0.0..10_000_000.0).contains(&n), "northing {n}");
    }
}
