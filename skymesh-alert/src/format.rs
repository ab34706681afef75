//! Alert message templates.
//!
//! A template is a plain string with `{field}` tokens, interpreted over a
//! fixed vocabulary — no expressions, no dynamic evaluation. Unknown
//! tokens pass through untouched so a typo is visible in the output
//! instead of silently eating the message. Missing values render as `?`.
//!
//! Supported tokens: `{icao}` `{callsign}` `{label}` `{reason}` `{squawk}`
//! `{position}` `{lat}` `{lon}` `{alt}` `{alt_gnss}` `{speed}` `{track}`
//! `{vrate}` `{time}` `{priority}`.

use chrono::{TimeZone, Utc};

use skymesh_core::AlertEvent;

use crate::position::{format_position, CoordinateFormat};

/// Hard ceiling on a single mesh text packet (LoRa payload budget).
pub const MAX_MESSAGE_HARD_CAP: usize = 237;

/// A compiled-by-convention alert template.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    template: String,
    coord_format: CoordinateFormat,
    max_length: usize,
}

impl Default for MessageTemplate {
    fn default() -> Self {
        MessageTemplate::new(
            "ALERT {label}: {callsign} [{icao}] {position} {alt}ft {speed}kt {time}",
            CoordinateFormat::Decimal,
            200,
        )
    }
}

impl MessageTemplate {
    pub fn new(template: &str, coord_format: CoordinateFormat, max_length: usize) -> Self {
        MessageTemplate {
            template: template.to_string(),
            coord_format,
            max_length: max_length.min(MAX_MESSAGE_HARD_CAP),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Render an alert event. Pure: same event, same output.
    pub fn render(&self, event: &AlertEvent) -> String {
        let mut out = String::with_capacity(self.template.len() + 32);
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let token = &after[..close];
                    match self.expand(token, event) {
                        Some(value) => out.push_str(&value),
                        None => {
                            // Unknown token: emit literally.
                            out.push('{');
                            out.push_str(token);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);

        truncate_chars(out, self.max_length)
    }

    fn expand(&self, token: &str, event: &AlertEvent) -> Option<String> {
        let ac = &event.aircraft;
        let opt_f = |v: Option<f64>| v.map(|x| format!("{x:.0}")).unwrap_or_else(|| "?".into());
        let opt_i = |v: Option<i32>| v.map(|x| x.to_string()).unwrap_or_else(|| "?".into());

        Some(match token {
            "icao" => ac.icao.to_string(),
            "callsign" => ac.callsign.clone().unwrap_or_else(|| "?".into()),
            "label" => event.matched.label.clone(),
            "reason" => event.matched.reason.clone(),
            "squawk" => ac.squawk.clone().unwrap_or_else(|| "?".into()),
            "position" => match (ac.lat, ac.lon) {
                (Some(lat), Some(lon)) => format_position(lat, lon, self.coord_format),
                _ => "no-pos".into(),
            },
            "lat" => ac
                .lat
                .map(|v| format!("{v:.5}"))
                .unwrap_or_else(|| "?".into()),
            "lon" => ac
                .lon
                .map(|v| format!("{v:.5}"))
                .unwrap_or_else(|| "?".into()),
            "alt" => opt_i(ac.alt_baro_ft),
            "alt_gnss" => opt_i(ac.alt_gnss_ft),
            "speed" => opt_f(ac.ground_speed_kts),
            "track" => opt_f(ac.track_deg),
            "vrate" => opt_i(ac.vertical_rate_fpm),
            "time" => format_time(event.event_time),
            "priority" => format!("{:?}", event.matched.priority).to_lowercase(),
            _ => return None,
        })
    }
}

/// UTC wall-clock HH:MM:SSZ from Unix seconds.
fn format_time(epoch: f64) -> String {
    match Utc.timestamp_opt(epoch as i64, 0).single() {
        Some(dt) => dt.format("%H:%M:%SZ").to_string(),
        None => "?".into(),
    }
}

/// Truncate on a char boundary.
fn truncate_chars(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use skymesh_core::decode::decode;
    use skymesh_core::frame::parse_hex_uncached;
    use skymesh_core::track::{Tracker, TrackerConfig};
    use skymesh_core::watchlist::{MatchKind, Priority, WatchlistMatch};

    fn klm_event() -> AlertEvent {
        let mut tracker = Tracker::new(TrackerConfig::default());
        for hex in [
            "8D4840D6202CC371C32CE0576098", // identification
        ] {
            let frame = parse_hex_uncached(hex, 1.0).unwrap();
            for d in decode(&frame) {
                tracker.ingest(&d);
            }
        }
        let mut ac = tracker.snapshot().remove(0);
        ac.lat = Some(52.2572);
        ac.lon = Some(3.91937);
        ac.alt_baro_ft = Some(38000);
        ac.ground_speed_kts = Some(447.0);

        AlertEvent {
            aircraft: ac,
            matched: WatchlistMatch {
                kind: MatchKind::IcaoExact,
                reason: "icao 4840D6".into(),
                label: "klm-watch".into(),
                priority: Priority::High,
            },
            event_time: 1_700_000_000.0,
        }
    }

    #[test]
    fn test_render_default_template() {
        let out = MessageTemplate::default().render(&klm_event());
        assert!(out.contains("KLM1023"), "{out}");
        assert!(out.contains("4840D6"), "{out}");
        assert!(out.contains("52.25720,3.91937"), "{out}");
        assert!(out.contains("38000ft"), "{out}");
        assert!(out.contains("klm-watch"), "{out}");
    }

    #[test]
    fn test_missing_fields_render_placeholder() {
        let mut event = klm_event();
        event.aircraft.lat = None;
        event.aircraft.lon = None;
        event.aircraft.ground_speed_kts = None;

        let tpl = MessageTemplate::new(
            "{callsign} {position} {speed}",
            CoordinateFormat::Decimal,
            200,
        );
        assert_eq!(tpl.render(&event), "KLM1023 no-pos ?");
    }

    #[test]
    fn test_unknown_token_passes_through() {
        let tpl = MessageTemplate::new("{callsign} {bogus}", CoordinateFormat::Decimal, 200);
        assert_eq!(tpl.render(&klm_event()), "KLM1023 {bogus}");
    }

    #[test]
    fn test_unclosed_brace_kept() {
        let tpl = MessageTemplate::new("{callsign} {oops", CoordinateFormat::Decimal, 200);
        assert_eq!(tpl.render(&klm_event()), "KLM1023 {oops");
    }

    #[test]
    fn test_truncation_to_max_length() {
        let tpl = MessageTemplate::new("{reason} {reason} {reason}", CoordinateFormat::Decimal, 20);
        let out = tpl.render(&klm_event());
        assert!(out.len() <= 20, "len {} > 20", out.len());
    }

    #[test]
    fn test_hard_cap_applies() {
        let tpl = MessageTemplate::new("x", CoordinateFormat::Decimal, 500);
        assert_eq!(tpl.max_length(), MAX_MESSAGE_HARD_CAP);
    }

    #[test]
    fn test_time_token_utc() {
        let tpl = MessageTemplate::new("{time}", CoordinateFormat::Decimal, 200);
        let out = tpl.render(&klm_event());
        // 1700000000 = 2023-11-14 22:13:20 UTC
        assert_eq!(out, "22:13:20Z");
    }

    #[test]
    fn test_compact_position_format() {
        let tpl = MessageTemplate::new("{position}", CoordinateFormat::Compact, 200);
        assert_eq!(tpl.render(&klm_event()), "52.257,3.919");
    }

    #[test]
    fn test_priority_token() {
        let tpl = MessageTemplate::new("{priority}", CoordinateFormat::Decimal, 200);
        assert_eq!(tpl.render(&klm_event()), "high");
    }
}
