//! Watchlist: target patterns evaluated against tracked aircraft.
//!
//! The list is an immutable value — building a new one and swapping it in
//! is the only way to change it, which keeps readers lock-free. For the
//! typical list size (well under a thousand entries) evaluation is a
//! straight scan; no index is built.
//!
//! Emergency squawks (7500/7600/7700) always match at Critical priority,
//! watchlist entry or not.

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::track::Aircraft;

/// A watchlist pattern that failed validation.
#[derive(Debug, Clone, Error)]
#[error("bad watchlist pattern {value:?}: {reason}")]
pub struct PatternError {
    pub value: String,
    pub reason: String,
}

impl PatternError {
    fn new(value: &str, reason: impl Into<String>) -> Self {
        PatternError {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Entry pattern kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    IcaoExact,
    IcaoPrefix,
    CallsignExact,
    CallsignRegex,
}

/// What actually matched, as carried on the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    IcaoExact,
    IcaoPrefix,
    CallsignExact,
    CallsignRegex,
    Emergency,
}

/// Alert priority. Critical bypasses the per-aircraft cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// One watchlist pattern with an opaque operator label.
#[derive(Debug, Clone)]
pub struct WatchlistEntry {
    pub kind: WatchKind,
    pub value: String,
    pub label: String,
    pub priority: Priority,
    regex: Option<Regex>,
}

impl WatchlistEntry {
    /// Build and validate an entry. ICAO values must be hex; regex values
    /// must compile. Matching is case-insensitive throughout.
    pub fn new(kind: WatchKind, value: &str, label: &str) -> Result<Self, PatternError> {
        Self::with_priority(kind, value, label, Priority::High)
    }

    pub fn with_priority(
        kind: WatchKind,
        value: &str,
        label: &str,
        priority: Priority,
    ) -> Result<Self, PatternError> {
        let value = value.trim().to_uppercase();
        let mut regex = None;

        match kind {
            WatchKind::IcaoExact => {
                if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(PatternError::new(&value, "ICAO must be 6 hex chars"));
                }
            }
            WatchKind::IcaoPrefix => {
                if value.is_empty()
                    || value.len() > 6
                    || !value.bytes().all(|b| b.is_ascii_hexdigit())
                {
                    return Err(PatternError::new(&value, "ICAO prefix must be 1-6 hex chars"));
                }
            }
            WatchKind::CallsignExact => {
                if value.is_empty() || value.len() > 8 {
                    return Err(PatternError::new(&value, "callsign must be 1-8 chars"));
                }
            }
            WatchKind::CallsignRegex => {
                let re = Regex::new(&format!("(?i){value}"))
                    .map_err(|e| PatternError::new(&value, e.to_string()))?;
                regex = Some(re);
            }
        }

        Ok(WatchlistEntry {
            kind,
            value,
            label: label.to_string(),
            priority,
            regex,
        })
    }

    fn matches(&self, ac: &Aircraft) -> bool {
        match self.kind {
            WatchKind::IcaoExact => ac.icao.to_string() == self.value,
            WatchKind::IcaoPrefix => ac.icao.to_string().starts_with(&self.value),
            WatchKind::CallsignExact => ac
                .callsign
                .as_deref()
                .is_some_and(|cs| cs.eq_ignore_ascii_case(&self.value)),
            WatchKind::CallsignRegex => {
                let (Some(cs), Some(re)) = (ac.callsign.as_deref(), &self.regex) else {
                    return false;
                };
                re.is_match(cs)
            }
        }
    }

    fn match_kind(&self) -> MatchKind {
        match self.kind {
            WatchKind::IcaoExact => MatchKind::IcaoExact,
            WatchKind::IcaoPrefix => MatchKind::IcaoPrefix,
            WatchKind::CallsignExact => MatchKind::CallsignExact,
            WatchKind::CallsignRegex => MatchKind::CallsignRegex,
        }
    }
}

/// One positive match result.
#[derive(Debug, Clone, Serialize)]
pub struct WatchlistMatch {
    pub kind: MatchKind,
    pub reason: String,
    pub label: String,
    pub priority: Priority,
}

/// An alert ready for the dispatcher: an aircraft snapshot plus the match
/// that fired. The dispatcher never sees live tracker state.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub aircraft: Aircraft,
    pub matched: WatchlistMatch,
    pub event_time: f64,
}

/// Immutable set of watchlist entries.
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    entries: Vec<WatchlistEntry>,
}

impl Watchlist {
    pub fn new(entries: Vec<WatchlistEntry>) -> Self {
        Watchlist { entries }
    }

    pub fn empty() -> Self {
        Watchlist::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[WatchlistEntry] {
        &self.entries
    }

    /// Evaluate an aircraft against every entry, plus the built-in
    /// emergency check. O(entries).
    pub fn matches(&self, ac: &Aircraft) -> Vec<WatchlistMatch> {
        let mut out = Vec::new();

        if ac.emergency {
            let squawk = ac.squawk.as_deref().unwrap_or("unknown");
            out.push(WatchlistMatch {
                kind: MatchKind::Emergency,
                reason: format!("emergency squawk {squawk}"),
                label: "EMERGENCY".to_string(),
                priority: Priority::Critical,
            });
        }

        for entry in &self.entries {
            if entry.matches(ac) {
                let reason = match entry.kind {
                    WatchKind::IcaoExact => format!("icao {}", ac.icao),
                    WatchKind::IcaoPrefix => {
                        format!("icao prefix {} ({})", entry.value, ac.icao)
                    }
                    WatchKind::CallsignExact => format!("callsign {}", entry.value),
                    WatchKind::CallsignRegex => format!(
                        "callsign {} matched /{}/",
                        ac.callsign.as_deref().unwrap_or("?"),
                        entry.value
                    ),
                };
                out.push(WatchlistMatch {
                    kind: entry.match_kind(),
                    reason,
                    label: entry.label.clone(),
                    priority: entry.priority,
                });
            }
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
