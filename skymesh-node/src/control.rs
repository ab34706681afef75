//! Line-oriented TCP control channel.
//!
//! A deliberately small, telnet-friendly protocol for field use: one
//! command per line, answers are `OK ...` / `ERR ...` lines. Watchlist
//! edits go through the same atomic-replacement path as the config, so a
//! mid-edit crash can never leave a half-updated list.
//!
//! ```text
//! WATCH LIST
//! WATCH ADD icao_exact 4840D6 my label text
//! WATCH DEL 4840D6
//! STATS
//! AIRCRAFT
//! QUIT
//! ```

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use skymesh_core::watchlist::{PatternError, WatchKind, Watchlist, WatchlistEntry};

use crate::pipeline::TrackerHandle;

/// Accept control connections until shutdown.
pub async fn run_control(
    bind: String,
    tracker: TrackerHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::bind(&bind).await {
        Ok(l) => l,
        Err(e) => {
            warn!(bind = %bind, error = %e, "control channel bind failed");
            return;
        }
    };
    info!(bind = %bind, "control channel listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "control session opened");
                        tokio::spawn(serve_session(stream, tracker.clone()));
                    }
                    Err(e) => warn!(error = %e, "control accept failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn serve_session(stream: TcpStream, tracker: TrackerHandle) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match handle_command(line.trim(), &tracker).await {
            Command::Reply(text) => text,
            Command::Quit => {
                let _ = write_half.write_all(b"BYE\n").await;
                return;
            }
        };
        if write_half.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

enum Command {
    Reply(String),
    Quit,
}

async fn handle_command(line: &str, tracker: &TrackerHandle) -> Command {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or("").to_uppercase();

    let reply = match verb.as_str() {
        "" => String::new(),
        "QUIT" | "EXIT" => return Command::Quit,
        "WATCH" => watch_command(parts, tracker).await,
        "STATS" => {
            let stats = tracker.stats().await;
            let count = tracker.aircraft_count().await;
            format!(
                "OK aircraft={} messages={} new={} duplicates={} cpr_global={} cpr_local={} range_errors={}\n",
                count,
                stats.messages,
                stats.new_aircraft,
                stats.duplicates,
                stats.cpr_global,
                stats.cpr_local,
                stats.range_errors,
            )
        }
        "AIRCRAFT" => {
            let snapshot = tracker.snapshot().await;
            let mut out = String::new();
            for ac in &snapshot {
                out.push_str(&format!(
                    "{} {} {} {} {} {}\n",
                    ac.icao,
                    ac.callsign.as_deref().unwrap_or("?"),
                    fmt_opt(ac.lat),
                    fmt_opt(ac.lon),
                    ac.alt_baro_ft.map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
                    fmt_opt(ac.ground_speed_kts),
                ));
            }
            out.push_str(&format!("OK {}\n", snapshot.len()));
            out
        }
        _ => format!("ERR unknown command {verb}\n"),
    };

    Command::Reply(reply)
}

async fn watch_command(
    mut parts: std::str::SplitWhitespace<'_>,
    tracker: &TrackerHandle,
) -> String {
    match parts.next().unwrap_or("").to_uppercase().as_str() {
        "LIST" => {
            let wl = tracker.watchlist();
            let mut out = String::new();
            for e in wl.entries() {
                out.push_str(&format!("{:?} {} {}\n", e.kind, e.value, e.label));
            }
            out.push_str(&format!("OK {}\n", wl.len()));
            out
        }
        "ADD" => {
            let Some(kind) = parts.next().and_then(parse_kind) else {
                return "ERR usage: WATCH ADD <kind> <value> [label]\n".into();
            };
            let Some(value) = parts.next() else {
                return "ERR usage: WATCH ADD <kind> <value> [label]\n".into();
            };
            let label: String = parts.collect::<Vec<_>>().join(" ");
            let label: &str = if label.is_empty() { value } else { label.as_str() };

            match add_entry(tracker, kind, value, label).await {
                Ok(len) => format!("OK {len}\n"),
                Err(e) => format!("ERR {e}\n"),
            }
        }
        "DEL" => {
            let Some(value) = parts.next() else {
                return "ERR usage: WATCH DEL <value>\n".into();
            };
            let wl = tracker.watchlist();
            let before = wl.len();
            let kept: Vec<WatchlistEntry> = wl
                .entries()
                .iter()
                .filter(|e| !e.value.eq_ignore_ascii_case(value))
                .cloned()
                .collect();
            let removed = before - kept.len();
            tracker.set_watchlist(Watchlist::new(kept)).await;
            format!("OK {removed}\n")
        }
        other => format!("ERR unknown watch subcommand {other}\n"),
    }
}

async fn add_entry(
    tracker: &TrackerHandle,
    kind: WatchKind,
    value: &str,
    label: &str,
) -> Result<usize, PatternError> {
    let entry = WatchlistEntry::new(kind, value, label)?;
    let mut entries: Vec<WatchlistEntry> = tracker.watchlist().entries().to_vec();
    entries.push(entry);
    let len = entries.len();
    tracker.set_watchlist(Watchlist::new(entries)).await;
    Ok(len)
}

fn parse_kind(s: &str) -> Option<WatchKind> {
    match s.to_lowercase().as_str() {
        "icao_exact" | "icao" => Some(WatchKind::IcaoExact),
        "icao_prefix" | "prefix" => Some(WatchKind::IcaoPrefix),
        "callsign_exact" | "callsign" => Some(WatchKind::CallsignExact),
        "callsign_regex" | "regex" => Some(WatchKind::CallsignRegex),
        _ => None,
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.5}")).unwrap_or_else(|| "?".into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
