//! Daemon configuration: a TOML file deserialized into nested sections,
//! each with workable defaults, plus a validation pass that catches
//! operator mistakes at startup instead of at 3am.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use skymesh_alert::crypto::ChannelKey;
use skymesh_alert::format::MAX_MESSAGE_HARD_CAP;
use skymesh_alert::position::CoordinateFormat;
use skymesh_alert::route::RoutingPolicy;
use skymesh_core::track::TrackerConfig;
use skymesh_core::watchlist::{WatchKind, Watchlist, WatchlistEntry};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level config file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub receiver: ReceiverSection,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceSection>,
    #[serde(default)]
    pub cpr: CprSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub watchlist: WatchlistSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub control: ControlSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiverSection {
    #[serde(default = "default_receiver_name")]
    pub name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Default for ReceiverSection {
    fn default() -> Self {
        ReceiverSection {
            name: default_receiver_name(),
            lat: None,
            lon: None,
        }
    }
}

fn default_receiver_name() -> String {
    "skymesh".into()
}

/// Feeder kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKindConfig {
    BeastTcp,
    AvrTcp,
    JsonPoll,
    RawFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    pub name: String,
    pub kind: SourceKindConfig,
    /// host:port for TCP kinds, URL for json_poll, path for raw_file.
    pub address: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_sec: f64,
    #[serde(default = "default_backoff_initial")]
    pub reconnect_backoff_initial_sec: f64,
    #[serde(default = "default_backoff_max")]
    pub reconnect_backoff_max_sec: f64,
    #[serde(default = "default_idle_timeout")]
    pub read_idle_timeout_sec: f64,
}

fn default_poll_interval() -> f64 {
    5.0
}
fn default_backoff_initial() -> f64 {
    1.0
}
fn default_backoff_max() -> f64 {
    60.0
}
fn default_idle_timeout() -> f64 {
    60.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CprSection {
    #[serde(default = "default_global_window")]
    pub global_cpr_window_sec: f64,
    #[serde(default = "default_surface_window")]
    pub surface_cpr_window_sec: f64,
    #[serde(default = "default_local_range")]
    pub local_cpr_range_nm: f64,
    #[serde(default = "default_position_timeout")]
    pub position_timeout_sec: f64,
}

impl Default for CprSection {
    fn default() -> Self {
        CprSection {
            global_cpr_window_sec: default_global_window(),
            surface_cpr_window_sec: default_surface_window(),
            local_cpr_range_nm: default_local_range(),
            position_timeout_sec: default_position_timeout(),
        }
    }
}

fn default_global_window() -> f64 {
    10.0
}
fn default_surface_window() -> f64 {
    25.0
}
fn default_local_range() -> f64 {
    180.0
}
fn default_position_timeout() -> f64 {
    60.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerSection {
    #[serde(default = "default_aircraft_timeout")]
    pub aircraft_timeout_sec: f64,
    #[serde(default = "default_max_aircraft")]
    pub max_aircraft: usize,
}

impl Default for TrackerSection {
    fn default() -> Self {
        TrackerSection {
            aircraft_timeout_sec: default_aircraft_timeout(),
            max_aircraft: default_max_aircraft(),
        }
    }
}

fn default_aircraft_timeout() -> f64 {
    300.0
}
fn default_max_aircraft() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchlistSection {
    #[serde(default, rename = "entry")]
    pub entries: Vec<WatchlistEntrySection>,
    #[serde(default = "default_min_interval")]
    pub min_interval_sec: f64,
    #[serde(default = "default_max_per_hour")]
    pub max_alerts_per_hour: u32,
}

impl Default for WatchlistSection {
    fn default() -> Self {
        WatchlistSection {
            entries: Vec::new(),
            min_interval_sec: default_min_interval(),
            max_alerts_per_hour: default_max_per_hour(),
        }
    }
}

fn default_min_interval() -> f64 {
    300.0
}
fn default_max_per_hour() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchlistEntrySection {
    pub kind: WatchKindConfig,
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKindConfig {
    IcaoExact,
    IcaoPrefix,
    CallsignExact,
    CallsignRegex,
}

impl From<WatchKindConfig> for WatchKind {
    fn from(k: WatchKindConfig) -> Self {
        match k {
            WatchKindConfig::IcaoExact => WatchKind::IcaoExact,
            WatchKindConfig::IcaoPrefix => WatchKind::IcaoPrefix,
            WatchKindConfig::CallsignExact => WatchKind::CallsignExact,
            WatchKindConfig::CallsignRegex => WatchKind::CallsignRegex,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSection {
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Base64 PSK; omit for plaintext.
    pub psk: Option<String>,
    #[serde(default)]
    pub channel_number: u8,
    #[serde(default)]
    pub routing: RoutingPolicy,
    #[serde(default = "default_failover")]
    pub failover_timeout_sec: f64,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_sec: f64,
    #[serde(default = "default_max_len")]
    pub max_message_length: usize,
    #[serde(default = "default_template")]
    pub message_format: String,
    #[serde(default)]
    pub coordinate_format: CoordinateFormat,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_ttl")]
    pub message_ttl_sec: f64,
    pub alert_log: Option<PathBuf>,
    pub serial: Option<SerialSection>,
    pub mqtt: Option<MqttSection>,
}

impl Default for DispatchSection {
    fn default() -> Self {
        DispatchSection {
            channel: default_channel(),
            psk: None,
            channel_number: 0,
            routing: RoutingPolicy::default(),
            failover_timeout_sec: default_failover(),
            health_check_interval_sec: default_health_interval(),
            max_message_length: default_max_len(),
            message_format: default_template(),
            coordinate_format: CoordinateFormat::default(),
            max_attempts: default_max_attempts(),
            message_ttl_sec: default_ttl(),
            alert_log: None,
            serial: None,
            mqtt: None,
        }
    }
}

fn default_channel() -> String {
    "alerts".into()
}
fn default_failover() -> f64 {
    30.0
}
fn default_health_interval() -> f64 {
    60.0
}
fn default_max_len() -> usize {
    200
}
fn default_template() -> String {
    "ALERT {label}: {callsign} [{icao}] {position} {alt}ft {speed}kt {time}".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_ttl() -> f64 {
    300.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialSection {
    pub port: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttSection {
    pub broker_host: String,
    #[serde(default = "default_mqtt_port")]
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default = "default_keepalive")]
    pub keepalive_sec: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}
fn default_topic_prefix() -> String {
    "mesh".into()
}
fn default_region() -> String {
    "US".into()
}
fn default_keepalive() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_http_bind")]
    pub bind: String,
    pub cors_origin: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        HttpSection {
            enabled: default_http_enabled(),
            bind: default_http_bind(),
            cors_origin: None,
        }
    }
}

fn default_http_enabled() -> bool {
    true
}
fn default_http_bind() -> String {
    "127.0.0.1:8080".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_control_bind")]
    pub bind: String,
}

impl Default for ControlSection {
    fn default() -> Self {
        ControlSection {
            enabled: false,
            bind: default_control_bind(),
        }
    }
}

fn default_control_bind() -> String {
    "127.0.0.1:8765".into()
}

// ---------------------------------------------------------------------------
// Load + validate
// ---------------------------------------------------------------------------

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Anything wrong here is operator error and
    /// fatal; runtime failures never are.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let (Some(lat), lon) = (self.receiver.lat, self.receiver.lon) {
            if lon.is_none() {
                return Err(ConfigError::Invalid(
                    "receiver.lat set without receiver.lon".into(),
                ));
            }
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ConfigError::Invalid(format!("receiver.lat {lat} out of range")));
            }
        }
        if let Some(lon) = self.receiver.lon {
            if self.receiver.lat.is_none() {
                return Err(ConfigError::Invalid(
                    "receiver.lon set without receiver.lat".into(),
                ));
            }
            if !(-180.0..180.0).contains(&lon) {
                return Err(ConfigError::Invalid(format!("receiver.lon {lon} out of range")));
            }
        }

        for src in &self.sources {
            if src.name.is_empty() {
                return Err(ConfigError::Invalid("source with empty name".into()));
            }
            match src.kind {
                SourceKindConfig::BeastTcp | SourceKindConfig::AvrTcp => {
                    if src.address.parse::<std::net::SocketAddr>().is_err()
                        && !is_host_port(&src.address)
                    {
                        return Err(ConfigError::Invalid(format!(
                            "source {}: bad address {:?} (want host:port)",
                            src.name, src.address
                        )));
                    }
                }
                SourceKindConfig::JsonPoll => {
                    if !src.address.starts_with("http://") && !src.address.starts_with("https://")
                    {
                        return Err(ConfigError::Invalid(format!(
                            "source {}: json_poll needs an http(s) URL",
                            src.name
                        )));
                    }
                }
                SourceKindConfig::RawFile => {}
            }
        }

        // Compile the watchlist once, just to reject bad patterns early.
        self.build_watchlist()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if let Some(psk) = &self.dispatch.psk {
            ChannelKey::from_base64(psk).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.dispatch.max_message_length > MAX_MESSAGE_HARD_CAP {
            return Err(ConfigError::Invalid(format!(
                "dispatch.max_message_length {} exceeds hard cap {}",
                self.dispatch.max_message_length, MAX_MESSAGE_HARD_CAP
            )));
        }
        if self.dispatch.qos_invalid() {
            return Err(ConfigError::Invalid("mqtt.qos must be 0 or 1".into()));
        }

        Ok(())
    }

    pub fn build_watchlist(&self) -> Result<Watchlist, skymesh_core::PatternError> {
        let mut entries = Vec::with_capacity(self.watchlist.entries.len());
        for e in &self.watchlist.entries {
            entries.push(WatchlistEntry::new(e.kind.into(), &e.value, &e.label)?);
        }
        Ok(Watchlist::new(entries))
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            aircraft_timeout: self.tracker.aircraft_timeout_sec,
            position_timeout: self.cpr.position_timeout_sec,
            max_aircraft: self.tracker.max_aircraft,
            airborne_pair_window: self.cpr.global_cpr_window_sec,
            surface_pair_window: self.cpr.surface_cpr_window_sec,
            local_range_nm: self.cpr.local_cpr_range_nm,
            reference: match (self.receiver.lat, self.receiver.lon) {
                (Some(lat), Some(lon)) => Some((lat, lon)),
                _ => None,
            },
        }
    }
}

impl DispatchSection {
    fn qos_invalid(&self) -> bool {
        self.mqtt.as_ref().is_some_and(|m| m.qos > 1)
    }
}

fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
