//! Shared types and decoded message definitions for skymesh-core.

use serde::Serialize;

// ---------------------------------------------------------------------------
// ICAO address
// ---------------------------------------------------------------------------

/// 24-bit ICAO airframe address.
///
/// Held as raw bytes (no per-frame String allocation) and rendered as
/// 6-char uppercase hex everywhere a human or a JSON consumer sees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Icao(pub [u8; 3]);

impl Icao {
    /// Build from the low 24 bits of an integer (CRC syndromes, config).
    pub fn from_u32(val: u32) -> Self {
        Icao([(val >> 16) as u8, (val >> 8) as u8, val as u8])
    }

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes([0, self.0[0], self.0[1], self.0[2]])
    }

    /// Parse a 6-char hex address, either case. `None` on anything else.
    pub fn parse_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 6 {
            return None;
        }
        u32::from_str_radix(s, 16).ok().map(Icao::from_u32)
    }
}

impl std::fmt::Display for Icao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06X}", self.to_u32())
    }
}

impl Serialize for Icao {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Downlink Format metadata
// ---------------------------------------------------------------------------

/// Frame length in bits for the Downlink Formats this crate decodes.
/// `None` for DFs we have no use for (they are dropped at validation).
pub fn df_bits(df: u8) -> Option<usize> {
    match df {
        0 | 4 | 5 | 11 => Some(56),
        16 | 17 | 18 | 20 | 21 => Some(112),
        _ => None,
    }
}

/// Operator-facing DF description, for logs and the offline decoder.
pub fn df_name(df: u8) -> &'static str {
    match df {
        0 => "short air-air surveillance",
        4 => "altitude reply",
        5 => "identity reply",
        11 => "all-call reply",
        16 => "long air-air surveillance",
        17 => "extended squitter",
        18 => "extended squitter (TIS-B/ADS-R)",
        20 => "Comm-B altitude reply",
        21 => "Comm-B identity reply",
        _ => "unhandled",
    }
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

/// Decode a hex string into bytes. Case-insensitive, even length only.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Encode bytes as an uppercase hex string.
pub fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

// ---------------------------------------------------------------------------
// Message sources
// ---------------------------------------------------------------------------

/// Where a message entered the pipeline. Downstream code uses this to
/// distinguish decode quality (json_poll records are pre-decoded upstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    BeastTcp,
    AvrTcp,
    JsonPoll,
    RawFile,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::BeastTcp => write!(f, "beast_tcp"),
            SourceKind::AvrTcp => write!(f, "avr_tcp"),
            SourceKind::JsonPoll => write!(f, "json_poll"),
            SourceKind::RawFile => write!(f, "raw_file"),
        }
    }
}

/// Index of the originating feeder in the configured source list.
pub type SourceId = u16;

// ---------------------------------------------------------------------------
// Decoded message types
// ---------------------------------------------------------------------------

/// TC 1-4: Aircraft identification (callsign).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentificationMsg {
    pub icao: Icao,
    pub callsign: String,
    pub category: u8,
    pub timestamp: f64,
}

/// TC 5-8 (surface) or TC 9-18/20-22 (airborne): CPR-encoded position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionMsg {
    pub icao: Icao,
    /// Barometric for TC 9-18, GNSS for TC 20-22, absent for surface.
    pub altitude_ft: Option<i32>,
    pub gnss_altitude: bool,
    pub cpr_lat: u32,
    pub cpr_lon: u32,
    pub cpr_odd: bool,
    pub surveillance_status: u8,
    pub is_surface: bool,
    /// Surface only: ground speed from the 7-bit movement field.
    pub ground_speed_kts: Option<f64>,
    /// Surface only: ground track, 2.8125 deg per step.
    pub ground_track_deg: Option<f64>,
    pub timestamp: f64,
}

/// Vertical rate reference (TC 19 source bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalRateSource {
    Baro,
    Gnss,
}

/// Speed type for velocity messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpeedType {
    Ground,
    IAS,
    TAS,
}

impl std::fmt::Display for SpeedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeedType::Ground => write!(f, "ground"),
            SpeedType::IAS => write!(f, "IAS"),
            SpeedType::TAS => write!(f, "TAS"),
        }
    }
}

/// TC 19: Airborne velocity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityMsg {
    pub icao: Icao,
    pub speed_kts: Option<f64>,
    /// Ground track for subtype 1/2, magnetic heading for subtype 3/4.
    pub heading_deg: Option<f64>,
    pub speed_type: SpeedType,
    pub vertical_rate_fpm: Option<i32>,
    pub vertical_rate_source: VerticalRateSource,
    /// GNSS height minus barometric altitude, 25 ft steps.
    pub gnss_baro_delta_ft: Option<i32>,
    pub timestamp: f64,
}

/// DF0/4/16/20: Altitude reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AltitudeMsg {
    pub icao: Icao,
    pub altitude_ft: Option<i32>,
    /// Flight status reports the aircraft on the ground (DF4/5 FS field).
    pub on_ground: bool,
    pub timestamp: f64,
}

/// DF5/21: Identity reply (squawk code).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SquawkMsg {
    pub icao: Icao,
    pub squawk: String,
    pub on_ground: bool,
    pub timestamp: f64,
}

/// DF11: All-call reply. Carries nothing but a validated address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllCallMsg {
    pub icao: Icao,
    pub timestamp: f64,
}

/// TC 28 subtype 1: aircraft status (emergency / priority).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMsg {
    pub icao: Icao,
    /// 3-bit emergency state. 0 = none, 1 = general, 4 = no comms, 5 = unlawful.
    pub emergency_state: u8,
    pub squawk: Option<String>,
    pub timestamp: f64,
}

/// TC 29 subtype 1: target state and status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStateMsg {
    pub icao: Icao,
    pub selected_altitude_ft: Option<i32>,
    /// True when the selected altitude comes from the FMS rather than MCP/FCU.
    pub altitude_from_fms: bool,
    pub selected_heading_deg: Option<f64>,
    pub barometric_setting_hpa: Option<f64>,
    pub timestamp: f64,
}

/// TC 31: operational status and navigation accuracy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationalStatusMsg {
    pub icao: Icao,
    pub adsb_version: u8,
    pub nac_p: Option<u8>,
    pub nic_supplement: u8,
    pub sil: Option<u8>,
    pub is_surface: bool,
    pub timestamp: f64,
}

/// DF20/21 Comm-B payload with an inferred BDS register (see `bds`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommBMsg {
    pub icao: Icao,
    pub register: crate::bds::BdsRegister,
    pub timestamp: f64,
}

/// Pre-decoded state record from a JSON snapshot feeder. Positions arrive
/// already resolved, so these bypass CPR entirely.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotMsg {
    pub icao: Icao,
    pub callsign: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_ft: Option<i32>,
    pub ground_speed_kts: Option<f64>,
    pub track_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub squawk: Option<String>,
    pub on_ground: Option<bool>,
    pub timestamp: f64,
}

/// Union type for all decoded messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum DecodedMsg {
    Identification(IdentificationMsg),
    Position(PositionMsg),
    Velocity(VelocityMsg),
    Altitude(AltitudeMsg),
    Squawk(SquawkMsg),
    AllCall(AllCallMsg),
    Status(StatusMsg),
    TargetState(TargetStateMsg),
    OperationalStatus(OperationalStatusMsg),
    CommB(CommBMsg),
    Snapshot(SnapshotMsg),
}

impl DecodedMsg {
    /// Get the ICAO address from any message type.
    pub fn icao(&self) -> &Icao {
        match self {
            DecodedMsg::Identification(m) => &m.icao,
            DecodedMsg::Position(m) => &m.icao,
            DecodedMsg::Velocity(m) => &m.icao,
            DecodedMsg::Altitude(m) => &m.icao,
            DecodedMsg::Squawk(m) => &m.icao,
            DecodedMsg::AllCall(m) => &m.icao,
            DecodedMsg::Status(m) => &m.icao,
            DecodedMsg::TargetState(m) => &m.icao,
            DecodedMsg::OperationalStatus(m) => &m.icao,
            DecodedMsg::CommB(m) => &m.icao,
            DecodedMsg::Snapshot(m) => &m.icao,
        }
    }

    /// Get the timestamp from any message type.
    pub fn timestamp(&self) -> f64 {
        match self {
            DecodedMsg::Identification(m) => m.timestamp,
            DecodedMsg::Position(m) => m.timestamp,
            DecodedMsg::Velocity(m) => m.timestamp,
            DecodedMsg::Altitude(m) => m.timestamp,
            DecodedMsg::Squawk(m) => m.timestamp,
            DecodedMsg::AllCall(m) => m.timestamp,
            DecodedMsg::Status(m) => m.timestamp,
            DecodedMsg::TargetState(m) => m.timestamp,
            DecodedMsg::OperationalStatus(m) => m.timestamp,
            DecodedMsg::CommB(m) => m.timestamp,
            DecodedMsg::Snapshot(m) => m.timestamp,
        }
    }
}

/// Emergency squawk codes: hijack, radio failure, general emergency.
pub const EMERGENCY_SQUAWKS: &[&str] = &["7500", "7600", "7700"];

/// True for the three emergency transponder codes.
pub fn is_emergency_squawk(squawk: &str) -> bool {
    EMERGENCY_SQUAWKS.contains(&squawk)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
