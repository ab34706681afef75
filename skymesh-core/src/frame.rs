//! Frame validation: length/DF checks, CRC, ICAO recovery.
//!
//! Raw 7- or 14-byte Mode S frames come in from the source manager; what
//! leaves here is a `ModeFrame` with a verified (or cache-vouched) ICAO
//! address. Rejects are classified so the caller can count them.
//!
//! DF11/17/18 carry the address explicitly and are CRC-checked directly.
//! DF0/4/5/16/20/21 hide the address in the parity field; the recovered
//! candidate is only accepted when a recent validated frame announced the
//! same address (the "known-ICAO" gate).

use std::collections::HashMap;

use crate::crc;
use crate::types::{df_bits, df_name, hex_decode, Icao, SourceId, SourceKind};

// DFs where ICAO is explicit in bytes 1-3
const DF_EXPLICIT_ICAO: &[u8] = &[11, 17, 18];

// DFs where ICAO is recovered from the CRC syndrome
const DF_RESIDUAL_ICAO: &[u8] = &[0, 4, 5, 16, 20, 21];

// ---------------------------------------------------------------------------
// Raw frames
// ---------------------------------------------------------------------------

/// A raw Mode S frame as handed over by a feeder. Ephemeral: dropped as
/// soon as validation/decoding is done.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// 7 bytes (short) or 14 bytes (long).
    pub bytes: Vec<u8>,
    /// Local receive time, Unix seconds.
    pub timestamp: f64,
    pub source: SourceId,
    pub source_kind: SourceKind,
    pub signal_level: Option<f64>,
}

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameReject {
    Length,
    UnknownDf,
    Crc,
    UnknownIcao,
}

// ---------------------------------------------------------------------------
// ICAO cache
// ---------------------------------------------------------------------------

/// Time-windowed cache of validated ICAO addresses.
///
/// Addresses are registered when seen in DF11/17/18 frames. For the
/// surveillance DFs the address is recovered from the CRC syndrome, and
/// noise produces plausible-looking fakes; those are rejected unless the
/// address was recently vouched for.
pub struct IcaoCache {
    ttl: f64,
    seen: HashMap<Icao, f64>, // icao -> last validated sighting
}

impl IcaoCache {
    pub fn new(ttl: f64) -> Self {
        IcaoCache {
            ttl,
            seen: HashMap::new(),
        }
    }

    /// Register a validated ICAO (from DF11/17/18).
    pub fn register(&mut self, icao: Icao, timestamp: f64) {
        self.seen.insert(icao, timestamp);
    }

    /// Check if an ICAO was recently seen in a validated frame.
    pub fn is_known(&mut self, icao: &Icao, timestamp: f64) -> bool {
        if let Some(&last) = self.seen.get(icao) {
            if timestamp - last <= self.ttl {
                return true;
            }
            self.seen.remove(icao);
        }
        false
    }

    /// Remove expired entries.
    pub fn prune(&mut self, now: f64) {
        let ttl = self.ttl;
        self.seen.retain(|_, &mut last| now - last <= ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for IcaoCache {
    fn default() -> Self {
        IcaoCache::new(60.0)
    }
}

// ---------------------------------------------------------------------------
// ModeFrame
// ---------------------------------------------------------------------------

/// A validated Mode S frame.
#[derive(Debug, Clone)]
pub struct ModeFrame {
    /// Downlink Format (0-24)
    pub df: u8,
    /// 3-byte ICAO address (explicit or syndrome-recovered)
    pub icao: Icao,
    /// Full message bytes, after any error correction
    pub raw: Vec<u8>,
    pub timestamp: f64,
    pub source: SourceId,
    pub source_kind: SourceKind,
    pub signal_level: Option<f64>,
    /// True if 1-2 bit error correction was applied
    pub corrected: bool,
}

impl ModeFrame {
    /// Human-readable Downlink Format name.
    pub fn df_name(&self) -> &'static str {
        df_name(self.df)
    }

    /// True if this is a 112-bit (long) message.
    pub fn is_long(&self) -> bool {
        self.raw.len() == 14
    }

    /// Message Extended field (bytes 4-10, 56 bits) for DF17/18.
    /// Returns empty slice for short frames.
    pub fn me(&self) -> &[u8] {
        if self.is_long() && self.raw.len() >= 11 {
            &self.raw[4..11]
        } else {
            &[]
        }
    }

    /// Comm-B Message field (bytes 4-10) for DF20/21.
    pub fn mb(&self) -> &[u8] {
        if matches!(self.df, 20 | 21) && self.raw.len() >= 11 {
            &self.raw[4..11]
        } else {
            &[]
        }
    }

    /// ADS-B Type Code (first 5 bits of ME field). None for non-ADS-B.
    pub fn type_code(&self) -> Option<u8> {
        if (self.df != 17 && self.df != 18) || !self.is_long() {
            return None;
        }
        Some((self.raw[4] >> 3) & 0x1F)
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Per-validator counters, surfaced through the stats read view.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorStats {
    pub crc_pass: u64,
    pub crc_fail: u64,
    pub corrected: u64,
    pub dropped_unknown_icao: u64,
    pub rejected_length: u64,
    pub rejected_df: u64,
}

/// Stateful frame validator: owns the known-ICAO cache and counters.
pub struct FrameValidator {
    cache: IcaoCache,
    correct_errors: bool,
    pub stats: ValidatorStats,
}

impl FrameValidator {
    pub fn new(icao_ttl: f64, correct_errors: bool) -> Self {
        FrameValidator {
            cache: IcaoCache::new(icao_ttl),
            correct_errors,
            stats: ValidatorStats::default(),
        }
    }

    /// Validate one raw frame.
    pub fn validate(&mut self, frame: RawFrame) -> Result<ModeFrame, FrameReject> {
        let RawFrame {
            mut bytes,
            timestamp,
            source,
            source_kind,
            signal_level,
        } = frame;

        if bytes.len() != 7 && bytes.len() != 14 {
            self.stats.rejected_length += 1;
            return Err(FrameReject::Length);
        }

        let df = (bytes[0] >> 3) & 0x1F;
        let expected_bits = match df_bits(df) {
            Some(b) => b,
            None => {
                self.stats.rejected_df += 1;
                return Err(FrameReject::UnknownDf);
            }
        };
        if bytes.len() * 8 != expected_bits {
            self.stats.rejected_length += 1;
            return Err(FrameReject::Length);
        }

        let mut corrected = false;
        let icao = if DF_EXPLICIT_ICAO.contains(&df) {
            if crc::syndrome(&bytes) != 0 {
                let fixed = (df == 17 || df == 18)
                    && self.correct_errors
                    && crc::try_fix(&mut bytes);
                if !fixed {
                    self.stats.crc_fail += 1;
                    return Err(FrameReject::Crc);
                }
                corrected = true;
                self.stats.corrected += 1;
            }
            let icao = Icao([bytes[1], bytes[2], bytes[3]]);
            self.cache.register(icao, timestamp);
            icao
        } else if DF_RESIDUAL_ICAO.contains(&df) {
            let icao = crc::residual_icao(&bytes);
            if !self.cache.is_known(&icao, timestamp) {
                self.stats.dropped_unknown_icao += 1;
                return Err(FrameReject::UnknownIcao);
            }
            icao
        } else {
            self.stats.rejected_df += 1;
            return Err(FrameReject::UnknownDf);
        };

        self.stats.crc_pass += 1;
        Ok(ModeFrame {
            df,
            icao,
            raw: bytes,
            timestamp,
            source,
            source_kind,
            signal_level,
            corrected,
        })
    }

    /// Drop expired cache entries.
    pub fn prune(&mut self, now: f64) {
        self.cache.prune(now);
    }

    pub fn known_icaos(&self) -> usize {
        self.cache.len()
    }
}

/// Parse a hex frame without the known-ICAO gate. Convenience for tests
/// and offline decoding of frame dumps.
pub fn parse_hex_uncached(hex: &str, timestamp: f64) -> Option<ModeFrame> {
    let bytes = hex_decode(hex)?;
    let mut v = FrameValidator::new(f64::INFINITY, true);
    // Pre-register so residual-ICAO DFs survive without a prior squitter.
    if bytes.len() == 7 || bytes.len() == 14 {
        let df = (bytes[0] >> 3) & 0x1F;
        if DF_RESIDUAL_ICAO.contains(&df) {
            v.cache.register(crc::residual_icao(&bytes), timestamp);
        }
    }
    v.validate(RawFrame {
        bytes,
        timestamp,
        source: 0,
        source_kind: SourceKind::RawFile,
        signal_level: None,
    })
    .ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hex_encode;

    fn raw(hex: &str, ts: f64) -> RawFrame {
        RawFrame {
            bytes: hex_decode(hex).unwrap(),
            timestamp: ts,
            source: 0,
            source_kind: SourceKind::BeastTcp,
            signal_level: None,
        }
    }

    #[test]
    fn test_validate_df17_identification() {
        let mut v = FrameValidator::new(60.0, true);
        let frame = v.validate(raw("8D4840D6202CC371C32CE0576098", 1.0)).unwrap();
        assert_eq!(frame.df, 17);
        assert_eq!(frame.icao.to_string(), "4840D6");
        assert!(!frame.corrected);
        assert!(frame.is_long());
        assert_eq!(v.stats.crc_pass, 1);
    }

    #[test]
    fn test_validate_crc_fail_counted() {
        let mut v = FrameValidator::new(60.0, false);
        // Last nibble flipped: ...6098 -> ...6099
        let r = v.validate(raw("8D4840D6202CC371C32CE0576099", 1.0));
        assert_eq!(r.unwrap_err(), FrameReject::Crc);
        assert_eq!(v.stats.crc_fail, 1);
        assert_eq!(v.stats.crc_pass, 0);
    }

    #[test]
    fn test_validate_error_correction() {
        let mut bytes = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        bytes[5] ^= 0x01;
        let mut v = FrameValidator::new(60.0, true);
        let frame = v
            .validate(RawFrame {
                bytes,
                timestamp: 1.0,
                source: 0,
                source_kind: SourceKind::BeastTcp,
                signal_level: None,
            })
            .unwrap();
        assert!(frame.corrected);
        assert_eq!(hex_encode(&frame.raw), "8D4840D6202CC371C32CE0576098");
        assert_eq!(v.stats.corrected, 1);
    }

    #[test]
    fn test_residual_icao_requires_known_aircraft() {
        let mut v = FrameValidator::new(60.0, true);

        // DF4 altitude reply: candidate ICAO not yet vouched for.
        let df4 = "20001718029FCD";
        let r = v.validate(raw(df4, 1.0));
        assert_eq!(r.unwrap_err(), FrameReject::UnknownIcao);
        assert_eq!(v.stats.dropped_unknown_icao, 1);

        // Vouch via the syndrome, then the same frame passes.
        let icao = crc::residual_icao(&hex_decode(df4).unwrap());
        v.cache.register(icao, 1.5);
        let frame = v.validate(raw(df4, 2.0)).unwrap();
        assert_eq!(frame.df, 4);
        assert_eq!(frame.icao, icao);
    }

    #[test]
    fn test_validate_bad_length() {
        let mut v = FrameValidator::new(60.0, true);
        let r = v.validate(RawFrame {
            bytes: vec![0x8D, 0x48],
            timestamp: 0.0,
            source: 0,
            source_kind: SourceKind::AvrTcp,
            signal_level: None,
        });
        assert_eq!(r.unwrap_err(), FrameReject::Length);
        assert_eq!(v.stats.rejected_length, 1);
    }

    #[test]
    fn test_validate_unknown_df() {
        // DF=3 (byte 0 = 0x18) is not in the table.
        let mut v = FrameValidator::new(60.0, true);
        let r = v.validate(RawFrame {
            bytes: vec![0x18, 0, 0, 0, 0, 0, 0],
            timestamp: 0.0,
            source: 0,
            source_kind: SourceKind::AvrTcp,
            signal_level: None,
        });
        assert_eq!(r.unwrap_err(), FrameReject::UnknownDf);
    }

    #[test]
    fn test_me_field() {
        let frame = parse_hex_uncached("8D4840D6202CC371C32CE0576098", 1.0).unwrap();
        assert_eq!(frame.me().len(), 7);
        assert_eq!(frame.type_code(), Some(4)); // identification, category set D
    }

    #[test]
    fn test_icao_cache_expiry() {
        let mut cache = IcaoCache::new(60.0);
        let icao = Icao([0x48, 0x40, 0xD6]);

        assert!(!cache.is_known(&icao, 0.0));
        cache.register(icao, 1.0);
        assert!(cache.is_known(&icao, 2.0));
        assert!(!cache.is_known(&icao, 62.0));
    }

    #[test]
    fn test_icao_cache_prune() {
        let mut cache = IcaoCache::new(10.0);
        cache.register(Icao([0x01, 0x02, 0x03]), 0.0);
        cache.register(Icao([0x04, 0x05, 0x06]), 5.0);

        assert_eq!(cache.len(), 2);
        cache.prune(12.0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_explicit_icao_registers_cache() {
        let mut v = FrameValidator::new(60.0, true);
        v.validate(raw("8D4840D6202CC371C32CE0576098", 1.0)).unwrap();
        assert!(v.cache.is_known(&Icao([0x48, 0x40, 0xD6]), 2.0));
        assert_eq!(v.known_icaos(), 1);
    }
}
