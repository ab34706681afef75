//! CRC-24 validation for Mode S messages.
//!
//! ICAO standard generator 0xFFF409 (polynomial 0x1FFF409, MSB-first).
//!
//! For DF17/18 (ADS-B) the last 24 bits are a pure CRC: valid frames leave
//! a zero syndrome. For DF0/4/5/16/20/21 the last 24 bits are the CRC
//! XOR'd with the ICAO address, so the syndrome of a clean frame *is* the
//! address (possibly XOR'd with an interrogator code for DF11).

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::types::Icao;

const GENERATOR: u32 = 0xFFF409;

// ---------------------------------------------------------------------------
// CRC lookup table (compile-time)
// ---------------------------------------------------------------------------

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ GENERATOR;
            } else {
                crc <<= 1;
            }
            crc &= 0xFFFFFF;
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

// ---------------------------------------------------------------------------
// Syndrome computation
// ---------------------------------------------------------------------------

/// Polynomial division of all bytes, no parity-field XOR.
fn crc24_raw(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc = ((crc << 8) ^ CRC_TABLE[((crc >> 16) ^ byte as u32) as usize & 0xFF]) & 0xFFFFFF;
    }
    crc
}

/// Mode S CRC-24 syndrome of a full 7- or 14-byte frame.
///
/// Divides everything but the trailing parity field, then XORs with the
/// parity field. Zero for a clean DF17/18; the ICAO address for clean
/// surveillance replies.
pub fn syndrome(frame: &[u8]) -> u32 {
    if frame.len() <= 3 {
        let mut val = 0u32;
        for &b in frame {
            val = (val << 8) | b as u32;
        }
        return val & 0xFFFFFF;
    }

    let payload_len = frame.len() - 3;
    let mut crc = crc24_raw(&frame[..payload_len]);
    crc ^= (frame[payload_len] as u32) << 16
        | (frame[payload_len + 1] as u32) << 8
        | frame[payload_len + 2] as u32;
    crc
}

/// CRC-24 over the payload only (everything except the parity field).
pub fn checksum(frame: &[u8]) -> u32 {
    if frame.len() <= 3 {
        return 0;
    }
    crc24_raw(&frame[..frame.len() - 3])
}

/// Recover a candidate ICAO address from the syndrome of a surveillance
/// reply (DF0/4/5/16/20/21). The result is only trustworthy when the
/// address is already known to the tracker.
pub fn residual_icao(frame: &[u8]) -> Icao {
    Icao::from_u32(syndrome(frame))
}

// ---------------------------------------------------------------------------
// Syndrome tables for error correction
// ---------------------------------------------------------------------------

fn build_syndrome_table(n_bits: usize) -> HashMap<u32, Vec<usize>> {
    let n_bytes = n_bits / 8;
    let mut table = HashMap::new();

    // Single-bit errors
    for bit in 0..n_bits {
        let mut msg = vec![0u8; n_bytes];
        msg[bit / 8] |= 1 << (7 - (bit % 8));
        let s = syndrome(&msg);
        table.entry(s).or_insert_with(|| vec![bit]);
    }

    // Double-bit errors
    for bit1 in 0..n_bits {
        for bit2 in (bit1 + 1)..n_bits {
            let mut msg = vec![0u8; n_bytes];
            msg[bit1 / 8] |= 1 << (7 - (bit1 % 8));
            msg[bit2 / 8] |= 1 << (7 - (bit2 % 8));
            let s = syndrome(&msg);
            table.entry(s).or_insert_with(|| vec![bit1, bit2]);
        }
    }

    table
}

static SYNDROME_TABLE_112: LazyLock<HashMap<u32, Vec<usize>>> =
    LazyLock::new(|| build_syndrome_table(112));
static SYNDROME_TABLE_56: LazyLock<HashMap<u32, Vec<usize>>> =
    LazyLock::new(|| build_syndrome_table(56));

/// Attempt to correct 1-2 bit errors in place.
///
/// Looks up the syndrome in pre-built tables; if found, flips the
/// identified bits and re-validates. Bits 0-4 (the DF field) are never
/// corrected so one message type cannot turn into another.
///
/// Returns true if `frame` now has a zero syndrome.
pub fn try_fix(frame: &mut [u8]) -> bool {
    let s = syndrome(frame);
    if s == 0 {
        return false; // already clean, nothing corrected
    }

    let table = if frame.len() * 8 == 112 {
        &*SYNDROME_TABLE_112
    } else {
        &*SYNDROME_TABLE_56
    };

    let bit_positions = match table.get(&s) {
        Some(b) => b,
        None => return false,
    };

    if bit_positions.iter().any(|&b| b < 5) {
        return false;
    }

    for &bit in bit_positions {
        frame[bit / 8] ^= 1 << (7 - (bit % 8));
    }

    if syndrome(frame) != 0 {
        // Undo: the table entry did not actually repair this frame.
        for &bit in bit_positions {
            frame[bit / 8] ^= 1 << (7 - (bit % 8));
        }
        return false;
    }

    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
