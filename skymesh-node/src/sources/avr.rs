//! AVR ASCII framing: one frame per line, `*<hex>;`.
//!
//! The hex body is 14 chars (56-bit short frame) or 28 chars (112-bit
//! long frame). Some feeders emit `@<12-hex-mlat><hex>;` — the MLAT
//! prefix is dropped, same as the Beast path.

use skymesh_core::types::hex_decode;

/// Parse one AVR line into raw frame bytes. Returns `None` for comments,
/// empty lines and anything malformed.
pub fn parse_avr_line(line: &str) -> Option<Vec<u8>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let body = if let Some(rest) = line.strip_prefix('*') {
        rest.strip_suffix(';')?
    } else if let Some(rest) = line.strip_prefix('@') {
        // MLAT variant: 12 hex chars of counter precede the frame.
        let rest = rest.strip_suffix(';')?;
        if rest.len() <= 12 {
            return None;
        }
        &rest[12..]
    } else {
        return None;
    };

    if body.len() != 14 && body.len() != 28 {
        return None;
    }

    hex_decode(body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use skymesh_core::types::hex_encode;

    #[test]
    fn test_long_frame() {
        let bytes = parse_avr_line("*8D4840D6202CC371C32CE0576098;").unwrap();
        assert_eq!(hex_encode(&bytes), "8D4840D6202CC371C32CE0576098");
    }

    #[test]
    fn test_short_frame() {
        let bytes = parse_avr_line("*02E197C845AC82;").unwrap();
        assert_eq!(bytes.len(), 7);
    }

    #[test]
    fn test_lowercase_and_whitespace() {
        let bytes = parse_avr_line("  *8d4840d6202cc371c32ce0576098;  ").unwrap();
        assert_eq!(hex_encode(&bytes), "8D4840D6202CC371C32CE0576098");
    }

    #[test]
    fn test_mlat_prefix_dropped() {
        let bytes = parse_avr_line("@0123456789AB8D4840D6202CC371C32CE0576098;").unwrap();
        assert_eq!(hex_encode(&bytes), "8D4840D6202CC371C32CE0576098");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_avr_line("").is_none());
        assert!(parse_avr_line("# comment").is_none());
        assert!(parse_avr_line("8D4840D6202CC371C32CE0576098").is_none()); // no '*'
        assert!(parse_avr_line("*8D4840D6;").is_none()); // wrong length
        assert!(parse_avr_line("*8D4840D6202CC371C32CE0576098").is_none()); // no ';'
        assert!(parse_avr_line("*ZZZZZZZZZZZZZZ;").is_none()); // bad hex
    }
}
