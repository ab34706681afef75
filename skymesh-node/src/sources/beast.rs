//! Beast binary framing decoder.
//!
//! The Beast stream escapes frames with 0x1A:
//!
//! ```text
//! 1A '1' <6-byte MLAT> <1-byte signal> <2-byte Mode-AC>   (discarded)
//! 1A '2' <6-byte MLAT> <1-byte signal> <7-byte Mode-S short>
//! 1A '3' <6-byte MLAT> <1-byte signal> <14-byte Mode-S long>
//! ```
//!
//! A literal 0x1A inside the body is doubled (`1A 1A`). The MLAT counter
//! is discarded — local receive time is used instead; if multilateration
//! across receivers is ever needed, this is the place to keep it.
//!
//! The decoder is incremental: feed it arbitrary byte chunks, collect
//! complete frames.

const ESC: u8 = 0x1A;

/// One decoded Beast frame (Mode-S only; Mode-AC is dropped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeastFrame {
    pub payload: Vec<u8>,
    pub signal_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Hunting for an escape byte.
    Idle,
    /// Escape seen, next byte is the frame type.
    Type,
    /// Collecting `want` body bytes (6 MLAT + 1 signal + payload).
    Body { want: usize, mode_ac: bool },
    /// Inside the body, saw an escape: doubled = literal, else new frame.
    BodyEsc { want: usize, mode_ac: bool },
}

/// Incremental Beast stream decoder.
pub struct BeastDecoder {
    state: State,
    body: Vec<u8>,
    /// Mode-AC frames seen (and discarded).
    pub mode_ac_discarded: u64,
    /// Bytes skipped hunting for sync.
    pub desync_bytes: u64,
}

impl Default for BeastDecoder {
    fn default() -> Self {
        BeastDecoder::new()
    }
}

impl BeastDecoder {
    pub fn new() -> Self {
        BeastDecoder {
            state: State::Idle,
            body: Vec::with_capacity(21),
            mode_ac_discarded: 0,
            desync_bytes: 0,
        }
    }

    /// Feed a chunk; completed Mode-S frames are appended to `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<BeastFrame>) {
        for &byte in chunk {
            self.step(byte, out);
        }
    }

    fn step(&mut self, byte: u8, out: &mut Vec<BeastFrame>) {
        match self.state {
            State::Idle => {
                if byte == ESC {
                    self.state = State::Type;
                } else {
                    self.desync_bytes += 1;
                }
            }
            State::Type => {
                let (payload_len, mode_ac) = match byte {
                    b'1' => (2, true),
                    b'2' => (7, false),
                    b'3' => (14, false),
                    ESC => {
                        // Doubled escape in noise; stay hunting.
                        self.state = State::Type;
                        return;
                    }
                    _ => {
                        self.desync_bytes += 1;
                        self.state = State::Idle;
                        return;
                    }
                };
                self.body.clear();
                self.state = State::Body {
                    want: 7 + payload_len,
                    mode_ac,
                };
            }
            State::Body { want, mode_ac } => {
                if byte == ESC {
                    self.state = State::BodyEsc { want, mode_ac };
                } else {
                    self.take(byte, want, mode_ac, out);
                }
            }
            State::BodyEsc { want, mode_ac } => {
                if byte == ESC {
                    // Doubled: a literal 0x1A body byte.
                    self.state = State::Body { want, mode_ac };
                    self.take(ESC, want, mode_ac, out);
                } else {
                    // A new frame started mid-body: resync on its type.
                    self.desync_bytes += self.body.len() as u64;
                    self.state = State::Type;
                    self.step(byte, out);
                }
            }
        }
    }

    fn take(&mut self, byte: u8, want: usize, mode_ac: bool, out: &mut Vec<BeastFrame>) {
        self.body.push(byte);
        if self.body.len() < want {
            return;
        }

        if mode_ac {
            self.mode_ac_discarded += 1;
        } else {
            out.push(BeastFrame {
                // MLAT timestamp (6) and signal (1) precede the payload.
                signal_level: self.body[6],
                payload: self.body[7..].to_vec(),
            });
        }
        self.body.clear();
        self.state = State::Idle;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use skymesh_core::types::hex_decode;

    /// Build a Beast frame with proper escape doubling.
    fn beast_encode(frame_type: u8, payload: &[u8], signal: u8) -> Vec<u8> {
        let mut out = vec![ESC, frame_type];
        let mut body = vec![0u8; 6]; // MLAT counter (ignored by decoder)
        body.push(signal);
        body.extend_from_slice(payload);
        for b in body {
            out.push(b);
            if b == ESC {
                out.push(ESC);
            }
        }
        out
    }

    #[test]
    fn test_decode_long_frame() {
        let payload = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        let stream = beast_encode(b'3', &payload, 0x42);

        let mut dec = BeastDecoder::new();
        let mut out = Vec::new();
        dec.push(&stream, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, payload);
        assert_eq!(out[0].signal_level, 0x42);
    }

    #[test]
    fn test_decode_short_frame() {
        let payload = hex_decode("28001A1B2C3D4E").unwrap(); // contains 0x1A
        let stream = beast_encode(b'2', &payload, 7);

        let mut dec = BeastDecoder::new();
        let mut out = Vec::new();
        dec.push(&stream, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, payload, "escaped 0x1A survives");
    }

    #[test]
    fn test_mode_ac_discarded() {
        let stream = beast_encode(b'1', &[0x12, 0x34], 9);
        let mut dec = BeastDecoder::new();
        let mut out = Vec::new();
        dec.push(&stream, &mut out);

        assert!(out.is_empty());
        assert_eq!(dec.mode_ac_discarded, 1);
    }

    #[test]
    fn test_split_across_chunks() {
        let payload = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        let stream = beast_encode(b'3', &payload, 0);

        let mut dec = BeastDecoder::new();
        let mut out = Vec::new();
        for chunk in stream.chunks(3) {
            dec.push(chunk, &mut out);
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, payload);
    }

    #[test]
    fn test_garbage_between_frames() {
        let payload = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        let mut stream = vec![0xDE, 0xAD, 0xBE, 0xEF];
        stream.extend(beast_encode(b'3', &payload, 0));
        stream.extend([0x00, 0x01]);
        stream.extend(beast_encode(b'3', &payload, 0));

        let mut dec = BeastDecoder::new();
        let mut out = Vec::new();
        dec.push(&stream, &mut out);

        assert_eq!(out.len(), 2);
        assert!(dec.desync_bytes >= 6);
    }

    #[test]
    fn test_back_to_back_frames() {
        let p1 = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        let p2 = hex_decode("8D40621D58C382D690C8AC2863A7").unwrap();
        let mut stream = beast_encode(b'3', &p1, 1);
        stream.extend(beast_encode(b'3', &p2, 2));

        let mut dec = BeastDecoder::new();
        let mut out = Vec::new();
        dec.push(&stream, &mut out);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].payload, p1);
        assert_eq!(out[1].payload, p2);
    }

    #[test]
    fn test_unknown_type_resyncs() {
        let mut stream = vec![ESC, b'9', 0x01, 0x02];
        let payload = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        stream.extend(beast_encode(b'3', &payload, 0));

        let mut dec = BeastDecoder::new();
        let mut out = Vec::new();
        dec.push(&stream, &mut out);
        assert_eq!(out.len(), 1);
    }
}
