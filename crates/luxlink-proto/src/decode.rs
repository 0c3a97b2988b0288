// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Restartable byte-fed packet decoder.
//!
//! The decoder is driven one byte at a time so the real-time side can feed
//! it straight from an interrupt-filled ring buffer without intermediate
//! framing. Any error resets the machine to `Idle` and resynchronizes on
//! the next magic byte.

use crate::{xor_checksum, HEADER_LEN, MAX_PAYLOAD};

use core::fmt;

/// Decoder state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Hunting for the magic byte.
    Idle,
    /// Got magic, expecting opcode / status byte.
    Kind,
    /// Expecting length low byte.
    LenLo,
    /// Expecting length high byte.
    LenHi,
    /// Accumulating payload bytes.
    Payload,
    /// Expecting the XOR checksum.
    Checksum,
}

/// Decode failures. Each one resets the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Byte seen while hunting for a packet start was not the magic.
    BadMagic(u8),
    /// Checksum byte did not match the computed XOR.
    BadChecksum { expected: u8, got: u8 },
    /// Declared payload length exceeds the protocol maximum.
    OverLength(u16),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(b) => write!(f, "bad magic byte 0x{b:02X}"),
            Self::BadChecksum { expected, got } => {
                write!(f, "checksum mismatch (expected 0x{expected:02X}, got 0x{got:02X})")
            }
            Self::OverLength(len) => write!(f, "declared payload length {len} over limit"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

/// Byte-fed packet decoder with a fixed internal buffer.
///
/// Generic over the expected magic so the same machine decodes command
/// streams on the real-time side and response streams on the host side.
pub struct Decoder {
    magic: u8,
    state: State,
    buf: [u8; HEADER_LEN + MAX_PAYLOAD],
    pos: usize,
    payload_len: usize,
}

impl Decoder {
    /// Create a decoder expecting packets that open with `magic`.
    pub const fn new(magic: u8) -> Self {
        Self {
            magic,
            state: State::Idle,
            buf: [0; HEADER_LEN + MAX_PAYLOAD],
            pos: 0,
            payload_len: 0,
        }
    }

    /// Drop any partial packet and return to `Idle`.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.pos = 0;
        self.payload_len = 0;
    }

    /// Feed one byte.
    ///
    /// Returns `Ok(Some((kind, payload)))` when a checksum-validated packet
    /// completes, where `kind` is the opcode (command stream) or status
    /// byte (response stream). Errors reset the machine; the caller decides
    /// whether to answer them.
    pub fn feed(&mut self, byte: u8) -> Result<Option<(u8, &[u8])>, DecodeError> {
        match self.state {
            State::Idle => {
                if byte != self.magic {
                    return Err(DecodeError::BadMagic(byte));
                }
                self.buf[0] = byte;
                self.pos = 1;
                self.state = State::Kind;
                Ok(None)
            }

            State::Kind => {
                self.buf[self.pos] = byte;
                self.pos += 1;
                self.state = State::LenLo;
                Ok(None)
            }

            State::LenLo => {
                self.buf[self.pos] = byte;
                self.pos += 1;
                self.payload_len = byte as usize;
                self.state = State::LenHi;
                Ok(None)
            }

            State::LenHi => {
                self.buf[self.pos] = byte;
                self.pos += 1;
                self.payload_len |= (byte as usize) << 8;

                if self.payload_len > MAX_PAYLOAD {
                    let len = self.payload_len as u16;
                    self.reset();
                    return Err(DecodeError::OverLength(len));
                }
                self.state = if self.payload_len == 0 {
                    State::Checksum
                } else {
                    State::Payload
                };
                Ok(None)
            }

            State::Payload => {
                self.buf[self.pos] = byte;
                self.pos += 1;
                if self.pos >= HEADER_LEN + self.payload_len {
                    self.state = State::Checksum;
                }
                Ok(None)
            }

            State::Checksum => {
                let expected = xor_checksum(&self.buf[..self.pos]);
                let total = self.pos;
                self.reset();
                if byte != expected {
                    return Err(DecodeError::BadChecksum { expected, got: byte });
                }
                let kind = self.buf[1];
                Ok(Some((kind, &self.buf[HEADER_LEN..total])))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_command, encode_response, Opcode, Status, MAGIC_CMD, MAGIC_RESP};

    fn feed_all<'a>(dec: &mut Decoder, bytes: &'a [u8]) -> Option<(u8, &'a [u8])> {
        let mut hit = None;
        for (i, &b) in bytes.iter().enumerate() {
            match dec.feed(b) {
                Ok(Some((kind, payload))) => {
                    assert_eq!(i, bytes.len() - 1, "packet completed early");
                    // Re-borrow through the final feed below.
                    hit = Some((kind, payload.len()));
                }
                Ok(None) => {}
                Err(e) => panic!("unexpected decode error: {e}"),
            }
        }
        // Replay the final byte result by decoding again is not possible on
        // a streaming decoder; instead return the recorded kind with a
        // payload slice reconstructed from the input.
        hit.map(move |(kind, len)| (kind, &bytes[HEADER_LEN..HEADER_LEN + len]))
    }

    #[test]
    fn test_decode_round_trip() {
        let mut buf = [0u8; 64];
        let payload = [0x01, 0x00, 0xAB, 0xCD];
        let len = encode_command(Opcode::SetChannels, &payload, &mut buf).unwrap();

        let mut dec = Decoder::new(MAGIC_CMD);
        let (kind, got) = feed_all(&mut dec, &buf[..len]).expect("packet");
        assert_eq!(kind, Opcode::SetChannels as u8);
        assert_eq!(got, &payload);
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut buf = [0u8; 16];
        let len = encode_response(Status::Ok, &[], &mut buf).unwrap();

        let mut dec = Decoder::new(MAGIC_RESP);
        let mut out = None;
        for &b in &buf[..len] {
            if let Some((kind, payload)) = dec.feed(b).unwrap() {
                out = Some((kind, payload.is_empty()));
            }
        }
        assert_eq!(out, Some((Status::Ok as u8, true)));
    }

    #[test]
    fn test_decode_bad_magic_then_resync() {
        let mut buf = [0u8; 16];
        let len = encode_command(Opcode::Enable, &[], &mut buf).unwrap();

        let mut dec = Decoder::new(MAGIC_CMD);
        assert_eq!(dec.feed(0x55), Err(DecodeError::BadMagic(0x55)));
        assert_eq!(dec.feed(0x00), Err(DecodeError::BadMagic(0x00)));

        // Still resynchronizes on the real packet.
        let mut done = false;
        for &b in &buf[..len] {
            if dec.feed(b).unwrap().is_some() {
                done = true;
            }
        }
        assert!(done);
    }

    #[test]
    fn test_decode_bad_checksum() {
        // `AA 03 00 00 00` from the wire trace: ENABLE with a zeroed checksum.
        let mut dec = Decoder::new(MAGIC_CMD);
        for &b in &[0xAAu8, 0x03, 0x00, 0x00] {
            assert_eq!(dec.feed(b).unwrap(), None);
        }
        assert_eq!(
            dec.feed(0x00),
            Err(DecodeError::BadChecksum { expected: 0xA9, got: 0x00 })
        );
    }

    #[test]
    fn test_decode_over_length_resets() {
        let mut dec = Decoder::new(MAGIC_CMD);
        assert_eq!(dec.feed(MAGIC_CMD).unwrap(), None);
        assert_eq!(dec.feed(0x01).unwrap(), None);
        assert_eq!(dec.feed(0xFF).unwrap(), None);
        // 0x0FFF = 4095 > MAX_PAYLOAD.
        assert_eq!(dec.feed(0x0F), Err(DecodeError::OverLength(0x0FFF)));

        // Machine is back in Idle and accepts a clean packet.
        let mut buf = [0u8; 16];
        let len = encode_command(Opcode::Blackout, &[], &mut buf).unwrap();
        let mut done = false;
        for &b in &buf[..len] {
            if dec.feed(b).unwrap().is_some() {
                done = true;
            }
        }
        assert!(done);
    }

    #[test]
    fn test_decode_consumed_prefix_reencodes_identically() {
        // Property: a decoded packet re-encodes to the exact consumed bytes.
        let mut buf = [0u8; 64];
        let payload = [0x2A, 0x00, 1, 2, 3, 4, 5];
        let len = encode_command(Opcode::SetChannels, &payload, &mut buf).unwrap();

        let mut dec = Decoder::new(MAGIC_CMD);
        let mut reencoded = [0u8; 64];
        for &b in &buf[..len] {
            if let Some((kind, got)) = dec.feed(b).unwrap() {
                let op = Opcode::from_u8(kind).unwrap();
                let n = encode_command(op, got, &mut reencoded).unwrap();
                assert_eq!(&reencoded[..n], &buf[..len]);
            }
        }
    }

    #[test]
    fn test_decode_back_to_back_packets() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        let la = encode_command(Opcode::Enable, &[], &mut a).unwrap();
        let lb = encode_command(Opcode::Disable, &[], &mut b).unwrap();

        let mut stream = [0u8; 32];
        stream[..la].copy_from_slice(&a[..la]);
        stream[la..la + lb].copy_from_slice(&b[..lb]);

        let mut dec = Decoder::new(MAGIC_CMD);
        let mut kinds = [0u8; 2];
        let mut n = 0;
        for &byte in &stream[..la + lb] {
            if let Some((kind, _)) = dec.feed(byte).unwrap() {
                kinds[n] = kind;
                n += 1;
            }
        }
        assert_eq!(n, 2);
        assert_eq!(kinds, [Opcode::Enable as u8, Opcode::Disable as u8]);
    }
}
