// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire protocol for the LUXLINK DMX512 command link.
//!
//! Framed binary request/response protocol carried between the Linux host
//! and the real-time core over a shared-memory tty channel.
//!
//! # Packet Format
//!
//! ```text
//! Command  (host -> RT):   +------+------+--------+--------+---------+-----+
//!                          | 0xAA |  op  | len_lo | len_hi | payload | xor |
//!                          +------+------+--------+--------+---------+-----+
//! Response (RT -> host):   +------+------+--------+--------+---------+-----+
//!                          | 0xBB | stat | len_lo | len_hi | payload | xor |
//!                          +------+------+--------+--------+---------+-----+
//! ```
//!
//! Length is little-endian; all numeric payload fields are little-endian.
//! The XOR checksum covers every byte preceding it.
//!
//! The crate is `no_std` with fixed buffers so the same codec runs on the
//! bare-metal core (fed byte-by-byte from an interrupt ring) and on Linux.

#![cfg_attr(not(feature = "std"), no_std)]

mod decode;
mod payload;

pub use decode::{DecodeError, Decoder};
pub use payload::{decode_set_channels, EngineStatus, TimingParams};

use core::fmt;

/// Magic byte opening every command packet (host -> RT).
pub const MAGIC_CMD: u8 = 0xAA;

/// Magic byte opening every response packet (RT -> host).
pub const MAGIC_RESP: u8 = 0xBB;

/// Maximum payload carried by a single packet.
pub const MAX_PAYLOAD: usize = 1024;

/// Channels in one DMX512 universe.
pub const MAX_CHANNELS: usize = 512;

/// One DMX frame on the wire: start code + 512 slots.
pub const FRAME_SIZE: usize = MAX_CHANNELS + 1;

/// Fixed header: magic + op/status + 16-bit length.
pub const HEADER_LEN: usize = 4;

/// Smallest valid packet: header + checksum.
pub const MIN_PACKET: usize = HEADER_LEN + 1;

/// Largest packet the codec will produce or accept.
pub const MAX_PACKET: usize = HEADER_LEN + MAX_PAYLOAD + 1;

/// Guard word required by the system-reset command (little-endian).
pub const RESET_GUARD: u32 = 0xDEAD_BEEF;

/// Command opcodes understood by the real-time dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Write a run of channel values starting at a 0-based slot.
    SetChannels = 0x01,
    /// Read engine state (enabled, frame count, fps).
    GetStatus = 0x02,
    /// Start continuous frame emission.
    Enable = 0x03,
    /// Stop emission after the current frame.
    Disable = 0x04,
    /// Zero all 512 slots.
    Blackout = 0x05,
    /// Update refresh rate / BREAK / MAB (zero fields keep current values).
    SetTiming = 0x06,
    /// Read the timing triple.
    GetTiming = 0x07,
    /// Guarded SoC reset. Honoured by the tiny-core dispatcher only.
    SystemReset = 0xF0,
}

impl Opcode {
    /// Decode an opcode byte. Unknown values return `None` and map to
    /// [`Status::InvalidCommand`] at the dispatcher.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::SetChannels),
            0x02 => Some(Self::GetStatus),
            0x03 => Some(Self::Enable),
            0x04 => Some(Self::Disable),
            0x05 => Some(Self::Blackout),
            0x06 => Some(Self::SetTiming),
            0x07 => Some(Self::GetTiming),
            0xF0 => Some(Self::SystemReset),
            _ => None,
        }
    }
}

/// Response status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Command executed.
    Ok = 0x00,
    /// First byte of the packet was not the command magic.
    InvalidMagic = 0x01,
    /// XOR checksum mismatch.
    InvalidChecksum = 0x02,
    /// Unknown opcode.
    InvalidCommand = 0x03,
    /// Payload length does not match the opcode's contract.
    InvalidLength = 0x04,
    /// Command was well-formed but rejected (range error, bad guard, ...).
    Error = 0xFF,
}

impl Status {
    /// Decode a status byte; anything unrecognised collapses to `Error`.
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x00 => Self::Ok,
            0x01 => Self::InvalidMagic,
            0x02 => Self::InvalidChecksum,
            0x03 => Self::InvalidCommand,
            0x04 => Self::InvalidLength,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::InvalidMagic => "invalid magic",
            Self::InvalidChecksum => "invalid checksum",
            Self::InvalidCommand => "invalid command",
            Self::InvalidLength => "invalid length",
            Self::Error => "error",
        };
        f.write_str(text)
    }
}

/// Encoding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Output buffer cannot hold the packet.
    BufferTooSmall,
    /// Payload exceeds [`MAX_PAYLOAD`].
    OverLength,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => f.write_str("output buffer too small"),
            Self::OverLength => f.write_str("payload exceeds protocol maximum"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

/// XOR of every byte in `data`.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

fn encode(magic: u8, kind: u8, payload: &[u8], buf: &mut [u8]) -> Result<usize, EncodeError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(EncodeError::OverLength);
    }
    let total = HEADER_LEN + payload.len() + 1;
    if buf.len() < total {
        return Err(EncodeError::BufferTooSmall);
    }

    buf[0] = magic;
    buf[1] = kind;
    buf[2] = (payload.len() & 0xFF) as u8;
    buf[3] = (payload.len() >> 8) as u8;
    buf[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    buf[total - 1] = xor_checksum(&buf[..total - 1]);

    Ok(total)
}

/// Encode a command packet into `buf`, returning the packet length.
pub fn encode_command(op: Opcode, payload: &[u8], buf: &mut [u8]) -> Result<usize, EncodeError> {
    encode(MAGIC_CMD, op as u8, payload, buf)
}

/// Encode a response packet into `buf`, returning the packet length.
pub fn encode_response(
    status: Status,
    payload: &[u8],
    buf: &mut [u8],
) -> Result<usize, EncodeError> {
    encode(MAGIC_RESP, status as u8, payload, buf)
}
