// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framed command dispatcher.
//!
//! Consumes validated packets from the IPC path, drives the frame engine,
//! and emits exactly one framed response per command. Two entry points
//! cover the two core variants:
//!
//! - [`Dispatcher::feed`] - byte-stream input for the tiny core, where the
//!   mailbox ISR delivers raw bytes through a ring buffer.
//! - [`Dispatcher::dispatch_message`] - whole-packet input for the
//!   larger core, where the IPC queue hands over complete messages.
//!
//! Nothing in here panics: malformed input maps to a status response and
//! the engine keeps running with its last good state.

use crate::engine::DmxEngine;
use crate::hal::{Clock, CriticalSection, SocReset};
use crate::uart::DmxUart;

use luxlink_proto::{
    decode_set_channels, encode_response, xor_checksum, DecodeError, Decoder, EngineStatus,
    Opcode, Status, TimingParams, HEADER_LEN, MAGIC_CMD, MIN_PACKET, RESET_GUARD,
};

/// Response scratch: header + largest payload (engine status) + checksum.
const RESP_BUF: usize = HEADER_LEN + EngineStatus::WIRE_LEN + 1;

/// Command dispatcher with a streaming decoder and a fixed response buffer.
pub struct Dispatcher {
    decoder: Decoder,
    resp: [u8; RESP_BUF],
    /// Garbage bytes skipped while hunting for a packet start.
    bad_magic: u32,
}

impl Dispatcher {
    pub const fn new() -> Self {
        Self {
            decoder: Decoder::new(MAGIC_CMD),
            resp: [0; RESP_BUF],
            bad_magic: 0,
        }
    }

    /// Bytes discarded during resynchronization.
    pub fn bad_magic_count(&self) -> u32 {
        self.bad_magic
    }

    /// Feed raw bytes from the interrupt ring.
    ///
    /// `reply` is called once per completed command and once per checksum
    /// or length error. Stray bytes between packets are counted and
    /// skipped without a response (there is no command to answer).
    pub fn feed<U, C, I>(
        &mut self,
        bytes: &[u8],
        engine: &mut DmxEngine<U, C, I>,
        mut reset: Option<&mut dyn SocReset>,
        mut reply: impl FnMut(&[u8]),
    ) where
        U: DmxUart,
        C: Clock,
        I: CriticalSection,
    {
        let Self { decoder, resp, bad_magic } = self;

        for &byte in bytes {
            match decoder.feed(byte) {
                Ok(None) => {}
                Ok(Some((kind, payload))) => {
                    let allow_reset = reset.is_some();
                    let (len, do_reset) = execute(resp, kind, payload, engine, allow_reset);
                    reply(&resp[..len]);
                    if do_reset {
                        engine.disable();
                        if let Some(r) = reset.as_deref_mut() {
                            r.system_reset();
                        }
                    }
                }
                Err(DecodeError::BadMagic(_)) => {
                    *bad_magic = bad_magic.wrapping_add(1);
                }
                Err(DecodeError::BadChecksum { .. }) => {
                    let len = respond(resp, Status::InvalidChecksum, &[]);
                    reply(&resp[..len]);
                }
                Err(DecodeError::OverLength(_)) => {
                    let len = respond(resp, Status::InvalidLength, &[]);
                    reply(&resp[..len]);
                }
            }
        }
    }

    /// Dispatch a complete packet delivered by a message-based transport.
    pub fn dispatch_message<U, C, I>(
        &mut self,
        packet: &[u8],
        engine: &mut DmxEngine<U, C, I>,
        mut reset: Option<&mut dyn SocReset>,
        mut reply: impl FnMut(&[u8]),
    ) where
        U: DmxUart,
        C: Clock,
        I: CriticalSection,
    {
        let status = validate_packet(packet);
        if status != Status::Ok {
            let len = respond(&mut self.resp, status, &[]);
            reply(&self.resp[..len]);
            return;
        }

        let payload_len = u16::from_le_bytes([packet[2], packet[3]]) as usize;
        let payload = &packet[HEADER_LEN..HEADER_LEN + payload_len];
        let allow_reset = reset.is_some();
        let (len, do_reset) = execute(&mut self.resp, packet[1], payload, engine, allow_reset);
        reply(&self.resp[..len]);
        if do_reset {
            engine.disable();
            if let Some(r) = reset.as_deref_mut() {
                r.system_reset();
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural checks for a whole packet: size, magic, declared length,
/// checksum.
fn validate_packet(packet: &[u8]) -> Status {
    if packet.len() < MIN_PACKET {
        return Status::InvalidLength;
    }
    if packet[0] != MAGIC_CMD {
        return Status::InvalidMagic;
    }
    let payload_len = u16::from_le_bytes([packet[2], packet[3]]) as usize;
    if packet.len() != HEADER_LEN + payload_len + 1 {
        return Status::InvalidLength;
    }
    let expected = xor_checksum(&packet[..packet.len() - 1]);
    if packet[packet.len() - 1] != expected {
        return Status::InvalidChecksum;
    }
    Status::Ok
}

fn respond(resp: &mut [u8; RESP_BUF], status: Status, payload: &[u8]) -> usize {
    // The scratch buffer is sized for the largest response payload, so
    // encoding cannot fail; an empty reply is the defined fallback.
    encode_response(status, payload, resp).unwrap_or(0)
}

/// Run one command. Returns the response length and whether a guarded
/// system reset was accepted.
fn execute<U, C, I>(
    resp: &mut [u8; RESP_BUF],
    kind: u8,
    payload: &[u8],
    engine: &mut DmxEngine<U, C, I>,
    allow_reset: bool,
) -> (usize, bool)
where
    U: DmxUart,
    C: Clock,
    I: CriticalSection,
{
    let Some(op) = Opcode::from_u8(kind) else {
        return (respond(resp, Status::InvalidCommand, &[]), false);
    };

    match op {
        Opcode::SetChannels => match decode_set_channels(payload) {
            Some((start, values)) => match engine.set_channels(start, values) {
                Ok(()) => (respond(resp, Status::Ok, &[]), false),
                Err(_) => (respond(resp, Status::Error, &[]), false),
            },
            None if payload.len() < 3 => (respond(resp, Status::InvalidLength, &[]), false),
            None => (respond(resp, Status::Error, &[]), false),
        },

        Opcode::GetStatus => {
            let mut body = [0u8; EngineStatus::WIRE_LEN];
            engine.status().encode(&mut body);
            (respond(resp, Status::Ok, &body), false)
        }

        Opcode::Enable => {
            engine.enable();
            (respond(resp, Status::Ok, &[]), false)
        }

        Opcode::Disable => {
            engine.disable();
            (respond(resp, Status::Ok, &[]), false)
        }

        Opcode::Blackout => {
            engine.blackout();
            (respond(resp, Status::Ok, &[]), false)
        }

        Opcode::SetTiming => match TimingParams::decode(payload) {
            Some(t) => match engine.set_timing(t) {
                Ok(()) => (respond(resp, Status::Ok, &[]), false),
                Err(_) => (respond(resp, Status::Error, &[]), false),
            },
            None => (respond(resp, Status::InvalidLength, &[]), false),
        },

        Opcode::GetTiming => {
            let mut body = [0u8; TimingParams::WIRE_LEN];
            engine.get_timing().encode(&mut body);
            (respond(resp, Status::Ok, &body), false)
        }

        Opcode::SystemReset => {
            if !allow_reset {
                return (respond(resp, Status::InvalidCommand, &[]), false);
            }
            if payload.len() != 4 {
                return (respond(resp, Status::InvalidLength, &[]), false);
            }
            let guard = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            if guard != RESET_GUARD {
                return (respond(resp, Status::Error, &[]), false);
            }
            // Reply first so the host sees the acknowledgement, then the
            // caller disables the engine and pulls the reset line.
            (respond(resp, Status::Ok, &[]), true)
        }
    }
}
