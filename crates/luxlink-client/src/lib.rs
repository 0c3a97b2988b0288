// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client for the LUXLINK command link.
//!
//! Opens the shared-memory tty endpoint exposed by the remote core
//! (`/dev/ttyRPMSG0` by default), configures it for raw binary I/O, and
//! performs framed request/response exchanges with a per-read timeout.
//!
//! One method per remote command. Calls take `&mut self`, so a single
//! client instance serializes its exchanges; multiple processes may share
//! the endpoint, each paying the full round-trip cost.

mod tty;

use luxlink_proto::{
    encode_command, xor_checksum, EngineStatus, Opcode, Status, TimingParams, HEADER_LEN,
    MAGIC_RESP, MAX_CHANNELS, MAX_PAYLOAD,
};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Response wait per read, matching the firmware's worst-case turnaround.
pub const RESPONSE_TIMEOUT_MS: u32 = 1000;

/// Default endpoint exposed by the remote core.
pub const DEFAULT_DEVICE: &str = "/dev/ttyRPMSG0";

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Endpoint open or raw-mode configuration failed.
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),

    /// No (or incomplete) response within the wall-clock bound.
    #[error("timeout waiting for response")]
    Timeout,

    /// The remote executed the exchange but rejected the command.
    #[error("remote error: {0}")]
    Remote(Status),

    /// The response violated the framing contract.
    #[error("malformed response: {0}")]
    BadResponse(&'static str),
}

/// Result alias for client calls.
pub type Result<T> = std::result::Result<T, ClientError>;

/// A connection to the remote DMX engine.
#[derive(Debug)]
pub struct DmxClient {
    port: tty::RawTty,
}

impl DmxClient {
    /// Open `device` and switch it to raw mode (no canonical processing,
    /// no echo, no signal characters; `VMIN=1`, `VTIME=0`).
    pub fn open(device: &Path) -> Result<Self> {
        let port = tty::RawTty::open(device)?;
        debug!(device = %device.display(), "dmx endpoint open");
        Ok(Self { port })
    }

    /// Start continuous frame emission.
    pub fn enable(&mut self) -> Result<()> {
        self.transact(Opcode::Enable, &[]).map(|_| ())
    }

    /// Stop emission after the current frame.
    pub fn disable(&mut self) -> Result<()> {
        self.transact(Opcode::Disable, &[]).map(|_| ())
    }

    /// Zero all 512 slots.
    pub fn blackout(&mut self) -> Result<()> {
        self.transact(Opcode::Blackout, &[]).map(|_| ())
    }

    /// Write `values` starting at 0-based `start`.
    pub fn set_channels(&mut self, start: u16, values: &[u8]) -> Result<()> {
        let mut payload = [0u8; 2 + MAX_CHANNELS];
        let count = values.len().min(MAX_CHANNELS);
        payload[..2].copy_from_slice(&start.to_le_bytes());
        payload[2..2 + count].copy_from_slice(&values[..count]);
        self.transact(Opcode::SetChannels, &payload[..2 + count]).map(|_| ())
    }

    /// Read engine state.
    pub fn status(&mut self) -> Result<EngineStatus> {
        let (payload, len) = self.transact(Opcode::GetStatus, &[])?;
        EngineStatus::decode(&payload[..len])
            .ok_or(ClientError::BadResponse("status payload size"))
    }

    /// Update the timing triple; zero fields keep their current values.
    pub fn set_timing(&mut self, timing: TimingParams) -> Result<()> {
        let mut body = [0u8; TimingParams::WIRE_LEN];
        timing.encode(&mut body);
        self.transact(Opcode::SetTiming, &body).map(|_| ())
    }

    /// Read the timing triple.
    pub fn get_timing(&mut self) -> Result<TimingParams> {
        let (payload, len) = self.transact(Opcode::GetTiming, &[])?;
        TimingParams::decode(&payload[..len])
            .ok_or(ClientError::BadResponse("timing payload size"))
    }

    /// One framed exchange: encode, write fully, then read header /
    /// payload / checksum with the response timeout on every read.
    fn transact(&mut self, op: Opcode, payload: &[u8]) -> Result<([u8; 64], usize)> {
        let mut packet = [0u8; HEADER_LEN + 2 + MAX_CHANNELS + 1];
        let len = encode_command(op, payload, &mut packet)
            .map_err(|_| ClientError::BadResponse("request too large"))?;
        self.port.write_all(&packet[..len])?;

        let mut header = [0u8; HEADER_LEN];
        self.port.read_exact(&mut header, RESPONSE_TIMEOUT_MS)?;

        if header[0] != MAGIC_RESP {
            return Err(ClientError::BadResponse("response magic"));
        }
        let status = Status::from_u8(header[1]);
        let data_len = u16::from_le_bytes([header[2], header[3]]) as usize;
        if data_len > MAX_PAYLOAD {
            return Err(ClientError::BadResponse("response length"));
        }

        let mut body = [0u8; 64];
        if data_len > body.len() {
            return Err(ClientError::BadResponse("response payload too large"));
        }
        if data_len > 0 {
            self.port.read_exact(&mut body[..data_len], RESPONSE_TIMEOUT_MS)?;
        }

        let mut checksum = [0u8; 1];
        self.port.read_exact(&mut checksum, RESPONSE_TIMEOUT_MS)?;

        let expected = xor_checksum(&header) ^ xor_checksum(&body[..data_len]);
        if checksum[0] != expected {
            return Err(ClientError::BadResponse("response checksum"));
        }

        if status != Status::Ok {
            return Err(ClientError::Remote(status));
        }
        Ok((body, data_len))
    }
}
