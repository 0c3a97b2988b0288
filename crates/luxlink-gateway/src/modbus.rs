// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Modbus/TCP server.
//!
//! Register mapping:
//!
//! - Holding registers 0-511 = DMX slots 1-512. The low byte carries the
//!   value; writes above 255 are clamped.
//! - Coil 0 = enable (read/write).
//! - Coil 1 = blackout (write-only; writing 0xFF00 triggers it).
//!
//! Framing is MBAP over TCP: `tid(2) proto(2) len(2) uid(1)` followed by
//! the PDU (`fc(1) data(n)`), all counts big-endian. Malformed frames
//! drop the connection; in-protocol errors become Modbus exceptions.

use crate::state::DmxState;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const FC_READ_COILS: u8 = 1;
const FC_READ_HOLDING: u8 = 3;
const FC_WRITE_COIL: u8 = 5;
const FC_WRITE_REGISTER: u8 = 6;
const FC_WRITE_REGISTERS: u8 = 16;

const EX_ILLEGAL_FUNCTION: u8 = 0x01;
const EX_ILLEGAL_ADDRESS: u8 = 0x02;
const EX_ILLEGAL_VALUE: u8 = 0x03;
const EX_DEVICE_FAILURE: u8 = 0x04;

const COIL_ON: u16 = 0xFF00;

/// Serve Modbus/TCP on `addr` until the task is aborted.
pub async fn serve(addr: &str, state: Arc<DmxState>) -> std::io::Result<()> {
    let addr = normalize_addr(addr);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "modbus tcp server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "modbus client connected");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream, state).await {
                debug!(%peer, error = %e, "modbus connection closed");
            }
        });
    }
}

/// ":502" style addresses bind all interfaces.
fn normalize_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

async fn handle_conn(mut stream: TcpStream, state: Arc<DmxState>) -> std::io::Result<()> {
    loop {
        let mut mbap = [0u8; 7];
        if stream.read_exact(&mut mbap).await.is_err() {
            return Ok(()); // peer closed
        }

        let tid = u16::from_be_bytes([mbap[0], mbap[1]]);
        let proto = u16::from_be_bytes([mbap[2], mbap[3]]);
        let len = u16::from_be_bytes([mbap[4], mbap[5]]) as usize;
        let uid = mbap[6];

        // len counts the unit id plus the PDU; a zero or oversized length
        // is not recoverable mid-stream.
        if proto != 0 || len < 2 || len > 260 {
            warn!(tid, proto, len, "malformed modbus frame, dropping connection");
            return Ok(());
        }

        let mut pdu = vec![0u8; len - 1];
        stream.read_exact(&mut pdu).await?;

        let resp = process_pdu(&state, pdu[0], &pdu[1..]).await;

        let mut frame = Vec::with_capacity(7 + resp.len());
        frame.extend_from_slice(&tid.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&((resp.len() + 1) as u16).to_be_bytes());
        frame.push(uid);
        frame.extend_from_slice(&resp);
        stream.write_all(&frame).await?;
    }
}

fn exception(fc: u8, code: u8) -> Vec<u8> {
    vec![fc | 0x80, code]
}

/// Execute one PDU and build the response PDU (function code included).
pub(crate) async fn process_pdu(state: &DmxState, fc: u8, data: &[u8]) -> Vec<u8> {
    match fc {
        FC_READ_HOLDING => read_holding(state, data),
        FC_WRITE_REGISTER => write_register(state, data).await,
        FC_WRITE_REGISTERS => write_registers(state, data).await,
        FC_READ_COILS => read_coils(state, data),
        FC_WRITE_COIL => write_coil(state, data).await,
        _ => exception(fc, EX_ILLEGAL_FUNCTION),
    }
}

fn read_holding(state: &DmxState, data: &[u8]) -> Vec<u8> {
    if data.len() < 4 {
        return exception(FC_READ_HOLDING, EX_ILLEGAL_VALUE);
    }
    let start = u16::from_be_bytes([data[0], data[1]]);
    let quantity = u16::from_be_bytes([data[2], data[3]]);
    if quantity == 0 || u32::from(start) + u32::from(quantity) > 512 {
        return exception(FC_READ_HOLDING, EX_ILLEGAL_ADDRESS);
    }

    let channels = state.channels();
    let mut resp = Vec::with_capacity(2 + usize::from(quantity) * 2);
    resp.push(FC_READ_HOLDING);
    resp.push((quantity * 2) as u8);
    for i in 0..quantity {
        let value = u16::from(channels[usize::from(start + i)]);
        resp.extend_from_slice(&value.to_be_bytes());
    }
    resp
}

async fn write_register(state: &DmxState, data: &[u8]) -> Vec<u8> {
    if data.len() < 4 {
        return exception(FC_WRITE_REGISTER, EX_ILLEGAL_VALUE);
    }
    let addr = u16::from_be_bytes([data[0], data[1]]);
    let value = u16::from_be_bytes([data[2], data[3]]);
    if addr >= 512 {
        return exception(FC_WRITE_REGISTER, EX_ILLEGAL_ADDRESS);
    }

    let clamped = value.min(255) as u8;
    if state.set_channel(addr + 1, clamped).await.is_err() {
        return exception(FC_WRITE_REGISTER, EX_DEVICE_FAILURE);
    }
    debug!(ch = addr + 1, value = clamped, "modbus write");

    // Echo the request.
    let mut resp = Vec::with_capacity(5);
    resp.push(FC_WRITE_REGISTER);
    resp.extend_from_slice(&data[..4]);
    resp
}

async fn write_registers(state: &DmxState, data: &[u8]) -> Vec<u8> {
    if data.len() < 5 {
        return exception(FC_WRITE_REGISTERS, EX_ILLEGAL_VALUE);
    }
    let start = u16::from_be_bytes([data[0], data[1]]);
    let quantity = u16::from_be_bytes([data[2], data[3]]);
    let byte_count = usize::from(data[4]);
    if quantity == 0 || u32::from(start) + u32::from(quantity) > 512 {
        return exception(FC_WRITE_REGISTERS, EX_ILLEGAL_ADDRESS);
    }
    if byte_count != usize::from(quantity) * 2 || data.len() < 5 + byte_count {
        return exception(FC_WRITE_REGISTERS, EX_ILLEGAL_VALUE);
    }

    for i in 0..quantity {
        let off = 5 + usize::from(i) * 2;
        let value = u16::from_be_bytes([data[off], data[off + 1]]).min(255) as u8;
        if let Err(e) = state.set_channel(start + i + 1, value).await {
            warn!(ch = start + i + 1, error = %e, "modbus write failed");
        }
    }
    debug!(start = start + 1, count = quantity, "modbus write multiple");

    let mut resp = Vec::with_capacity(5);
    resp.push(FC_WRITE_REGISTERS);
    resp.extend_from_slice(&start.to_be_bytes());
    resp.extend_from_slice(&quantity.to_be_bytes());
    resp
}

fn read_coils(state: &DmxState, data: &[u8]) -> Vec<u8> {
    if data.len() < 4 {
        return exception(FC_READ_COILS, EX_ILLEGAL_VALUE);
    }
    let start = u16::from_be_bytes([data[0], data[1]]);
    let quantity = u16::from_be_bytes([data[2], data[3]]);
    if quantity == 0 || start + quantity > 2 {
        return exception(FC_READ_COILS, EX_ILLEGAL_ADDRESS);
    }

    // Coil 0 = enabled; coil 1 reads as 0 (blackout is write-only).
    let mut coils = 0u8;
    if state.is_enabled() && start == 0 {
        coils |= 0x01;
    }
    vec![FC_READ_COILS, 1, coils]
}

async fn write_coil(state: &DmxState, data: &[u8]) -> Vec<u8> {
    if data.len() < 4 {
        return exception(FC_WRITE_COIL, EX_ILLEGAL_VALUE);
    }
    let addr = u16::from_be_bytes([data[0], data[1]]);
    let value = u16::from_be_bytes([data[2], data[3]]);
    let on = value == COIL_ON;

    let result = match addr {
        0 => {
            if on {
                info!("modbus: dmx enable");
                state.enable().await
            } else {
                info!("modbus: dmx disable");
                state.disable().await
            }
        }
        1 => {
            if on {
                info!("modbus: blackout");
                state.blackout().await
            } else {
                Ok(()) // writing 0 to the blackout coil is a no-op
            }
        }
        _ => return exception(FC_WRITE_COIL, EX_ILLEGAL_ADDRESS),
    };

    if result.is_err() {
        return exception(FC_WRITE_COIL, EX_DEVICE_FAILURE);
    }
    let mut resp = Vec::with_capacity(5);
    resp.push(FC_WRITE_COIL);
    resp.extend_from_slice(&data[..4]);
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_write_and_read_register() {
        let (state, _) = test_state();
        // FC06 write register 0 (slot 1) = 200.
        let resp = process_pdu(&state, FC_WRITE_REGISTER, &[0, 0, 0, 200]).await;
        assert_eq!(resp, vec![FC_WRITE_REGISTER, 0, 0, 0, 200]);
        assert_eq!(state.channels()[0], 200);

        // FC03 read 2 registers from 0.
        let resp = process_pdu(&state, FC_READ_HOLDING, &[0, 0, 0, 2]).await;
        assert_eq!(resp, vec![FC_READ_HOLDING, 4, 0, 200, 0, 0]);
    }

    #[tokio::test]
    async fn test_write_register_clamps_to_255() {
        let (state, _) = test_state();
        let resp = process_pdu(&state, FC_WRITE_REGISTER, &[0, 1, 0x01, 0x2C]).await; // 300
        assert_eq!(resp[0], FC_WRITE_REGISTER);
        assert_eq!(state.channels()[1], 255);
    }

    #[tokio::test]
    async fn test_address_bounds() {
        let (state, _) = test_state();
        // Register 512 does not exist.
        let resp = process_pdu(&state, FC_WRITE_REGISTER, &[2, 0, 0, 1]).await;
        assert_eq!(resp, vec![FC_WRITE_REGISTER | 0x80, EX_ILLEGAL_ADDRESS]);
        // Read past the end.
        let resp = process_pdu(&state, FC_READ_HOLDING, &[0x01, 0xFF, 0, 2]).await;
        assert_eq!(resp, vec![FC_READ_HOLDING | 0x80, EX_ILLEGAL_ADDRESS]);
    }

    #[tokio::test]
    async fn test_write_multiple_registers() {
        let (state, _) = test_state();
        // FC16: start 0, qty 3, 6 bytes.
        let resp = process_pdu(
            &state,
            FC_WRITE_REGISTERS,
            &[0, 0, 0, 3, 6, 0, 10, 0, 20, 0, 30],
        )
        .await;
        assert_eq!(resp, vec![FC_WRITE_REGISTERS, 0, 0, 0, 3]);
        let channels = state.channels();
        assert_eq!(&channels[..3], &[10, 20, 30]);

        // Byte count mismatch.
        let resp = process_pdu(&state, FC_WRITE_REGISTERS, &[0, 0, 0, 3, 4, 0, 1, 0, 2]).await;
        assert_eq!(resp, vec![FC_WRITE_REGISTERS | 0x80, EX_ILLEGAL_VALUE]);
    }

    #[tokio::test]
    async fn test_coils_enable_and_blackout() {
        let (state, port) = test_state();

        // Coil 0 on: enable.
        let resp = process_pdu(&state, FC_WRITE_COIL, &[0, 0, 0xFF, 0x00]).await;
        assert_eq!(resp[0], FC_WRITE_COIL);
        assert!(state.is_enabled());

        // Read coils: bit 0 set.
        let resp = process_pdu(&state, FC_READ_COILS, &[0, 0, 0, 1]).await;
        assert_eq!(resp, vec![FC_READ_COILS, 1, 0x01]);

        // Coil 1 with 0xFF00: blackout. With 0x0000: no-op.
        process_pdu(&state, FC_WRITE_COIL, &[0, 1, 0xFF, 0x00]).await;
        assert!(port.calls.lock().unwrap().contains(&"blackout".to_string()));
        let before = port.call_count();
        process_pdu(&state, FC_WRITE_COIL, &[0, 1, 0, 0]).await;
        assert_eq!(port.call_count(), before);

        // Coil 0 off: disable.
        process_pdu(&state, FC_WRITE_COIL, &[0, 0, 0, 0]).await;
        assert!(!state.is_enabled());

        // Coil 2 does not exist.
        let resp = process_pdu(&state, FC_WRITE_COIL, &[0, 2, 0xFF, 0x00]).await;
        assert_eq!(resp, vec![FC_WRITE_COIL | 0x80, EX_ILLEGAL_ADDRESS]);
    }

    #[tokio::test]
    async fn test_device_failure_maps_to_exception() {
        let (state, port) = test_state();
        port.fail.store(true, Ordering::Relaxed);
        let resp = process_pdu(&state, FC_WRITE_REGISTER, &[0, 0, 0, 1]).await;
        assert_eq!(resp, vec![FC_WRITE_REGISTER | 0x80, EX_DEVICE_FAILURE]);
        let resp = process_pdu(&state, FC_WRITE_COIL, &[0, 0, 0xFF, 0x00]).await;
        assert_eq!(resp, vec![FC_WRITE_COIL | 0x80, EX_DEVICE_FAILURE]);
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let (state, _) = test_state();
        let resp = process_pdu(&state, 0x2B, &[]).await;
        assert_eq!(resp, vec![0x2B | 0x80, EX_ILLEGAL_FUNCTION]);
    }

    #[test]
    fn test_normalize_addr() {
        assert_eq!(normalize_addr(":502"), "0.0.0.0:502");
        assert_eq!(normalize_addr("127.0.0.1:5020"), "127.0.0.1:5020");
    }
}
