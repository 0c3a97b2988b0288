// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DMX512 frame engine.
//!
//! Owns the universe buffer and synthesizes the wire protocol on the UART:
//! one frame every `1/refresh_hz` seconds, each frame being BREAK, MAB,
//! the 0x00 start code and 512 channel slots at 250 kBaud 8N2.
//!
//! Two transmit paths share the same state:
//!
//! - [`DmxEngine::run_frame`] - blocking full-frame cycle for the
//!   larger-core variant (a dedicated transmit thread spins on it).
//! - [`DmxEngine::poll`] - cooperative state machine for the tiny-core
//!   variant: fills the 64-byte TX FIFO incrementally across main-loop
//!   iterations so command processing is never starved.
//!
//! Timing invariants:
//!
//! - BREAK + MAB run with interrupts disabled and busy-wait on the
//!   hardware counter; nothing in that window allocates, locks or logs.
//! - LCR writes in and around BREAK are absolute, never read-modify-write.
//! - No frame starts while the previous frame's shift register is still
//!   draining.
//! - Channel writes land in the next frame: each cycle transmits from a
//!   snapshot taken at its start.

use crate::hal::{Clock, CriticalSection};
use crate::uart::DmxUart;
use crate::{Error, Result};

use luxlink_proto::{EngineStatus, TimingParams, FRAME_SIZE, MAX_CHANNELS};

/// Default frame rate: the DMX512 maximum for a full 512-slot universe.
pub const REFRESH_HZ_DEFAULT: u16 = 44;
/// Minimum configurable frame rate.
pub const REFRESH_HZ_MIN: u16 = 1;
/// Maximum configurable frame rate.
pub const REFRESH_HZ_MAX: u16 = 44;

/// Default emitted BREAK. Receivers must accept 88 us; emitting 150 us
/// keeps slow optoisolated inputs happy.
pub const BREAK_US_DEFAULT: u16 = 150;
/// Minimum BREAK a receiver must accept.
pub const BREAK_US_MIN: u16 = 88;
/// Sanity ceiling for BREAK.
pub const BREAK_US_MAX: u16 = 1000;

/// Default emitted mark-after-break.
pub const MAB_US_DEFAULT: u16 = 12;
/// Minimum MAB a receiver must accept.
pub const MAB_US_MIN: u16 = 8;
/// Sanity ceiling for MAB.
pub const MAB_US_MAX: u16 = 100;

/// How long to wait for the UART to drain before giving up on the idle
/// precondition. Counted as an error; the cycle continues regardless.
const IDLE_TIMEOUT_US: u64 = 100_000;

/// FPS sampling window.
const FPS_WINDOW_US: u64 = 1_000_000;

/// Cooperative transmit phases for the tiny-core variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxPhase {
    /// Between frames, waiting for the period to elapse.
    Idle,
    /// BREAK/MAB done, stuffing data bytes into the FIFO.
    TxData,
}

/// The DMX frame engine. Generic over the UART, time base and interrupt
/// control seams so both SoC variants and the host tests share it.
pub struct DmxEngine<U, C, I> {
    pub(crate) uart: U,
    clock: C,
    irq: I,

    /// Live universe: start code + 512 channels. Mutated by commands.
    frame: [u8; FRAME_SIZE],
    /// Per-cycle snapshot the transmit path works from.
    tx_buf: [u8; FRAME_SIZE],

    timing: TimingParams,
    enabled: bool,
    frame_count: u32,
    error_count: u32,

    fps_x100: u32,
    fps_window_start_us: u64,
    fps_window_frames: u32,

    phase: TxPhase,
    tx_idx: usize,
    last_frame_us: u64,
}

impl<U: DmxUart, C: Clock, I: CriticalSection> DmxEngine<U, C, I> {
    /// Build the engine and bring the UART into the known-good 8N2 state.
    pub fn new(mut uart: U, clock: C, irq: I) -> Self {
        uart.force_8n2();
        uart.reset_fifos();
        uart.latch_baud();

        let now = clock.now_us();
        Self {
            uart,
            clock,
            irq,
            frame: [0; FRAME_SIZE],
            tx_buf: [0; FRAME_SIZE],
            timing: TimingParams {
                refresh_hz: REFRESH_HZ_DEFAULT,
                break_us: BREAK_US_DEFAULT,
                mab_us: MAB_US_DEFAULT,
            },
            enabled: false,
            frame_count: 0,
            error_count: 0,
            fps_x100: 0,
            fps_window_start_us: now,
            fps_window_frames: 0,
            phase: TxPhase::Idle,
            tx_idx: 0,
            last_frame_us: 0,
        }
    }

    /// Start continuous frame emission. Idempotent; resets the frame
    /// counter and the FPS window.
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.frame_count = 0;
        self.fps_x100 = 0;
        self.fps_window_start_us = self.clock.now_us();
        self.fps_window_frames = 0;
    }

    /// Stop emission after the current frame. Idempotent.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Whether emission is running.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Write `values` starting at 0-based `start`. The run must stay
    /// inside the universe and carry at least one value.
    ///
    /// Takes effect on the next frame (the current cycle transmits its
    /// snapshot).
    pub fn set_channels(&mut self, start: u16, values: &[u8]) -> Result<()> {
        if values.is_empty() || start as usize + values.len() > MAX_CHANNELS {
            return Err(Error::Range);
        }
        let offset = 1 + start as usize;
        self.frame[offset..offset + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Write a single 0-based channel.
    pub fn set_channel(&mut self, channel: u16, value: u8) -> Result<()> {
        if channel as usize >= MAX_CHANNELS {
            return Err(Error::Range);
        }
        self.frame[1 + channel as usize] = value;
        Ok(())
    }

    /// Read a single 0-based channel; out-of-range reads as 0.
    pub fn get_channel(&self, channel: u16) -> u8 {
        if channel as usize >= MAX_CHANNELS {
            return 0;
        }
        self.frame[1 + channel as usize]
    }

    /// Zero every channel. The start code stays 0x00.
    pub fn blackout(&mut self) {
        self.frame[1..].fill(0);
    }

    /// Update the timing triple. Zero fields keep their current value;
    /// non-zero fields outside the DMX512 ranges reject the whole command
    /// and leave the state untouched.
    pub fn set_timing(&mut self, t: TimingParams) -> Result<()> {
        if t.refresh_hz != 0 && !(REFRESH_HZ_MIN..=REFRESH_HZ_MAX).contains(&t.refresh_hz) {
            return Err(Error::Range);
        }
        if t.break_us != 0 && !(BREAK_US_MIN..=BREAK_US_MAX).contains(&t.break_us) {
            return Err(Error::Range);
        }
        if t.mab_us != 0 && !(MAB_US_MIN..=MAB_US_MAX).contains(&t.mab_us) {
            return Err(Error::Range);
        }

        if t.refresh_hz != 0 {
            self.timing.refresh_hz = t.refresh_hz;
        }
        if t.break_us != 0 {
            self.timing.break_us = t.break_us;
        }
        if t.mab_us != 0 {
            self.timing.mab_us = t.mab_us;
        }
        Ok(())
    }

    /// Current timing triple.
    pub fn get_timing(&self) -> TimingParams {
        self.timing
    }

    /// Engine state for the `GetStatus` response.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            enabled: self.enabled,
            frame_count: self.frame_count,
            fps_x100: self.fps_x100,
        }
    }

    /// UART idle-wait timeouts since init.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Frame period for the configured rate, with a 1 Hz fallback.
    pub fn frame_interval_us(&self) -> u64 {
        if self.timing.refresh_hz == 0 {
            return 1_000_000;
        }
        1_000_000 / u64::from(self.timing.refresh_hz)
    }

    /// Wait for the TX FIFO to empty and the shift register to drain.
    ///
    /// A timeout bumps `error_count` but does not abort: the next cycle
    /// starts fresh against whatever state the UART is in.
    fn wait_tx_idle(&mut self) {
        let deadline = self.clock.now_us() + IDLE_TIMEOUT_US;
        while !self.uart.tx_idle() {
            if self.clock.now_us() >= deadline {
                self.error_count = self.error_count.wrapping_add(1);
                return;
            }
        }
    }

    /// Emit BREAK then MAB. The whole window runs with interrupts
    /// disabled; both LCR writes are absolute.
    fn send_break_mab(&mut self) {
        let TimingParams { break_us, mab_us, .. } = self.timing;
        let Self { uart, clock, irq, .. } = self;

        irq.with_irqs_disabled(|| {
            uart.set_break();
            clock.delay_us(u32::from(break_us));
            uart.force_8n2();
            clock.delay_us(u32::from(mab_us));
        });
    }

    fn snapshot(&mut self) {
        self.tx_buf = self.frame;
    }

    fn account_frame(&mut self, now_us: u64) {
        self.frame_count = self.frame_count.wrapping_add(1);
        self.fps_window_frames += 1;

        let elapsed_us = now_us.saturating_sub(self.fps_window_start_us);
        if elapsed_us >= FPS_WINDOW_US {
            let elapsed_ms = elapsed_us / 1000;
            if elapsed_ms > 0 {
                self.fps_x100 = ((u64::from(self.fps_window_frames) * 100_000) / elapsed_ms) as u32;
            }
            self.fps_window_start_us = now_us;
            self.fps_window_frames = 0;
        }
    }

    /// Blocking full-frame cycle (larger-core variant).
    ///
    /// Returns immediately when disabled so the transmit thread can sleep.
    /// At the maximum rate the 513 byte times already fill the period and
    /// pacing is skipped entirely.
    pub fn run_frame(&mut self) {
        if !self.enabled {
            return;
        }

        let frame_start = self.clock.now_us();

        // Previous frame must be fully out of the shift register before
        // BREAK, or the last slots of that frame are corrupted.
        self.wait_tx_idle();

        self.snapshot();
        self.send_break_mab();

        // Known-good LCR and fresh FIFOs before data: clears a BREAK bit
        // latched under a race and makes USR.TFNF meaningful.
        self.uart.force_8n2();
        self.uart.reset_fifos();

        for i in 0..FRAME_SIZE {
            while !self.uart.tx_ready() {}
            self.uart.write_byte(self.tx_buf[i]);
        }
        self.wait_tx_idle();

        let now = self.clock.now_us();
        self.account_frame(now);
        self.last_frame_us = now;

        if self.timing.refresh_hz < REFRESH_HZ_MAX {
            let period = self.frame_interval_us();
            let elapsed = now.saturating_sub(frame_start);
            if elapsed < period {
                self.clock.delay_us((period - elapsed) as u32);
            }
        }
    }

    /// Cooperative transmit step (tiny-core variant).
    ///
    /// Call from the main loop with the current counter value. BREAK/MAB
    /// still runs atomically (and may briefly exceed strict cooperative
    /// yielding); data bytes go out through incremental FIFO stuffing.
    pub fn poll(&mut self, now_us: u64) {
        match self.phase {
            TxPhase::Idle => {
                if !self.enabled {
                    return;
                }
                if now_us.saturating_sub(self.last_frame_us) < self.frame_interval_us() {
                    return;
                }

                self.wait_tx_idle();
                self.snapshot();
                self.send_break_mab();
                self.uart.force_8n2();
                self.uart.reset_fifos();
                self.tx_idx = 0;
                self.phase = TxPhase::TxData;

                // Start stuffing immediately rather than waiting a lap.
                self.stuff_fifo(now_us);
            }

            TxPhase::TxData => self.stuff_fifo(now_us),
        }
    }

    fn stuff_fifo(&mut self, now_us: u64) {
        while self.tx_idx < FRAME_SIZE && self.uart.tx_ready() {
            self.uart.write_byte(self.tx_buf[self.tx_idx]);
            self.tx_idx += 1;
        }
        if self.tx_idx >= FRAME_SIZE {
            self.account_frame(now_us);
            self.last_frame_us = now_us;
            self.phase = TxPhase::Idle;
        }
    }

    /// Whether a cooperative frame is in flight.
    pub fn is_busy(&self) -> bool {
        self.phase != TxPhase::Idle
    }
}
