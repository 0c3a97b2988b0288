// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative main loop for the tiny-core variant.
//!
//! No OS: a single loop alternates between draining the interrupt-fed
//! byte ring, dispatching at most the bytes already received, and
//! advancing the DMX transmit state machine. The only preemption is the
//! mailbox ISR, which only pushes into the [`SpscRing`].

use crate::dispatch::Dispatcher;
use crate::engine::DmxEngine;
use crate::hal::{Clock, CriticalSection, SocReset};
use crate::ipc::SpscRing;
use crate::uart::DmxUart;

/// Heartbeat bookkeeping period.
pub const HEARTBEAT_INTERVAL_US: u64 = 5_000_000;

/// Main-loop counters, exported instead of logging (`no_std`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Bytes drained from the RX ring.
    pub rx_bytes: u32,
    /// Responses emitted (one per completed or errored command).
    pub responses: u32,
    /// Heartbeat periods elapsed.
    pub heartbeats: u32,
}

/// The tiny-core gateway: engine + dispatcher + reset seam.
pub struct TinyGateway<U, C, I, R> {
    pub engine: DmxEngine<U, C, I>,
    dispatcher: Dispatcher,
    reset: R,
    stats: LoopStats,
    last_heartbeat_us: u64,
}

impl<U, C, I, R> TinyGateway<U, C, I, R>
where
    U: DmxUart,
    C: Clock,
    I: CriticalSection,
    R: SocReset,
{
    pub fn new(engine: DmxEngine<U, C, I>, reset: R) -> Self {
        Self {
            engine,
            dispatcher: Dispatcher::new(),
            reset,
            stats: LoopStats::default(),
            last_heartbeat_us: 0,
        }
    }

    /// One main-loop iteration.
    ///
    /// Drains pending RX bytes into the dispatcher (responses go out
    /// through `tx`, typically [`crate::ipc::IpcLink::send`]), advances
    /// the transmit state machine, and ticks the heartbeat.
    pub fn service<const N: usize>(
        &mut self,
        rx: &SpscRing<N>,
        mut tx: impl FnMut(&[u8]),
        now_us: u64,
    ) {
        let Self { engine, dispatcher, reset, stats, last_heartbeat_us } = self;

        while let Some(byte) = rx.pop() {
            stats.rx_bytes = stats.rx_bytes.wrapping_add(1);
            dispatcher.feed(
                &[byte],
                engine,
                Some(&mut *reset as &mut dyn SocReset),
                |resp| {
                    tx(resp);
                    stats.responses = stats.responses.wrapping_add(1);
                },
            );
        }

        engine.poll(now_us);

        if now_us.saturating_sub(*last_heartbeat_us) >= HEARTBEAT_INTERVAL_US {
            stats.heartbeats = stats.heartbeats.wrapping_add(1);
            *last_heartbeat_us = now_us;
        }
    }

    /// Loop counters.
    pub fn stats(&self) -> LoopStats {
        self.stats
    }
}
