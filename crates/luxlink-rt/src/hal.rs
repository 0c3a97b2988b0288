// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Platform seams: time base, interrupt control, SoC reset.
//!
//! The frame engine busy-waits its BREAK and MAB intervals on a
//! free-running hardware counter. CPU-cycle delay loops are not an
//! acceptable implementation of [`Clock`]: they drift with cache and
//! pipeline state, and with CPU frequency scaling.

/// Microsecond time base backed by a free-running hardware counter.
pub trait Clock {
    /// Current counter value in microseconds. Monotonic, never resets
    /// during operation.
    fn now_us(&self) -> u64;

    /// Busy-wait for `us` microseconds against the counter.
    fn delay_us(&self, us: u32) {
        let deadline = self.now_us() + u64::from(us);
        while self.now_us() < deadline {}
    }
}

/// Interrupt masking for the timing-critical BREAK/MAB window.
///
/// Implementations wrap the global IRQ disable/enable pair of the core
/// (`__disable_irq`/`__enable_irq` on Cortex-M, the CPSR primitives on the
/// application cores). The closure must not allocate, lock or log.
pub trait CriticalSection {
    /// Run `f` with interrupts disabled.
    fn with_irqs_disabled<R>(&mut self, f: impl FnOnce() -> R) -> R;
}

/// Guarded whole-SoC reset, used by the tiny-core system-reset command.
pub trait SocReset {
    /// Disable interrupts and reset the core. Diverges on real hardware;
    /// test doubles record the call instead.
    fn system_reset(&mut self);
}

/// Interrupt-multiplexer routing seam.
///
/// On the tiny core the mailbox interrupt reaches the NVIC through an
/// interrupt multiplexer; the IPC port configures that path explicitly at
/// init instead of relying on vendor helper libraries.
pub trait IrqRouter {
    /// Route and unmask `source_irq` through the multiplexer.
    fn enable_source(&mut self, source_irq: u32);
}
