// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host-side test doubles for the hardware seams.

use crate::hal::{Clock, CriticalSection, SocReset};
use crate::uart::{DmxUart, LCR_8N2, LCR_BREAK, LCR_DLAB};

use core::cell::{Cell, RefCell};
use std::rc::Rc;
use std::vec::Vec;

/// Shared fake microsecond counter. `delay_us` advances it, and the UART
/// mock ticks it while simulating a busy transmitter so bounded waits
/// terminate.
#[derive(Clone)]
pub struct MockClock(Rc<Cell<u64>>);

impl MockClock {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(0)))
    }

    pub fn advance(&self, us: u64) {
        self.0.set(self.0.get() + us);
    }
}

impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        self.0.get()
    }

    fn delay_us(&self, us: u32) {
        self.advance(u64::from(us));
    }
}

/// Everything the engine did to the UART, with timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartEvent {
    Lcr { value: u32, at_us: u64, in_critical: bool },
    Fcr { at_us: u64 },
    Byte { value: u8, at_us: u64 },
}

/// Recording UART double.
pub struct MockUart {
    clock: MockClock,
    irq_disabled: Rc<Cell<bool>>,
    events: RefCell<Vec<UartEvent>>,
    /// Transmitter reports busy until this instant (`u64::MAX` = forever).
    ready_at: Cell<u64>,
    /// TX FIFO capacity; `usize::MAX` models an always-draining FIFO.
    fifo_limit: Cell<usize>,
    fifo_used: Cell<usize>,
}

impl MockUart {
    pub fn new(clock: MockClock, irq_disabled: Rc<Cell<bool>>) -> Self {
        Self {
            clock,
            irq_disabled,
            events: RefCell::new(Vec::new()),
            ready_at: Cell::new(0),
            fifo_limit: Cell::new(usize::MAX),
            fifo_used: Cell::new(0),
        }
    }

    pub fn events(&self) -> Vec<UartEvent> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    /// All bytes pushed through the transmit holding register.
    pub fn data_bytes(&self) -> Vec<u8> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                UartEvent::Byte { value, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Duration of the most recent BREAK and MAB, measured between the
    /// break-setting LCR write, the break-clearing write, and the first
    /// register touch after the mark.
    pub fn last_break_mab(&self) -> Option<(u64, u64)> {
        let events = self.events.borrow();
        let lcr: Vec<(u32, u64)> = events
            .iter()
            .filter_map(|e| match e {
                UartEvent::Lcr { value, at_us, .. } => Some((*value, *at_us)),
                _ => None,
            })
            .collect();
        let set = lcr.iter().rposition(|&(v, _)| v & LCR_BREAK != 0)?;
        let (_, t_set) = lcr[set];
        let (_, t_clear) = *lcr.get(set + 1)?;
        let (_, t_after_mab) = *lcr.get(set + 2)?;
        Some((t_clear - t_set, t_after_mab - t_clear))
    }

    /// The BREAK assert/clear pair happened with interrupts masked.
    pub fn break_inside_critical_section(&self) -> bool {
        let events = self.events.borrow();
        let mut saw_break = false;
        for e in events.iter() {
            if let UartEvent::Lcr { value, in_critical, .. } = e {
                if value & LCR_BREAK != 0 {
                    saw_break = true;
                    if !in_critical {
                        return false;
                    }
                }
            }
        }
        saw_break
    }

    pub fn set_busy_for_us(&self, us: u64) {
        self.ready_at.set(self.clock.now_us() + us);
    }

    pub fn set_busy_forever(&self) {
        self.ready_at.set(u64::MAX);
    }

    pub fn limit_fifo(&self, depth: usize) {
        self.fifo_limit.set(depth);
    }

    pub fn drain_fifo(&self) {
        self.fifo_used.set(0);
    }

    fn record(&self, event: UartEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl DmxUart for MockUart {
    fn force_8n2(&mut self) {
        self.record(UartEvent::Lcr {
            value: LCR_8N2,
            at_us: self.clock.now_us(),
            in_critical: self.irq_disabled.get(),
        });
    }

    fn set_break(&mut self) {
        self.record(UartEvent::Lcr {
            value: LCR_8N2 | LCR_BREAK,
            at_us: self.clock.now_us(),
            in_critical: self.irq_disabled.get(),
        });
    }

    fn reset_fifos(&mut self) {
        self.record(UartEvent::Fcr { at_us: self.clock.now_us() });
        self.fifo_used.set(0);
    }

    fn tx_ready(&self) -> bool {
        self.fifo_used.get() < self.fifo_limit.get()
    }

    fn tx_idle(&self) -> bool {
        if self.clock.now_us() >= self.ready_at.get() {
            return true;
        }
        // Tick the clock so bounded idle waits make progress.
        self.clock.advance(10);
        false
    }

    fn write_byte(&mut self, byte: u8) {
        self.fifo_used.set(self.fifo_used.get() + 1);
        self.record(UartEvent::Byte { value: byte, at_us: self.clock.now_us() });
    }

    fn latch_baud(&mut self) {
        let now = self.clock.now_us();
        let masked = self.irq_disabled.get();
        self.record(UartEvent::Lcr { value: LCR_8N2 | LCR_DLAB, at_us: now, in_critical: masked });
        self.record(UartEvent::Lcr { value: LCR_8N2, at_us: now, in_critical: masked });
    }
}

/// Counts critical sections and exposes the masked flag to [`MockUart`].
pub struct MockIrq {
    flag: Rc<Cell<bool>>,
    sections: Cell<u32>,
}

impl MockIrq {
    pub fn new(flag: Rc<Cell<bool>>) -> Self {
        Self { flag, sections: Cell::new(0) }
    }

    pub fn sections(&self) -> u32 {
        self.sections.get()
    }
}

impl CriticalSection for MockIrq {
    fn with_irqs_disabled<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.flag.set(true);
        let result = f();
        self.flag.set(false);
        self.sections.set(self.sections.get() + 1);
        result
    }
}

/// Wire a UART double and IRQ double that share the masked flag.
pub fn rig(clock: &MockClock) -> (MockUart, MockIrq) {
    let flag = Rc::new(Cell::new(false));
    (MockUart::new(clock.clone(), flag.clone()), MockIrq::new(flag))
}

/// Records reset requests instead of resetting.
#[derive(Default)]
pub struct MockReset {
    pub requested: Cell<u32>,
}

impl SocReset for MockReset {
    fn system_reset(&mut self) {
        self.requested.set(self.requested.get() + 1);
    }
}
