// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inter-processor transport: shared-memory vrings signalled by mailbox
//! doorbells.
//!
//! # Architecture
//!
//! ```text
//!  Linux host                          real-time core
//!  +-----------+   rx vring (A->B)    +------------+
//!  |           | -------------------> |            |
//!  |  rpmsg    |   tx vring (B->A)    |  IpcLink   |
//!  |  channel  | <------------------- |            |
//!  +-----------+                      +------------+
//!        |        doorbell mailboxes        |
//!        +----------------(irq)-------------+
//! ```
//!
//! Each ring is single-producer/single-consumer and delivers messages in
//! order. The mailbox carries no payload, only a 32-bit validation magic
//! plus the link id; the data always travels through shared memory.
//!
//! The tiny-core port deliberately avoids the vendor mailbox helper
//! library (known defective on this path) and drives the status/command/
//! data registers directly; see [`mailbox`].

pub mod mailbox;
pub mod ring;
pub mod vring;

pub use mailbox::{DoorbellMsg, Mailbox, DOORBELL_MAGIC};
pub use ring::SpscRing;
pub use vring::Vring;

use crate::hal::IrqRouter;
use crate::Result;

/// A bidirectional link: two vrings plus their doorbell mailboxes.
pub struct IpcLink {
    /// Outbound ring (this core -> host). We are the producer.
    tx: Vring,
    /// Inbound ring (host -> this core). We are the consumer.
    rx: Vring,
    /// Mailbox we ring to signal the host.
    tx_mbox: Mailbox,
    /// Mailbox the host rings to signal us.
    rx_mbox: Mailbox,
    link_id: u8,
}

impl IpcLink {
    pub fn new(tx: Vring, rx: Vring, tx_mbox: Mailbox, rx_mbox: Mailbox, link_id: u8) -> Self {
        Self { tx, rx, tx_mbox, rx_mbox, link_id }
    }

    /// Bring up the receive path.
    ///
    /// Enables the A->B interrupt in level-trigger mode, routes it through
    /// the interrupt multiplexer, then drains any doorbell that arrived
    /// before the ISR was installed so no message is stranded.
    pub fn init(
        &mut self,
        router: &mut impl IrqRouter,
        rx_irq_source: u32,
        scratch: &mut [u8],
        sink: impl FnMut(&[u8]),
    ) {
        self.rx_mbox.enable_rx_irq();
        router.enable_source(rx_irq_source);
        self.drain(scratch, sink);
    }

    /// Publish a message and ring the peer's doorbell.
    ///
    /// Fails with [`crate::Error::Backpressure`] when the ring is full;
    /// the caller owns the retry/timeout policy.
    pub fn send(&mut self, msg: &[u8]) -> Result<()> {
        self.tx.try_send(msg)?;
        self.tx_mbox.ring(self.link_id);
        Ok(())
    }

    /// ISR body: acknowledge the doorbell, validate it, and hand every
    /// pending inbound message to `sink`.
    ///
    /// `sink` runs in interrupt context on real hardware, so it must only
    /// enqueue (typically into an [`SpscRing`]) - no locking, no work.
    pub fn handle_doorbell(&mut self, scratch: &mut [u8], sink: impl FnMut(&[u8])) {
        // TX-side acknowledgement may share the interrupt line.
        self.tx_mbox.ack_tx();

        let Some(msg) = self.rx_mbox.try_take() else {
            return;
        };
        if msg.link_id() != Some(self.link_id) {
            // Foreign or corrupt doorbell: already acknowledged, ignore.
            return;
        }
        self.drain(scratch, sink);
    }

    fn drain(&mut self, scratch: &mut [u8], mut sink: impl FnMut(&[u8])) {
        while let Ok(Some(len)) = self.rx.try_recv(scratch) {
            sink(&scratch[..len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::IrqRouter;
    use std::vec::Vec;

    struct TestRouter {
        enabled: Vec<u32>,
    }

    impl IrqRouter for TestRouter {
        fn enable_source(&mut self, source_irq: u32) {
            self.enabled.push(source_irq);
        }
    }

    const CAP: u32 = 4;
    const SLOT: u32 = 32;

    struct Fixture {
        _tx_mem: Vec<u32>,
        _rx_mem: Vec<u32>,
        tx_regs: Vec<u32>,
        rx_regs: Vec<u32>,
        link: IpcLink,
        host_rx: Vring,
        host_tx: Vring,
    }

    fn fixture() -> Fixture {
        let words = vring::region_size(CAP, SLOT).div_ceil(4);
        let mut tx_mem = std::vec![0u32; words];
        let mut rx_mem = std::vec![0u32; words];
        let mut tx_regs = std::vec![0u32; 8];
        let mut rx_regs = std::vec![0u32; 8];

        // SAFETY (tests): the backing vectors outlive the fixture and are
        // only accessed through the ring/mailbox types.
        let link = unsafe {
            IpcLink::new(
                Vring::attach(tx_mem.as_mut_ptr().cast(), CAP, SLOT),
                Vring::attach(rx_mem.as_mut_ptr().cast(), CAP, SLOT),
                Mailbox::new(tx_regs.as_mut_ptr() as usize),
                Mailbox::new(rx_regs.as_mut_ptr() as usize),
                3,
            )
        };
        // Host-side views of the same memory, with swapped roles.
        let (host_rx, host_tx) = unsafe {
            (
                Vring::attach(tx_mem.as_mut_ptr().cast(), CAP, SLOT),
                Vring::attach(rx_mem.as_mut_ptr().cast(), CAP, SLOT),
            )
        };

        Fixture { _tx_mem: tx_mem, _rx_mem: rx_mem, tx_regs, rx_regs, link, host_rx, host_tx }
    }

    fn host_ring_doorbell(regs: &mut [u32], link_id: u32) {
        regs[mailbox::REG_A2B_CMD] = link_id;
        regs[mailbox::REG_A2B_DATA] = DOORBELL_MAGIC;
        regs[mailbox::REG_A2B_STATUS] = 1;
    }

    #[test]
    fn test_send_publishes_and_rings() {
        let mut f = fixture();
        f.link.send(b"hello").unwrap();

        let mut buf = [0u8; SLOT as usize];
        assert_eq!(f.host_rx.try_recv(&mut buf).unwrap(), Some(5));
        assert_eq!(&buf[..5], b"hello");

        // Doorbell raised on the TX mailbox with magic + link id.
        assert_eq!(f.tx_regs[mailbox::REG_B2A_DATA], DOORBELL_MAGIC);
        assert_eq!(f.tx_regs[mailbox::REG_B2A_CMD], 3);
    }

    #[test]
    fn test_doorbell_drains_in_order() {
        let mut f = fixture();
        f.host_tx.try_send(b"one").unwrap();
        f.host_tx.try_send(b"two").unwrap();
        host_ring_doorbell(&mut f.rx_regs, 3);

        let mut got: Vec<Vec<u8>> = Vec::new();
        let mut scratch = [0u8; SLOT as usize];
        f.link.handle_doorbell(&mut scratch, |m| got.push(m.to_vec()));
        assert_eq!(got, std::vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_foreign_doorbell_ignored() {
        let mut f = fixture();
        f.host_tx.try_send(b"msg").unwrap();
        // Wrong link id in the doorbell word.
        host_ring_doorbell(&mut f.rx_regs, 9);

        let mut got = 0;
        let mut scratch = [0u8; SLOT as usize];
        f.link.handle_doorbell(&mut scratch, |_| got += 1);
        assert_eq!(got, 0);
    }

    #[test]
    fn test_init_catches_pending_message() {
        let mut f = fixture();
        // Message arrives before the ISR exists.
        f.host_tx.try_send(b"early").unwrap();
        host_ring_doorbell(&mut f.rx_regs, 3);

        let mut router = TestRouter { enabled: Vec::new() };
        let mut got: Vec<Vec<u8>> = Vec::new();
        let mut scratch = [0u8; SLOT as usize];
        f.link.init(&mut router, 117, &mut scratch, |m| got.push(m.to_vec()));

        assert_eq!(got, std::vec![b"early".to_vec()]);
        assert_eq!(router.enabled, std::vec![117]);
        // Level-trigger + channel enable set on the RX mailbox.
        let inten = f.rx_regs[mailbox::REG_A2B_INTEN];
        assert_eq!(inten & mailbox::INTEN_CH0, mailbox::INTEN_CH0);
        assert_eq!(inten & mailbox::INTEN_LEVEL_TRIG, mailbox::INTEN_LEVEL_TRIG);
    }
}
