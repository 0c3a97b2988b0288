// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory message ring.
//!
//! One ring per direction, living in the memory region agreed with the
//! host. Layout (32-bit words, little-endian, all offsets in bytes):
//!
//! ```text
//! +--------+--------+----------------------------------------+
//! | 0x00   | head   | producer index, free-running (Release) |
//! | 0x04   | tail   | consumer index, free-running (Release) |
//! | 0x08.. | slots  | capacity x (u32 len + slot_size bytes) |
//! +--------+--------+----------------------------------------+
//! ```
//!
//! # Synchronization Protocol
//!
//! Producer: write len + payload into `slot[head % capacity]`, then
//! publish with `head.store(head + 1, Release)`.
//!
//! Consumer: `head.load(Acquire)`, copy out `slot[tail % capacity]`, then
//! retire with `tail.store(tail + 1, Release)`.
//!
//! Exactly one producer and one consumer per ring (the two cores), which
//! makes the indices single-writer and the protocol wait-free.

use crate::{Error, Result};

use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

const HEAD_OFFSET: usize = 0;
const TAIL_OFFSET: usize = 4;
const SLOTS_OFFSET: usize = 8;
const SLOT_HEADER: usize = 4;

/// Bytes required for a ring of `capacity` slots of `slot_size` payload.
pub const fn region_size(capacity: u32, slot_size: u32) -> usize {
    SLOTS_OFFSET + capacity as usize * (SLOT_HEADER + slot_size as usize)
}

/// One direction of the shared-memory transport.
pub struct Vring {
    base: *mut u8,
    capacity: u32,
    slot_size: u32,
}

impl Vring {
    /// Attach to a ring at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`region_size`] bytes of shared
    /// memory, 4-byte aligned, zero-initialized by whichever side comes up
    /// first, and mapped identically on both cores. At most one producer
    /// and one consumer may operate on the ring.
    pub const unsafe fn attach(base: *mut u8, capacity: u32, slot_size: u32) -> Self {
        Self { base, capacity, slot_size }
    }

    fn head(&self) -> &AtomicU32 {
        // SAFETY: in-bounds, 4-byte aligned per `attach`'s contract;
        // AtomicU32 is repr(transparent) over u32.
        unsafe { &*self.base.add(HEAD_OFFSET).cast::<AtomicU32>() }
    }

    fn tail(&self) -> &AtomicU32 {
        // SAFETY: as in `head`.
        unsafe { &*self.base.add(TAIL_OFFSET).cast::<AtomicU32>() }
    }

    fn slot_ptr(&self, index: u32) -> *mut u8 {
        let slot = (index % self.capacity) as usize;
        // SAFETY: slot is reduced modulo capacity, so the offset stays
        // inside the region sized by `region_size`.
        unsafe {
            self.base
                .add(SLOTS_OFFSET + slot * (SLOT_HEADER + self.slot_size as usize))
        }
    }

    /// Publish one message. Producer side only.
    ///
    /// Messages larger than the slot payload are rejected; a full ring
    /// fails with [`Error::Backpressure`] and the caller decides whether
    /// to wait (bounded by the client's timeout) or give up.
    pub fn try_send(&mut self, msg: &[u8]) -> Result<()> {
        if msg.len() > self.slot_size as usize {
            return Err(Error::BufferTooSmall);
        }
        let head = self.head().load(Ordering::Relaxed);
        let tail = self.tail().load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.capacity {
            return Err(Error::Backpressure);
        }

        let slot = self.slot_ptr(head);
        // SAFETY: the slot at `head` is exclusively ours until the
        // release-store below publishes it; bounds are checked above.
        unsafe {
            ptr::write_unaligned(slot.cast::<u32>(), msg.len() as u32);
            ptr::copy_nonoverlapping(msg.as_ptr(), slot.add(SLOT_HEADER), msg.len());
        }
        self.head().store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Take the next message, if any. Consumer side only.
    ///
    /// A message that does not fit `buf` is consumed and reported as
    /// [`Error::BufferTooSmall`] so a single oversized message cannot
    /// wedge the ring.
    pub fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let tail = self.tail().load(Ordering::Relaxed);
        let head = self.head().load(Ordering::Acquire);
        if tail == head {
            return Ok(None);
        }

        let slot = self.slot_ptr(tail);
        // SAFETY: the head acquire-load ordered the producer's slot writes
        // before these reads; the producer will not reuse the slot until
        // tail advances.
        let len = unsafe { ptr::read_unaligned(slot.cast::<u32>()) } as usize;
        let fits = len <= buf.len() && len <= self.slot_size as usize;
        if fits {
            unsafe {
                ptr::copy_nonoverlapping(slot.add(SLOT_HEADER), buf.as_mut_ptr(), len);
            }
        }
        self.tail().store(tail.wrapping_add(1), Ordering::Release);

        if fits {
            Ok(Some(len))
        } else {
            Err(Error::BufferTooSmall)
        }
    }

    /// Messages waiting in the ring.
    pub fn pending(&self) -> u32 {
        let head = self.head().load(Ordering::Acquire);
        let tail = self.tail().load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }
}

// SAFETY: the ring lives in shared memory and every access goes through
// atomics or slots published by them; the single-producer/single-consumer
// contract is part of `attach`'s safety requirements.
unsafe impl Send for Vring {}
