// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # LUXLINK RT - Real-time side of the DMX512 gateway
//!
//! `no_std` implementation of the bare-metal / lightweight-RTOS half of the
//! gateway for the remote cores of an AMP SoC.
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------+
//! |  TinyGateway (cooperative main loop)     |
//! +------------------------------------------+
//!        v                    ^
//! +------------------------------------------+
//! |  Dispatcher (framed command -> response) |
//! +------------------------------------------+
//!        v                    ^
//! +------------------------------------------+
//! |  DmxEngine (universe, BREAK/MAB, FIFO)   |
//! +------------------------------------------+
//!        v                    ^
//! +------------------------------------------+
//! |  DmxUart / Clock / CriticalSection seams |
//! +------------------------------------------+
//! ```
//!
//! The IPC path (shared-memory vrings + mailbox doorbells) lives in
//! [`ipc`] and feeds the dispatcher through a lock-free byte ring.
//!
//! ## Design Constraints
//!
//! - **No heap allocations** (fixed buffers throughout)
//! - **No panics in steady state** - every command path replies with a
//!   status code and keeps running
//! - **Interrupts disabled only for the BREAK/MAB window**
//! - **`no_std` compatible** (`std` feature exists for host testing)
//!
//! ## Deployment note
//!
//! Every peripheral this side touches - the DMX UART, both mailboxes, the
//! interrupt multiplexer and the core clocks - must be declared in the host
//! OS's reserved-clocks table. The host clock framework disables "unused"
//! clocks during late boot, and an unreserved UART clock stops the frame
//! engine with no error path.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(test)]
extern crate std;

#[cfg(test)]
pub(crate) mod testutil;

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod hal;
pub mod ipc;
pub mod tiny;
pub mod uart;

pub use dispatch::Dispatcher;
pub use engine::DmxEngine;
pub use error::{Error, Result};
pub use tiny::TinyGateway;
