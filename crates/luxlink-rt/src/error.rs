// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error type.

use core::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Failures on the real-time side.
///
/// None of these are fatal: the engine keeps running with the last good
/// state and the dispatcher maps them to response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Slot, count or timing value outside the DMX512 contract.
    Range,
    /// IPC ring full at send time.
    Backpressure,
    /// Message does not fit the receiving buffer or ring slot.
    BufferTooSmall,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range => f.write_str("value out of range"),
            Self::Backpressure => f.write_str("ring full"),
            Self::BufferTooSmall => f.write_str("buffer too small"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
