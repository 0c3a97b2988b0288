// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw-mode tty plumbing: open, `cfmakeraw`, and `select`-gated reads.
//!
//! Binary protocols over a tty need raw mode, or the line discipline
//! interprets control bytes (0x03, 0x11, 0x13, ...) out of the stream.

use crate::ClientError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

#[derive(Debug)]
pub(crate) struct RawTty {
    file: File,
}

impl RawTty {
    /// Open the endpoint read/write without becoming its controlling
    /// terminal, and switch it to raw mode with `VMIN=1`, `VTIME=0`.
    pub(crate) fn open(device: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(device)?;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid open descriptor owned by `file`; termios
        // is a plain-old-data struct fully initialized by tcgetattr.
        unsafe {
            let mut tty: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut tty) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            libc::cfmakeraw(&mut tty);
            // read() blocks until at least one byte; select() supplies the
            // timeout.
            tty.c_cc[libc::VMIN] = 1;
            tty.c_cc[libc::VTIME] = 0;
            if libc::tcsetattr(fd, libc::TCSANOW, &tty) < 0 {
                return Err(std::io::Error::last_os_error());
            }
        }

        Ok(Self { file })
    }

    pub(crate) fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.file.write_all(buf)
    }

    /// Fill `buf`, gating every read on a `select` with `timeout_ms`.
    pub(crate) fn read_exact(
        &mut self,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<(), ClientError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.wait_readable(timeout_ms)? {
                true => {}
                false => return Err(ClientError::Timeout),
            }
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                // Endpoint went away under us (peer restart).
                return Err(ClientError::Timeout);
            }
            filled += n;
        }
        Ok(())
    }

    fn wait_readable(&self, timeout_ms: u32) -> Result<bool, ClientError> {
        let fd = self.file.as_raw_fd();
        // SAFETY: fd_set is initialized by FD_ZERO before use; `fd` is a
        // valid descriptor below FD_SETSIZE for the tty endpoints in play.
        unsafe {
            let mut read_fds: libc::fd_set = std::mem::zeroed();
            libc::FD_ZERO(&mut read_fds);
            libc::FD_SET(fd, &mut read_fds);

            let mut tv = libc::timeval {
                tv_sec: libc::time_t::from(timeout_ms / 1000),
                tv_usec: libc::suseconds_t::from(timeout_ms % 1000) * 1000,
            };

            match libc::select(
                fd + 1,
                &mut read_fds,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut tv,
            ) {
                -1 => Err(ClientError::Transport(std::io::Error::last_os_error())),
                0 => Ok(false),
                _ => Ok(true),
            }
        }
    }
}
