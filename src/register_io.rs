// This file is part of snapnvme, an application to exercise the NVMe command queue of a SNAP FPGA storage accelerator.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// snapnvme is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// snapnvme is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Error Wrapping Register I/O Helpers
//!
//! The card exposes two independent register windows: the copy-engine (action) window and
//! the storage-queue (NVMe) window. Each is a [`RegisterWindow`] with its own address space
//! starting at offset zero. Windows only know how to move one aligned 32-bit word; this
//! module adds bounds checking, trace logging and conversion to [`SnapNvmeError`] on top.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use snapnvme::register_io::{reg_read, reg_write, RegisterWindow};
//! # fn example(window: &dyn RegisterWindow) -> Result<(), snapnvme::error::SnapNvmeError> {
//! // Program the blocks-per-command register
//! reg_write(window, 0x10, 1)?;
//!
//! // Read the queue status
//! let status = reg_read(window, 0x00)?;
//! # Ok(())
//! # }
//! ```

use crate::error::SnapNvmeError;
use log::trace;
use std::io;

/// A 32-bit register address space on the card.
///
/// Implementations perform the raw access only. Offsets handed to [`read32`](Self::read32)
/// and [`write32`](Self::write32) through [`reg_read`] and [`reg_write`] are always 4-byte
/// aligned and inside `0..len()`.
pub trait RegisterWindow {
    /// Short name used in logs and errors, e.g. `"action"` or `"nvme"`.
    fn name(&self) -> &'static str;

    /// Size of the window in bytes.
    fn len(&self) -> usize;

    /// Read one 32-bit register.
    fn read32(&self, offset: u32) -> io::Result<u32>;

    /// Write one 32-bit register.
    fn write32(&self, offset: u32, value: u32) -> io::Result<()>;
}

fn check_offset(window: &dyn RegisterWindow, offset: u32) -> Result<(), SnapNvmeError> {
    let in_range = (offset as usize)
        .checked_add(4)
        .is_some_and(|end| end <= window.len());
    if offset % 4 != 0 || !in_range {
        return Err(SnapNvmeError::OutOfWindow {
            window: window.name(),
            offset,
            len: window.len(),
        });
    }
    Ok(())
}

/// Read a register and convert failures to `SnapNvmeError::RegisterRead`.
///
/// # Arguments
///
/// * `window` - The register window to read from
/// * `offset` - Byte offset of the register inside the window
///
/// # Returns: `Result<u32, SnapNvmeError>`
/// * `Ok(u32)` - The register value
/// * `Err(SnapNvmeError::OutOfWindow)` - Misaligned offset or outside the window
/// * `Err(SnapNvmeError::RegisterRead)` - The transport failed
pub fn reg_read(window: &dyn RegisterWindow, offset: u32) -> Result<u32, SnapNvmeError> {
    check_offset(window, offset)?;
    match window.read32(offset) {
        Ok(value) => {
            trace!("{}[{offset:#06x}] -> {value:#010x}", window.name());
            Ok(value)
        }
        Err(e) => Err(SnapNvmeError::RegisterRead {
            window: window.name(),
            offset,
            e,
        }),
    }
}

/// Write a register and convert failures to `SnapNvmeError::RegisterWrite`.
///
/// # Arguments
///
/// * `window` - The register window to write to
/// * `offset` - Byte offset of the register inside the window
/// * `value` - The value to write
///
/// # Returns: `Result<(), SnapNvmeError>`
/// * `Ok(())` - Write succeeded
/// * `Err(SnapNvmeError::OutOfWindow)` - Misaligned offset or outside the window
/// * `Err(SnapNvmeError::RegisterWrite)` - The transport failed
pub fn reg_write(
    window: &dyn RegisterWindow,
    offset: u32,
    value: u32,
) -> Result<(), SnapNvmeError> {
    check_offset(window, offset)?;
    trace!("{}[{offset:#06x}] <- {value:#010x}", window.name());
    window
        .write32(offset, value)
        .map_err(|e| SnapNvmeError::RegisterWrite {
            window: window.name(),
            offset,
            value,
            e,
        })
}
