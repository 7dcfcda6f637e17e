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

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SnapNvmeError {
    #[error("SnapNvmeError::Configuration: {0}")]
    Configuration(String),
    #[error("SnapNvmeError::DeviceUnavailable: {0}")]
    DeviceUnavailable(String),
    #[error("SnapNvmeError::Allocation: Failed to allocate a {len} byte host buffer: {e}")]
    Allocation { len: usize, e: std::io::Error },
    #[error("SnapNvmeError::Timeout: {operation} did not complete within {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
    #[error(
        "SnapNvmeError::QueueStalled: queue-full bit {full_bit:#x} stayed set for {timeout:?} after {submitted} submissions"
    )]
    QueueStalled {
        full_bit: u32,
        submitted: u32,
        timeout: Duration,
    },
    #[error(
        "SnapNvmeError::RegisterRead: An IO error occurred when reading {window} register {offset:#06x}: {e}"
    )]
    RegisterRead {
        window: &'static str,
        offset: u32,
        e: std::io::Error,
    },
    #[error(
        "SnapNvmeError::RegisterWrite: An IO error occurred when writing {value:#010x} to {window} register {offset:#06x}: {e}"
    )]
    RegisterWrite {
        window: &'static str,
        offset: u32,
        value: u32,
        e: std::io::Error,
    },
    #[error(
        "SnapNvmeError::OutOfWindow: offset {offset:#x} is outside the {len:#x} byte {window} window"
    )]
    OutOfWindow {
        window: &'static str,
        offset: u32,
        len: usize,
    },
    #[error("SnapNvmeError::Internal: An Internal error occurred: {0}")]
    Internal(String),
}

impl SnapNvmeError {
    /// Whether this error was raised while validating user input, before any hardware access.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SnapNvmeError::Configuration(..))
    }
}
