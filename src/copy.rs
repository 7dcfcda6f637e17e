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

//! Copy engine orchestration.
//!
//! The example action on the card contains a copy engine that moves bytes between host
//! memory and card RAM. One transfer is: write the six configuration registers, set the
//! start bit, then poll the control register until the done bit shows up or the timeout
//! passes. The engine has no partial completion: a transfer either finishes or times out,
//! and a timeout is not retried.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use snapnvme::copy::{CopyDirection, CopyOrchestrator, TransferDescriptor};
//! # use snapnvme::register_io::RegisterWindow;
//! # use std::time::Duration;
//! # use snapnvme::error::SnapNvmeError;
//! # fn example(action: &dyn RegisterWindow, host_addr: u64) -> Result<(), SnapNvmeError> {
//! let descriptor = TransferDescriptor::new(CopyDirection::HostToCard, 0x0, host_addr, 4096);
//! let elapsed = CopyOrchestrator::new(action).run_copy(&descriptor, Duration::from_secs(1))?;
//! println!("copied in {elapsed:?}");
//! # Ok(())
//! # }
//! ```

use crate::error::SnapNvmeError;
use crate::register_io::{RegisterWindow, reg_read, reg_write};
use crate::regs::action;
use log::{debug, error, info};
use std::time::{Duration, Instant};

/// Direction of a copy, written to the action's config register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    HostToCard,
    CardToHost,
}

impl CopyDirection {
    pub fn config_opcode(self) -> u32 {
        match self {
            CopyDirection::HostToCard => action::CONFIG_COPY_HD,
            CopyDirection::CardToHost => action::CONFIG_COPY_DH,
        }
    }

    pub fn from_config_opcode(opcode: u32) -> Option<Self> {
        match opcode {
            action::CONFIG_COPY_HD => Some(CopyDirection::HostToCard),
            action::CONFIG_COPY_DH => Some(CopyDirection::CardToHost),
            _ => None,
        }
    }
}

/// One copy, consumed in a single configure step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferDescriptor {
    direction: CopyDirection,
    dest: u64,
    src: u64,
    length: u32,
}

impl TransferDescriptor {
    pub fn new(direction: CopyDirection, dest: u64, src: u64, length: u32) -> Self {
        TransferDescriptor {
            direction,
            dest,
            src,
            length,
        }
    }

    pub fn direction(&self) -> CopyDirection {
        self.direction
    }

    pub fn dest(&self) -> u64 {
        self.dest
    }

    pub fn src(&self) -> u64 {
        self.src
    }

    pub fn length(&self) -> u32 {
        self.length
    }
}

/// Something that can put the caller to sleep until the action raises its done interrupt.
pub trait InterruptSource {
    /// Wait at most `timeout` for the interrupt.
    ///
    /// # Returns: `Result<bool, SnapNvmeError>`
    /// * `Ok(true)` - The interrupt fired
    /// * `Ok(false)` - The timeout passed first
    /// * `Err(SnapNvmeError)` - Waiting failed
    fn wait_for_interrupt(&self, timeout: Duration) -> Result<bool, SnapNvmeError>;
}

/// Drives the copy engine in the action register window.
pub struct CopyOrchestrator<'a> {
    window: &'a dyn RegisterWindow,
    interrupts: Option<&'a dyn InterruptSource>,
}

impl<'a> CopyOrchestrator<'a> {
    /// An orchestrator that busy-polls for completion.
    pub fn new(window: &'a dyn RegisterWindow) -> Self {
        CopyOrchestrator {
            window,
            interrupts: None,
        }
    }

    /// Sleep on `interrupts` between completion polls instead of spinning.
    pub fn with_interrupts(mut self, interrupts: &'a dyn InterruptSource) -> Self {
        self.interrupts = Some(interrupts);
        self
    }

    fn configure(&self, descriptor: &TransferDescriptor) -> Result<(), SnapNvmeError> {
        debug!(
            "memcpy_{:x}({:#x}, {:#x}, {:#x})",
            descriptor.direction.config_opcode(),
            descriptor.dest,
            descriptor.src,
            descriptor.length
        );
        reg_write(self.window, action::CONFIG, descriptor.direction.config_opcode())?;
        reg_write(self.window, action::DEST_LOW, descriptor.dest as u32)?;
        reg_write(self.window, action::DEST_HIGH, (descriptor.dest >> 32) as u32)?;
        reg_write(self.window, action::SRC_LOW, descriptor.src as u32)?;
        reg_write(self.window, action::SRC_HIGH, (descriptor.src >> 32) as u32)?;
        reg_write(self.window, action::CNT, descriptor.length)
    }

    /// Run one transfer to completion.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - What to copy where
    /// * `timeout` - Wall-clock limit for the engine to report done
    ///
    /// # Returns: `Result<Duration, SnapNvmeError>`
    /// * `Ok(Duration)` - Time from start to done
    /// * `Err(SnapNvmeError::Timeout)` - The done bit did not show up in time
    /// * `Err(SnapNvmeError::RegisterRead | RegisterWrite)` - Register access failed
    pub fn run_copy(
        &self,
        descriptor: &TransferDescriptor,
        timeout: Duration,
    ) -> Result<Duration, SnapNvmeError> {
        self.configure(descriptor)?;
        let start = Instant::now();
        reg_write(self.window, action::CONTROL, action::control::START)?;
        loop {
            let control = reg_read(self.window, action::CONTROL)?;
            let elapsed = start.elapsed();
            if control & action::control::DONE != 0 {
                info!(
                    "{:?} copy of {} bytes {}",
                    descriptor.direction,
                    descriptor.length,
                    format_throughput(elapsed, descriptor.length as u64)
                );
                return Ok(elapsed);
            }
            if elapsed >= timeout {
                error!("Timeout while waiting for idle");
                return Err(SnapNvmeError::Timeout {
                    operation: format!(
                        "{:?} copy of {} bytes",
                        descriptor.direction, descriptor.length
                    ),
                    timeout,
                });
            }
            match self.interrupts {
                Some(irq) => {
                    irq.wait_for_interrupt(timeout - elapsed)?;
                }
                None => std::hint::spin_loop(),
            }
        }
    }
}

/// Poll the action type register until it reports `expected`.
///
/// # Returns: `Result<(), SnapNvmeError>`
/// * `Ok(())` - The expected action is loaded
/// * `Err(SnapNvmeError::DeviceUnavailable)` - A different or no action answered in time
pub fn wait_for_action_type(
    window: &dyn RegisterWindow,
    expected: u32,
    timeout: Duration,
) -> Result<(), SnapNvmeError> {
    let start = Instant::now();
    loop {
        let found = reg_read(window, action::TYPE)?;
        if found == expected {
            let release = reg_read(window, action::RELEASE)?;
            debug!("Action {expected:#010x} release {release:#010x} attached");
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(SnapNvmeError::DeviceUnavailable(format!(
                "Cannot attach action {expected:#010x}: card reports {found:#010x}"
            )));
        }
        std::hint::spin_loop();
    }
}

/// Enable or disable the action's done interrupt.
pub fn set_done_interrupt(window: &dyn RegisterWindow, enabled: bool) -> Result<(), SnapNvmeError> {
    let value = u32::from(enabled);
    reg_write(window, action::IRQ_ENABLE, value)?;
    reg_write(window, action::IRQ_GLOBAL_ENABLE, value)
}

/// Human readable duration and rate of a transfer.
pub fn format_throughput(elapsed: Duration, bytes: u64) -> String {
    let megabytes = bytes as f64 / (1024.0 * 1024.0);
    let usec = elapsed.as_micros().max(1);
    let rate = megabytes / (usec as f64 / 1_000_000.0);
    if usec > 10_000 {
        format!("in {} msec ({rate:.3} MB/sec)", usec / 1000)
    } else {
        format!("in {usec} usec ({rate:.3} MB/sec)")
    }
}
