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

//! Memory-mapped card platform.
//!
//! Reaches a real card through its two device nodes:
//! - the slave context (`/dev/cxl/afu{card}.0s`), whose mapping starts with the action
//!   registers and whose file descriptor signals action interrupts
//! - the master context (`/dev/cxl/afu{card}.0m`), whose mapping holds the capability
//!   register and, at [`master::NVME_WINDOW_OFFSET`], the NVMe host controller registers
//!
//! Both nodes are opened read-write and mapped once per card.
//!
//! # Registration
//!
//! The platform registers itself as `"mmio"`.

use crate::config::{
    MASTER_DEVICE_TEMPLATE, MASTER_MMIO_SIZE, SLAVE_DEVICE_TEMPLATE, SLAVE_MMIO_SIZE, device_path,
};
use crate::copy::{InterruptSource, set_done_interrupt, wait_for_action_type};
use crate::error::SnapNvmeError;
use crate::platforms::mmio_components::mapped_window::{MappedRegion, MappedWindow};
use crate::platforms::platform::{Card, Platform, register_platform};
use crate::register_io::{RegisterWindow, reg_read};
use crate::regs::{action, master, nvme};
use log::{debug, trace};
use rustix::event::{PollFd, PollFlags, poll};
use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::rc::Rc;
use std::time::Duration;

/// Platform for cards reachable through memory-mapped device nodes.
#[derive(Debug, Default)]
pub struct MmioPlatform;

impl MmioPlatform {
    pub fn new() -> Self {
        trace!("creating new mmio platform");
        MmioPlatform
    }

    pub fn register_platform() {
        register_platform("mmio", || Box::new(MmioPlatform::new()));
    }
}

fn open_node(path: &str) -> Result<File, SnapNvmeError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| SnapNvmeError::DeviceUnavailable(format!("Cannot open {path}: {e}")))
}

impl Platform for MmioPlatform {
    fn name(&self) -> &'static str {
        "mmio"
    }

    fn open_card(&self, card: u32) -> Result<Box<dyn Card>, SnapNvmeError> {
        let slave_path = device_path(SLAVE_DEVICE_TEMPLATE, card);
        let master_path = device_path(MASTER_DEVICE_TEMPLATE, card);
        debug!("Opening card {card} through {slave_path} and {master_path}");

        let slave_file = open_node(&slave_path)?;
        let master_file = open_node(&master_path)?;
        let slave = Rc::new(MappedRegion::map(&slave_file, SLAVE_MMIO_SIZE, &slave_path)?);
        let master = Rc::new(MappedRegion::map(&master_file, MASTER_MMIO_SIZE, &master_path)?);

        Ok(Box::new(MmioCard {
            action: MappedWindow::new("action", slave, 0, action::WINDOW_SIZE)?,
            capability: MappedWindow::new(
                "master",
                Rc::clone(&master),
                0,
                master::NVME_WINDOW_OFFSET,
            )?,
            nvme: MappedWindow::new(
                "nvme",
                master,
                master::NVME_WINDOW_OFFSET,
                nvme::WINDOW_SIZE,
            )?,
            slave_file,
            _master_file: master_file,
            irq_enabled: Cell::new(false),
        }))
    }
}

/// A card opened from [`MmioPlatform`].
#[derive(Debug)]
pub struct MmioCard {
    action: MappedWindow,
    capability: MappedWindow,
    nvme: MappedWindow,
    slave_file: File,
    _master_file: File,
    irq_enabled: Cell<bool>,
}

impl Card for MmioCard {
    fn action_window(&self) -> &dyn RegisterWindow {
        &self.action
    }

    fn nvme_window(&self) -> &dyn RegisterWindow {
        &self.nvme
    }

    fn nvme_enabled(&self) -> Result<bool, SnapNvmeError> {
        let capability = reg_read(&self.capability, master::CAPABILITY)?;
        Ok(capability & master::CAPABILITY_NVME_ENABLED != 0)
    }

    fn attach_action(
        &self,
        action_type: u32,
        irq: bool,
        timeout: Duration,
    ) -> Result<(), SnapNvmeError> {
        wait_for_action_type(&self.action, action_type, timeout)?;
        if irq {
            set_done_interrupt(&self.action, true)?;
            self.irq_enabled.set(true);
        }
        Ok(())
    }

    fn detach_action(&self) -> Result<(), SnapNvmeError> {
        if self.irq_enabled.replace(false) {
            set_done_interrupt(&self.action, false)?;
        }
        Ok(())
    }

    fn interrupts(&self) -> Option<&dyn InterruptSource> {
        Some(self)
    }
}

impl InterruptSource for MmioCard {
    fn wait_for_interrupt(&self, timeout: Duration) -> Result<bool, SnapNvmeError> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut fds = [PollFd::new(&self.slave_file, PollFlags::IN)];
        let ready = poll(&mut fds, timeout_ms).map_err(|e| {
            SnapNvmeError::DeviceUnavailable(format!(
                "Waiting for the action interrupt failed: {e}"
            ))
        })?;
        if ready == 0 || !fds[0].revents().contains(PollFlags::IN) {
            return Ok(false);
        }
        let mut event = [0u8; 4096];
        let n = (&self.slave_file).read(&mut event).map_err(|e| {
            SnapNvmeError::DeviceUnavailable(format!("Reading the action interrupt failed: {e}"))
        })?;
        trace!("Interrupt event of {n} bytes");
        Ok(true)
    }
}
