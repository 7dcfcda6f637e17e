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

//! Simulated action register file and copy engine.
//!
//! A write of the start bit latches the six configuration registers into a job. The job
//! finishes after `latency` reads of the control register (or at once when the interrupt
//! path is used). The done bit is cleared by the read that observes it.
//!
//! Host memory is only reached inside regions granted with
//! [`CopyEngine::grant_host_region`]. A transfer touching anything else completes without
//! moving data, so the round-trip comparison reports it.

use crate::copy::{CopyDirection, TransferDescriptor};
use crate::platforms::simulated_components::card_memory::CardMemory;
use crate::regs::action;
use log::{debug, warn};

/// Release number the simulated action reports.
pub const SIM_ACTION_RELEASE: u32 = 0x0000_0001;

#[derive(Debug)]
struct CopyJob {
    descriptor: TransferDescriptor,
    remaining: u32,
}

/// Faults and timing of the simulated copy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyEngineConfig {
    pub action_type: u32,
    /// Control register reads a job takes.
    pub latency: u32,
    /// Never finish a started job.
    pub stalled: bool,
    /// Flip every bit of this word after each host-to-card copy.
    pub corrupt_word: Option<usize>,
}

#[derive(Debug)]
pub struct CopyEngine {
    config: CopyEngineConfig,
    regs: [u32; action::WINDOW_SIZE / 4],
    job: Option<CopyJob>,
    done: bool,
    completed: Vec<TransferDescriptor>,
    host_regions: Vec<HostRegion>,
}

/// Host memory the engine may read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HostRegion {
    addr: u64,
    len: u64,
}

impl HostRegion {
    fn covers(&self, addr: u64, len: u64) -> bool {
        match (addr.checked_add(len), self.addr.checked_add(self.len)) {
            (Some(end), Some(region_end)) => addr >= self.addr && end <= region_end,
            _ => false,
        }
    }
}

impl CopyEngine {
    pub fn new(config: CopyEngineConfig) -> Self {
        let mut regs = [0; action::WINDOW_SIZE / 4];
        regs[action::TYPE as usize / 4] = config.action_type;
        regs[action::RELEASE as usize / 4] = SIM_ACTION_RELEASE;
        CopyEngine {
            config,
            regs,
            job: None,
            done: false,
            completed: Vec::new(),
            host_regions: Vec::new(),
        }
    }

    /// Let transfers reach `len` bytes of host memory starting at `addr`.
    ///
    /// # Safety
    ///
    /// Until [`CopyEngine::revoke_host_region`] is called for `addr`, the memory must stay
    /// allocated and writable, and no reference into it may be alive while a job finishes.
    pub unsafe fn grant_host_region(&mut self, addr: u64, len: usize) {
        debug!("Simulated copy engine may reach host {addr:#x}+{len:#x}");
        self.host_regions.push(HostRegion {
            addr,
            len: len as u64,
        });
    }

    /// Withdraw every region granted at `addr`.
    pub fn revoke_host_region(&mut self, addr: u64) {
        self.host_regions.retain(|region| region.addr != addr);
    }

    /// Host regions currently granted.
    pub fn host_regions(&self) -> usize {
        self.host_regions.len()
    }

    fn host_reachable(&self, addr: u64, len: u64) -> bool {
        self.host_regions.iter().any(|region| region.covers(addr, len))
    }

    /// Transfers that ran to completion, oldest first.
    pub fn completed(&self) -> &[TransferDescriptor] {
        &self.completed
    }

    pub fn busy(&self) -> bool {
        self.job.is_some()
    }

    /// Whether both interrupt enable registers are set.
    pub fn interrupts_enabled(&self) -> bool {
        self.reg(action::IRQ_ENABLE) != 0 && self.reg(action::IRQ_GLOBAL_ENABLE) != 0
    }

    fn reg(&self, offset: u32) -> u32 {
        self.regs[offset as usize / 4]
    }

    pub fn read(&mut self, offset: u32, memory: &mut CardMemory) -> u32 {
        if offset != action::CONTROL {
            return self.reg(offset);
        }
        self.tick(memory);
        let mut control = 0;
        if self.job.is_none() {
            control |= action::control::IDLE;
        }
        if self.done {
            control |= action::control::DONE;
            self.done = false;
        }
        control
    }

    pub fn write(&mut self, offset: u32, value: u32) {
        if offset == action::CONTROL {
            if value & action::control::START != 0 {
                self.start();
            }
            return;
        }
        self.regs[offset as usize / 4] = value;
    }

    fn start(&mut self) {
        let Some(direction) = CopyDirection::from_config_opcode(self.reg(action::CONFIG)) else {
            warn!(
                "Simulated action started with unknown config {:#x}",
                self.reg(action::CONFIG)
            );
            return;
        };
        let join = |low: u32, high: u32| ((self.reg(high) as u64) << 32) | self.reg(low) as u64;
        let descriptor = TransferDescriptor::new(
            direction,
            join(action::DEST_LOW, action::DEST_HIGH),
            join(action::SRC_LOW, action::SRC_HIGH),
            self.reg(action::CNT),
        );
        debug!("Simulated copy engine starts {descriptor:?}");
        self.done = false;
        self.job = Some(CopyJob {
            descriptor,
            remaining: self.config.latency,
        });
    }

    fn tick(&mut self, memory: &mut CardMemory) {
        if self.config.stalled {
            return;
        }
        if let Some(job) = self.job.as_mut() {
            job.remaining = job.remaining.saturating_sub(1);
            if job.remaining == 0 {
                self.finish(memory);
            }
        }
    }

    /// Complete the running job now, as if its interrupt had fired.
    ///
    /// Returns whether a job finished.
    pub fn finish_now(&mut self, memory: &mut CardMemory) -> bool {
        if self.config.stalled || self.job.is_none() {
            return false;
        }
        self.finish(memory);
        true
    }

    fn finish(&mut self, memory: &mut CardMemory) {
        let Some(job) = self.job.take() else {
            return;
        };
        self.execute(&job.descriptor, memory);
        if job.descriptor.direction() == CopyDirection::HostToCard
            && let Some(word) = self.config.corrupt_word
            && (word as u64 + 1) * 8 <= job.descriptor.length() as u64
        {
            let addr = job.descriptor.dest() + word as u64 * 8;
            memory.write_u64(addr, !memory.read_u64(addr));
        }
        self.completed.push(job.descriptor);
        self.done = true;
    }

    /// Move the bytes of one transfer between host memory and card RAM.
    fn execute(&self, descriptor: &TransferDescriptor, memory: &mut CardMemory) {
        let len = descriptor.length() as usize;
        if len == 0 {
            return;
        }
        let host_addr = match descriptor.direction() {
            CopyDirection::HostToCard => descriptor.src(),
            CopyDirection::CardToHost => descriptor.dest(),
        };
        if !self.host_reachable(host_addr, len as u64) {
            warn!("Simulated copy engine cannot reach host {host_addr:#x}+{len:#x}, no data moved");
            return;
        }
        match descriptor.direction() {
            CopyDirection::HostToCard => {
                // SAFETY: the range lies inside a region granted with grant_host_region,
                // whose contract keeps it allocated and free of references until revoked.
                let host = unsafe { std::slice::from_raw_parts(host_addr as *const u8, len) };
                memory.write(descriptor.dest(), host);
            }
            CopyDirection::CardToHost => {
                // SAFETY: as above; the granted region is also writable.
                let host = unsafe { std::slice::from_raw_parts_mut(host_addr as *mut u8, len) };
                memory.read(descriptor.src(), host);
            }
        }
    }
}
