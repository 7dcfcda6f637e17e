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

//! Simulated card platform.
//!
//! A deterministic, in-process card: the example action's copy engine, the NVMe host
//! controller with bounded per-queue depth, sparse card RAM and two synthetic drives.
//! Time advances one step per register read, so runs are reproducible regardless of host
//! speed. Faults can be switched on through [`SimConfig`].
//!
//! # Architecture
//!
//! All components live in one shared state owned by the platform. Cards opened from the
//! platform and [`SimProbe`] handles refer to the same state, so a test can run a session
//! through the [`Platform`] trait and inspect what the hardware saw afterwards.
//! - [`CopyEngine`] - action registers and the copy engine
//! - [`StorageQueue`] - NVMe registers, queue slots and the completion FIFO
//! - [`CardMemory`] - card RAM
//!
//! # Registration
//!
//! The platform registers itself as `"sim"` with the default configuration.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use snapnvme::platforms::simulated::{SimConfig, SimulatedPlatform};
//! # use snapnvme::platforms::platform::Platform;
//! # fn example() -> Result<(), snapnvme::error::SnapNvmeError> {
//! let platform = SimulatedPlatform::new(SimConfig {
//!     queue_depth: 2,
//!     ..SimConfig::default()
//! });
//! let probe = platform.probe();
//! let card = platform.open_card(0)?;
//! // ... drive the card ...
//! assert_eq!(probe.queue_stats().overruns, 0);
//! # Ok(())
//! # }
//! ```

use crate::buffer::HostBuffer;
use crate::config::MAX_CARD_INDEX;
use crate::copy::{InterruptSource, TransferDescriptor, set_done_interrupt, wait_for_action_type};
use crate::error::SnapNvmeError;
use crate::platforms::platform::{Card, Platform, register_platform};
use crate::platforms::simulated_components::card_memory::CardMemory;
use crate::platforms::simulated_components::copy_engine::{CopyEngine, CopyEngineConfig};
use crate::platforms::simulated_components::storage_queue::{QueueStats, StorageQueue};
use crate::register_io::RegisterWindow;
use crate::regs::{action, nvme};
use log::{debug, trace};
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

/// Timing and faults of the simulated card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Slots per submission queue.
    pub queue_depth: u32,
    /// Register reads a storage command holds its slot.
    pub completion_latency: u32,
    /// Control register reads a copy takes.
    pub copy_latency: u32,
    /// What the action type register reports.
    pub action_type: u32,
    pub nvme_enabled: bool,
    /// Cards `0..present_cards` can be opened.
    pub present_cards: u32,
    /// The copy engine never finishes.
    pub stall_copy: bool,
    /// Flip this word of every host-to-card copy.
    pub corrupt_word: Option<usize>,
    /// Every write to the NVMe window fails.
    pub fail_nvme_writes: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            queue_depth: 4,
            completion_latency: 3,
            copy_latency: 2,
            action_type: action::ACTION_TYPE_EXAMPLE,
            nvme_enabled: true,
            present_cards: MAX_CARD_INDEX + 1,
            stall_copy: false,
            corrupt_word: None,
            fail_nvme_writes: false,
        }
    }
}

#[derive(Debug)]
struct SimState {
    memory: CardMemory,
    engine: CopyEngine,
    queue: StorageQueue,
    attached: bool,
    attach_count: u32,
    detach_count: u32,
    irq_waits: u32,
}

impl SimState {
    fn new(config: &SimConfig) -> Self {
        SimState {
            memory: CardMemory::new(),
            engine: CopyEngine::new(CopyEngineConfig {
                action_type: config.action_type,
                latency: config.copy_latency,
                stalled: config.stall_copy,
                corrupt_word: config.corrupt_word,
            }),
            queue: StorageQueue::new(config.queue_depth, config.completion_latency),
            attached: false,
            attach_count: 0,
            detach_count: 0,
            irq_waits: 0,
        }
    }
}

/// The simulated platform. Every card it opens shares one simulated device.
#[derive(Debug)]
pub struct SimulatedPlatform {
    config: SimConfig,
    state: Rc<RefCell<SimState>>,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimulatedPlatform {
    pub fn new(config: SimConfig) -> Self {
        trace!("creating new simulated platform with {config:?}");
        SimulatedPlatform {
            state: Rc::new(RefCell::new(SimState::new(&config))),
            config,
        }
    }

    pub fn register_platform() {
        register_platform("sim", || Box::new(SimulatedPlatform::default()));
    }

    /// A handle for looking at the simulated hardware.
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            state: Rc::clone(&self.state),
        }
    }
}

impl Platform for SimulatedPlatform {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn open_card(&self, card: u32) -> Result<Box<dyn Card>, SnapNvmeError> {
        if card >= self.config.present_cards {
            return Err(SnapNvmeError::DeviceUnavailable(format!(
                "Simulated card {card} is not present"
            )));
        }
        debug!("Opened simulated card {card}");
        Ok(Box::new(SimulatedCard {
            config: self.config,
            action: SimWindow {
                kind: WindowKind::Action,
                state: Rc::clone(&self.state),
                fail_writes: false,
            },
            nvme: SimWindow {
                kind: WindowKind::Nvme,
                state: Rc::clone(&self.state),
                fail_writes: self.config.fail_nvme_writes,
            },
            state: Rc::clone(&self.state),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowKind {
    Action,
    Nvme,
}

#[derive(Debug)]
struct SimWindow {
    kind: WindowKind,
    state: Rc<RefCell<SimState>>,
    fail_writes: bool,
}

impl RegisterWindow for SimWindow {
    fn name(&self) -> &'static str {
        match self.kind {
            WindowKind::Action => "action",
            WindowKind::Nvme => "nvme",
        }
    }

    fn len(&self) -> usize {
        match self.kind {
            WindowKind::Action => action::WINDOW_SIZE,
            WindowKind::Nvme => nvme::WINDOW_SIZE,
        }
    }

    fn read32(&self, offset: u32) -> io::Result<u32> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        Ok(match self.kind {
            WindowKind::Action => state.engine.read(offset, &mut state.memory),
            WindowKind::Nvme => state.queue.read(offset, &mut state.memory),
        })
    }

    fn write32(&self, offset: u32, value: u32) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::other("simulated bus error"));
        }
        let mut state = self.state.borrow_mut();
        match self.kind {
            WindowKind::Action => state.engine.write(offset, value),
            WindowKind::Nvme => state.queue.write(offset, value),
        }
        Ok(())
    }
}

/// A card opened from [`SimulatedPlatform`].
#[derive(Debug)]
pub struct SimulatedCard {
    config: SimConfig,
    action: SimWindow,
    nvme: SimWindow,
    state: Rc<RefCell<SimState>>,
}

impl Card for SimulatedCard {
    fn action_window(&self) -> &dyn RegisterWindow {
        &self.action
    }

    fn nvme_window(&self) -> &dyn RegisterWindow {
        &self.nvme
    }

    fn nvme_enabled(&self) -> Result<bool, SnapNvmeError> {
        Ok(self.config.nvme_enabled)
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
        }
        let mut state = self.state.borrow_mut();
        state.attached = true;
        state.attach_count += 1;
        Ok(())
    }

    fn detach_action(&self) -> Result<(), SnapNvmeError> {
        let irq_enabled = self.state.borrow().engine.interrupts_enabled();
        if irq_enabled {
            set_done_interrupt(&self.action, false)?;
        }
        let mut state = self.state.borrow_mut();
        state.attached = false;
        state.detach_count += 1;
        Ok(())
    }

    fn interrupts(&self) -> Option<&dyn InterruptSource> {
        Some(self)
    }

    unsafe fn register_host_buffer(&self, buffer: &HostBuffer) {
        let mut state = self.state.borrow_mut();
        // SAFETY: the caller keeps `buffer` alive and unborrowed until
        // unregister_host_buffer, which revokes the region.
        unsafe { state.engine.grant_host_region(buffer.dma_address(), buffer.len()) };
    }

    fn unregister_host_buffer(&self, buffer: &HostBuffer) {
        self.state.borrow_mut().engine.revoke_host_region(buffer.dma_address());
    }
}

impl InterruptSource for SimulatedCard {
    fn wait_for_interrupt(&self, _timeout: Duration) -> Result<bool, SnapNvmeError> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.irq_waits += 1;
        if !state.engine.interrupts_enabled() {
            return Ok(false);
        }
        Ok(state.engine.finish_now(&mut state.memory))
    }
}

/// Read-only view of the simulated hardware.
#[derive(Debug, Clone)]
pub struct SimProbe {
    state: Rc<RefCell<SimState>>,
}

impl SimProbe {
    /// What the NVMe controller saw so far.
    pub fn queue_stats(&self) -> QueueStats {
        self.state.borrow().queue.stats().clone()
    }

    /// Commands currently holding a queue slot.
    pub fn occupied_slots(&self) -> usize {
        self.state.borrow().queue.occupied()
    }

    /// Copies the engine completed, oldest first.
    pub fn copies(&self) -> Vec<TransferDescriptor> {
        self.state.borrow().engine.completed().to_vec()
    }

    pub fn copy_engine_busy(&self) -> bool {
        self.state.borrow().engine.busy()
    }

    pub fn attached(&self) -> bool {
        self.state.borrow().attached
    }

    pub fn attach_count(&self) -> u32 {
        self.state.borrow().attach_count
    }

    pub fn detach_count(&self) -> u32 {
        self.state.borrow().detach_count
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.state.borrow().engine.interrupts_enabled()
    }

    /// Interrupt waits the copy orchestrator performed.
    pub fn irq_waits(&self) -> u32 {
        self.state.borrow().irq_waits
    }

    /// Host buffers the copy engine may currently reach.
    pub fn host_regions(&self) -> usize {
        self.state.borrow().engine.host_regions()
    }

    /// The card RAM word at `addr`.
    pub fn card_word(&self, addr: u64) -> u64 {
        self.state.borrow().memory.read_u64(addr)
    }
}
