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

//! Simulated NVMe host controller.
//!
//! Every queue has `depth` slots. A command holds its slot for `latency` register reads,
//! then its data lands in card RAM, the slot frees up and one entry is pushed onto the
//! completion FIFO. A `TRACK` read pops at most one entry and returns how many were
//! waiting, so a value above one is possible and carries no extra meaning.
//!
//! Drive contents are synthetic: the word at drive byte address `a` is
//! [`drive_word`]`(drive, a)`.

use crate::config::NVME_LB_SIZE;
use crate::platforms::simulated_components::card_memory::CardMemory;
use crate::queue::{CommandWord, Drive, Opcode};
use crate::regs::nvme;
use crate::verify::pattern_word;
use log::{debug, warn};
use std::collections::VecDeque;

const QUEUES: usize = 4;

/// Content of the simulated drives.
pub fn drive_word(drive: Drive, byte_addr: u64) -> u64 {
    let tag = match drive {
        Drive::Drive0 => 0,
        Drive::Drive1 => 1 << 40,
    };
    pattern_word(byte_addr ^ tag)
}

/// A command as the controller accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedCommand {
    pub command_word: CommandWord,
    /// Full card address, `DPTR_HIGH:DPTR_LOW`.
    pub data_pointer: u64,
    /// Full LBA, `LBA_HIGH:LBA_LOW`.
    pub lba: u64,
    pub blocks: u32,
}

#[derive(Debug)]
struct Pending {
    command: SubmittedCommand,
    remaining: u32,
}

/// What the controller saw.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub submissions: Vec<SubmittedCommand>,
    /// `COMMAND` writes to a queue whose full bit was set. They are dropped.
    pub overruns: u32,
    /// `COMMAND` writes that did not decode.
    pub invalid_commands: u32,
    /// Accepted commands whose completion has not been popped from `TRACK`.
    pub outstanding: u32,
    pub peak_outstanding: u32,
    /// Nonzero `TRACK` reads.
    pub completions_signalled: u32,
}

#[derive(Debug)]
pub struct StorageQueue {
    depth: u32,
    latency: u32,
    regs: [u32; nvme::WINDOW_SIZE / 4],
    slots: [VecDeque<Pending>; QUEUES],
    completions: VecDeque<SubmittedCommand>,
    stats: QueueStats,
}

impl StorageQueue {
    pub fn new(depth: u32, latency: u32) -> Self {
        StorageQueue {
            depth,
            latency,
            regs: [0; nvme::WINDOW_SIZE / 4],
            slots: Default::default(),
            completions: VecDeque::new(),
            stats: QueueStats::default(),
        }
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Commands holding a slot in any queue.
    pub fn occupied(&self) -> usize {
        self.slots.iter().map(VecDeque::len).sum()
    }

    fn reg(&self, offset: u32) -> u32 {
        self.regs[offset as usize / 4]
    }

    fn status(&self) -> u32 {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slots)| slots.len() as u32 >= self.depth)
            .fold(0, |status, (queue, _)| status | 1 << queue)
    }

    pub fn read(&mut self, offset: u32, memory: &mut CardMemory) -> u32 {
        self.tick(memory);
        match offset {
            nvme::STATUS => self.status(),
            nvme::TRACK => {
                let waiting = self.completions.len() as u32;
                if self.completions.pop_front().is_some() {
                    self.stats.outstanding -= 1;
                    self.stats.completions_signalled += 1;
                }
                waiting
            }
            other => self.reg(other),
        }
    }

    pub fn write(&mut self, offset: u32, value: u32) {
        if offset != nvme::COMMAND {
            self.regs[offset as usize / 4] = value;
            return;
        }
        let Some(command_word) = CommandWord::decode(value) else {
            warn!("Simulated controller got undecodable command {value:#x}");
            self.stats.invalid_commands += 1;
            return;
        };
        let queue = command_word.queue as usize;
        if self.slots[queue].len() as u32 >= self.depth {
            warn!("Simulated controller dropped a command for full queue {queue}");
            self.stats.overruns += 1;
            return;
        }
        let command = SubmittedCommand {
            command_word,
            data_pointer: ((self.reg(nvme::DPTR_HIGH) as u64) << 32)
                | self.reg(nvme::DPTR_LOW) as u64,
            lba: ((self.reg(nvme::LBA_HIGH) as u64) << 32) | self.reg(nvme::LBA_LOW) as u64,
            blocks: self.reg(nvme::LBA_NUM),
        };
        debug!("Simulated controller accepted {command:?}");
        self.stats.submissions.push(command);
        self.stats.outstanding += 1;
        self.stats.peak_outstanding = self.stats.peak_outstanding.max(self.stats.outstanding);
        self.slots[queue].push_back(Pending {
            command,
            remaining: self.latency.max(1),
        });
    }

    fn tick(&mut self, memory: &mut CardMemory) {
        for slots in self.slots.iter_mut() {
            for pending in slots.iter_mut() {
                pending.remaining = pending.remaining.saturating_sub(1);
            }
            while slots.front().is_some_and(|pending| pending.remaining == 0) {
                if let Some(pending) = slots.pop_front() {
                    complete(&pending.command, memory);
                    self.completions.push_back(pending.command);
                }
            }
        }
    }
}

fn complete(command: &SubmittedCommand, memory: &mut CardMemory) {
    if command.command_word.opcode != Opcode::Read {
        return;
    }
    let drive = command.command_word.queue.drive();
    let start = command.lba * NVME_LB_SIZE as u64;
    let words = command.blocks as u64 * NVME_LB_SIZE as u64 / 8;
    for word in 0..words {
        memory.write_u64(
            command.data_pointer + word * 8,
            drive_word(drive, start + word * 8),
        );
    }
}
