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

//! Storage-queue submission protocol.
//!
//! The NVMe host controller on the card exposes a shallow submission queue per drive and
//! queue type. Commands are submitted by writing the data pointer, the LBA and finally the
//! command word to the storage-queue window. The controller does not hand back a command tag:
//! the only completion information is the `TRACK` register, which reads nonzero when *some*
//! command finished since the previous read.
//!
//! The submitter therefore keeps an in-flight count that goes up by one per submission and
//! down by one per nonzero `TRACK` read, regardless of the value read. The queue-full bits in
//! `STATUS` are authoritative for backpressure; the count is only used to know when the
//! final drain is complete.
//!
//! # Burst sequence
//!
//! 1. Program `DPTR_HIGH`, `LBA_HIGH` and `LBA_NUM` once.
//! 2. For each command: wait for the queue-full bit to clear, consume one completion if
//!    any, submit, advance LBA and data pointer.
//! 3. Consume completions until nothing is in flight.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use snapnvme::queue::{Drive, QueueSelector, QueueSubmitter, ReadBurst};
//! # use snapnvme::register_io::RegisterWindow;
//! # fn example(nvme: &dyn RegisterWindow) -> Result<(), snapnvme::error::SnapNvmeError> {
//! let burst = ReadBurst {
//!     queue: QueueSelector::io(Drive::Drive0),
//!     block_size: 512,
//!     blocks_per_command: 8,
//!     command_count: 10,
//! };
//! let report = QueueSubmitter::new(nvme).run_read_burst(&burst)?;
//! assert_eq!(report.commands_submitted, 10);
//! # Ok(())
//! # }
//! ```

use crate::error::SnapNvmeError;
use crate::register_io::{RegisterWindow, reg_read, reg_write};
use crate::regs::nvme;
use log::{debug, info, trace, warn};
use std::fmt;
use std::time::{Duration, Instant};

/// Command opcode, bits \[3:0\] of the command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Read = 0,
    Write = 1,
    Admin = 3,
}

impl TryFrom<u32> for Opcode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Read),
            1 => Ok(Opcode::Write),
            3 => Ok(Opcode::Admin),
            other => Err(other),
        }
    }
}

/// One of the two NVMe drives behind the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    Drive0,
    Drive1,
}

impl TryFrom<u32> for Drive {
    type Error = SnapNvmeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Drive::Drive0),
            1 => Ok(Drive::Drive1),
            other => Err(SnapNvmeError::Configuration(format!(
                "Drive must be 0 or 1, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Drive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drive::Drive0 => write!(f, "0"),
            Drive::Drive1 => write!(f, "1"),
        }
    }
}

/// Submission queue selector, bits \[5:4\] of the command word.
///
/// The discriminant doubles as the bit position of the queue's full flag in `STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QueueSelector {
    Drive0Admin = 0,
    Drive0Io = 1,
    Drive1Admin = 2,
    Drive1Io = 3,
}

impl QueueSelector {
    /// The I/O queue of `drive`.
    pub fn io(drive: Drive) -> Self {
        match drive {
            Drive::Drive0 => QueueSelector::Drive0Io,
            Drive::Drive1 => QueueSelector::Drive1Io,
        }
    }

    /// The admin queue of `drive`.
    pub fn admin(drive: Drive) -> Self {
        match drive {
            Drive::Drive0 => QueueSelector::Drive0Admin,
            Drive::Drive1 => QueueSelector::Drive1Admin,
        }
    }

    /// The drive this queue feeds.
    pub fn drive(self) -> Drive {
        match self {
            QueueSelector::Drive0Admin | QueueSelector::Drive0Io => Drive::Drive0,
            QueueSelector::Drive1Admin | QueueSelector::Drive1Io => Drive::Drive1,
        }
    }

    /// The queue's full flag in the `STATUS` register.
    pub fn full_bit(self) -> u32 {
        1 << (self as u32)
    }

    fn from_field(field: u32) -> Self {
        match field & 0x3 {
            0 => QueueSelector::Drive0Admin,
            1 => QueueSelector::Drive0Io,
            2 => QueueSelector::Drive1Admin,
            _ => QueueSelector::Drive1Io,
        }
    }
}

/// The value written to the `COMMAND` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandWord {
    pub opcode: Opcode,
    pub queue: QueueSelector,
    pub action_id: u8,
}

impl CommandWord {
    /// Pack into the register layout: opcode \[3:0\], queue \[5:4\], action id \[15:8\].
    pub fn encode(&self) -> u32 {
        (self.opcode as u32) | ((self.queue as u32) << 4) | ((self.action_id as u32) << 8)
    }

    /// Unpack a register value. Returns `None` for an unknown opcode.
    pub fn decode(raw: u32) -> Option<Self> {
        let opcode = Opcode::try_from(raw & 0xf).ok()?;
        Some(CommandWord {
            opcode,
            queue: QueueSelector::from_field(raw >> 4),
            action_id: ((raw >> 8) & 0xff) as u8,
        })
    }
}

/// One submission. Not retained once written: the hardware returns no handle for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCommand {
    pub data_pointer_low: u32,
    pub lba_low: u32,
    pub command_word: CommandWord,
}

impl QueueCommand {
    /// Write the command to the storage-queue window. The `COMMAND` write goes last and
    /// triggers the submission.
    pub fn submit(&self, window: &dyn RegisterWindow) -> Result<(), SnapNvmeError> {
        reg_write(window, nvme::DPTR_LOW, self.data_pointer_low)?;
        reg_write(window, nvme::LBA_LOW, self.lba_low)?;
        reg_write(window, nvme::COMMAND, self.command_word.encode())
    }
}

/// Parameters of one sequential read burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBurst {
    pub queue: QueueSelector,
    /// Logical block size in bytes.
    pub block_size: u32,
    /// Blocks moved by every command, programmed once into `LBA_NUM`.
    pub blocks_per_command: u32,
    /// Number of commands to submit.
    pub command_count: u32,
}

impl ReadBurst {
    fn validate(&self) -> Result<(), SnapNvmeError> {
        if self.block_size == 0 || self.blocks_per_command == 0 {
            return Err(SnapNvmeError::Configuration(format!(
                "A read burst needs a nonzero block size and block count, got {} x {}",
                self.block_size, self.blocks_per_command
            )));
        }
        let span = self.block_size as u64
            * self.blocks_per_command as u64
            * self.command_count as u64;
        if span > 1 << 32 {
            return Err(SnapNvmeError::Configuration(format!(
                "A read burst of {} commands x {} blocks x {} bytes does not fit the 32-bit data pointer",
                self.command_count, self.blocks_per_command, self.block_size
            )));
        }
        Ok(())
    }
}

/// Mutable state of a running burst.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueSession {
    in_flight: u32,
    next_lba: u64,
    next_data_pointer: u64,
    peak_in_flight: u32,
    submitted: u32,
    completions: u32,
}

impl QueueSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands submitted whose completion has not been observed yet.
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn next_lba(&self) -> u64 {
        self.next_lba
    }

    pub fn next_data_pointer(&self) -> u64 {
        self.next_data_pointer
    }

    fn record_submission(&mut self, burst: &ReadBurst) {
        self.in_flight += 1;
        self.submitted += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
        self.next_lba += burst.blocks_per_command as u64;
        self.next_data_pointer += burst.block_size as u64 * burst.blocks_per_command as u64;
    }

    fn next_command(&self, burst: &ReadBurst) -> QueueCommand {
        QueueCommand {
            data_pointer_low: self.next_data_pointer as u32,
            lba_low: self.next_lba as u32,
            command_word: CommandWord {
                opcode: Opcode::Read,
                queue: burst.queue,
                action_id: nvme::BURST_ACTION_ID,
            },
        }
    }
}

/// What happened during a burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstReport {
    pub commands_submitted: u32,
    pub completions_observed: u32,
    /// Highest in-flight count reached.
    pub peak_in_flight: u32,
    /// `STATUS` reads that found the queue full.
    pub backpressure_polls: u64,
    /// `TRACK` reads during the final drain.
    pub drain_polls: u64,
    pub elapsed: Duration,
}

/// Read `TRACK` once and count at most one completion.
///
/// A nonzero value means at least one command completed, but the magnitude carries no
/// meaning on this controller. Exactly one in-flight command is retired per nonzero read.
///
/// # Returns: `Result<bool, SnapNvmeError>`
/// * `Ok(true)` - A completion was consumed
/// * `Ok(false)` - `TRACK` read zero, or nothing was in flight
/// * `Err(SnapNvmeError::RegisterRead)` - The read failed
pub fn consume_one_completion_if_any(
    window: &dyn RegisterWindow,
    session: &mut QueueSession,
) -> Result<bool, SnapNvmeError> {
    let track = reg_read(window, nvme::TRACK)?;
    if track == 0 {
        return Ok(false);
    }
    if session.in_flight == 0 {
        warn!("TRACK_REG read {track:#x} with no command in flight, ignoring");
        return Ok(false);
    }
    debug!("Read done TRACK_REG: {track:#x}");
    session.in_flight -= 1;
    session.completions += 1;
    Ok(true)
}

/// Drives the storage-queue window through read bursts.
pub struct QueueSubmitter<'a> {
    window: &'a dyn RegisterWindow,
    backpressure_timeout: Option<Duration>,
}

impl<'a> QueueSubmitter<'a> {
    /// A submitter that waits for a free queue slot for as long as it takes.
    pub fn new(window: &'a dyn RegisterWindow) -> Self {
        QueueSubmitter {
            window,
            backpressure_timeout: None,
        }
    }

    /// Give up submitting when the queue stays full for longer than `timeout`.
    ///
    /// Commands already in flight are still drained before the error is returned.
    pub fn with_backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.backpressure_timeout = Some(timeout);
        self
    }

    /// Submit `burst.command_count` sequential reads and wait until all of them completed.
    ///
    /// # Returns: `Result<BurstReport, SnapNvmeError>`
    /// * `Ok(BurstReport)` - Every command was submitted and its completion observed
    /// * `Err(SnapNvmeError::Configuration)` - The burst parameters are unusable
    /// * `Err(SnapNvmeError::QueueStalled)` - The backpressure timeout expired
    /// * `Err(SnapNvmeError::RegisterRead | RegisterWrite)` - Register access failed
    pub fn run_read_burst(&self, burst: &ReadBurst) -> Result<BurstReport, SnapNvmeError> {
        burst.validate()?;
        let start = Instant::now();
        info!(
            "Submitting {} reads of {} blocks to queue {:?}",
            burst.command_count, burst.blocks_per_command, burst.queue
        );

        reg_write(self.window, nvme::DPTR_HIGH, nvme::DPTR_HIGH_CARD_RAM)?;
        reg_write(self.window, nvme::LBA_HIGH, 0)?;
        reg_write(self.window, nvme::LBA_NUM, burst.blocks_per_command)?;

        let mut session = QueueSession::new();
        let mut backpressure_polls = 0;
        let mut stalled = None;
        for _ in 0..burst.command_count {
            match self.wait_for_slot(burst.queue, &mut backpressure_polls)? {
                SlotWait::Free => {}
                SlotWait::TimedOut(timeout) => {
                    stalled = Some(timeout);
                    break;
                }
            }
            consume_one_completion_if_any(self.window, &mut session)?;
            session.next_command(burst).submit(self.window)?;
            session.record_submission(burst);
        }

        let drain_polls = self.drain(&mut session)?;

        if let Some(timeout) = stalled {
            return Err(SnapNvmeError::QueueStalled {
                full_bit: burst.queue.full_bit(),
                submitted: session.submitted,
                timeout,
            });
        }

        let report = BurstReport {
            commands_submitted: session.submitted,
            completions_observed: session.completions,
            peak_in_flight: session.peak_in_flight,
            backpressure_polls,
            drain_polls,
            elapsed: start.elapsed(),
        };
        info!(
            "Burst done: {} commands, peak {} in flight, {} backpressure polls",
            report.commands_submitted, report.peak_in_flight, report.backpressure_polls
        );
        Ok(report)
    }

    /// Poll `STATUS` until the queue's full bit is clear.
    fn wait_for_slot(
        &self,
        queue: QueueSelector,
        polls: &mut u64,
    ) -> Result<SlotWait, SnapNvmeError> {
        let start = Instant::now();
        loop {
            let status = reg_read(self.window, nvme::STATUS)?;
            if status & queue.full_bit() == 0 {
                return Ok(SlotWait::Free);
            }
            *polls += 1;
            trace!("Wait STATUS_REG: {status:#x}");
            if let Some(timeout) = self.backpressure_timeout
                && start.elapsed() >= timeout
            {
                warn!("Queue {queue:?} stayed full for {timeout:?}");
                return Ok(SlotWait::TimedOut(timeout));
            }
            std::hint::spin_loop();
        }
    }

    /// Consume completions until nothing is in flight. Never gives up: leaving commands
    /// behind would confuse the next user of the queue.
    fn drain(&self, session: &mut QueueSession) -> Result<u64, SnapNvmeError> {
        let mut polls = 0;
        while session.in_flight > 0 {
            trace!("Wait for {} to finish", session.in_flight);
            polls += 1;
            if !consume_one_completion_if_any(self.window, session)? {
                std::hint::spin_loop();
            }
        }
        Ok(polls)
    }
}

enum SlotWait {
    Free,
    TimedOut(Duration),
}
