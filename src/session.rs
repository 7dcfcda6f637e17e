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

//! One end-to-end exercise of a card.
//!
//! A session stages a pattern block in card RAM, runs a read burst against the selected
//! drive's I/O queue, copies the staged block back and compares it with what was sent.
//!
//! # Sequence
//!
//! 1. Validate the parameters. Nothing touches the hardware before this passes.
//! 2. Open the card and warn when its NVMe controller is not enabled.
//! 3. Allocate the source and destination buffers and fill the source with the pattern
//!    seeded by the drive offset.
//! 4. Attach the example action, with an attach timeout of five times the copy timeout.
//! 5. Copy host to card RAM, run the read burst, copy card RAM to host.
//! 6. Compare.
//!
//! The action is detached, the buffers withdrawn from the card and unmapped, and the card
//! closed on every path out of [`run_session`], in that order.

use crate::buffer::HostBuffer;
use crate::config::{
    ACTION_WAIT_TIME, ATTACH_TIMEOUT_FACTOR, DDR_MEM_BASE_ADDR, DEFAULT_BURST_COMMANDS,
    MAX_CARD_INDEX, NVME_DRIVE_SIZE, NVME_LB_SIZE, NVME_MAX_BLOCKS,
};
use crate::copy::{CopyDirection, CopyOrchestrator, TransferDescriptor};
use crate::error::SnapNvmeError;
use crate::platforms::platform::{Card, Platform};
use crate::queue::{BurstReport, Drive, QueueSelector, QueueSubmitter, ReadBurst};
use crate::regs::action::ACTION_TYPE_EXAMPLE;
use crate::verify::{Comparison, compare, fill_pattern};
use log::{debug, info, warn};
use std::time::Duration;

/// Everything a session needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// Card index, `0..=3`.
    pub card: u32,
    /// Drive behind the card, `0` or `1`.
    pub drive: u32,
    /// Blocks per transfer and per queue command.
    pub blocks: u32,
    /// Byte offset on the drive; seeds the test pattern.
    pub offset: u64,
    /// Copy timeout. Attach gets [`ATTACH_TIMEOUT_FACTOR`] times as long.
    pub timeout: Duration,
    /// Sleep on the action interrupt instead of spinning.
    pub irq: bool,
    /// Read commands in the burst.
    pub burst_commands: u32,
    /// Give up on a queue that stays full this long.
    pub backpressure_timeout: Option<Duration>,
}

impl Default for SessionParams {
    fn default() -> Self {
        SessionParams {
            card: 0,
            drive: 0,
            blocks: 1,
            offset: 0,
            timeout: ACTION_WAIT_TIME,
            irq: false,
            burst_commands: DEFAULT_BURST_COMMANDS,
            backpressure_timeout: None,
        }
    }
}

impl SessionParams {
    /// Bytes moved by each copy.
    pub fn transfer_size(&self) -> u64 {
        self.blocks as u64 * NVME_LB_SIZE as u64
    }

    /// Check the parameters against the card's limits.
    ///
    /// # Returns: `Result<(), SnapNvmeError>`
    /// * `Ok(())` - The session can run
    /// * `Err(SnapNvmeError::Configuration)` - Which parameter is off and why
    pub fn validate(&self) -> Result<(), SnapNvmeError> {
        Drive::try_from(self.drive)?;
        if self.card > MAX_CARD_INDEX {
            return Err(SnapNvmeError::Configuration(format!(
                "Card must be 0 to {MAX_CARD_INDEX}, got {}",
                self.card
            )));
        }
        if self.blocks == 0 {
            return Err(SnapNvmeError::Configuration(String::from(
                "Blocks must be at least 1",
            )));
        }
        if self.blocks > NVME_MAX_BLOCKS {
            return Err(SnapNvmeError::Configuration(format!(
                "Blocks must be at most {NVME_MAX_BLOCKS}, got {}",
                self.blocks
            )));
        }
        if self.offset % NVME_LB_SIZE as u64 != 0 {
            return Err(SnapNvmeError::Configuration(format!(
                "Offset {:#x} must be on a {NVME_LB_SIZE} byte boundary",
                self.offset
            )));
        }
        if self.offset > NVME_DRIVE_SIZE {
            return Err(SnapNvmeError::Configuration(format!(
                "Offset {:#x} must be less than {NVME_DRIVE_SIZE:#x}",
                self.offset
            )));
        }
        if self.offset + self.transfer_size() > NVME_DRIVE_SIZE {
            return Err(SnapNvmeError::Configuration(format!(
                "Offset {:#x} + {} blocks runs past the {NVME_DRIVE_SIZE:#x} byte drive",
                self.offset, self.blocks
            )));
        }
        if self.burst_commands == 0 {
            return Err(SnapNvmeError::Configuration(String::from(
                "A burst needs at least one command",
            )));
        }
        if self.transfer_size() * self.burst_commands as u64 > 1 << 32 {
            return Err(SnapNvmeError::Configuration(format!(
                "{} commands of {} blocks do not fit the 32-bit card data pointer",
                self.burst_commands, self.blocks
            )));
        }
        Ok(())
    }
}

/// What a completed session measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Host to card RAM copy.
    pub copy_in: Duration,
    pub burst: BurstReport,
    /// Card RAM to host copy.
    pub copy_out: Duration,
    pub comparison: Comparison,
}

impl SessionOutcome {
    /// Process exit code: 0 on a clean round trip, otherwise the capped mismatch count.
    pub fn exit_code(&self) -> u32 {
        self.comparison.result_code()
    }
}

/// Keeps the action attached while alive.
struct AttachedAction<'a> {
    card: &'a dyn Card,
}

impl Drop for AttachedAction<'_> {
    fn drop(&mut self) {
        debug!("Detaching action");
        if let Err(e) = self.card.detach_action() {
            warn!("Failed to detach action: {e}");
        }
    }
}

/// Keeps the host buffers reachable by the card's copy engine while alive.
struct HostDmaGrant<'a> {
    card: &'a dyn Card,
    buffers: [&'a HostBuffer; 2],
}

impl<'a> HostDmaGrant<'a> {
    fn new(card: &'a dyn Card, buffers: [&'a HostBuffer; 2]) -> Self {
        for buffer in buffers {
            // SAFETY: the grant borrows every buffer, so none is dropped before Drop
            // unregisters it, and run_session holds no reference into buffer memory while a
            // copy runs.
            unsafe { card.register_host_buffer(buffer) };
        }
        HostDmaGrant { card, buffers }
    }
}

impl Drop for HostDmaGrant<'_> {
    fn drop(&mut self) {
        for buffer in self.buffers {
            self.card.unregister_host_buffer(buffer);
        }
    }
}

/// Run one session on a card reached through `platform`.
///
/// # Arguments
///
/// * `platform` - How to reach the card
/// * `params` - What to run
///
/// # Returns: `Result<SessionOutcome, SnapNvmeError>`
/// * `Ok(SessionOutcome)` - The session ran; the comparison may still have found mismatches
/// * `Err(SnapNvmeError::Configuration)` - `params` failed validation
/// * `Err(SnapNvmeError::DeviceUnavailable)` - The card or its action could not be reached
/// * `Err(SnapNvmeError::Allocation)` - Host buffers could not be allocated
/// * `Err(SnapNvmeError::Timeout)` - A copy did not finish in time
/// * `Err(SnapNvmeError::QueueStalled)` - The queue stayed full past the backpressure timeout
/// * `Err(SnapNvmeError::RegisterRead | RegisterWrite | OutOfWindow)` - Register access failed
pub fn run_session(
    platform: &dyn Platform,
    params: &SessionParams,
) -> Result<SessionOutcome, SnapNvmeError> {
    params.validate()?;
    let drive = Drive::try_from(params.drive)?;
    let size = params.transfer_size();
    info!(
        "NVMe test on {} card {} drive {drive}: {} blocks at offset {:#x}, timeout {:?}",
        platform.name(),
        params.card,
        params.blocks,
        params.offset,
        params.timeout
    );

    let card = platform.open_card(params.card)?;
    if !card.nvme_enabled()? {
        warn!("NVMe is not enabled on card {}", params.card);
    }

    let mut source = HostBuffer::alloc(size as usize)?;
    let destination = HostBuffer::alloc(size as usize)?;
    fill_pattern(source.words_mut(), params.offset);
    let _dma = HostDmaGrant::new(card.as_ref(), [&source, &destination]);

    card.attach_action(
        ACTION_TYPE_EXAMPLE,
        params.irq,
        params.timeout * ATTACH_TIMEOUT_FACTOR,
    )?;
    let _attached = AttachedAction {
        card: card.as_ref(),
    };

    let mut orchestrator = CopyOrchestrator::new(card.action_window());
    if params.irq {
        match card.interrupts() {
            Some(interrupts) => orchestrator = orchestrator.with_interrupts(interrupts),
            None => warn!("{} cards have no interrupt source, polling", platform.name()),
        }
    }

    let copy_in = orchestrator.run_copy(
        &TransferDescriptor::new(
            CopyDirection::HostToCard,
            DDR_MEM_BASE_ADDR,
            source.dma_address(),
            size as u32,
        ),
        params.timeout,
    )?;

    let mut submitter = QueueSubmitter::new(card.nvme_window());
    if let Some(timeout) = params.backpressure_timeout {
        submitter = submitter.with_backpressure_timeout(timeout);
    }
    let burst = submitter.run_read_burst(&ReadBurst {
        queue: QueueSelector::io(drive),
        block_size: NVME_LB_SIZE,
        blocks_per_command: params.blocks,
        command_count: params.burst_commands,
    })?;

    let copy_out = orchestrator.run_copy(
        &TransferDescriptor::new(
            CopyDirection::CardToHost,
            destination.dma_address(),
            DDR_MEM_BASE_ADDR,
            size as u32,
        ),
        params.timeout,
    )?;

    let comparison = compare(destination.words(), source.words());
    if comparison.is_match() {
        info!("Round trip of {size} bytes verified");
    } else {
        warn!(
            "Round trip of {size} bytes found {} mismatching words",
            comparison.total_mismatches
        );
    }

    Ok(SessionOutcome {
        copy_in,
        burst,
        copy_out,
        comparison,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::drive(SessionParams { drive: 2, ..SessionParams::default() }, "Drive must be 0 or 1")]
    #[case::card(SessionParams { card: 4, ..SessionParams::default() }, "Card must be 0 to 3")]
    #[case::no_blocks(SessionParams { blocks: 0, ..SessionParams::default() }, "at least 1")]
    #[case::too_many_blocks(SessionParams { blocks: NVME_MAX_BLOCKS + 1, ..SessionParams::default() }, "at most 65536")]
    #[case::misaligned(SessionParams { offset: 513, ..SessionParams::default() }, "512 byte boundary")]
    #[case::past_drive(SessionParams { offset: NVME_DRIVE_SIZE + 512, ..SessionParams::default() }, "must be less than")]
    #[case::runs_off_end(SessionParams { offset: NVME_DRIVE_SIZE, ..SessionParams::default() }, "runs past")]
    #[case::no_commands(SessionParams { burst_commands: 0, ..SessionParams::default() }, "at least one command")]
    #[case::pointer_overflow(SessionParams { blocks: NVME_MAX_BLOCKS, burst_commands: 129, ..SessionParams::default() }, "32-bit")]
    fn test_validate_rejects(#[case] params: SessionParams, #[case] reason: &str) {
        assert_that!(
            params.validate(),
            err(displays_as(all![
                contains_substring("SnapNvmeError::Configuration:"),
                contains_substring(reason)
            ]))
        );
    }

    #[gtest]
    #[rstest]
    #[case::defaults(SessionParams::default())]
    #[case::last_block(SessionParams { offset: NVME_DRIVE_SIZE - 512, ..SessionParams::default() })]
    #[case::largest(SessionParams { drive: 1, card: 3, blocks: NVME_MAX_BLOCKS, burst_commands: 128, ..SessionParams::default() })]
    fn test_validate_accepts(#[case] params: SessionParams) {
        assert_that!(params.validate(), ok(anything()));
    }

    #[gtest]
    fn test_transfer_size() {
        let params = SessionParams {
            blocks: 8,
            ..SessionParams::default()
        };
        assert_that!(params.transfer_size(), eq(4096));
    }
}
