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

//! Register maps of the two card windows.
//!
//! Offsets are relative to the start of their window. They are the contract with the card's
//! hardware and must not change.

/// Copy-engine (example action) registers, in the slave context.
pub mod action {
    /// Size of the action register window.
    pub const WINDOW_SIZE: usize = 0x100;

    /// Control register.
    pub const CONTROL: u32 = 0x00;
    /// Global interrupt enable.
    pub const IRQ_GLOBAL_ENABLE: u32 = 0x04;
    /// Done interrupt enable.
    pub const IRQ_ENABLE: u32 = 0x08;
    /// Action type, read only. Identifies the loaded action.
    pub const TYPE: u32 = 0x10;
    /// Action release, read only.
    pub const RELEASE: u32 = 0x14;
    /// Operation to perform, one of the `CONFIG_*` values.
    pub const CONFIG: u32 = 0x30;
    pub const SRC_LOW: u32 = 0x34;
    pub const SRC_HIGH: u32 = 0x38;
    pub const DEST_LOW: u32 = 0x3c;
    pub const DEST_HIGH: u32 = 0x40;
    /// Number of bytes to copy.
    pub const CNT: u32 = 0x44;

    /// Control register bits.
    pub mod control {
        /// Start the configured operation. Self clearing.
        pub const START: u32 = 1 << 0;
        /// Operation finished. Cleared when read.
        pub const DONE: u32 = 1 << 1;
        /// Action is idle.
        pub const IDLE: u32 = 1 << 2;
    }

    /// Memcopy host memory to card RAM.
    pub const CONFIG_COPY_HD: u32 = 3;
    /// Memcopy card RAM to host memory.
    pub const CONFIG_COPY_DH: u32 = 4;

    /// Type reported by the example action.
    pub const ACTION_TYPE_EXAMPLE: u32 = 0x1014_0000;
}

/// Master context registers outside the NVMe window.
pub mod master {
    /// Capability register.
    pub const CAPABILITY: u32 = 0x30;
    /// Set when the card was built with the NVMe host controller.
    pub const CAPABILITY_NVME_ENABLED: u32 = 1 << 8;
    /// Offset of the NVMe (storage-queue) window inside the master context.
    pub const NVME_WINDOW_OFFSET: usize = 0x3_0000;
}

/// Storage-queue (NVMe host controller) registers.
///
/// The write side and the read side share offsets but are different registers.
pub mod nvme {
    /// Size of the storage-queue register window.
    pub const WINDOW_SIZE: usize = 0x100;

    // Write registers
    pub const DPTR_LOW: u32 = 0x00;
    pub const DPTR_HIGH: u32 = 0x04;
    pub const LBA_LOW: u32 = 0x08;
    pub const LBA_HIGH: u32 = 0x0c;
    /// Number of logical blocks moved by each command.
    pub const LBA_NUM: u32 = 0x10;
    /// Writing this register submits the command.
    pub const COMMAND: u32 = 0x14;

    // Read registers
    pub const STATUS: u32 = 0x00;
    /// Completion track register. Nonzero when some command completed since the last read.
    pub const TRACK: u32 = 0x04;

    /// Upper data pointer bits used by the read burst. Selects the controller's card RAM
    /// data window, which is separate from the region the copy engine stages into.
    pub const DPTR_HIGH_CARD_RAM: u32 = 2;

    /// Action id attached to every burst command.
    pub const BURST_ACTION_ID: u8 = 0xef;

    /// `STATUS` submission-queue-full bits.
    pub mod status {
        pub const SUB_Q_FULL_SSD0_A: u32 = 0x01;
        pub const SUB_Q_FULL_SSD0_IO: u32 = 0x02;
        pub const SUB_Q_FULL_SSD1_A: u32 = 0x04;
        pub const SUB_Q_FULL_SSD1_IO: u32 = 0x08;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nvme_window_fits_master_mapping() {
        assert!(
            master::NVME_WINDOW_OFFSET + nvme::WINDOW_SIZE <= crate::config::MASTER_MMIO_SIZE
        );
        assert!(action::WINDOW_SIZE <= crate::config::SLAVE_MMIO_SIZE);
    }

    #[test]
    fn test_submission_registers_are_word_aligned() {
        for offset in [
            nvme::DPTR_LOW,
            nvme::DPTR_HIGH,
            nvme::LBA_LOW,
            nvme::LBA_HIGH,
            nvme::LBA_NUM,
            nvme::COMMAND,
        ] {
            assert_eq!(offset % 4, 0);
            assert!((offset as usize) < nvme::WINDOW_SIZE);
        }
    }
}
