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

pub const KILO_BYTE: u64 = 1024;
pub const MEGA_BYTE: u64 = 1024 * KILO_BYTE;
pub const GIGA_BYTE: u64 = 1024 * MEGA_BYTE;

/// NVMe logical block size in bytes. Offsets given on the command line must be a multiple of it.
pub const NVME_LB_SIZE: u32 = 512;

/// Capacity of the attached NVMe drive in bytes.
pub const NVME_DRIVE_SIZE: u64 = 4 * GIGA_BYTE;

/// Largest transfer the NVMe host controller accepts in one chunk.
pub const NVME_MAX_TRANSFER_SIZE: u64 = 32 * MEGA_BYTE;

/// Largest block count one session may move, derived from [`NVME_MAX_TRANSFER_SIZE`].
pub const NVME_MAX_BLOCKS: u32 = (NVME_MAX_TRANSFER_SIZE / NVME_LB_SIZE as u64) as u32;

/// Highest card index accepted by `--card`.
pub const MAX_CARD_INDEX: u32 = 3;

/// Default wait for a copy to finish, in seconds.
pub const ACTION_WAIT_TIME: Duration = Duration::from_secs(1);

/// The attach wait is this many times longer than the copy wait.
pub const ATTACH_TIMEOUT_FACTOR: u32 = 5;

/// Number of read commands issued by one burst unless told otherwise.
pub const DEFAULT_BURST_COMMANDS: u32 = 10;

/// Start of the card RAM region the host block is staged in.
pub const DDR_MEM_BASE_ADDR: u64 = 0x0000_0000;

/// Host buffers are aligned to this.
pub const HOST_PAGE_SIZE: usize = 4096;

/// Slave (action) context device node; `{card}` is replaced by the card index.
pub static SLAVE_DEVICE_TEMPLATE: &str = "/dev/cxl/afu{card}.0s";

/// Master context device node; `{card}` is replaced by the card index.
pub static MASTER_DEVICE_TEMPLATE: &str = "/dev/cxl/afu{card}.0m";

/// Bytes mapped from the slave context. The action registers live at its start.
pub const SLAVE_MMIO_SIZE: usize = 0x1_0000;

/// Bytes mapped from the master context; covers the capability and NVMe registers.
pub const MASTER_MMIO_SIZE: usize = 0x4_0000;

/// Fill a device node template with a card index.
pub fn device_path(template: &str, card: u32) -> String {
    template.replace("{card}", &card.to_string())
}
