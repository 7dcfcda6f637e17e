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

//! snapnvme - exercise the NVMe command queue of a SNAP FPGA storage accelerator.
//!
//! A session moves a pattern block from host memory into card RAM with the example
//! action's copy engine, pushes a burst of sequential read commands through the card's
//! bounded NVMe submission queue, moves the block back and verifies it word by word.
//!
//! # Modules
//!
//! - [`register_io`] - the [`RegisterWindow`](register_io::RegisterWindow) trait and
//!   error-wrapping register access
//! - [`copy`] - the copy orchestrator
//! - [`queue`] - the storage-queue submission and completion protocol
//! - [`verify`] - test pattern and comparison
//! - [`buffer`] - DMA-able host buffers
//! - [`session`] - one end-to-end run
//! - [`platforms`] - how cards are reached, real or simulated
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - overrides the log level the CLI derives from `-v`/`-q`

pub mod buffer;
pub mod config;
pub mod copy;
pub mod error;
pub mod platforms;
pub mod queue;
pub mod register_io;
pub mod regs;
pub mod session;
pub mod verify;
