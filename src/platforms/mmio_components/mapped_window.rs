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

//! Memory-mapped register space of a card device node.
//!
//! A [`MappedRegion`] is one `mmap` of a device node. Register windows are slices of a
//! region: [`MappedWindow`] adds a base offset and a length and implements
//! [`RegisterWindow`] with volatile 32-bit accesses.

use crate::error::SnapNvmeError;
use crate::register_io::RegisterWindow;
use log::{debug, warn};
use rustix::mm::{MapFlags, ProtFlags, mmap, munmap};
use std::fs::File;
use std::io;
use std::ptr::NonNull;
use std::rc::Rc;

/// One shared mapping of a device node.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    size: usize,
    path: String,
}

impl MappedRegion {
    /// Map the first `size` bytes of `file`.
    ///
    /// # Returns: `Result<MappedRegion, SnapNvmeError>`
    /// * `Ok(MappedRegion)` - The mapping
    /// * `Err(SnapNvmeError::DeviceUnavailable)` - The kernel refused the mapping
    pub fn map(file: &File, size: usize, path: &str) -> Result<Self, SnapNvmeError> {
        // SAFETY: maps register space of an open device node; nothing else in this process
        // aliases the new mapping and the pointer is valid for `size` bytes until Drop.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file,
                0,
            )
        }
        .map_err(|e| {
            SnapNvmeError::DeviceUnavailable(format!(
                "Failed to map {size:#x} bytes of {path}: {e}"
            ))
        })?;
        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| {
            SnapNvmeError::DeviceUnavailable(format!("Mapping {path} returned a null pointer"))
        })?;
        debug!("Mapped {path} at {:p}, size={size:#x}", ptr.as_ptr());
        Ok(MappedRegion {
            ptr,
            size,
            path: path.to_string(),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn check(&self, offset: usize) -> io::Result<()> {
        if offset % 4 != 0 || offset.checked_add(4).is_none_or(|end| end > self.size) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {offset:#x} outside {} mapping", self.path),
            ));
        }
        Ok(())
    }

    fn read32(&self, offset: usize) -> io::Result<u32> {
        self.check(offset)?;
        // SAFETY: read_volatile is required for MMIO since the hardware changes the value.
        // ptr comes from mmap and is valid for size bytes, offset + 4 <= size and offset is
        // 4-byte aligned on a page-aligned base.
        Ok(unsafe { std::ptr::read_volatile(self.ptr.as_ptr().add(offset).cast::<u32>()) })
    }

    fn write32(&self, offset: usize, value: u32) -> io::Result<()> {
        self.check(offset)?;
        // SAFETY: write_volatile is required for MMIO since the write has side effects.
        // Same bounds and alignment as in read32.
        unsafe {
            std::ptr::write_volatile(self.ptr.as_ptr().add(offset).cast::<u32>(), value);
        }
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size describe the mapping made in `map`, and Drop runs once.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) } {
            warn!("Failed to unmap {}: {e}", self.path);
        }
        debug!("Unmapped {}", self.path);
    }
}

/// A register window inside a [`MappedRegion`].
#[derive(Debug)]
pub struct MappedWindow {
    name: &'static str,
    region: Rc<MappedRegion>,
    base: usize,
    len: usize,
}

impl MappedWindow {
    /// A window of `len` bytes starting `base` bytes into `region`.
    ///
    /// # Returns: `Result<MappedWindow, SnapNvmeError>`
    /// * `Ok(MappedWindow)` - The window
    /// * `Err(SnapNvmeError::Internal)` - The window does not fit the region
    pub fn new(
        name: &'static str,
        region: Rc<MappedRegion>,
        base: usize,
        len: usize,
    ) -> Result<Self, SnapNvmeError> {
        if base.checked_add(len).is_none_or(|end| end > region.size()) {
            return Err(SnapNvmeError::Internal(format!(
                "{name} window {base:#x}+{len:#x} does not fit a {:#x} byte mapping",
                region.size()
            )));
        }
        Ok(MappedWindow {
            name,
            region,
            base,
            len,
        })
    }
}

impl RegisterWindow for MappedWindow {
    fn name(&self) -> &'static str {
        self.name
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read32(&self, offset: u32) -> io::Result<u32> {
        self.region.read32(self.base + offset as usize)
    }

    fn write32(&self, offset: u32, value: u32) -> io::Result<()> {
        self.region.write32(self.base + offset as usize, value)
    }
}
