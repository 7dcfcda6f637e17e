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

//! Page-aligned host buffers the copy engine can reach.
//!
//! The card addresses host memory by process virtual address, so a buffer is handed to the
//! copy engine as [`HostBuffer::dma_address`]. Buffers are anonymous mappings: page aligned,
//! zero filled, and unmapped when dropped.

use crate::config::HOST_PAGE_SIZE;
use crate::error::SnapNvmeError;
use log::{trace, warn};
use rustix::mm::{MapFlags, ProtFlags, mmap_anonymous, munmap};
use std::ptr::NonNull;

/// An owned, page-aligned, zero-initialised host memory region.
#[derive(Debug)]
pub struct HostBuffer {
    ptr: NonNull<u64>,
    len: usize,
}

impl HostBuffer {
    /// Map `len` bytes of anonymous memory.
    ///
    /// # Arguments
    ///
    /// * `len` - Buffer size in bytes; nonzero and a multiple of 8
    ///
    /// # Returns: `Result<HostBuffer, SnapNvmeError>`
    /// * `Ok(HostBuffer)` - The zero-filled buffer
    /// * `Err(SnapNvmeError::Allocation)` - The size is unusable or the mapping failed
    pub fn alloc(len: usize) -> Result<Self, SnapNvmeError> {
        if len == 0 || len % 8 != 0 {
            return Err(SnapNvmeError::Allocation {
                len,
                e: std::io::Error::from(std::io::ErrorKind::InvalidInput),
            });
        }
        // SAFETY: a fresh anonymous private mapping aliases nothing; the kernel picks the
        // address. The result is page aligned and valid for `len` bytes until munmap in Drop.
        let addr = unsafe {
            mmap_anonymous(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )
        }
        .map_err(|e| SnapNvmeError::Allocation { len, e: e.into() })?;
        let ptr = NonNull::new(addr.cast::<u64>()).ok_or_else(|| SnapNvmeError::Allocation {
            len,
            e: std::io::Error::other("mmap returned a null mapping"),
        })?;
        debug_assert_eq!(ptr.as_ptr() as usize % HOST_PAGE_SIZE, 0);
        trace!("HostBuffer::alloc: {len} bytes at {:p}", ptr.as_ptr());
        Ok(HostBuffer { ptr, len })
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The address the copy engine uses to reach this buffer.
    pub fn dma_address(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    /// The buffer as 64-bit words.
    pub fn words(&self) -> &[u64] {
        // SAFETY: ptr is page aligned and valid for len bytes, len is a multiple of 8, and
        // the mapping is zero initialised so every word is a valid u64.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len / 8) }
    }

    /// The buffer as mutable 64-bit words.
    pub fn words_mut(&mut self) -> &mut [u64] {
        // SAFETY: as in `words`; &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len / 8) }
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        trace!("HostBuffer::drop: {:p}", self.ptr.as_ptr());
        // SAFETY: ptr and len describe the mapping created in `alloc`, and Drop runs once.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.len) } {
            warn!("Failed to unmap host buffer at {:p}: {e}", self.ptr.as_ptr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    fn test_alloc_is_page_aligned_and_zeroed() {
        let buffer = HostBuffer::alloc(3 * 512).unwrap();
        assert_that!(buffer.len(), eq(1536));
        assert_that!(buffer.dma_address() % HOST_PAGE_SIZE as u64, eq(0));
        assert_that!(buffer.words().len(), eq(192));
        assert!(buffer.words().iter().all(|w| *w == 0));
    }

    #[gtest]
    fn test_words_mut_writes_through() {
        let mut buffer = HostBuffer::alloc(512).unwrap();
        buffer.words_mut()[63] = 0x0123_4567_89ab_cdef;
        assert_that!(buffer.words()[63], eq(0x0123_4567_89ab_cdef));
    }

    #[gtest]
    #[rstest]
    #[case::empty(0)]
    #[case::not_word_sized(12)]
    fn test_alloc_rejects_unusable_sizes(#[case] len: usize) {
        assert_that!(
            HostBuffer::alloc(len),
            err(displays_as(contains_substring("SnapNvmeError::Allocation:")))
        );
    }
}
