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

//! Sparse model of the card's RAM.
//!
//! The card address space is 64 bits wide with DDR at the bottom and the NVMe data window
//! at `DPTR_HIGH << 32`. Only pages that have been written are backed; everything else
//! reads as zero.

use std::collections::HashMap;

const PAGE_SIZE: u64 = 4096;

#[derive(Debug, Default)]
pub struct CardMemory {
    pages: HashMap<u64, Box<[u8; PAGE_SIZE as usize]>>,
}

impl CardMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `data` to card address `addr`.
    pub fn write(&mut self, addr: u64, data: &[u8]) {
        let mut addr = addr;
        let mut data = data;
        while !data.is_empty() {
            let offset = (addr % PAGE_SIZE) as usize;
            let n = data.len().min(PAGE_SIZE as usize - offset);
            let page = self
                .pages
                .entry(addr / PAGE_SIZE)
                .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));
            page[offset..offset + n].copy_from_slice(&data[..n]);
            data = &data[n..];
            addr = addr.wrapping_add(n as u64);
        }
    }

    /// Fill `out` from card address `addr`.
    pub fn read(&self, addr: u64, out: &mut [u8]) {
        let mut addr = addr;
        let mut done = 0;
        while done < out.len() {
            let offset = (addr % PAGE_SIZE) as usize;
            let n = (out.len() - done).min(PAGE_SIZE as usize - offset);
            match self.pages.get(&(addr / PAGE_SIZE)) {
                Some(page) => out[done..done + n].copy_from_slice(&page[offset..offset + n]),
                None => out[done..done + n].fill(0),
            }
            done += n;
            addr = addr.wrapping_add(n as u64);
        }
    }

    pub fn read_u64(&self, addr: u64) -> u64 {
        let mut bytes = [0u8; 8];
        self.read(addr, &mut bytes);
        u64::from_ne_bytes(bytes)
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) {
        self.write(addr, &value.to_ne_bytes());
    }

    /// Number of backed pages.
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[gtest]
    fn test_unwritten_memory_reads_zero() {
        let memory = CardMemory::new();
        assert_that!(memory.read_u64(0x2_0000_1000), eq(0));
        assert_that!(memory.resident_pages(), eq(0));
    }

    #[gtest]
    fn test_write_across_page_boundary() {
        let mut memory = CardMemory::new();
        let data: Vec<u8> = (0..=255).cycle().take(6000).collect();
        memory.write(PAGE_SIZE - 100, &data);

        let mut back = vec![0u8; 6000];
        memory.read(PAGE_SIZE - 100, &mut back);
        assert_that!(back, eq(&data));
        assert_that!(memory.resident_pages(), eq(3));
    }

    #[gtest]
    fn test_words() {
        let mut memory = CardMemory::new();
        memory.write_u64(0x1000, 0xffff_efff_0000_1000);
        assert_that!(memory.read_u64(0x1000), eq(0xffff_efff_0000_1000));
        assert_that!(memory.read_u64(0x1008), eq(0));
    }
}
