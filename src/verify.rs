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

//! Deterministic test pattern and buffer comparison.

use log::{debug, error};

/// Mismatches reported individually by [`compare`].
pub const REPORTED_MISMATCHES: usize = 10;

/// Highest value [`Comparison::result_code`] returns.
pub const MISMATCH_CODE_CAP: u32 = REPORTED_MISMATCHES as u32 + 1;

/// The pattern word for address-like seed `seed`: low half is the seed, high half its
/// complement.
pub fn pattern_word(seed: u64) -> u64 {
    (seed & 0xffff_ffff) | (!seed << 32)
}

/// Fill `words` with the pattern, starting at `seed` and stepping by 8 per word.
pub fn fill_pattern(words: &mut [u64], seed: u64) {
    let mut seed = seed;
    for word in words.iter_mut() {
        *word = pattern_word(seed);
        seed = seed.wrapping_add(8);
    }
}

/// One differing word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Byte offset of the word.
    pub offset: usize,
    pub expected: u64,
    pub read: u64,
}

/// Result of comparing a read buffer against the expected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    /// The first [`REPORTED_MISMATCHES`] mismatches.
    pub reported: Vec<Mismatch>,
    /// All mismatching words.
    pub total_mismatches: usize,
    pub words_scanned: usize,
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        self.total_mismatches == 0
    }

    /// 0 when equal, otherwise the mismatch count capped at [`MISMATCH_CODE_CAP`].
    pub fn result_code(&self) -> u32 {
        self.total_mismatches.min(MISMATCH_CODE_CAP as usize) as u32
    }
}

/// Compare `read` against `expected` word by word over the whole length.
///
/// The first [`REPORTED_MISMATCHES`] mismatches are logged and kept; the scan always covers
/// every word. Buffers of different length compare only their common prefix, and every word
/// beyond it counts as a mismatch.
pub fn compare(read: &[u64], expected: &[u64]) -> Comparison {
    debug!(
        "Compare buffer source: {:p} <-> destination: {:p}",
        expected.as_ptr(),
        read.as_ptr()
    );
    let mut reported = Vec::new();
    let mut total_mismatches = read.len().abs_diff(expected.len());
    for (index, (&data, &expect)) in read.iter().zip(expected).enumerate() {
        if data == expect {
            continue;
        }
        total_mismatches += 1;
        if reported.len() < REPORTED_MISMATCHES {
            let mismatch = Mismatch {
                offset: index * 8,
                expected: expect,
                read: data,
            };
            error!(
                "@ {:#06x} Expect: {expect:#018x} Read: {data:#018x}",
                mismatch.offset
            );
            reported.push(mismatch);
        }
    }
    let comparison = Comparison {
        reported,
        total_mismatches,
        words_scanned: read.len().max(expected.len()),
    };
    debug!("RC: {}", comparison.result_code());
    comparison
}
