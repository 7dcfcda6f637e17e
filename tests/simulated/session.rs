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

use super::sim;
use googletest::prelude::*;
use rstest::*;
use snapnvme::copy::{CopyDirection, TransferDescriptor};
use snapnvme::platforms::simulated::SimConfig;
use snapnvme::regs::nvme;
use snapnvme::session::{SessionParams, run_session};
use snapnvme::verify::{MISMATCH_CODE_CAP, pattern_word};
use std::time::Duration;

#[gtest]
fn test_single_block_at_0x1000_round_trips() {
    let (platform, probe) = sim(SimConfig::default());
    let params = SessionParams {
        offset: 0x1000,
        blocks: 1,
        ..SessionParams::default()
    };

    let outcome = run_session(&platform, &params).unwrap();

    assert_that!(outcome.exit_code(), eq(0));
    assert_that!(outcome.comparison.words_scanned, eq(64));
    assert_that!(outcome.burst.commands_submitted, eq(10));
    assert_that!(outcome.burst.completions_observed, eq(10));
    assert_that!(probe.card_word(0), eq(0xffff_efff_0000_1000));
    assert_that!(probe.card_word(8), eq(pattern_word(0x1008)));

    let copies = probe.copies();
    assert_that!(copies.len(), eq(2));
    assert_that!(
        copies[0],
        eq(TransferDescriptor::new(
            CopyDirection::HostToCard,
            0,
            copies[0].src(),
            512
        ))
    );
    assert_that!(copies[1].direction(), eq(CopyDirection::CardToHost));
    assert_that!(copies[1].src(), eq(0));
    assert_that!(copies[1].length(), eq(512));

    assert!(!probe.attached());
    assert_that!(probe.detach_count(), eq(1));
    assert_that!(probe.host_regions(), eq(0));
}

#[gtest]
#[rstest]
#[case::one_block_drive0(0, 1, 0, false)]
#[case::eight_blocks_drive1(1, 8, 0x20_0000, false)]
#[case::large_block_count(0, 256, 0xfff0_0000, false)]
#[case::interrupt_mode(1, 4, 0x1000, true)]
fn test_fault_free_round_trip(
    #[case] drive: u32,
    #[case] blocks: u32,
    #[case] offset: u64,
    #[case] irq: bool,
) {
    let (platform, probe) = sim(SimConfig::default());
    let params = SessionParams {
        drive,
        blocks,
        offset,
        irq,
        ..SessionParams::default()
    };

    let outcome = run_session(&platform, &params).unwrap();

    assert_that!(outcome.exit_code(), eq(0));
    assert_that!(outcome.comparison.words_scanned, eq(blocks as usize * 64));
    let stats = probe.queue_stats();
    assert_that!(stats.overruns, eq(0));
    assert_that!(stats.outstanding, eq(0));
    assert_that!(stats.submissions.len(), eq(10));
    assert!(stats.peak_outstanding <= 4);
    let queue_bit = if drive == 0 { 0x10 } else { 0x30 };
    for (i, submission) in stats.submissions.iter().enumerate() {
        assert_that!(submission.command_word.encode(), eq(0xef00 | queue_bit));
        assert_that!(submission.lba, eq(i as u64 * blocks as u64));
        assert_that!(
            submission.data_pointer,
            eq(((nvme::DPTR_HIGH_CARD_RAM as u64) << 32) + i as u64 * blocks as u64 * 512)
        );
    }
}

#[gtest]
fn test_interrupt_mode_waits_on_the_card() {
    let (platform, probe) = sim(SimConfig {
        copy_latency: 50,
        ..SimConfig::default()
    });
    let params = SessionParams {
        irq: true,
        ..SessionParams::default()
    };

    run_session(&platform, &params).unwrap();

    assert_that!(probe.irq_waits(), ge(2));
    assert!(!probe.interrupts_enabled());
}

#[gtest]
#[rstest]
#[case::misaligned_offset(SessionParams { offset: 513, ..SessionParams::default() })]
#[case::no_blocks(SessionParams { blocks: 0, ..SessionParams::default() })]
#[case::offset_past_drive(SessionParams { offset: 0x1_0000_0200, ..SessionParams::default() })]
#[case::transfer_past_drive(SessionParams { offset: 0xffff_fe00, blocks: 2, ..SessionParams::default() })]
#[case::bad_drive(SessionParams { drive: 2, ..SessionParams::default() })]
#[case::bad_card(SessionParams { card: 4, ..SessionParams::default() })]
fn test_invalid_params_never_touch_the_card(#[case] params: SessionParams) {
    let (platform, probe) = sim(SimConfig::default());

    assert_that!(
        run_session(&platform, &params),
        err(displays_as(contains_substring("SnapNvmeError::Configuration:")))
    );
    assert_that!(probe.attach_count(), eq(0));
    assert_that!(probe.copies().len(), eq(0));
    assert_that!(probe.queue_stats().submissions.len(), eq(0));
}

#[gtest]
fn test_copy_timeout_still_detaches() {
    let (platform, probe) = sim(SimConfig {
        stall_copy: true,
        ..SimConfig::default()
    });
    let params = SessionParams {
        timeout: Duration::from_millis(20),
        ..SessionParams::default()
    };

    assert_that!(
        run_session(&platform, &params),
        err(displays_as(contains_substring("SnapNvmeError::Timeout:")))
    );
    assert!(probe.copy_engine_busy());
    assert!(!probe.attached());
    assert_that!(probe.detach_count(), eq(1));
    assert_that!(probe.queue_stats().submissions.len(), eq(0));
    assert_that!(probe.host_regions(), eq(0));
}

#[gtest]
fn test_storage_window_write_failure_aborts() {
    let (platform, probe) = sim(SimConfig {
        fail_nvme_writes: true,
        ..SimConfig::default()
    });

    assert_that!(
        run_session(&platform, &SessionParams::default()),
        err(displays_as(all![
            contains_substring("SnapNvmeError::RegisterWrite:"),
            contains_substring("nvme register")
        ]))
    );
    assert_that!(probe.copies().len(), eq(1));
    assert!(!probe.attached());
}

#[gtest]
fn test_corrupted_staging_is_reported() {
    let (platform, _probe) = sim(SimConfig {
        corrupt_word: Some(3),
        ..SimConfig::default()
    });

    let outcome = run_session(&platform, &SessionParams::default()).unwrap();

    assert_that!(outcome.exit_code(), eq(1));
    assert_that!(outcome.comparison.reported.len(), eq(1));
    assert_that!(outcome.comparison.reported[0].offset, eq(24));
    assert!(outcome.exit_code() <= MISMATCH_CODE_CAP);
}

#[gtest]
fn test_missing_card_is_unavailable() {
    let (platform, probe) = sim(SimConfig {
        present_cards: 1,
        ..SimConfig::default()
    });
    let params = SessionParams {
        card: 2,
        ..SessionParams::default()
    };

    assert_that!(
        run_session(&platform, &params),
        err(displays_as(contains_substring("SnapNvmeError::DeviceUnavailable:")))
    );
    assert_that!(probe.attach_count(), eq(0));
}

#[gtest]
fn test_wrong_action_cannot_attach() {
    let (platform, probe) = sim(SimConfig {
        action_type: 0x1014_1000,
        ..SimConfig::default()
    });
    let params = SessionParams {
        timeout: Duration::from_millis(2),
        ..SessionParams::default()
    };

    assert_that!(
        run_session(&platform, &params),
        err(displays_as(contains_substring("SnapNvmeError::DeviceUnavailable:")))
    );
    assert_that!(probe.copies().len(), eq(0));
    assert_that!(probe.detach_count(), eq(0));
}

#[gtest]
fn test_disabled_nvme_only_warns() {
    let (platform, _probe) = sim(SimConfig {
        nvme_enabled: false,
        ..SimConfig::default()
    });

    let outcome = run_session(&platform, &SessionParams::default()).unwrap();
    assert_that!(outcome.exit_code(), eq(0));
}

#[gtest]
fn test_stalled_queue_is_drained_before_failing() {
    let (platform, probe) = sim(SimConfig {
        queue_depth: 1,
        completion_latency: 50,
        ..SimConfig::default()
    });
    let params = SessionParams {
        backpressure_timeout: Some(Duration::ZERO),
        ..SessionParams::default()
    };

    assert_that!(
        run_session(&platform, &params),
        err(displays_as(contains_substring("SnapNvmeError::QueueStalled:")))
    );
    assert_that!(probe.queue_stats().outstanding, eq(0));
    assert_that!(probe.occupied_slots(), eq(0));
    assert!(!probe.attached());
}
