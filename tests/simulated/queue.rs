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
use snapnvme::platforms::platform::Platform;
use snapnvme::platforms::simulated::SimConfig;
use snapnvme::queue::{
    CommandWord, Drive, Opcode, QueueSelector, QueueSession, QueueSubmitter, ReadBurst,
    consume_one_completion_if_any,
};
use snapnvme::register_io::{reg_read, reg_write};
use snapnvme::regs::nvme;
use std::time::Duration;

fn burst(queue: QueueSelector, blocks_per_command: u32, command_count: u32) -> ReadBurst {
    ReadBurst {
        queue,
        block_size: 512,
        blocks_per_command,
        command_count,
    }
}

#[gtest]
#[rstest]
#[case::depth_one(1, 1)]
#[case::depth_two_slow(2, 40)]
#[case::depth_four(4, 3)]
#[case::deeper_than_burst(16, 5)]
fn test_burst_respects_queue_depth(#[case] queue_depth: u32, #[case] completion_latency: u32) {
    let (platform, probe) = sim(SimConfig {
        queue_depth,
        completion_latency,
        ..SimConfig::default()
    });
    let card = platform.open_card(0).unwrap();

    let report = QueueSubmitter::new(card.nvme_window())
        .run_read_burst(&burst(QueueSelector::io(Drive::Drive0), 2, 10))
        .unwrap();

    let stats = probe.queue_stats();
    assert_that!(stats.overruns, eq(0));
    assert_that!(stats.invalid_commands, eq(0));
    assert_that!(stats.outstanding, eq(0));
    assert_that!(probe.occupied_slots(), eq(0));
    assert!(report.peak_in_flight <= queue_depth);
    assert_that!(report.peak_in_flight, eq(stats.peak_outstanding));
    assert_that!(report.commands_submitted, eq(10));
    assert_that!(report.completions_observed, eq(10));
    assert_that!(stats.completions_signalled, eq(10));
}

#[gtest]
fn test_burst_addresses_are_sequential() {
    let (platform, probe) = sim(SimConfig::default());
    let card = platform.open_card(0).unwrap();

    QueueSubmitter::new(card.nvme_window())
        .run_read_burst(&burst(QueueSelector::io(Drive::Drive1), 4, 3))
        .unwrap();

    let stats = probe.queue_stats();
    let expected_word = CommandWord {
        opcode: Opcode::Read,
        queue: QueueSelector::Drive1Io,
        action_id: nvme::BURST_ACTION_ID,
    };
    let lbas: Vec<u64> = stats.submissions.iter().map(|s| s.lba).collect();
    let pointers: Vec<u64> = stats.submissions.iter().map(|s| s.data_pointer).collect();
    assert_that!(lbas, elements_are![eq(&0), eq(&4), eq(&8)]);
    assert_that!(
        pointers,
        elements_are![eq(&0x2_0000_0000), eq(&0x2_0000_0800), eq(&0x2_0000_1000)]
    );
    assert!(stats.submissions.iter().all(|s| s.command_word == expected_word));
    assert!(stats.submissions.iter().all(|s| s.blocks == 4));
}

#[gtest]
fn test_backpressure_is_observed_on_a_slow_queue() {
    let (platform, _probe) = sim(SimConfig {
        queue_depth: 2,
        completion_latency: 100,
        ..SimConfig::default()
    });
    let card = platform.open_card(0).unwrap();

    let report = QueueSubmitter::new(card.nvme_window())
        .run_read_burst(&burst(QueueSelector::io(Drive::Drive0), 1, 6))
        .unwrap();

    assert_that!(report.peak_in_flight, eq(2));
    assert_that!(report.backpressure_polls, gt(0));
    assert_that!(report.drain_polls, gt(0));
}

#[gtest]
fn test_stall_timeout_drains_first() {
    let (platform, probe) = sim(SimConfig {
        queue_depth: 1,
        completion_latency: 30,
        ..SimConfig::default()
    });
    let card = platform.open_card(0).unwrap();

    let result = QueueSubmitter::new(card.nvme_window())
        .with_backpressure_timeout(Duration::ZERO)
        .run_read_burst(&burst(QueueSelector::io(Drive::Drive0), 1, 5));

    assert_that!(
        result,
        err(displays_as(all![
            contains_substring("SnapNvmeError::QueueStalled:"),
            contains_substring("after 1 submissions")
        ]))
    );
    assert_that!(probe.queue_stats().outstanding, eq(0));
    assert_that!(probe.queue_stats().submissions.len(), eq(1));
}

#[gtest]
fn test_completion_is_counted_once_per_nonzero_read() {
    let (platform, probe) = sim(SimConfig {
        completion_latency: 1,
        ..SimConfig::default()
    });
    let card = platform.open_card(0).unwrap();
    let window = card.nvme_window();
    let command = CommandWord {
        opcode: Opcode::Read,
        queue: QueueSelector::Drive0Io,
        action_id: nvme::BURST_ACTION_ID,
    };
    reg_write(window, nvme::LBA_NUM, 1).unwrap();
    reg_write(window, nvme::COMMAND, command.encode()).unwrap();
    reg_write(window, nvme::COMMAND, command.encode()).unwrap();
    // let both commands finish before TRACK is looked at
    reg_read(window, nvme::STATUS).unwrap();

    let mut session = QueueSession::new();
    assert_that!(consume_one_completion_if_any(window, &mut session), ok(eq(&false)));
    assert_that!(probe.queue_stats().completions_signalled, eq(1));
    assert_that!(probe.queue_stats().outstanding, eq(1));
}
