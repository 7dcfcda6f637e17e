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
use proptest::prelude::*;
use snapnvme::platforms::platform::Platform;
use snapnvme::platforms::simulated::SimConfig;
use snapnvme::queue::{Drive, QueueSelector, QueueSubmitter, ReadBurst};

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn burst_never_overruns_the_controller(
        queue_depth in 1u32..6,
        completion_latency in 1u32..20,
        command_count in 1u32..40,
        blocks_per_command in 1u32..8,
        second_drive in any::<bool>(),
    ) {
        let (platform, probe) = sim(SimConfig {
            queue_depth,
            completion_latency,
            ..SimConfig::default()
        });
        let card = platform.open_card(0).unwrap();
        let drive = if second_drive { Drive::Drive1 } else { Drive::Drive0 };
        let burst = ReadBurst {
            queue: QueueSelector::io(drive),
            block_size: 512,
            blocks_per_command,
            command_count,
        };

        let report = QueueSubmitter::new(card.nvme_window())
            .run_read_burst(&burst)
            .unwrap();

        let stats = probe.queue_stats();
        prop_assert!(report.peak_in_flight <= queue_depth);
        prop_assert_eq!(stats.overruns, 0);
        prop_assert_eq!(stats.invalid_commands, 0);
        prop_assert_eq!(stats.outstanding, 0);
        prop_assert_eq!(stats.submissions.len(), command_count as usize);
        prop_assert_eq!(stats.completions_signalled, command_count);
        prop_assert_eq!(report.completions_observed, command_count);
        let last = stats.submissions[command_count as usize - 1];
        prop_assert_eq!(last.lba, (command_count as u64 - 1) * blocks_per_command as u64);
    }
}
