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
use snapnvme::buffer::HostBuffer;
use snapnvme::copy::{CopyDirection, CopyOrchestrator, TransferDescriptor};
use snapnvme::platforms::platform::Platform;
use snapnvme::platforms::simulated::SimConfig;
use snapnvme::regs::action;
use snapnvme::verify::{compare, fill_pattern, pattern_word};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(100);

#[gtest]
fn test_round_trip_through_card_memory() {
    let (platform, probe) = sim(SimConfig::default());
    let card = platform.open_card(0).unwrap();
    let mut source = HostBuffer::alloc(4096).unwrap();
    let destination = HostBuffer::alloc(4096).unwrap();
    fill_pattern(source.words_mut(), 0x40);
    // SAFETY: both buffers stay alive until they are unregistered at the end of the test and
    // are not borrowed while a copy runs.
    unsafe {
        card.register_host_buffer(&source);
        card.register_host_buffer(&destination);
    }

    let orchestrator = CopyOrchestrator::new(card.action_window());
    orchestrator
        .run_copy(
            &TransferDescriptor::new(CopyDirection::HostToCard, 0x1000, source.dma_address(), 4096),
            TIMEOUT,
        )
        .unwrap();
    assert_that!(probe.card_word(0x1000), eq(pattern_word(0x40)));
    assert_that!(probe.card_word(0x1ff8), eq(pattern_word(0x40 + 4088)));

    orchestrator
        .run_copy(
            &TransferDescriptor::new(
                CopyDirection::CardToHost,
                destination.dma_address(),
                0x1000,
                4096,
            ),
            TIMEOUT,
        )
        .unwrap();

    assert!(compare(destination.words(), source.words()).is_match());
    assert_that!(probe.copies().len(), eq(2));
    assert_that!(probe.copy_engine_busy(), eq(false));

    card.unregister_host_buffer(&source);
    card.unregister_host_buffer(&destination);
    assert_that!(probe.host_regions(), eq(0));
}

#[gtest]
fn test_unregistered_host_memory_is_never_touched() {
    let (platform, probe) = sim(SimConfig::default());
    let card = platform.open_card(0).unwrap();
    let orchestrator = CopyOrchestrator::new(card.action_window());

    let source = HostBuffer::alloc(512).unwrap();
    let transfers = [
        TransferDescriptor::new(CopyDirection::HostToCard, 0, 0x10, 4096),
        TransferDescriptor::new(CopyDirection::CardToHost, 0x10, 0, 4096),
        TransferDescriptor::new(CopyDirection::HostToCard, 0x1000, source.dma_address(), 512),
    ];

    for transfer in &transfers {
        orchestrator.run_copy(transfer, TIMEOUT).unwrap();
    }

    assert_that!(probe.copies().len(), eq(3));
    assert_that!(probe.card_word(0), eq(0));
    assert_that!(probe.card_word(0x1000), eq(0));
}

#[gtest]
fn test_stalled_engine_times_out() {
    let (platform, probe) = sim(SimConfig {
        stall_copy: true,
        ..SimConfig::default()
    });
    let card = platform.open_card(0).unwrap();
    let source = HostBuffer::alloc(512).unwrap();

    let result = CopyOrchestrator::new(card.action_window()).run_copy(
        &TransferDescriptor::new(CopyDirection::HostToCard, 0, source.dma_address(), 512),
        Duration::from_millis(5),
    );

    assert_that!(
        result,
        err(displays_as(all![
            contains_substring("SnapNvmeError::Timeout:"),
            contains_substring("HostToCard copy of 512 bytes")
        ]))
    );
    assert_that!(probe.copy_engine_busy(), eq(true));
    assert_that!(probe.copies().len(), eq(0));
}

#[gtest]
fn test_interrupt_wakes_the_orchestrator() {
    let (platform, probe) = sim(SimConfig {
        copy_latency: 1000,
        ..SimConfig::default()
    });
    let card = platform.open_card(0).unwrap();
    card.attach_action(action::ACTION_TYPE_EXAMPLE, true, TIMEOUT).unwrap();
    let Some(interrupts) = card.interrupts() else {
        panic!("simulated cards raise interrupts");
    };
    let source = HostBuffer::alloc(512).unwrap();
    // SAFETY: `source` stays alive until it is unregistered below and is not borrowed while
    // the copy runs.
    unsafe { card.register_host_buffer(&source) };

    CopyOrchestrator::new(card.action_window())
        .with_interrupts(interrupts)
        .run_copy(
            &TransferDescriptor::new(CopyDirection::HostToCard, 0, source.dma_address(), 512),
            Duration::from_secs(1),
        )
        .unwrap();

    assert_that!(probe.irq_waits(), eq(1));
    assert_that!(probe.copies().len(), eq(1));
    card.unregister_host_buffer(&source);
    card.detach_action().unwrap();
    assert_that!(probe.interrupts_enabled(), eq(false));
}
