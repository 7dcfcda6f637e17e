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

//! snapnvme command-line tool.
//!
//! Runs one session: stage a pattern block in card RAM, push a burst of reads through
//! the NVMe queue of the selected drive, copy the block back and verify it.
//!
//! # Exit Codes
//!
//! - `0` - the round trip verified
//! - `1..=11` - number of mismatching words, capped at 11
//! - `1` - the session could not run or the arguments are invalid
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - overrides the level chosen with `-v`/`-q`

use clap::{ArgAction, Parser};
use env_logger::Env;
use log::{debug, error, info};
use snapnvme::config::DEFAULT_BURST_COMMANDS;
use snapnvme::platforms::platform::{platform_for_known_platform, registered_platforms};
use snapnvme::session::{SessionParams, run_session};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "snapnvme_cli")]
#[command(bin_name = "snapnvme_cli")]
#[command(version, about = "Exercise the NVMe command queue of a SNAP card")]
struct Cli {
    #[arg(short = 'C', long, default_value_t = 0, help = "Card to use, 0 to 3")]
    card: u32,
    #[arg(short, long, action = ArgAction::Count, help = "More logging, repeat for more")]
    verbose: u8,
    #[arg(short, long, help = "Only log errors")]
    quiet: bool,
    #[arg(short, long, default_value_t = 1, help = "Copy timeout in seconds")]
    timeout: u64,
    #[arg(short, long, default_value_t = 0, help = "NVMe drive, 0 or 1")]
    drive: u32,
    #[arg(short, long, default_value_t = 1, help = "512 byte blocks per transfer")]
    blocks: u32,
    #[arg(
        short,
        long,
        default_value = "0",
        value_parser = parse_offset,
        help = "Byte offset on the drive, 512 byte aligned, decimal or 0x hex"
    )]
    offset: u64,
    #[arg(short, long, help = "Wait for the action interrupt instead of polling")]
    irq: bool,
    #[arg(long, default_value = "mmio", help = "How to reach the card: mmio or sim")]
    platform: String,
    #[arg(long, default_value_t = DEFAULT_BURST_COMMANDS, help = "Read commands in the burst")]
    commands: u32,
    #[arg(
        long,
        value_name = "MSEC",
        help = "Give up when the queue stays full this long (default: wait forever)"
    )]
    backpressure_timeout: Option<u64>,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }

    fn session_params(&self) -> SessionParams {
        SessionParams {
            card: self.card,
            drive: self.drive,
            blocks: self.blocks,
            offset: self.offset,
            timeout: Duration::from_secs(self.timeout),
            irq: self.irq,
            burst_commands: self.commands,
            backpressure_timeout: self.backpressure_timeout.map(Duration::from_millis),
        }
    }
}

fn parse_offset(arg: &str) -> Result<u64, String> {
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => arg.parse::<u64>(),
    };
    parsed.map_err(|e| format!("'{arg}' is not a byte offset: {e}"))
}

fn register_platforms() {
    #[cfg(feature = "mmio")]
    snapnvme::platforms::mmio::MmioPlatform::register_platform();
    #[cfg(feature = "simulated")]
    snapnvme::platforms::simulated::SimulatedPlatform::register_platform();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
        Err(e) => e.exit(),
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level())).init();
    register_platforms();
    debug!("parsed cli command with {cli:?}");

    let platform = match platform_for_known_platform(&cli.platform) {
        Ok(platform) => platform,
        Err(e) => {
            error!("{e}");
            debug!("registered platforms: {:?}", registered_platforms());
            return ExitCode::FAILURE;
        }
    };

    match run_session(platform.as_ref(), &cli.session_params()) {
        Ok(outcome) => {
            info!(
                "{} commands, peak {} in flight, copy in {:?}, copy out {:?}, rc {}",
                outcome.burst.commands_submitted,
                outcome.burst.peak_in_flight,
                outcome.copy_in,
                outcome.copy_out,
                outcome.exit_code()
            );
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(e) => {
            error!("{e}");
            if e.is_configuration() {
                info!("Run with --help to see the accepted ranges");
            }
            ExitCode::FAILURE
        }
    }
}
