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

//! Platform abstraction layer for card access.
//!
//! A [`Platform`] knows how to open a card by index and hand back a [`Card`]: the attached
//! hardware context that exposes the two register windows, the action attach/detach
//! handshake, the NVMe capability bit and, optionally, an interrupt source.
//!
//! # Platform Registration
//!
//! Platforms register themselves at startup under a short name with [`register_platform`]
//! and are fetched again with [`platform_for_known_platform`]. Which platforms exist is
//! decided by cargo features.
//!
//! # Examples
//!
//! in the CLI's `main.rs`:
//! ```rust,no_run
//! # use snapnvme::platforms::platform::platform_for_known_platform;
//! fn register_platforms() {
//!     #[cfg(feature = "mmio")]
//!     snapnvme::platforms::mmio::MmioPlatform::register_platform();
//!
//!     #[cfg(feature = "simulated")]
//!     snapnvme::platforms::simulated::SimulatedPlatform::register_platform();
//! }
//!
//! # fn example() -> Result<(), snapnvme::error::SnapNvmeError> {
//! register_platforms();
//! let platform = platform_for_known_platform("mmio")?;
//! let card = platform.open_card(0)?;
//! # Ok(())
//! # }
//! ```

use crate::buffer::HostBuffer;
use crate::copy::InterruptSource;
use crate::error::SnapNvmeError;
use crate::register_io::RegisterWindow;
use log::trace;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Type alias for platform constructor functions.
type PlatformConstructor = fn() -> Box<dyn Platform>;

/// Global registry of platform implementations, keyed by platform name.
pub static PLATFORM_REGISTRY: OnceLock<Mutex<HashMap<&'static str, PlatformConstructor>>> =
    OnceLock::new();

/// An opened card with its action attached or ready to be attached.
pub trait Card {
    /// The copy-engine (action) register window.
    fn action_window(&self) -> &dyn RegisterWindow;

    /// The storage-queue (NVMe) register window.
    fn nvme_window(&self) -> &dyn RegisterWindow;

    /// Whether the card reports its NVMe host controller as enabled.
    ///
    /// # Returns: `Result<bool, SnapNvmeError>`
    /// * `Ok(bool)` - The capability bit
    /// * `Err(SnapNvmeError::RegisterRead)` - The capability register could not be read
    fn nvme_enabled(&self) -> Result<bool, SnapNvmeError>;

    /// Attach the action of type `action_type`.
    ///
    /// # Arguments
    ///
    /// * `action_type` - Expected value of the action type register
    /// * `irq` - Enable the action's done interrupt
    /// * `timeout` - How long to wait for the action to show up
    ///
    /// # Returns: `Result<(), SnapNvmeError>`
    /// * `Ok(())` - Attached
    /// * `Err(SnapNvmeError::DeviceUnavailable)` - The action did not answer in time
    fn attach_action(
        &self,
        action_type: u32,
        irq: bool,
        timeout: Duration,
    ) -> Result<(), SnapNvmeError>;

    /// Undo [`attach_action`](Self::attach_action).
    fn detach_action(&self) -> Result<(), SnapNvmeError>;

    /// The card's interrupt source, if it has one.
    fn interrupts(&self) -> Option<&dyn InterruptSource>;

    /// Let the copy engine reach `buffer`.
    ///
    /// Hardware cards reach host memory through their CXL context and need nothing here.
    ///
    /// # Safety
    ///
    /// `buffer` must stay alive until [`unregister_host_buffer`](Self::unregister_host_buffer)
    /// is called for it, and no reference into its memory may be held across a register
    /// access that can complete a copy.
    unsafe fn register_host_buffer(&self, _buffer: &HostBuffer) {}

    /// Undo [`register_host_buffer`](Self::register_host_buffer).
    fn unregister_host_buffer(&self, _buffer: &HostBuffer) {}
}

/// A way of reaching cards.
///
/// The trait extends `Any` so callers that know the concrete platform can downcast.
pub trait Platform: Any {
    /// Name the platform registers under.
    fn name(&self) -> &'static str;

    /// Open card number `card`.
    ///
    /// # Returns: `Result<Box<dyn Card>, SnapNvmeError>`
    /// * `Ok(Box<dyn Card>)` - The opened card
    /// * `Err(SnapNvmeError::DeviceUnavailable)` - No such card or it cannot be opened
    fn open_card(&self, card: u32) -> Result<Box<dyn Card>, SnapNvmeError>;
}

fn match_platform_name(platform_name: &str) -> Result<Box<dyn Platform>, SnapNvmeError> {
    let registry = PLATFORM_REGISTRY
        .get()
        .ok_or(SnapNvmeError::Internal(String::from(
            "couldn't get PLATFORM_REGISTRY",
        )))?
        .lock()
        .map_err(|_| SnapNvmeError::Internal(String::from("couldn't lock PLATFORM_REGISTRY")))?;

    match registry.get(platform_name) {
        Some(constructor) => Ok(constructor()),
        None => {
            let mut known: Vec<&str> = registry.keys().copied().collect();
            known.sort_unstable();
            Err(SnapNvmeError::Configuration(format!(
                "Unknown platform '{platform_name}', known platforms: {}",
                known.join(", ")
            )))
        }
    }
}

/// Get a platform instance by the name it registered under.
///
/// # Returns: `Result<Box<dyn Platform>, SnapNvmeError>`
/// * `Ok(Box<dyn Platform>)` - Newly constructed platform instance
/// * `Err(SnapNvmeError::Configuration)` - No platform of that name
/// * `Err(SnapNvmeError::Internal)` - Registry not initialized or lock failure
pub fn platform_for_known_platform(
    platform_name: &str,
) -> Result<Box<dyn Platform>, SnapNvmeError> {
    trace!("Looking up platform '{platform_name}'");
    match_platform_name(platform_name)
}

/// Names of all registered platforms, sorted.
pub fn registered_platforms() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = PLATFORM_REGISTRY
        .get()
        .and_then(|registry| registry.lock().ok())
        .map(|registry| registry.keys().copied().collect())
        .unwrap_or_default();
    names.sort_unstable();
    names
}

/// Create an empty registry.
pub fn init_platform_registry() -> Mutex<HashMap<&'static str, PlatformConstructor>> {
    Mutex::new(HashMap::new())
}

/// Register a platform implementation in the global registry.
///
/// Registering a name twice replaces the earlier constructor.
///
/// # Panics
///
/// Panics if the registry lock is poisoned.
pub fn register_platform(name: &'static str, constructor: PlatformConstructor) {
    let mut registry = PLATFORM_REGISTRY
        .get_or_init(init_platform_registry)
        .lock()
        .expect("couldnt get PLATFORM_REGISTRY");

    registry.insert(name, constructor);
}
