// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The contract between the bus and a concrete PCI function.

/// Size of one function's configuration register file in bytes.
pub const CONFIG_SPACE_SIZE: usize = 256;

/// Trait implemented by anything that wants a presence in PCI
/// configuration space.
///
/// The generic dispatch engine knows nothing about concrete device
/// families; everything family-specific flows through these hooks. All
/// hooks operate on single bytes because the port protocol decomposes
/// every access into byte operations.
#[allow(unused_variables)]
pub trait PciDevice: Send {
    /// Get the device name.
    fn name(&self) -> String;

    /// 16-bit PCI vendor ID, fixed at construction.
    fn vendor_id(&self) -> u16;

    /// 16-bit PCI device ID, fixed at construction.
    fn device_id(&self) -> u16;

    /// Populate a freshly zeroed configuration block at registration time.
    ///
    /// Must fill in the mandatory class/status/command bytes and any base
    /// address fields. Returning `false` aborts the registration; the
    /// bus treats that as a roster configuration fault.
    fn initialize_registers(&mut self, registers: &mut [u8; CONFIG_SPACE_SIZE]) -> bool;

    /// Intercept a single-byte configuration write.
    ///
    /// Returns `Some(byte)` with the value to actually store (devices use
    /// this to clamp read-only sub-bits or remap writes), or `None` to
    /// discard the write and leave the stored byte unchanged.
    ///
    /// Never called for the hardware-fixed read-only registers; the bus
    /// rejects those before consulting the device.
    fn parse_write_register(&mut self, regnum: u8, value: u8) -> Option<u8> {
        Some(value)
    }

    /// Intercept a single-byte configuration read.
    ///
    /// Returns `Some(regnum)` with the register to read the stored byte
    /// from instead (identity remap included), or `None` to fall through
    /// to [`PciDevice::override_read_register`].
    fn parse_read_register(&mut self, regnum: u8) -> Option<u8> {
        None
    }

    /// Blend computed bits into a configuration read.
    ///
    /// Returns `Some((value, mask))` to synthesize
    /// `(stored & !mask) | (value & mask)`, or `None` to return the
    /// stored byte unmodified. Only consulted when
    /// [`PciDevice::parse_read_register`] declined.
    fn override_read_register(&mut self, regnum: u8) -> Option<(u8, u8)> {
        None
    }
}
