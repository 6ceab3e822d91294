// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration-space storage and the per-byte register access protocol.
//!
//! The store holds one 256-byte register block per (slot, function)
//! pair. See the [specification](https://en.wikipedia.org/wiki/PCI_configuration_space)
//! for the block layout. Blocks stay zero until the owning device's
//! initializer populates them at registration time; afterwards every
//! mutation goes through [`write_register`].

use crate::device::{PciDevice, CONFIG_SPACE_SIZE};
use crate::pci_bus::{MAX_FUNCTIONS, MAX_SLOTS};

const REG_VENDOR_LO: u8 = 0x00;
const REG_VENDOR_HI: u8 = 0x01;
const REG_DEVICE_LO: u8 = 0x02;
const REG_DEVICE_HI: u8 = 0x03;
const REG_HEADER_TYPE: u8 = 0x0e;

/// Header type of a standard (non-bridge) function, low 7 bits.
const HEADER_TYPE_STANDARD: u8 = 0x00;

/// Register file for every addressable function on the bus.
pub struct ConfigSpace {
    blocks: Vec<[u8; CONFIG_SPACE_SIZE]>,
}

impl Default for ConfigSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSpace {
    /// Create the store with every block zeroed.
    pub fn new() -> Self {
        ConfigSpace {
            blocks: vec![[0u8; CONFIG_SPACE_SIZE]; MAX_SLOTS * MAX_FUNCTIONS],
        }
    }

    /// Zero every block.
    pub fn clear(&mut self) {
        for block in self.blocks.iter_mut() {
            *block = [0u8; CONFIG_SPACE_SIZE];
        }
    }

    /// Borrow the block of (slot, function).
    ///
    /// # Panics
    /// Panics when slot or function is beyond the bus capacity; callers
    /// decode both from a 5-bit and a 3-bit field.
    pub fn block(&self, slot: usize, function: usize) -> &[u8; CONFIG_SPACE_SIZE] {
        assert!(slot < MAX_SLOTS && function < MAX_FUNCTIONS);
        &self.blocks[slot * MAX_FUNCTIONS + function]
    }

    /// Mutably borrow the block of (slot, function).
    pub fn block_mut(&mut self, slot: usize, function: usize) -> &mut [u8; CONFIG_SPACE_SIZE] {
        assert!(slot < MAX_SLOTS && function < MAX_FUNCTIONS);
        &mut self.blocks[slot * MAX_FUNCTIONS + function]
    }
}

/// Write a single configuration byte through the access protocol.
///
/// Vendor/device IDs, the status/class/revision block and the header
/// type are read-only in hardware and rejected before the device sees
/// anything. Standard-header functions additionally keep their
/// subsystem information (0x28..0x2f) read-only. Everything else is
/// offered to the device's write hook, which may replace or discard
/// the byte.
pub fn write_register(
    dev: &mut dyn PciDevice,
    block: &mut [u8; CONFIG_SPACE_SIZE],
    regnum: u8,
    value: u8,
) {
    // vendor/device/class IDs/header type/etc. are read-only
    if regnum < 0x04 || (0x06..0x0c).contains(&regnum) || regnum == REG_HEADER_TYPE {
        return;
    }
    // header-type specific handling
    if block[REG_HEADER_TYPE as usize] & 0x7f == HEADER_TYPE_STANDARD
        && (0x28..0x30).contains(&regnum)
    {
        return; // subsystem information is read-only
    }

    if let Some(parsed) = dev.parse_write_register(regnum, value) {
        block[regnum as usize] = parsed;
    }
}

/// Read a single configuration byte through the access protocol.
///
/// Identity bytes come from the device object, never the store, so they
/// are right even if the initializer skipped them. The header type's
/// multi-function bit is computed from `multifunction`, not stored.
/// Remaining registers go through the device's read hook (register
/// remap) and override hook (bitwise blend of stored and computed
/// bits) before falling back to the stored byte.
pub fn read_register(
    dev: &mut dyn PciDevice,
    block: &[u8; CONFIG_SPACE_SIZE],
    multifunction: bool,
    regnum: u8,
) -> u8 {
    match regnum {
        REG_VENDOR_LO => return dev.vendor_id() as u8,
        REG_VENDOR_HI => return (dev.vendor_id() >> 8) as u8,
        REG_DEVICE_LO => return dev.device_id() as u8,
        REG_DEVICE_HI => return (dev.device_id() >> 8) as u8,
        REG_HEADER_TYPE => {
            return (block[REG_HEADER_TYPE as usize] & 0x7f)
                | if multifunction { 0x80 } else { 0x00 };
        }
        _ => {}
    }

    if let Some(parsed_regnum) = dev.parse_read_register(regnum) {
        return block[parsed_regnum as usize];
    }

    if let Some((newval, mask)) = dev.override_read_register(regnum) {
        return (block[regnum as usize] & !mask) | (newval & mask);
    }

    block[regnum as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hooked {
        discard_reg: Option<u8>,
        remap: Option<(u8, u8)>,
        blend: Option<(u8, u8, u8)>,
    }

    impl Hooked {
        fn plain() -> Self {
            Hooked {
                discard_reg: None,
                remap: None,
                blend: None,
            }
        }
    }

    impl PciDevice for Hooked {
        fn name(&self) -> String {
            String::from("hooked")
        }

        fn vendor_id(&self) -> u16 {
            0x1234
        }

        fn device_id(&self) -> u16 {
            0xabcd
        }

        fn initialize_registers(&mut self, _registers: &mut [u8; CONFIG_SPACE_SIZE]) -> bool {
            true
        }

        fn parse_write_register(&mut self, regnum: u8, value: u8) -> Option<u8> {
            if self.discard_reg == Some(regnum) {
                None
            } else {
                Some(value)
            }
        }

        fn parse_read_register(&mut self, regnum: u8) -> Option<u8> {
            match self.remap {
                Some((from, to)) if from == regnum => Some(to),
                _ => None,
            }
        }

        fn override_read_register(&mut self, regnum: u8) -> Option<(u8, u8)> {
            match self.blend {
                Some((reg, value, mask)) if reg == regnum => Some((value, mask)),
                _ => None,
            }
        }
    }

    #[test]
    fn identity_bytes_come_from_the_device() {
        let mut dev = Hooked::plain();
        let block = [0x55u8; CONFIG_SPACE_SIZE];
        assert_eq!(read_register(&mut dev, &block, false, 0x00), 0x34);
        assert_eq!(read_register(&mut dev, &block, false, 0x01), 0x12);
        assert_eq!(read_register(&mut dev, &block, false, 0x02), 0xcd);
        assert_eq!(read_register(&mut dev, &block, false, 0x03), 0xab);
    }

    #[test]
    fn fixed_read_only_windows_reject_writes() {
        let mut dev = Hooked::plain();
        let mut block = [0u8; CONFIG_SPACE_SIZE];
        for reg in (0x00..0x04).chain(0x06..0x0c).chain(0x0e..0x0f) {
            write_register(&mut dev, &mut block, reg, 0xff);
            assert_eq!(block[reg as usize], 0, "register {:#x} must stay", reg);
        }
        // 0x04/0x05 (command) and 0x0c/0x0d sit between the windows.
        write_register(&mut dev, &mut block, 0x04, 0x23);
        assert_eq!(block[0x04], 0x23);
        write_register(&mut dev, &mut block, 0x0d, 0x40);
        assert_eq!(block[0x0d], 0x40);
    }

    #[test]
    fn subsystem_window_follows_header_type() {
        let mut dev = Hooked::plain();
        let mut block = [0u8; CONFIG_SPACE_SIZE];

        // standard header: subsystem bytes are read-only
        for reg in 0x28..0x30 {
            write_register(&mut dev, &mut block, reg, 0xaa);
            assert_eq!(block[reg as usize], 0);
        }

        // bridge header (stored type 0x01): same window is writable
        block[0x0e] = 0x01;
        write_register(&mut dev, &mut block, 0x28, 0xaa);
        assert_eq!(block[0x28], 0xaa);

        // the multi-function bit does not change the header type class
        block[0x28] = 0;
        block[0x0e] = 0x80;
        write_register(&mut dev, &mut block, 0x28, 0xbb);
        assert_eq!(block[0x28], 0);
    }

    #[test]
    fn header_type_reflects_subdevices() {
        let mut dev = Hooked::plain();
        let mut block = [0u8; CONFIG_SPACE_SIZE];
        block[0x0e] = 0x81; // stored bit 7 must be ignored
        assert_eq!(read_register(&mut dev, &block, false, 0x0e), 0x01);
        assert_eq!(read_register(&mut dev, &block, true, 0x0e), 0x81);
    }

    #[test]
    fn write_hook_discards() {
        let mut dev = Hooked::plain();
        dev.discard_reg = Some(0x40);
        let mut block = [0u8; CONFIG_SPACE_SIZE];
        block[0x40] = 0x17;
        write_register(&mut dev, &mut block, 0x40, 0x99);
        assert_eq!(block[0x40], 0x17);
        write_register(&mut dev, &mut block, 0x41, 0x99);
        assert_eq!(block[0x41], 0x99);
    }

    #[test]
    fn read_hook_remaps_before_override() {
        let mut dev = Hooked::plain();
        dev.remap = Some((0x40, 0x41));
        dev.blend = Some((0x40, 0xff, 0xff));
        let mut block = [0u8; CONFIG_SPACE_SIZE];
        block[0x40] = 0x11;
        block[0x41] = 0x22;
        // remap wins; the override hook is never consulted
        assert_eq!(read_register(&mut dev, &block, false, 0x40), 0x22);
    }

    #[test]
    fn override_blends_stored_and_computed_bits() {
        let mut dev = Hooked::plain();
        dev.blend = Some((0x50, 0b1010_1010, 0b1111_0000));
        let mut block = [0u8; CONFIG_SPACE_SIZE];
        block[0x50] = 0b0101_0101;
        assert_eq!(
            read_register(&mut dev, &block, false, 0x50),
            0b1010_0101
        );
    }

    #[test]
    fn declined_hooks_fall_back_to_the_store() {
        let mut dev = Hooked::plain();
        let mut block = [0u8; CONFIG_SPACE_SIZE];
        block[0x60] = 0x5a;
        assert_eq!(read_register(&mut dev, &block, false, 0x60), 0x5a);
    }

    #[test]
    fn store_clears_every_block() {
        let mut space = ConfigSpace::new();
        space.block_mut(0, 0)[0x10] = 1;
        space.block_mut(MAX_SLOTS - 1, MAX_FUNCTIONS - 1)[0xff] = 2;
        space.clear();
        assert_eq!(space.block(0, 0)[0x10], 0);
        assert_eq!(space.block(MAX_SLOTS - 1, MAX_FUNCTIONS - 1)[0xff], 0);
    }
}
