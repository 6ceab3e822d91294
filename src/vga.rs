// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! An S3 Trio64-style display controller, the reference client of the
//! device contract.
//!
//! The interesting part is the write hook: the guest may poke the BAR
//! bytes, but the card only honors the lanes that select an aperture
//! inside its fixed windows. Everything the hardware hard-wires is
//! forced back to the value the card was built with.

use crate::device::{PciDevice, CONFIG_SPACE_SIZE};

/// Guest-physical base of the linear framebuffer aperture.
pub const S3_LFB_BASE: u32 = 0xe000_0000;
/// The MMIO window sits 16 MiB above the framebuffer.
pub const S3_MMIO_OFFSET: u32 = 0x0100_0000;

const VENDOR_S3: u16 = 0x5333;
const DEVICE_TRIO64: u16 = 0x8811;

/// S3 Trio64 display controller function.
pub struct S3VgaDevice {
    lfb_base: u32,
}

impl Default for S3VgaDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl S3VgaDevice {
    /// Create the card with its framebuffer at [`S3_LFB_BASE`].
    pub fn new() -> Self {
        S3VgaDevice {
            lfb_base: S3_LFB_BASE & 0xffff_fff0,
        }
    }
}

impl PciDevice for S3VgaDevice {
    fn name(&self) -> String {
        String::from("S3 Trio64")
    }

    fn vendor_id(&self) -> u16 {
        VENDOR_S3
    }

    fn device_id(&self) -> u16 {
        DEVICE_TRIO64
    }

    fn initialize_registers(&mut self, registers: &mut [u8; CONFIG_SPACE_SIZE]) -> bool {
        registers[0x08] = 0x00; // revision ID
        registers[0x09] = 0x00; // interface
        registers[0x0a] = 0x00; // subclass type (vga compatible)
        registers[0x0b] = 0x03; // class type (display controller)
        registers[0x0c] = 0x00; // cache line size
        registers[0x0d] = 0x00; // latency timer
        registers[0x0e] = 0x00; // header type (other)

        registers[0x04] = 0x23; // command register (vga palette snoop, ports enabled, memory space enabled)
        registers[0x05] = 0x00;
        registers[0x06] = 0x80; // status register (medium timing, fast back-to-back)
        registers[0x07] = 0x02;

        // base address 0: the linear framebuffer, memory space, within
        // the first 4GB
        registers[0x10..0x14].copy_from_slice(&self.lfb_base.to_le_bytes());
        // base address 1: the MMIO window
        let mmio = (self.lfb_base + S3_MMIO_OFFSET) & 0xffff_fff0;
        registers[0x14..0x18].copy_from_slice(&mmio.to_le_bytes());

        true
    }

    fn parse_write_register(&mut self, regnum: u8, value: u8) -> Option<u8> {
        if (0x18..0x28).contains(&regnum) {
            return None; // base addresses 2..5 are read-only
        }
        if (0x30..0x34).contains(&regnum) {
            return None; // expansion rom address is read-only
        }
        match regnum {
            // BAR0: address bits are hard-wired, only the flag nibble of
            // the built-in base survives
            0x10 => Some(self.lfb_base as u8 & 0x0f),
            0x11 => Some(0x00),
            0x12 => Some(0x00), // 16mb addressable
            0x13 => Some(value),
            // BAR1: same flag nibble source as BAR0
            0x14 => Some(self.lfb_base as u8 & 0x0f),
            0x15 => Some(0x00),
            0x16 => Some(value), // 64kb addressable
            0x17 => Some(value),
            _ => Some(value),
        }
    }

    fn parse_read_register(&mut self, regnum: u8) -> Option<u8> {
        // every register reads straight from the store; the override
        // hook is never consulted
        Some(regnum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_manager::PortIoDevice;
    use crate::pci_bus::{PciBus, PCI_CONFIG_DATA_PORT};
    use std::sync::{Arc, Mutex};

    fn vga_bus() -> PciBus {
        let mut bus = PciBus::new();
        bus.register_device(Arc::new(Mutex::new(S3VgaDevice::new())), Some(0))
            .unwrap();
        bus
    }

    fn read_dword(bus: &mut PciBus, reg: u32) -> u32 {
        bus.pio_write(0xcf8, 0x8000_0000 | (reg & 0xfc), 4);
        bus.pio_read(PCI_CONFIG_DATA_PORT, 4)
    }

    #[test]
    fn identity_dword() {
        let mut bus = vga_bus();
        assert_eq!(read_dword(&mut bus, 0x00), 0x8811_5333);
    }

    #[test]
    fn class_code_marks_a_display_controller() {
        let mut bus = vga_bus();
        assert_eq!(read_dword(&mut bus, 0x08), 0x0300_0000);
    }

    #[test]
    fn command_and_status_block() {
        let mut bus = vga_bus();
        assert_eq!(read_dword(&mut bus, 0x04), 0x0280_0023);
    }

    #[test]
    fn framebuffer_bar_is_pinned() {
        let mut bus = vga_bus();
        assert_eq!(read_dword(&mut bus, 0x10), S3_LFB_BASE);

        // BAR sizing probe: all-ones write must not move the aperture
        bus.pio_write(0xcf8, 0x8000_0010, 4);
        bus.pio_write(PCI_CONFIG_DATA_PORT, 0xffff_ffff, 4);
        let bar0 = read_dword(&mut bus, 0x10);
        // bytes 0..2 are hard-wired, byte 3 takes the write
        assert_eq!(bar0 & 0x00ff_ffff, 0x0000_0000);
        assert_eq!(bar0 & 0xff00_0000, 0xff00_0000);
    }

    #[test]
    fn upper_bars_and_rom_are_read_only() {
        let mut bus = vga_bus();
        for reg in [0x18u32, 0x1c, 0x20, 0x24, 0x30] {
            bus.pio_write(0xcf8, 0x8000_0000 | reg, 4);
            bus.pio_write(PCI_CONFIG_DATA_PORT, 0xffff_ffff, 4);
            assert_eq!(read_dword(&mut bus, reg), 0, "register {:#x}", reg);
        }
    }

    #[test]
    fn mmio_bar_follows_the_framebuffer() {
        let mut bus = vga_bus();
        assert_eq!(read_dword(&mut bus, 0x14), S3_LFB_BASE + S3_MMIO_OFFSET);
    }
}
