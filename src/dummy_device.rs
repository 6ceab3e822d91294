// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A configurable stand-in device for exercising the bus.

use crate::device::{PciDevice, CONFIG_SPACE_SIZE};

/// Test device with every hook behavior settable from the outside.
///
/// The default instance passes writes through unchanged, declines both
/// read hooks and initializes nothing beyond a standard header type, so
/// reads after a write see exactly the stored byte.
pub struct DummyPciDevice {
    vendor: u16,
    device: u16,
    init_ok: bool,
    /// Bytes written into the block by the initializer.
    init_bytes: Vec<(u8, u8)>,
    /// Registers whose writes the write hook discards.
    discard: Vec<u8>,
    /// (from, to) register remaps applied by the read hook.
    remap: Vec<(u8, u8)>,
    /// (register, value, mask) blends applied by the override hook.
    overrides: Vec<(u8, u8, u8)>,
}

impl DummyPciDevice {
    /// Create a pass-through device with the given identity.
    pub fn new(vendor: u16, device: u16) -> Self {
        DummyPciDevice {
            vendor,
            device,
            init_ok: true,
            init_bytes: Vec::new(),
            discard: Vec::new(),
            remap: Vec::new(),
            overrides: Vec::new(),
        }
    }

    /// Make the initializer report failure.
    pub fn failing_init(mut self) -> Self {
        self.init_ok = false;
        self
    }

    /// Bytes the initializer stores into the zeroed block.
    pub fn with_init_bytes(mut self, bytes: &[(u8, u8)]) -> Self {
        self.init_bytes = bytes.to_vec();
        self
    }

    /// Registers whose writes are discarded.
    pub fn with_discard(mut self, regs: &[u8]) -> Self {
        self.discard = regs.to_vec();
        self
    }

    /// Read remaps, as (from, to) pairs.
    pub fn with_remap(mut self, remaps: &[(u8, u8)]) -> Self {
        self.remap = remaps.to_vec();
        self
    }

    /// Override blends, as (register, value, mask) triples.
    pub fn with_override(mut self, overrides: &[(u8, u8, u8)]) -> Self {
        self.overrides = overrides.to_vec();
        self
    }
}

impl PciDevice for DummyPciDevice {
    fn name(&self) -> String {
        String::from("Dummy Pci")
    }

    fn vendor_id(&self) -> u16 {
        self.vendor
    }

    fn device_id(&self) -> u16 {
        self.device
    }

    fn initialize_registers(&mut self, registers: &mut [u8; CONFIG_SPACE_SIZE]) -> bool {
        if !self.init_ok {
            return false;
        }
        for &(reg, value) in &self.init_bytes {
            registers[reg as usize] = value;
        }
        true
    }

    fn parse_write_register(&mut self, regnum: u8, value: u8) -> Option<u8> {
        if self.discard.contains(&regnum) {
            None
        } else {
            Some(value)
        }
    }

    fn parse_read_register(&mut self, regnum: u8) -> Option<u8> {
        self.remap
            .iter()
            .find(|(from, _)| *from == regnum)
            .map(|&(_, to)| to)
    }

    fn override_read_register(&mut self, regnum: u8) -> Option<(u8, u8)> {
        self.overrides
            .iter()
            .find(|(reg, _, _)| *reg == regnum)
            .map(|&(_, value, mask)| (value, mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci_bus::{PciBus, PCI_CONFIG_DATA_PORT};
    use crate::device_manager::PortIoDevice;
    use std::sync::{Arc, Mutex};

    fn one_device_bus(dev: DummyPciDevice) -> PciBus {
        let mut bus = PciBus::new();
        bus.register_device(Arc::new(Mutex::new(dev)), Some(0)).unwrap();
        bus
    }

    #[test]
    fn discard_leaves_prior_byte() {
        let dev = DummyPciDevice::new(0x10ec, 0x8139)
            .with_init_bytes(&[(0x40, 0x5a)])
            .with_discard(&[0x40]);
        let mut bus = one_device_bus(dev);

        bus.pio_write(0xcf8, 0x8000_0040, 4);
        bus.pio_write(PCI_CONFIG_DATA_PORT, 0xff, 1);
        assert_eq!(bus.pio_read(PCI_CONFIG_DATA_PORT, 1), 0x5a);
        // the neighboring byte in the same dword still takes writes
        bus.pio_write(PCI_CONFIG_DATA_PORT + 1, 0x77, 1);
        assert_eq!(bus.pio_read(PCI_CONFIG_DATA_PORT + 1, 1), 0x77);
    }

    #[test]
    fn remap_redirects_the_stored_read() {
        let dev = DummyPciDevice::new(0x10ec, 0x8139)
            .with_init_bytes(&[(0x40, 0x11), (0x44, 0x22)])
            .with_remap(&[(0x40, 0x44)]);
        let mut bus = one_device_bus(dev);

        bus.pio_write(0xcf8, 0x8000_0040, 4);
        assert_eq!(bus.pio_read(PCI_CONFIG_DATA_PORT, 1), 0x22);
    }

    #[test]
    fn override_synthesizes_high_bits() {
        let dev = DummyPciDevice::new(0x10ec, 0x8139)
            .with_init_bytes(&[(0x50, 0x0f)])
            .with_override(&[(0x50, 0xf0, 0xf0)]);
        let mut bus = one_device_bus(dev);

        bus.pio_write(0xcf8, 0x8000_0050, 4);
        assert_eq!(bus.pio_read(PCI_CONFIG_DATA_PORT, 1), 0xff);
    }

    #[test]
    fn identity_beats_stored_and_hooked_bytes() {
        // even a device that stored garbage over its ID bytes and
        // remaps reads of them answers with the constructed identity
        let dev = DummyPciDevice::new(0x8086, 0x1237)
            .with_init_bytes(&[(0x00, 0xde), (0x01, 0xad), (0x02, 0xbe), (0x03, 0xef)])
            .with_remap(&[(0x00, 0x40), (0x02, 0x40)]);
        let mut bus = one_device_bus(dev);

        bus.pio_write(0xcf8, 0x8000_0000, 4);
        assert_eq!(bus.pio_read(PCI_CONFIG_DATA_PORT, 4), 0x1237_8086);
    }
}
