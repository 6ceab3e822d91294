// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The PCI bus controller: latched configuration address, slot
//! registry, registration queue and the Configuration Mechanism #1 port
//! protocol.
//!
//! Configuration address layout, as latched through [`PCI_CONFIG_ADDRESS_PORT`]:
//!
//! ```text
//! 31    - set for a PCI access
//! 30-24 - 0
//! 23-16 - bus number            (0x00ff0000)
//! 15-11 - device number (slot)  (0x0000f800)
//! 10- 8 - subfunction number    (0x00000700)
//!  7- 2 - config register #     (0x000000fc)
//! ```
//!
//! Bits 1-0 of the register number come from the data-port offset, not
//! the latch.

use std::sync::{Arc, Mutex};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};
use vm_memory::GuestAddress;

use crate::device::PciDevice;
use crate::device_manager::{IoDispatcher, PortIoDevice};
use crate::pci_configuration::{self, ConfigSpace};
use crate::{Error, Result};

/// Number of device slots on the bus.
pub const MAX_SLOTS: usize = 32;
/// Number of functions multiplexed at one slot, primary included.
pub const MAX_FUNCTIONS: usize = 8;
/// Capacity of the pre-init registration queue.
pub const MAX_QUEUED_DEVICES: usize = 16;

/// Configuration address port (32-bit).
pub const PCI_CONFIG_ADDRESS_PORT: u16 = 0xcf8;
/// First of the four configuration data ports.
pub const PCI_CONFIG_DATA_PORT: u16 = 0xcfc;

// A data access is live only with the enable bit set and the bus
// number (plus the reserved bits above it) zero.
const CONFIG_GATE_MASK: u32 = 0x80ff_0000;
const CONFIG_GATE_VALUE: u32 = 0x8000_0000;

/// Fixed guest-physical address of the protected-mode entry trampoline,
/// in the BIOS callback region.
const PMODE_ENTRY_ADDRESS: GuestAddress = GuestAddress(0xf1a00);

/// One occupied slot: the primary function plus its subdevice chain.
struct PciSlot {
    primary: Arc<Mutex<dyn PciDevice>>,
    /// Functions 1..=7 in registration order. The primary is function 0
    /// and never appears here.
    subdevices: Vec<Arc<Mutex<dyn PciDevice>>>,
}

impl PciSlot {
    fn function(&self, fctnum: usize) -> Option<&Arc<Mutex<dyn PciDevice>>> {
        if fctnum >= MAX_FUNCTIONS {
            return None;
        }
        if fctnum == 0 {
            Some(&self.primary)
        } else {
            self.subdevices.get(fctnum - 1)
        }
    }
}

/// Bounded FIFO of devices registered before any bus existed.
///
/// The platform integrator owns one of these while bringing the machine
/// up; [`PciBus::with_queued`] drains it in order.
#[derive(Default)]
pub struct RegistrationQueue {
    devices: Vec<Arc<Mutex<dyn PciDevice>>>,
}

impl RegistrationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        RegistrationQueue {
            devices: Vec::with_capacity(MAX_QUEUED_DEVICES),
        }
    }

    /// Append a device, preserving arrival order.
    pub fn push(&mut self, dev: Arc<Mutex<dyn PciDevice>>) -> Result<()> {
        if self.devices.len() >= MAX_QUEUED_DEVICES {
            warn!("PCI registration queue full, rejecting device");
            return Err(Error::QueueFull);
        }
        self.devices.push(dev);
        Ok(())
    }

    /// Number of queued devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// The bus controller.
///
/// Owns the address latch, the slot registry and the configuration
/// store. Lifecycle is Uninitialized -> Initialized -> Deinitialized,
/// where deinitialized is indistinguishable from a fresh instance: all
/// port traffic resolves to the all-ones sentinel and the latch is
/// zero.
pub struct PciBus {
    initialized: bool,
    /// Last value written to the address port.
    config_address: u32,
    slots: Vec<Option<PciSlot>>,
    /// Count of occupied primary slots; also the next auto-allocated slot.
    installed: usize,
    cfg_space: ConfigSpace,
    pmode_entry: Option<GuestAddress>,
}

impl Default for PciBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PciBus {
    /// Create an uninitialized bus with an empty registry.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_SLOTS);
        slots.resize_with(MAX_SLOTS, || None);
        PciBus {
            initialized: false,
            config_address: 0,
            slots,
            installed: 0,
            cfg_space: ConfigSpace::new(),
            pmode_entry: None,
        }
    }

    /// Create a bus and immediately flush `queue` into it.
    ///
    /// Queued devices are registered in their original arrival order;
    /// the bus comes out initialized even when the queue was empty.
    pub fn with_queued(queue: RegistrationQueue) -> Result<Self> {
        let mut bus = PciBus::new();
        for dev in queue.devices {
            bus.register_device(dev, None)?;
        }
        bus.initialize();
        Ok(bus)
    }

    /// Whether the bus is between initialize and deinitialize.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Guest-physical address of the protected-mode entry trampoline,
    /// or `None` while the bus is down.
    pub fn pmode_entry_point(&self) -> Option<GuestAddress> {
        self.pmode_entry
    }

    /// Raw peek at a stored configuration byte, bypassing the access
    /// protocol. Identity and header-type synthesis do not apply here.
    pub fn config_byte(&self, slot: usize, function: usize, regnum: u8) -> Option<u8> {
        if slot >= MAX_SLOTS || function >= MAX_FUNCTIONS {
            return None;
        }
        Some(self.cfg_space.block(slot, function)[regnum as usize])
    }

    /// Transition to Initialized: clear the store and the latch, place
    /// the protected-mode trampoline. Port routing is the integrator's
    /// step, see [`pci_bus_init`].
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        debug!("initializing PCI bus");
        self.cfg_space.clear();
        self.config_address = 0;
        self.pmode_entry = Some(PMODE_ENTRY_ADDRESS);
        self.initialized = true;
    }

    /// Transition back to Uninitialized.
    ///
    /// Drops the registry without destroying device objects (their
    /// owners keep them alive), zeroes the store, the latch and the
    /// counters, and removes the trampoline.
    pub fn deinitialize(&mut self) {
        debug!("deinitializing PCI bus");
        self.initialized = false;
        self.installed = 0;
        self.config_address = 0;
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.cfg_space.clear();
        self.pmode_entry = None;
    }

    /// Register `dev`, auto-allocating the next free slot unless
    /// `slot` pins one. Returns the slot the device ended up in.
    ///
    /// An empty target slot makes the device the slot's primary
    /// (function 0); an occupied one appends it as the next subdevice.
    /// The device's initializer runs against the freshly zeroed block
    /// before the registration is accepted; a `false` return aborts it
    /// with the registry untouched. Registering on an uninitialized bus
    /// initializes it first.
    pub fn register_device(
        &mut self,
        dev: Arc<Mutex<dyn PciDevice>>,
        slot: Option<usize>,
    ) -> Result<usize> {
        if let Some(requested) = slot {
            // specific slot specified, basic check for validity
            if requested >= MAX_SLOTS {
                warn!("PCI slot {} requested, capacity {}", requested, MAX_SLOTS);
                return Err(Error::SlotOutOfRange(requested));
            }
        } else if self.installed >= MAX_SLOTS {
            warn!("no free PCI slot left");
            return Err(Error::BusFull);
        }

        if !self.initialized {
            self.initialize();
        }

        // use next slot unless a specific one was requested
        let slot = slot.unwrap_or(self.installed);
        // main device unless the slot is already occupied
        let subfunction = match self.slots[slot].as_ref() {
            None => 0,
            Some(entry) => {
                if entry.subdevices.len() >= MAX_FUNCTIONS - 1 {
                    warn!("slot {} already carries {} functions", slot, MAX_FUNCTIONS);
                    return Err(Error::TooManyFunctions(slot));
                }
                entry.subdevices.len() + 1
            }
        };

        {
            let mut locked = dev.lock().expect("failed to acquire lock");
            let block = self.cfg_space.block_mut(slot, subfunction);
            if !locked.initialize_registers(block) {
                let name = locked.name();
                warn!("device {:?} rejected register initialization", name);
                return Err(Error::DeviceInitFailed(name));
            }
            debug!(
                "registered PCI device {:?} at slot {} function {}",
                locked.name(),
                slot,
                subfunction
            );
        }

        match self.slots[slot].as_mut() {
            None => {
                self.slots[slot] = Some(PciSlot {
                    primary: dev,
                    subdevices: Vec::with_capacity(MAX_FUNCTIONS - 1),
                });
                self.installed += 1;
            }
            Some(entry) => entry.subdevices.push(dev),
        }

        Ok(slot)
    }

    /// Resolve the latch to a device handle plus its coordinates, or
    /// `None` for every silent-fallback condition of the protocol.
    fn resolve_data_access(&self) -> Option<(Arc<Mutex<dyn PciDevice>>, usize, usize, bool)> {
        if self.config_address & CONFIG_GATE_MASK != CONFIG_GATE_VALUE {
            return None;
        }
        let devnum = ((self.config_address >> 11) & 0x1f) as usize;
        let fctnum = ((self.config_address >> 8) & 0x7) as usize;
        if devnum >= self.installed {
            return None;
        }
        let entry = self.slots[devnum].as_ref()?;
        if fctnum > entry.subdevices.len() {
            return None;
        }
        let dev = entry.function(fctnum)?.clone();
        let multifunction = fctnum == 0 && !entry.subdevices.is_empty();
        Some((dev, devnum, fctnum, multifunction))
    }

    fn config_data_read(&mut self, port: u16, size: usize) -> u32 {
        let (dev, devnum, fctnum, multifunction) = match self.resolve_data_access() {
            Some(resolved) => resolved,
            None => return !0,
        };
        if !matches!(size, 1 | 2 | 4) {
            return !0;
        }
        let regnum = (self.config_address as u8 & 0xfc).wrapping_add((port & 0x03) as u8);
        trace!(
            "read from device {:#x} register {:#x} (function {:#x}); addr {:#x}",
            devnum,
            regnum,
            fctnum,
            self.config_address
        );

        let block = self.cfg_space.block(devnum, fctnum);
        let mut locked = dev.lock().expect("failed to acquire lock");
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().take(size).enumerate() {
            *byte = pci_configuration::read_register(
                &mut *locked,
                block,
                multifunction,
                regnum.wrapping_add(i as u8),
            );
        }
        match size {
            1 => u32::from(bytes[0]),
            2 => u32::from(LittleEndian::read_u16(&bytes)),
            _ => LittleEndian::read_u32(&bytes),
        }
    }

    fn config_data_write(&mut self, port: u16, value: u32, size: usize) {
        let (dev, devnum, fctnum, _) = match self.resolve_data_access() {
            Some(resolved) => resolved,
            None => return,
        };
        if !matches!(size, 1 | 2 | 4) {
            return;
        }
        let regnum = (self.config_address as u8 & 0xfc).wrapping_add((port & 0x03) as u8);
        trace!(
            "write to device {:#x} register {:#x} (function {:#x}) (:={:#x})",
            devnum,
            regnum,
            fctnum,
            value
        );

        let block = self.cfg_space.block_mut(devnum, fctnum);
        let mut locked = dev.lock().expect("failed to acquire lock");
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        for (i, byte) in bytes.iter().take(size).enumerate() {
            pci_configuration::write_register(
                &mut *locked,
                block,
                regnum.wrapping_add(i as u8),
                *byte,
            );
        }
    }
}

impl PortIoDevice for PciBus {
    fn pio_read(&mut self, port: u16, size: usize) -> u32 {
        if !self.initialized {
            return !0;
        }
        match port {
            PCI_CONFIG_ADDRESS_PORT..=0xcfb => {
                trace!("read PCI address -> {:#x}", self.config_address);
                self.config_address
            }
            PCI_CONFIG_DATA_PORT..=0xcff => self.config_data_read(port, size),
            _ => !0,
        }
    }

    fn pio_write(&mut self, port: u16, value: u32, size: usize) {
        if !self.initialized {
            return;
        }
        match port {
            PCI_CONFIG_ADDRESS_PORT..=0xcfb => {
                trace!("write PCI address := {:#x}", value);
                self.config_address = value;
            }
            PCI_CONFIG_DATA_PORT..=0xcff => self.config_data_write(port, value, size),
            _ => {}
        }
    }
}

/// Route the configuration ports to `bus` and bring it up.
pub fn pci_bus_init(io: &mut IoDispatcher, bus: &Arc<Mutex<PciBus>>) -> Result<()> {
    bus.lock().expect("failed to acquire lock").initialize();
    io.register_pio(PCI_CONFIG_ADDRESS_PORT, 8, bus.clone())
}

/// Take the bus down and release the configuration ports.
pub fn pci_bus_exit(io: &mut IoDispatcher, bus: &Arc<Mutex<PciBus>>) -> Result<()> {
    io.unregister_pio(PCI_CONFIG_ADDRESS_PORT)?;
    bus.lock().expect("failed to acquire lock").deinitialize();
    Ok(())
}
