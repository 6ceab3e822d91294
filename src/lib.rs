// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Emulation of the PCI configuration-space access mechanism used by x86
//! platforms (Configuration Mechanism #1).
//!
//! A pair of I/O ports (0xCF8 address, 0xCFC..0xCFF data) lets guest
//! software address a 256-byte configuration register file per
//! device/function on bus 0 and access it a byte, word or dword at a time.
//!
//! The pieces and how they relate:
//! - [`PciDevice`]: the contract a concrete device implements to expose a
//!   configuration space. Identity accessors plus four hooks that let the
//!   device populate its register block and intercept per-byte accesses.
//! - [`ConfigSpace`]: the backing store, one 256-byte block per
//!   (slot, function) pair.
//! - [`PciBus`]: the bus controller. Owns the latched configuration
//!   address, the slot registry and the store; decodes data-port accesses
//!   and drives the register access protocol.
//! - [`IoDispatcher`]: routes port-address ranges to handlers. The bus
//!   registers itself here for the config ports; everything else on the
//!   platform I/O map is somebody else's business.

pub mod device;
pub use device::{PciDevice, CONFIG_SPACE_SIZE};

pub mod device_manager;
pub use device_manager::{IoDispatcher, PortIoDevice};

pub mod pci_configuration;
pub use pci_configuration::ConfigSpace;

pub mod pci_bus;
pub use pci_bus::{
    pci_bus_init, pci_bus_exit, PciBus, RegistrationQueue, MAX_FUNCTIONS, MAX_QUEUED_DEVICES,
    MAX_SLOTS, PCI_CONFIG_ADDRESS_PORT, PCI_CONFIG_DATA_PORT,
};

pub mod dummy_device;
pub mod vga;

/// Errors raised while assembling the device roster or wiring up ports.
///
/// Probing empty bus locations is not an error: those accesses resolve to
/// the all-ones sentinel inside the dispatch path and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Explicitly requested slot is beyond the bus capacity.
    #[error("slot {0} out of range, max {}", MAX_SLOTS - 1)]
    SlotOutOfRange(usize),
    /// No free slot left for auto-allocation.
    #[error("all {} PCI slots are occupied", MAX_SLOTS)]
    BusFull,
    /// The target slot already carries the maximum number of functions.
    #[error("slot {0} already carries {} functions", MAX_FUNCTIONS)]
    TooManyFunctions(usize),
    /// The device's register initializer reported failure.
    #[error("device {0:?} rejected register initialization")]
    DeviceInitFailed(String),
    /// The pre-init registration queue is full.
    #[error("registration queue full, capacity {}", MAX_QUEUED_DEVICES)]
    QueueFull,
    /// The port range overlaps an already-registered handler.
    #[error("port range {0:#x}..{1:#x} overlaps an existing handler")]
    Overlap(u16, u16),
    /// No handler registered for the port range being removed.
    #[error("no handler registered at port {0:#x}")]
    NotRegistered(u16),
}

/// Specialized `Result` for bus and dispatcher operations.
pub type Result<T> = std::result::Result<T, Error>;
