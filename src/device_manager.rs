// Copyright 2019 Intel Corporation. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Port-I/O routing.
//!
//! [IoDispatcher](struct.IoDispatcher.html) maps port-address ranges to
//! handler devices and forwards the emulated CPU's IN/OUT traffic to
//! them. The PCI bus registers itself here for the configuration ports;
//! the dispatcher itself knows nothing about PCI.

use std::cmp::{Ord, Ordering, PartialEq, PartialOrd};
use std::collections::btree_map::BTreeMap;
use std::sync::{Arc, Mutex};

use log::trace;

use crate::{Error, Result};

/// Trait for devices that respond to port I/O.
///
/// The handler is invoked synchronously by the emulated I/O instruction
/// dispatcher with the absolute port number and the access width in
/// bytes (1, 2 or 4). Values wider than the access are truncated by the
/// caller.
pub trait PortIoDevice: Send {
    /// Handle an IN from `port`.
    fn pio_read(&mut self, port: u16, size: usize) -> u32;
    /// Handle an OUT of `value` to `port`.
    fn pio_write(&mut self, port: u16, value: u32, size: usize);
}

/// Port base and length pair describing a routed range.
#[derive(Debug, Copy, Clone, Eq)]
pub struct PortRange(pub u16, pub u16);

impl PortRange {
    fn contains(&self, port: u16) -> bool {
        port >= self.0 && u32::from(port) < u32::from(self.0) + u32::from(self.1)
    }

    fn overlaps(&self, other: &PortRange) -> bool {
        u32::from(self.0) < u32::from(other.0) + u32::from(other.1)
            && u32::from(other.0) < u32::from(self.0) + u32::from(self.1)
    }
}

impl PartialEq for PortRange {
    fn eq(&self, other: &PortRange) -> bool {
        self.0 == other.0
    }
}

impl Ord for PortRange {
    fn cmp(&self, other: &PortRange) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PortRange {
    fn partial_cmp(&self, other: &PortRange) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Routes port ranges to handler devices.
///
/// Ranges are disjoint; lookups are a bounded tree walk. Unrouted reads
/// return all-ones, unrouted writes are dropped, both matching what the
/// bus of a PC returns for floating ports.
#[derive(Default)]
pub struct IoDispatcher {
    pio_bus: BTreeMap<PortRange, Arc<Mutex<dyn PortIoDevice>>>,
}

impl IoDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        IoDispatcher {
            pio_bus: BTreeMap::new(),
        }
    }

    /// Route `len` ports starting at `base` to `dev`.
    pub fn register_pio(
        &mut self,
        base: u16,
        len: u16,
        dev: Arc<Mutex<dyn PortIoDevice>>,
    ) -> Result<()> {
        let range = PortRange(base, len);
        for existing in self.pio_bus.keys() {
            if existing.overlaps(&range) {
                return Err(Error::Overlap(base, base + len));
            }
        }
        self.pio_bus.insert(range, dev);
        Ok(())
    }

    /// Remove the handler whose range starts at `base`.
    pub fn unregister_pio(&mut self, base: u16) -> Result<()> {
        self.pio_bus
            .remove(&PortRange(base, 0))
            .map(|_| ())
            .ok_or(Error::NotRegistered(base))
    }

    fn resolve(&self, port: u16) -> Option<&Arc<Mutex<dyn PortIoDevice>>> {
        self.pio_bus
            .range(..=PortRange(port, 0))
            .next_back()
            .and_then(|(range, dev)| if range.contains(port) { Some(dev) } else { None })
    }

    /// Dispatch an IN instruction.
    pub fn pio_read(&self, port: u16, size: usize) -> u32 {
        match self.resolve(port) {
            Some(dev) => dev
                .lock()
                .expect("failed to acquire lock")
                .pio_read(port, size),
            None => {
                trace!("pio read from unrouted port {:#x}", port);
                !0
            }
        }
    }

    /// Dispatch an OUT instruction.
    pub fn pio_write(&self, port: u16, value: u32, size: usize) {
        match self.resolve(port) {
            Some(dev) => dev
                .lock()
                .expect("failed to acquire lock")
                .pio_write(port, value, size),
            None => trace!("pio write to unrouted port {:#x}", port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        last: u32,
    }

    impl PortIoDevice for Echo {
        fn pio_read(&mut self, _port: u16, _size: usize) -> u32 {
            self.last
        }

        fn pio_write(&mut self, _port: u16, value: u32, _size: usize) {
            self.last = value;
        }
    }

    #[test]
    fn route_and_dispatch() {
        let mut io = IoDispatcher::new();
        let dev = Arc::new(Mutex::new(Echo { last: 0 }));
        io.register_pio(0x1f0, 8, dev).unwrap();

        io.pio_write(0x1f3, 0xab, 1);
        assert_eq!(io.pio_read(0x1f0, 1), 0xab);
        // One past the range floats.
        assert_eq!(io.pio_read(0x1f8, 1), !0);
        io.pio_write(0x1f8, 0xcd, 1);
        assert_eq!(io.pio_read(0x1f0, 1), 0xab);
    }

    #[test]
    fn overlap_rejected() {
        let mut io = IoDispatcher::new();
        let a = Arc::new(Mutex::new(Echo { last: 0 }));
        let b = Arc::new(Mutex::new(Echo { last: 0 }));
        io.register_pio(0xcf8, 8, a).unwrap();
        assert!(matches!(
            io.register_pio(0xcfc, 4, b),
            Err(Error::Overlap(..))
        ));
    }

    #[test]
    fn unregister_restores_floating_port() {
        let mut io = IoDispatcher::new();
        let dev = Arc::new(Mutex::new(Echo { last: 0x42 }));
        io.register_pio(0x60, 1, dev).unwrap();
        assert_eq!(io.pio_read(0x60, 1), 0x42);

        io.unregister_pio(0x60).unwrap();
        assert_eq!(io.pio_read(0x60, 1), !0);
        assert!(matches!(io.unregister_pio(0x60), Err(Error::NotRegistered(_))));
    }
}
