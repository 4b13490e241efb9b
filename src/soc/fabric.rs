//! Transaction Fabric.
//!
//! This module implements the shared interconnect, which routes packets to
//! the appropriate devices based on the physical address map. It validates
//! burst framing, manages bounded per-device inbound ports, and absorbs
//! backpressure in per-master pending queues with order-preserving retry.

use std::collections::VecDeque;

use log::debug;

use crate::common::{DeviceIndex, SimError};
use crate::soc::packet::Packet;

/// One decoded region of the 32-bit address space.
#[derive(Clone, Copy, Debug)]
pub struct AddressWindow {
    /// First address covered by the window.
    pub base: u32,
    /// Window length in bytes.
    pub size: u32,
    /// Device the window routes to.
    pub device: DeviceIndex,
}

impl AddressWindow {
    /// Returns `true` if `addr` falls inside the window.
    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && (addr - self.base) < self.size
    }

    /// Returns `true` if two windows share any address.
    fn overlaps(&self, other: &AddressWindow) -> bool {
        self.base < other.base.saturating_add(other.size)
            && other.base < self.base.saturating_add(self.size)
    }
}

/// Static partition of the address space into device regions.
///
/// Lookup is range containment; windows may not overlap. An address
/// outside every window routes to the default device (main memory).
#[derive(Clone, Debug)]
pub struct AddressMap {
    windows: Vec<AddressWindow>,
    default_device: DeviceIndex,
}

impl AddressMap {
    /// Creates a map whose fallback route is `default_device`.
    pub fn new(default_device: DeviceIndex) -> Self {
        Self {
            windows: Vec::new(),
            default_device,
        }
    }

    /// Registers a device window.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::WindowOverlap`] if the new window shares any
    /// address with an existing one.
    pub fn add_window(
        &mut self,
        base: u32,
        size: u32,
        device: DeviceIndex,
    ) -> Result<(), SimError> {
        let window = AddressWindow { base, size, device };
        if self.windows.iter().any(|w| w.overlaps(&window)) {
            return Err(SimError::WindowOverlap { base, size });
        }
        self.windows.push(window);
        Ok(())
    }

    /// Resolves an address to its destination device.
    pub fn decode(&self, addr: u32) -> DeviceIndex {
        for window in &self.windows {
            if window.contains(addr) {
                return window.device;
            }
        }
        self.default_device
    }
}

/// Result of routing one packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The packet entered the destination's inbound port.
    Delivered(DeviceIndex),
    /// The destination port was full; the packet waits in its master's
    /// pending queue until the port reports ready.
    Queued,
}

/// Address-routed packet switch with per-port backpressure.
///
/// Each attached device owns a bounded inbound port. A master whose
/// packet finds the destination port full has the packet stored in its
/// own pending queue; [`TransactionFabric::retry`] delivers queued
/// packets exactly once, in original submission order per master, when
/// capacity returns.
pub struct TransactionFabric {
    map: AddressMap,
    latency: u64,
    port_depth: usize,
    ports: Vec<VecDeque<Packet>>,
    pending: Vec<VecDeque<Packet>>,
}

impl TransactionFabric {
    /// Creates a fabric for `device_count` attached devices.
    ///
    /// # Arguments
    ///
    /// * `map` - Address decode map for request routing.
    /// * `device_count` - Number of attached devices (ports and pending
    ///   queues are indexed by [`DeviceIndex`]).
    /// * `port_depth` - Capacity of each inbound port.
    /// * `latency` - Delivery latency in ticks for one fabric hop.
    pub fn new(map: AddressMap, device_count: usize, port_depth: usize, latency: u64) -> Self {
        Self {
            map,
            latency,
            port_depth,
            ports: (0..device_count).map(|_| VecDeque::new()).collect(),
            pending: (0..device_count).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Returns the per-hop delivery latency in ticks.
    pub fn latency(&self) -> u64 {
        self.latency
    }

    /// Routes one packet toward its destination.
    ///
    /// Requests are decoded by the address of their first beat; responses
    /// carry their destination. The packet enters the destination's
    /// inbound port if it has capacity, otherwise it is stored in the
    /// submitting master's pending queue.
    ///
    /// # Errors
    ///
    /// Burst framing is validated here: a beat count outside {1, 2, 4} or
    /// a payload disagreeing with the encoded burst length is a fatal
    /// protocol violation. A response without a destination is likewise
    /// fatal.
    pub fn route(&mut self, mut packet: Packet) -> Result<RouteOutcome, SimError> {
        packet.validate()?;

        let dst = match packet.route_addr() {
            Some(addr) => {
                let dst = self.map.decode(addr);
                packet.set_dst(dst);
                dst
            }
            None => packet.dst().ok_or(SimError::UnexpectedPacket {
                device: packet.src(),
                kind: "unrouted response",
            })?,
        };

        // a master with queued packets keeps program order: later packets
        // line up behind the head even when their own port has room
        let blocked = !self.pending[packet.src().0].is_empty();
        if !blocked && self.ports[dst.0].len() < self.port_depth {
            debug!(
                "fabric: {} {} from {} delivered to {}",
                packet.kind(),
                packet.tid(),
                packet.src(),
                dst
            );
            self.ports[dst.0].push_back(packet);
            Ok(RouteOutcome::Delivered(dst))
        } else {
            debug!(
                "fabric: {} {} from {} queued (port {} full)",
                packet.kind(),
                packet.tid(),
                packet.src(),
                dst
            );
            let src = packet.src();
            self.pending[src.0].push_back(packet);
            Ok(RouteOutcome::Queued)
        }
    }

    /// Pops the next packet from a device's inbound port.
    pub fn take_inbound(&mut self, port: DeviceIndex) -> Option<Packet> {
        self.ports[port.0].pop_front()
    }

    /// Delivers pending packets after a port regained capacity.
    ///
    /// Masters are scanned in index order and only the head of each
    /// pending queue is eligible, so a master's packets can never
    /// overtake each other; a head released to its port immediately
    /// unblocks the packet behind it. Returns the destination port of
    /// each packet delivered (each needs one delivery event).
    pub fn retry(&mut self) -> Vec<DeviceIndex> {
        let mut delivered = Vec::new();
        for master in 0..self.pending.len() {
            loop {
                let dst = match self.pending[master].front().and_then(|p| p.dst()) {
                    Some(dst) => dst,
                    None => break,
                };
                if self.ports[dst.0].len() >= self.port_depth {
                    break;
                }
                match self.pending[master].pop_front() {
                    Some(packet) => {
                        debug!(
                            "fabric: retry delivered {} {} to {}",
                            packet.kind(),
                            packet.tid(),
                            dst
                        );
                        self.ports[dst.0].push_back(packet);
                        delivered.push(dst);
                    }
                    None => break,
                }
            }
        }
        delivered
    }

    /// Returns the number of packets waiting in a master's pending queue.
    pub fn pending_len(&self, master: DeviceIndex) -> usize {
        self.pending[master.0].len()
    }

    /// Returns the number of packets sitting in a device's inbound port.
    pub fn inbound_len(&self, port: DeviceIndex) -> usize {
        self.ports[port.0].len()
    }

    /// Returns `true` if no packet is in flight anywhere in the fabric.
    pub fn is_drained(&self) -> bool {
        self.ports.iter().all(VecDeque::is_empty) && self.pending.iter().all(VecDeque::is_empty)
    }
}
