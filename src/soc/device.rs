//! Device Trait and Continuation Model.
//!
//! This module defines the common interface implemented by every component
//! attached to the fabric. A device reacts to two stimuli: a packet
//! delivered from its inbound port, and a continuation event it previously
//! scheduled for itself. Handlers run to completion and record their side
//! effects (packets to route, events to schedule) in a [`DeviceContext`],
//! which the system applies after the handler returns.

use crate::common::{DeviceIndex, SimError, Tick, TransactionId};
use crate::soc::cpu::HostCpu;
use crate::soc::dma::DmaEngine;
use crate::soc::memory::MemoryDevice;
use crate::soc::packet::{Packet, TidAllocator};
use crate::soc::systolic::SystolicAccelerator;
use crate::stats::SimStats;

/// A continuation a device schedules for itself at a later tick.
///
/// Deferred events are the only suspension mechanism: a component that
/// cannot finish its work this tick schedules one of these instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalEvent {
    /// Service beat `index` of the buffered transaction `tid`, modeling
    /// per-beat access latency.
    ServiceBeat { tid: TransactionId, index: usize },
    /// Advance the DMA transfer state machine.
    DmaAdvance,
    /// Issue a DONE-polling read of the DMA engine.
    AccelPoll,
    /// Issue the next scripted host-CPU operation.
    CpuStep,
}

/// A side effect recorded while handling a packet or event.
#[derive(Debug)]
pub enum Action {
    /// Submit a new request onto the fabric; the destination is resolved
    /// by address decode.
    Submit(Packet),
    /// Return an assembled response toward its originator.
    Respond(Packet),
    /// Schedule a continuation for the issuing device.
    Schedule {
        device: DeviceIndex,
        delta: u64,
        event: LocalEvent,
    },
}

/// Handler-scoped view of the system offered to a device.
///
/// Carries the current tick, the transaction-ID allocator for new
/// requests, and the statistics counters; collects the handler's actions.
pub struct DeviceContext<'a> {
    pub now: Tick,
    pub device: DeviceIndex,
    pub tids: &'a mut TidAllocator,
    pub stats: &'a mut SimStats,
    actions: &'a mut Vec<Action>,
}

impl<'a> DeviceContext<'a> {
    /// Creates a context for one handler invocation.
    pub fn new(
        now: Tick,
        device: DeviceIndex,
        tids: &'a mut TidAllocator,
        stats: &'a mut SimStats,
        actions: &'a mut Vec<Action>,
    ) -> Self {
        Self {
            now,
            device,
            tids,
            stats,
            actions,
        }
    }

    /// Submits a request onto the fabric.
    pub fn submit(&mut self, packet: Packet) {
        self.actions.push(Action::Submit(packet));
    }

    /// Returns a response toward its originator.
    pub fn respond(&mut self, packet: Packet) {
        self.actions.push(Action::Respond(packet));
    }

    /// Schedules a continuation for this device at `now + delta`.
    pub fn schedule(&mut self, delta: u64, event: LocalEvent) {
        self.actions.push(Action::Schedule {
            device: self.device,
            delta,
            event,
        });
    }
}

/// Trait for components attached to the transaction fabric.
///
/// All cross-component coordination happens by message passing over the
/// fabric; a device never mutates another device's state directly.
pub trait FabricDevice {
    /// Returns the user-friendly name of the device.
    fn name(&self) -> &str;

    /// Handles one packet popped from the device's inbound port.
    fn handle_packet(&mut self, packet: Packet, ctx: &mut DeviceContext) -> Result<(), SimError>;

    /// Handles a continuation previously scheduled by this device.
    fn handle_event(&mut self, event: LocalEvent, ctx: &mut DeviceContext) -> Result<(), SimError>;

    /// Downcasts to the main-memory device, if applicable.
    ///
    /// Used by the system to expose scenario setup and test inspection.
    fn as_memory_mut(&mut self) -> Option<&mut MemoryDevice> {
        None
    }

    /// Downcasts to the DMA engine, if applicable.
    fn as_dma_mut(&mut self) -> Option<&mut DmaEngine> {
        None
    }

    /// Downcasts to the systolic accelerator, if applicable.
    fn as_accel_mut(&mut self) -> Option<&mut SystolicAccelerator> {
        None
    }

    /// Downcasts to the host-CPU port, if applicable.
    fn as_cpu_mut(&mut self) -> Option<&mut HostCpu> {
        None
    }
}
