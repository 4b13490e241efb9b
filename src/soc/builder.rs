//! System Builder and Event Loop.
//!
//! This module defines the `System` structure, which acts as the container
//! for all hardware components: the event queue, the transaction fabric,
//! the transaction-ID allocator, and the devices. It wires the system from
//! the provided configuration and drives the discrete-event loop.

use log::info;

use crate::common::{DeviceIndex, SimError, Tick};
use crate::config::Config;
use crate::sim::{EventQueue, TraceBuffer};
use crate::soc::cpu::HostCpu;
use crate::soc::device::{Action, DeviceContext, FabricDevice, LocalEvent};
use crate::soc::dma::DmaEngine;
use crate::soc::fabric::{AddressMap, RouteOutcome, TransactionFabric};
use crate::soc::memory::MemoryDevice;
use crate::soc::packet::{Packet, TidAllocator};
use crate::soc::systolic::SystolicAccelerator;
use crate::stats::SimStats;

/// Fabric index of the host-CPU port.
pub const HOST: DeviceIndex = DeviceIndex(0);
/// Fabric index of main memory.
pub const MEMORY: DeviceIndex = DeviceIndex(1);
/// Fabric index of the DMA engine.
pub const DMA: DeviceIndex = DeviceIndex(2);
/// Fabric index of the systolic accelerator.
pub const ACCEL: DeviceIndex = DeviceIndex(3);

const DEVICE_COUNT: usize = 4;

/// Length of each device's control window in bytes.
const MMIO_WINDOW_SIZE: u32 = 0x40;

/// One event in the system-level queue.
#[derive(Clone, Copy, Debug)]
enum SimEvent {
    /// Pop one packet from a device's inbound port and handle it.
    Drain(DeviceIndex),
    /// Fire a continuation a device scheduled for itself.
    Local {
        device: DeviceIndex,
        event: LocalEvent,
    },
}

/// The complete simulated system.
///
/// Owns the scheduler, the fabric, the transaction-ID allocator, every
/// device, the statistics counters, and the trace buffer.
pub struct System {
    queue: EventQueue<SimEvent>,
    fabric: TransactionFabric,
    devices: Vec<Box<dyn FabricDevice>>,
    tids: TidAllocator,
    pub stats: SimStats,
    pub trace: TraceBuffer,
}

impl System {
    /// Creates a new system instance with the specified configuration.
    ///
    /// Builds the address map (DMA control, accelerator control,
    /// accelerator SRAM; main memory as the default route), the fabric,
    /// and all devices.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::WindowOverlap`] if the configured windows
    /// collide.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let sys = &config.system;

        let mut map = AddressMap::new(MEMORY);
        map.add_window(sys.dma_base_val(), MMIO_WINDOW_SIZE, DMA)?;
        map.add_window(sys.accel_base_val(), MMIO_WINDOW_SIZE, ACCEL)?;
        map.add_window(
            sys.accel_sram_base_val(),
            sys.accel_sram_size_val() as u32,
            ACCEL,
        )?;

        let fabric = TransactionFabric::new(map, DEVICE_COUNT, sys.port_depth, sys.fabric_latency);

        let devices: Vec<Box<dyn FabricDevice>> = vec![
            Box::new(HostCpu::new(HOST, sys.poll_interval)),
            Box::new(MemoryDevice::new(
                MEMORY,
                0,
                sys.memory_size_val(),
                sys.memory_latency,
            )),
            Box::new(DmaEngine::new(DMA, sys.dma_base_val(), sys.mmio_latency)),
            Box::new(SystolicAccelerator::new(
                ACCEL,
                sys.accel_base_val(),
                sys.accel_sram_base_val(),
                sys.accel_sram_size_val(),
                sys.dma_base_val(),
                sys.mmio_latency,
            )),
        ];

        for (i, dev) in devices.iter().enumerate() {
            info!(
                "system: registered device {} as {}",
                dev.name(),
                DeviceIndex(i)
            );
        }

        Ok(Self {
            queue: EventQueue::new(),
            fabric,
            devices,
            tids: TidAllocator::new(),
            stats: SimStats::default(),
            trace: TraceBuffer::new(config.trace.enabled),
        })
    }

    /// Returns the current logical tick.
    pub fn now(&self) -> Tick {
        self.queue.now()
    }

    /// Returns the number of transaction IDs issued so far.
    pub fn tids_issued(&self) -> u64 {
        self.tids.issued()
    }

    /// Returns a view of the fabric for inspection.
    pub fn fabric(&self) -> &TransactionFabric {
        &self.fabric
    }

    /// Returns the main-memory device, if wired.
    pub fn memory_mut(&mut self) -> Option<&mut MemoryDevice> {
        self.devices[MEMORY.0].as_memory_mut()
    }

    /// Returns the DMA engine, if wired.
    pub fn dma_mut(&mut self) -> Option<&mut DmaEngine> {
        self.devices[DMA.0].as_dma_mut()
    }

    /// Returns the systolic accelerator, if wired.
    pub fn accel_mut(&mut self) -> Option<&mut SystolicAccelerator> {
        self.devices[ACCEL.0].as_accel_mut()
    }

    /// Returns the host-CPU port, if wired.
    pub fn cpu_mut(&mut self) -> Option<&mut HostCpu> {
        self.devices[HOST.0].as_cpu_mut()
    }

    /// Schedules a device continuation `delta` ticks from now.
    pub fn schedule_local(&mut self, device: DeviceIndex, delta: u64, event: LocalEvent) {
        self.queue
            .schedule_in(delta, SimEvent::Local { device, event });
    }

    /// Arms the host-CPU port to start executing its script.
    pub fn kick_cpu(&mut self) {
        self.schedule_local(HOST, 0, LocalEvent::CpuStep);
    }

    /// Runs events until the system goes idle.
    ///
    /// # Arguments
    ///
    /// * `max_ticks` - Tick budget; exceeding it is a fatal error so a
    ///   wedged simulation cannot spin forever.
    ///
    /// # Errors
    ///
    /// Propagates the first fatal device or protocol error, or
    /// [`SimError::Timeout`] when the budget is exhausted.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> Result<(), SimError> {
        while let Some((when, event)) = self.queue.pop() {
            self.stats.ticks = when;
            if when > max_ticks {
                return Err(SimError::Timeout(max_ticks));
            }
            self.dispatch(event)?;
        }
        Ok(())
    }

    /// Handles one event, applying every action it produces.
    fn dispatch(&mut self, event: SimEvent) -> Result<(), SimError> {
        let mut actions = Vec::new();
        match event {
            SimEvent::Drain(port) => {
                let Some(packet) = self.fabric.take_inbound(port) else {
                    return Ok(());
                };
                {
                    let mut ctx = DeviceContext::new(
                        self.queue.now(),
                        port,
                        &mut self.tids,
                        &mut self.stats,
                        &mut actions,
                    );
                    self.devices[port.0].handle_packet(packet, &mut ctx)?;
                }
                self.apply(actions)?;

                // the consumed slot may unblock queued masters
                let delivered = self.fabric.retry();
                self.stats.retries += delivered.len() as u64;
                for dst in delivered {
                    self.queue
                        .schedule_in(self.fabric.latency(), SimEvent::Drain(dst));
                }
                Ok(())
            }
            SimEvent::Local { device, event } => {
                {
                    let mut ctx = DeviceContext::new(
                        self.queue.now(),
                        device,
                        &mut self.tids,
                        &mut self.stats,
                        &mut actions,
                    );
                    self.devices[device.0].handle_event(event, &mut ctx)?;
                }
                self.apply(actions)
            }
        }
    }

    /// Applies the actions recorded by one handler invocation.
    fn apply(&mut self, actions: Vec<Action>) -> Result<(), SimError> {
        for action in actions {
            match action {
                Action::Submit(packet) | Action::Respond(packet) => self.route(packet)?,
                Action::Schedule {
                    device,
                    delta,
                    event,
                } => self
                    .queue
                    .schedule_in(delta, SimEvent::Local { device, event }),
            }
        }
        Ok(())
    }

    /// Routes one packet through the fabric, scheduling its delivery.
    fn route(&mut self, packet: Packet) -> Result<(), SimError> {
        let tid = packet.tid();
        let name = format!("{} {}", packet.origin(), packet.flow());
        self.stats.packets_routed += 1;
        match &packet {
            Packet::ReadRequest(_) => self.stats.read_bursts += 1,
            Packet::WriteRequest(_) => self.stats.write_bursts += 1,
            _ => self.stats.responses += 1,
        }
        if packet.is_request() {
            self.trace.begin(self.queue.now(), tid, &name);
        } else {
            self.trace.end(self.queue.now(), tid, &name);
        }

        match self.fabric.route(packet)? {
            RouteOutcome::Delivered(dst) => {
                self.queue
                    .schedule_in(self.fabric.latency(), SimEvent::Drain(dst));
            }
            RouteOutcome::Queued => {
                self.stats.queued += 1;
            }
        }
        Ok(())
    }
}
