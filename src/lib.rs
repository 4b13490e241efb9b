//! On-Chip Interconnect Simulator Library.
//!
//! This crate implements a cycle-level simulator of a small System-on-Chip
//! interconnect. A host CPU port, a DMA engine, and a systolic matrix
//! accelerator exchange memory-mapped, burst-framed transactions over a
//! shared fabric with a main-memory device.
//!
//! # Architecture
//!
//! * **Fabric**: address-decoded packet routing with bounded inbound ports,
//!   per-master pending queues, and transaction-ID correlation.
//! * **Devices**: byte-addressable main memory, a register-programmed DMA
//!   block-copy engine, and a weight-stationary systolic accelerator that
//!   stages its operands through the DMA engine.
//! * **Simulation**: single-threaded discrete-event scheduling with logical
//!   ticks; per-beat access latency and MMIO turnaround are modeled as
//!   deferred events.
//!
//! # Modules
//!
//! * `common`: shared types, constants, and error handling.
//! * `config`: configuration loading and parsing.
//! * `sim`: event scheduler and trace output.
//! * `soc`: fabric, packets, and device implementations.
//! * `stats`: simulation statistics collection.

/// Shared types, constants, and error handling.
///
/// Provides the fundamental data types (ticks, access widths, device and
/// transaction identifiers) and the fatal-error taxonomy used throughout
/// the simulator.
pub mod common;

/// Configuration system for the memory map, latencies, and tracing.
///
/// Loads and parses TOML configuration files to customize the simulated
/// system for different scenarios.
pub mod config;

/// Discrete-event simulation core.
///
/// Implements the logical-tick event scheduler and the optional Chrome
/// trace-event output.
pub mod sim;

/// System-on-Chip components: fabric, packets, and devices.
///
/// Implements the transaction fabric, the packet and burst framing model,
/// main memory, the DMA engine, the systolic accelerator, and the scripted
/// host-CPU port.
pub mod soc;

/// Simulation statistics collection and reporting.
///
/// Tracks tick counts, routed packets, burst and beat counts, and
/// per-device activity during simulation execution.
pub mod stats;
