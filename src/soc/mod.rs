//! System-on-Chip Components.
//!
//! This module implements the transaction fabric and the devices riding on
//! it. The fabric routes burst-framed request/response packets by address;
//! the devices (main memory, the DMA engine, the systolic accelerator, and
//! the scripted host-CPU port) consume packets from bounded inbound ports
//! and communicate exclusively by message passing over the fabric.

/// Per-transaction burst beat bookkeeping.
pub mod burst;

/// Scripted host-CPU master port.
pub mod cpu;

/// Device trait and the action/continuation model.
pub mod device;

/// DMA block-copy engine.
pub mod dma;

/// Address-decoded packet routing with backpressure.
pub mod fabric;

/// Byte-addressable main memory.
pub mod memory;

/// Packet variants, burst framing, and transaction-ID allocation.
pub mod packet;

/// Weight-stationary systolic matrix accelerator.
pub mod systolic;

/// System container and event loop.
pub mod builder;

pub use builder::System;
