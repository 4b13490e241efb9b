//! Fatal Error Taxonomy.
//!
//! Every condition outside transient port backpressure indicates a design
//! or test defect and halts the simulation. Errors fall into three groups:
//! protocol violations observed on the fabric, configuration errors caught
//! when a device is programmed, and bounds errors on device storage.

use thiserror::Error;

use crate::common::data::{DeviceIndex, TransactionId};

/// Fatal simulation error.
///
/// There is no partial-failure or recovery path: these abort the run with
/// a diagnostic. Backpressure is handled by the fabric's pending queues
/// and never surfaces as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// A burst was framed with a beat count outside {1, 2, 4}.
    #[error("unsupported burst of {0} beats (must be 1, 2, or 4)")]
    InvalidBurstLength(usize),

    /// A request's payload length disagrees with its burst encoding.
    #[error("{tid}: burst encodes {expected} beats but carries {actual}")]
    BurstPayloadMismatch {
        tid: TransactionId,
        expected: usize,
        actual: usize,
    },

    /// A response arrived whose transaction ID matches no outstanding request.
    #[error("{device}: response for unknown transaction {tid}")]
    UnknownTransaction {
        device: DeviceIndex,
        tid: TransactionId,
    },

    /// A packet variant reached a receiver that cannot service it.
    #[error("{device}: cannot service {kind} packet")]
    UnexpectedPacket {
        device: DeviceIndex,
        kind: &'static str,
    },

    /// An access fell outside a device's backing extent.
    #[error("{device}: access of {bytes} bytes at {addr:#010x} out of range")]
    OutOfRange {
        device: DeviceIndex,
        addr: u32,
        bytes: u32,
    },

    /// A read or write targeted an offset with no register behind it.
    #[error("{device}: no register at offset {offset:#x}")]
    InvalidRegister { device: DeviceIndex, offset: u32 },

    /// An SRAM base address violates the word-alignment requirement.
    #[error("misaligned SRAM address {0:#010x} (must be 4-byte aligned)")]
    MisalignedAddress(u32),

    /// An operand matrix does not fit the fixed on-chip capacity.
    #[error("operand matrix of {elements} elements exceeds capacity {capacity}")]
    CapacityExceeded { elements: u32, capacity: u32 },

    /// The accelerator was enabled before its operand sizes were set.
    #[error("accelerator enabled with unprogrammed operand dimensions")]
    UnconfiguredOperands,

    /// Two address windows overlap in the fabric's decode map.
    #[error("address window {base:#010x}+{size:#x} overlaps an existing window")]
    WindowOverlap { base: u32, size: u32 },

    /// The scripted run did not settle within its tick budget.
    #[error("simulation still active after {0} ticks")]
    Timeout(u64),
}
