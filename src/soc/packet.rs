//! Fabric Packets and Burst Framing.
//!
//! This module defines the unit of fabric traffic. A packet is one of four
//! closed variants (read/write request, read/write response) carrying a
//! burst of 1, 2, or 4 beats under a single transaction ID. Requests are
//! routed by the address of their first beat; responses carry the index of
//! the device they return to.
//!
//! Transaction IDs come from an explicit [`TidAllocator`] owned by the
//! system and lent to packet constructors, so tests can assert ID
//! sequencing deterministically. Retried packets keep their original ID.

use crate::common::{AccessWidth, DeviceIndex, SimError, TransactionId};

/// Burst length of a packet, encoded as log2 of the beat count.
///
/// Only 1, 2, and 4 beats are representable; any other beat count is a
/// protocol violation rejected at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BurstLen {
    /// One beat.
    Single,
    /// Two beats.
    Double,
    /// Four beats.
    Quad,
}

impl BurstLen {
    /// Derives the burst encoding for a beat count.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidBurstLength`] for counts outside {1, 2, 4}.
    pub fn from_beats(beats: usize) -> Result<Self, SimError> {
        match beats {
            1 => Ok(BurstLen::Single),
            2 => Ok(BurstLen::Double),
            4 => Ok(BurstLen::Quad),
            n => Err(SimError::InvalidBurstLength(n)),
        }
    }

    /// Returns the log2-encoded burst length carried on the wire.
    pub fn log2(self) -> u8 {
        match self {
            BurstLen::Single => 0,
            BurstLen::Double => 1,
            BurstLen::Quad => 2,
        }
    }

    /// Returns the number of beats in the burst.
    pub fn beats(self) -> usize {
        1 << self.log2()
    }
}

/// Monotonic transaction-ID source.
///
/// IDs are assigned when a new (non-retried) packet is constructed and are
/// never reused, so an ID can always be correlated with at most one
/// outstanding transaction.
#[derive(Debug, Default)]
pub struct TidAllocator {
    next: u64,
}

impl TidAllocator {
    /// Creates an allocator starting at ID zero.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Hands out the next transaction ID.
    pub fn allocate(&mut self) -> TransactionId {
        let tid = TransactionId(self.next);
        self.next += 1;
        tid
    }

    /// Returns the number of IDs issued so far.
    pub fn issued(&self) -> u64 {
        self.next
    }
}

/// One beat of a read request: where to load from and how wide.
///
/// `meta` is an opaque originator field echoed back on the matching
/// response beat; the DMA engine uses it to address its staging buffer and
/// the accelerator uses it to tag DONE-polling reads.
#[derive(Clone, Copy, Debug)]
pub struct ReadBeat {
    pub width: AccessWidth,
    pub addr: u32,
    pub meta: u32,
}

/// One beat of a write request: destination, width, and data.
#[derive(Clone, Copy, Debug)]
pub struct WriteBeat {
    pub width: AccessWidth,
    pub addr: u32,
    pub data: u32,
}

/// One beat of a read response: the loaded value plus the echoed meta.
#[derive(Clone, Copy, Debug)]
pub struct ReadData {
    pub width: AccessWidth,
    pub data: u32,
    pub meta: u32,
}

/// A burst of read beats issued by a master.
#[derive(Clone, Debug)]
pub struct ReadRequest {
    pub burst: BurstLen,
    pub tid: TransactionId,
    pub src: DeviceIndex,
    /// Filled in by the fabric's address decode.
    pub dst: Option<DeviceIndex>,
    pub origin: String,
    pub beats: Vec<ReadBeat>,
}

impl ReadRequest {
    /// Builds a read burst, allocating a fresh transaction ID.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidBurstLength`] if the beat count is not
    /// 1, 2, or 4.
    pub fn new(
        tids: &mut TidAllocator,
        src: DeviceIndex,
        origin: &str,
        beats: Vec<ReadBeat>,
    ) -> Result<Self, SimError> {
        let burst = BurstLen::from_beats(beats.len())?;
        Ok(Self {
            burst,
            tid: tids.allocate(),
            src,
            dst: None,
            origin: origin.to_string(),
            beats,
        })
    }

    /// Builds a single-beat read.
    pub fn single(tids: &mut TidAllocator, src: DeviceIndex, origin: &str, beat: ReadBeat) -> Self {
        Self {
            burst: BurstLen::Single,
            tid: tids.allocate(),
            src,
            dst: None,
            origin: origin.to_string(),
            beats: vec![beat],
        }
    }
}

/// A burst of write beats issued by a master.
#[derive(Clone, Debug)]
pub struct WriteRequest {
    pub burst: BurstLen,
    pub tid: TransactionId,
    pub src: DeviceIndex,
    /// Filled in by the fabric's address decode.
    pub dst: Option<DeviceIndex>,
    pub origin: String,
    pub beats: Vec<WriteBeat>,
}

impl WriteRequest {
    /// Builds a write burst, allocating a fresh transaction ID.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidBurstLength`] if the beat count is not
    /// 1, 2, or 4.
    pub fn new(
        tids: &mut TidAllocator,
        src: DeviceIndex,
        origin: &str,
        beats: Vec<WriteBeat>,
    ) -> Result<Self, SimError> {
        let burst = BurstLen::from_beats(beats.len())?;
        Ok(Self {
            burst,
            tid: tids.allocate(),
            src,
            dst: None,
            origin: origin.to_string(),
            beats,
        })
    }

    /// Builds a single-beat write.
    pub fn single(
        tids: &mut TidAllocator,
        src: DeviceIndex,
        origin: &str,
        beat: WriteBeat,
    ) -> Self {
        Self {
            burst: BurstLen::Single,
            tid: tids.allocate(),
            src,
            dst: None,
            origin: origin.to_string(),
            beats: vec![beat],
        }
    }
}

/// The aggregated response to a read burst.
///
/// Beat *i* of the response corresponds to beat *i* of the request.
#[derive(Clone, Debug)]
pub struct ReadResponse {
    pub burst: BurstLen,
    pub tid: TransactionId,
    /// The responding device.
    pub src: DeviceIndex,
    /// The request's source, i.e. where this response is delivered.
    pub dst: DeviceIndex,
    pub origin: String,
    pub beats: Vec<ReadData>,
}

impl ReadResponse {
    /// Assembles the response for a completed read burst.
    pub fn new(req: &ReadRequest, responder: DeviceIndex, beats: Vec<ReadData>) -> Self {
        Self {
            burst: req.burst,
            tid: req.tid,
            src: responder,
            dst: req.src,
            origin: req.origin.clone(),
            beats,
        }
    }
}

/// The aggregated acknowledgement of a write burst.
#[derive(Clone, Debug)]
pub struct WriteResponse {
    pub burst: BurstLen,
    pub tid: TransactionId,
    /// The responding device.
    pub src: DeviceIndex,
    /// The request's source, i.e. where this response is delivered.
    pub dst: DeviceIndex,
    pub origin: String,
    /// Number of beats acknowledged; equals the request's beat count.
    pub acks: usize,
}

impl WriteResponse {
    /// Assembles the acknowledgement for a completed write burst.
    pub fn new(req: &WriteRequest, responder: DeviceIndex) -> Self {
        Self {
            burst: req.burst,
            tid: req.tid,
            src: responder,
            dst: req.src,
            origin: req.origin.clone(),
            acks: req.beats.len(),
        }
    }
}

/// The unit of fabric traffic.
///
/// A closed set of variants: receivers dispatch on the discriminant, so an
/// unhandled variant is a compile-time hole rather than a runtime type
/// probe.
#[derive(Clone, Debug)]
pub enum Packet {
    ReadRequest(ReadRequest),
    WriteRequest(WriteRequest),
    ReadResponse(ReadResponse),
    WriteResponse(WriteResponse),
}

impl Packet {
    /// Returns the packet's transaction ID.
    pub fn tid(&self) -> TransactionId {
        match self {
            Packet::ReadRequest(p) => p.tid,
            Packet::WriteRequest(p) => p.tid,
            Packet::ReadResponse(p) => p.tid,
            Packet::WriteResponse(p) => p.tid,
        }
    }

    /// Returns the issuing device's index.
    pub fn src(&self) -> DeviceIndex {
        match self {
            Packet::ReadRequest(p) => p.src,
            Packet::WriteRequest(p) => p.src,
            Packet::ReadResponse(p) => p.src,
            Packet::WriteResponse(p) => p.src,
        }
    }

    /// Returns the destination, if already resolved.
    ///
    /// Requests acquire a destination during address decode; responses
    /// carry theirs from construction.
    pub fn dst(&self) -> Option<DeviceIndex> {
        match self {
            Packet::ReadRequest(p) => p.dst,
            Packet::WriteRequest(p) => p.dst,
            Packet::ReadResponse(p) => Some(p.dst),
            Packet::WriteResponse(p) => Some(p.dst),
        }
    }

    /// Records the destination resolved by the fabric's address decode.
    pub fn set_dst(&mut self, dst: DeviceIndex) {
        match self {
            Packet::ReadRequest(p) => p.dst = Some(dst),
            Packet::WriteRequest(p) => p.dst = Some(dst),
            Packet::ReadResponse(p) => p.dst = dst,
            Packet::WriteResponse(p) => p.dst = dst,
        }
    }

    /// Returns the originator tag of the issuing component.
    pub fn origin(&self) -> &str {
        match self {
            Packet::ReadRequest(p) => &p.origin,
            Packet::WriteRequest(p) => &p.origin,
            Packet::ReadResponse(p) => &p.origin,
            Packet::WriteResponse(p) => &p.origin,
        }
    }

    /// Returns the burst encoding.
    pub fn burst(&self) -> BurstLen {
        match self {
            Packet::ReadRequest(p) => p.burst,
            Packet::WriteRequest(p) => p.burst,
            Packet::ReadResponse(p) => p.burst,
            Packet::WriteResponse(p) => p.burst,
        }
    }

    /// Returns the number of beats actually carried.
    pub fn beat_count(&self) -> usize {
        match self {
            Packet::ReadRequest(p) => p.beats.len(),
            Packet::WriteRequest(p) => p.beats.len(),
            Packet::ReadResponse(p) => p.beats.len(),
            Packet::WriteResponse(p) => p.acks,
        }
    }

    /// Returns `true` for request variants.
    pub fn is_request(&self) -> bool {
        matches!(self, Packet::ReadRequest(_) | Packet::WriteRequest(_))
    }

    /// Returns the address used for routing (first beat of a request).
    pub fn route_addr(&self) -> Option<u32> {
        match self {
            Packet::ReadRequest(p) => p.beats.first().map(|b| b.addr),
            Packet::WriteRequest(p) => p.beats.first().map(|b| b.addr),
            _ => None,
        }
    }

    /// Returns a short name for the packet variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::ReadRequest(_) => "read request",
            Packet::WriteRequest(_) => "write request",
            Packet::ReadResponse(_) => "read response",
            Packet::WriteResponse(_) => "write response",
        }
    }

    /// Returns the transfer direction name ("read" or "write").
    pub fn flow(&self) -> &'static str {
        match self {
            Packet::ReadRequest(_) | Packet::ReadResponse(_) => "read",
            Packet::WriteRequest(_) | Packet::WriteResponse(_) => "write",
        }
    }

    /// Checks the burst-framing invariant: the payload length must match
    /// the encoded beat count.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::BurstPayloadMismatch`] on disagreement.
    pub fn validate(&self) -> Result<(), SimError> {
        let expected = self.burst().beats();
        let actual = self.beat_count();
        if expected != actual {
            return Err(SimError::BurstPayloadMismatch {
                tid: self.tid(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}
