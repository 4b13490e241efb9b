//! Main Memory Device.
//!
//! Byte-addressable storage responding to read and write bursts. Beat *i*
//! of a burst is serviced at arrival + access-latency + *i*, modeling
//! sequential access; the beats of one burst share the request's
//! transaction ID and are aggregated by a burst tracker before the
//! combined response is handed back to the fabric.

use std::collections::HashMap;

use log::trace;

use crate::common::{AccessWidth, DeviceIndex, SimError, TransactionId};
use crate::soc::burst::BurstTracker;
use crate::soc::device::{DeviceContext, FabricDevice, LocalEvent};
use crate::soc::packet::{
    Packet, ReadBeat, ReadData, ReadRequest, ReadResponse, WriteBeat, WriteRequest, WriteResponse,
};

/// A request being serviced beat by beat.
enum PendingAccess {
    Read {
        req: ReadRequest,
        tracker: BurstTracker<ReadData>,
    },
    Write {
        req: WriteRequest,
        tracker: BurstTracker<()>,
    },
}

/// Byte-addressable main memory attached to the fabric.
///
/// Serves as the default route of the address map: any address outside
/// every device window lands here. Accesses beyond the backing extent are
/// fatal bounds errors.
pub struct MemoryDevice {
    index: DeviceIndex,
    name: String,
    base: u32,
    data: Vec<u8>,
    latency: u64,
    pending: HashMap<TransactionId, PendingAccess>,
}

impl MemoryDevice {
    /// Creates a memory device backed by `size` zeroed bytes.
    ///
    /// # Arguments
    ///
    /// * `index` - This device's fabric index.
    /// * `base` - First address of the backing extent.
    /// * `size` - Extent length in bytes.
    /// * `latency` - Access latency in ticks before the first beat.
    pub fn new(index: DeviceIndex, base: u32, size: usize, latency: u64) -> Self {
        Self {
            index,
            name: "DataMemory".to_string(),
            base,
            data: vec![0; size],
            latency,
            pending: HashMap::new(),
        }
    }

    /// Returns the backing extent as (base, size).
    pub fn extent(&self) -> (u32, usize) {
        (self.base, self.data.len())
    }

    /// Copies `bytes` into the backing store, bypassing the fabric.
    ///
    /// Scenario setup only; simulated traffic goes through the fabric.
    pub fn load_bytes(&mut self, addr: u32, bytes: &[u8]) {
        let offset = (addr - self.base) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Reads a little-endian word directly, bypassing the fabric.
    pub fn peek_word(&self, addr: u32) -> u32 {
        let o = (addr - self.base) as usize;
        u32::from_le_bytes([
            self.data[o],
            self.data[o + 1],
            self.data[o + 2],
            self.data[o + 3],
        ])
    }

    /// Reads a single byte directly, bypassing the fabric.
    pub fn peek_byte(&self, addr: u32) -> u8 {
        self.data[(addr - self.base) as usize]
    }

    /// Bounds-checks an access and returns its backing offset.
    fn offset_of(&self, addr: u32, bytes: u32) -> Result<usize, SimError> {
        let oob = SimError::OutOfRange {
            device: self.index,
            addr,
            bytes,
        };
        let end = addr.checked_add(bytes).ok_or(oob.clone())?;
        if addr < self.base || (end - self.base) as usize > self.data.len() {
            return Err(oob);
        }
        Ok((addr - self.base) as usize)
    }

    /// Loads one granule, zero-extended to 32 bits.
    fn read_granule(&self, addr: u32, width: AccessWidth) -> Result<u32, SimError> {
        let o = self.offset_of(addr, width.bytes())?;
        Ok(match width {
            AccessWidth::Byte => self.data[o] as u32,
            AccessWidth::Half => u16::from_le_bytes([self.data[o], self.data[o + 1]]) as u32,
            AccessWidth::Word => u32::from_le_bytes([
                self.data[o],
                self.data[o + 1],
                self.data[o + 2],
                self.data[o + 3],
            ]),
        })
    }

    /// Stores one granule from the low bits of `data`.
    fn write_granule(&mut self, addr: u32, width: AccessWidth, data: u32) -> Result<(), SimError> {
        let o = self.offset_of(addr, width.bytes())?;
        match width {
            AccessWidth::Byte => self.data[o] = data as u8,
            AccessWidth::Half => self.data[o..o + 2].copy_from_slice(&(data as u16).to_le_bytes()),
            AccessWidth::Word => self.data[o..o + 4].copy_from_slice(&data.to_le_bytes()),
        }
        Ok(())
    }

    /// Services one read beat; emits the aggregated response on the last.
    fn service_read_beat(
        &mut self,
        tid: TransactionId,
        beat: ReadBeat,
        ctx: &mut DeviceContext,
    ) -> Result<(), SimError> {
        let data = self.read_granule(beat.addr, beat.width)?;
        ctx.stats.read_beats += 1;
        let done = match self.pending.get_mut(&tid) {
            Some(PendingAccess::Read { tracker, .. }) => tracker.push(ReadData {
                width: beat.width,
                data,
                meta: beat.meta,
            }),
            _ => None,
        };
        if let Some(beats) = done {
            if let Some(PendingAccess::Read { req, .. }) = self.pending.remove(&tid) {
                ctx.respond(Packet::ReadResponse(ReadResponse::new(
                    &req, self.index, beats,
                )));
            }
        }
        Ok(())
    }

    /// Services one write beat; emits the acknowledgement on the last.
    fn service_write_beat(
        &mut self,
        tid: TransactionId,
        beat: WriteBeat,
        ctx: &mut DeviceContext,
    ) -> Result<(), SimError> {
        self.write_granule(beat.addr, beat.width, beat.data)?;
        ctx.stats.write_beats += 1;
        let done = match self.pending.get_mut(&tid) {
            Some(PendingAccess::Write { tracker, .. }) => tracker.push(()).is_some(),
            _ => false,
        };
        if done {
            if let Some(PendingAccess::Write { req, .. }) = self.pending.remove(&tid) {
                ctx.respond(Packet::WriteResponse(WriteResponse::new(&req, self.index)));
            }
        }
        Ok(())
    }
}

impl FabricDevice for MemoryDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_packet(&mut self, packet: Packet, ctx: &mut DeviceContext) -> Result<(), SimError> {
        match packet {
            Packet::ReadRequest(req) => {
                let tid = req.tid;
                let beats = req.beats.len();
                trace!("memory: accepted read {} with {} beats", tid, beats);
                self.pending.insert(
                    tid,
                    PendingAccess::Read {
                        req,
                        tracker: BurstTracker::new(beats),
                    },
                );
                for i in 0..beats {
                    ctx.schedule(
                        self.latency + i as u64,
                        LocalEvent::ServiceBeat { tid, index: i },
                    );
                }
                Ok(())
            }
            Packet::WriteRequest(req) => {
                let tid = req.tid;
                let beats = req.beats.len();
                trace!("memory: accepted write {} with {} beats", tid, beats);
                self.pending.insert(
                    tid,
                    PendingAccess::Write {
                        req,
                        tracker: BurstTracker::new(beats),
                    },
                );
                for i in 0..beats {
                    ctx.schedule(
                        self.latency + i as u64,
                        LocalEvent::ServiceBeat { tid, index: i },
                    );
                }
                Ok(())
            }
            other => Err(SimError::UnexpectedPacket {
                device: self.index,
                kind: other.kind(),
            }),
        }
    }

    fn handle_event(&mut self, event: LocalEvent, ctx: &mut DeviceContext) -> Result<(), SimError> {
        let LocalEvent::ServiceBeat { tid, index } = event else {
            return Ok(());
        };
        enum Beat {
            Read(ReadBeat),
            Write(WriteBeat),
        }
        let beat = match self.pending.get(&tid) {
            Some(PendingAccess::Read { req, .. }) => Beat::Read(req.beats[index]),
            Some(PendingAccess::Write { req, .. }) => Beat::Write(req.beats[index]),
            None => {
                return Err(SimError::UnknownTransaction {
                    device: self.index,
                    tid,
                })
            }
        };
        match beat {
            Beat::Read(read) => self.service_read_beat(tid, read, ctx),
            Beat::Write(write) => self.service_write_beat(tid, write, ctx),
        }
    }

    fn as_memory_mut(&mut self) -> Option<&mut MemoryDevice> {
        Some(self)
    }
}
