//! DMA Block-Copy Engine.
//!
//! A register-programmable state machine that copies a 2-D region between
//! fabric addresses. A transfer alternates between a READING phase, which
//! fills a bounded staging buffer with word bursts from the source, and a
//! WRITING phase, which drains the buffer to the destination. Rows whose
//! width is not a multiple of four bytes end in sub-word stores sized to
//! the remaining byte count, so the engine never writes past the end of a
//! row.
//!
//! Register map (byte offsets within the control window):
//!
//! | Offset | Register |
//! |--------|----------|
//! | 0x0    | ENABLE (write 1 starts a transfer) |
//! | 0x4    | SOURCE address |
//! | 0x8    | DEST address |
//! | 0xC    | SIZE_CFG: [31:24] srcStride, [23:16] dstStride, [15:8] width-1, [7:0] height-1 |
//! | 0x14   | DONE (read status; write 1 clears) |

use std::collections::{HashMap, HashSet};

use log::{error, info, trace};

use crate::common::{AccessWidth, DeviceIndex, SimError, TransactionId};
use crate::soc::device::{DeviceContext, FabricDevice, LocalEvent};
use crate::soc::packet::{
    Packet, ReadBeat, ReadData, ReadRequest, ReadResponse, WriteBeat, WriteRequest, WriteResponse,
};

/// ENABLE register offset.
pub const REG_ENABLE: u32 = 0x0;
/// SOURCE address register offset.
pub const REG_SRC_ADDR: u32 = 0x4;
/// DEST address register offset.
pub const REG_DST_ADDR: u32 = 0x8;
/// SIZE_CFG register offset.
pub const REG_SIZE_CFG: u32 = 0xC;
/// DONE register offset.
pub const REG_DONE: u32 = 0x14;

/// Staging-buffer capacity in words.
pub const BUFFER_WORDS: usize = 256;

/// Largest burst the fabric supports, in beats.
const MAX_BURST_WORDS: u32 = 4;

/// Transfer lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DmaState {
    Idle,
    Reading,
    Writing,
}

/// A control-window access waiting out the MMIO turnaround latency.
enum PendingMmio {
    Read(ReadRequest),
    Write(WriteRequest),
}

/// Register-programmable 2-D block-copy engine.
///
/// The engine is simultaneously a device (its registers are written over
/// the fabric) and a master (it issues its own read and write bursts).
pub struct DmaEngine {
    index: DeviceIndex,
    name: String,
    window_base: u32,
    latency: u64,

    // registers
    enabled: bool,
    done: bool,
    src_addr: u32,
    dst_addr: u32,
    size_cfg: u32,

    // geometry decoded from SIZE_CFG on enable
    true_width: u32,
    true_height: u32,
    src_stride: u32,
    dst_stride: u32,
    total_words: u32,

    // transfer progress
    state: DmaState,
    words_transferred: u32,
    words_buffered: u32,
    buffer_index: u32,
    buffer: [u32; BUFFER_WORDS],
    outstanding_reads: HashSet<TransactionId>,
    outstanding_writes: HashSet<TransactionId>,
    pending_mmio: HashMap<TransactionId, PendingMmio>,

    transfer_count: u64,
    read_bursts: u64,
    write_bursts: u64,
}

impl DmaEngine {
    /// Creates an idle engine with all registers cleared.
    ///
    /// # Arguments
    ///
    /// * `index` - This device's fabric index.
    /// * `window_base` - Base address of the control window.
    /// * `latency` - MMIO turnaround latency in ticks.
    pub fn new(index: DeviceIndex, window_base: u32, latency: u64) -> Self {
        Self {
            index,
            name: "DmaEngine".to_string(),
            window_base,
            latency,
            enabled: false,
            done: false,
            src_addr: 0,
            dst_addr: 0,
            size_cfg: 0,
            true_width: 0,
            true_height: 0,
            src_stride: 0,
            dst_stride: 0,
            total_words: 0,
            state: DmaState::Idle,
            words_transferred: 0,
            words_buffered: 0,
            buffer_index: 0,
            buffer: [0; BUFFER_WORDS],
            outstanding_reads: HashSet::new(),
            outstanding_writes: HashSet::new(),
            pending_mmio: HashMap::new(),
            transfer_count: 0,
            read_bursts: 0,
            write_bursts: 0,
        }
    }

    /// Returns `true` while a transfer is in flight.
    pub fn is_busy(&self) -> bool {
        self.state != DmaState::Idle
    }

    /// Returns the DONE flag.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the ENABLE flag.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the number of completed transfers.
    pub fn transfer_count(&self) -> u64 {
        self.transfer_count
    }

    /// Returns the number of read bursts issued so far.
    pub fn read_bursts(&self) -> u64 {
        self.read_bursts
    }

    /// Returns the number of write bursts issued so far.
    pub fn write_bursts(&self) -> u64 {
        self.write_bursts
    }

    /// Returns the word count of the current or last transfer geometry.
    pub fn total_words(&self) -> u32 {
        self.total_words
    }

    /// Words per destination/source row, rounding the tail word up.
    fn words_per_row(&self) -> u32 {
        (self.true_width + 3) / 4
    }

    /// Decodes SIZE_CFG and starts a transfer.
    fn begin_transfer(&mut self, ctx: &mut DeviceContext) {
        self.done = false;
        let cfg = self.size_cfg;
        self.true_width = ((cfg >> 8) & 0xFF) + 1;
        self.true_height = (cfg & 0xFF) + 1;
        self.src_stride = (cfg >> 24) & 0xFF;
        self.dst_stride = (cfg >> 16) & 0xFF;
        self.total_words = self.words_per_row() * self.true_height;

        self.words_transferred = 0;
        self.words_buffered = 0;
        self.buffer_index = 0;
        // responses of an interrupted transfer no longer correlate
        self.outstanding_reads.clear();
        self.outstanding_writes.clear();

        info!(
            "dma: transfer start width={} height={} strides={}/{} totalWords={}",
            self.true_width, self.true_height, self.src_stride, self.dst_stride, self.total_words
        );

        self.state = DmaState::Reading;
        ctx.schedule(1, LocalEvent::DmaAdvance);
    }

    /// Issues the next read burst into the staging buffer.
    ///
    /// The burst size is min(buffer space, words left, 4), rounded down to
    /// a beat count the fabric supports. Each beat's meta field carries
    /// the staging slot its response lands in.
    fn schedule_reads(&mut self, ctx: &mut DeviceContext) -> Result<(), SimError> {
        let space = BUFFER_WORDS as u32 - self.buffer_index;
        let left = self.total_words - self.words_buffered;
        let words_to_read = space.min(left);

        if words_to_read == 0 {
            if self.buffer_index > 0 {
                self.state = DmaState::Writing;
                return self.schedule_writes(ctx);
            }
            self.complete(ctx);
            return Ok(());
        }

        // bursts never straddle a row-stride discontinuity
        let wpr = self.words_per_row();
        let row_remaining = wpr - (self.words_buffered % wpr);
        let mut chunk = words_to_read.min(MAX_BURST_WORDS).min(row_remaining);
        if chunk == 3 {
            chunk = 2;
        }

        let mut beats = Vec::with_capacity(chunk as usize);
        for i in 0..chunk {
            let global = self.words_buffered + i;
            let row = global / wpr;
            let col = global % wpr;
            beats.push(ReadBeat {
                width: AccessWidth::Word,
                addr: self.src_addr + row * self.src_stride + col * 4,
                meta: self.buffer_index + i,
            });
        }

        let req = ReadRequest::new(ctx.tids, self.index, "dma", beats)?;
        trace!(
            "dma: read burst {} of {} words into slot {}",
            req.tid,
            chunk,
            self.buffer_index
        );
        self.outstanding_reads.insert(req.tid);
        self.read_bursts += 1;
        ctx.submit(Packet::ReadRequest(req));
        Ok(())
    }

    /// Folds one completed read burst into the staging buffer.
    fn handle_read_response(&mut self, resp: ReadResponse, ctx: &mut DeviceContext) {
        if !self.outstanding_reads.remove(&resp.tid) {
            error!("dma: discarding read response for unknown transaction {}", resp.tid);
            return;
        }

        for beat in &resp.beats {
            let slot = beat.meta as usize;
            if slot < BUFFER_WORDS {
                self.buffer[slot] = beat.data;
            } else {
                error!("dma: staging slot {} out of range", slot);
            }
        }

        let chunk = resp.beats.len() as u32;
        self.buffer_index += chunk;
        self.words_buffered += chunk;

        let space = BUFFER_WORDS as u32 - self.buffer_index;
        let left = self.total_words - self.words_buffered;
        if space == 0 || left == 0 {
            self.state = DmaState::Writing;
        }
        ctx.schedule(1, LocalEvent::DmaAdvance);
    }

    /// Number of sub-packets one word expands to at the destination.
    ///
    /// A word in the last column of a row with a partial tail expands to
    /// two stores when three bytes remain, otherwise one.
    fn word_subpackets(&self, global_index: u32) -> u32 {
        let wpr = self.words_per_row();
        let col = global_index % wpr;
        if col == wpr - 1 && self.true_width % 4 != 0 {
            if self.true_width % 4 == 3 {
                2
            } else {
                1
            }
        } else {
            1
        }
    }

    /// Decides how many buffered words the next write burst may carry.
    ///
    /// Walks forward accumulating the sub-packet count, capping a burst at
    /// four sub-packets, and keeps the longest prefix whose count is
    /// exactly 1, 2, or 4. Falls back to one word when no prefix
    /// qualifies.
    fn write_chunk_len(&self, offset: u32, avail: u32) -> u32 {
        let wpr = self.words_per_row();
        let start = self.words_transferred + offset;
        let avail = avail.min(wpr - (start % wpr));
        let mut count = 0;
        let mut best = 0;
        for i in 0..avail {
            count += self.word_subpackets(self.words_transferred + offset + i);
            if count > MAX_BURST_WORDS {
                break;
            }
            if count == 1 || count == 2 || count == 4 {
                best = i + 1;
            }
        }
        if best == 0 {
            1
        } else {
            best
        }
    }

    /// Expands `chunk` buffered words into write beats, decomposing the
    /// partial tail word of each row into half-word and byte stores.
    fn build_write_beats(&self, offset: u32, chunk: u32) -> Vec<WriteBeat> {
        let wpr = self.words_per_row();
        let mut beats = Vec::new();
        for i in 0..chunk {
            let global = self.words_transferred + offset + i;
            let row = global / wpr;
            let col = global % wpr;
            let base = self.dst_addr + row * self.dst_stride + col * 4;
            let data = self.buffer[(offset + i) as usize];

            if col == wpr - 1 && self.true_width % 4 != 0 {
                match self.true_width % 4 {
                    3 => {
                        beats.push(WriteBeat {
                            width: AccessWidth::Half,
                            addr: base,
                            data: data & 0xFFFF,
                        });
                        beats.push(WriteBeat {
                            width: AccessWidth::Byte,
                            addr: base + 2,
                            data: (data >> 16) & 0xFF,
                        });
                    }
                    2 => beats.push(WriteBeat {
                        width: AccessWidth::Half,
                        addr: base,
                        data: data & 0xFFFF,
                    }),
                    _ => beats.push(WriteBeat {
                        width: AccessWidth::Byte,
                        addr: base,
                        data: data & 0xFF,
                    }),
                }
            } else {
                beats.push(WriteBeat {
                    width: AccessWidth::Word,
                    addr: base,
                    data,
                });
            }
        }
        beats
    }

    /// Drains the staging buffer as chunked write bursts.
    fn schedule_writes(&mut self, ctx: &mut DeviceContext) -> Result<(), SimError> {
        if self.buffer_index == 0 {
            if self.words_transferred >= self.total_words {
                self.complete(ctx);
                return Ok(());
            }
            self.state = DmaState::Reading;
            return self.schedule_reads(ctx);
        }

        let words_to_write = self.buffer_index;
        let mut offset = 0;
        while offset < words_to_write {
            let chunk = self.write_chunk_len(offset, words_to_write - offset);
            let beats = self.build_write_beats(offset, chunk);
            let req = WriteRequest::new(ctx.tids, self.index, "dma", beats)?;
            trace!("dma: write burst {} covering {} words", req.tid, chunk);
            self.outstanding_writes.insert(req.tid);
            self.write_bursts += 1;
            ctx.submit(Packet::WriteRequest(req));
            offset += chunk;
        }
        self.words_transferred += words_to_write;
        Ok(())
    }

    /// Retires one write burst; flushes the buffer when all are done.
    fn handle_write_response(&mut self, resp: WriteResponse, ctx: &mut DeviceContext) {
        if !self.outstanding_writes.remove(&resp.tid) {
            error!("dma: discarding write response for unknown transaction {}", resp.tid);
            return;
        }
        if !self.outstanding_writes.is_empty() || self.state != DmaState::Writing {
            return;
        }

        for slot in 0..self.buffer_index as usize {
            self.buffer[slot] = 0;
        }
        self.buffer_index = 0;

        if self.words_transferred >= self.total_words {
            self.complete(ctx);
        } else {
            self.state = DmaState::Reading;
            ctx.schedule(1, LocalEvent::DmaAdvance);
        }
    }

    /// Finishes the transfer: DONE set, ENABLE cleared, counters bumped.
    fn complete(&mut self, ctx: &mut DeviceContext) {
        self.state = DmaState::Idle;
        self.done = true;
        self.enabled = false;
        self.transfer_count += 1;
        ctx.stats.dma_transfers += 1;
        ctx.stats.dma_words_copied += self.total_words as u64;
        info!("dma: transfer complete ({} words)", self.total_words);
    }

    /// Applies one control-register write after the MMIO turnaround.
    fn service_mmio_write(
        &mut self,
        req: WriteRequest,
        ctx: &mut DeviceContext,
    ) -> Result<(), SimError> {
        let beat = req.beats[0];
        let offset = beat.addr - self.window_base;
        match offset {
            REG_ENABLE => {
                if beat.data & 1 != 0 {
                    self.enabled = true;
                    self.begin_transfer(ctx);
                }
            }
            REG_SRC_ADDR => self.src_addr = beat.data,
            REG_DST_ADDR => self.dst_addr = beat.data,
            REG_SIZE_CFG => self.size_cfg = beat.data,
            REG_DONE => {
                if beat.data & 1 != 0 {
                    self.done = false;
                }
            }
            _ => {
                return Err(SimError::InvalidRegister {
                    device: self.index,
                    offset,
                })
            }
        }
        ctx.respond(Packet::WriteResponse(WriteResponse::new(&req, self.index)));
        Ok(())
    }

    /// Serves one control-register read after the MMIO turnaround.
    fn service_mmio_read(
        &mut self,
        req: ReadRequest,
        ctx: &mut DeviceContext,
    ) -> Result<(), SimError> {
        let beat = req.beats[0];
        let offset = beat.addr - self.window_base;
        let data = match offset {
            REG_ENABLE => self.enabled as u32,
            REG_SRC_ADDR => self.src_addr,
            REG_DST_ADDR => self.dst_addr,
            REG_SIZE_CFG => self.size_cfg,
            REG_DONE => self.done as u32,
            _ => {
                return Err(SimError::InvalidRegister {
                    device: self.index,
                    offset,
                })
            }
        };
        let beats = vec![ReadData {
            width: beat.width,
            data,
            meta: beat.meta,
        }];
        ctx.respond(Packet::ReadResponse(ReadResponse::new(
            &req, self.index, beats,
        )));
        Ok(())
    }
}

impl FabricDevice for DmaEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_packet(&mut self, packet: Packet, ctx: &mut DeviceContext) -> Result<(), SimError> {
        match packet {
            Packet::ReadRequest(req) => {
                if req.beats.len() != 1 {
                    return Err(SimError::UnexpectedPacket {
                        device: self.index,
                        kind: "multi-beat control read",
                    });
                }
                let tid = req.tid;
                self.pending_mmio.insert(tid, PendingMmio::Read(req));
                ctx.schedule(self.latency, LocalEvent::ServiceBeat { tid, index: 0 });
                Ok(())
            }
            Packet::WriteRequest(req) => {
                if req.beats.len() != 1 {
                    return Err(SimError::UnexpectedPacket {
                        device: self.index,
                        kind: "multi-beat control write",
                    });
                }
                let tid = req.tid;
                self.pending_mmio.insert(tid, PendingMmio::Write(req));
                ctx.schedule(self.latency, LocalEvent::ServiceBeat { tid, index: 0 });
                Ok(())
            }
            Packet::ReadResponse(resp) => {
                self.handle_read_response(resp, ctx);
                Ok(())
            }
            Packet::WriteResponse(resp) => {
                self.handle_write_response(resp, ctx);
                Ok(())
            }
        }
    }

    fn handle_event(&mut self, event: LocalEvent, ctx: &mut DeviceContext) -> Result<(), SimError> {
        match event {
            LocalEvent::ServiceBeat { tid, .. } => match self.pending_mmio.remove(&tid) {
                Some(PendingMmio::Read(req)) => self.service_mmio_read(req, ctx),
                Some(PendingMmio::Write(req)) => self.service_mmio_write(req, ctx),
                None => Err(SimError::UnknownTransaction {
                    device: self.index,
                    tid,
                }),
            },
            LocalEvent::DmaAdvance => match self.state {
                DmaState::Reading => self.schedule_reads(ctx),
                DmaState::Writing => self.schedule_writes(ctx),
                DmaState::Idle => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn as_dma_mut(&mut self) -> Option<&mut DmaEngine> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(width: u32, height: u32, stride: u32) -> DmaEngine {
        let mut engine = DmaEngine::new(DeviceIndex(2), 0xF000, 1);
        engine.true_width = width;
        engine.true_height = height;
        engine.src_stride = stride;
        engine.dst_stride = stride;
        engine.total_words = engine.words_per_row() * height;
        engine.dst_addr = 0x2000;
        engine
    }

    /// Word-aligned rows chunk into the largest legal burst.
    #[test]
    fn test_chunk_full_rows() {
        let engine = engine_with(16, 2, 16);
        assert_eq!(engine.write_chunk_len(0, 4), 4);
        assert_eq!(engine.write_chunk_len(0, 2), 2);
        assert_eq!(engine.write_chunk_len(0, 1), 1);
    }

    /// A three-word row stops at the two-word boundary, then takes the
    /// remaining word alone.
    #[test]
    fn test_chunk_three_word_row() {
        let engine = engine_with(12, 2, 16);
        assert_eq!(engine.write_chunk_len(0, 6), 2);
        assert_eq!(engine.write_chunk_len(2, 4), 1);
    }

    /// A row ending in a three-byte tail cannot extend past the word
    /// before it, and the tail word rides alone as two sub-packets.
    #[test]
    fn test_chunk_partial_tail() {
        let engine = engine_with(7, 2, 8);
        assert_eq!(engine.write_chunk_len(0, 2), 1);
        assert_eq!(engine.write_chunk_len(1, 1), 1);
        assert_eq!(engine.word_subpackets(1), 2);
    }

    /// A lone tail word is a legal single-word chunk even though it
    /// expands to two sub-packets.
    #[test]
    fn test_chunk_single_tail_word() {
        let engine = engine_with(3, 1, 4);
        assert_eq!(engine.write_chunk_len(0, 1), 1);
        assert_eq!(engine.word_subpackets(0), 2);
    }

    /// A three-byte tail expands to a half-word store plus a byte store.
    #[test]
    fn test_partial_tail_beats() {
        let mut engine = engine_with(7, 1, 8);
        engine.buffer[0] = 0xAABB_CCDD;
        engine.buffer[1] = 0x00EE_FF11;
        let beats = engine.build_write_beats(0, 2);
        assert_eq!(beats.len(), 3);
        assert_eq!(beats[0].width, AccessWidth::Word);
        assert_eq!(beats[0].addr, 0x2000);
        assert_eq!(beats[0].data, 0xAABB_CCDD);
        assert_eq!(beats[1].width, AccessWidth::Half);
        assert_eq!(beats[1].addr, 0x2004);
        assert_eq!(beats[1].data, 0xFF11);
        assert_eq!(beats[2].width, AccessWidth::Byte);
        assert_eq!(beats[2].addr, 0x2006);
        assert_eq!(beats[2].data, 0xEE);
    }

    /// A two-byte tail is a single half-word store.
    #[test]
    fn test_two_byte_tail_beats() {
        let mut engine = engine_with(6, 1, 8);
        engine.buffer[1] = 0x1234_5678;
        let beats = engine.build_write_beats(1, 1);
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].width, AccessWidth::Half);
        assert_eq!(beats[0].data, 0x5678);
    }
}
