//! Weight-Stationary Systolic Matrix Accelerator.
//!
//! A register-programmable engine computing C = A x B over 8-bit operands
//! with 16-bit accumulation. On ENABLE the engine stages both operand
//! matrices from main memory into its on-chip SRAM by programming the DMA
//! engine over the fabric and polling its DONE register, then loads the
//! operands into typed matrices, runs the cycle-accurate systolic
//! dataflow, and writes the result back through the fabric into its own
//! SRAM window.
//!
//! Register map (byte offsets within the control window):
//!
//! | Offset | Register |
//! |--------|----------|
//! | 0x0    | ENABLE |
//! | 0x4    | STATUS (read done; write clears) |
//! | 0x8    | MATA_SIZE: [31:16] M-1, [15:0] K-1 |
//! | 0xC    | MATB_SIZE: [31:16] K-1, [15:0] N-1 |
//! | 0x10   | MATC_SIZE: [31:16] M-1, [15:0] N-1 |
//! | 0x14   | A SRAM-side base address |
//! | 0x18   | B SRAM-side base address |
//! | 0x1C   | C SRAM-side base address |
//! | 0x20   | strides: [7:0] A, [15:8] B, [23:16] C |
//! | 0x24   | A DRAM-side source address |
//! | 0x28   | B DRAM-side source address |
//! | 0x2C   | C DRAM-side address (held, not used for staging) |

use std::collections::{HashMap, HashSet};

use log::{info, trace};

use crate::common::{AccessWidth, DeviceIndex, SimError, TransactionId};
use crate::soc::burst::BurstTracker;
use crate::soc::device::{DeviceContext, FabricDevice, LocalEvent};
use crate::soc::dma;
use crate::soc::packet::{
    Packet, ReadBeat, ReadData, ReadRequest, ReadResponse, WriteBeat, WriteRequest, WriteResponse,
};

/// ENABLE register offset.
pub const REG_ENABLE: u32 = 0x0;
/// STATUS register offset.
pub const REG_STATUS: u32 = 0x4;
/// MATA_SIZE register offset.
pub const REG_MATA_SIZE: u32 = 0x8;
/// MATB_SIZE register offset.
pub const REG_MATB_SIZE: u32 = 0xC;
/// MATC_SIZE register offset.
pub const REG_MATC_SIZE: u32 = 0x10;
/// A SRAM-side base address register offset.
pub const REG_A_ADDR: u32 = 0x14;
/// B SRAM-side base address register offset.
pub const REG_B_ADDR: u32 = 0x18;
/// C SRAM-side base address register offset.
pub const REG_C_ADDR: u32 = 0x1C;
/// Stride register offset.
pub const REG_STRIDES: u32 = 0x20;
/// A DRAM-side source address register offset.
pub const REG_A_DRAM: u32 = 0x24;
/// B DRAM-side source address register offset.
pub const REG_B_DRAM: u32 = 0x28;
/// C DRAM-side address register offset.
pub const REG_C_DRAM: u32 = 0x2C;

/// Fixed edge length of the on-chip operand matrices.
pub const MAT_DIM: usize = 64;

/// Largest element count either operand matrix may hold.
pub const MAX_OPERAND_ELEMS: u32 = 2048;

/// Meta tag marking DONE-polling reads, distinguishing them from data
/// traffic.
pub const POLL_TAG: u32 = 0x504F_4C4C;

/// Staging/compute phase of one accelerator transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    ReadMatA,
    ReadMatB,
    Compute,
}

/// A value register tagged valid/invalid.
#[derive(Clone, Copy, Debug, Default)]
struct Valid<T> {
    valid: bool,
    value: T,
}

/// One processing element of the systolic grid.
///
/// Holds a stationary weight, the input passing through left-to-right,
/// and the partial sum flowing top-to-bottom, with forward registers
/// latching the values presented to neighbors next cycle.
#[derive(Clone, Copy, Debug, Default)]
struct Pe {
    weight: Valid<u8>,
    input: Valid<u8>,
    fwd_input: Valid<u8>,
    psum: Valid<u16>,
    fwd_psum: Valid<u16>,
}

/// A request against this device waiting out its service latency.
enum Pending {
    MmioRead(ReadRequest),
    MmioWrite(WriteRequest),
    SramRead {
        req: ReadRequest,
        tracker: BurstTracker<ReadData>,
    },
    SramWrite {
        req: WriteRequest,
        tracker: BurstTracker<()>,
    },
}

/// Weight-stationary matrix accelerator attached to the fabric.
///
/// Simultaneously a device (control window and SRAM window) and a master
/// (DMA programming, DONE polling, and result write-back).
pub struct SystolicAccelerator {
    index: DeviceIndex,
    name: String,
    ctrl_base: u32,
    sram_base: u32,
    dma_ctrl_base: u32,
    latency: u64,

    // configuration registers
    enabled: bool,
    done: bool,
    m: u32,
    k: u32,
    n: u32,
    a_addr: u32,
    b_addr: u32,
    c_addr: u32,
    stride_a: u32,
    stride_b: u32,
    stride_c: u32,
    a_dram: u32,
    b_dram: u32,
    c_dram: u32,

    phase: Phase,
    a_mat: Box<[[u8; MAT_DIM]; MAT_DIM]>,
    b_mat: Box<[[u8; MAT_DIM]; MAT_DIM]>,
    c_mat: Box<[[u16; MAT_DIM]; MAT_DIM]>,
    sram: Vec<u8>,

    pending: HashMap<TransactionId, Pending>,
    c_writes: HashSet<TransactionId>,
    matmul_count: u64,
}

impl SystolicAccelerator {
    /// Creates an idle accelerator with cleared registers and SRAM.
    ///
    /// # Arguments
    ///
    /// * `index` - This device's fabric index.
    /// * `ctrl_base` - Base address of the control window.
    /// * `sram_base` - Base address of the SRAM window.
    /// * `sram_size` - SRAM window length in bytes.
    /// * `dma_ctrl_base` - Base address of the DMA engine's control window.
    /// * `latency` - Access and MMIO turnaround latency in ticks.
    pub fn new(
        index: DeviceIndex,
        ctrl_base: u32,
        sram_base: u32,
        sram_size: usize,
        dma_ctrl_base: u32,
        latency: u64,
    ) -> Self {
        Self {
            index,
            name: "SystolicAccelerator".to_string(),
            ctrl_base,
            sram_base,
            dma_ctrl_base,
            latency,
            enabled: false,
            done: false,
            m: 0,
            k: 0,
            n: 0,
            a_addr: 0,
            b_addr: 0,
            c_addr: 0,
            stride_a: 0,
            stride_b: 0,
            stride_c: 0,
            a_dram: 0,
            b_dram: 0,
            c_dram: 0,
            phase: Phase::Idle,
            a_mat: Box::new([[0; MAT_DIM]; MAT_DIM]),
            b_mat: Box::new([[0; MAT_DIM]; MAT_DIM]),
            c_mat: Box::new([[0; MAT_DIM]; MAT_DIM]),
            sram: vec![0; sram_size],
            pending: HashMap::new(),
            c_writes: HashSet::new(),
            matmul_count: 0,
        }
    }

    /// Returns the STATUS/done flag.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the ENABLE flag.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the number of completed matrix multiplications.
    pub fn matmul_count(&self) -> u64 {
        self.matmul_count
    }

    /// Reads one result element from the internal result matrix.
    pub fn result(&self, row: usize, col: usize) -> u16 {
        self.c_mat[row][col]
    }

    /// Reads a little-endian SRAM word by absolute fabric address.
    pub fn peek_word(&self, addr: u32) -> u32 {
        let o = (addr - self.sram_base) as usize;
        u32::from_le_bytes([
            self.sram[o],
            self.sram[o + 1],
            self.sram[o + 2],
            self.sram[o + 3],
        ])
    }

    /// Copies `bytes` into SRAM by absolute fabric address, bypassing the
    /// fabric. Scenario setup only.
    pub fn load_sram(&mut self, addr: u32, bytes: &[u8]) {
        let o = (addr - self.sram_base) as usize;
        self.sram[o..o + bytes.len()].copy_from_slice(bytes);
    }

    /// Returns `true` if `addr` falls in the SRAM window.
    fn in_sram(&self, addr: u32) -> bool {
        addr >= self.sram_base && ((addr - self.sram_base) as usize) < self.sram.len()
    }

    /// Bounds-checks an SRAM access and returns its backing offset.
    fn sram_offset(&self, addr: u32, bytes: u32) -> Result<usize, SimError> {
        let oob = SimError::OutOfRange {
            device: self.index,
            addr,
            bytes,
        };
        let end = addr.checked_add(bytes).ok_or(oob.clone())?;
        if addr < self.sram_base || (end - self.sram_base) as usize > self.sram.len() {
            return Err(oob);
        }
        Ok((addr - self.sram_base) as usize)
    }

    /// Loads one SRAM granule, zero-extended to 32 bits.
    fn sram_read(&self, addr: u32, width: AccessWidth) -> Result<u32, SimError> {
        let o = self.sram_offset(addr, width.bytes())?;
        Ok(match width {
            AccessWidth::Byte => self.sram[o] as u32,
            AccessWidth::Half => u16::from_le_bytes([self.sram[o], self.sram[o + 1]]) as u32,
            AccessWidth::Word => u32::from_le_bytes([
                self.sram[o],
                self.sram[o + 1],
                self.sram[o + 2],
                self.sram[o + 3],
            ]),
        })
    }

    /// Stores one SRAM granule from the low bits of `data`.
    fn sram_write(&mut self, addr: u32, width: AccessWidth, data: u32) -> Result<(), SimError> {
        let o = self.sram_offset(addr, width.bytes())?;
        match width {
            AccessWidth::Byte => self.sram[o] = data as u8,
            AccessWidth::Half => self.sram[o..o + 2].copy_from_slice(&(data as u16).to_le_bytes()),
            AccessWidth::Word => self.sram[o..o + 4].copy_from_slice(&data.to_le_bytes()),
        }
        Ok(())
    }

    /// Validates the configuration and starts a new transaction.
    ///
    /// # Errors
    ///
    /// Misaligned SRAM addresses and operands exceeding the on-chip
    /// capacity are fatal configuration errors.
    fn start_transaction(&mut self, ctx: &mut DeviceContext) -> Result<(), SimError> {
        if self.m == 0 || self.k == 0 || self.n == 0 {
            return Err(SimError::UnconfiguredOperands);
        }
        for addr in [self.a_addr, self.b_addr, self.c_addr] {
            if addr % 4 != 0 {
                return Err(SimError::MisalignedAddress(addr));
            }
        }
        for elems in [self.m * self.k, self.k * self.n] {
            if elems > MAX_OPERAND_ELEMS {
                return Err(SimError::CapacityExceeded {
                    elements: elems,
                    capacity: MAX_OPERAND_ELEMS,
                });
            }
        }
        let max_dim = self.m.max(self.k).max(self.n);
        if max_dim > MAT_DIM as u32 {
            return Err(SimError::CapacityExceeded {
                elements: max_dim,
                capacity: MAT_DIM as u32,
            });
        }

        info!(
            "accel: transaction start M={} K={} N={} A@{:#x} B@{:#x} C@{:#x}",
            self.m, self.k, self.n, self.a_addr, self.b_addr, self.c_addr
        );

        self.done = false;
        self.enabled = true;
        *self.a_mat = [[0; MAT_DIM]; MAT_DIM];
        *self.b_mat = [[0; MAT_DIM]; MAT_DIM];
        *self.c_mat = [[0; MAT_DIM]; MAT_DIM];

        self.phase = Phase::ReadMatA;
        self.stage_operand(ctx, self.a_dram, self.a_addr, self.k, self.m, self.stride_a);
        Ok(())
    }

    /// Programs the DMA engine to copy one operand into SRAM and arms the
    /// DONE poll.
    ///
    /// The copy is `height` rows of `width` bytes with the given row
    /// stride on both sides; the four register writes travel the fabric
    /// as ordinary single-beat MMIO stores, ENABLE last.
    fn stage_operand(
        &mut self,
        ctx: &mut DeviceContext,
        dram_src: u32,
        sram_dst: u32,
        width: u32,
        height: u32,
        stride: u32,
    ) {
        let stride = stride & 0xFF;
        let size_cfg =
            (stride << 24) | (stride << 16) | (((width - 1) & 0xFF) << 8) | ((height - 1) & 0xFF);
        let writes = [
            (dma::REG_SRC_ADDR, dram_src),
            (dma::REG_DST_ADDR, self.sram_base + sram_dst),
            (dma::REG_SIZE_CFG, size_cfg),
            (dma::REG_ENABLE, 1),
        ];
        for (reg, value) in writes {
            let req = WriteRequest::single(
                ctx.tids,
                self.index,
                "accel",
                WriteBeat {
                    width: AccessWidth::Word,
                    addr: self.dma_ctrl_base + reg,
                    data: value,
                },
            );
            ctx.submit(Packet::WriteRequest(req));
        }
        ctx.schedule(self.latency, LocalEvent::AccelPoll);
    }

    /// Issues one tagged read of the DMA DONE register.
    fn poke_dma(&mut self, ctx: &mut DeviceContext) {
        let req = ReadRequest::single(
            ctx.tids,
            self.index,
            "accel",
            ReadBeat {
                width: AccessWidth::Word,
                addr: self.dma_ctrl_base + dma::REG_DONE,
                meta: POLL_TAG,
            },
        );
        ctx.submit(Packet::ReadRequest(req));
    }

    /// Unpacks both operand matrices from SRAM (4 packed bytes per word).
    fn load_operands(&mut self) -> Result<(), SimError> {
        let (m, k, n) = (self.m as usize, self.k as usize, self.n as usize);
        let words_per_row_a = (self.stride_a + 3) / 4;
        for i in 0..m {
            for j in 0..k {
                let word_idx = self.a_addr / 4 + i as u32 * words_per_row_a + j as u32 / 4;
                let word = self.sram_read(self.sram_base + word_idx * 4, AccessWidth::Word)?;
                self.a_mat[i][j] = ((word >> ((j % 4) * 8)) & 0xFF) as u8;
            }
        }
        let words_per_row_b = (self.stride_b + 3) / 4;
        for i in 0..k {
            for j in 0..n {
                let word_idx = self.b_addr / 4 + i as u32 * words_per_row_b + j as u32 / 4;
                let word = self.sram_read(self.sram_base + word_idx * 4, AccessWidth::Word)?;
                self.b_mat[i][j] = ((word >> ((j % 4) * 8)) & 0xFF) as u8;
            }
        }
        Ok(())
    }

    /// Runs the full compute pass over the PE grid.
    ///
    /// The grid edge is max(M, K, N); unused lanes carry invalid tokens
    /// and contribute nothing. Weights are preloaded over SA cycles, the
    /// A operand is injected along a diagonal skew for 2*SA-1 cycles, and
    /// the pipeline drains for SA-1 more.
    fn compute(&mut self) {
        let sa = self.m.max(self.k).max(self.n) as usize;
        let mut pe = vec![vec![Pe::default(); sa]; sa];
        let mut emit_row = vec![0usize; sa];

        // Weight preload: row 0 takes B rows highest-index first while the
        // rest shift down, so PE[i][j] ends up holding B[i][j].
        for cyc in (0..sa).rev() {
            for i in (1..sa).rev() {
                for j in 0..sa {
                    pe[i][j].weight = pe[i - 1][j].weight;
                }
            }
            for j in 0..sa {
                pe[0][j].weight = Valid {
                    valid: true,
                    value: self.b_mat[cyc][j],
                };
            }
        }

        let total = 2 * sa - 1;
        for cyc in 0..total {
            self.wave_cycle(&mut pe, &mut emit_row, sa, cyc, true);
        }
        for cyc in total..total + sa - 1 {
            self.wave_cycle(&mut pe, &mut emit_row, sa, cyc, false);
        }
    }

    /// Advances the systolic wavefront by one cycle.
    fn wave_cycle(
        &mut self,
        pe: &mut [Vec<Pe>],
        emit_row: &mut [usize],
        sa: usize,
        cyc: usize,
        inject: bool,
    ) {
        // Shift inputs right; column 0 of row i is fed A[cyc - i][i]
        // exactly while the skewed index is in range.
        for i in 0..sa {
            for j in (1..sa).rev() {
                pe[i][j].input = pe[i][j - 1].fwd_input;
            }
            if inject {
                let a_row = cyc as isize - i as isize;
                let valid = a_row >= 0 && (a_row as usize) < sa;
                pe[i][0].input = Valid {
                    valid,
                    value: if valid {
                        self.a_mat[a_row as usize][i]
                    } else {
                        0
                    },
                };
            } else {
                pe[i][0].input = Valid {
                    valid: false,
                    value: 0,
                };
            }
        }

        // Multiply-accumulate against the partial sums forwarded from the
        // row above on the previous cycle.
        for i in (0..sa).rev() {
            for j in 0..sa {
                let above = if i > 0 && pe[i - 1][j].fwd_psum.valid {
                    pe[i - 1][j].fwd_psum.value
                } else {
                    0
                };
                let p = &mut pe[i][j];
                if p.weight.valid && p.input.valid {
                    let product = p.input.value as u16 * p.weight.value as u16;
                    p.psum = Valid {
                        valid: true,
                        value: above.wrapping_add(product),
                    };
                } else {
                    p.psum.valid = false;
                }
            }
        }

        // Latch the forward registers presented to neighbors next cycle.
        for row in pe.iter_mut() {
            for p in row.iter_mut() {
                p.fwd_input = p.input;
                p.fwd_psum = p.psum;
            }
        }

        // Emit finished bottom-row sums into the next free output row per
        // column, invalidating the slot so it cannot emit twice.
        for j in 0..sa {
            let bottom = &mut pe[sa - 1][j];
            if bottom.psum.valid && emit_row[j] < sa {
                self.c_mat[emit_row[j]][j] = bottom.psum.value;
                emit_row[j] += 1;
                bottom.psum.valid = false;
                bottom.fwd_psum.valid = false;
            }
        }
    }

    /// Writes the result matrix into the SRAM window through the fabric.
    ///
    /// Each row is emitted as word stores grouped into 4/2/1-beat bursts
    /// at `C + i*strideC + j*4`.
    fn write_back(&mut self, ctx: &mut DeviceContext) -> Result<(), SimError> {
        let (m, n) = (self.m, self.n);
        for i in 0..m {
            let mut j = 0;
            while j < n {
                let beat_count = match n - j {
                    rem if rem >= 4 => 4,
                    rem if rem >= 2 => 2,
                    _ => 1,
                };
                let mut beats = Vec::with_capacity(beat_count as usize);
                for t in 0..beat_count {
                    let col = j + t;
                    beats.push(WriteBeat {
                        width: AccessWidth::Word,
                        addr: self.sram_base + self.c_addr + i * self.stride_c + col * 4,
                        data: self.c_mat[i as usize][col as usize] as u32,
                    });
                }
                let req = WriteRequest::new(ctx.tids, self.index, "accel", beats)?;
                self.c_writes.insert(req.tid);
                ctx.submit(Packet::WriteRequest(req));
                j += beat_count;
            }
        }
        Ok(())
    }

    /// Reacts to a DONE-poll response, advancing the staging phases.
    fn handle_read_response(
        &mut self,
        resp: ReadResponse,
        ctx: &mut DeviceContext,
    ) -> Result<(), SimError> {
        let is_poll = resp.beats.len() == 1 && resp.beats[0].meta == POLL_TAG;
        if !is_poll {
            return Err(SimError::UnexpectedPacket {
                device: self.index,
                kind: "read response",
            });
        }

        if resp.beats[0].data != 1 {
            ctx.schedule(self.latency, LocalEvent::AccelPoll);
            return Ok(());
        }

        match self.phase {
            Phase::ReadMatA => {
                info!("accel: DMA finished staging A");
                self.phase = Phase::ReadMatB;
                self.stage_operand(ctx, self.b_dram, self.b_addr, self.n, self.k, self.stride_b);
                Ok(())
            }
            Phase::ReadMatB => {
                info!("accel: DMA finished staging B; computing");
                self.load_operands()?;
                self.compute();
                self.phase = Phase::Compute;
                self.write_back(ctx)
            }
            _ => Err(SimError::UnexpectedPacket {
                device: self.index,
                kind: "poll response while idle",
            }),
        }
    }

    /// Retires write acknowledgements; result write-back completion sets
    /// STATUS/done. Acknowledgements of DMA-programming writes need no
    /// action.
    fn handle_write_response(&mut self, resp: WriteResponse, ctx: &mut DeviceContext) {
        if !self.c_writes.remove(&resp.tid) {
            return;
        }
        if self.phase == Phase::Compute && self.c_writes.is_empty() {
            self.done = true;
            self.enabled = false;
            self.phase = Phase::Idle;
            self.matmul_count += 1;
            ctx.stats.matmuls += 1;
            info!("accel: matmul complete ({}x{}x{})", self.m, self.k, self.n);
        }
    }

    /// Serves one control-register read after the MMIO turnaround.
    fn service_mmio_read(
        &mut self,
        req: ReadRequest,
        ctx: &mut DeviceContext,
    ) -> Result<(), SimError> {
        let beat = req.beats[0];
        let offset = beat.addr - self.ctrl_base;
        let pack = |hi: u32, lo: u32| {
            ((hi.saturating_sub(1) & 0xFFF) << 16) | (lo.saturating_sub(1) & 0xFFF)
        };
        let data = match offset {
            REG_ENABLE => self.enabled as u32,
            REG_STATUS => self.done as u32,
            REG_MATA_SIZE => pack(self.m, self.k),
            REG_MATB_SIZE => pack(self.k, self.n),
            REG_MATC_SIZE => pack(self.m, self.n),
            REG_A_ADDR => self.a_addr,
            REG_B_ADDR => self.b_addr,
            REG_C_ADDR => self.c_addr,
            REG_STRIDES => {
                (self.stride_a & 0xFF) | ((self.stride_b & 0xFF) << 8) | ((self.stride_c & 0xFF) << 16)
            }
            REG_A_DRAM => self.a_dram,
            REG_B_DRAM => self.b_dram,
            REG_C_DRAM => self.c_dram,
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

    /// Applies one control-register write after the MMIO turnaround.
    fn service_mmio_write(
        &mut self,
        req: WriteRequest,
        ctx: &mut DeviceContext,
    ) -> Result<(), SimError> {
        let beat = req.beats[0];
        let offset = beat.addr - self.ctrl_base;
        let data = beat.data;
        match offset {
            REG_ENABLE => {
                if data & 1 != 0 {
                    self.start_transaction(ctx)?;
                }
            }
            REG_STATUS => self.done = false,
            REG_MATA_SIZE => {
                self.m = ((data >> 16) & 0xFFF) + 1;
                self.k = (data & 0xFFF) + 1;
            }
            REG_MATB_SIZE => {
                self.k = ((data >> 16) & 0xFFF) + 1;
                self.n = (data & 0xFFF) + 1;
            }
            REG_MATC_SIZE => {
                self.m = ((data >> 16) & 0xFFF) + 1;
                self.n = (data & 0xFFF) + 1;
            }
            REG_A_ADDR => self.a_addr = data,
            REG_B_ADDR => self.b_addr = data,
            REG_C_ADDR => self.c_addr = data,
            REG_STRIDES => {
                self.stride_a = data & 0xFF;
                self.stride_b = (data >> 8) & 0xFF;
                self.stride_c = (data >> 16) & 0xFF;
            }
            REG_A_DRAM => self.a_dram = data,
            REG_B_DRAM => self.b_dram = data,
            REG_C_DRAM => self.c_dram = data,
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

    /// Services one SRAM read beat; responds when the burst completes.
    fn service_sram_read_beat(
        &mut self,
        tid: TransactionId,
        beat: ReadBeat,
        ctx: &mut DeviceContext,
    ) -> Result<(), SimError> {
        let data = self.sram_read(beat.addr, beat.width)?;
        ctx.stats.read_beats += 1;
        let done = match self.pending.get_mut(&tid) {
            Some(Pending::SramRead { tracker, .. }) => tracker.push(ReadData {
                width: beat.width,
                data,
                meta: beat.meta,
            }),
            _ => None,
        };
        if let Some(beats) = done {
            if let Some(Pending::SramRead { req, .. }) = self.pending.remove(&tid) {
                ctx.respond(Packet::ReadResponse(ReadResponse::new(
                    &req, self.index, beats,
                )));
            }
        }
        Ok(())
    }

    /// Services one SRAM write beat; acknowledges when the burst completes.
    fn service_sram_write_beat(
        &mut self,
        tid: TransactionId,
        beat: WriteBeat,
        ctx: &mut DeviceContext,
    ) -> Result<(), SimError> {
        self.sram_write(beat.addr, beat.width, beat.data)?;
        ctx.stats.write_beats += 1;
        let done = match self.pending.get_mut(&tid) {
            Some(Pending::SramWrite { tracker, .. }) => tracker.push(()).is_some(),
            _ => false,
        };
        if done {
            if let Some(Pending::SramWrite { req, .. }) = self.pending.remove(&tid) {
                ctx.respond(Packet::WriteResponse(WriteResponse::new(&req, self.index)));
            }
        }
        Ok(())
    }
}

impl FabricDevice for SystolicAccelerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_packet(&mut self, packet: Packet, ctx: &mut DeviceContext) -> Result<(), SimError> {
        match packet {
            Packet::ReadRequest(req) => {
                let tid = req.tid;
                if self.in_sram(req.beats[0].addr) {
                    let beats = req.beats.len();
                    trace!("accel: sram read {} with {} beats", tid, beats);
                    self.pending.insert(
                        tid,
                        Pending::SramRead {
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
                } else {
                    if req.beats.len() != 1 {
                        return Err(SimError::UnexpectedPacket {
                            device: self.index,
                            kind: "multi-beat control read",
                        });
                    }
                    self.pending.insert(tid, Pending::MmioRead(req));
                    ctx.schedule(self.latency, LocalEvent::ServiceBeat { tid, index: 0 });
                }
                Ok(())
            }
            Packet::WriteRequest(req) => {
                let tid = req.tid;
                if self.in_sram(req.beats[0].addr) {
                    let beats = req.beats.len();
                    trace!("accel: sram write {} with {} beats", tid, beats);
                    self.pending.insert(
                        tid,
                        Pending::SramWrite {
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
                } else {
                    if req.beats.len() != 1 {
                        return Err(SimError::UnexpectedPacket {
                            device: self.index,
                            kind: "multi-beat control write",
                        });
                    }
                    self.pending.insert(tid, Pending::MmioWrite(req));
                    ctx.schedule(self.latency, LocalEvent::ServiceBeat { tid, index: 0 });
                }
                Ok(())
            }
            Packet::ReadResponse(resp) => self.handle_read_response(resp, ctx),
            Packet::WriteResponse(resp) => {
                self.handle_write_response(resp, ctx);
                Ok(())
            }
        }
    }

    fn handle_event(&mut self, event: LocalEvent, ctx: &mut DeviceContext) -> Result<(), SimError> {
        match event {
            LocalEvent::ServiceBeat { tid, index } => {
                enum Beat {
                    MmioRead,
                    MmioWrite,
                    SramRead(ReadBeat),
                    SramWrite(WriteBeat),
                }
                let beat = match self.pending.get(&tid) {
                    Some(Pending::MmioRead(_)) => Beat::MmioRead,
                    Some(Pending::MmioWrite(_)) => Beat::MmioWrite,
                    Some(Pending::SramRead { req, .. }) => Beat::SramRead(req.beats[index]),
                    Some(Pending::SramWrite { req, .. }) => Beat::SramWrite(req.beats[index]),
                    None => {
                        return Err(SimError::UnknownTransaction {
                            device: self.index,
                            tid,
                        })
                    }
                };
                match beat {
                    Beat::MmioRead => {
                        if let Some(Pending::MmioRead(req)) = self.pending.remove(&tid) {
                            self.service_mmio_read(req, ctx)?;
                        }
                        Ok(())
                    }
                    Beat::MmioWrite => {
                        if let Some(Pending::MmioWrite(req)) = self.pending.remove(&tid) {
                            self.service_mmio_write(req, ctx)?;
                        }
                        Ok(())
                    }
                    Beat::SramRead(b) => self.service_sram_read_beat(tid, b, ctx),
                    Beat::SramWrite(b) => self.service_sram_write_beat(tid, b, ctx),
                }
            }
            LocalEvent::AccelPoll => {
                self.poke_dma(ctx);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn as_accel_mut(&mut self) -> Option<&mut SystolicAccelerator> {
        Some(self)
    }
}
