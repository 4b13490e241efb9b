//! End-to-end integration tests for the full system.

use soc_sim::common::{AccessWidth, SimError};
use soc_sim::config::Config;
use soc_sim::soc::cpu::CpuOp;
use soc_sim::soc::{dma, systolic, System};

fn word_write(addr: u32, data: u32, meta: u32) -> CpuOp {
    CpuOp::Write {
        addr,
        width: AccessWidth::Word,
        data,
        meta,
    }
}

/// Tests a combined scenario: a DMA copy followed by a staged matrix
/// multiplication, all driven through the host port in one run.
#[test]
fn test_copy_then_gemm() {
    let config = Config::default();
    let dma_base = config.system.dma_base_val();
    let accel_base = config.system.accel_base_val();
    let sram_base = config.system.accel_sram_base_val();
    let mut system = System::new(&config).unwrap();

    {
        let mem = system.memory_mut().unwrap();
        // copy source: 8 bytes
        mem.load_bytes(0x4000, &[1, 2, 3, 4, 5, 6, 7, 8]);
        // operands: 2x2 matrices, rows on a 4-byte stride
        mem.load_bytes(0x1000, &[1, 2]);
        mem.load_bytes(0x1004, &[3, 4]);
        mem.load_bytes(0x2000, &[5, 6]);
        mem.load_bytes(0x2004, &[7, 8]);
    }

    {
        let cpu = system.cpu_mut().unwrap();
        // phase 1: plain 8x1 copy
        cpu.push_op(word_write(dma_base + dma::REG_SRC_ADDR, 0x4000, 0));
        cpu.push_op(word_write(dma_base + dma::REG_DST_ADDR, 0x4800, 1));
        cpu.push_op(word_write(
            dma_base + dma::REG_SIZE_CFG,
            (8 << 24) | (8 << 16) | (7 << 8),
            2,
        ));
        cpu.push_op(word_write(dma_base + dma::REG_ENABLE, 1, 3));
        cpu.push_op(CpuOp::PollUntil {
            addr: dma_base + dma::REG_DONE,
            expect: 1,
            meta: 4,
        });
        // clear DONE so the accelerator's own polling starts clean
        cpu.push_op(word_write(dma_base + dma::REG_DONE, 1, 5));

        // phase 2: 2x2 GEMM staged through the same DMA engine
        cpu.push_op(word_write(
            accel_base + systolic::REG_MATA_SIZE,
            (1 << 16) | 1,
            6,
        ));
        cpu.push_op(word_write(
            accel_base + systolic::REG_MATB_SIZE,
            (1 << 16) | 1,
            7,
        ));
        cpu.push_op(word_write(
            accel_base + systolic::REG_MATC_SIZE,
            (1 << 16) | 1,
            8,
        ));
        cpu.push_op(word_write(accel_base + systolic::REG_A_ADDR, 0x0, 9));
        cpu.push_op(word_write(accel_base + systolic::REG_B_ADDR, 0x20, 10));
        cpu.push_op(word_write(accel_base + systolic::REG_C_ADDR, 0x40, 11));
        cpu.push_op(word_write(
            accel_base + systolic::REG_STRIDES,
            4 | (4 << 8) | (8 << 16),
            12,
        ));
        cpu.push_op(word_write(accel_base + systolic::REG_A_DRAM, 0x1000, 13));
        cpu.push_op(word_write(accel_base + systolic::REG_B_DRAM, 0x2000, 14));
        cpu.push_op(word_write(accel_base + systolic::REG_ENABLE, 1, 15));
        cpu.push_op(CpuOp::PollUntil {
            addr: accel_base + systolic::REG_STATUS,
            expect: 1,
            meta: 16,
        });
    }

    system.kick_cpu();
    system.run_until_idle(1_000_000).expect("run completes");

    // copy landed
    {
        let mem = system.memory_mut().unwrap();
        let copied: Vec<u8> = (0..8).map(|i| mem.peek_byte(0x4800 + i)).collect();
        assert_eq!(copied, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    // gemm landed in SRAM
    let accel = system.accel_mut().unwrap();
    assert!(accel.is_done());
    assert_eq!(accel.peek_word(sram_base + 0x40), 19);
    assert_eq!(accel.peek_word(sram_base + 0x44), 22);
    assert_eq!(accel.peek_word(sram_base + 0x48), 43);
    assert_eq!(accel.peek_word(sram_base + 0x4C), 50);

    // three DMA transfers total: the copy plus both operand stagings
    assert_eq!(system.dma_mut().unwrap().transfer_count(), 3);

    // the script fully retired
    assert!(system.cpu_mut().unwrap().is_idle());

    // every burst was answered and nothing is stuck in the fabric
    assert!(system.fabric().is_drained());
    assert_eq!(
        system.stats.read_bursts + system.stats.write_bursts,
        system.stats.responses
    );

    // IDs are monotonic and never reused: the allocator issued exactly
    // one per request burst
    assert_eq!(
        system.tids_issued(),
        system.stats.read_bursts + system.stats.write_bursts
    );
}

/// Tests that the whole pipeline still completes, in order, when every
/// inbound port is throttled to a single slot.
#[test]
fn test_gemm_under_heavy_backpressure() {
    let mut config = Config::default();
    config.system.port_depth = 1;
    let accel_base = config.system.accel_base_val();
    let sram_base = config.system.accel_sram_base_val();
    let mut system = System::new(&config).unwrap();

    {
        let mem = system.memory_mut().unwrap();
        mem.load_bytes(0x1000, &[1, 2]);
        mem.load_bytes(0x1004, &[3, 4]);
        mem.load_bytes(0x2000, &[5, 6]);
        mem.load_bytes(0x2004, &[7, 8]);
    }

    {
        let cpu = system.cpu_mut().unwrap();
        let regs = [
            (systolic::REG_MATA_SIZE, (1 << 16) | 1),
            (systolic::REG_MATB_SIZE, (1 << 16) | 1),
            (systolic::REG_MATC_SIZE, (1 << 16) | 1),
            (systolic::REG_A_ADDR, 0x0),
            (systolic::REG_B_ADDR, 0x20),
            (systolic::REG_C_ADDR, 0x40),
            (systolic::REG_STRIDES, 4 | (4 << 8) | (8 << 16)),
            (systolic::REG_A_DRAM, 0x1000),
            (systolic::REG_B_DRAM, 0x2000),
            (systolic::REG_ENABLE, 1),
        ];
        for (i, (reg, data)) in regs.iter().enumerate() {
            cpu.push_op(word_write(accel_base + reg, *data, i as u32));
        }
        cpu.push_op(CpuOp::PollUntil {
            addr: accel_base + systolic::REG_STATUS,
            expect: 1,
            meta: 0xFF,
        });
    }

    system.kick_cpu();
    system.run_until_idle(1_000_000).expect("run completes");

    let accel = system.accel_mut().unwrap();
    assert!(accel.is_done());
    assert_eq!(accel.peek_word(sram_base + 0x40), 19);
    assert_eq!(accel.peek_word(sram_base + 0x44), 22);
    assert_eq!(accel.peek_word(sram_base + 0x48), 43);
    assert_eq!(accel.peek_word(sram_base + 0x4C), 50);

    // single-slot ports force the pending/retry path to carry traffic
    assert!(system.stats.queued > 0);
    assert!(system.stats.retries > 0);
    assert_eq!(system.stats.queued, system.stats.retries);
    assert!(system.fabric().is_drained());
}

/// Tests that a poll that can never succeed trips the tick budget
/// instead of spinning forever.
#[test]
fn test_unsatisfiable_poll_times_out() {
    let mut system = System::new(&Config::default()).unwrap();
    {
        let cpu = system.cpu_mut().unwrap();
        cpu.push_op(CpuOp::PollUntil {
            addr: 0x100,
            expect: 0xFFFF_FFFF,
            meta: 0,
        });
    }
    system.kick_cpu();
    assert_eq!(system.run_until_idle(5_000), Err(SimError::Timeout(5_000)));
}

/// Tests that an enabled trace buffer records one begin and one end
/// event per transaction.
#[test]
fn test_trace_records_transactions() {
    let config: Config = toml::from_str("[trace]\nenabled = true").unwrap();
    let mut system = System::new(&config).unwrap();
    {
        let cpu = system.cpu_mut().unwrap();
        cpu.push_op(word_write(0x100, 0xAB, 0));
        cpu.push_op(CpuOp::Read {
            addr: 0x100,
            width: AccessWidth::Word,
            meta: 1,
        });
    }
    system.kick_cpu();
    system.run_until_idle(10_000).unwrap();

    assert!(!system.trace.is_empty());
    let bursts = system.stats.read_bursts + system.stats.write_bursts;
    assert_eq!(system.trace.len() as u64, 2 * bursts);
}

/// Tests TOML parsing with partial overrides falling back to defaults.
#[test]
fn test_config_parsing_with_defaults() {
    let toml_src = r#"
        [system]
        memory_size = "0x20000"
        port_depth = 2

        [trace]
        enabled = true
    "#;
    let config: Config = toml::from_str(toml_src).unwrap();
    assert_eq!(config.system.memory_size_val(), 0x2_0000);
    assert_eq!(config.system.port_depth, 2);
    assert_eq!(config.system.dma_base_val(), 0xF000);
    assert_eq!(config.system.accel_sram_size_val(), 32000);
    assert!(config.trace.enabled);
    assert_eq!(config.trace.path, "trace.json");

    let system = System::new(&config).unwrap();
    assert_eq!(system.now(), 0);
}

/// Tests that an empty configuration is fully defaulted and runnable.
#[test]
fn test_empty_config_is_valid() {
    let config: Config = toml::from_str("").unwrap();
    let mut system = System::new(&config).unwrap();
    system.run_until_idle(1_000).unwrap();
    assert_eq!(system.tids_issued(), 0);
}
