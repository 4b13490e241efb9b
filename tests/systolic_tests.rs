//! Integration tests for the systolic accelerator: staging through the
//! DMA engine, the compute pass, and result write-back.

use soc_sim::common::{AccessWidth, SimError};
use soc_sim::config::Config;
use soc_sim::soc::cpu::CpuOp;
use soc_sim::soc::systolic;
use soc_sim::soc::System;

fn build() -> System {
    System::new(&Config::default()).expect("default config wires up")
}

struct GemmSetup {
    m: u32,
    k: u32,
    n: u32,
    a_dram: u32,
    b_dram: u32,
    a_sram: u32,
    b_sram: u32,
    c_sram: u32,
    stride_a: u32,
    stride_b: u32,
    stride_c: u32,
}

/// Lays A and B out in main memory and scripts the full accelerator
/// programming sequence, ENABLE last, then a STATUS poll.
fn program_gemm(system: &mut System, setup: &GemmSetup, a: &[Vec<u8>], b: &[Vec<u8>]) {
    {
        let mem = system.memory_mut().expect("memory wired");
        for (i, row) in a.iter().enumerate() {
            mem.load_bytes(setup.a_dram + i as u32 * setup.stride_a, row);
        }
        for (i, row) in b.iter().enumerate() {
            mem.load_bytes(setup.b_dram + i as u32 * setup.stride_b, row);
        }
    }

    let base = Config::default().system.accel_base_val();
    let regs = [
        (
            systolic::REG_MATA_SIZE,
            ((setup.m - 1) << 16) | (setup.k - 1),
        ),
        (
            systolic::REG_MATB_SIZE,
            ((setup.k - 1) << 16) | (setup.n - 1),
        ),
        (
            systolic::REG_MATC_SIZE,
            ((setup.m - 1) << 16) | (setup.n - 1),
        ),
        (systolic::REG_A_ADDR, setup.a_sram),
        (systolic::REG_B_ADDR, setup.b_sram),
        (systolic::REG_C_ADDR, setup.c_sram),
        (
            systolic::REG_STRIDES,
            setup.stride_a | (setup.stride_b << 8) | (setup.stride_c << 16),
        ),
        (systolic::REG_A_DRAM, setup.a_dram),
        (systolic::REG_B_DRAM, setup.b_dram),
        (systolic::REG_ENABLE, 1),
    ];

    let cpu = system.cpu_mut().expect("cpu wired");
    for (i, (reg, data)) in regs.iter().enumerate() {
        cpu.push_op(CpuOp::Write {
            addr: base + reg,
            width: AccessWidth::Word,
            data: *data,
            meta: i as u32,
        });
    }
    cpu.push_op(CpuOp::PollUntil {
        addr: base + systolic::REG_STATUS,
        expect: 1,
        meta: 0xFF,
    });
}

/// Tests the canonical 2x2 product end to end: staged over the fabric by
/// the DMA engine, computed by the PE grid, written back into SRAM.
#[test]
fn test_gemm_two_by_two() {
    let mut system = build();
    let setup = GemmSetup {
        m: 2,
        k: 2,
        n: 2,
        a_dram: 0x1000,
        b_dram: 0x2000,
        a_sram: 0x0,
        b_sram: 0x20,
        c_sram: 0x40,
        stride_a: 4,
        stride_b: 4,
        stride_c: 8,
    };
    let a = vec![vec![1u8, 2], vec![3, 4]];
    let b = vec![vec![5u8, 6], vec![7, 8]];
    program_gemm(&mut system, &setup, &a, &b);
    system.kick_cpu();
    system.run_until_idle(1_000_000).expect("run completes");

    let sram_base = Config::default().system.accel_sram_base_val();
    let accel = system.accel_mut().unwrap();
    assert!(accel.is_done());
    assert!(!accel.is_enabled());
    assert_eq!(accel.matmul_count(), 1);

    let expected = [[19u32, 22], [43, 50]];
    for i in 0..2u32 {
        for j in 0..2u32 {
            let addr = sram_base + setup.c_sram + i * setup.stride_c + j * 4;
            assert_eq!(
                accel.peek_word(addr),
                expected[i as usize][j as usize],
                "C[{i}][{j}]"
            );
        }
    }

    // both operands went through the DMA engine
    assert_eq!(system.dma_mut().unwrap().transfer_count(), 2);
}

/// Tests that staging landed the operand bytes at the configured SRAM
/// offsets before compute consumed them.
#[test]
fn test_staging_lands_in_sram() {
    let mut system = build();
    let setup = GemmSetup {
        m: 2,
        k: 2,
        n: 2,
        a_dram: 0x1000,
        b_dram: 0x2000,
        a_sram: 0x100,
        b_sram: 0x140,
        c_sram: 0x180,
        stride_a: 4,
        stride_b: 4,
        stride_c: 8,
    };
    let a = vec![vec![9u8, 8], vec![7, 6]];
    let b = vec![vec![1u8, 0], vec![0, 1]];
    program_gemm(&mut system, &setup, &a, &b);
    system.kick_cpu();
    system.run_until_idle(1_000_000).expect("run completes");

    let sram_base = Config::default().system.accel_sram_base_val();
    let accel = system.accel_mut().unwrap();
    // row i of A sits at a_sram + i*stride, two valid bytes per row
    assert_eq!(accel.peek_word(sram_base + 0x100) & 0xFFFF, 0x0809);
    assert_eq!(accel.peek_word(sram_base + 0x104) & 0xFFFF, 0x0607);

    // B was the identity, so C equals A
    assert_eq!(accel.result(0, 0), 9);
    assert_eq!(accel.result(0, 1), 8);
    assert_eq!(accel.result(1, 0), 7);
    assert_eq!(accel.result(1, 1), 6);
}

/// Tests a rectangular product through the full staging pipeline.
#[test]
fn test_gemm_rectangular() {
    let mut system = build();
    let setup = GemmSetup {
        m: 2,
        k: 3,
        n: 1,
        a_dram: 0x1000,
        b_dram: 0x2000,
        a_sram: 0x0,
        b_sram: 0x40,
        c_sram: 0x80,
        stride_a: 4,
        stride_b: 4,
        stride_c: 4,
    };
    let a = vec![vec![1u8, 2, 3], vec![4, 5, 6]];
    let b = vec![vec![7u8], vec![8], vec![9]];
    program_gemm(&mut system, &setup, &a, &b);
    system.kick_cpu();
    system.run_until_idle(1_000_000).expect("run completes");

    let accel = system.accel_mut().unwrap();
    assert!(accel.is_done());
    assert_eq!(accel.result(0, 0), 50);
    assert_eq!(accel.result(1, 0), 122);
}

/// Tests loads and stores through the accelerator's SRAM port, driven
/// over the fabric by the host.
#[test]
fn test_sram_port_round_trip() {
    let mut system = build();
    let sram_base = Config::default().system.accel_sram_base_val();

    // seed one word directly, then exercise the fabric path around it
    system
        .accel_mut()
        .unwrap()
        .load_sram(sram_base + 0x200, &0x55AA_1234u32.to_le_bytes());

    {
        let cpu = system.cpu_mut().unwrap();
        cpu.push_op(CpuOp::Read {
            addr: sram_base + 0x200,
            width: AccessWidth::Word,
            meta: 0,
        });
        cpu.push_op(CpuOp::Read {
            addr: sram_base + 0x202,
            width: AccessWidth::Half,
            meta: 1,
        });
        cpu.push_op(CpuOp::Write {
            addr: sram_base + 0x204,
            width: AccessWidth::Word,
            data: 0xCAFE_F00D,
            meta: 2,
        });
    }
    system.kick_cpu();
    system.run_until_idle(100_000).unwrap();

    let completions = system.cpu_mut().unwrap().completions().to_vec();
    assert_eq!(completions[0].value, Some(0x55AA_1234));
    assert_eq!(completions[1].value, Some(0x55AA));

    let accel = system.accel_mut().unwrap();
    assert_eq!(accel.peek_word(sram_base + 0x204), 0xCAFE_F00D);
}

/// Tests that an access past the SRAM window extent aborts the run.
#[test]
fn test_sram_out_of_range_is_fatal() {
    let mut system = build();
    let config = Config::default();
    let sram_base = config.system.accel_sram_base_val();
    let sram_size = config.system.accel_sram_size_val() as u32;

    {
        let cpu = system.cpu_mut().unwrap();
        cpu.push_op(CpuOp::Read {
            // the last two bytes exist, the word does not
            addr: sram_base + sram_size - 2,
            width: AccessWidth::Word,
            meta: 0,
        });
    }
    system.kick_cpu();
    let result = system.run_until_idle(100_000);
    assert!(matches!(result, Err(SimError::OutOfRange { .. })));
}

/// Tests that size and address registers read back their programmed
/// values.
#[test]
fn test_register_readback() {
    let mut system = build();
    let base = Config::default().system.accel_base_val();

    let mata = (5u32 << 16) | 7;
    let strides = 4u32 | (8 << 8) | (16 << 16);
    {
        let cpu = system.cpu_mut().unwrap();
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_MATA_SIZE,
            width: AccessWidth::Word,
            data: mata,
            meta: 0,
        });
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_STRIDES,
            width: AccessWidth::Word,
            data: strides,
            meta: 1,
        });
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_A_DRAM,
            width: AccessWidth::Word,
            data: 0x1234,
            meta: 2,
        });
        cpu.push_op(CpuOp::Read {
            addr: base + systolic::REG_MATA_SIZE,
            width: AccessWidth::Word,
            meta: 3,
        });
        cpu.push_op(CpuOp::Read {
            addr: base + systolic::REG_STRIDES,
            width: AccessWidth::Word,
            meta: 4,
        });
        cpu.push_op(CpuOp::Read {
            addr: base + systolic::REG_A_DRAM,
            width: AccessWidth::Word,
            meta: 5,
        });
    }
    system.kick_cpu();
    system.run_until_idle(100_000).unwrap();

    let completions = system.cpu_mut().unwrap().completions().to_vec();
    assert_eq!(completions[3].value, Some(mata));
    assert_eq!(completions[4].value, Some(strides));
    assert_eq!(completions[5].value, Some(0x1234));
}

/// Tests that enabling with a misaligned SRAM address aborts the run.
#[test]
fn test_misaligned_sram_address_is_fatal() {
    let mut system = build();
    let base = Config::default().system.accel_base_val();
    {
        let cpu = system.cpu_mut().unwrap();
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_MATA_SIZE,
            width: AccessWidth::Word,
            data: (1 << 16) | 1,
            meta: 0,
        });
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_MATB_SIZE,
            width: AccessWidth::Word,
            data: (1 << 16) | 1,
            meta: 1,
        });
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_A_ADDR,
            width: AccessWidth::Word,
            data: 0x2,
            meta: 2,
        });
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_ENABLE,
            width: AccessWidth::Word,
            data: 1,
            meta: 3,
        });
    }
    system.kick_cpu();
    let result = system.run_until_idle(100_000);
    assert_eq!(result, Err(SimError::MisalignedAddress(0x2)));
}

/// Tests that operands over the on-chip capacity abort the run.
#[test]
fn test_capacity_overflow_is_fatal() {
    let mut system = build();
    let base = Config::default().system.accel_base_val();
    {
        let cpu = system.cpu_mut().unwrap();
        // 64x64 operands: 4096 elements against a 2048 cap
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_MATA_SIZE,
            width: AccessWidth::Word,
            data: (63 << 16) | 63,
            meta: 0,
        });
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_MATB_SIZE,
            width: AccessWidth::Word,
            data: (63 << 16) | 63,
            meta: 1,
        });
        cpu.push_op(CpuOp::Write {
            addr: base + systolic::REG_ENABLE,
            width: AccessWidth::Word,
            data: 1,
            meta: 2,
        });
    }
    system.kick_cpu();
    let result = system.run_until_idle(100_000);
    assert!(matches!(result, Err(SimError::CapacityExceeded { .. })));
}

/// Tests that an access to an unmapped control offset aborts the run.
#[test]
fn test_invalid_register_offset_is_fatal() {
    let mut system = build();
    let base = Config::default().system.accel_base_val();
    {
        let cpu = system.cpu_mut().unwrap();
        cpu.push_op(CpuOp::Read {
            addr: base + 0x3C,
            width: AccessWidth::Word,
            meta: 0,
        });
    }
    system.kick_cpu();
    let result = system.run_until_idle(100_000);
    assert!(matches!(result, Err(SimError::InvalidRegister { .. })));
}
