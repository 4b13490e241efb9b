//! Integration tests for the main memory device.

use soc_sim::common::{AccessWidth, SimError};
use soc_sim::config::Config;
use soc_sim::soc::builder::MEMORY;
use soc_sim::soc::cpu::CpuOp;
use soc_sim::soc::device::{Action, DeviceContext, FabricDevice};
use soc_sim::soc::memory::MemoryDevice;
use soc_sim::soc::packet::{Packet, ReadBeat, ReadRequest, TidAllocator};
use soc_sim::soc::System;
use soc_sim::stats::SimStats;

fn build() -> System {
    System::new(&Config::default()).expect("default config wires up")
}

fn run_script(system: &mut System, ops: Vec<CpuOp>) -> Result<(), SimError> {
    {
        let cpu = system.cpu_mut().expect("cpu wired");
        for op in ops {
            cpu.push_op(op);
        }
    }
    system.kick_cpu();
    system.run_until_idle(100_000)
}

/// Tests write-then-read round trips for all access widths.
#[test]
fn test_round_trip_all_widths() {
    let mut system = build();
    let cases = [
        (0x100, AccessWidth::Word, 0xDEAD_BEEF),
        (0x200, AccessWidth::Half, 0xBEEF),
        (0x300, AccessWidth::Byte, 0xAB),
    ];

    let mut ops = Vec::new();
    for (i, (addr, width, data)) in cases.iter().enumerate() {
        ops.push(CpuOp::Write {
            addr: *addr,
            width: *width,
            data: *data,
            meta: i as u32 * 2,
        });
        ops.push(CpuOp::Read {
            addr: *addr,
            width: *width,
            meta: i as u32 * 2 + 1,
        });
    }
    run_script(&mut system, ops).unwrap();

    let completions = system.cpu_mut().unwrap().completions().to_vec();
    assert_eq!(completions.len(), 6);
    for (i, (_, _, data)) in cases.iter().enumerate() {
        let read = completions[i * 2 + 1];
        assert_eq!(read.meta, i as u32 * 2 + 1);
        assert_eq!(read.value, Some(*data));
    }
}

/// Tests little-endian byte layout across widths.
#[test]
fn test_little_endian_layout() {
    let mut system = build();
    run_script(
        &mut system,
        vec![
            CpuOp::Write {
                addr: 0x100,
                width: AccessWidth::Word,
                data: 0xAABB_CCDD,
                meta: 0,
            },
            CpuOp::Read {
                addr: 0x100,
                width: AccessWidth::Byte,
                meta: 1,
            },
            CpuOp::Read {
                addr: 0x102,
                width: AccessWidth::Half,
                meta: 2,
            },
        ],
    )
    .unwrap();

    let completions = system.cpu_mut().unwrap().completions().to_vec();
    assert_eq!(completions[1].value, Some(0xDD));
    assert_eq!(completions[2].value, Some(0xAABB));
}

/// Tests that sub-word stores leave neighboring bytes intact.
#[test]
fn test_subword_store_preserves_neighbors() {
    let mut system = build();
    run_script(
        &mut system,
        vec![
            CpuOp::Write {
                addr: 0x100,
                width: AccessWidth::Word,
                data: 0x1111_1111,
                meta: 0,
            },
            CpuOp::Write {
                addr: 0x101,
                width: AccessWidth::Byte,
                data: 0xFF,
                meta: 1,
            },
            CpuOp::Read {
                addr: 0x100,
                width: AccessWidth::Word,
                meta: 2,
            },
        ],
    )
    .unwrap();

    let completions = system.cpu_mut().unwrap().completions().to_vec();
    assert_eq!(completions[2].value, Some(0x1111_FF11));
}

/// Tests that an access beyond the backing extent aborts the run.
#[test]
fn test_out_of_bounds_is_fatal() {
    let mut system = build();
    let (base, size) = system.memory_mut().expect("memory wired").extent();
    let result = run_script(
        &mut system,
        vec![CpuOp::Read {
            // the last two bytes exist, the word does not
            addr: base + size as u32 - 2,
            width: AccessWidth::Word,
            meta: 0,
        }],
    );
    assert!(matches!(result, Err(SimError::OutOfRange { .. })));
}

/// Tests that a burst response carries one beat per request beat, in
/// request order.
#[test]
fn test_burst_beats_aggregate_in_order() {
    let mut memory = MemoryDevice::new(MEMORY, 0, 0x1000, 1);
    memory.load_bytes(0x40, &[0x11, 0, 0, 0, 0x22, 0, 0, 0, 0x33, 0, 0, 0, 0x44, 0, 0, 0]);

    let mut tids = TidAllocator::new();
    let mut stats = SimStats::default();
    let beats = (0..4)
        .map(|i| ReadBeat {
            width: AccessWidth::Word,
            addr: 0x40 + i * 4,
            meta: i,
        })
        .collect();
    let req = ReadRequest::new(&mut tids, MEMORY, "test", beats).unwrap();
    let tid = req.tid;

    // deliver the packet, then fire its service events in order
    let mut actions = Vec::new();
    {
        let mut ctx = DeviceContext::new(0, MEMORY, &mut tids, &mut stats, &mut actions);
        memory
            .handle_packet(Packet::ReadRequest(req), &mut ctx)
            .unwrap();
    }

    let mut scheduled = Vec::new();
    for action in actions {
        if let Action::Schedule { event, .. } = action {
            scheduled.push(event);
        }
    }
    assert_eq!(scheduled.len(), 4);

    let mut outputs = Vec::new();
    for event in scheduled {
        let mut ctx = DeviceContext::new(0, MEMORY, &mut tids, &mut stats, &mut outputs);
        memory.handle_event(event, &mut ctx).unwrap();
    }

    // exactly one aggregated response, beats in request order
    assert_eq!(outputs.len(), 1);
    let Some(Action::Respond(Packet::ReadResponse(resp))) = outputs.pop() else {
        panic!("expected an aggregated read response");
    };
    assert_eq!(resp.tid, tid);
    assert_eq!(resp.beats.len(), 4);
    let values: Vec<u32> = resp.beats.iter().map(|b| b.data).collect();
    assert_eq!(values, vec![0x11, 0x22, 0x33, 0x44]);
    let metas: Vec<u32> = resp.beats.iter().map(|b| b.meta).collect();
    assert_eq!(metas, vec![0, 1, 2, 3]);
}
