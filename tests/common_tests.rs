//! Integration tests for common types and packet framing.

use soc_sim::common::{AccessWidth, DeviceIndex, SimError, TransactionId};
use soc_sim::soc::packet::{
    BurstLen, Packet, ReadBeat, ReadRequest, TidAllocator, WriteBeat, WriteRequest,
};

/// Tests access width byte counts.
#[test]
fn test_access_width_bytes() {
    assert_eq!(AccessWidth::Byte.bytes(), 1);
    assert_eq!(AccessWidth::Half.bytes(), 2);
    assert_eq!(AccessWidth::Word.bytes(), 4);
}

/// Tests burst length encoding for the supported beat counts.
#[test]
fn test_burst_len_encoding() {
    assert_eq!(BurstLen::from_beats(1).unwrap().log2(), 0);
    assert_eq!(BurstLen::from_beats(2).unwrap().log2(), 1);
    assert_eq!(BurstLen::from_beats(4).unwrap().log2(), 2);
    assert_eq!(BurstLen::from_beats(4).unwrap().beats(), 4);
}

/// Tests that beat counts outside {1, 2, 4} are rejected.
#[test]
fn test_burst_len_rejects_invalid() {
    for n in [0usize, 3, 5, 8] {
        assert_eq!(BurstLen::from_beats(n), Err(SimError::InvalidBurstLength(n)));
    }
}

/// Tests that the allocator hands out monotonically increasing IDs.
#[test]
fn test_tid_allocator_monotonic() {
    let mut tids = TidAllocator::new();
    let a = tids.allocate();
    let b = tids.allocate();
    let c = tids.allocate();
    assert!(a < b && b < c);
    assert_eq!(tids.issued(), 3);
}

/// Tests that request construction assigns fresh IDs in sequence.
#[test]
fn test_request_construction_assigns_ids() {
    let mut tids = TidAllocator::new();
    let src = DeviceIndex(0);
    let r1 = ReadRequest::single(
        &mut tids,
        src,
        "cpu",
        ReadBeat {
            width: AccessWidth::Word,
            addr: 0x100,
            meta: 0,
        },
    );
    let r2 = WriteRequest::single(
        &mut tids,
        src,
        "cpu",
        WriteBeat {
            width: AccessWidth::Word,
            addr: 0x104,
            data: 5,
        },
    );
    assert_eq!(r1.tid, TransactionId(0));
    assert_eq!(r2.tid, TransactionId(1));
}

/// Tests that a multi-beat request carries a matching burst encoding.
#[test]
fn test_request_burst_matches_beats() {
    let mut tids = TidAllocator::new();
    let beats = (0..4)
        .map(|i| ReadBeat {
            width: AccessWidth::Word,
            addr: 0x100 + i * 4,
            meta: i,
        })
        .collect();
    let req = ReadRequest::new(&mut tids, DeviceIndex(0), "dma", beats).unwrap();
    assert_eq!(req.burst, BurstLen::Quad);
    let packet = Packet::ReadRequest(req);
    assert!(packet.validate().is_ok());
    assert_eq!(packet.beat_count(), 4);
}

/// Tests that a three-beat request cannot be framed.
#[test]
fn test_three_beat_request_rejected() {
    let mut tids = TidAllocator::new();
    let beats = (0..3)
        .map(|i| ReadBeat {
            width: AccessWidth::Word,
            addr: 0x100 + i * 4,
            meta: i,
        })
        .collect();
    assert!(matches!(
        ReadRequest::new(&mut tids, DeviceIndex(0), "dma", beats),
        Err(SimError::InvalidBurstLength(3))
    ));
}

/// Tests error display formatting carries the diagnostic detail.
#[test]
fn test_error_display() {
    let e = SimError::OutOfRange {
        device: DeviceIndex(1),
        addr: 0xFFFF_0000,
        bytes: 4,
    };
    let s = format!("{}", e);
    assert!(s.contains("dev1"));
    assert!(s.contains("0xffff0000"));

    let e = SimError::UnknownTransaction {
        device: DeviceIndex(2),
        tid: TransactionId(42),
    };
    assert!(format!("{}", e).contains("tid42"));
}
