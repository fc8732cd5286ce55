//! Receive-path scenarios exercised over hand-built wire bytes, plus
//! the pool-reuse and ringbuffer hand-off behaviour a deployment
//! relies on.

use std::sync::Arc;

use spead::defs::{ctrl, item_id};
use spead::packet::PacketHeader;
use spead::recv::{FrozenHeap, RingSink, Stream};
use spead::ring::Ringbuffer;
use spead::{BugCompat, Flavour, ItemPointer, MemoryPool};

const HEADER_BYTES: usize = 8;

/// Route rejected-packet logs to the test output when RUST_LOG is set.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn build_packet(flavour: Flavour, pointers: &[ItemPointer], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_BYTES + 8 * pointers.len() + payload.len());
    let header = (0x5304u64 << 48)
        | (((8 - flavour.heap_address_bytes()) as u64) << 40)
        | ((flavour.heap_address_bytes() as u64) << 32)
        | pointers.len() as u64;
    out.extend_from_slice(&header.to_be_bytes());
    for pointer in pointers {
        out.extend_from_slice(&pointer.raw().to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

/// One half of a 16-byte heap. The offset-0 packet also carries the
/// item pointer for item 0x1000.
fn half_packet(flavour: Flavour, heap_cnt: u64, offset: u64, payload: &[u8]) -> Vec<u8> {
    let mut pointers = vec![
        flavour.encode_immediate(item_id::HEAP_CNT_ID, heap_cnt).unwrap(),
        flavour.encode_immediate(item_id::HEAP_LENGTH_ID, 16).unwrap(),
        flavour.encode_immediate(item_id::PAYLOAD_OFFSET_ID, offset).unwrap(),
        flavour
            .encode_immediate(item_id::PAYLOAD_LENGTH_ID, payload.len() as u64)
            .unwrap(),
    ];
    if offset == 0 {
        pointers.push(flavour.encode_address(0x1000, 0).unwrap());
    }
    build_packet(flavour, &pointers, payload)
}

fn feed(stream: &mut Stream<impl FnMut(FrozenHeap)>, wire: &[u8]) -> bool {
    let packet = PacketHeader::decode(wire).expect("test packet must decode");
    stream.add_packet(&packet)
}

#[test]
fn two_packets_complete_heap() {
    let flavour = Flavour::new(48).unwrap();
    let mut received = Vec::new();
    let mut stream = Stream::new(|h: FrozenHeap| received.push(h));

    assert!(feed(&mut stream, &half_packet(flavour, 1, 0, b"AAAAAAAA")));
    assert!(feed(&mut stream, &half_packet(flavour, 1, 8, b"BBBBBBBB")));
    drop(stream);

    assert_eq!(received.len(), 1);
    let heap = &received[0];
    assert_eq!(heap.cnt(), 1);
    assert!(heap.is_complete());
    let items = heap.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, 0x1000);
    assert_eq!(
        items[0].value,
        spead::recv::ItemValue::Bytes(b"AAAAAAAABBBBBBBB")
    );
}

#[test]
fn duplicate_before_completion_changes_nothing() {
    init_tracing();
    let flavour = Flavour::new(48).unwrap();
    let mut received = Vec::new();
    let mut stream = Stream::new(|h: FrozenHeap| received.push(h));

    let a = half_packet(flavour, 1, 0, b"AAAAAAAA");
    assert!(feed(&mut stream, &a));
    assert!(!feed(&mut stream, &a));
    assert!(feed(&mut stream, &half_packet(flavour, 1, 8, b"BBBBBBBB")));
    drop(stream);

    assert_eq!(received.len(), 1);
    assert!(received[0].is_complete());
    assert_eq!(received[0].payload(), b"AAAAAAAABBBBBBBB");
}

#[test]
fn eviction_under_max_heaps_pressure() {
    let flavour = Flavour::new(48).unwrap();
    let mut received = Vec::new();
    let mut stream = Stream::with_config(|h: FrozenHeap| received.push(h), BugCompat::empty(), 2);

    for heap_cnt in [1u64, 2, 3] {
        assert!(feed(&mut stream, &half_packet(flavour, heap_cnt, 0, b"AAAAAAAA")));
    }
    assert_eq!(stream.live_heaps(), 2);
    drop(stream);

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].cnt(), 1);
    assert!(!received[0].is_complete());
}

#[test]
fn end_of_stream_stops_and_flushes_in_order() {
    let flavour = Flavour::new(48).unwrap();
    let mut received = Vec::new();
    let mut stream = Stream::new(|h: FrozenHeap| received.push(h));

    for heap_cnt in [2u64, 1] {
        assert!(feed(&mut stream, &half_packet(flavour, heap_cnt, 0, b"AAAAAAAA")));
    }
    let end = build_packet(
        flavour,
        &[
            flavour.encode_immediate(item_id::HEAP_CNT_ID, 3).unwrap(),
            flavour
                .encode_immediate(item_id::STREAM_CTRL_ID, ctrl::CTRL_STREAM_STOP)
                .unwrap(),
        ],
        b"",
    );
    assert!(feed(&mut stream, &end));
    assert!(stream.is_stopped());
    drop(stream);

    let order: Vec<u64> = received.iter().map(|h| h.cnt()).collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn malformed_magic_leaves_stream_untouched() {
    init_tracing();
    let flavour = Flavour::new(48).unwrap();
    let mut wire = half_packet(flavour, 1, 0, b"AAAAAAAA");
    wire[1] = 0x05; // 0x5305: wrong version word

    assert!(PacketHeader::decode(&wire).is_none());

    let mut received = Vec::new();
    let mut stream = Stream::new(|h: FrozenHeap| received.push(h));
    let consumed = spead::recv::decode_buffer(&mut stream, &wire);
    assert_eq!(consumed, 0);
    assert_eq!(stream.live_heaps(), 0);
    assert!(!stream.is_stopped());
    drop(stream);
    assert!(received.is_empty());
}

#[test]
fn pool_retention_stays_under_high_water() {
    let flavour = Flavour::new(48).unwrap();
    let pool = MemoryPool::with_config(1024, 4);
    let mut stream = Stream::new(|heap: FrozenHeap| drop(heap));
    stream.set_pool(pool.clone());

    for heap_cnt in 1u64..=20 {
        assert!(feed(&mut stream, &half_packet(flavour, heap_cnt, 0, b"AAAAAAAA")));
        assert!(feed(&mut stream, &half_packet(flavour, heap_cnt, 8, b"BBBBBBBB")));
    }
    stream.stop();

    assert!(pool.free_len() <= 4);
    assert!(pool.free_len() >= 1);
}

#[test]
fn ringbuffer_hand_off_to_consumer_thread() {
    let flavour = Flavour::new(48).unwrap();
    let ring = Arc::new(Ringbuffer::<FrozenHeap>::new(4));

    let consumer = {
        let ring = Arc::clone(&ring);
        std::thread::spawn(move || {
            let mut cnts = Vec::new();
            while let Ok(heap) = ring.pop() {
                cnts.push(heap.cnt());
            }
            cnts
        })
    };

    let mut stream = Stream::new(RingSink::new(Arc::clone(&ring)));
    for heap_cnt in 1u64..=8 {
        let packet_a = half_packet(flavour, heap_cnt, 0, b"AAAAAAAA");
        let packet_b = half_packet(flavour, heap_cnt, 8, b"BBBBBBBB");
        let a = PacketHeader::decode(&packet_a).unwrap();
        let b = PacketHeader::decode(&packet_b).unwrap();
        assert!(stream.add_packet(&a));
        assert!(stream.add_packet(&b));
    }
    stream.stop();

    let cnts = consumer.join().unwrap();
    assert_eq!(cnts, (1..=8).collect::<Vec<u64>>());
}
