//! Packetization: slicing a send heap into wire packets.
//!
//! The first packet carries the full item-pointer list so a receiver
//! can lay out the heap from packet one; later packets repeat only the
//! four addressing pointers and their payload slice. Slicing is
//! deterministic and offset-ordered, so a fixed heap and packet size
//! always produce identical wire bytes.

use crate::defs::{item_id, HEADER_BYTES, ITEM_POINTER_BYTES};
use crate::error::{Error, Result};
use crate::flavour::ItemPointer;
use crate::packet::header_word;
use crate::send::heap::{ItemData, SendHeap};

/// Pointers present in every packet: heap cnt, heap length, payload
/// offset, payload length.
const SPECIAL_POINTERS: usize = 4;

/// Iterator over the wire packets of one [`SendHeap`].
pub struct PacketGenerator<'a> {
    heap: &'a SendHeap,
    payload_length: u64,
    /// Pre-encoded, pre-validated item pointers for the first packet.
    item_pointers: Vec<ItemPointer>,
    first_capacity: u64,
    rest_capacity: u64,
    offset: u64,
    emitted_first: bool,
    done: bool,
}

impl<'a> PacketGenerator<'a> {
    /// Prepare packetization of `heap` with packets of at most
    /// `max_packet_size` bytes.
    ///
    /// All validation happens here: the heap ID and total payload
    /// length must be encodable as immediates, every item pointer must
    /// fit the flavour, and `max_packet_size` must leave room for the
    /// first packet's pointer block plus at least one payload byte
    /// (when there is payload). Iteration itself cannot fail.
    pub fn new(heap: &'a SendHeap, max_packet_size: usize) -> Result<Self> {
        let flavour = heap.flavour();
        flavour.encode_immediate(item_id::HEAP_CNT_ID, heap.cnt())?;
        let payload_length = heap.payload_length();
        flavour.encode_immediate(item_id::HEAP_LENGTH_ID, payload_length)?;

        let mut item_pointers = Vec::with_capacity(heap.items().len());
        let mut offset = 0u64;
        for item in heap.items() {
            match &item.data {
                ItemData::Immediate(value) => {
                    item_pointers.push(flavour.encode_immediate(item.id, *value)?);
                }
                ItemData::Addressed(bytes) => {
                    item_pointers.push(flavour.encode_address(item.id, offset)?);
                    offset += bytes.len() as u64;
                }
            }
        }

        let first_overhead =
            HEADER_BYTES + ITEM_POINTER_BYTES * (SPECIAL_POINTERS + item_pointers.len());
        let rest_overhead = HEADER_BYTES + ITEM_POINTER_BYTES * SPECIAL_POINTERS;
        let first_capacity = max_packet_size.checked_sub(first_overhead).ok_or_else(|| {
            Error::invalid_argument(format!(
                "max_packet_size {max_packet_size} cannot hold {} item pointers",
                item_pointers.len()
            ))
        })?;
        if payload_length > 0 && first_capacity == 0 {
            return Err(Error::invalid_argument(format!(
                "max_packet_size {max_packet_size} leaves no room for payload"
            )));
        }

        Ok(PacketGenerator {
            heap,
            payload_length,
            item_pointers,
            first_capacity: first_capacity as u64,
            rest_capacity: (max_packet_size - rest_overhead) as u64,
            offset: 0,
            emitted_first: false,
            done: false,
        })
    }
}

impl Iterator for PacketGenerator<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }
        let flavour = self.heap.flavour();
        let (capacity, include_items) = if self.emitted_first {
            (self.rest_capacity, false)
        } else {
            (self.first_capacity, true)
        };
        let chunk = (self.payload_length - self.offset).min(capacity);

        let n_items = SPECIAL_POINTERS
            + if include_items {
                self.item_pointers.len()
            } else {
                0
            };
        let mut out =
            Vec::with_capacity(HEADER_BYTES + ITEM_POINTER_BYTES * n_items + chunk as usize);
        out.extend_from_slice(&header_word(flavour, n_items).to_be_bytes());

        // Validated in `new`; immediates here cannot exceed the split.
        let specials = [
            flavour.immediate_unchecked(item_id::HEAP_CNT_ID, self.heap.cnt()),
            flavour.immediate_unchecked(item_id::HEAP_LENGTH_ID, self.payload_length),
            flavour.immediate_unchecked(item_id::PAYLOAD_OFFSET_ID, self.offset),
            flavour.immediate_unchecked(item_id::PAYLOAD_LENGTH_ID, chunk),
        ];
        for pointer in &specials {
            out.extend_from_slice(&pointer.raw().to_be_bytes());
        }
        if include_items {
            for pointer in &self.item_pointers {
                out.extend_from_slice(&pointer.raw().to_be_bytes());
            }
        }
        self.heap.extend_payload_range(&mut out, self.offset, chunk);

        self.offset += chunk;
        self.emitted_first = true;
        if self.offset == self.payload_length {
            self.done = true;
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::BugCompat;
    use crate::flavour::Flavour;
    use crate::packet::PacketHeader;
    use bytes::Bytes;

    fn heap_with_payload(flavour: Flavour, len: usize) -> SendHeap {
        let mut heap = SendHeap::new(1, flavour, BugCompat::empty());
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        heap.add_item(0x1000, data).unwrap();
        heap
    }

    #[test]
    fn small_heap_fits_one_packet() {
        let flavour = Flavour::new(48).unwrap();
        let heap = heap_with_payload(flavour, 64);
        let packets: Vec<_> = heap.packets(1500).unwrap().collect();
        assert_eq!(packets.len(), 1);

        let packet = PacketHeader::decode(&packets[0]).unwrap();
        assert_eq!(packet.heap_cnt(), 1);
        assert_eq!(packet.heap_length(), 64);
        assert_eq!(packet.payload_offset(), 0);
        assert_eq!(packet.payload_length(), 64);
        assert_eq!(packet.pointers().len(), 1);
        assert_eq!(packet.wire_size(), packets[0].len());
    }

    #[test]
    fn large_heap_is_sliced_in_offset_order() {
        let flavour = Flavour::new(48).unwrap();
        let heap = heap_with_payload(flavour, 1000);
        let packets: Vec<_> = heap.packets(256).unwrap().collect();
        assert!(packets.len() > 1);

        let mut expected_offset = 0u64;
        let mut total = 0u64;
        for (index, wire) in packets.iter().enumerate() {
            assert!(wire.len() <= 256, "packet {index} overruns max_packet_size");
            let packet = PacketHeader::decode(wire).unwrap();
            assert_eq!(packet.heap_length(), 1000);
            assert_eq!(packet.payload_offset(), expected_offset);
            if index == 0 {
                assert_eq!(packet.pointers().len(), 1);
            } else {
                assert!(packet.pointers().is_empty());
            }
            expected_offset += packet.payload_length();
            total += packet.payload_length();
        }
        assert_eq!(total, 1000);
    }

    #[test]
    fn packetization_is_deterministic() {
        let flavour = Flavour::new(48).unwrap();
        let heap = heap_with_payload(flavour, 700);
        let a: Vec<_> = heap.packets(300).unwrap().collect();
        let b: Vec<_> = heap.packets(300).unwrap().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn immediate_only_heap_emits_single_empty_packet() {
        let flavour = Flavour::new(48).unwrap();
        let mut heap = SendHeap::new(3, flavour, BugCompat::empty());
        heap.add_immediate(0x1000, 42).unwrap();
        let packets: Vec<_> = heap.packets(1500).unwrap().collect();
        assert_eq!(packets.len(), 1);

        let packet = PacketHeader::decode(&packets[0]).unwrap();
        assert_eq!(packet.heap_length(), 0);
        assert_eq!(packet.payload_length(), 0);
        assert_eq!(packet.pointers().len(), 1);
        assert!(packet.pointers()[0].is_immediate());
    }

    #[test]
    fn end_heap_signals_stop() {
        let flavour = Flavour::default();
        let packets: Vec<_> = SendHeap::end(9, flavour).packets(1500).unwrap().collect();
        assert_eq!(packets.len(), 1);
        let packet = PacketHeader::decode(&packets[0]).unwrap();
        assert!(packet.end_of_stream());
    }

    #[test]
    fn too_small_packet_size_is_rejected() {
        let flavour = Flavour::new(48).unwrap();
        let heap = heap_with_payload(flavour, 64);
        // Header + 5 pointers = 48 bytes; no payload room.
        assert!(heap.packets(48).is_err());
        assert!(heap.packets(10).is_err());
        assert!(heap.packets(49).is_ok());
    }

    #[test]
    fn immediate_items_contribute_no_payload() {
        let flavour = Flavour::new(48).unwrap();
        let mut heap = SendHeap::new(1, flavour, BugCompat::empty());
        heap.add_item(0x1000, Bytes::from_static(b"abcd")).unwrap();
        heap.add_immediate(0x1001, 5).unwrap();
        heap.add_item(0x1002, Bytes::from_static(b"efgh")).unwrap();

        let packets: Vec<_> = heap.packets(1500).unwrap().collect();
        let packet = PacketHeader::decode(&packets[0]).unwrap();
        assert_eq!(packet.heap_length(), 8);
        assert_eq!(packet.payload(), b"abcdefgh");
        // Addressed offsets skip the immediate item.
        let ptrs = packet.pointers();
        assert_eq!(ptrs[0].address(flavour), 0);
        assert!(ptrs[1].is_immediate());
        assert_eq!(ptrs[2].address(flavour), 4);
    }
}
