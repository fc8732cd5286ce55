//! Incremental assembly of one heap from packets.
//!
//! Packets may arrive out of order, duplicated, or not at all. A
//! [`Heap`] absorbs the ones that belong to it, copies their payload
//! into a single buffer, and tracks enough bookkeeping to answer two
//! questions: is the heap *complete* (declared length fully received)
//! and is it *contiguous* (received bytes form a gap-free prefix
//! covering every item offset)? A complete heap is contiguous; the
//! converse does not hold.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::defs::BugCompat;
use crate::flavour::{Flavour, ItemPointer};
use crate::packet::PacketHeader;
use crate::pool::{MemoryPool, PooledBuf};
use crate::recv::frozen::FrozenHeap;

/// A heap in the process of being received.
pub struct Heap {
    heap_cnt: u64,
    /// Flavour of the first absorbed packet; all later packets must
    /// match it.
    flavour: Option<Flavour>,
    /// Declared payload length, or -1 while unknown.
    heap_length: i64,
    /// Payload bytes received so far.
    received_length: u64,
    /// Lower bound on the payload size implied by packet ranges and
    /// item-pointer offsets, when `heap_length` is unknown.
    implied_length: u64,
    end_of_stream: bool,
    bug_compat: BugCompat,
    /// Payload storage. Grown by doubling while the length is unknown;
    /// never zero-filled on the receive path.
    payload: PooledBuf,
    /// Non-special item pointers from all absorbed packets, wire order.
    pointers: Vec<ItemPointer>,
    /// Payload ranges seen, keyed by offset: duplicate detection and
    /// the contiguity scan.
    packet_ranges: HashMap<u64, u64>,
    pool: Option<MemoryPool>,
}

impl Heap {
    /// Create an empty heap expecting packets for `heap_cnt`.
    pub fn new(heap_cnt: u64, bug_compat: BugCompat) -> Self {
        Heap {
            heap_cnt,
            flavour: None,
            heap_length: -1,
            received_length: 0,
            implied_length: 0,
            end_of_stream: false,
            bug_compat,
            payload: PooledBuf::empty(),
            pointers: Vec::new(),
            packet_ranges: HashMap::new(),
            pool: None,
        }
    }

    /// Use `pool` for payload storage instead of direct allocation.
    pub fn set_pool(&mut self, pool: MemoryPool) {
        self.pool = Some(pool);
    }

    /// Attempt to absorb a decoded packet. Returns `false` (leaving the
    /// heap unchanged) when the packet does not belong here: wrong heap
    /// count, mismatched flavour, duplicate payload offset, or payload
    /// inconsistent with a previously declared heap length.
    pub fn add_packet(&mut self, packet: &PacketHeader<'_>) -> bool {
        if packet.heap_cnt() != self.heap_cnt {
            trace!(
                heap_cnt = self.heap_cnt,
                packet_cnt = packet.heap_cnt(),
                "packet for a different heap"
            );
            return false;
        }
        if let Some(flavour) = self.flavour {
            if flavour != packet.flavour() {
                debug!(
                    heap_cnt = self.heap_cnt,
                    %flavour,
                    packet_flavour = %packet.flavour(),
                    "rejecting packet with mismatched flavour"
                );
                return false;
            }
        }
        if self.heap_length >= 0
            && packet.heap_length() >= 0
            && packet.heap_length() != self.heap_length
        {
            debug!(heap_cnt = self.heap_cnt, "inconsistent heap length");
            return false;
        }
        let known_length = if self.heap_length >= 0 {
            self.heap_length
        } else {
            packet.heap_length()
        };
        if known_length >= 0
            && packet.payload_offset() + packet.payload_length() > known_length as u64
        {
            debug!(heap_cnt = self.heap_cnt, "payload range beyond heap length");
            return false;
        }
        if self.packet_ranges.contains_key(&packet.payload_offset()) {
            trace!(
                heap_cnt = self.heap_cnt,
                payload_offset = packet.payload_offset(),
                "duplicate packet"
            );
            return false;
        }

        // Accepted from here on.
        let flavour = packet.flavour();
        self.flavour = Some(flavour);
        if packet.heap_length() >= 0 {
            self.heap_length = packet.heap_length();
        }

        let mut implied = self
            .implied_length
            .max(packet.payload_offset() + packet.payload_length());
        for pointer in packet.pointers() {
            if !pointer.is_immediate() {
                implied = implied.max(pointer.address(flavour));
            }
        }
        self.implied_length = implied;

        if packet.payload_length() > 0 {
            let needed = self.min_length() as usize;
            let exact = self.heap_length >= 0;
            self.payload_reserve(needed, exact);
            self.payload
                .write_at(packet.payload_offset() as usize, packet.payload());
        }

        self.received_length += packet.payload_length();
        self.pointers.extend_from_slice(packet.pointers());
        self.packet_ranges
            .insert(packet.payload_offset(), packet.payload_length());
        if packet.end_of_stream() {
            self.end_of_stream = true;
        }
        true
    }

    /// Ensure the payload buffer holds at least `size` bytes. With
    /// `exact` false a doubling heuristic over-allocates so repeated
    /// small growth stays amortized.
    fn payload_reserve(&mut self, size: usize, exact: bool) {
        let current = self.payload.capacity();
        if size <= current {
            return;
        }
        let mut target = size;
        if !exact {
            target = target.max(current * 2);
        }
        let mut fresh = match &self.pool {
            Some(pool) if pool.buf_size() >= target => pool.allocate(),
            _ => PooledBuf::direct(target),
        };
        fresh.copy_from(&self.payload);
        self.payload = fresh;
    }

    /// Heap ID.
    pub fn cnt(&self) -> u64 {
        self.heap_cnt
    }

    /// Declared payload length, or -1 while unknown.
    pub fn heap_length(&self) -> i64 {
        self.heap_length
    }

    /// Payload bytes received so far.
    pub fn received_length(&self) -> u64 {
        self.received_length
    }

    /// Smallest payload size consistent with everything seen so far:
    /// the declared length when known, otherwise the bound implied by
    /// packet ranges and item-pointer offsets.
    pub fn min_length(&self) -> u64 {
        if self.heap_length >= 0 {
            self.heap_length as u64
        } else {
            self.implied_length
        }
    }

    /// Bug-compat mask the owning stream was configured with.
    pub fn bug_compat(&self) -> BugCompat {
        self.bug_compat
    }

    /// True once the declared length is known and fully received.
    pub fn is_complete(&self) -> bool {
        self.heap_length >= 0 && self.received_length == self.heap_length as u64
    }

    /// True if the received ranges tile `[0, min_length)` without gaps.
    ///
    /// Sorts the recorded ranges at query time; overlap-compensated
    /// byte counts cannot fool this scan the way a bare
    /// `received == min_length` comparison could.
    pub fn is_contiguous(&self) -> bool {
        let mut ranges: Vec<(u64, u64)> = self
            .packet_ranges
            .iter()
            .filter(|(_, &len)| len > 0)
            .map(|(&off, &len)| (off, len))
            .collect();
        ranges.sort_unstable_by_key(|&(off, _)| off);
        let mut expect = 0u64;
        for (off, len) in ranges {
            if off != expect {
                return false;
            }
            expect += len;
        }
        expect == self.min_length()
    }

    /// True if a stream-stop control item was seen.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Convert into an immutable heap, transferring payload ownership.
    ///
    /// Completeness and contiguity are captured as flags for the
    /// consumer. For a non-contiguous heap the unreceived gaps are
    /// zero-filled here, off the hot path, so the frozen payload is a
    /// fully initialized `[0, min_length)` prefix.
    pub fn freeze(mut self) -> FrozenHeap {
        let complete = self.is_complete();
        let contiguous = self.is_contiguous();
        let payload_len = self.min_length() as usize;

        if !contiguous && payload_len > 0 {
            self.payload_reserve(payload_len, true);
            let mut ranges: Vec<(u64, u64)> = self
                .packet_ranges
                .iter()
                .filter(|(_, &len)| len > 0)
                .map(|(&off, &len)| (off, len))
                .collect();
            ranges.sort_unstable_by_key(|&(off, _)| off);
            let mut cursor = 0u64;
            for (off, len) in ranges {
                if off > cursor {
                    self.payload
                        .write_zeros(cursor as usize, (off - cursor) as usize);
                }
                cursor = cursor.max(off + len);
            }
            if (cursor as usize) < payload_len {
                self.payload
                    .write_zeros(cursor as usize, payload_len - cursor as usize);
            }
        }

        let flavour = self.flavour.unwrap_or_default();
        let payload = std::mem::replace(&mut self.payload, PooledBuf::empty());
        let pointers = std::mem::take(&mut self.pointers);
        FrozenHeap::new(
            self.heap_cnt,
            flavour,
            self.bug_compat,
            payload,
            payload_len,
            pointers,
            complete,
            contiguous,
            self.end_of_stream,
        )
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("heap_cnt", &self.heap_cnt)
            .field("heap_length", &self.heap_length)
            .field("received_length", &self.received_length)
            .field("min_length", &self.min_length())
            .field("packets", &self.packet_ranges.len())
            .field("complete", &self.is_complete())
            .finish()
    }
}
