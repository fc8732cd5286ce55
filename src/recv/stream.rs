//! Receive stream: multiplexing packets across live heaps.
//!
//! A stream keeps a small set of live heaps ordered by ascending heap
//! ID. Each incoming packet is routed to its heap (or starts a new
//! one). Heaps leave the live set exactly once: on completion, on
//! eviction under `max_heaps` pressure, or on stream stop. They are
//! frozen and handed to the stream's [`HeapSink`].
//!
//! A stream is single-writer: transports deliver packets from one
//! serialization context at a time, so no internal locking is needed.
//! Sharing across threads is the caller's concern (`&mut self`
//! enforces it).

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::defs::BugCompat;
use crate::packet::PacketHeader;
use crate::pool::MemoryPool;
use crate::recv::frozen::FrozenHeap;
use crate::recv::heap::Heap;
use crate::ring::Ringbuffer;

/// Default bound on live heaps. UDP reordering windows are short;
/// a handful of in-flight heaps is plenty.
pub const DEFAULT_MAX_HEAPS: usize = 4;

/// Destination for heaps leaving the live set.
///
/// Implemented for closures; [`RingSink`] forwards into a ringbuffer.
pub trait HeapSink {
    /// Called exactly once per live heap, in removal order. The heap
    /// may be complete, contiguous-only, or partial.
    fn heap_ready(&mut self, heap: FrozenHeap);

    /// Called once when the stream stops, after the final flush.
    fn stopped(&mut self) {}
}

impl<F: FnMut(FrozenHeap)> HeapSink for F {
    fn heap_ready(&mut self, heap: FrozenHeap) {
        self(heap)
    }
}

/// Sink that pushes frozen heaps into a shared [`Ringbuffer`] and
/// propagates stream stop to it.
pub struct RingSink {
    ring: Arc<Ringbuffer<FrozenHeap>>,
}

impl RingSink {
    /// Forward heaps into `ring`.
    pub fn new(ring: Arc<Ringbuffer<FrozenHeap>>) -> Self {
        RingSink { ring }
    }
}

impl HeapSink for RingSink {
    fn heap_ready(&mut self, heap: FrozenHeap) {
        if self.ring.push(heap).is_err() {
            debug!("ringbuffer already stopped, dropping heap");
        }
    }

    fn stopped(&mut self) {
        self.ring.stop();
    }
}

/// A SPEAD receive stream.
pub struct Stream<S: HeapSink> {
    max_heaps: usize,
    /// Live heaps, ordered by ascending heap ID.
    heaps: VecDeque<Heap>,
    stopped: bool,
    bug_compat: BugCompat,
    pool: Option<MemoryPool>,
    sink: S,
}

impl<S: HeapSink> Stream<S> {
    /// Create a stream with default settings delivering into `sink`.
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, BugCompat::empty(), DEFAULT_MAX_HEAPS)
    }

    /// Create a stream with an explicit bug-compat mask and live-heap
    /// bound.
    pub fn with_config(sink: S, bug_compat: BugCompat, max_heaps: usize) -> Self {
        assert!(max_heaps > 0, "max_heaps must be positive");
        Stream {
            max_heaps,
            heaps: VecDeque::new(),
            stopped: false,
            bug_compat,
            pool: None,
            sink,
        }
    }

    /// Change the live-heap bound. Heaps already over the limit are not
    /// ejected immediately; the set just cannot grow until it is back
    /// under the bound.
    pub fn set_max_heaps(&mut self, max_heaps: usize) {
        assert!(max_heaps > 0, "max_heaps must be positive");
        self.max_heaps = max_heaps;
    }

    /// Allocate heap payloads from `pool`.
    pub fn set_pool(&mut self, pool: MemoryPool) {
        self.pool = Some(pool);
    }

    /// Route one decoded packet. Returns `true` if some heap absorbed
    /// it. A packet carrying end-of-stream stops the stream after being
    /// absorbed.
    ///
    /// # Panics
    ///
    /// Calling this on a stopped stream is a programming error and
    /// panics.
    pub fn add_packet(&mut self, packet: &PacketHeader<'_>) -> bool {
        assert!(!self.stopped, "add_packet called on a stopped stream");

        let mut absorbed = false;
        let mut end_of_stream = false;
        let mut insert_at = 0;
        let mut found = None;
        for (index, heap) in self.heaps.iter().enumerate() {
            if heap.cnt() == packet.heap_cnt() {
                found = Some(index);
                break;
            }
            if heap.cnt() < packet.heap_cnt() {
                insert_at = index + 1;
            }
        }

        match found {
            Some(index) => {
                let heap = &mut self.heaps[index];
                if heap.add_packet(packet) {
                    absorbed = true;
                    end_of_stream = heap.is_end_of_stream();
                    if heap.is_complete() {
                        if let Some(heap) = self.heaps.remove(index) {
                            trace!(heap_cnt = heap.cnt(), "heap complete");
                            self.sink.heap_ready(heap.freeze());
                        }
                    }
                }
            }
            None => {
                let mut heap = Heap::new(packet.heap_cnt(), self.bug_compat);
                if let Some(pool) = &self.pool {
                    heap.set_pool(pool.clone());
                }
                if heap.add_packet(packet) {
                    absorbed = true;
                    end_of_stream = heap.is_end_of_stream();
                    if heap.is_complete() {
                        trace!(heap_cnt = heap.cnt(), "single-packet heap complete");
                        self.sink.heap_ready(heap.freeze());
                    } else {
                        self.heaps.insert(insert_at, heap);
                        if self.heaps.len() > self.max_heaps {
                            // Too many live heaps: age out the lowest
                            // ID, complete or not.
                            if let Some(evicted) = self.heaps.pop_front() {
                                debug!(
                                    heap_cnt = evicted.cnt(),
                                    complete = evicted.is_complete(),
                                    "evicting heap"
                                );
                                self.sink.heap_ready(evicted.freeze());
                            }
                        }
                    }
                }
            }
        }

        if end_of_stream {
            self.stop();
        }
        absorbed
    }

    /// Freeze and deliver every live heap, in ascending heap ID order.
    pub fn flush(&mut self) {
        for heap in self.heaps.drain(..) {
            trace!(heap_cnt = heap.cnt(), "flushing heap");
            self.sink.heap_ready(heap.freeze());
        }
    }

    /// Stop the stream: flush live heaps and notify the sink.
    /// Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.flush();
        self.sink.stopped();
    }

    /// True once the stream has stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Bug-compat mask heaps are assembled under.
    pub fn bug_compat(&self) -> BugCompat {
        self.bug_compat
    }

    /// Number of live heaps.
    pub fn live_heaps(&self) -> usize {
        self.heaps.len()
    }
}

/// Feed every packet found in `data` into `stream`, stopping at the
/// first undecodable position (there is no way to resynchronize after
/// a corrupt packet) or when the stream stops. Returns the number of
/// bytes consumed. Does not itself stop the stream.
pub fn decode_buffer<S: HeapSink>(stream: &mut Stream<S>, data: &[u8]) -> usize {
    let mut consumed = 0;
    while consumed < data.len() && !stream.is_stopped() {
        let Some(packet) = PacketHeader::decode(&data[consumed..]) else {
            break;
        };
        stream.add_packet(&packet);
        consumed += packet.wire_size();
    }
    consumed
}
