//! Immutable view of a received heap.
//!
//! Freezing transfers the payload buffer out of the live heap and
//! captures the completeness/contiguity verdicts, so consumers can
//! inspect a heap without holding up the receive path.

use tracing::debug;

use crate::defs::{item_id, BugCompat};
use crate::descriptor::Descriptor;
use crate::flavour::{Flavour, ItemPointer};
use crate::pool::PooledBuf;

/// A heap removed from the live set: complete, contiguous-only, or
/// partial. Check [`is_complete`](Self::is_complete) /
/// [`is_contiguous`](Self::is_contiguous) before trusting item bytes.
pub struct FrozenHeap {
    heap_cnt: u64,
    flavour: Flavour,
    bug_compat: BugCompat,
    payload: PooledBuf,
    /// Length of the initialized payload prefix.
    payload_len: usize,
    pointers: Vec<ItemPointer>,
    complete: bool,
    contiguous: bool,
    end_of_stream: bool,
}

/// One item exposed by a frozen heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item<'a> {
    /// Item ID from the pointer.
    pub id: u64,
    /// The item's value.
    pub value: ItemValue<'a>,
}

/// An item's value: inline in the pointer, or a payload slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemValue<'a> {
    /// Inline value from an immediate pointer.
    Immediate(u64),
    /// Borrowed payload bytes from an address pointer.
    Bytes(&'a [u8]),
}

impl FrozenHeap {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        heap_cnt: u64,
        flavour: Flavour,
        bug_compat: BugCompat,
        payload: PooledBuf,
        payload_len: usize,
        pointers: Vec<ItemPointer>,
        complete: bool,
        contiguous: bool,
        end_of_stream: bool,
    ) -> Self {
        FrozenHeap {
            heap_cnt,
            flavour,
            bug_compat,
            payload,
            payload_len,
            pointers,
            complete,
            contiguous,
            end_of_stream,
        }
    }

    /// Heap ID.
    pub fn cnt(&self) -> u64 {
        self.heap_cnt
    }

    /// Flavour the heap was received under.
    pub fn flavour(&self) -> Flavour {
        self.flavour
    }

    /// Bug-compat mask of the receiving stream.
    pub fn bug_compat(&self) -> BugCompat {
        self.bug_compat
    }

    /// True if the declared length was fully received.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True if the payload is a gap-free prefix covering every item
    /// offset. Implied by completeness.
    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    /// True if this heap carried a stream-stop control item.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// The heap payload. For a partial heap, unreceived gaps read as
    /// zero.
    pub fn payload(&self) -> &[u8] {
        // SAFETY: `Heap::freeze` established that every byte in
        // `[0, payload_len)` was written or zero-filled.
        unsafe { self.payload.assume_init(self.payload_len) }
    }

    /// Raw non-special item pointers, in wire order.
    pub fn pointers(&self) -> &[ItemPointer] {
        &self.pointers
    }

    /// Derive the item list. An address-mode item's bytes run from its
    /// offset to the next address-mode pointer's offset in wire order,
    /// or to the end of the payload, whichever comes first.
    pub fn items(&self) -> Vec<Item<'_>> {
        let payload = self.payload();
        let flavour = self.flavour;
        let mut items = Vec::with_capacity(self.pointers.len());
        for (index, pointer) in self.pointers.iter().enumerate() {
            let value = if pointer.is_immediate() {
                ItemValue::Immediate(pointer.immediate(flavour))
            } else {
                let start = (pointer.address(flavour) as usize).min(self.payload_len);
                let end = self.pointers[index + 1..]
                    .iter()
                    .find(|p| !p.is_immediate())
                    .map(|p| p.address(flavour) as usize)
                    .unwrap_or(self.payload_len)
                    .clamp(start, self.payload_len);
                ItemValue::Bytes(&payload[start..end])
            };
            items.push(Item {
                id: pointer.id(flavour),
                value,
            });
        }
        items
    }

    /// Decode every descriptor item in this heap. Malformed descriptor
    /// blobs are skipped with a log message.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        let mut out = Vec::new();
        for item in self.items() {
            if item.id != item_id::DESCRIPTOR_ID {
                continue;
            }
            let ItemValue::Bytes(blob) = item.value else {
                continue;
            };
            match Descriptor::decode(blob, self.bug_compat) {
                Some(descriptor) => out.push(descriptor),
                None => debug!(heap_cnt = self.heap_cnt, "skipping malformed descriptor"),
            }
        }
        out
    }
}

impl std::fmt::Debug for FrozenHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrozenHeap")
            .field("heap_cnt", &self.heap_cnt)
            .field("flavour", &self.flavour)
            .field("payload_len", &self.payload_len)
            .field("items", &self.pointers.len())
            .field("complete", &self.complete)
            .field("contiguous", &self.contiguous)
            .finish()
    }
}
