//! Structured heaps for transmission.
//!
//! A [`SendHeap`] is an ordered list of items, each either an immediate
//! value (carried inline in its pointer) or a byte payload (addressed
//! into the heap's virtual payload). Descriptors are encoded up front
//! and re-enter the list as ordinary `DESCRIPTOR` items, so the
//! packetizer never treats them specially.

use bytes::Bytes;

use crate::defs::{ctrl, item_id, BugCompat};
use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::flavour::Flavour;
use crate::send::packets::PacketGenerator;

/// Payload of one send-side item.
#[derive(Debug, Clone)]
pub(crate) enum ItemData {
    /// Value small enough to ride in the pointer.
    Immediate(u64),
    /// Bytes appended to the heap's virtual payload.
    Addressed(Bytes),
}

#[derive(Debug, Clone)]
pub(crate) struct SendItem {
    pub(crate) id: u64,
    pub(crate) data: ItemData,
}

/// A heap being prepared for transmission.
#[derive(Debug, Clone)]
pub struct SendHeap {
    cnt: u64,
    flavour: Flavour,
    bug_compat: BugCompat,
    items: Vec<SendItem>,
}

impl SendHeap {
    /// Create an empty heap with ID `cnt`.
    pub fn new(cnt: u64, flavour: Flavour, bug_compat: BugCompat) -> Self {
        SendHeap {
            cnt,
            flavour,
            bug_compat,
            items: Vec::new(),
        }
    }

    /// Create the end-of-stream control heap: a single immediate
    /// `STREAM_CTRL` item requesting the receiver to stop. Send it as
    /// the last heap of a stream.
    pub fn end(cnt: u64, flavour: Flavour) -> Self {
        let mut heap = SendHeap::new(cnt, flavour, BugCompat::empty());
        heap.items.push(SendItem {
            id: item_id::STREAM_CTRL_ID,
            data: ItemData::Immediate(ctrl::CTRL_STREAM_STOP),
        });
        heap
    }

    /// Append an addressed item. Its bytes are concatenated, in item
    /// order, into the heap's virtual payload.
    ///
    /// Fails if `id` does not fit the flavour's ID field.
    pub fn add_item(&mut self, id: u64, data: impl Into<Bytes>) -> Result<()> {
        self.flavour.encode_address(id, 0)?;
        self.items.push(SendItem {
            id,
            data: ItemData::Addressed(data.into()),
        });
        Ok(())
    }

    /// Append an immediate item.
    ///
    /// Fails if `id` does not fit the flavour's ID field or `value`
    /// does not fit the address field.
    pub fn add_immediate(&mut self, id: u64, value: u64) -> Result<()> {
        self.flavour.encode_immediate(id, value)?;
        self.items.push(SendItem {
            id,
            data: ItemData::Immediate(value),
        });
        Ok(())
    }

    /// Encode `descriptor` and append it as a `DESCRIPTOR` item.
    pub fn add_descriptor(&mut self, descriptor: &Descriptor) -> Result<()> {
        let blob = descriptor.encode(self.flavour, self.bug_compat)?;
        self.items.push(SendItem {
            id: item_id::DESCRIPTOR_ID,
            data: ItemData::Addressed(blob),
        });
        Ok(())
    }

    /// Heap ID.
    pub fn cnt(&self) -> u64 {
        self.cnt
    }

    /// Flavour this heap will be encoded under.
    pub fn flavour(&self) -> Flavour {
        self.flavour
    }

    /// Bug-compat mask applied to descriptor encoding.
    pub fn bug_compat(&self) -> BugCompat {
        self.bug_compat
    }

    /// Number of items, descriptors included.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Total length of the virtual payload: every addressed item's
    /// bytes, concatenated in item order.
    pub fn payload_length(&self) -> u64 {
        self.items
            .iter()
            .map(|item| match &item.data {
                ItemData::Immediate(_) => 0,
                ItemData::Addressed(bytes) => bytes.len() as u64,
            })
            .sum()
    }

    /// Packetize into wire packets no larger than `max_packet_size`.
    pub fn packets(&self, max_packet_size: usize) -> Result<PacketGenerator<'_>> {
        PacketGenerator::new(self, max_packet_size)
    }

    pub(crate) fn items(&self) -> &[SendItem] {
        &self.items
    }

    /// Append the virtual-payload range `[start, start + len)` to `out`.
    pub(crate) fn extend_payload_range(&self, out: &mut Vec<u8>, start: u64, len: u64) {
        let end = start + len;
        let mut cursor = 0u64;
        for item in &self.items {
            let ItemData::Addressed(bytes) = &item.data else {
                continue;
            };
            let seg_start = cursor;
            let seg_end = cursor + bytes.len() as u64;
            cursor = seg_end;
            if seg_end <= start {
                continue;
            }
            if seg_start >= end {
                break;
            }
            let from = start.max(seg_start) - seg_start;
            let to = end.min(seg_end) - seg_start;
            out.extend_from_slice(&bytes[from as usize..to as usize]);
        }
    }
}
