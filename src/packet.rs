//! Packet decoding: a borrowed, validated view of one wire packet.
//!
//! Decoding never copies payload bytes. A [`PacketHeader`] borrows the
//! source buffer, which the transport must keep alive for the duration
//! of the `add_packet` call that consumes it; the heap assembler copies
//! the payload synchronously.

use tracing::debug;

use crate::defs::{ctrl, item_id, HEADER_BYTES, ITEM_POINTER_BYTES, MAGIC, VERSION};
use crate::flavour::{Flavour, ItemPointer};

/// Build the 8-byte big-endian header word for a packet carrying
/// `n_items` item pointers under `flavour`.
pub(crate) fn header_word(flavour: Flavour, n_items: usize) -> u64 {
    ((MAGIC as u64) << 56)
        | ((VERSION as u64) << 48)
        | (((ITEM_POINTER_BYTES - flavour.heap_address_bytes()) as u64) << 40)
        | ((flavour.heap_address_bytes() as u64) << 32)
        | n_items as u64
}

/// A decoded SPEAD packet: header fields, the non-special item
/// pointers, and a borrowed payload span.
#[derive(Debug)]
pub struct PacketHeader<'a> {
    flavour: Flavour,
    heap_cnt: u64,
    heap_length: i64,
    payload_offset: u64,
    payload_length: u64,
    end_of_stream: bool,
    pointers: Vec<ItemPointer>,
    payload: &'a [u8],
    wire_size: usize,
}

impl<'a> PacketHeader<'a> {
    /// Decode one packet from the front of `data`.
    ///
    /// Returns `None` on any malformed input: short buffer, bad magic
    /// or version, unsupported pointer split, missing heap count, or a
    /// declared payload extending past the buffer. The caller should
    /// discard the remainder of the buffer, since there is no way to
    /// find the next packet boundary after a corrupt one.
    pub fn decode(data: &'a [u8]) -> Option<Self> {
        if data.len() < HEADER_BYTES {
            debug!(len = data.len(), "packet shorter than header");
            return None;
        }
        if data[0] != MAGIC || data[1] != VERSION {
            debug!(magic = ?&data[..2], "bad magic/version");
            return None;
        }
        let item_id_bytes = usize::from(data[2]);
        let heap_address_bytes = usize::from(data[3]);
        if item_id_bytes + heap_address_bytes != ITEM_POINTER_BYTES
            || !(1..ITEM_POINTER_BYTES).contains(&heap_address_bytes)
        {
            debug!(item_id_bytes, heap_address_bytes, "unsupported pointer split");
            return None;
        }
        // The split was range-checked above, so this cannot fail.
        let flavour = Flavour::new(heap_address_bytes as u32 * 8).ok()?;

        let n_items = usize::from(u16::from_be_bytes([data[6], data[7]]));
        let pointers_end = HEADER_BYTES + ITEM_POINTER_BYTES * n_items;
        if data.len() < pointers_end {
            debug!(n_items, len = data.len(), "truncated item pointer list");
            return None;
        }

        let mut heap_cnt = None;
        let mut heap_length = -1i64;
        let mut payload_offset = 0u64;
        let mut payload_length = 0u64;
        let mut end_of_stream = false;
        let mut pointers = Vec::new();

        for word in data[HEADER_BYTES..pointers_end].chunks_exact(ITEM_POINTER_BYTES) {
            let raw = u64::from_be_bytes(word.try_into().ok()?);
            let pointer = ItemPointer::new(raw);
            match pointer.id(flavour) {
                item_id::HEAP_CNT_ID => {
                    if pointer.is_immediate() {
                        heap_cnt = Some(pointer.immediate(flavour));
                    }
                }
                item_id::HEAP_LENGTH_ID => {
                    if pointer.is_immediate() {
                        heap_length = pointer.immediate(flavour) as i64;
                    }
                }
                item_id::PAYLOAD_OFFSET_ID => {
                    if pointer.is_immediate() {
                        payload_offset = pointer.immediate(flavour);
                    }
                }
                item_id::PAYLOAD_LENGTH_ID => {
                    if pointer.is_immediate() {
                        payload_length = pointer.immediate(flavour);
                    }
                }
                item_id::STREAM_CTRL_ID => {
                    if pointer.is_immediate()
                        && pointer.immediate(flavour) == ctrl::CTRL_STREAM_STOP
                    {
                        end_of_stream = true;
                    }
                }
                0 => {} // NULL pointer, ignored
                _ => pointers.push(pointer),
            }
        }

        let Some(heap_cnt) = heap_cnt else {
            debug!("packet rejected: no heap cnt");
            return None;
        };

        let wire_size = pointers_end.checked_add(payload_length as usize)?;
        if data.len() < wire_size {
            debug!(
                payload_length,
                available = data.len() - pointers_end,
                "payload extends past buffer"
            );
            return None;
        }

        Some(PacketHeader {
            flavour,
            heap_cnt,
            heap_length,
            payload_offset,
            payload_length,
            end_of_stream,
            pointers,
            payload: &data[pointers_end..wire_size],
            wire_size,
        })
    }

    /// Flavour declared by the packet header.
    pub fn flavour(&self) -> Flavour {
        self.flavour
    }

    /// Heap this packet belongs to.
    pub fn heap_cnt(&self) -> u64 {
        self.heap_cnt
    }

    /// Total heap payload length, or -1 if the sender did not say.
    pub fn heap_length(&self) -> i64 {
        self.heap_length
    }

    /// Offset of this packet's payload within the heap payload.
    pub fn payload_offset(&self) -> u64 {
        self.payload_offset
    }

    /// Length of this packet's payload.
    pub fn payload_length(&self) -> u64 {
        self.payload_length
    }

    /// True if the packet carried a stream-stop control item.
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Non-special item pointers, in wire order.
    pub fn pointers(&self) -> &[ItemPointer] {
        &self.pointers
    }

    /// This packet's payload bytes (borrowed from the source buffer).
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Total number of wire bytes this packet consumed.
    pub fn wire_size(&self) -> usize {
        self.wire_size
    }
}
