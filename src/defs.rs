//! Wire-level constants shared by the send and receive paths.

use bitflags::bitflags;

/// First byte of every SPEAD packet.
pub const MAGIC: u8 = 0x53;
/// Second byte of every SPEAD packet (protocol version).
pub const VERSION: u8 = 0x04;

/// Width of an item pointer on the wire, in bytes. This core only
/// speaks the SPEAD-64-* flavours.
pub const ITEM_POINTER_BYTES: usize = 8;

/// Size of the fixed packet header, in bytes.
pub const HEADER_BYTES: usize = 8;

/// Reserved item IDs with protocol-defined meaning. Pointers carrying
/// these IDs are consumed by the packet codec or the heap assembler and
/// never surface as regular items (except `DESCRIPTOR_ID`, which is a
/// regular addressed item whose payload happens to be self-describing).
pub mod item_id {
    /// Heap identifier (mandatory immediate in every packet).
    pub const HEAP_CNT_ID: u64 = 0x01;
    /// Total heap payload length, when the sender knows it up front.
    pub const HEAP_LENGTH_ID: u64 = 0x02;
    /// Byte offset of this packet's payload within the heap.
    pub const PAYLOAD_OFFSET_ID: u64 = 0x03;
    /// Length of this packet's payload.
    pub const PAYLOAD_LENGTH_ID: u64 = 0x04;
    /// Item descriptor blob (itself an encoded SPEAD packet).
    pub const DESCRIPTOR_ID: u64 = 0x05;
    /// Stream control (see [`ctrl`](super::ctrl)).
    pub const STREAM_CTRL_ID: u64 = 0x06;

    /// Descriptor field: described item's ID.
    pub const DESCRIPTOR_ID_ID: u64 = 0x14;
    /// Descriptor field: item name.
    pub const DESCRIPTOR_NAME_ID: u64 = 0x10;
    /// Descriptor field: human-readable description.
    pub const DESCRIPTOR_DESCRIPTION_ID: u64 = 0x11;
    /// Descriptor field: shape record list.
    pub const DESCRIPTOR_SHAPE_ID: u64 = 0x12;
    /// Descriptor field: format record list.
    pub const DESCRIPTOR_FORMAT_ID: u64 = 0x13;
    /// Descriptor field: raw numpy-style array header.
    pub const DESCRIPTOR_DTYPE_ID: u64 = 0x15;
}

/// Values carried by a `STREAM_CTRL` immediate item.
pub mod ctrl {
    /// Start of stream. Informational; receivers ignore it.
    pub const CTRL_STREAM_START: u64 = 0;
    /// Request for descriptors to be re-issued.
    pub const CTRL_DESCRIPTOR_REISSUE: u64 = 1;
    /// End of stream: the receiver flushes and stops.
    pub const CTRL_STREAM_STOP: u64 = 2;
    /// Descriptors have been updated.
    pub const CTRL_DESCRIPTOR_UPDATE: u64 = 3;
}

bitflags! {
    /// Deliberately-wrong encodings accepted or produced for
    /// compatibility with older producers (notably PySPEAD 0.5.2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BugCompat: u32 {
        /// Descriptor field/shape records use fixed widths 4 and 8
        /// instead of the flavour-derived widths.
        const DESCRIPTOR_WIDTHS = 0b001;
        /// Variable dimensions in shape records are tagged with bit 1
        /// instead of bit 0.
        const SHAPE_BIT_1 = 0b010;
        /// Packed non-numpy values are byte-swapped. Affects the value
        /// adaptation layer only; carried here so the mask round-trips.
        const SWAP_ENDIAN = 0b100;
        /// Everything PySPEAD 0.5.2 got wrong.
        const PYSPEAD_0_5_2 = 0b111;
    }
}
