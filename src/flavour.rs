//! SPEAD flavours and the item-pointer codec.
//!
//! A flavour fixes how the 64 bits of an item pointer are split between
//! the item ID and the heap address. The split is chosen per stream and
//! must be uniform across all packets of a heap.

use crate::error::{Error, Result};

/// A SPEAD-64-* flavour: the `(heap_address_bits, item_pointer_bits)`
/// split governing item-pointer layout. `item_pointer_bits` is fixed at
/// 64 in this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flavour {
    heap_address_bits: u8,
}

impl Flavour {
    /// Number of bits in an item pointer.
    pub const ITEM_POINTER_BITS: u32 = 64;

    /// Create a flavour with the given heap address width in bits.
    ///
    /// The width must be a positive multiple of 8 strictly less than
    /// the item pointer width.
    pub fn new(heap_address_bits: u32) -> Result<Self> {
        if heap_address_bits == 0
            || heap_address_bits % 8 != 0
            || heap_address_bits >= Self::ITEM_POINTER_BITS
        {
            return Err(Error::invalid_argument(format!(
                "heap_address_bits must be a multiple of 8 in (0, 64), got {heap_address_bits}"
            )));
        }
        Ok(Flavour {
            heap_address_bits: heap_address_bits as u8,
        })
    }

    /// Heap address width in bits.
    #[inline]
    pub fn heap_address_bits(self) -> u32 {
        u32::from(self.heap_address_bits)
    }

    /// Heap address width in bytes.
    #[inline]
    pub fn heap_address_bytes(self) -> usize {
        usize::from(self.heap_address_bits) / 8
    }

    /// Number of bits available for an item ID.
    #[inline]
    pub fn item_id_bits(self) -> u32 {
        Self::ITEM_POINTER_BITS - 1 - self.heap_address_bits()
    }

    /// Largest encodable item ID.
    #[inline]
    pub fn max_item_id(self) -> u64 {
        (1u64 << self.item_id_bits()) - 1
    }

    /// Mask covering the heap address field.
    #[inline]
    fn address_mask(self) -> u64 {
        (1u64 << self.heap_address_bits()) - 1
    }

    /// Encode an immediate item pointer carrying `value` inline.
    ///
    /// Fails if `id` does not fit in the ID field or `value` does not
    /// fit in the address field.
    pub fn encode_immediate(self, id: u64, value: u64) -> Result<ItemPointer> {
        self.check_id(id)?;
        if value > self.address_mask() {
            return Err(Error::invalid_argument(format!(
                "immediate value {value:#x} does not fit in {} bits",
                self.heap_address_bits()
            )));
        }
        Ok(ItemPointer(
            (1u64 << 63) | (id << self.heap_address_bits()) | value,
        ))
    }

    /// Encode an address item pointer locating `offset` bytes into the
    /// heap payload.
    pub fn encode_address(self, id: u64, offset: u64) -> Result<ItemPointer> {
        self.check_id(id)?;
        if offset > self.address_mask() {
            return Err(Error::invalid_argument(format!(
                "payload offset {offset:#x} does not fit in {} bits",
                self.heap_address_bits()
            )));
        }
        Ok(ItemPointer((id << self.heap_address_bits()) | offset))
    }

    /// Encode an immediate pointer without range checks. Callers have
    /// already validated that `id` and `value` fit the split.
    #[inline]
    pub(crate) fn immediate_unchecked(self, id: u64, value: u64) -> ItemPointer {
        ItemPointer((1u64 << 63) | (id << self.heap_address_bits()) | value)
    }

    fn check_id(self, id: u64) -> Result<()> {
        if id == 0 || id > self.max_item_id() {
            return Err(Error::invalid_argument(format!(
                "item ID {id:#x} out of range for {} ID bits",
                self.item_id_bits()
            )));
        }
        Ok(())
    }
}

impl Default for Flavour {
    /// SPEAD-64-40, the conventional default.
    fn default() -> Self {
        Flavour {
            heap_address_bits: 40,
        }
    }
}

impl std::fmt::Display for Flavour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SPEAD-64-{}", self.heap_address_bits)
    }
}

/// One decoded item pointer, in native endianness.
///
/// The flavour-dependent field split is applied by the accessors, so a
/// pointer is meaningless without the flavour it was decoded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ItemPointer(pub u64);

impl ItemPointer {
    /// Create a pointer from its raw 64-bit value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        ItemPointer(raw)
    }

    /// Get the raw 64-bit value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// True if the top (immediate) bit is set.
    #[inline]
    pub const fn is_immediate(self) -> bool {
        self.0 >> 63 != 0
    }

    /// Extract the item ID under `flavour`.
    #[inline]
    pub fn id(self, flavour: Flavour) -> u64 {
        (self.0 >> flavour.heap_address_bits()) & flavour.max_item_id()
    }

    /// Extract the inline value. Only meaningful when
    /// [`is_immediate`](Self::is_immediate) is true.
    #[inline]
    pub fn immediate(self, flavour: Flavour) -> u64 {
        self.0 & flavour.address_mask()
    }

    /// Extract the payload byte offset. Only meaningful when
    /// [`is_immediate`](Self::is_immediate) is false.
    #[inline]
    pub fn address(self, flavour: Flavour) -> u64 {
        self.0 & flavour.address_mask()
    }
}
