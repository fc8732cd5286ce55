//! Item descriptors: self-describing metadata transported in-band.
//!
//! A descriptor names an item (numeric ID and human-readable name) and
//! describes its layout (format records, shape, optional numpy-style
//! array header). On the wire a descriptor is a complete SPEAD packet
//! of its own, carried as the payload of a `DESCRIPTOR` item inside an
//! ordinary heap. Both directions live here: the encoder used by the
//! send heap and the decoder used by the frozen heap.
//!
//! Record widths depend on the flavour: field records are
//! `item_pointer_bytes + 1 - heap_address_bytes` wide, shape records
//! `1 + heap_address_bytes`. PySPEAD 0.5.2 instead hardcoded 4 and 8
//! and tagged variable dimensions with bit 1; both bugs are
//! reproducible via [`BugCompat`].

use bytes::Bytes;

use crate::defs::{item_id, BugCompat, HEADER_BYTES, ITEM_POINTER_BYTES};
use crate::error::{Error, Result};
use crate::flavour::Flavour;
use crate::packet::PacketHeader;
use crate::recv::{Heap, ItemValue};

/// Self-description of one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// ID of the described item.
    pub id: u64,
    /// Short name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Format records: `(type code, bit width)` pairs, e.g. `('u', 32)`.
    pub format: Vec<(char, u64)>,
    /// Dimensions; `-1` marks a variable dimension.
    pub shape: Vec<i64>,
    /// Raw numpy-style array header, if the item uses one.
    pub numpy_header: Bytes,
}

fn field_size(flavour: Flavour, bug_compat: BugCompat) -> usize {
    if bug_compat.contains(BugCompat::DESCRIPTOR_WIDTHS) {
        4
    } else {
        ITEM_POINTER_BYTES + 1 - flavour.heap_address_bytes()
    }
}

fn shape_size(flavour: Flavour, bug_compat: BugCompat) -> usize {
    if bug_compat.contains(BugCompat::DESCRIPTOR_WIDTHS) {
        8
    } else {
        1 + flavour.heap_address_bytes()
    }
}

fn variable_tag(bug_compat: BugCompat) -> u8 {
    if bug_compat.contains(BugCompat::SHAPE_BIT_1) {
        2
    } else {
        1
    }
}

/// Append `value` as a big-endian integer in `len` bytes.
fn store_be(out: &mut Vec<u8>, len: usize, value: u64) -> Result<()> {
    if len < 8 && value >> (8 * len) != 0 {
        return Err(Error::invalid_argument(format!(
            "value {value:#x} does not fit in {len} bytes"
        )));
    }
    out.extend_from_slice(&value.to_be_bytes()[8 - len..]);
    Ok(())
}

/// Read a big-endian integer from `bytes`.
fn load_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

impl Descriptor {
    /// Encode as a self-contained SPEAD packet.
    ///
    /// Fails with `InvalidArgument` when the described item's ID does
    /// not fit the flavour, or a format width / dimension does not fit
    /// its record.
    pub fn encode(&self, flavour: Flavour, bug_compat: BugCompat) -> Result<Bytes> {
        if self.id == 0 || self.id > flavour.max_item_id() {
            return Err(Error::invalid_argument(format!(
                "item ID {:#x} out of range",
                self.id
            )));
        }
        let field_size = field_size(flavour, bug_compat);
        let shape_size = shape_size(flavour, bug_compat);

        let have_numpy = !self.numpy_header.is_empty();
        let n_items = 9 + usize::from(have_numpy);
        let payload_size = self.name.len()
            + self.description.len()
            + self.format.len() * field_size
            + self.shape.len() * shape_size
            + self.numpy_header.len();

        let mut out = Vec::with_capacity(HEADER_BYTES + n_items * ITEM_POINTER_BYTES + payload_size);
        out.extend_from_slice(&crate::packet::header_word(flavour, n_items).to_be_bytes());

        let payload_size = payload_size as u64;
        let mut pointers = Vec::with_capacity(n_items);
        pointers.push(flavour.encode_immediate(item_id::HEAP_CNT_ID, 1)?);
        pointers.push(flavour.encode_immediate(item_id::HEAP_LENGTH_ID, payload_size)?);
        pointers.push(flavour.encode_immediate(item_id::PAYLOAD_OFFSET_ID, 0)?);
        pointers.push(flavour.encode_immediate(item_id::PAYLOAD_LENGTH_ID, payload_size)?);
        pointers.push(flavour.encode_immediate(item_id::DESCRIPTOR_ID_ID, self.id)?);
        let mut offset = 0u64;
        pointers.push(flavour.encode_address(item_id::DESCRIPTOR_NAME_ID, offset)?);
        offset += self.name.len() as u64;
        pointers.push(flavour.encode_address(item_id::DESCRIPTOR_DESCRIPTION_ID, offset)?);
        offset += self.description.len() as u64;
        pointers.push(flavour.encode_address(item_id::DESCRIPTOR_FORMAT_ID, offset)?);
        offset += (self.format.len() * field_size) as u64;
        pointers.push(flavour.encode_address(item_id::DESCRIPTOR_SHAPE_ID, offset)?);
        offset += (self.shape.len() * shape_size) as u64;
        if have_numpy {
            pointers.push(flavour.encode_address(item_id::DESCRIPTOR_DTYPE_ID, offset)?);
        }
        for pointer in &pointers {
            out.extend_from_slice(&pointer.raw().to_be_bytes());
        }

        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(self.description.as_bytes());
        for &(code, width) in &self.format {
            if !code.is_ascii() {
                return Err(Error::invalid_argument(format!(
                    "format code {code:?} is not ASCII"
                )));
            }
            out.push(code as u8);
            store_be(&mut out, field_size - 1, width)?;
        }
        let variable_tag = variable_tag(bug_compat);
        for &dim in &self.shape {
            if dim < 0 {
                out.push(variable_tag);
                store_be(&mut out, shape_size - 1, 0)?;
            } else {
                out.push(0);
                store_be(&mut out, shape_size - 1, dim as u64)?;
            }
        }
        out.extend_from_slice(&self.numpy_header);

        Ok(Bytes::from(out))
    }

    /// Decode a descriptor blob received as a `DESCRIPTOR` item.
    ///
    /// Returns `None` when the blob is not a well-formed, contiguous
    /// single-packet SPEAD heap, or its records do not parse.
    pub fn decode(data: &[u8], bug_compat: BugCompat) -> Option<Descriptor> {
        let packet = PacketHeader::decode(data)?;
        let flavour = packet.flavour();
        let mut heap = Heap::new(packet.heap_cnt(), bug_compat);
        if !heap.add_packet(&packet) {
            return None;
        }
        let frozen = heap.freeze();
        if !frozen.is_contiguous() {
            return None;
        }

        let mut descriptor = Descriptor::default();
        let mut raw_format: &[u8] = &[];
        let mut raw_shape: &[u8] = &[];
        for item in frozen.items() {
            match (item.id, item.value) {
                (item_id::DESCRIPTOR_ID_ID, ItemValue::Immediate(id)) => descriptor.id = id,
                (item_id::DESCRIPTOR_NAME_ID, ItemValue::Bytes(bytes)) => {
                    descriptor.name = String::from_utf8_lossy(bytes).into_owned();
                }
                (item_id::DESCRIPTOR_DESCRIPTION_ID, ItemValue::Bytes(bytes)) => {
                    descriptor.description = String::from_utf8_lossy(bytes).into_owned();
                }
                (item_id::DESCRIPTOR_FORMAT_ID, ItemValue::Bytes(bytes)) => raw_format = bytes,
                (item_id::DESCRIPTOR_SHAPE_ID, ItemValue::Bytes(bytes)) => raw_shape = bytes,
                (item_id::DESCRIPTOR_DTYPE_ID, ItemValue::Bytes(bytes)) => {
                    descriptor.numpy_header = Bytes::copy_from_slice(bytes);
                }
                _ => {}
            }
        }
        if descriptor.id == 0 {
            return None;
        }

        let field_size = field_size(flavour, bug_compat);
        if raw_format.len() % field_size != 0 {
            return None;
        }
        for record in raw_format.chunks_exact(field_size) {
            descriptor
                .format
                .push((char::from(record[0]), load_be(&record[1..])));
        }

        let shape_size = shape_size(flavour, bug_compat);
        if raw_shape.len() % shape_size != 0 {
            return None;
        }
        let variable_tag = variable_tag(bug_compat);
        for record in raw_shape.chunks_exact(shape_size) {
            if record[0] & variable_tag != 0 {
                descriptor.shape.push(-1);
            } else {
                descriptor.shape.push(load_be(&record[1..]) as i64);
            }
        }

        Some(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Descriptor {
        Descriptor {
            id: 0x1234,
            name: "x".into(),
            description: "a test item".into(),
            format: vec![('u', 32)],
            shape: vec![-1, 4],
            numpy_header: Bytes::new(),
        }
    }

    #[test]
    fn roundtrip_default_widths() {
        // SPEAD-64-24: field records 6 bytes wide.
        let flavour = Flavour::new(24).unwrap();
        let blob = sample().encode(flavour, BugCompat::empty()).unwrap();
        let decoded = Descriptor::decode(&blob, BugCompat::empty()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn roundtrip_wide_address_flavour() {
        // SPEAD-64-48: shape records 7 bytes wide.
        let flavour = Flavour::new(48).unwrap();
        let blob = sample().encode(flavour, BugCompat::empty()).unwrap();
        let decoded = Descriptor::decode(&blob, BugCompat::empty()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn record_widths_follow_flavour() {
        let base = 8 + 9 * 8; // header + nine pointers (no numpy header)
        let d = sample();
        // 24 address bits: field 6, shape 4.
        let blob = d.encode(Flavour::new(24).unwrap(), BugCompat::empty()).unwrap();
        assert_eq!(
            blob.len(),
            base + d.name.len() + d.description.len() + 6 + 2 * 4
        );
        // 48 address bits: field 3, shape 7.
        let blob = d.encode(Flavour::new(48).unwrap(), BugCompat::empty()).unwrap();
        assert_eq!(
            blob.len(),
            base + d.name.len() + d.description.len() + 3 + 2 * 7
        );
    }

    #[test]
    fn roundtrip_bug_compat_widths() {
        let flavour = Flavour::new(40).unwrap();
        let mask = BugCompat::DESCRIPTOR_WIDTHS | BugCompat::SHAPE_BIT_1;
        let d = sample();
        let blob = d.encode(flavour, mask).unwrap();
        // Forced widths: field 4, shape 8.
        assert_eq!(
            blob.len(),
            8 + 9 * 8 + d.name.len() + d.description.len() + 4 + 2 * 8
        );
        let decoded = Descriptor::decode(&blob, mask).unwrap();
        assert_eq!(decoded, d);
    }

    #[test]
    fn variable_dimension_tag_position() {
        let flavour = Flavour::new(40).unwrap();
        let d = Descriptor {
            shape: vec![-1],
            ..sample()
        };
        let plain = d.encode(flavour, BugCompat::empty()).unwrap();
        let legacy = d.encode(flavour, BugCompat::SHAPE_BIT_1).unwrap();
        // Shape record is the last in the payload (no numpy header);
        // its tag byte leads the 6-byte record.
        let plain_tag = plain[plain.len() - 6];
        let legacy_tag = legacy[legacy.len() - 6];
        assert_eq!(plain_tag, 1);
        assert_eq!(legacy_tag, 2);
        // Decoding with the wrong mask misreads the tag.
        assert_eq!(Descriptor::decode(&plain, BugCompat::empty()).unwrap().shape, vec![-1]);
        assert_eq!(
            Descriptor::decode(&plain, BugCompat::SHAPE_BIT_1).unwrap().shape,
            vec![0]
        );
    }

    #[test]
    fn numpy_header_roundtrips() {
        let flavour = Flavour::new(40).unwrap();
        let d = Descriptor {
            numpy_header: Bytes::from_static(b"{'descr': '<i4', 'fortran_order': False, 'shape': (40, 50)}"),
            ..sample()
        };
        let blob = d.encode(flavour, BugCompat::empty()).unwrap();
        let decoded = Descriptor::decode(&blob, BugCompat::empty()).unwrap();
        assert_eq!(decoded, d);
    }

    #[test]
    fn id_out_of_range_is_invalid_argument() {
        // SPEAD-64-56 leaves only 7 ID bits.
        let flavour = Flavour::new(56).unwrap();
        let d = Descriptor {
            id: 0x1234,
            ..sample()
        };
        assert!(d.encode(flavour, BugCompat::empty()).is_err());
        let d = Descriptor { id: 0, ..sample() };
        assert!(d.encode(flavour, BugCompat::empty()).is_err());
    }

    #[test]
    fn oversized_format_width_is_invalid_argument() {
        // SPEAD-64-56: field records are 2 bytes, 1 for the width.
        let flavour = Flavour::new(56).unwrap();
        let d = Descriptor {
            id: 0x12,
            name: "x".into(),
            format: vec![('u', 1 << 16)],
            ..Descriptor::default()
        };
        assert!(d.encode(flavour, BugCompat::empty()).is_err());
    }

    #[test]
    fn garbage_blob_does_not_decode() {
        assert!(Descriptor::decode(b"not a packet", BugCompat::empty()).is_none());
        assert!(Descriptor::decode(b"", BugCompat::empty()).is_none());
    }
}
