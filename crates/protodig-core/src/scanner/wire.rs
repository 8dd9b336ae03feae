//! Low-level protobuf wire format reading.
//!
//! Only what the scanner needs to bound a candidate record: varint
//! decoding and skipping over a single field's payload. Decoding the
//! record into a descriptor tree is left to `prost`.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 3/4: SGROUP/EGROUP (deprecated, not skippable here)
//! - 5: I32 (fixed32, sfixed32, float)

use crate::error::{Error, Result};

/// Longest legal varint encoding of a 64-bit value
const MAX_VARINT_LEN: usize = 10;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            _ => Err(Error::invalid_wire_format(
                0,
                format!("unknown wire type: {}", value),
            )),
        }
    }
}

/// Read a varint starting at `pos`.
///
/// Returns the decoded value and the position just past it. Fails with
/// [`Error::Truncated`] when no terminating byte (high bit clear) appears
/// within ten bytes or before the end of `buf`.
pub fn read_varint(buf: &[u8], pos: usize) -> Result<(u64, usize)> {
    let mut value: u64 = 0;

    for (i, &byte) in buf.iter().skip(pos).take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, pos + i + 1));
        }
    }

    Err(Error::truncated(pos))
}

/// Skip the payload of one field whose tag has already been read.
///
/// `pos` points just past the tag and `end` bounds the readable region.
/// Returns the position after the payload, or `None` when the payload is
/// truncated or uses a group wire type (which cannot be skipped without
/// tracking nesting).
pub fn skip_field(buf: &[u8], pos: usize, end: usize, tag: u64) -> Option<usize> {
    let end = end.min(buf.len());
    let wire_type = WireType::try_from((tag & 0x07) as u8).ok()?;

    let next = match wire_type {
        WireType::Varint => {
            let (_, next) = read_varint(&buf[..end], pos).ok()?;
            next
        }
        WireType::I64 => pos.checked_add(8)?,
        WireType::Len => {
            let (length, after_len) = read_varint(&buf[..end], pos).ok()?;
            let length = usize::try_from(length).ok()?;
            after_len.checked_add(length)?
        }
        WireType::StartGroup | WireType::EndGroup => return None,
        WireType::I32 => pos.checked_add(4)?,
    };

    (next <= end).then_some(next)
}

/// Walk fields from `start` and return where the record ends.
///
/// Serialized descriptors embedded by C++ code generators are stored as
/// null-terminated strings. A zero tag can never occur inside a valid
/// descriptor, so reading one marks the terminator. The walk also stops
/// at the first tag it cannot read or skip, and at the end of `buf`.
/// When `stop_at_repeated_name` is set, a second top-level field-1 tag
/// also ends the record: the next descriptor starts there.
///
/// The returned position excludes the terminating tag itself.
pub fn find_record_end(buf: &[u8], start: usize, stop_at_repeated_name: bool) -> usize {
    let mut position = start;
    let mut seen_name = false;

    while position < buf.len() {
        let Ok((tag, after_tag)) = read_varint(buf, position) else {
            return position;
        };

        if tag == 0 {
            return position;
        }

        if tag >> 3 == 1 {
            if seen_name && stop_at_repeated_name {
                return position;
            }
            seen_name = true;
        }

        match skip_field(buf, after_tag, buf.len(), tag) {
            Some(next) => position = next,
            None => return position,
        }
    }

    buf.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_varint_single_byte() {
        let (value, next) = read_varint(&[0x08], 0).unwrap();
        assert_eq!(value, 8);
        assert_eq!(next, 1);
    }

    #[test]
    fn test_read_varint_multi_byte_at_offset() {
        // Value 300 after two junk bytes
        let (value, next) = read_varint(&[0xFF, 0xFF, 0xAC, 0x02], 2).unwrap();
        assert_eq!(value, 300);
        assert_eq!(next, 4);
    }

    #[test]
    fn test_read_varint_max() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let (value, next) = read_varint(&data, 0).unwrap();
        assert_eq!(value, u64::MAX);
        assert_eq!(next, 10);
    }

    #[test]
    fn test_read_varint_truncated() {
        assert!(matches!(
            read_varint(&[0x80, 0x80], 0),
            Err(Error::Truncated { offset: 0 })
        ));
        assert!(read_varint(&[], 0).is_err());
        assert!(read_varint(&[0x01], 5).is_err());
    }

    #[test]
    fn test_read_varint_too_long() {
        let data = [0x80; 11];
        assert!(matches!(read_varint(&data, 0), Err(Error::Truncated { .. })));
    }

    #[test]
    fn test_wire_type_conversion() {
        assert_eq!(WireType::try_from(0).unwrap(), WireType::Varint);
        assert_eq!(WireType::try_from(1).unwrap(), WireType::I64);
        assert_eq!(WireType::try_from(2).unwrap(), WireType::Len);
        assert_eq!(WireType::try_from(5).unwrap(), WireType::I32);
        assert!(WireType::try_from(6).is_err());
    }

    #[test]
    fn test_skip_varint_field() {
        // Field 1, wire type 0, value 150
        let data = [0x08, 0x96, 0x01];
        assert_eq!(skip_field(&data, 1, data.len(), 0x08), Some(3));
    }

    #[test]
    fn test_skip_len_field() {
        let data = [0x0A, 0x05, b'h', b'e', b'l', b'l', b'o'];
        assert_eq!(skip_field(&data, 1, data.len(), 0x0A), Some(7));
        // Declared length runs past the end
        assert_eq!(skip_field(&data[..6], 1, 6, 0x0A), None);
    }

    #[test]
    fn test_skip_fixed_fields() {
        let data = [0x0D, 0x01, 0x02, 0x03, 0x04];
        assert_eq!(skip_field(&data, 1, data.len(), 0x0D), Some(5));

        let data = [0x09, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(skip_field(&data, 1, data.len(), 0x09), Some(9));
        assert_eq!(skip_field(&data, 1, 8, 0x09), None);
    }

    #[test]
    fn test_skip_group_unsupported() {
        let data = [0x0B, 0x0C];
        assert_eq!(skip_field(&data, 1, data.len(), 0x0B), None);
        assert_eq!(skip_field(&data, 1, data.len(), 0x0C), None);
    }

    #[test]
    fn test_record_end_at_null_tag() {
        let data = [0x0A, 0x02, b'a', b'b', 0x10, 0x01, 0x00, 0xFF];
        assert_eq!(find_record_end(&data, 0, true), 6);
    }

    #[test]
    fn test_record_end_at_unskippable_tag() {
        // 0x27 carries wire type 7
        let data = [0x0A, 0x01, b'a', 0x27, b'x'];
        assert_eq!(find_record_end(&data, 0, true), 3);
    }

    #[test]
    fn test_record_end_at_buffer_end() {
        let data = [0x0A, 0x01, b'a', 0x10, 0x05];
        assert_eq!(find_record_end(&data, 0, true), 5);
    }

    #[test]
    fn test_record_end_at_adjacent_record() {
        let data = [0x0A, 0x01, b'a', 0x0A, 0x01, b'b'];
        assert_eq!(find_record_end(&data, 0, true), 3);
        assert_eq!(find_record_end(&data, 0, false), 6);
    }
}
