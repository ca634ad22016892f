//! Attribute header word codec.
//!
//! Every column value in a row, every parameter value and every entry of a
//! read program starts with one header word: `(attribute_id << 16) | byte_size`.
//! The value itself follows in `ceil(byte_size / 4)` words. A header with
//! a byte size of zero denotes a null value.

use std::fmt;

/// One attribute header word.
///
/// # Examples
///
/// ```
/// use spj::protocol::AttributeHeader;
/// let h = AttributeHeader::new(3, 6);
/// assert_eq!(h.attribute_id(), 3);
/// assert_eq!(h.data_size(), 2);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeHeader(pub u32);

impl AttributeHeader {
    /// Pseudo column: deliver the rows read so far to the reference that follows.
    pub const FLUSH_AI: u16 = 0xFFE7;
    /// Pseudo column: 32-bit correlation id of the row.
    pub const CORR_FACTOR32: u16 = 0xFFE6;

    #[must_use]
    pub const fn new(attribute_id: u16, byte_size: u16) -> Self {
        Self(((attribute_id as u32) << 16) | byte_size as u32)
    }

    /// Header used in a read program: attribute id with no size.
    #[must_use]
    pub const fn read(attribute_id: u16) -> Self {
        Self::new(attribute_id, 0)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // upper half of the word
    pub const fn attribute_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[must_use]
    pub const fn byte_size(self) -> u32 {
        self.0 & 0xFFFF
    }

    /// Size of the value in words.
    #[must_use]
    pub const fn data_size(self) -> usize {
        self.byte_size().div_ceil(4) as usize
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.byte_size() == 0
    }

    /// Header describing a value of `words` full words.
    ///
    /// # Panics
    ///
    /// Panics if the value does not fit the 16-bit size field.
    #[must_use]
    pub fn for_words(attribute_id: u16, words: usize) -> Self {
        let bytes = u16::try_from(words * 4).unwrap_or_else(|_| {
            panic!("attribute value of {words} words exceeds the header size field")
        });
        Self::new(attribute_id, bytes)
    }
}

impl fmt::Debug for AttributeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeHeader({:#x}, {})", self.attribute_id(), self.byte_size())
    }
}

/// Words following a `FLUSH_AI` read: destination reference, destination
/// data, source reference.
pub const FLUSH_AI_WORDS: usize = 3;

/// A `FLUSH_AI` read program entry.
#[must_use]
pub const fn flush_ai(dest_ref: u32, dest_data: u32, source_ref: u32) -> [u32; 1 + FLUSH_AI_WORDS] {
    [
        AttributeHeader::read(AttributeHeader::FLUSH_AI).0,
        dest_ref,
        dest_data,
        source_ref,
    ]
}

/// Append `header + value` for a value of whole words.
pub fn append_value(out: &mut Vec<u32>, attribute_id: u16, words: &[u32]) {
    out.push(AttributeHeader::for_words(attribute_id, words.len()).0);
    out.extend_from_slice(words);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_size_rounds_up() {
        assert_eq!(AttributeHeader::new(1, 0).data_size(), 0);
        assert_eq!(AttributeHeader::new(1, 1).data_size(), 1);
        assert_eq!(AttributeHeader::new(1, 4).data_size(), 1);
        assert_eq!(AttributeHeader::new(1, 5).data_size(), 2);
    }

    #[test]
    fn test_pseudo_columns_are_read_headers() {
        let flush = AttributeHeader::read(AttributeHeader::FLUSH_AI);
        assert_eq!(flush.0, 0xFFE7_0000);
        assert!(flush.is_null());
    }

    #[test]
    fn test_append_value() {
        let mut out = Vec::new();
        append_value(&mut out, 9, &[10, 20]);
        assert_eq!(out, vec![AttributeHeader::new(9, 8).0, 10, 20]);
    }
}
