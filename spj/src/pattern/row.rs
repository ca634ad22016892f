//! Column access over a just-arrived row.
//!
//! Rows arrive as a flat sequence of `header + value` entries. Walking that
//! sequence once produces a [`RowHeader`] holding the offset of every
//! column, after which a [`RowRef`] answers column lookups in constant time.
//! Parameter lists use the same layout and are read through the same types.

use crate::error::SpjError;
use crate::protocol::AttributeHeader;

/// Upper bound on the columns of one row.
pub const MAX_ROW_COLUMNS: usize = 512;

/// Offsets of the columns of one row.
///
/// # Invariants
///
/// - `offsets[i]` is the index of column `i`'s header word in the row data.
/// - The value of column `i` lies entirely inside the row data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowHeader {
    offsets: Vec<usize>,
    len: usize,
}

impl RowHeader {
    /// Index every column of `data`.
    ///
    /// # Errors
    ///
    /// `InvalidPattern` if a value runs past the end of the data or the row
    /// has more than [`MAX_ROW_COLUMNS`] columns.
    pub fn build(data: &[u32]) -> Result<Self, SpjError> {
        let mut offsets = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            if offsets.len() == MAX_ROW_COLUMNS {
                return Err(SpjError::InvalidPattern);
            }
            offsets.push(pos);
            pos = next_column(data, pos)?;
        }
        Ok(Self { offsets, len: pos })
    }

    /// Index the first `count` values of `data`, which may continue past them.
    ///
    /// Returns the header and the number of words the values occupy.
    ///
    /// # Errors
    ///
    /// `InvalidTreeParametersSpecification` if fewer than `count` complete
    /// values are present.
    pub fn build_counted(data: &[u32], count: usize) -> Result<Self, SpjError> {
        if count > MAX_ROW_COLUMNS {
            return Err(SpjError::InvalidTreeParametersSpecification);
        }
        let mut offsets = Vec::with_capacity(count);
        let mut pos = 0;
        for _ in 0..count {
            if pos >= data.len() {
                return Err(SpjError::InvalidTreeParametersSpecification);
            }
            offsets.push(pos);
            pos = next_column(data, pos)
                .map_err(|_| SpjError::InvalidTreeParametersSpecification)?;
        }
        Ok(Self { offsets, len: pos })
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.offsets.len()
    }

    /// Number of words covered by the indexed columns.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn next_column(data: &[u32], pos: usize) -> Result<usize, SpjError> {
    let header = AttributeHeader(data[pos]);
    let end = pos + 1 + header.data_size();
    if end > data.len() {
        return Err(SpjError::InvalidPattern);
    }
    Ok(end)
}

/// One column of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column<'a> {
    pub header: AttributeHeader,
    pub data: &'a [u32],
}

impl Column<'_> {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.data.is_empty()
    }
}

/// Borrowed view of an indexed row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    header: &'a RowHeader,
    data: &'a [u32],
}

impl<'a> RowRef<'a> {
    /// Pair a header with the data it was built from.
    #[must_use]
    pub const fn new(header: &'a RowHeader, data: &'a [u32]) -> Self {
        Self { header, data }
    }

    #[must_use]
    pub fn column(&self, no: usize) -> Option<Column<'a>> {
        let &offset = self.header.offsets.get(no)?;
        let header = AttributeHeader(self.data[offset]);
        let start = offset + 1;
        Some(Column {
            header,
            data: &self.data[start..start + header.data_size()],
        })
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.header.column_count()
    }

    /// Correlation id of the row: the first word of its last column.
    ///
    /// Every row delivered to this block ends with a correlation column.
    #[must_use]
    pub fn correlation(&self) -> Option<u32> {
        let last = self.column_count().checked_sub(1)?;
        let column = self.column(last)?;
        if column.header.attribute_id() != AttributeHeader::CORR_FACTOR32 {
            return None;
        }
        column.data.first().copied()
    }
}
