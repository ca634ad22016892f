//! Signals exchanged between the caller, this block and the storage layer.
//!
//! The same request structs are used inbound (from the caller, where the
//! attribute section carries the serialized query tree) and outbound (to the
//! storage layer, where it carries the compiled read program).

use std::fmt;

use crate::types::{BlockRef, TransId};

/// A variable-length payload attached to a signal.
pub type Section = Vec<u32>;

/// Storage-layer error: no row with the given key.
pub const ROW_NOT_FOUND: u32 = 626;
/// Storage-layer error: the interpreted filter rejected the row.
pub const FILTER_REJECTED: u32 = 899;

/// Single-row key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupReq {
    /// Where the confirmation or rejection goes.
    pub client_ref: BlockRef,
    /// Echoed in the confirmation or rejection.
    pub client_data: u32,
    pub trans_id: TransId,
    pub save_point_id: u32,
    pub table_id: u32,
    pub schema_version: u32,
    pub fragment_id: u32,
    pub dist_key: u32,
    pub hash_value: u32,
    /// Where row data not explicitly flushed elsewhere goes.
    pub result_ref: BlockRef,
    /// Echoed as the connect pointer of that row data.
    pub result_data: u32,
    /// Correlation id reported through the correlation pseudo columns.
    pub correlation: u32,
    /// The attribute section starts with an interpreted-program header.
    pub interpreted: bool,
    pub key_info: Section,
    pub attr_info: Section,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupConf {
    pub client_data: u32,
    pub trans_id: TransId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupRef {
    pub client_data: u32,
    pub trans_id: TransId,
    pub error_code: u32,
}

/// One row of attribute data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransIdAi {
    pub connect_ptr: u32,
    pub trans_id: TransId,
    pub data: Section,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanFlags {
    pub range_scan: bool,
    pub descending: bool,
    pub interpreted: bool,
}

/// Scan of one fragment, delivering rows in batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFragReq {
    /// Echoed in every confirmation or rejection, which go back to the sender.
    pub sender_data: u32,
    /// Where row data not explicitly flushed elsewhere goes.
    pub result_ref: BlockRef,
    pub trans_id: TransId,
    pub save_point_id: u32,
    pub table_id: u32,
    pub schema_version: u32,
    pub fragment_id: u32,
    pub batch_rows: u32,
    pub batch_bytes: u32,
    pub scan_priority: u32,
    pub flags: ScanFlags,
    pub correlation: u32,
    /// Scan bounds.
    pub key_info: Section,
    pub attr_info: Section,
}

/// State of the storage-layer cursor reported with a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FragmentCompletion {
    /// More rows remain; the cursor is parked.
    MoreData = 0,
    /// The fragment has been fully scanned.
    Exhausted = 1,
    /// The cursor has been closed.
    Closed = 2,
}

impl TryFrom<u32> for FragmentCompletion {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::MoreData),
            1 => Ok(Self::Exhausted),
            2 => Ok(Self::Closed),
            other => Err(other),
        }
    }
}

impl FragmentCompletion {
    /// True when the storage layer no longer holds a cursor.
    #[must_use]
    pub const fn is_done(self) -> bool {
        !matches!(self, Self::MoreData)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFragConf {
    pub sender_data: u32,
    pub trans_id: TransId,
    pub completed_rows: u32,
    pub completion: FragmentCompletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFragRef {
    pub sender_data: u32,
    pub trans_id: TransId,
    pub error_code: u32,
}

/// Continue or close a parked scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanNextReq {
    pub sender_data: u32,
    pub trans_id: TransId,
    pub close: bool,
    /// New row limit, zero keeps the previous one.
    pub batch_rows: u32,
    /// New byte limit, zero keeps the previous one.
    pub batch_bytes: u32,
}

/// Every signal this block sends or receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    LookupReq(LookupReq),
    LookupConf(LookupConf),
    LookupRef(LookupRef),
    TransIdAi(TransIdAi),
    ScanFragReq(ScanFragReq),
    ScanFragConf(ScanFragConf),
    ScanFragRef(ScanFragRef),
    ScanNextReq(ScanNextReq),
}

impl Signal {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LookupReq(_) => "LOOKUP_REQ",
            Self::LookupConf(_) => "LOOKUP_CONF",
            Self::LookupRef(_) => "LOOKUP_REF",
            Self::TransIdAi(_) => "TRANSID_AI",
            Self::ScanFragReq(_) => "SCAN_FRAGREQ",
            Self::ScanFragConf(_) => "SCAN_FRAGCONF",
            Self::ScanFragRef(_) => "SCAN_FRAGREF",
            Self::ScanNextReq(_) => "SCAN_NEXTREQ",
        }
    }

    #[must_use]
    pub const fn trans_id(&self) -> TransId {
        match self {
            Self::LookupReq(s) => s.trans_id,
            Self::LookupConf(s) => s.trans_id,
            Self::LookupRef(s) => s.trans_id,
            Self::TransIdAi(s) => s.trans_id,
            Self::ScanFragReq(s) => s.trans_id,
            Self::ScanFragConf(s) => s.trans_id,
            Self::ScanFragRef(s) => s.trans_id,
            Self::ScanNextReq(s) => s.trans_id,
        }
    }
}

/// A signal in flight between two blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: BlockRef,
    pub to: BlockRef,
    pub signal: Signal,
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.signal.name(), self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_completion_from_wire() {
        assert_eq!(FragmentCompletion::try_from(0), Ok(FragmentCompletion::MoreData));
        assert_eq!(FragmentCompletion::try_from(2), Ok(FragmentCompletion::Closed));
        assert_eq!(FragmentCompletion::try_from(7), Err(7));
        assert!(!FragmentCompletion::MoreData.is_done());
        assert!(FragmentCompletion::Exhausted.is_done());
    }
}
