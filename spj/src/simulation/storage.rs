//! Simulated storage layer for deterministic testing.
//!
//! One [`SimulatedStorage`] plays the storage block of one data node. It
//! holds the rows of the fragments that node owns and answers key lookups
//! and fragment scans the way the real storage layer does:
//! - rows are produced by running the request's read program, honouring
//!   `FLUSH_AI` redirections and the correlation pseudo column
//! - interpreted requests are filtered by their program first
//! - scans deliver rows in batches and park a cursor between them
//!
//! Faults are injected as temporary errors on new lookups and scans.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::distribution::HashDistribution;
use crate::protocol::interpreter::{Filter, split_section};
use crate::protocol::{
    AttributeHeader, Envelope, FILTER_REJECTED, FLUSH_AI_WORDS, FragmentCompletion, LookupConf,
    LookupRef, LookupReq, ROW_NOT_FOUND, ScanFragConf, ScanFragRef, ScanFragReq, ScanNextReq,
    Signal, TransIdAi, append_value,
};
use crate::types::{BlockNumber, BlockRef, NodeId, TransId};

/// Error code: the fragment is not stored on this node.
pub const WRONG_FRAGMENT_OWNER: u32 = 1220;
/// Error code: injected temporary failure.
pub const TEMPORARY_ERROR: u32 = 1204;
/// Error code: continue for a cursor that does not exist.
pub const UNKNOWN_CURSOR: u32 = 1231;
/// Error code: the attribute section could not be split into its parts.
pub const INVALID_PROGRAM: u32 = 4000;

/// Scan bound types, as found in the first word of each bound.
pub struct BoundType;

impl BoundType {
    pub const LE: u32 = 0;
    pub const LT: u32 = 1;
    pub const GE: u32 = 2;
    pub const GT: u32 = 3;
    pub const EQ: u32 = 4;

    /// One bound entry: `[type, header, value...]`.
    #[must_use]
    pub fn bound(bound_type: u32, attribute_id: u16, value: &[u32]) -> Vec<u32> {
        let mut out = vec![bound_type];
        append_value(&mut out, attribute_id, value);
        out
    }
}

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability that a new lookup is answered with a temporary error.
    pub lookup_error_rate: f64,
    /// Probability that a new scan is answered with a temporary error.
    pub scan_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Create a fault config with low fault rates (for stress testing).
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            lookup_error_rate: 0.01,
            scan_error_rate: 0.01,
        }
    }

    /// Create a fault config with high fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            lookup_error_rate: 0.1,
            scan_error_rate: 0.1,
        }
    }
}

/// A stored row: column values indexed by attribute id, `None` for null.
///
/// Column 0 is the primary key.
pub type StoredRow = Vec<Option<Vec<u32>>>;

/// Statistics about simulated storage operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedStorageStats {
    pub lookups: u64,
    pub lookups_not_found: u64,
    pub lookups_filtered: u64,
    pub scans_started: u64,
    pub scan_nexts: u64,
    pub scan_closes: u64,
    pub rows_read: u64,
    pub injected_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CursorKey {
    from: BlockRef,
    trans_id: TransId,
    sender_data: u32,
}

/// A parked scan.
#[derive(Debug)]
struct Cursor {
    req: ScanFragReq,
    position: usize,
}

/// Where a read program's output goes by default.
#[derive(Debug, Clone, Copy)]
struct ReadTarget {
    result_ref: BlockRef,
    result_data: u32,
    trans_id: TransId,
    correlation: u32,
}

/// In-memory storage block of one data node.
///
/// This implementation is not thread-safe. For DST, we run everything
/// in a single thread, so this is fine.
#[derive(Debug)]
pub struct SimulatedStorage {
    own_ref: BlockRef,
    distribution: HashDistribution,
    /// Rows per `(table, fragment)`, in scan order.
    fragments: HashMap<(u32, u32), Vec<StoredRow>>,
    cursors: HashMap<CursorKey, Cursor>,
    fault_config: FaultConfig,
    rng: StdRng,
    stats: SimulatedStorageStats,
}

impl SimulatedStorage {
    /// Create the storage block of `node`.
    #[must_use]
    pub fn new(
        node: NodeId,
        distribution: HashDistribution,
        seed: u64,
        fault_config: FaultConfig,
    ) -> Self {
        Self {
            own_ref: BlockRef::new(node, BlockNumber::LQH),
            distribution,
            fragments: HashMap::new(),
            cursors: HashMap::new(),
            fault_config,
            rng: StdRng::seed_from_u64(seed ^ u64::from(node.0)),
            stats: SimulatedStorageStats::default(),
        }
    }

    #[must_use]
    pub const fn reference(&self) -> BlockRef {
        self.own_ref
    }

    #[must_use]
    pub const fn stats(&self) -> SimulatedStorageStats {
        self.stats
    }

    /// Number of parked or running scan cursors.
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }

    /// Store a row in one of this node's fragments.
    ///
    /// # Panics
    ///
    /// Panics if the fragment is owned by another node.
    pub fn insert(&mut self, table_id: u32, fragment_id: u32, row: StoredRow) {
        assert_eq!(
            self.distribution.fragment_owner(fragment_id),
            self.own_ref.node,
            "fragment {fragment_id} is not stored on {}",
            self.own_ref
        );
        self.fragments
            .entry((table_id, fragment_id))
            .or_default()
            .push(row);
    }

    /// Handle one signal and return everything it sends.
    ///
    /// # Panics
    ///
    /// Panics on signals the storage layer never receives.
    pub fn receive(&mut self, envelope: Envelope) -> Vec<Envelope> {
        let mut out = Vec::new();
        let from = envelope.from;
        match envelope.signal {
            Signal::LookupReq(req) => self.exec_lookup(&req, &mut out),
            Signal::ScanFragReq(req) => self.exec_scan(from, req, &mut out),
            Signal::ScanNextReq(req) => self.exec_scan_next(from, &req, &mut out),
            other => panic!("storage received {}", other.name()),
        }
        out
    }

    fn send(&self, out: &mut Vec<Envelope>, to: BlockRef, signal: Signal) {
        out.push(Envelope {
            from: self.own_ref,
            to,
            signal,
        });
    }

    fn inject(&mut self, rate: f64) -> bool {
        if rate > 0.0 && self.rng.random_bool(rate.min(1.0)) {
            self.stats.injected_errors += 1;
            true
        } else {
            false
        }
    }

    fn owns(&self, fragment_id: u32) -> bool {
        self.distribution.fragment_owner(fragment_id) == self.own_ref.node
    }

    fn exec_lookup(&mut self, req: &LookupReq, out: &mut Vec<Envelope>) {
        self.stats.lookups += 1;
        let reject = |storage: &Self, out: &mut Vec<Envelope>, error_code| {
            let reply = LookupRef {
                client_data: req.client_data,
                trans_id: req.trans_id,
                error_code,
            };
            storage.send(out, req.client_ref, Signal::LookupRef(reply));
        };
        if self.inject(self.fault_config.lookup_error_rate) {
            reject(self, out, TEMPORARY_ERROR);
            return;
        }
        if !self.owns(req.fragment_id) {
            reject(self, out, WRONG_FRAGMENT_OWNER);
            return;
        }
        let row = self
            .fragments
            .get(&(req.table_id, req.fragment_id))
            .and_then(|rows| {
                rows.iter()
                    .find(|row| row.first().and_then(Option::as_ref) == Some(&req.key_info))
            });
        let Some(row) = row else {
            self.stats.lookups_not_found += 1;
            reject(self, out, ROW_NOT_FOUND);
            return;
        };
        let Some((program, reads, subroutine)) = program_parts(req.interpreted, &req.attr_info)
        else {
            reject(self, out, INVALID_PROGRAM);
            return;
        };
        if !run_filter(program, subroutine, row) {
            self.stats.lookups_filtered += 1;
            reject(self, out, FILTER_REJECTED);
            return;
        }
        let target = ReadTarget {
            result_ref: req.result_ref,
            result_data: req.result_data,
            trans_id: req.trans_id,
            correlation: req.correlation,
        };
        let rows = read_row(row, reads, target);
        self.stats.rows_read += 1;
        for (to, ai) in rows {
            self.send(out, to, Signal::TransIdAi(ai));
        }
        let conf = LookupConf {
            client_data: req.client_data,
            trans_id: req.trans_id,
        };
        self.send(out, req.client_ref, Signal::LookupConf(conf));
    }

    fn exec_scan(&mut self, from: BlockRef, req: ScanFragReq, out: &mut Vec<Envelope>) {
        self.stats.scans_started += 1;
        let error_code = if self.inject(self.fault_config.scan_error_rate) {
            Some(TEMPORARY_ERROR)
        } else if !self.owns(req.fragment_id) {
            Some(WRONG_FRAGMENT_OWNER)
        } else if program_parts(req.flags.interpreted, &req.attr_info).is_none() {
            Some(INVALID_PROGRAM)
        } else {
            None
        };
        if let Some(error_code) = error_code {
            let reply = ScanFragRef {
                sender_data: req.sender_data,
                trans_id: req.trans_id,
                error_code,
            };
            self.send(out, from, Signal::ScanFragRef(reply));
            return;
        }
        let key = CursorKey {
            from,
            trans_id: req.trans_id,
            sender_data: req.sender_data,
        };
        let cursor = Cursor { req, position: 0 };
        self.run_batch(key, cursor, out);
    }

    fn exec_scan_next(&mut self, from: BlockRef, req: &ScanNextReq, out: &mut Vec<Envelope>) {
        let key = CursorKey {
            from,
            trans_id: req.trans_id,
            sender_data: req.sender_data,
        };
        let cursor = self.cursors.remove(&key);
        if req.close {
            self.stats.scan_closes += 1;
            let conf = ScanFragConf {
                sender_data: req.sender_data,
                trans_id: req.trans_id,
                completed_rows: 0,
                completion: FragmentCompletion::Closed,
            };
            self.send(out, from, Signal::ScanFragConf(conf));
            return;
        }
        self.stats.scan_nexts += 1;
        let Some(mut cursor) = cursor else {
            let reply = ScanFragRef {
                sender_data: req.sender_data,
                trans_id: req.trans_id,
                error_code: UNKNOWN_CURSOR,
            };
            self.send(out, from, Signal::ScanFragRef(reply));
            return;
        };
        if req.batch_rows != 0 {
            cursor.req.batch_rows = req.batch_rows;
        }
        self.run_batch(key, cursor, out);
    }

    /// Deliver one batch and park the cursor unless the fragment is done.
    fn run_batch(&mut self, key: CursorKey, mut cursor: Cursor, out: &mut Vec<Envelope>) {
        let req = &cursor.req;
        let rows = self
            .fragments
            .get(&(req.table_id, req.fragment_id))
            .map_or(&[][..], Vec::as_slice);
        let Some((program, reads, subroutine)) = program_parts(req.flags.interpreted, &req.attr_info)
        else {
            return;
        };
        let limit = req.batch_rows.max(1);
        let mut sent = 0;
        let mut batch = Vec::new();
        while sent < limit && cursor.position < rows.len() {
            let row_no = cursor.position;
            cursor.position += 1;
            let row = &rows[row_no];
            if !within_bounds(&req.key_info, row) || !run_filter(program, subroutine, row) {
                continue;
            }
            let target = ReadTarget {
                result_ref: req.result_ref,
                result_data: req.sender_data,
                trans_id: req.trans_id,
                correlation: tuple_id(req.fragment_id, row_no),
            };
            batch.extend(read_row(row, reads, target));
            sent += 1;
        }
        let exhausted = cursor.position >= rows.len();
        let conf = ScanFragConf {
            sender_data: req.sender_data,
            trans_id: req.trans_id,
            completed_rows: sent,
            completion: if exhausted {
                FragmentCompletion::Exhausted
            } else {
                FragmentCompletion::MoreData
            },
        };
        trace!(fragment = req.fragment_id, rows = sent, exhausted, "scan batch");
        self.stats.rows_read += u64::from(sent);
        for (to, ai) in batch {
            self.send(out, to, Signal::TransIdAi(ai));
        }
        self.send(out, key.from, Signal::ScanFragConf(conf));
        if !exhausted {
            let _ = self.cursors.insert(key, cursor);
        }
    }
}

/// Tuple id reported as the correlation of a scanned row.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // row numbers stay far below 2^16 in simulations
pub const fn tuple_id(fragment_id: u32, row_no: usize) -> u32 {
    (fragment_id << 16) | (row_no as u32 & 0xFFFF)
}

/// Program, reads and subroutine of an attribute section.
fn program_parts(interpreted: bool, attr_info: &[u32]) -> Option<(&[u32], &[u32], &[u32])> {
    if !interpreted {
        return Some((&[], attr_info, &[]));
    }
    let parts = split_section(attr_info)?;
    Some((parts.program, parts.reads, parts.subroutine))
}

fn column(row: &StoredRow, attribute_id: u16) -> Option<&[u32]> {
    row.get(usize::from(attribute_id))
        .and_then(Option::as_deref)
}

/// Run a filter program against a row. A program that ends without an
/// exit instruction accepts the row.
fn run_filter(program: &[u32], subroutine: &[u32], row: &StoredRow) -> bool {
    let mut words = program.iter().copied();
    while let Some(word) = words.next() {
        let attribute_id = AttributeHeader(word).attribute_id();
        match word & 0xFFFF {
            Filter::EXIT_OK => return true,
            Filter::EXIT_REFUSE => return false,
            Filter::REFUSE_IF_NULL => {
                if column(row, attribute_id).is_none() {
                    return false;
                }
            }
            Filter::REFUSE_UNLESS_EQ_PARAM => {
                let Some(arg) = words.next() else {
                    return false;
                };
                let offset = (arg & 0xFFFF) as usize;
                let len = (arg >> 16) as usize;
                let param = subroutine.get(offset..offset + len);
                if param.is_none() || column(row, attribute_id) != param {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

/// True if the row satisfies every `[type, header, value...]` bound.
fn within_bounds(bounds: &[u32], row: &StoredRow) -> bool {
    let mut pos = 0;
    while pos + 1 < bounds.len() {
        let bound_type = bounds[pos];
        let header = AttributeHeader(bounds[pos + 1]);
        let start = pos + 2;
        let end = (start + header.data_size()).min(bounds.len());
        let wanted = &bounds[start..end];
        pos = end;
        let Some(value) = column(row, header.attribute_id()) else {
            return false;
        };
        let ordering = value.cmp(wanted);
        let ok = match bound_type {
            BoundType::LE => ordering.is_le(),
            BoundType::LT => ordering.is_lt(),
            BoundType::GE => ordering.is_ge(),
            BoundType::GT => ordering.is_gt(),
            BoundType::EQ => ordering.is_eq(),
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Run a read program over a row.
///
/// Values accumulate into one chunk. `FLUSH_AI` delivers the chunk to the
/// reference that follows it; whatever is left at the end goes to the
/// request's own result reference.
fn read_row(row: &StoredRow, reads: &[u32], target: ReadTarget) -> Vec<(BlockRef, TransIdAi)> {
    let mut deliveries = Vec::new();
    let mut chunk = Vec::new();
    let mut pos = 0;
    while pos < reads.len() {
        let attribute_id = AttributeHeader(reads[pos]).attribute_id();
        pos += 1;
        match attribute_id {
            AttributeHeader::FLUSH_AI => {
                let Some(args) = reads.get(pos..pos + FLUSH_AI_WORDS) else {
                    break;
                };
                pos += FLUSH_AI_WORDS;
                let ai = TransIdAi {
                    connect_ptr: args[1],
                    trans_id: target.trans_id,
                    data: std::mem::take(&mut chunk),
                };
                deliveries.push((BlockRef::from_word(args[0]), ai));
            }
            AttributeHeader::CORR_FACTOR32 => {
                append_value(&mut chunk, attribute_id, &[target.correlation]);
            }
            _ => match column(row, attribute_id) {
                Some(value) => append_value(&mut chunk, attribute_id, value),
                None => chunk.push(AttributeHeader::new(attribute_id, 0).0),
            },
        }
    }
    if !chunk.is_empty() {
        let ai = TransIdAi {
            connect_ptr: target.result_data,
            trans_id: target.trans_id,
            data: chunk,
        };
        deliveries.push((target.result_ref, ai));
    }
    deliveries
}
