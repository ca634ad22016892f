//! Block-wide activity counters.

use std::fmt;

use super::request::BatchAccounting;

/// Monotonic counters of what the block has done since it started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCounters {
    pub lookups_received: u64,
    pub table_scans_received: u64,
    pub range_scans_received: u64,
    /// Requests rejected before they started.
    pub builds_rejected: u64,
    pub local_reads_sent: u64,
    pub remote_reads_sent: u64,
    /// Lookups answered with "row not found".
    pub reads_not_found: u64,
    pub scan_batches_returned: u64,
    pub scan_rows_returned: u64,
    pub requests_completed: u64,
    pub descendant_keys_sent: u64,
    pub descendant_visible_confs: u64,
    pub descendant_silent_confs: u64,
    pub descendant_rejections: u64,
}

impl BlockCounters {
    /// Fold a finished batch's descendant accounting into the totals.
    pub fn add_batch(&mut self, batch: &BatchAccounting) {
        self.descendant_keys_sent += u64::from(batch.keys_sent);
        self.descendant_visible_confs += u64::from(batch.visible);
        self.descendant_silent_confs += u64::from(batch.silent);
        self.descendant_rejections += u64::from(batch.rejected);
    }
}

impl fmt::Display for BlockCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lookups={} table_scans={} range_scans={} rejected={} reads(local={} remote={} \
             not_found={}) batches={} scan_rows={} completed={}",
            self.lookups_received,
            self.table_scans_received,
            self.range_scans_received,
            self.builds_rejected,
            self.local_reads_sent,
            self.remote_reads_sent,
            self.reads_not_found,
            self.scan_batches_returned,
            self.scan_rows_returned,
            self.requests_completed,
        )
    }
}
