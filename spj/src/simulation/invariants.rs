//! Invariant checking for deterministic simulation testing.
//!
//! The checks run once the simulated cluster is quiescent, when every
//! request that was accepted must have run to completion and released
//! everything it held.

use std::fmt;

use crate::distribution::Distribution;
use crate::exec::Spj;

use super::client::SimulatedClient;
use super::storage::SimulatedStorage;

/// An invariant violation detected during simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Description of the violation.
    pub description: String,
    /// Additional context.
    pub context: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description, self.context)
    }
}

/// Checker for quiescent-state invariants.
#[derive(Debug, Default)]
pub struct InvariantChecker {
    violations: Vec<InvariantViolation>,
}

impl InvariantChecker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            violations: Vec::new(),
        }
    }

    #[must_use]
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    #[must_use]
    pub const fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn clear(&mut self) {
        self.violations.clear();
    }

    fn violation(&mut self, description: &str, context: String) {
        self.violations.push(InvariantViolation {
            description: description.to_string(),
            context,
        });
    }

    /// A quiescent block holds no request and balanced accounting.
    pub fn check_block<D: Distribution>(&mut self, block: &Spj<D>) {
        let context = block.reference().to_string();
        if !block.is_idle() {
            self.violation(
                "block has live requests after quiescence",
                format!("{context}: {} live", block.live_requests()),
            );
        }
        let stats = block.store_stats();
        if stats.arenas_allocated != stats.arenas_released {
            self.violation(
                "arena allocations and releases differ",
                format!(
                    "{context}: allocated {} released {}",
                    stats.arenas_allocated, stats.arenas_released
                ),
            );
        }
        let counters = block.counters();
        let answered = counters.descendant_visible_confs
            + counters.descendant_silent_confs
            + counters.descendant_rejections;
        if counters.descendant_keys_sent != answered {
            self.violation(
                "descendant keys sent and answered differ",
                format!(
                    "{context}: sent {} answered {answered}",
                    counters.descendant_keys_sent
                ),
            );
        }
    }

    /// A quiescent storage block holds no scan cursor.
    pub fn check_storage(&mut self, storage: &SimulatedStorage) {
        if storage.open_cursors() != 0 {
            self.violation(
                "storage has open cursors after quiescence",
                format!("{}: {}", storage.reference(), storage.open_cursors()),
            );
        }
    }

    /// Every query has exactly one terminal outcome and no signal went astray.
    pub fn check_client(&mut self, client: &SimulatedClient) {
        for query in client.queries() {
            let outcomes = query.terminal_outcomes();
            if outcomes != 1 {
                self.violation(
                    "query without exactly one terminal outcome",
                    format!("{:?} {:?}: {outcomes}", query.id, query.kind),
                );
            }
            let rows = u32::try_from(query.rows.len()).unwrap_or(u32::MAX);
            if query.scan_refs.is_empty() && query.confirmed_rows() > rows {
                self.violation(
                    "scan confirmed more rows than it delivered",
                    format!("{:?}: confirmed {} delivered {rows}", query.id, query.confirmed_rows()),
                );
            }
        }
        if client.stray_signals != 0 {
            self.violation(
                "client received signals for unknown queries",
                client.stray_signals.to_string(),
            );
        }
    }
}
