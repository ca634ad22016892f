//! End-to-end tests at the signal level.
//!
//! Each test file covers a specific scenario: a small cluster of simulated
//! data nodes, a request with a query tree, and the exact rows and replies
//! the caller observes once the cluster is quiescent.

#![cfg(test)]

mod helpers;

mod test_build_errors;
mod test_close_idempotent;
mod test_close_while_running;
mod test_filters;
mod test_lookup_chain;
mod test_lookup_with_children;
mod test_multi_batch;
mod test_reordering;
mod test_resource_limits;
mod test_scan_leaf_lookup;
mod test_too_many_parents;
