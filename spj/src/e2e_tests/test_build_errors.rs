//! Test that malformed trees are rejected with one reply and leave nothing
//! behind.

use crate::e2e_tests::helpers::*;
use crate::error::SpjError;
use crate::pattern::QueryPattern;
use crate::protocol::{QueryNodeSpec, QueryTreeBuilder};
use crate::simulation::{ScanPolicy, Simulator};

fn assert_clean(sim: &Simulator) {
    for block in sim.blocks() {
        assert!(block.is_idle());
        let stats = block.store_stats();
        assert_eq!(stats.arenas_allocated, stats.arenas_released);
        assert_eq!(block.counters().local_reads_sent + block.counters().remote_reads_sent, 0);
    }
}

#[test]
fn test_empty_tree() {
    let mut sim = cluster(47, 2, 2);
    let lookup = sim.submit_lookup(ORDERS, vec![1], Vec::new());
    let scan = sim.submit_scan(ORDERS, 0, Vec::new(), Vec::new(), ScanPolicy::default());
    settle(&mut sim);

    let code = Some(SpjError::ZeroLengthQueryTree.code());
    assert_eq!(query(&sim, lookup).root_error(), code);
    assert_eq!(query(&sim, scan).root_error(), code);
    assert_clean(&sim);
}

#[test]
fn test_root_kind_must_match_request() {
    let mut sim = cluster(53, 2, 2);
    let scan_tree = QueryTreeBuilder::new()
        .node(QueryNodeSpec::scan(ORDERS))
        .encode();
    let lookup_tree = QueryTreeBuilder::new()
        .node(QueryNodeSpec::lookup(ORDERS))
        .encode();
    let lookup = sim.submit_lookup(ORDERS, vec![1], scan_tree);
    let scan = sim.submit_scan(ORDERS, 0, Vec::new(), lookup_tree, ScanPolicy::default());
    settle(&mut sim);

    let code = Some(SpjError::InvalidRequest.code());
    assert_eq!(query(&sim, lookup).root_error(), code);
    assert_eq!(query(&sim, scan).root_error(), code);
    assert_clean(&sim);
}

#[test]
fn test_unknown_pattern_instruction() {
    let mut sim = cluster(59, 2, 2);
    let tree = QueryTreeBuilder::new()
        .node(orders_root(true))
        .node(
            QueryNodeSpec::lookup(CUSTOMERS)
                .with_parent(0)
                .with_key(vec![9 << 16], vec![]),
        )
        .encode();
    let id = sim.submit_lookup(ORDERS, vec![1], tree);
    settle(&mut sim);

    assert_eq!(query(&sim, id).root_error(), Some(SpjError::InvalidPattern.code()));
    assert_clean(&sim);
}

#[test]
fn test_missing_key_parameter() {
    let mut sim = cluster(61, 2, 2);
    let tree = QueryTreeBuilder::new()
        .node(orders_root(true))
        .node(
            QueryNodeSpec::lookup(CUSTOMERS)
                .with_parent(0)
                .with_key(QueryPattern::param(0).to_vec(), vec![]),
        )
        .encode();
    let id = sim.submit_lookup(ORDERS, vec![1], tree);
    settle(&mut sim);

    assert!(query(&sim, id).root_error().is_some());
    let rejected: u64 = sim.blocks().map(|b| b.counters().builds_rejected).sum();
    assert_eq!(rejected, 1);
    assert_clean(&sim);
}
