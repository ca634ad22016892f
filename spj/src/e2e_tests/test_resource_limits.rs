//! Test the request pool and arena limits.

use crate::e2e_tests::helpers::*;
use crate::error::SpjError;
use crate::protocol::QueryTreeBuilder;
use crate::simulation::{SimulatedClient, Simulator};

fn join_tree(lookup: bool) -> Vec<u32> {
    QueryTreeBuilder::new()
        .node(orders_root(lookup))
        .node(customer_of(0))
        .node(item_of(0))
        .encode()
}

#[test]
fn test_request_pool_exhausted() {
    let mut sim = Simulator::new(config(67, 1, 1).with_max_requests(1));
    for pk in 1..=4 {
        let _ = order(&mut sim, pk, Some(pk), Some(pk));
        customer(&mut sim, pk);
        item(&mut sim, pk, pk * 25);
    }
    let first = sim.submit_scan(ORDERS, 0, Vec::new(), join_tree(false), batches_of(2));
    let second = sim.submit_lookup(ORDERS, vec![1], join_tree(true));
    let spj = sim.client().query(first).spj;

    assert!(sim.deliver(SimulatedClient::coordinator(), spj));
    assert!(sim.deliver(SimulatedClient::coordinator(), spj));
    settle(&mut sim);

    assert_eq!(query(&sim, first).root_error(), None);
    assert_eq!(query(&sim, first).rows_of(CUSTOMER_ROWS).len(), 4);
    assert_eq!(
        query(&sim, second).root_error(),
        Some(SpjError::OutOfOperations.code())
    );
    let block = sim.blocks().next().expect("one block");
    assert_eq!(block.counters().builds_rejected, 0);
    assert_eq!(block.counters().requests_completed, 1);

    // The slot is free again once the scan is gone.
    let third = sim.submit_lookup(ORDERS, vec![2], join_tree(true));
    settle(&mut sim);
    assert_eq!(query(&sim, third).root_error(), None);
    assert_eq!(single_values(&query(&sim, third), ITEM_ROWS), vec![50]);
}

#[test]
fn test_arena_budget_exceeded() {
    let mut sim = Simulator::new(config(71, 2, 2).with_arena_words(8));
    let _ = order(&mut sim, 1, Some(1), Some(1));
    let id = sim.submit_lookup(ORDERS, vec![1], join_tree(true));
    settle(&mut sim);

    assert_eq!(
        query(&sim, id).root_error(),
        Some(SpjError::OutOfQueryMemory.code())
    );
    for block in sim.blocks() {
        let stats = block.store_stats();
        assert_eq!(stats.arenas_allocated, stats.arenas_released);
    }
}
