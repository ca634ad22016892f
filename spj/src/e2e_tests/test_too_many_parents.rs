//! Test a tree node naming more parents than the block supports.

use crate::e2e_tests::helpers::*;
use crate::error::SpjError;
use crate::exec::MAX_PARENTS;
use crate::protocol::QueryTreeBuilder;

fn tree(parents: usize) -> Vec<u32> {
    let child = (1..parents).fold(customer_of(0), |node, _| node.with_parent(0));
    QueryTreeBuilder::new()
        .node(orders_root(true))
        .node(child)
        .encode()
}

#[test]
fn test_sixty_four_parents_rejected_early() {
    let mut sim = cluster(13, 2, 2);
    let _ = order(&mut sim, 1, Some(1), None);
    customer(&mut sim, 1);

    let id = sim.submit_lookup(ORDERS, vec![1], tree(MAX_PARENTS + 1));
    settle(&mut sim);

    let query = query(&sim, id);
    assert_eq!(query.root_error(), Some(SpjError::QueryNodeTooBig.code()));
    assert!(query.rows.is_empty());
    for block in sim.blocks() {
        assert!(block.is_idle());
        assert_eq!(block.counters().local_reads_sent, 0);
        assert_eq!(block.counters().remote_reads_sent, 0);
        let stats = block.store_stats();
        assert_eq!(stats.arenas_allocated, stats.arenas_released);
    }
    let rejected: u64 = sim.blocks().map(|b| b.counters().builds_rejected).sum();
    assert_eq!(rejected, 1);
}
