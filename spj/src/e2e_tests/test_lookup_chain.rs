//! Test chains of lookups where each level is keyed by the row above it.

use crate::e2e_tests::helpers::*;
use crate::pattern::QueryPattern;
use crate::protocol::{QueryNodeSpec, QueryTreeBuilder};

const AGAIN_ROWS: u32 = 4;

/// Order, its customer, the customer's index entry by email, and the
/// customer again through the index.
fn chain(lookup: bool) -> Vec<u32> {
    let mut root = orders_root(lookup);
    root.linked_attrs = vec![1];
    QueryTreeBuilder::new()
        .node(root)
        .node(customer_of(0).with_linked_attrs(&[1]))
        .node(
            QueryNodeSpec::lookup(EMAIL_INDEX)
                .with_parent(1)
                .with_key(QueryPattern::col(0).to_vec(), vec![])
                .with_unique_index()
                .with_linked_attrs(&[1]),
        )
        .node(
            QueryNodeSpec::lookup(CUSTOMERS)
                .with_parent(2)
                .with_key(QueryPattern::unq_pk(0).to_vec(), vec![])
                .with_projection(&[0])
                .with_result_data(AGAIN_ROWS),
        )
        .encode()
}

#[test]
fn test_lookup_chain_through_unique_index() {
    let mut sim = cluster(29, 3, 4);
    let _ = order(&mut sim, 1, Some(5), None);
    customer(&mut sim, 5);

    let id = sim.submit_lookup(ORDERS, vec![1], chain(true));
    settle(&mut sim);
    let query = query(&sim, id);

    assert_eq!(query.root_error(), None);
    assert_eq!(single_values(&query, 0), vec![1]);
    assert_eq!(single_values(&query, CUSTOMER_ROWS), vec![1005]);
    assert_eq!(single_values(&query, AGAIN_ROWS), vec![5]);
    assert!(query.lookup_refs.is_empty());
}

#[test]
fn test_scan_chain_through_unique_index() {
    let mut sim = cluster(31, 3, 4);
    for pk in 1..=12 {
        let _ = order(&mut sim, pk, Some(pk % 5 + 1), None);
    }
    for pk in [1, 2, 4] {
        customer(&mut sim, pk);
    }

    let ids = sim.submit_table_scan(ORDERS, &chain(false), batches_of(3));
    settle(&mut sim);

    let mut again: Vec<u32> = ids
        .iter()
        .flat_map(|&id| single_values(&query(&sim, id), AGAIN_ROWS))
        .collect();
    again.sort_unstable();
    let mut expected: Vec<u32> = (1..=12)
        .map(|pk| pk % 5 + 1)
        .filter(|c| [1, 2, 4].contains(c))
        .collect();
    expected.sort_unstable();
    assert_eq!(again, expected);

    let keys: u64 = sim.blocks().map(|b| b.counters().descendant_keys_sent).sum();
    let remote: u64 = sim.blocks().map(|b| b.counters().remote_reads_sent).sum();
    // Customer lookups for every order, index and base lookups for the hits.
    assert_eq!(keys, 12 + 2 * again.len() as u64);
    assert!(remote > 0);
}
