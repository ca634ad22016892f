//! Test a root lookup with two children, one of them a unique index
//! lookup whose key column is null.

use crate::e2e_tests::helpers::*;
use crate::pattern::QueryPattern;
use crate::protocol::{QueryNodeSpec, QueryTreeBuilder, ROW_NOT_FOUND};

const INDEX_ROWS: u32 = 3;

fn tree() -> Vec<u32> {
    QueryTreeBuilder::new()
        .node(orders_root(true))
        .node(customer_of(0))
        .node(
            QueryNodeSpec::lookup(EMAIL_INDEX)
                .with_parent(0)
                .with_key(QueryPattern::col(1).to_vec(), vec![])
                .with_unique_index()
                .with_projection(&[1])
                .with_result_data(INDEX_ROWS),
        )
        .encode()
}

#[test]
fn test_null_unique_key_is_a_child_miss() {
    let mut sim = cluster(5, 2, 4);
    let _ = order(&mut sim, 1, Some(7), None);
    customer(&mut sim, 7);

    let id = sim.submit_lookup(ORDERS, vec![1], tree());
    settle(&mut sim);
    let query = query(&sim, id);

    assert_eq!(query.root_error(), None);
    assert_eq!(query.terminal_outcomes(), 1);
    assert_eq!(single_values(&query, 0), vec![1]);
    assert_eq!(single_values(&query, CUSTOMER_ROWS), vec![1007]);
    assert!(query.rows_of(INDEX_ROWS).is_empty());

    let misses: Vec<_> = query
        .lookup_refs
        .iter()
        .map(|r| (r.client_data, r.error_code))
        .collect();
    assert_eq!(misses, vec![(INDEX_ROWS, ROW_NOT_FOUND)]);
    assert!(
        query
            .lookup_confs
            .iter()
            .any(|c| c.client_data == CUSTOMER_ROWS)
    );
}

#[test]
fn test_missing_root_row_rejects_the_request() {
    let mut sim = cluster(5, 2, 4);
    let _ = order(&mut sim, 1, Some(7), None);

    let id = sim.submit_lookup(ORDERS, vec![2], tree());
    settle(&mut sim);
    let query = query(&sim, id);

    assert_eq!(query.root_error(), Some(ROW_NOT_FOUND));
    assert!(query.rows.is_empty());
    assert_eq!(query.lookup_refs.len(), 1);
    assert!(query.lookup_confs.is_empty());
}
