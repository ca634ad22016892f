//! Test a fragment scan joined to a leaf lookup that misses for one row.

use std::collections::BTreeMap;

use crate::e2e_tests::helpers::*;
use crate::protocol::{AttributeHeader, QueryNodeSpec, QueryTreeBuilder};
use crate::simulation::{ResultRow, Simulator};

fn populate() -> Simulator {
    let mut sim = cluster(3, 2, 2);
    for pk in 1..=3 {
        let _ = order(&mut sim, pk, Some(pk), None);
    }
    customer(&mut sim, 1);
    customer(&mut sim, 3);
    sim
}

#[test]
fn test_missing_child_row_is_omitted() {
    let mut sim = populate();
    let tree = QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(customer_of(0))
        .encode();
    let ids = sim.submit_table_scan(ORDERS, &tree, batches_of(8));
    settle(&mut sim);

    let queries: Vec<_> = ids.iter().map(|&id| query(&sim, id)).collect();
    let mut orders: Vec<u32> = queries.iter().flat_map(|q| single_values(q, 0)).collect();
    let mut emails: Vec<u32> = queries
        .iter()
        .flat_map(|q| single_values(q, CUSTOMER_ROWS))
        .collect();
    orders.sort_unstable();
    emails.sort_unstable();
    assert_eq!(orders, vec![1, 2, 3]);
    assert_eq!(emails, vec![1001, 1003]);

    for query in &queries {
        assert_eq!(query.root_error(), None);
        assert!(query.scan_refs.is_empty());
    }
    let confirmed: u32 = queries.iter().map(|q| q.confirmed_rows()).sum();
    assert_eq!(confirmed, 5);

    let not_found: u64 = sim.blocks().map(|b| b.counters().reads_not_found).sum();
    let rejections: u64 = sim.blocks().map(|b| b.counters().descendant_rejections).sum();
    let visible: u64 = sim.blocks().map(|b| b.counters().descendant_visible_confs).sum();
    assert_eq!(not_found, 1);
    assert_eq!(rejections, 1);
    assert_eq!(visible, 2);
}

/// Value and correlation id of a row projecting one column plus the
/// correlation pseudo column.
fn value_and_correlation(row: &ResultRow) -> (u32, u32) {
    let cols = columns(row);
    assert_eq!(cols.len(), 2, "unexpected row {:?}", row.data);
    let value = cols[0].as_ref().and_then(|v| v.first().copied());
    let correlation = cols[1].as_ref().and_then(|v| v.first().copied());
    (
        value.unwrap_or_else(|| panic!("null value in {:?}", row.data)),
        correlation.unwrap_or_else(|| panic!("null correlation in {:?}", row.data)),
    )
}

#[test]
fn test_child_rows_correlate_to_their_parent() {
    let mut sim = populate();
    let corr = AttributeHeader::CORR_FACTOR32;
    let root = orders_root(false).with_projection(&[0, corr]);
    let child = customer_of(0).with_projection(&[1, corr]);
    let tree = QueryTreeBuilder::new().node(root).node(child).encode();
    let ids = sim.submit_table_scan(ORDERS, &tree, batches_of(8));
    settle(&mut sim);

    let queries: Vec<_> = ids.iter().map(|&id| query(&sim, id)).collect();
    let orders: BTreeMap<u32, u32> = queries
        .iter()
        .flat_map(|q| q.rows_of(0))
        .map(|row| {
            let (pk, correlation) = value_and_correlation(row);
            (correlation, pk)
        })
        .collect();
    assert_eq!(orders.len(), 3, "order correlation ids must be distinct");

    let mut joined = Vec::new();
    for row in queries.iter().flat_map(|q| q.rows_of(CUSTOMER_ROWS)) {
        let (email, correlation) = value_and_correlation(row);
        let order = orders
            .get(&correlation)
            .unwrap_or_else(|| panic!("customer row {email} correlates to no order"));
        // Order `pk` references customer `pk`.
        assert_eq!(email, 1000 + order);
        joined.push(*order);
    }
    joined.sort_unstable();
    assert_eq!(joined, vec![1, 3]);
}

#[test]
fn test_child_without_projection_is_silent() {
    let mut sim = populate();
    let silent_customer = QueryNodeSpec {
        projection: Vec::new(),
        ..customer_of(0)
    };
    let tree = QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(silent_customer)
        .encode();
    let ids = sim.submit_table_scan(ORDERS, &tree, batches_of(8));
    settle(&mut sim);

    let confirmed: u32 = ids.iter().map(|&id| query(&sim, id).confirmed_rows()).sum();
    let child_rows: usize = ids
        .iter()
        .map(|&id| query(&sim, id).rows_of(CUSTOMER_ROWS).len())
        .sum();
    let silent: u64 = sim.blocks().map(|b| b.counters().descendant_silent_confs).sum();
    assert_eq!(confirmed, 3);
    assert_eq!(child_rows, 0);
    assert_eq!(silent, 2);
}
