//! Test a joined scan that needs several batches.

use crate::e2e_tests::helpers::*;
use crate::protocol::{FragmentCompletion, QueryTreeBuilder};
use crate::simulation::ScanPolicy;

#[test]
fn test_batches_follow_the_row_limit() {
    let mut sim = cluster(17, 3, 3);
    for pk in 1..=10 {
        let _ = order(&mut sim, pk, Some(pk), Some(pk % 4 + 1));
        customer(&mut sim, pk);
    }
    let fragment = order(&mut sim, 11, Some(11), None);
    customer(&mut sim, 11);
    let tree = QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(customer_of(0))
        .encode();
    let id = sim.submit_scan(ORDERS, fragment, Vec::new(), tree, batches_of(1));
    settle(&mut sim);

    let query = query(&sim, id);
    let root_rows = query.rows_of(0).len();
    assert!(root_rows >= 1);
    assert_eq!(query.rows_of(CUSTOMER_ROWS).len(), root_rows);
    assert_eq!(query.scan_confs.len(), root_rows + 1);

    let (last, batches) = query.scan_confs.split_last().expect("confirmations");
    assert_eq!(last.completion, FragmentCompletion::Closed);
    assert_eq!(last.completed_rows, 0);
    let (exhausted, more) = batches.split_last().expect("a batch");
    assert_eq!(exhausted.completion, FragmentCompletion::Exhausted);
    assert!(more.iter().all(|c| c.completion == FragmentCompletion::MoreData));
    assert!(batches.iter().all(|c| c.completed_rows == 2));
    assert_eq!(query.nexts_sent, root_rows);
    assert_eq!(query.closes_sent, 1);
}

#[test]
fn test_rows_reported_per_batch() {
    let mut sim = cluster(19, 1, 1);
    for pk in 1..=7 {
        let _ = order(&mut sim, pk, Some(pk), None);
        customer(&mut sim, pk);
    }
    let tree = QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(customer_of(0))
        .encode();
    let id = sim.submit_scan(ORDERS, 0, Vec::new(), tree, batches_of(3));
    settle(&mut sim);

    let query = query(&sim, id);
    let rows: Vec<u32> = query.scan_confs.iter().map(|c| c.completed_rows).collect();
    // Root row plus customer row for each order.
    assert_eq!(rows, vec![6, 6, 2, 0]);
    assert_eq!(single_values(&query, 0), (1..=7).collect::<Vec<_>>());
    assert_eq!(
        single_values(&query, CUSTOMER_ROWS),
        (1001..=1007).collect::<Vec<_>>()
    );
}

#[test]
fn test_close_after_first_batch() {
    let mut sim = cluster(23, 1, 1);
    for pk in 1..=6 {
        let _ = order(&mut sim, pk, Some(pk), None);
        customer(&mut sim, pk);
    }
    let tree = QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(customer_of(0))
        .encode();
    let policy = ScanPolicy {
        close_after_batches: Some(1),
        batch_rows: 2,
    };
    let id = sim.submit_scan(ORDERS, 0, Vec::new(), tree, policy);
    settle(&mut sim);

    let query = query(&sim, id);
    let completions: Vec<_> = query.scan_confs.iter().map(|c| c.completion).collect();
    assert_eq!(
        completions,
        vec![FragmentCompletion::MoreData, FragmentCompletion::Closed]
    );
    assert_eq!(query.rows_of(0).len(), 2);
    assert_eq!(query.closes_sent, 1);
}
