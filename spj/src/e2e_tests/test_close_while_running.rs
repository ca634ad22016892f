//! Test a close that arrives while the first batch is still running.

use crate::e2e_tests::helpers::*;
use crate::protocol::{FragmentCompletion, QueryNodeSpec, QueryTreeBuilder};
use crate::simulation::{SimulatedClient, Simulator};
use crate::types::NodeId;

fn populate() -> Simulator {
    let mut sim = cluster(11, 1, 1);
    for pk in 1..=5 {
        let _ = order(&mut sim, pk, Some(pk), Some(pk));
        customer(&mut sim, pk);
    }
    sim
}

#[test]
fn test_close_during_batch_sends_no_next_batch() {
    let mut sim = populate();
    let tree = QueryTreeBuilder::new()
        .node(QueryNodeSpec::scan(ORDERS).with_projection(&[0]))
        .encode();
    let id = sim.submit_scan(ORDERS, 0, Vec::new(), tree, batches_of(2));
    let spj = sim.client().query(id).spj;

    assert!(sim.deliver(SimulatedClient::coordinator(), spj));
    sim.close_scan(id);
    assert!(sim.deliver(SimulatedClient::coordinator(), spj));
    settle(&mut sim);

    let query = query(&sim, id);
    assert_eq!(query.scan_confs.len(), 1);
    assert_eq!(query.scan_confs[0].completion, FragmentCompletion::Closed);
    assert_eq!(query.scan_confs[0].completed_rows, 2);
    assert_eq!(query.rows.len(), 2);

    let stats = sim.storage(NodeId(1)).stats();
    assert_eq!(stats.scans_started, 1);
    assert_eq!(stats.scan_nexts, 0);
    assert_eq!(stats.scan_closes, 1);
}

#[test]
fn test_close_during_joined_batch_waits_for_lookups() {
    let mut sim = populate();
    let tree = QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(customer_of(0))
        .encode();
    let id = sim.submit_scan(ORDERS, 0, Vec::new(), tree, batches_of(2));
    let spj = sim.client().query(id).spj;

    assert!(sim.deliver(SimulatedClient::coordinator(), spj));
    sim.close_scan(id);
    assert!(sim.deliver(SimulatedClient::coordinator(), spj));
    settle(&mut sim);

    let query = query(&sim, id);
    assert_eq!(query.terminal_outcomes(), 1);
    assert_eq!(query.scan_confs.len(), 1);
    assert_eq!(query.scan_confs[0].completion, FragmentCompletion::Closed);
    assert_eq!(query.scan_confs[0].completed_rows, 4);
    assert_eq!(query.rows_of(0).len(), 2);
    assert_eq!(query.rows_of(CUSTOMER_ROWS).len(), 2);
    assert_eq!(sim.storage(NodeId(1)).stats().scan_nexts, 0);
}
