//! Test repeated closes and closes for scans that already finished.

use crate::e2e_tests::helpers::*;
use crate::protocol::{FragmentCompletion, QueryTreeBuilder};
use crate::simulation::{SimulatedClient, Simulator};
use crate::types::NodeId;

fn populate() -> Simulator {
    let mut sim = cluster(73, 1, 1);
    for pk in 1..=6 {
        let _ = order(&mut sim, pk, Some(pk), None);
        customer(&mut sim, pk);
    }
    sim
}

fn tree() -> Vec<u32> {
    QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(customer_of(0))
        .encode()
}

#[test]
fn test_second_close_while_running() {
    let mut sim = populate();
    let id = sim.submit_scan(ORDERS, 0, Vec::new(), tree(), batches_of(2));
    let spj = sim.client().query(id).spj;
    assert!(sim.deliver(SimulatedClient::coordinator(), spj));
    sim.close_scan(id);
    sim.close_scan(id);
    settle(&mut sim);

    let query = query(&sim, id);
    assert_eq!(query.terminal_outcomes(), 1);
    assert_eq!(query.closes_sent, 2);
    assert_eq!(sim.storage(NodeId(1)).stats().scan_closes, 1);
}

#[test]
fn test_close_after_scan_finished_is_ignored() {
    let mut sim = populate();
    let id = sim.submit_scan(ORDERS, 0, Vec::new(), tree(), batches_of(8));
    settle(&mut sim);
    let before = sim.client().query(id).scan_confs.len();

    sim.close_scan(id);
    settle(&mut sim);

    let query = query(&sim, id);
    assert_eq!(query.scan_confs.len(), before);
    assert_eq!(
        query.scan_confs.last().map(|c| c.completion),
        Some(FragmentCompletion::Closed)
    );
    assert_eq!(query.terminal_outcomes(), 1);
}

#[test]
fn test_close_exhausted_scan_without_storage_round_trip() {
    let mut sim = populate();
    let id = sim.submit_scan(ORDERS, 0, Vec::new(), tree(), batches_of(8));
    settle(&mut sim);

    let stats = sim.storage(NodeId(1)).stats();
    assert_eq!(stats.scan_nexts, 0);
    assert_eq!(stats.scan_closes, 0);
    let completions: Vec<_> = query(&sim, id).scan_confs.iter().map(|c| c.completion).collect();
    assert_eq!(
        completions,
        vec![FragmentCompletion::Exhausted, FragmentCompletion::Closed]
    );
}
