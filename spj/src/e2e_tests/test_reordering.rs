//! Test that results do not depend on delivery order across channels, and
//! that a seed always replays the same run.

use crate::e2e_tests::helpers::*;
use crate::protocol::QueryTreeBuilder;
use crate::simulation::{ScanPolicy, Simulator};

fn populate(sim: &mut Simulator) {
    for pk in 1..=20 {
        let customer_id = (pk % 7 != 0).then_some(pk % 9 + 1);
        let item_id = (pk % 5 != 0).then_some(pk % 4 + 1);
        let _ = order(sim, pk, customer_id, item_id);
    }
    for pk in (1..=10).filter(|pk| pk % 3 != 0) {
        customer(sim, pk);
    }
    for pk in 1..=4 {
        item(sim, pk, pk * 25);
    }
}

fn tree() -> Vec<u32> {
    QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(customer_of(0))
        .node(item_of(0))
        .encode()
}

/// Sorted emails and prices delivered by a table scan.
fn run(sim: &mut Simulator) -> (Vec<u32>, Vec<u32>) {
    let ids = sim.submit_table_scan(ORDERS, &tree(), batches_of(3));
    settle(sim);
    let mut emails = Vec::new();
    let mut prices = Vec::new();
    for id in ids {
        let query = query(sim, id);
        assert_eq!(query.root_error(), None);
        emails.extend(single_values(&query, CUSTOMER_ROWS));
        prices.extend(single_values(&query, ITEM_ROWS));
    }
    emails.sort_unstable();
    prices.sort_unstable();
    (emails, prices)
}

#[test]
fn test_results_independent_of_interleaving() {
    let mut ordered = Simulator::new(config(0, 3, 4).without_reordering());
    populate(&mut ordered);
    let expected = run(&mut ordered);
    assert!(!expected.0.is_empty());
    assert!(!expected.1.is_empty());

    for seed in 1..=12 {
        let mut sim = cluster(seed, 3, 4);
        populate(&mut sim);
        assert_eq!(run(&mut sim), expected, "seed {seed}");
    }
}

#[test]
fn test_same_seed_same_run() {
    let signals = || {
        let mut sim = cluster(79, 3, 4);
        populate(&mut sim);
        let _ = sim.submit_table_scan(
            ORDERS,
            &tree(),
            ScanPolicy {
                close_after_batches: Some(2),
                batch_rows: 2,
            },
        );
        settle(&mut sim);
        sim.signals_delivered()
    };
    assert_eq!(signals(), signals());
}
