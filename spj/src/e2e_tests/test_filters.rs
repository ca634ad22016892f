//! Test interpreted filters on child lookups, with literal parameters and
//! with parameters taken from the parent row.

use crate::e2e_tests::helpers::*;
use crate::pattern::QueryPattern;
use crate::protocol::interpreter::Filter;
use crate::protocol::{FILTER_REJECTED, QueryTreeBuilder, TreeFilterSpec};

fn equals_param(attribute_id: u16) -> Vec<u32> {
    let mut program = Filter::refuse_unless_eq_param(attribute_id, 0, 1).to_vec();
    program.push(Filter::exit_ok());
    program
}

#[test]
fn test_literal_parameter_filter() {
    let mut sim = cluster(37, 2, 2);
    for pk in 1..=8 {
        let _ = order(&mut sim, pk, None, Some(pk % 4 + 1));
    }
    for pk in 1..=4 {
        item(&mut sim, pk, pk * 25);
    }
    let tree = QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(item_of(0).with_param_filter(equals_param(1), vec![50]))
        .encode();
    let ids = sim.submit_table_scan(ORDERS, &tree, batches_of(4));
    settle(&mut sim);

    let prices: Vec<u32> = ids
        .iter()
        .flat_map(|&id| single_values(&query(&sim, id), ITEM_ROWS))
        .collect();
    assert_eq!(prices, vec![50, 50]);
    let rejections: u64 = sim.blocks().map(|b| b.counters().descendant_rejections).sum();
    assert_eq!(rejections, 6);
}

#[test]
fn test_parameter_built_from_parent_row() {
    let mut sim = cluster(41, 2, 2);
    for pk in 1..=6 {
        let item = if pk % 2 == 0 { pk } else { pk + 1 };
        let _ = order(&mut sim, pk, Some(pk), Some(item));
        customer(&mut sim, pk);
    }
    // Keep the customer only if its key equals the order's item column.
    let filter = TreeFilterSpec {
        program: equals_param(0),
        attr_pattern: QueryPattern::col(1).to_vec(),
        attr_params: Vec::new(),
    };
    let tree = QueryTreeBuilder::new()
        .node(orders_root(false))
        .node(customer_of(0).with_tree_filter(filter))
        .encode();
    let ids = sim.submit_table_scan(ORDERS, &tree, batches_of(8));
    settle(&mut sim);

    let mut emails: Vec<u32> = ids
        .iter()
        .flat_map(|&id| single_values(&query(&sim, id), CUSTOMER_ROWS))
        .collect();
    emails.sort_unstable();
    assert_eq!(emails, vec![1002, 1004, 1006]);
}

#[test]
fn test_filtered_leaf_of_lookup_reports_to_caller() {
    let mut sim = cluster(43, 2, 2);
    let _ = order(&mut sim, 1, None, Some(3));
    item(&mut sim, 3, 75);
    let tree = QueryTreeBuilder::new()
        .node(orders_root(true))
        .node(item_of(0).with_param_filter(equals_param(1), vec![50]))
        .encode();

    let id = sim.submit_lookup(ORDERS, vec![1], tree);
    settle(&mut sim);
    let query = query(&sim, id);

    assert_eq!(query.root_error(), None);
    assert!(query.rows_of(ITEM_ROWS).is_empty());
    let refs: Vec<_> = query
        .lookup_refs
        .iter()
        .map(|r| (r.client_data, r.error_code))
        .collect();
    assert_eq!(refs, vec![(ITEM_ROWS, FILTER_REJECTED)]);
}
