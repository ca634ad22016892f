//! Common helpers for end-to-end tests.

use crate::pattern::QueryPattern;
use crate::protocol::{AttributeHeader, QueryNodeSpec};
use crate::simulation::{ClientQuery, QueryId, ResultRow, ScanPolicy, Simulator, SimulatorConfig};

/// `[pk, customer_id, item_id]`.
pub const ORDERS: u32 = 1;
/// `[pk, email, region]`.
pub const CUSTOMERS: u32 = 2;
/// `[pk, price]`.
pub const ITEMS: u32 = 3;
/// Unique index on customer email: `[email, [fragment, customer pk]]`.
pub const EMAIL_INDEX: u32 = 4;

/// Result data of the customer node in the trees built here.
pub const CUSTOMER_ROWS: u32 = 1;
/// Result data of the item node.
pub const ITEM_ROWS: u32 = 2;

/// A cluster with the four tables defined, every one split in `fragments`.
#[must_use]
pub fn cluster(seed: u64, data_nodes: u16, fragments: u32) -> Simulator {
    Simulator::new(config(seed, data_nodes, fragments))
}

/// The configuration behind [`cluster`], for tests that adjust it.
#[must_use]
pub fn config(seed: u64, data_nodes: u16, fragments: u32) -> SimulatorConfig {
    [ORDERS, CUSTOMERS, ITEMS, EMAIL_INDEX]
        .into_iter()
        .fold(
            SimulatorConfig::new(seed).with_data_nodes(data_nodes),
            |config, table| config.with_table(table, fragments),
        )
}

/// Insert an order; `None` leaves a column null.
pub fn order(sim: &mut Simulator, pk: u32, customer: Option<u32>, item: Option<u32>) -> u32 {
    sim.insert_row(
        ORDERS,
        vec![Some(vec![pk]), customer.map(|c| vec![c]), item.map(|i| vec![i])],
    )
}

/// Insert a customer with email `1000 + pk` and its index entry.
pub fn customer(sim: &mut Simulator, pk: u32) {
    let email = 1000 + pk;
    let _ = sim.insert_row(
        CUSTOMERS,
        vec![Some(vec![pk]), Some(vec![email]), Some(vec![pk % 3])],
    );
    sim.insert_unique_index(EMAIL_INDEX, vec![email], CUSTOMERS, &[pk]);
}

pub fn item(sim: &mut Simulator, pk: u32, price: u32) {
    let _ = sim.insert_row(ITEMS, vec![Some(vec![pk]), Some(vec![price])]);
}

/// Orders node linking customer and item, projecting its primary key.
#[must_use]
pub fn orders_root(lookup: bool) -> QueryNodeSpec {
    let root = if lookup {
        QueryNodeSpec::lookup(ORDERS)
    } else {
        QueryNodeSpec::scan(ORDERS)
    };
    root.with_linked_attrs(&[1, 2]).with_projection(&[0])
}

/// Customer lookup keyed by the first linked column of `parent`,
/// projecting the email.
#[must_use]
pub fn customer_of(parent: u16) -> QueryNodeSpec {
    QueryNodeSpec::lookup(CUSTOMERS)
        .with_parent(parent)
        .with_key(QueryPattern::col(0).to_vec(), vec![])
        .with_projection(&[1])
        .with_result_data(CUSTOMER_ROWS)
}

/// Item lookup keyed by the second linked column of `parent`, projecting
/// the price.
#[must_use]
pub fn item_of(parent: u16) -> QueryNodeSpec {
    QueryNodeSpec::lookup(ITEMS)
        .with_parent(parent)
        .with_key(QueryPattern::col(1).to_vec(), vec![])
        .with_projection(&[1])
        .with_result_data(ITEM_ROWS)
}

#[must_use]
pub const fn batches_of(batch_rows: u32) -> ScanPolicy {
    ScanPolicy {
        close_after_batches: None,
        batch_rows,
    }
}

/// Decode a delivered row into its column values, `None` for null.
#[must_use]
pub fn columns(row: &ResultRow) -> Vec<Option<Vec<u32>>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(&word) = row.data.get(pos) {
        let header = AttributeHeader(word);
        let start = pos + 1;
        pos = start + header.data_size();
        if header.is_null() {
            out.push(None);
        } else {
            out.push(Some(row.data[start..pos].to_vec()));
        }
    }
    out
}

/// First word of the single column of every row the node with
/// `result_data` delivered, sorted.
#[must_use]
pub fn single_values(query: &ClientQuery, result_data: u32) -> Vec<u32> {
    let mut values: Vec<u32> = query
        .rows_of(result_data)
        .into_iter()
        .filter_map(|row| columns(row).into_iter().next().flatten())
        .filter_map(|value| value.first().copied())
        .collect();
    values.sort_unstable();
    values
}

/// Settle the cluster and assert every invariant held.
pub fn settle(sim: &mut Simulator) {
    sim.run_until_quiescent();
    let violations = sim.check_invariants();
    assert!(violations.is_empty(), "{violations:?}");
}

/// Replies of one query after settling.
#[must_use]
pub fn query(sim: &Simulator, id: QueryId) -> ClientQuery {
    sim.client().query(id).clone()
}
