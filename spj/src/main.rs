#![cfg_attr(not(test), deny(clippy::unwrap_used))]
//! Single-node demo of the join pushdown block.
//!
//! Hosts one block on tokio next to a simulated storage layer, loads a
//! small orders/customers schema, and runs a scan of every orders fragment
//! joined to the customer of each order.

use spj::exec::Spj;
use spj::pattern::QueryPattern;
use spj::protocol::{Envelope, QueryNodeSpec, QueryTreeBuilder, ScanFlags, ScanFragReq, Signal};
use spj::simulation::{ClientQuery, FaultConfig, QueryKind, ScanPolicy, SimulatedClient, SimulatedStorage};
use spj::types::BlockNumber;
use spj::{BlockConfig, Distribution, HashDistribution};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ORDERS: u32 = 1;
const CUSTOMERS: u32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spj=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match BlockConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Loaded configuration: node_id={}, max_requests={}, arena_words={}, fragments={}",
        config.node_id,
        config.max_requests,
        config.arena_words,
        config.fragments
    );

    let node = config.node_id;
    let fragments = config.fragments;
    let distribution = HashDistribution::new(&[node])
        .with_table(ORDERS, fragments)
        .with_table(CUSTOMERS, fragments);

    let mut storage = SimulatedStorage::new(node, distribution.clone(), 0, FaultConfig::no_faults());
    for pk in 1..=16 {
        let orders = [Some(vec![pk]), Some(vec![1 + pk % 6])];
        let customers = [Some(vec![pk]), Some(vec![1000 + pk])];
        for (table_id, row) in [(ORDERS, orders), (CUSTOMERS, customers)] {
            // Customer 6 is never loaded, so its orders join to nothing.
            if table_id == CUSTOMERS && pk > 5 {
                continue;
            }
            match distribution.locate(table_id, &[pk]) {
                Ok((_, location)) => storage.insert(table_id, location.fragment_id, row.to_vec()),
                Err(e) => {
                    tracing::error!("Failed to place row {pk} of table {table_id}: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    let tree = QueryTreeBuilder::new()
        .node(
            QueryNodeSpec::scan(ORDERS)
                .with_linked_attrs(&[1])
                .with_projection(&[0, 1]),
        )
        .node(
            QueryNodeSpec::lookup(CUSTOMERS)
                .with_parent(0)
                .with_key(QueryPattern::col(0).to_vec(), vec![])
                .with_projection(&[1])
                .with_result_data(1),
        )
        .encode();

    let mut handle = spj::host::spawn_block(Spj::new(config, distribution));
    let mut client = SimulatedClient::new();
    let policy = ScanPolicy {
        close_after_batches: None,
        batch_rows: 4,
    };
    for fragment_id in 0..fragments {
        let id = client.open(QueryKind::Scan, handle.reference, policy);
        let req = ScanFragReq {
            sender_data: id.sender_data(),
            result_ref: SimulatedClient::api(),
            trans_id: id.trans_id(),
            save_point_id: 0,
            table_id: ORDERS,
            schema_version: 1,
            fragment_id,
            batch_rows: policy.batch_rows,
            batch_bytes: 0,
            scan_priority: 0,
            flags: ScanFlags::default(),
            correlation: 0,
            key_info: Vec::new(),
            attr_info: tree.clone(),
        };
        let envelope = Envelope {
            from: SimulatedClient::coordinator(),
            to: handle.reference,
            signal: Signal::ScanFragReq(req),
        };
        if handle.inbox.send(envelope).is_err() {
            tracing::error!("block stopped before every scan started");
            std::process::exit(1);
        }
    }

    while !client.queries().all(ClientQuery::is_finished) {
        let Some(envelope) = handle.outbox.recv().await else {
            tracing::error!("block stopped before every scan finished");
            std::process::exit(1);
        };
        let mut pending = vec![envelope];
        while let Some(envelope) = pending.pop() {
            if envelope.to == handle.reference {
                if handle.inbox.send(envelope).is_err() {
                    tracing::error!("block stopped before every scan finished");
                    std::process::exit(1);
                }
            } else if envelope.to.block == BlockNumber::LQH {
                pending.extend(storage.receive(envelope).into_iter().rev());
            } else {
                pending.extend(client.receive(envelope).into_iter().rev());
            }
        }
    }

    for query in client.queries() {
        tracing::info!(
            query = ?query.id,
            orders = query.rows_of(0).len(),
            customers = query.rows_of(1).len(),
            batches = query.scan_confs.len(),
            error = ?query.root_error(),
            "scan finished"
        );
    }

    drop(handle.inbox);
    match handle.task.await {
        Ok(block) => block.dump_state(),
        Err(e) => {
            tracing::error!("Block task failed: {e}");
            std::process::exit(1);
        }
    }
}
