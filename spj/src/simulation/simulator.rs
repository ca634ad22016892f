//! Main simulator harness for deterministic simulation testing.
//!
//! The simulator wires one join pushdown block and one simulated storage
//! block per data node to a simulated client through an in-memory network.
//! Signals travel over per-channel FIFO queues, one channel per
//! `(sender, receiver)` pair, which is the only ordering the real transport
//! guarantees. With reordering enabled the next channel to deliver from is
//! picked by a seeded RNG, so each seed explores one interleaving and
//! replays it exactly.

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config::BlockConfig;
use crate::distribution::{Distribution, HashDistribution};
use crate::exec::Spj;
use crate::protocol::{Envelope, LookupReq, ScanFlags, ScanFragReq, Signal};
use crate::types::{BlockNumber, BlockRef, NodeId};

use super::client::{QueryId, QueryKind, ScanPolicy, SimulatedClient};
use super::invariants::{InvariantChecker, InvariantViolation};
use super::storage::{FaultConfig, SimulatedStorage, StoredRow};

/// Upper bound on deliveries before the run is declared livelocked.
pub const MAX_STEPS: u64 = 1_000_000;

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Number of data nodes, with ids `1..=data_nodes`.
    pub data_nodes: u16,
    /// Tables and their fragment counts.
    pub tables: Vec<(u32, u32)>,
    /// Template for every block's configuration; the node id is replaced.
    pub block: BlockConfig,
    /// Fault injection configuration.
    pub fault_config: FaultConfig,
    /// Whether to deliver from a random channel instead of the first one.
    pub reorder: bool,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            data_nodes: 2,
            tables: Vec::new(),
            block: BlockConfig::default(),
            fault_config: FaultConfig::default(),
            reorder: true,
        }
    }

    #[must_use]
    pub const fn with_data_nodes(mut self, data_nodes: u16) -> Self {
        self.data_nodes = data_nodes;
        self
    }

    /// Define a table with `fragments` fragments.
    #[must_use]
    pub fn with_table(mut self, table_id: u32, fragments: u32) -> Self {
        self.tables.push((table_id, fragments));
        self
    }

    #[must_use]
    pub const fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.block.max_requests = max_requests;
        self
    }

    #[must_use]
    pub const fn with_arena_words(mut self, arena_words: usize) -> Self {
        self.block.arena_words = arena_words;
        self
    }

    /// Set the fault configuration.
    #[must_use]
    pub const fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault_config = config;
        self
    }

    /// Always deliver from the first non-empty channel.
    #[must_use]
    pub const fn without_reordering(mut self) -> Self {
        self.reorder = false;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    /// Number of queries submitted.
    pub queries: usize,
    /// Number of queries that ended in a rejection.
    pub rejected_queries: usize,
    /// Number of rows delivered to the client.
    pub rows_delivered: usize,
    /// Number of signals delivered.
    pub signals_delivered: u64,
    /// Invariant violations detected.
    pub invariant_violations: Vec<InvariantViolation>,
}

impl SimulationResult {
    /// Check if the simulation passed (no invariant violations).
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }
}

/// The simulated cluster.
pub struct Simulator {
    config: SimulatorConfig,
    distribution: HashDistribution,
    blocks: BTreeMap<NodeId, Spj<HashDistribution>>,
    storages: BTreeMap<NodeId, SimulatedStorage>,
    client: SimulatedClient,
    channels: BTreeMap<(BlockRef, BlockRef), VecDeque<Envelope>>,
    rng: StdRng,
    signals_delivered: u64,
}

impl Simulator {
    /// Create a cluster with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration has no data node.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let nodes: Vec<NodeId> = (1..=config.data_nodes).map(NodeId).collect();
        let mut distribution = HashDistribution::new(&nodes);
        for &(table_id, fragments) in &config.tables {
            distribution.add_table(table_id, fragments);
        }
        let blocks = nodes
            .iter()
            .map(|&node| {
                let block = BlockConfig {
                    node_id: node,
                    ..config.block.clone()
                };
                (node, Spj::new(block, distribution.clone()))
            })
            .collect();
        let storages = nodes
            .iter()
            .map(|&node| {
                let storage = SimulatedStorage::new(
                    node,
                    distribution.clone(),
                    config.seed,
                    config.fault_config.clone(),
                );
                (node, storage)
            })
            .collect();
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            distribution,
            blocks,
            storages,
            client: SimulatedClient::new(),
            channels: BTreeMap::new(),
            signals_delivered: 0,
        }
    }

    #[must_use]
    pub const fn distribution(&self) -> &HashDistribution {
        &self.distribution
    }

    #[must_use]
    pub const fn client(&self) -> &SimulatedClient {
        &self.client
    }

    /// # Panics
    ///
    /// Panics if `node` is not a data node.
    #[must_use]
    pub fn block(&self, node: NodeId) -> &Spj<HashDistribution> {
        self.blocks
            .get(&node)
            .unwrap_or_else(|| panic!("{node} is not a data node"))
    }

    /// # Panics
    ///
    /// Panics if `node` is not a data node.
    #[must_use]
    pub fn storage(&self, node: NodeId) -> &SimulatedStorage {
        self.storages
            .get(&node)
            .unwrap_or_else(|| panic!("{node} is not a data node"))
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Spj<HashDistribution>> {
        self.blocks.values()
    }

    #[must_use]
    pub const fn signals_delivered(&self) -> u64 {
        self.signals_delivered
    }

    /// Number of signals still in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.channels.values().map(VecDeque::len).sum()
    }

    /// Store a row on the node owning its primary key (column 0).
    ///
    /// Returns the fragment the row went to.
    ///
    /// # Panics
    ///
    /// Panics if the row has no primary key or the table is not defined.
    pub fn insert_row(&mut self, table_id: u32, row: StoredRow) -> u32 {
        let pk = row
            .first()
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("row of table {table_id} without primary key"));
        let (_, location) = self
            .distribution
            .locate(table_id, pk)
            .unwrap_or_else(|err| panic!("cannot place row of table {table_id}: {err}"));
        self.storages
            .get_mut(&location.peer.node)
            .unwrap_or_else(|| panic!("{} is not a data node", location.peer.node))
            .insert(table_id, location.fragment_id, row);
        location.fragment_id
    }

    /// Store a unique index entry mapping `value` to a base table row.
    ///
    /// The entry's column 1 holds the base row's fragment id followed by its
    /// primary key.
    ///
    /// # Panics
    ///
    /// Panics if either table is not defined.
    pub fn insert_unique_index(
        &mut self,
        index_table: u32,
        value: Vec<u32>,
        base_table: u32,
        base_pk: &[u32],
    ) {
        let (_, base) = self
            .distribution
            .locate(base_table, base_pk)
            .unwrap_or_else(|err| panic!("cannot place row of table {base_table}: {err}"));
        let mut target = vec![base.fragment_id];
        target.extend_from_slice(base_pk);
        let _ = self.insert_row(index_table, vec![Some(value), Some(target)]);
    }

    /// Block that runs a request rooted at the given fragment.
    fn block_for(&self, fragment_id: u32) -> BlockRef {
        BlockRef::new(
            self.distribution.fragment_owner(fragment_id),
            BlockNumber::SPJ,
        )
    }

    /// Send a lookup request with the query tree `tree`.
    ///
    /// # Panics
    ///
    /// Panics if the table is not defined.
    pub fn submit_lookup(&mut self, table_id: u32, key: Vec<u32>, tree: Vec<u32>) -> QueryId {
        let (hash, location) = self
            .distribution
            .locate(table_id, &key)
            .unwrap_or_else(|err| panic!("cannot place key of table {table_id}: {err}"));
        let spj = self.block_for(location.fragment_id);
        let id = self
            .client
            .open(QueryKind::Lookup, spj, ScanPolicy::default());
        let req = LookupReq {
            client_ref: SimulatedClient::coordinator(),
            client_data: id.sender_data(),
            trans_id: id.trans_id(),
            save_point_id: 0,
            table_id,
            schema_version: 1,
            fragment_id: location.fragment_id,
            dist_key: location.dist_key,
            hash_value: hash,
            result_ref: SimulatedClient::api(),
            result_data: 0,
            correlation: 0,
            interpreted: false,
            key_info: key,
            attr_info: tree,
        };
        self.enqueue(Envelope {
            from: SimulatedClient::coordinator(),
            to: spj,
            signal: Signal::LookupReq(req),
        });
        id
    }

    /// Send a scan request for one fragment.
    pub fn submit_scan(
        &mut self,
        table_id: u32,
        fragment_id: u32,
        bounds: Vec<u32>,
        tree: Vec<u32>,
        policy: ScanPolicy,
    ) -> QueryId {
        let spj = self.block_for(fragment_id);
        let id = self.client.open(QueryKind::Scan, spj, policy);
        let req = ScanFragReq {
            sender_data: id.sender_data(),
            result_ref: SimulatedClient::api(),
            trans_id: id.trans_id(),
            save_point_id: 0,
            table_id,
            schema_version: 1,
            fragment_id,
            batch_rows: policy.batch_rows,
            batch_bytes: 0,
            scan_priority: 0,
            flags: ScanFlags {
                range_scan: !bounds.is_empty(),
                ..ScanFlags::default()
            },
            correlation: 0,
            key_info: bounds,
            attr_info: tree,
        };
        self.enqueue(Envelope {
            from: SimulatedClient::coordinator(),
            to: spj,
            signal: Signal::ScanFragReq(req),
        });
        id
    }

    /// Scan every fragment of a table, one request per fragment.
    ///
    /// # Panics
    ///
    /// Panics if the table is not defined.
    pub fn submit_table_scan(
        &mut self,
        table_id: u32,
        tree: &[u32],
        policy: ScanPolicy,
    ) -> Vec<QueryId> {
        let fragments = self
            .distribution
            .fragment_count(table_id)
            .unwrap_or_else(|| panic!("table {table_id} is not defined"));
        (0..fragments)
            .map(|fragment_id| {
                self.submit_scan(table_id, fragment_id, Vec::new(), tree.to_vec(), policy)
            })
            .collect()
    }

    /// Send a close for scan `id` now.
    pub fn close_scan(&mut self, id: QueryId) {
        let close = self.client.close(id);
        self.enqueue(close);
    }

    fn enqueue(&mut self, envelope: Envelope) {
        trace!(signal = %envelope, "enqueue");
        self.channels
            .entry((envelope.from, envelope.to))
            .or_default()
            .push_back(envelope);
    }

    /// Deliver the oldest signal on the channel `from -> to`.
    ///
    /// Returns false if the channel is empty.
    pub fn deliver(&mut self, from: BlockRef, to: BlockRef) -> bool {
        let Some(envelope) = self
            .channels
            .get_mut(&(from, to))
            .and_then(VecDeque::pop_front)
        else {
            return false;
        };
        self.dispatch(envelope);
        true
    }

    /// Deliver one signal. Returns false if nothing is in flight.
    pub fn step(&mut self) -> bool {
        self.channels.retain(|_, queue| !queue.is_empty());
        if self.channels.is_empty() {
            return false;
        }
        let index = if self.config.reorder {
            self.rng.random_range(0..self.channels.len())
        } else {
            0
        };
        let Some(&(from, to)) = self.channels.keys().nth(index) else {
            return false;
        };
        self.deliver(from, to)
    }

    /// Deliver signals until nothing is in flight.
    ///
    /// # Panics
    ///
    /// Panics if the cluster does not settle within [`MAX_STEPS`] deliveries.
    pub fn run_until_quiescent(&mut self) {
        let mut steps = 0;
        while self.step() {
            steps += 1;
            assert!(steps < MAX_STEPS, "simulation did not settle (seed {})", self.config.seed);
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        self.signals_delivered += 1;
        let to = envelope.to;
        let out = if to.node == SimulatedClient::coordinator().node {
            self.client.receive(envelope)
        } else if to.block == BlockNumber::SPJ {
            let block = self
                .blocks
                .get_mut(&to.node)
                .unwrap_or_else(|| panic!("signal for unknown block {to}"));
            block.receive(envelope);
            block.drain_outbox()
        } else if to.block == BlockNumber::LQH {
            self.storages
                .get_mut(&to.node)
                .unwrap_or_else(|| panic!("signal for unknown block {to}"))
                .receive(envelope)
        } else {
            panic!("signal for unknown block {to}");
        };
        for envelope in out {
            self.enqueue(envelope);
        }
    }

    /// Check every quiescent-state invariant.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut checker = InvariantChecker::new();
        for block in self.blocks.values() {
            checker.check_block(block);
        }
        for storage in self.storages.values() {
            checker.check_storage(storage);
        }
        checker.check_client(&self.client);
        checker.violations().to_vec()
    }

    /// Settle the cluster and summarize the run.
    pub fn finish(&mut self) -> SimulationResult {
        self.run_until_quiescent();
        let queries: Vec<_> = self.client.queries().collect();
        SimulationResult {
            seed: self.config.seed,
            queries: queries.len(),
            rejected_queries: queries.iter().filter(|q| q.root_error().is_some()).count(),
            rows_delivered: queries.iter().map(|q| q.rows.len()).sum(),
            signals_delivered: self.signals_delivered,
            invariant_violations: self.check_invariants(),
        }
    }

    /// Log the state of every block.
    pub fn dump_state(&self) {
        for block in self.blocks.values() {
            block.dump_state();
        }
    }
}
