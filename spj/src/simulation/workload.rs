//! Query workload generator for deterministic simulation testing.
//!
//! Generates a small order-entry schema and random but reproducible join
//! queries over it: fragment scans and key lookups of orders joined to
//! their customer and item, optionally through a unique index, with
//! filters, small batches and early closes. A configurable share of the
//! queries carries a deliberately malformed tree.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::pattern::QueryPattern;
use crate::protocol::interpreter::Filter;
use crate::protocol::{QueryNodeSpec, QueryTreeBuilder, TreeFilterSpec};

use super::client::ScanPolicy;
use super::simulator::{SimulationResult, Simulator, SimulatorConfig};
use super::storage::FaultConfig;

/// `[pk, customer_id, item_id]`; `item_id` is null for every fifth order.
pub const ORDERS: u32 = 10;
/// `[pk, email, region]`.
pub const CUSTOMERS: u32 = 11;
/// `[pk, price]`.
pub const ITEMS: u32 = 12;
/// Unique index on customer email: `[email, [fragment, customer pk]]`.
pub const EMAIL_INDEX: u32 = 13;

/// Configuration for workload generation.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub orders: u32,
    /// Customers referenced by orders; only some of them exist.
    pub customers: u32,
    pub items: u32,
    pub fragments: u32,
    /// Probability of a lookup query instead of a scan.
    pub lookup_rate: f64,
    /// Probability of generating a malformed tree (0.0 - 1.0).
    pub malformed_rate: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            orders: 40,
            customers: 12,
            items: 6,
            fragments: 4,
            lookup_rate: 0.4,
            malformed_rate: 0.0,
        }
    }
}

/// Types of malformations that can be generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformationType {
    /// No tree at all.
    EmptyTree,
    /// The last parameter word is missing.
    TruncatedParameters,
    /// The root names an operation kind that does not exist.
    UnknownOperation,
    /// A node names more parents than allowed.
    TooManyParents,
}

impl MalformationType {
    pub const ALL: [Self; 4] = [
        Self::EmptyTree,
        Self::TruncatedParameters,
        Self::UnknownOperation,
        Self::TooManyParents,
    ];
}

/// Generator for random join queries.
pub struct WorkloadGenerator {
    rng: StdRng,
    config: WorkloadConfig,
}

impl WorkloadGenerator {
    #[must_use]
    pub fn new(seed: u64, config: WorkloadConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    /// Simulator configuration with the workload's tables defined.
    #[must_use]
    pub fn simulator_config(&self, seed: u64) -> SimulatorConfig {
        [ORDERS, CUSTOMERS, ITEMS, EMAIL_INDEX]
            .into_iter()
            .fold(SimulatorConfig::new(seed), |config, table| {
                config.with_table(table, self.config.fragments)
            })
    }

    /// Load the schema's rows into the cluster.
    pub fn populate(&mut self, sim: &mut Simulator) {
        for pk in 1..=self.config.orders {
            let customer = self.rng.random_range(1..=self.config.customers + 2);
            let item = (pk % 5 != 0).then(|| vec![1 + pk % self.config.items]);
            let _ = sim.insert_row(ORDERS, vec![Some(vec![pk]), Some(vec![customer]), item]);
        }
        for pk in (1..=self.config.customers).filter(|pk| pk % 4 != 0) {
            let email = 1000 + pk;
            let _ = sim.insert_row(
                CUSTOMERS,
                vec![Some(vec![pk]), Some(vec![email]), Some(vec![pk % 3])],
            );
            sim.insert_unique_index(EMAIL_INDEX, vec![email], CUSTOMERS, &[pk]);
        }
        for pk in 1..=self.config.items {
            let _ = sim.insert_row(ITEMS, vec![Some(vec![pk]), Some(vec![pk * 25])]);
        }
    }

    /// Submit one random query.
    pub fn submit(&mut self, sim: &mut Simulator) {
        let lookup = self.rng.random_bool(self.config.lookup_rate);
        let mut tree = self.tree(lookup);
        if self.rng.random_bool(self.config.malformed_rate) {
            let pick = self.rng.random_range(0..MalformationType::ALL.len());
            let malformation = MalformationType::ALL[pick];
            tree = malform(tree, lookup, malformation);
        }
        if lookup {
            let pk = self.rng.random_range(1..=self.config.orders + 3);
            let _ = sim.submit_lookup(ORDERS, vec![pk], tree);
        } else {
            let policy = ScanPolicy {
                close_after_batches: self
                    .rng
                    .random_bool(0.2)
                    .then(|| self.rng.random_range(1..=2)),
                batch_rows: self.rng.random_range(1..=8),
            };
            let fragment = self.rng.random_range(0..self.config.fragments);
            let _ = sim.submit_scan(ORDERS, fragment, Vec::new(), tree, policy);
        }
    }

    /// A join rooted at `ORDERS`: customer, optionally item, optionally the
    /// customer again through the email index.
    fn tree(&mut self, lookup: bool) -> Vec<u32> {
        let root = if lookup {
            QueryNodeSpec::lookup(ORDERS)
        } else {
            QueryNodeSpec::scan(ORDERS)
        };
        let mut builder = QueryTreeBuilder::new().node(
            root.with_linked_attrs(&[1, 2])
                .with_projection(&[0]),
        );

        let through_index = self.rng.random_bool(0.3);
        let mut customer = QueryNodeSpec::lookup(CUSTOMERS)
            .with_parent(0)
            .with_key(QueryPattern::col(0).to_vec(), vec![])
            .with_result_data(1);
        if self.rng.random_bool(0.7) {
            customer = customer.with_projection(&[0, 2]);
        }
        if through_index {
            customer = customer.with_linked_attrs(&[1]);
        }
        builder = builder.node(customer);
        let mut next_no: u16 = 2;

        if self.rng.random_bool(0.6) {
            let mut item = QueryNodeSpec::lookup(ITEMS)
                .with_parent(0)
                .with_key(QueryPattern::col(1).to_vec(), vec![])
                .with_projection(&[1])
                .with_result_data(2);
            if self.rng.random_bool(0.5) {
                let price = self.rng.random_range(1..=self.config.items) * 25;
                let mut program = Filter::refuse_unless_eq_param(1, 0, 1).to_vec();
                program.push(Filter::exit_ok());
                item = item.with_param_filter(program, vec![price]);
            }
            builder = builder.node(item);
            next_no += 1;
        }

        if through_index {
            let index = QueryNodeSpec::lookup(EMAIL_INDEX)
                .with_parent(1)
                .with_key(QueryPattern::col(0).to_vec(), vec![])
                .with_unique_index()
                .with_linked_attrs(&[1])
                .with_result_data(3);
            builder = builder.node(index);
            let mut again = QueryNodeSpec::lookup(CUSTOMERS)
                .with_parent(next_no)
                .with_key(QueryPattern::unq_pk(0).to_vec(), vec![])
                .with_projection(&[1])
                .with_result_data(4);
            if self.rng.random_bool(0.5) {
                again = again.with_tree_filter(TreeFilterSpec {
                    program: vec![Filter::refuse_if_null(2), Filter::exit_ok()],
                    attr_pattern: Vec::new(),
                    attr_params: Vec::new(),
                });
            }
            builder = builder.node(again);
        }
        builder.encode()
    }

    /// Populate a cluster, run `queries` random queries and check invariants.
    pub fn run(
        seed: u64,
        config: WorkloadConfig,
        faults: FaultConfig,
        queries: usize,
    ) -> SimulationResult {
        let mut generator = Self::new(seed, config);
        let mut sim = Simulator::new(
            generator
                .simulator_config(seed)
                .with_data_nodes(3)
                .with_fault_config(faults),
        );
        generator.populate(&mut sim);
        for _ in 0..queries {
            generator.submit(&mut sim);
        }
        sim.finish()
    }
}

/// Damage a well-formed tree.
fn malform(mut tree: Vec<u32>, lookup: bool, malformation: MalformationType) -> Vec<u32> {
    match malformation {
        MalformationType::EmptyTree => Vec::new(),
        MalformationType::TruncatedParameters => {
            let _ = tree.pop();
            tree
        }
        MalformationType::UnknownOperation => {
            if let Some(word) = tree.get_mut(1) {
                *word = (*word & 0xFFFF_0000) | 7;
            }
            tree
        }
        MalformationType::TooManyParents => {
            let root = if lookup {
                QueryNodeSpec::lookup(ORDERS)
            } else {
                QueryNodeSpec::scan(ORDERS)
            };
            let child = (0..64).fold(QueryNodeSpec::lookup(CUSTOMERS), |node, _| {
                node.with_parent(0)
            });
            QueryTreeBuilder::new()
                .node(root.with_linked_attrs(&[1]))
                .node(child.with_key(QueryPattern::col(0).to_vec(), vec![]))
                .encode()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_no_invariant_violations() {
        let result =
            WorkloadGenerator::run(54321, WorkloadConfig::default(), FaultConfig::no_faults(), 40);
        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert_eq!(result.queries, 40);
        assert!(result.rows_delivered > 0);
    }

    #[test]
    fn test_workload_deterministic() {
        let run = || {
            let result =
                WorkloadGenerator::run(7, WorkloadConfig::default(), FaultConfig::low_faults(), 30);
            (result.signals_delivered, result.rows_delivered, result.rejected_queries)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_workload_malformed_trees_are_rejected() {
        let config = WorkloadConfig {
            malformed_rate: 1.0,
            ..WorkloadConfig::default()
        };
        let result = WorkloadGenerator::run(99, config, FaultConfig::no_faults(), 20);
        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert_eq!(result.rejected_queries, 20);
    }

    #[test]
    fn test_workload_many_seeds_with_faults() {
        for seed in 0..16 {
            let result = WorkloadGenerator::run(
                seed,
                WorkloadConfig::default(),
                FaultConfig::high_faults(),
                25,
            );
            assert!(result.passed(), "seed {seed}: {:?}", result.invariant_violations);
        }
    }

    #[test]
    #[ignore] // Long running test
    fn test_workload_stress() {
        for seed in 0..200 {
            let config = WorkloadConfig {
                malformed_rate: 0.1,
                ..WorkloadConfig::default()
            };
            let result = WorkloadGenerator::run(seed, config, FaultConfig::low_faults(), 200);
            assert!(result.passed(), "seed {seed}: {:?}", result.invariant_violations);
        }
    }
}
