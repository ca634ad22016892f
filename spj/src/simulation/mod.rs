//! Deterministic Simulation Testing (DST) infrastructure.
//!
//! This module provides tools for testing the join pushdown block with:
//! - A simulated storage layer with fault injection
//! - A simulated network of per-channel FIFO queues
//! - Reproducible random query generation
//! - Invariant checking once the cluster is quiescent
//!
//! # Design Principles
//!
//! Following patterns from `TigerBeetle` and `Turso`:
//! 1. The block never owns a transport; every signal passes through the harness
//! 2. All randomness is seeded for reproducibility
//! 3. Interleavings are chosen by the seed, within the per-channel ordering
//!    the real transport guarantees
//! 4. Faults can be injected at the storage boundary
//! 5. Given the same seed, execution is identical
//!
//! # Usage
//!
//! ```ignore
//! use spj::simulation::{FaultConfig, WorkloadConfig, WorkloadGenerator};
//!
//! let result = WorkloadGenerator::run(
//!     12345, // seed
//!     WorkloadConfig::default(),
//!     FaultConfig::low_faults(),
//!     1000, // queries
//! );
//!
//! assert!(result.invariant_violations.is_empty());
//! ```

mod client;
mod invariants;
mod simulator;
mod storage;
mod workload;

pub use client::{
    CLIENT_NODE, ClientQuery, QueryId, QueryKind, ResultRow, ScanPolicy, SimulatedClient,
};
pub use invariants::{InvariantChecker, InvariantViolation};
pub use simulator::{MAX_STEPS, SimulationResult, Simulator, SimulatorConfig};
pub use storage::{
    BoundType, FaultConfig, INVALID_PROGRAM, SimulatedStorage, SimulatedStorageStats, StoredRow,
    TEMPORARY_ERROR, UNKNOWN_CURSOR, WRONG_FRAGMENT_OWNER, tuple_id,
};
pub use workload::{
    CUSTOMERS, EMAIL_INDEX, ITEMS, MalformationType, ORDERS, WorkloadConfig, WorkloadGenerator,
};
