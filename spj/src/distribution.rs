//! Mapping from keys to fragments and the nodes that own them.
//!
//! The block consults a [`Distribution`] synchronously for every child
//! lookup it issues: the constructed key is hashed, the hash is resolved to
//! a fragment, and the sub-request goes to the storage block of the node
//! owning that fragment.

use std::collections::HashMap;

use crate::error::SpjError;
use crate::types::{BlockNumber, BlockRef, NodeId};

/// Error code reported for a table the distribution does not know.
pub const TABLE_NOT_DEFINED: u32 = 284;

/// Where a key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentLocation {
    pub fragment_id: u32,
    pub dist_key: u32,
    /// Storage block that owns the fragment.
    pub peer: BlockRef,
}

/// Routing collaborator.
pub trait Distribution {
    /// Hash a constructed key.
    fn hash(&self, table_id: u32, key: &[u32]) -> u32;

    /// Resolve a hash to the fragment and owning peer.
    ///
    /// # Errors
    ///
    /// Returns a [`SpjError::Distribution`] code if the table is unknown.
    fn resolve(&self, table_id: u32, hash: u32) -> Result<FragmentLocation, SpjError>;

    /// Hash and resolve in one step.
    ///
    /// # Errors
    ///
    /// Same as [`Distribution::resolve`].
    fn locate(&self, table_id: u32, key: &[u32]) -> Result<(u32, FragmentLocation), SpjError> {
        let hash = self.hash(table_id, key);
        Ok((hash, self.resolve(table_id, hash)?))
    }
}

/// CRC32 hash partitioning over a fixed set of data nodes.
///
/// # Invariants
///
/// - `nodes` is non-empty.
/// - Fragment `f` of every table is owned by `nodes[f % nodes.len()]`.
#[derive(Debug, Clone)]
pub struct HashDistribution {
    nodes: Vec<NodeId>,
    tables: HashMap<u32, u32>,
}

impl HashDistribution {
    /// # Panics
    ///
    /// Panics if `nodes` is empty.
    #[must_use]
    pub fn new(nodes: &[NodeId]) -> Self {
        assert!(!nodes.is_empty(), "distribution needs at least one node");
        Self {
            nodes: nodes.to_vec(),
            tables: HashMap::new(),
        }
    }

    /// Define a table with `fragments` fragments.
    ///
    /// # Panics
    ///
    /// Panics if `fragments` is zero.
    #[must_use]
    pub fn with_table(mut self, table_id: u32, fragments: u32) -> Self {
        self.add_table(table_id, fragments);
        self
    }

    /// Define a table with `fragments` fragments.
    ///
    /// # Panics
    ///
    /// Panics if `fragments` is zero.
    pub fn add_table(&mut self, table_id: u32, fragments: u32) {
        assert!(fragments > 0, "table {table_id} needs at least one fragment");
        let _ = self.tables.insert(table_id, fragments);
    }

    #[must_use]
    pub fn fragment_count(&self, table_id: u32) -> Option<u32> {
        self.tables.get(&table_id).copied()
    }

    /// Node owning a fragment.
    #[must_use]
    pub fn fragment_owner(&self, fragment_id: u32) -> NodeId {
        self.nodes[fragment_id as usize % self.nodes.len()]
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

impl Distribution for HashDistribution {
    fn hash(&self, _table_id: u32, key: &[u32]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for word in key {
            hasher.update(&word.to_le_bytes());
        }
        hasher.finalize()
    }

    fn resolve(&self, table_id: u32, hash: u32) -> Result<FragmentLocation, SpjError> {
        let fragments = self
            .fragment_count(table_id)
            .ok_or(SpjError::Distribution(TABLE_NOT_DEFINED))?;
        let fragment_id = hash % fragments;
        Ok(FragmentLocation {
            fragment_id,
            dist_key: hash,
            peer: BlockRef::new(self.fragment_owner(fragment_id), BlockNumber::LQH),
        })
    }
}
