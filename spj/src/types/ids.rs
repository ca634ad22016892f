//! Identifier types for nodes, blocks, transactions and in-flight requests.
//!
//! These newtypes keep the many plain `u32` words that travel in signals
//! apart at the type level. Each one can be packed into, and recovered
//! from, the single word it occupies on the wire.

use std::fmt;

/// Highest data node id that can take part in a request.
///
/// Data node ids are tracked in a 64-bit [`NodeBitmask`], so valid ids are
/// `1..=MAX_DATA_NODE_ID`.
pub const MAX_DATA_NODE_ID: u16 = 63;

/// A node id in the cluster (data node or API node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u16);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Well-known block numbers.
///
/// A block number names a signal-processing unit inside a node.
pub struct BlockNumber;

impl BlockNumber {
    /// Transaction coordinator.
    pub const TC: u16 = 245;
    /// Storage layer (lookups and fragment scans).
    pub const LQH: u16 = 247;
    /// This block: join pushdown execution.
    pub const SPJ: u16 = 269;
    /// First block number used by API (client) endpoints.
    pub const API: u16 = 0x8000;
}

/// Address of a block instance: node id plus block number.
///
/// Packs into one word as `(block << 16) | node`.
///
/// # Examples
///
/// ```
/// use spj::types::{BlockNumber, BlockRef, NodeId};
/// let r = BlockRef::new(NodeId(3), BlockNumber::LQH);
/// assert_eq!(BlockRef::from_word(r.to_word()), r);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef {
    pub node: NodeId,
    pub block: u16,
}

impl BlockRef {
    #[must_use]
    pub const fn new(node: NodeId, block: u16) -> Self {
        Self { node, block }
    }

    #[must_use]
    pub const fn to_word(self) -> u32 {
        ((self.block as u32) << 16) | self.node.0 as u32
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // fields are masked to their width
    pub const fn from_word(word: u32) -> Self {
        Self {
            node: NodeId((word & 0xFFFF) as u16),
            block: (word >> 16) as u16,
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.block)
    }
}

/// Transaction id pair carried by every signal of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransId(pub [u32; 2]);

impl fmt::Display for TransId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}.{:08x}", self.0[0], self.0[1])
    }
}

/// Registry key of a request: the transaction id plus the caller's sender data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub trans_id: TransId,
    pub sender_data: u32,
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trans_id, self.sender_data)
    }
}

/// Set of data nodes that received sub-requests on behalf of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeBitmask(u64);

impl NodeBitmask {
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Add a data node to the set.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a valid data node id.
    pub fn set(&mut self, node: NodeId) {
        assert!(
            node.0 >= 1 && node.0 <= MAX_DATA_NODE_ID,
            "data node id {} outside 1..={MAX_DATA_NODE_ID}",
            node.0
        );
        self.0 |= 1u64 << node.0;
    }

    #[must_use]
    pub const fn contains(&self, node: NodeId) -> bool {
        node.0 <= MAX_DATA_NODE_ID && self.0 & (1u64 << node.0) != 0
    }

    #[must_use]
    pub const fn count(&self) -> u32 {
        self.0.count_ones()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate over the node ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        (1..=MAX_DATA_NODE_ID)
            .filter(|n| self.0 & (1u64 << n) != 0)
            .map(NodeId)
    }
}

/// Sequence number of a tree node inside its request (root = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeNo(pub u8);

impl NodeNo {
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle of a live request: slab slot plus generation.
///
/// The generation is bumped every time a slot is reused so that a stale
/// handle is detected instead of silently addressing a newer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle {
    pub slot: u16,
    pub generation: u8,
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req[{}@{}]", self.slot, self.generation)
    }
}

/// Handle of a tree node, packed into the correlation word sent to the
/// storage layer and echoed back on every reply.
///
/// Layout: `generation << 24 | slot << 8 | node_no`.
///
/// # Examples
///
/// ```
/// use spj::types::{NodeNo, NodePtr, RequestHandle};
/// let ptr = NodePtr::new(RequestHandle { slot: 7, generation: 2 }, NodeNo(3));
/// assert_eq!(NodePtr::from_word(ptr.to_word()), ptr);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodePtr {
    pub request: RequestHandle,
    pub node: NodeNo,
}

impl NodePtr {
    #[must_use]
    pub const fn new(request: RequestHandle, node: NodeNo) -> Self {
        Self { request, node }
    }

    #[must_use]
    pub const fn to_word(self) -> u32 {
        ((self.request.generation as u32) << 24)
            | ((self.request.slot as u32) << 8)
            | self.node.0 as u32
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // fields are masked to their width
    pub const fn from_word(word: u32) -> Self {
        Self {
            request: RequestHandle {
                slot: ((word >> 8) & 0xFFFF) as u16,
                generation: (word >> 24) as u8,
            },
            node: NodeNo((word & 0xFF) as u8),
        }
    }
}

impl fmt::Display for NodePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.request, self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ref_word_layout() {
        let r = BlockRef::new(NodeId(5), BlockNumber::SPJ);
        assert_eq!(r.to_word(), (269 << 16) | 5);
        assert_eq!(BlockRef::from_word(r.to_word()), r);
    }

    #[test]
    fn test_node_ptr_survives_max_values() {
        let ptr = NodePtr::new(
            RequestHandle {
                slot: u16::MAX,
                generation: u8::MAX,
            },
            NodeNo(31),
        );
        assert_eq!(NodePtr::from_word(ptr.to_word()), ptr);
    }

    #[test]
    fn test_node_bitmask() {
        let mut mask = NodeBitmask::new();
        assert!(mask.is_empty());
        mask.set(NodeId(1));
        mask.set(NodeId(63));
        mask.set(NodeId(1));
        assert_eq!(mask.count(), 2);
        assert!(mask.contains(NodeId(63)));
        assert!(!mask.contains(NodeId(2)));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![NodeId(1), NodeId(63)]);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_node_bitmask_rejects_api_node() {
        let mut mask = NodeBitmask::new();
        mask.set(NodeId(64));
    }
}
