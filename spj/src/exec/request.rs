//! A live request and the operation nodes it owns.
//!
//! # Design
//!
//! A request owns its nodes in a `Vec` indexed by [`NodeNo`]. The parent and
//! child relation is kept as node numbers, not pointers: a node's
//! dependency list is an arena buffer of child numbers, so the tree is
//! walked by index and every buffer it needs is charged to the request's
//! arena.
//!
//! Descendant accounting for the current scan batch lives on the request
//! itself ([`BatchAccounting`]) instead of on the root node.
//!
//! # Invariants
//!
//! - Node `n` is stored at index `n`, and every parent number of a node is
//!   smaller than the node's own.
//! - `active_nodes` equals the number of nodes in [`NodeState::Active`].
//! - Every [`BufferId`] reachable from a node was issued by `arena`.

use std::fmt;

use crate::protocol::{FragmentCompletion, LookupReq, OperationKind, ScanFragReq};
use crate::store::{Arena, BufferId, RequestKind};
use crate::types::{BlockRef, NodeBitmask, NodeNo, RequestHandle, RequestKey};

/// Words charged to the arena for every tree node.
pub const NODE_WORDS: usize = 32;

/// Static and dynamic properties of a tree node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeBits(u32);

impl NodeBits {
    /// No node depends on this one.
    pub const LEAF: Self = Self(0x01);
    /// The fixed send buffers are used by exactly one send.
    pub const ONE_SHOT: Self = Self(0x02);
    /// The key is built from a linked pattern per parent row.
    pub const KEYINFO_CONSTRUCTED: Self = Self(0x04);
    /// The filter parameters are built from a linked pattern per parent row.
    pub const ATTRINFO_CONSTRUCTED: Self = Self(0x08);
    /// Rows are flushed to the API.
    pub const USER_PROJECTION: Self = Self(0x10);
    /// The attribute section carries a filter program.
    pub const ATTR_INTERPRETED: Self = Self(0x20);
    /// Lookup through a unique index; a null key cannot match.
    pub const UNIQUE_INDEX: Self = Self(0x40);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Nothing outstanding.
    Inactive,
    /// Counted in the request's active nodes.
    Active,
}

/// State of a fragment scan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Not started, or finished.
    Idle,
    /// A batch is being produced.
    Running,
    /// A batch was returned and the caller has not asked for more.
    Started,
    /// A close was sent to the storage layer.
    Closing,
}

/// Pending send payloads and routing.
#[derive(Debug, Clone, Default)]
pub struct SendState {
    /// Fixed key section, if the key is not constructed per row.
    pub key_info: Option<BufferId>,
    /// Fixed attribute section, or the fixed part of a constructed one.
    pub attr_info: Option<BufferId>,
}

#[derive(Debug, Clone)]
pub struct LookupData {
    /// Replies still expected: two per sent non-leaf request (row and
    /// confirmation), one per sent leaf request whose confirmation comes back
    /// here, none otherwise.
    pub outstanding: u32,
    /// Every field except routing, correlation and the sections.
    pub template: LookupReq,
}

#[derive(Debug, Clone)]
pub struct ScanFragData {
    pub state: ScanState,
    /// Completion reported with the last batch.
    pub completion: FragmentCompletion,
    /// The batch confirmation has arrived.
    pub conf_received: bool,
    /// The caller asked to close while a batch was running.
    pub pending_close: bool,
    pub rows_received: u32,
    /// Rows announced by the batch confirmation.
    pub rows_expected: u32,
    pub template: ScanFragReq,
}

impl ScanFragData {
    pub const fn new_batch(&mut self) {
        self.conf_received = false;
        self.rows_received = 0;
        self.rows_expected = 0;
    }
}

#[derive(Debug, Clone)]
pub enum OpData {
    Lookup(LookupData),
    ScanFrag(ScanFragData),
}

/// One operation of the tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub no: NodeNo,
    pub kind: OperationKind,
    pub bits: NodeBits,
    pub state: NodeState,
    pub table_id: u32,
    pub schema_version: u32,
    /// Label the caller attached to this node's rows and replies.
    pub result_data: u32,
    /// Numbers of the nodes that depend on this one.
    pub dependents: Option<BufferId>,
    pub key_pattern: Option<BufferId>,
    pub attr_pattern: Option<BufferId>,
    pub send: SendState,
    pub op: OpData,
}

impl TreeNode {
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.bits.contains(NodeBits::LEAF)
    }

    /// # Panics
    ///
    /// Panics if the node is not a lookup.
    pub fn lookup_mut(&mut self) -> &mut LookupData {
        match &mut self.op {
            OpData::Lookup(data) => data,
            OpData::ScanFrag(_) => panic!("node {} is not a lookup", self.no),
        }
    }

    /// # Panics
    ///
    /// Panics if the node is not a fragment scan.
    #[must_use]
    pub fn scan(&self) -> &ScanFragData {
        match &self.op {
            OpData::ScanFrag(data) => data,
            OpData::Lookup(_) => panic!("node {} is not a scan", self.no),
        }
    }

    /// # Panics
    ///
    /// Panics if the node is not a fragment scan.
    pub fn scan_mut(&mut self) -> &mut ScanFragData {
        match &mut self.op {
            OpData::ScanFrag(data) => data,
            OpData::Lookup(_) => panic!("node {} is not a scan", self.no),
        }
    }

    /// Buffers owned by the node.
    pub fn buffers(&self) -> impl Iterator<Item = BufferId> {
        [
            self.dependents,
            self.key_pattern,
            self.attr_pattern,
            self.send.key_info,
            self.send.attr_info,
        ]
        .into_iter()
        .flatten()
    }
}

/// Descendant signals seen during the current scan batch.
///
/// The batch may be reported only once every key sent to a descendant has
/// been answered and every descendant row that will itself be confirmed has
/// been.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchAccounting {
    pub keys_sent: u32,
    /// Confirmations of rows delivered to the caller.
    pub visible: u32,
    /// Confirmations of rows not delivered to the caller.
    pub silent: u32,
    pub rejected: u32,
    /// Descendant rows whose confirmation has not arrived yet.
    pub rows_owed: i32,
}

impl BatchAccounting {
    /// Every key sent has been answered and no confirmation is owed.
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.rows_owed == 0 && self.keys_sent == self.visible + self.silent + self.rejected
    }
}

/// A live request.
#[derive(Debug)]
pub struct Request {
    pub handle: RequestHandle,
    pub key: RequestKey,
    pub kind: RequestKind,
    /// Block that sent the request and receives its replies.
    pub sender_ref: BlockRef,
    /// Where rows for the caller go.
    pub result_ref: BlockRef,
    pub active_nodes: u32,
    /// Data nodes this request sent to.
    pub peers: NodeBitmask,
    /// Rows delivered to the caller since the last scan reply.
    pub rows: u32,
    pub accounting: BatchAccounting,
    pub registered: bool,
    pub nodes: Vec<TreeNode>,
    pub arena: Arena,
}

impl Request {
    #[must_use]
    pub const fn new(
        handle: RequestHandle,
        key: RequestKey,
        kind: RequestKind,
        sender_ref: BlockRef,
        result_ref: BlockRef,
        arena: Arena,
    ) -> Self {
        Self {
            handle,
            key,
            kind,
            sender_ref,
            result_ref,
            active_nodes: 0,
            peers: NodeBitmask::new(),
            rows: 0,
            accounting: BatchAccounting {
                keys_sent: 0,
                visible: 0,
                silent: 0,
                rejected: 0,
                rows_owed: 0,
            },
            registered: false,
            nodes: Vec::new(),
            arena,
        }
    }

    #[must_use]
    pub const fn is_scan(&self) -> bool {
        matches!(self.kind, RequestKind::Scan)
    }

    /// # Panics
    ///
    /// Panics if the request has no node `no`.
    #[must_use]
    pub fn node(&self, no: NodeNo) -> &TreeNode {
        self.nodes
            .get(no.index())
            .unwrap_or_else(|| panic!("request {} has no node {no}", self.handle))
    }

    /// # Panics
    ///
    /// Panics if the request has no node `no`.
    pub fn node_mut(&mut self, no: NodeNo) -> &mut TreeNode {
        let handle = self.handle;
        self.nodes
            .get_mut(no.index())
            .unwrap_or_else(|| panic!("request {handle} has no node {no}"))
    }

    /// Numbers of the nodes depending on `no`.
    #[must_use]
    pub fn dependents(&self, no: NodeNo) -> Vec<NodeNo> {
        self.node(no).dependents.map_or_else(Vec::new, |id| {
            self.arena
                .get(id)
                .iter()
                .map(|&n| NodeNo(u8::try_from(n).unwrap_or(u8::MAX)))
                .collect()
        })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} nodes={} active={} peers={}",
            self.kind,
            self.key,
            self.handle,
            self.nodes.len(),
            self.active_nodes,
            self.peers.count()
        )
    }
}
