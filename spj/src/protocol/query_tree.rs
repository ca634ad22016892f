//! Wire format of serialized query trees.
//!
//! A query tree section is the tree itself followed by the parameters:
//!
//! ```text
//! [(tree_len << 16) | node_count]
//! node 0 .. node n-1          (tree_len words in total, header included)
//! params 0 .. params n-1
//! ```
//!
//! Each node block is `[(len << 16) | kind, request_info, table_id,
//! table_version, optional parts...]` and each parameter block is
//! `[(len << 16) | kind, request_info, result_data, optional parts...]`.
//! Optional parts are present only if their bit is set in `request_info`
//! and always appear in the order of the bit definitions below.
//!
//! [`QueryTreeBuilder`] produces this format from a typed description and is
//! what callers (and the tests) use to submit trees.

use crate::error::SpjError;
use crate::pattern::QueryPattern;
use crate::protocol::attribute::append_value;

/// Maximum number of nodes in one tree.
pub const MAX_TREE_NODES: usize = 32;
/// Fixed words at the start of every node block.
pub const NODE_FIXED_WORDS: usize = 4;
/// Fixed words at the start of every parameter block.
pub const PARAM_FIXED_WORDS: usize = 3;

/// Operation kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OperationKind {
    /// Single-row key lookup.
    Lookup = 1,
    /// Scan of one fragment.
    ScanFrag = 2,
}

impl TryFrom<u32> for OperationKind {
    type Error = SpjError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Lookup),
            2 => Ok(Self::ScanFrag),
            _ => Err(SpjError::UnknownQueryOperation),
        }
    }
}

/// Bits of a node block's `request_info`.
pub struct TreeBits;

impl TreeBits {
    /// A parent index list follows.
    pub const HAS_PARENT: u32 = 0x01;
    /// The key pattern reads parent columns.
    pub const KEY_LINKED: u32 = 0x02;
    /// The key pattern references parameters.
    pub const KEY_PARAMS: u32 = 0x04;
    /// The key pattern holds literal data.
    pub const KEY_CONSTS: u32 = 0x08;
    /// A list of attributes to deliver to this block follows.
    pub const LINKED_ATTR: u32 = 0x10;
    /// An interpreted program and attribute-parameter pattern follow.
    pub const ATTR_INTERPRET: u32 = 0x20;
    /// The attribute-parameter pattern references parameters.
    pub const ATTR_PARAMS: u32 = 0x40;
    /// The attribute-parameter pattern reads parent columns.
    pub const ATTR_LINKED: u32 = 0x80;
    /// The lookup targets a unique index.
    pub const UNIQUE_INDEX: u32 = 0x1_0000;

    pub const KEY_ANY: u32 = Self::KEY_LINKED | Self::KEY_PARAMS | Self::KEY_CONSTS;
}

/// Bits of a parameter block's `request_info`.
pub struct ParamBits;

impl ParamBits {
    /// A literal attribute (user projection) list follows.
    pub const ATTR_LIST: u32 = 0x1;
    /// Attribute-parameter values follow.
    pub const ATTR_PARAMS: u32 = 0x2;
    /// Key parameter values follow.
    pub const KEY_PARAMS: u32 = 0x4;
    /// An interpreted program and its subroutine follow.
    pub const ATTR_INTERPRET: u32 = 0x8;
}

/// Combine a length and a kind (or count) into one word.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // lengths are bounded by the scratch limits
pub const fn len_word(len: usize, low: u32) -> u32 {
    ((len as u32) << 16) | (low & 0xFFFF)
}

/// Forward-only reader over a word buffer.
#[derive(Debug, Clone)]
pub struct WordReader<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> WordReader<'a> {
    #[must_use]
    pub const fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.words.len() - self.pos
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[must_use]
    pub fn peek(&self) -> Option<u32> {
        self.words.get(self.pos).copied()
    }

    pub fn get(&mut self) -> Option<u32> {
        let word = self.peek()?;
        self.pos += 1;
        Some(word)
    }

    /// Take the next `n` words, or nothing if fewer remain.
    pub fn take(&mut self, n: usize) -> Option<&'a [u32]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.words.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Everything not yet read.
    #[must_use]
    pub fn rest(&self) -> &'a [u32] {
        &self.words[self.pos..]
    }
}

/// Read a packed list of 16-bit entries.
///
/// The first word holds the count in its low half and the first entry in
/// its high half; the remaining entries follow two per word, low half first.
///
/// # Errors
///
/// `too_long` if the count exceeds `max`, `truncated` if the buffer ends
/// before the list does.
pub fn unpack_list(
    reader: &mut WordReader<'_>,
    max: usize,
    too_long: SpjError,
    truncated: SpjError,
) -> Result<Vec<u16>, SpjError> {
    let head = reader.get().ok_or(truncated)?;
    let count = (head & 0xFFFF) as usize;
    if count > max {
        return Err(too_long);
    }
    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Ok(out);
    }
    out.push(high_half(head));
    let rest = count - 1;
    let words = reader.take(rest.div_ceil(2)).ok_or(truncated)?;
    for &word in words {
        out.push(low_half(word));
        if out.len() < count {
            out.push(high_half(word));
        }
    }
    Ok(out)
}

/// Encode a packed list of 16-bit entries (inverse of [`unpack_list`]).
#[must_use]
pub fn pack_list(entries: &[u16]) -> Vec<u32> {
    let Some((&first, rest)) = entries.split_first() else {
        return vec![0];
    };
    let mut out = vec![len_word(usize::from(first), u32::try_from(entries.len()).unwrap_or(0))];
    for pair in rest.chunks(2) {
        let low = u32::from(pair[0]);
        let high = pair.get(1).map_or(0, |&h| u32::from(h));
        out.push((high << 16) | low);
    }
    out
}

#[allow(clippy::cast_possible_truncation)] // upper half of the word
const fn high_half(word: u32) -> u16 {
    (word >> 16) as u16
}

#[allow(clippy::cast_possible_truncation)] // lower half of the word
const fn low_half(word: u32) -> u16 {
    (word & 0xFFFF) as u16
}

/// A parameter value supplied with a tree. An empty value is null.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamValue(pub Vec<u32>);

impl ParamValue {
    #[must_use]
    pub const fn null() -> Self {
        Self(Vec::new())
    }
}

/// Key of a node: pattern instructions plus the parameters they reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeySpec {
    pub pattern: Vec<u32>,
    pub params: Vec<ParamValue>,
}

/// Interpreted filter carried in the tree, with its parameter pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeFilterSpec {
    pub program: Vec<u32>,
    /// Pattern producing the subroutine part (parameters of the program).
    pub attr_pattern: Vec<u32>,
    pub attr_params: Vec<ParamValue>,
}

/// Interpreted filter carried in the parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamFilterSpec {
    pub program: Vec<u32>,
    pub subroutine: Vec<u32>,
}

/// Typed description of one tree node and its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryNodeSpec {
    pub kind: OperationKind,
    pub table_id: u32,
    pub schema_version: u32,
    pub parents: Vec<u16>,
    pub key: Option<KeySpec>,
    pub tree_filter: Option<TreeFilterSpec>,
    pub linked_attrs: Vec<u16>,
    pub unique_index: bool,
    pub result_data: u32,
    pub param_filter: Option<ParamFilterSpec>,
    pub projection: Vec<u16>,
}

impl QueryNodeSpec {
    fn new(kind: OperationKind, table_id: u32) -> Self {
        Self {
            kind,
            table_id,
            schema_version: 1,
            parents: Vec::new(),
            key: None,
            tree_filter: None,
            linked_attrs: Vec::new(),
            unique_index: false,
            result_data: 0,
            param_filter: None,
            projection: Vec::new(),
        }
    }

    #[must_use]
    pub fn lookup(table_id: u32) -> Self {
        Self::new(OperationKind::Lookup, table_id)
    }

    #[must_use]
    pub fn scan(table_id: u32) -> Self {
        Self::new(OperationKind::ScanFrag, table_id)
    }

    #[must_use]
    pub fn with_parent(mut self, parent: u16) -> Self {
        self.parents.push(parent);
        self
    }

    #[must_use]
    pub fn with_key(mut self, pattern: Vec<u32>, params: Vec<ParamValue>) -> Self {
        self.key = Some(KeySpec { pattern, params });
        self
    }

    /// Attributes delivered to this block so children can read them.
    #[must_use]
    pub fn with_linked_attrs(mut self, attrs: &[u16]) -> Self {
        self.linked_attrs = attrs.to_vec();
        self
    }

    /// Attributes delivered straight to the caller.
    #[must_use]
    pub fn with_projection(mut self, attrs: &[u16]) -> Self {
        self.projection = attrs.to_vec();
        self
    }

    #[must_use]
    pub const fn with_result_data(mut self, result_data: u32) -> Self {
        self.result_data = result_data;
        self
    }

    #[must_use]
    pub const fn with_unique_index(mut self) -> Self {
        self.unique_index = true;
        self
    }

    #[must_use]
    pub fn with_tree_filter(mut self, filter: TreeFilterSpec) -> Self {
        self.tree_filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_param_filter(mut self, program: Vec<u32>, subroutine: Vec<u32>) -> Self {
        self.param_filter = Some(ParamFilterSpec {
            program,
            subroutine,
        });
        self
    }

    fn encode_node(&self) -> Vec<u32> {
        let mut bits = 0;
        let mut body = Vec::new();
        if !self.parents.is_empty() {
            bits |= TreeBits::HAS_PARENT;
            body.extend(pack_list(&self.parents));
        }
        if let Some(key) = &self.key {
            bits |= pattern_bits(&key.pattern, TreeBits::KEY_LINKED, TreeBits::KEY_CONSTS);
            if !key.params.is_empty() {
                bits |= TreeBits::KEY_PARAMS;
            }
            body.push(len_word(key.params.len(), to_u32(key.pattern.len())));
            body.extend_from_slice(&key.pattern);
        }
        if let Some(filter) = &self.tree_filter {
            bits |= TreeBits::ATTR_INTERPRET;
            if QueryPattern::is_linked(&filter.attr_pattern) {
                bits |= TreeBits::ATTR_LINKED;
            }
            if !filter.attr_params.is_empty() {
                bits |= TreeBits::ATTR_PARAMS;
            }
            body.push(len_word(filter.attr_pattern.len(), to_u32(filter.program.len())));
            body.extend_from_slice(&filter.program);
            body.push(len_word(filter.attr_params.len(), to_u32(filter.attr_pattern.len())));
            body.extend_from_slice(&filter.attr_pattern);
        }
        if !self.linked_attrs.is_empty() {
            bits |= TreeBits::LINKED_ATTR;
            body.extend(pack_list(&self.linked_attrs));
        }
        if self.unique_index {
            bits |= TreeBits::UNIQUE_INDEX;
        }
        let mut out = vec![
            len_word(NODE_FIXED_WORDS + body.len(), self.kind as u32),
            bits,
            self.table_id,
            self.schema_version,
        ];
        out.extend(body);
        out
    }

    fn encode_params(&self) -> Vec<u32> {
        let mut bits = 0;
        let mut body = Vec::new();
        if let Some(key) = self.key.as_ref().filter(|k| !k.params.is_empty()) {
            bits |= ParamBits::KEY_PARAMS;
            encode_values(&mut body, &key.params);
        }
        if let Some(filter) = &self.param_filter {
            bits |= ParamBits::ATTR_INTERPRET;
            body.push(len_word(filter.subroutine.len(), to_u32(filter.program.len())));
            body.extend_from_slice(&filter.program);
            body.extend_from_slice(&filter.subroutine);
        }
        if let Some(filter) = self.tree_filter.as_ref().filter(|f| !f.attr_params.is_empty()) {
            bits |= ParamBits::ATTR_PARAMS;
            encode_values(&mut body, &filter.attr_params);
        }
        if !self.projection.is_empty() {
            bits |= ParamBits::ATTR_LIST;
            body.push(to_u32(self.projection.len()));
            body.extend(self.projection.iter().map(|&a| u32::from(a) << 16));
        }
        let mut out = vec![
            len_word(PARAM_FIXED_WORDS + body.len(), self.kind as u32),
            bits,
            self.result_data,
        ];
        out.extend(body);
        out
    }
}

fn pattern_bits(pattern: &[u32], linked_bit: u32, consts_bit: u32) -> u32 {
    let mut bits = 0;
    // A pattern that does not decode goes out as linked; the receiver rejects it.
    if QueryPattern::is_linked(pattern) || !QueryPattern::is_well_formed(pattern) {
        bits |= linked_bit;
    }
    if QueryPattern::has_data(pattern) {
        bits |= consts_bit;
    }
    bits
}

fn encode_values(out: &mut Vec<u32>, values: &[ParamValue]) {
    for (no, value) in values.iter().enumerate() {
        append_value(out, u16::try_from(no).unwrap_or(u16::MAX), &value.0);
    }
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Encoder for query tree sections.
///
/// # Examples
///
/// ```
/// use spj::pattern::QueryPattern;
/// use spj::protocol::{QueryNodeSpec, QueryTreeBuilder};
///
/// let section = QueryTreeBuilder::new()
///     .node(QueryNodeSpec::scan(1).with_linked_attrs(&[0]))
///     .node(
///         QueryNodeSpec::lookup(2)
///             .with_parent(0)
///             .with_key(QueryPattern::col(0).to_vec(), vec![])
///             .with_projection(&[0, 1]),
///     )
///     .encode();
/// assert_eq!(section[0] & 0xFFFF, 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryTreeBuilder {
    nodes: Vec<QueryNodeSpec>,
}

impl QueryTreeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn node(mut self, spec: QueryNodeSpec) -> Self {
        self.nodes.push(spec);
        self
    }

    /// Serialize the tree followed by its parameters.
    #[must_use]
    pub fn encode(&self) -> Vec<u32> {
        let mut tree = vec![0];
        for node in &self.nodes {
            tree.extend(node.encode_node());
        }
        tree[0] = len_word(tree.len(), to_u32(self.nodes.len()));
        for node in &self.nodes {
            tree.extend(node.encode_params());
        }
        tree
    }
}
