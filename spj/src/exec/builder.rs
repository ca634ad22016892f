//! Query tree parsing.
//!
//! The tree section of an inbound request holds a header word
//! `(tree_len << 16) | node_count`, `tree_len - 1` words of node
//! descriptions, and then one parameter block per node. Nodes and parameter
//! blocks are read in lockstep.
//!
//! # Design
//!
//! Parsing is a single pass. Each node is appended to the request before its
//! optional parts are parsed, so a failure at any point leaves a request
//! whose every allocation is owned by its arena and is released by
//! discarding the request. Attribute sections are assembled in a second pass
//! over the parsed nodes because only then is it known which nodes are
//! leaves and so need no rows delivered back to this block.
//!
//! # Invariants
//!
//! - Node `n` only names parents `< n`; the first node is the only one
//!   without a parent.
//! - Only the first node may be a fragment scan.
//! - The root key (or scan bounds) comes from the inbound request, never
//!   from the tree.

use crate::error::SpjError;
use crate::pattern::{CompiledPattern, MAX_ROW_COLUMNS, RowHeader, RowRef, compile};
use crate::protocol::interpreter::build_section;
use crate::protocol::{
    AttributeHeader, LookupReq, MAX_TREE_NODES, NODE_FIXED_WORDS, OperationKind,
    PARAM_FIXED_WORDS, ParamBits, ScanFragReq, TreeBits, WordReader, flush_ai, unpack_list,
};
use crate::types::{BlockRef, NodeNo};

use super::lookup;
use super::request::{NODE_WORDS, NodeBits, NodeState, OpData, Request, SendState, TreeNode};
use super::scan_frag;

/// Largest node description, in words (exclusive).
pub const MAX_NODE_WORDS: usize = 8192;
/// Largest parameter block, in words (exclusive).
pub const MAX_PARAM_WORDS: usize = 8192;
/// Most parents a node may name.
pub const MAX_PARENTS: usize = 63;

/// The inbound request that carried the tree.
#[derive(Debug, Clone, Copy)]
pub enum Root<'a> {
    Lookup(&'a LookupReq),
    Scan(&'a ScanFragReq),
}

impl<'a> Root<'a> {
    const fn kind(self) -> OperationKind {
        match self {
            Self::Lookup(_) => OperationKind::Lookup,
            Self::Scan(_) => OperationKind::ScanFrag,
        }
    }

    fn key_info(self) -> &'a [u32] {
        match self {
            Self::Lookup(req) => &req.key_info,
            Self::Scan(req) => &req.key_info,
        }
    }

    fn tree(self) -> &'a [u32] {
        match self {
            Self::Lookup(req) => &req.attr_info,
            Self::Scan(req) => &req.attr_info,
        }
    }
}

/// Block-level settings the builder needs.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext {
    pub own_ref: BlockRef,
    pub scan_priority: u32,
}

/// Attribute section parts collected while parsing one node.
#[derive(Debug, Default)]
struct PendingAttrInfo {
    program: Vec<u32>,
    subroutine: Vec<u32>,
    projection: Vec<u32>,
    linked: Vec<u16>,
}

/// Build the node tree of `request` from the tree section of `root`.
///
/// # Errors
///
/// Any tree, parameter, pattern or memory error. The request may hold
/// partially built nodes afterwards and must then be discarded.
pub fn build(request: &mut Request, root: Root<'_>, cx: &BuildContext) -> Result<(), SpjError> {
    let section = root.tree();
    let &header = section.first().ok_or(SpjError::ZeroLengthQueryTree)?;
    let tree_len = (header >> 16) as usize;
    let count = (header & 0xFFFF) as usize;
    if tree_len == 0 {
        return Err(SpjError::ZeroLengthQueryTree);
    }
    if tree_len > section.len() {
        return Err(SpjError::InvalidTreeNodeSpecification);
    }
    if count == 0 || count > MAX_TREE_NODES {
        return Err(SpjError::InvalidTreeNodeCount);
    }
    let mut tree = WordReader::new(&section[1..tree_len]);
    let mut params = WordReader::new(&section[tree_len..]);

    let mut pending = Vec::with_capacity(count);
    for _ in 0..count {
        let node = next_block(
            &mut tree,
            MAX_NODE_WORDS,
            NODE_FIXED_WORDS,
            SpjError::QueryNodeTooBig,
            SpjError::InvalidTreeNodeSpecification,
        )?;
        let param = next_block(
            &mut params,
            MAX_PARAM_WORDS,
            PARAM_FIXED_WORDS,
            SpjError::QueryNodeParametersTooBig,
            SpjError::InvalidTreeParametersSpecification,
        )?;
        if node[0] & 0xFFFF != param[0] & 0xFFFF {
            return Err(SpjError::UnknownQueryOperation);
        }
        let kind = OperationKind::try_from(node[0] & 0xFFFF)?;
        pending.push(build_node(request, kind, node, param, root, cx)?);
    }

    for (index, attrs) in pending.into_iter().enumerate() {
        let no = NodeNo(u8::try_from(index).map_err(|_| SpjError::InvalidTreeNodeCount)?);
        finish_attr_info(request, no, attrs, cx)?;
    }
    Ok(())
}

/// Take one `(len << 16) | kind` prefixed block.
fn next_block<'a>(
    reader: &mut WordReader<'a>,
    max: usize,
    min: usize,
    too_big: SpjError,
    invalid: SpjError,
) -> Result<&'a [u32], SpjError> {
    let head = reader.peek().ok_or(invalid)?;
    let len = (head >> 16) as usize;
    if len >= max {
        return Err(too_big);
    }
    if len < min {
        return Err(invalid);
    }
    reader.take(len).ok_or(invalid)
}

fn build_node(
    request: &mut Request,
    kind: OperationKind,
    node: &[u32],
    param: &[u32],
    root: Root<'_>,
    cx: &BuildContext,
) -> Result<PendingAttrInfo, SpjError> {
    let no = NodeNo(u8::try_from(request.nodes.len()).map_err(|_| SpjError::InvalidTreeNodeCount)?);
    if no.is_root() && kind != root.kind() {
        return Err(SpjError::InvalidRequest);
    }
    if kind == OperationKind::ScanFrag && !no.is_root() {
        return Err(SpjError::InvalidTreeNodeSpecification);
    }

    let mut tree = WordReader::new(&node[1..]);
    let mut params = WordReader::new(&param[1..]);
    let invalid_node = SpjError::InvalidTreeNodeSpecification;
    let invalid_param = SpjError::InvalidTreeParametersSpecification;
    let tree_bits = tree.get().ok_or(invalid_node)?;
    let table_id = tree.get().ok_or(invalid_node)?;
    let schema_version = tree.get().ok_or(invalid_node)?;
    let param_bits = params.get().ok_or(invalid_param)?;
    let result_data = params.get().ok_or(invalid_param)?;

    request.arena.charge(NODE_WORDS)?;
    let op = match (kind, root) {
        (OperationKind::Lookup, _) => OpData::Lookup(lookup::op_data(
            request,
            root,
            table_id,
            schema_version,
            cx,
        )),
        (OperationKind::ScanFrag, Root::Scan(req)) => {
            OpData::ScanFrag(scan_frag::op_data(req, table_id, schema_version, cx))
        }
        (OperationKind::ScanFrag, Root::Lookup(_)) => return Err(SpjError::InvalidRequest),
    };
    request.nodes.push(TreeNode {
        no,
        kind,
        bits: NodeBits::LEAF,
        state: NodeState::Inactive,
        table_id,
        schema_version,
        result_data,
        dependents: None,
        key_pattern: None,
        attr_pattern: None,
        send: SendState::default(),
        op,
    });

    parse_parents(request, no, tree_bits, &mut tree)?;
    parse_key(request, no, tree_bits, param_bits, &mut tree, &mut params)?;
    if tree_bits & TreeBits::UNIQUE_INDEX != 0 {
        request.node_mut(no).bits.insert(NodeBits::UNIQUE_INDEX);
    }
    let attrs = parse_attr_info(request, no, tree_bits, param_bits, &mut tree, &mut params)?;

    if no.is_root() {
        let key = request.arena.alloc(root.key_info().to_vec())?;
        let node = request.node_mut(no);
        node.bits.insert(NodeBits::ONE_SHOT);
        node.send.key_info = Some(key);
    }
    Ok(attrs)
}

fn parse_parents(
    request: &mut Request,
    no: NodeNo,
    tree_bits: u32,
    tree: &mut WordReader<'_>,
) -> Result<(), SpjError> {
    if tree_bits & TreeBits::HAS_PARENT == 0 {
        return if no.is_root() {
            Ok(())
        } else {
            Err(SpjError::InvalidTreeNodeSpecification)
        };
    }
    let parents = unpack_list(
        tree,
        MAX_PARENTS,
        SpjError::QueryNodeTooBig,
        SpjError::InvalidTreeNodeSpecification,
    )?;
    if parents.is_empty() || no.is_root() {
        return Err(SpjError::InvalidTreeNodeSpecification);
    }
    for (i, &parent) in parents.iter().enumerate() {
        if usize::from(parent) >= no.index() || parents[..i].contains(&parent) {
            return Err(SpjError::InvalidTreeNodeSpecification);
        }
        let parent = NodeNo(u8::try_from(parent).map_err(|_| SpjError::InvalidTreeNodeSpecification)?);
        add_dependent(request, parent, no)?;
    }
    Ok(())
}

fn add_dependent(request: &mut Request, parent: NodeNo, child: NodeNo) -> Result<(), SpjError> {
    let list = match request.node(parent).dependents {
        Some(list) => list,
        None => {
            let list = request.arena.alloc(Vec::new())?;
            request.node_mut(parent).dependents = Some(list);
            list
        }
    };
    request.arena.append(list, u32::from(child.0))?;
    request.node_mut(parent).bits.remove(NodeBits::LEAF);
    Ok(())
}

/// Read `count` attribute-header prefixed parameter values.
fn read_params<'a>(
    params: &mut WordReader<'a>,
    count: usize,
) -> Result<(RowHeader, &'a [u32]), SpjError> {
    let header = RowHeader::build_counted(params.rest(), count)?;
    let words = params
        .take(header.len())
        .ok_or(SpjError::InvalidTreeParametersSpecification)?;
    Ok((header, words))
}

fn parse_key(
    request: &mut Request,
    no: NodeNo,
    tree_bits: u32,
    param_bits: u32,
    tree: &mut WordReader<'_>,
    params: &mut WordReader<'_>,
) -> Result<(), SpjError> {
    let key_bits = tree_bits & TreeBits::KEY_ANY;
    let has_params = tree_bits & TreeBits::KEY_PARAMS != 0;
    if has_params != (param_bits & ParamBits::KEY_PARAMS != 0) {
        return Err(SpjError::KeyParamBitsMismatch);
    }
    if no.is_root() {
        // The root key travels with the inbound request.
        return if key_bits == 0 {
            Ok(())
        } else {
            Err(SpjError::InvalidTreeNodeSpecification)
        };
    }
    if key_bits == 0 {
        return Err(SpjError::InvalidTreeNodeSpecification);
    }

    let head = tree.get().ok_or(SpjError::InvalidTreeNodeSpecification)?;
    let len = (head & 0xFFFF) as usize;
    let count = (head >> 16) as usize;
    if (count > 0) != has_params {
        return Err(SpjError::IncorrectKeyParamCount);
    }
    let pattern = tree.take(len).ok_or(SpjError::InvalidTreeNodeSpecification)?;
    let (header, values) = read_params(params, count)?;
    let compiled = compile(
        pattern,
        &RowRef::new(&header, values),
        tree_bits & TreeBits::KEY_LINKED != 0,
    )?;
    match compiled {
        CompiledPattern::Fixed(expanded) => {
            let id = request.arena.alloc(expanded.words)?;
            request.node_mut(no).send.key_info = Some(id);
        }
        CompiledPattern::Linked(words) => {
            let id = request.arena.alloc(words)?;
            let node = request.node_mut(no);
            node.key_pattern = Some(id);
            node.bits.insert(NodeBits::KEYINFO_CONSTRUCTED);
        }
    }
    Ok(())
}

fn parse_attr_info(
    request: &mut Request,
    no: NodeNo,
    tree_bits: u32,
    param_bits: u32,
    tree: &mut WordReader<'_>,
    params: &mut WordReader<'_>,
) -> Result<PendingAttrInfo, SpjError> {
    let invalid_node = SpjError::InvalidTreeNodeSpecification;
    let invalid_param = SpjError::InvalidTreeParametersSpecification;
    let tree_program = tree_bits & TreeBits::ATTR_INTERPRET != 0;
    let param_program = param_bits & ParamBits::ATTR_INTERPRET != 0;
    let tree_attr_params = tree_bits & TreeBits::ATTR_PARAMS != 0;
    let param_attr_params = param_bits & ParamBits::ATTR_PARAMS != 0;
    if tree_program && param_program {
        return Err(SpjError::BothTreeAndParametersContainInterpretedProgram);
    }
    if no.is_root() && tree_bits & TreeBits::ATTR_LINKED != 0 {
        // The root has no parent row to build parameters from.
        return Err(invalid_node);
    }

    let mut pending = PendingAttrInfo::default();
    if tree_program {
        let head = tree.get().ok_or(invalid_node)?;
        let program_len = (head & 0xFFFF) as usize;
        let pattern_len = (head >> 16) as usize;
        pending.program = tree.take(program_len).ok_or(invalid_node)?.to_vec();

        let attr_head = tree.get().ok_or(invalid_node)?;
        let len = (attr_head & 0xFFFF) as usize;
        let count = (attr_head >> 16) as usize;
        if len != pattern_len || (count > 0) != tree_attr_params {
            return Err(invalid_node);
        }
        if tree_attr_params != param_attr_params {
            return Err(invalid_param);
        }
        let pattern = tree.take(len).ok_or(invalid_node)?;
        let (header, values) = read_params(params, count)?;
        let compiled = compile(
            pattern,
            &RowRef::new(&header, values),
            tree_bits & TreeBits::ATTR_LINKED != 0,
        )?;
        match compiled {
            CompiledPattern::Fixed(expanded) => pending.subroutine = expanded.words,
            CompiledPattern::Linked(words) => {
                let id = request.arena.alloc(words)?;
                let node = request.node_mut(no);
                node.attr_pattern = Some(id);
                node.bits.insert(NodeBits::ATTRINFO_CONSTRUCTED);
            }
        }
        request.node_mut(no).bits.insert(NodeBits::ATTR_INTERPRETED);
    } else {
        if tree_bits & (TreeBits::ATTR_PARAMS | TreeBits::ATTR_LINKED) != 0 {
            return Err(invalid_node);
        }
        if param_attr_params {
            return Err(invalid_param);
        }
        if param_program {
            let head = params.get().ok_or(invalid_param)?;
            let program_len = (head & 0xFFFF) as usize;
            let subroutine_len = (head >> 16) as usize;
            pending.program = params.take(program_len).ok_or(invalid_param)?.to_vec();
            pending.subroutine = params.take(subroutine_len).ok_or(invalid_param)?.to_vec();
            request.node_mut(no).bits.insert(NodeBits::ATTR_INTERPRETED);
        }
    }

    if tree_bits & TreeBits::LINKED_ATTR != 0 {
        pending.linked = unpack_list(tree, MAX_ROW_COLUMNS - 1, invalid_node, invalid_node)?;
    }
    if param_bits & ParamBits::ATTR_LIST != 0 {
        let len = params.get().ok_or(invalid_param)? as usize;
        pending.projection = params.take(len).ok_or(invalid_param)?.to_vec();
        if !pending.projection.is_empty() {
            request.node_mut(no).bits.insert(NodeBits::USER_PROJECTION);
        }
    }
    Ok(pending)
}

/// Assemble the attribute section of a fully parsed node.
///
/// The user projection is flushed to the API first. A non-leaf node then
/// reads its linked attributes plus the correlation id, which come back to
/// this block to start the node's children.
fn finish_attr_info(
    request: &mut Request,
    no: NodeNo,
    attrs: PendingAttrInfo,
    cx: &BuildContext,
) -> Result<(), SpjError> {
    let node = request.node(no);
    let mut reads = attrs.projection;
    if !reads.is_empty() {
        reads.extend(flush_ai(
            request.result_ref.to_word(),
            node.result_data,
            cx.own_ref.to_word(),
        ));
    }
    if !node.is_leaf() {
        reads.extend(attrs.linked.iter().map(|&a| AttributeHeader::read(a).0));
        reads.push(AttributeHeader::read(AttributeHeader::CORR_FACTOR32).0);
    }
    let interpreted = node.bits.contains(NodeBits::ATTR_INTERPRETED);
    let section = if interpreted {
        build_section(&attrs.program, &reads, &attrs.subroutine)
    } else {
        reads
    };
    let id = request.arena.alloc(section)?;
    let node = request.node_mut(no);
    node.send.attr_info = Some(id);
    match &mut node.op {
        OpData::Lookup(data) => data.template.interpreted = interpreted,
        OpData::ScanFrag(data) => data.template.flags.interpreted = interpreted,
    }
    Ok(())
}
