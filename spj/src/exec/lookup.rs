//! Key lookup operation.
//!
//! A lookup node sends one key lookup to the storage layer for the root key,
//! or one per parent row for a child. Replies are routed by node kind:
//!
//! | node                      | row (`TRANSID_AI`) | confirmation / rejection |
//! |---------------------------|--------------------|--------------------------|
//! | non-leaf                  | this block         | this block               |
//! | leaf of a scan request    | API                | this block               |
//! | leaf of a lookup request  | API                | original caller          |
//!
//! `outstanding` counts the replies still expected back here: two for a
//! non-leaf send, one for a scan-request leaf send, none otherwise.
//!
//! # Invariants
//!
//! - A node is `Active` exactly while `outstanding > 0`.
//! - A rejection of a non-leaf send consumes both of its expected replies,
//!   since no row will follow.

use tracing::{debug, warn};

use crate::error::SpjError;
use crate::pattern::{Expanded, RowRef, expand};
use crate::protocol::interpreter::SectionPart;
use crate::protocol::{LookupConf, LookupRef, LookupReq, ROW_NOT_FOUND, Signal};
use crate::types::{BlockNumber, BlockRef, NodeNo, NodePtr};

use super::Ctx;
use super::builder::{BuildContext, Root};
use super::completion;
use super::request::{LookupData, NodeBits, NodeState, Request};

/// Lookup state of a freshly built node.
pub(super) fn op_data(
    request: &Request,
    root: Root<'_>,
    table_id: u32,
    schema_version: u32,
    cx: &BuildContext,
) -> LookupData {
    let (save_point_id, fragment_id, dist_key, hash_value) = match root {
        Root::Lookup(req) if request.nodes.is_empty() => (
            req.save_point_id,
            req.fragment_id,
            req.dist_key,
            req.hash_value,
        ),
        Root::Lookup(req) => (req.save_point_id, 0, 0, 0),
        Root::Scan(req) => (req.save_point_id, 0, 0, 0),
    };
    LookupData {
        outstanding: 0,
        template: LookupReq {
            client_ref: cx.own_ref,
            client_data: 0,
            trans_id: request.key.trans_id,
            save_point_id,
            table_id,
            schema_version,
            fragment_id,
            dist_key,
            hash_value,
            result_ref: cx.own_ref,
            result_data: 0,
            correlation: 0,
            interpreted: false,
            key_info: Vec::new(),
            attr_info: Vec::new(),
        },
    }
}

/// Data word the original caller sees in replies about node `no`.
fn reply_data(request: &Request, no: NodeNo) -> u32 {
    if no.is_root() {
        request.key.sender_data
    } else {
        request.node(no).result_data
    }
}

/// Start the root lookup on this node's storage block.
pub(super) fn start(ctx: &mut Ctx<'_>, request: &mut Request) {
    let node = request.node_mut(NodeNo::ROOT);
    let key_info = node.send.key_info.take();
    let attr_info = node.send.attr_info.take();
    let key_info = key_info.map_or_else(Vec::new, |id| request.arena.take(id));
    let attr_info = attr_info.map_or_else(Vec::new, |id| request.arena.take(id));
    let dest = BlockRef::new(ctx.own_ref.node, BlockNumber::LQH);
    send(ctx, request, NodeNo::ROOT, dest, key_info, attr_info, 0);
}

fn send(
    ctx: &mut Ctx<'_>,
    request: &mut Request,
    no: NodeNo,
    dest: BlockRef,
    key_info: Vec<u32>,
    attr_info: Vec<u32>,
    correlation: u32,
) {
    let ptr = NodePtr::new(request.handle, no).to_word();
    let scan_request = request.is_scan();
    let caller = request.sender_ref;
    let api = request.result_ref;
    let caller_data = reply_data(request, no);

    let node = request.node_mut(no);
    let leaf = node.is_leaf();
    let (client_ref, client_data, expected) = match (leaf, scan_request) {
        (false, _) => (ctx.own_ref, ptr, 2),
        (true, true) => (ctx.own_ref, ptr, 1),
        (true, false) => (caller, caller_data, 0),
    };
    let (result_ref, result_data) = if leaf {
        (api, node.result_data)
    } else {
        (ctx.own_ref, ptr)
    };
    let data = node.lookup_mut();
    let mut req = data.template.clone();
    req.client_ref = client_ref;
    req.client_data = client_data;
    req.result_ref = result_ref;
    req.result_data = result_data;
    req.correlation = correlation;
    req.key_info = key_info;
    req.attr_info = attr_info;
    data.outstanding += expected;
    let activated = expected > 0 && node.state == NodeState::Inactive;
    if activated {
        node.state = NodeState::Active;
        request.active_nodes += 1;
    }

    request.peers.set(dest.node);
    if scan_request && !no.is_root() {
        request.accounting.keys_sent += 1;
    }
    if dest.node == ctx.own_ref.node {
        ctx.counters.local_reads_sent += 1;
    } else {
        ctx.counters.remote_reads_sent += 1;
    }
    debug!(node = %no, %dest, outstanding = expected, "sending lookup");
    ctx.send(dest, Signal::LookupReq(req));
}

/// Start child `no` for one parent row.
///
/// # Errors
///
/// A pattern that does not fit the row, or a key the distribution cannot
/// place.
fn start_child(
    ctx: &mut Ctx<'_>,
    request: &mut Request,
    no: NodeNo,
    row: &RowRef<'_>,
    correlation: u32,
) -> Result<(), SpjError> {
    let node = request.node(no);
    let key = if node.bits.contains(NodeBits::KEYINFO_CONSTRUCTED) {
        let pattern = node.key_pattern.ok_or(SpjError::InternalError)?;
        expand(request.arena.get(pattern), row)?
    } else {
        Expanded {
            words: node
                .send
                .key_info
                .map_or_else(Vec::new, |id| request.arena.duplicate(id)),
            has_null: false,
        }
    };
    if node.bits.contains(NodeBits::UNIQUE_INDEX) && key.has_null {
        // A null never matches a unique index entry.
        reject_locally(ctx, request, no, ROW_NOT_FOUND);
        return Ok(());
    }

    let attr_info = attr_info_for_row(request, no, row)?;
    let (hash, location) = ctx.distribution.locate(node.table_id, &key.words)?;
    let template = &mut request.node_mut(no).lookup_mut().template;
    template.hash_value = hash;
    template.fragment_id = location.fragment_id;
    template.dist_key = location.dist_key;
    send(ctx, request, no, location.peer, key.words, attr_info, correlation);
    Ok(())
}

/// The node's attribute section, with the filter parameters built from
/// `row` when they are constructed per row.
fn attr_info_for_row(
    request: &Request,
    no: NodeNo,
    row: &RowRef<'_>,
) -> Result<Vec<u32>, SpjError> {
    let node = request.node(no);
    let mut section = node
        .send
        .attr_info
        .map_or_else(Vec::new, |id| request.arena.duplicate(id));
    if !node.bits.contains(NodeBits::ATTRINFO_CONSTRUCTED) {
        return Ok(section);
    }
    let pattern = node.attr_pattern.ok_or(SpjError::InternalError)?;
    let subroutine = expand(request.arena.get(pattern), row)?.words;
    let len = u32::try_from(subroutine.len()).map_err(|_| SpjError::OutOfSectionMemory)?;
    *section
        .get_mut(SectionPart::SUBROUTINE)
        .ok_or(SpjError::InternalError)? = len;
    section.extend(subroutine);
    Ok(section)
}

/// Account for a child that could not be started as if the storage layer
/// had rejected it.
fn reject_locally(ctx: &mut Ctx<'_>, request: &mut Request, no: NodeNo, error_code: u32) {
    if error_code == ROW_NOT_FOUND {
        ctx.counters.reads_not_found += 1;
    }
    if request.is_scan() {
        request.accounting.keys_sent += 1;
        request.accounting.rejected += 1;
    } else {
        let reply = LookupRef {
            client_data: reply_data(request, no),
            trans_id: request.key.trans_id,
            error_code,
        };
        ctx.send(request.sender_ref, Signal::LookupRef(reply));
    }
}

/// Start every child of `parent` for one of its rows.
pub(super) fn fan_out(
    ctx: &mut Ctx<'_>,
    request: &mut Request,
    parent: NodeNo,
    row: &RowRef<'_>,
    correlation: u32,
) {
    for child in request.dependents(parent) {
        if let Err(err) = start_child(ctx, request, child, row, correlation) {
            warn!(node = %child, %parent, %err, "child lookup not started");
            reject_locally(ctx, request, child, err.code());
        }
    }
}

/// Take `replies` off the node's outstanding count, finishing the node at
/// zero.
fn consume(request: &mut Request, no: NodeNo, replies: u32) {
    let data = request.node_mut(no).lookup_mut();
    data.outstanding = data
        .outstanding
        .checked_sub(replies)
        .unwrap_or_else(|| panic!("node {no} got more replies than it sent requests"));
    if data.outstanding == 0 {
        completion::node_finished(request, no);
    }
}

/// A row of a non-leaf lookup.
pub(super) fn exec_transid_ai(
    ctx: &mut Ctx<'_>,
    request: &mut Request,
    no: NodeNo,
    row: &RowRef<'_>,
    correlation: u32,
) {
    assert!(
        !request.node(no).is_leaf(),
        "row for leaf node {no} delivered to this block"
    );
    fan_out(ctx, request, no, row, correlation);
    if request.is_scan() {
        request.accounting.rows_owed += 1;
    }
    consume(request, no, 1);
}

pub(super) fn exec_conf(ctx: &mut Ctx<'_>, request: &mut Request, no: NodeNo) {
    let node = request.node(no);
    let leaf = node.is_leaf();
    let visible = node.bits.contains(NodeBits::USER_PROJECTION);
    if request.is_scan() {
        if !leaf {
            request.accounting.rows_owed -= 1;
        }
        if visible {
            request.accounting.visible += 1;
            request.rows += 1;
        } else {
            request.accounting.silent += 1;
        }
    } else {
        let reply = LookupConf {
            client_data: reply_data(request, no),
            trans_id: request.key.trans_id,
        };
        ctx.send(request.sender_ref, Signal::LookupConf(reply));
    }
    consume(request, no, 1);
}

pub(super) fn exec_ref(ctx: &mut Ctx<'_>, request: &mut Request, no: NodeNo, error_code: u32) {
    if error_code == ROW_NOT_FOUND {
        ctx.counters.reads_not_found += 1;
    }
    let leaf = request.node(no).is_leaf();
    if request.is_scan() {
        request.accounting.rejected += 1;
    } else {
        let reply = LookupRef {
            client_data: reply_data(request, no),
            trans_id: request.key.trans_id,
            error_code,
        };
        ctx.send(request.sender_ref, Signal::LookupRef(reply));
    }
    consume(request, no, if leaf { 1 } else { 2 });
}
