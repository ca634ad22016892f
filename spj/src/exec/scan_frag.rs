//! Fragment scan operation.
//!
//! Only the root of a scan request is a fragment scan. It drives the
//! request in batches:
//!
//! ```text
//! Idle -> Running -> Started -> Running ... -> Closing -> Idle
//!            \___________________________________________/
//! ```
//!
//! A batch is complete once the storage layer confirmed it, every row it
//! announced has arrived, and every lookup started for those rows has been
//! answered. Only then is the batch reported to the caller.
//!
//! # Invariants
//!
//! - At most one storage request per scan is outstanding.
//! - A batch is reported at most once: `conf_received` is cleared when it is.
//! - After the batch confirmation, `rows_received <= rows_expected`.

use tracing::{debug, info};

use crate::pattern::RowRef;
use crate::protocol::{
    FragmentCompletion, ScanFragConf, ScanFragRef, ScanFragReq, ScanNextReq, Signal,
};
use crate::types::{BlockNumber, BlockRef, NodeNo, NodePtr};

use super::Ctx;
use super::builder::BuildContext;
use super::completion;
use super::lookup;
use super::request::{
    BatchAccounting, NodeBits, NodeState, OpData, Request, ScanFragData, ScanState,
};

/// Scan state of a freshly built root node.
pub(super) fn op_data(
    req: &ScanFragReq,
    table_id: u32,
    schema_version: u32,
    cx: &BuildContext,
) -> ScanFragData {
    let scan_priority = if req.scan_priority == 0 {
        cx.scan_priority
    } else {
        req.scan_priority
    };
    ScanFragData {
        state: ScanState::Idle,
        completion: FragmentCompletion::MoreData,
        conf_received: false,
        pending_close: false,
        rows_received: 0,
        rows_expected: 0,
        template: ScanFragReq {
            sender_data: 0,
            result_ref: cx.own_ref,
            trans_id: req.trans_id,
            save_point_id: req.save_point_id,
            table_id,
            schema_version,
            fragment_id: req.fragment_id,
            batch_rows: req.batch_rows,
            batch_bytes: req.batch_bytes,
            scan_priority,
            flags: req.flags,
            correlation: 0,
            key_info: Vec::new(),
            attr_info: Vec::new(),
        },
    }
}

const fn storage(ctx: &Ctx<'_>) -> BlockRef {
    BlockRef::new(ctx.own_ref.node, BlockNumber::LQH)
}

/// Send the first batch request for the root scan.
pub(super) fn start(ctx: &mut Ctx<'_>, request: &mut Request) {
    let ptr = NodePtr::new(request.handle, NodeNo::ROOT).to_word();
    let api = request.result_ref;
    let dest = storage(ctx);

    let node = request.node_mut(NodeNo::ROOT);
    let key_info = node.send.key_info.take();
    let attr_info = node.send.attr_info.take();
    let leaf = node.is_leaf();
    let data = node.scan_mut();
    let mut req = data.template.clone();
    req.sender_data = ptr;
    req.result_ref = if leaf { api } else { ctx.own_ref };
    data.state = ScanState::Running;
    data.new_batch();
    node.state = NodeState::Active;

    req.key_info = key_info.map_or_else(Vec::new, |id| request.arena.take(id));
    req.attr_info = attr_info.map_or_else(Vec::new, |id| request.arena.take(id));
    request.active_nodes += 1;
    request.accounting = BatchAccounting::default();
    request.peers.set(dest.node);
    debug!(request = %request.handle, fragment = req.fragment_id, "starting fragment scan");
    ctx.send(dest, Signal::ScanFragReq(req));
}

/// A row of the current batch.
pub(super) fn exec_transid_ai(
    ctx: &mut Ctx<'_>,
    request: &mut Request,
    row: &RowRef<'_>,
    correlation: u32,
) {
    let data = request.node_mut(NodeNo::ROOT).scan_mut();
    assert_eq!(
        data.state,
        ScanState::Running,
        "scan row outside a running batch"
    );
    data.rows_received += 1;
    assert!(
        !data.conf_received || data.rows_received <= data.rows_expected,
        "more scan rows than the batch announced"
    );
    lookup::fan_out(ctx, request, NodeNo::ROOT, row, correlation);
}

pub(super) fn exec_conf(ctx: &mut Ctx<'_>, request: &mut Request, conf: &ScanFragConf) {
    let node = request.node_mut(NodeNo::ROOT);
    let leaf = node.is_leaf();
    let visible = node.bits.contains(NodeBits::USER_PROJECTION);
    let data = node.scan_mut();
    match data.state {
        ScanState::Running => {}
        ScanState::Closing if !conf.completion.is_done() => {
            // A batch that crossed our close; the close confirmation follows.
            debug!(request = %request.handle, "ignoring batch confirmation while closing");
            return;
        }
        ScanState::Closing => {}
        state => panic!("scan confirmation in state {state:?}"),
    }
    data.conf_received = true;
    data.rows_expected = conf.completed_rows;
    data.completion = conf.completion;
    if leaf {
        // Rows went straight to the caller.
        data.rows_received = data.rows_expected;
    }
    assert!(
        data.rows_received <= data.rows_expected,
        "more scan rows than the batch announced"
    );
    if visible {
        request.rows += conf.completed_rows;
    }
    check_batch_complete(ctx, request);
}

pub(super) fn exec_ref(ctx: &mut Ctx<'_>, request: &mut Request, scan_ref: &ScanFragRef) {
    let data = request.node_mut(NodeNo::ROOT).scan_mut();
    assert!(
        matches!(data.state, ScanState::Running | ScanState::Closing),
        "scan rejection in state {:?}",
        data.state
    );
    let reply = ScanFragRef {
        sender_data: request.key.sender_data,
        trans_id: request.key.trans_id,
        error_code: scan_ref.error_code,
    };
    ctx.send(request.sender_ref, Signal::ScanFragRef(reply));
    finish(request);
}

/// Continue or close the scan on behalf of the caller.
///
/// # Panics
///
/// Panics on a next-batch request while a batch is still running, or on a
/// next-batch request for a scan that already finished. A close for a
/// finished scan is ignored.
pub(super) fn exec_next(ctx: &mut Ctx<'_>, request: &mut Request, next: &ScanNextReq) {
    let ptr = NodePtr::new(request.handle, NodeNo::ROOT).to_word();
    let dest = storage(ctx);
    let data = request.node_mut(NodeNo::ROOT).scan_mut();
    match data.state {
        ScanState::Closing => {
            debug!(request = %request.handle, "scan already closing");
        }
        ScanState::Running => {
            assert!(next.close, "next batch requested while a batch is running");
            data.pending_close = true;
        }
        ScanState::Started if data.completion.is_done() => {
            reply(ctx, request, FragmentCompletion::Closed);
            finish(request);
        }
        ScanState::Started => {
            if next.batch_rows != 0 {
                data.template.batch_rows = next.batch_rows;
            }
            if next.batch_bytes != 0 {
                data.template.batch_bytes = next.batch_bytes;
            }
            data.state = if next.close {
                ScanState::Closing
            } else {
                ScanState::Running
            };
            data.new_batch();
            let forward = ScanNextReq {
                sender_data: ptr,
                trans_id: request.key.trans_id,
                close: next.close,
                batch_rows: next.batch_rows,
                batch_bytes: next.batch_bytes,
            };
            request.accounting = BatchAccounting::default();
            ctx.send(dest, Signal::ScanNextReq(forward));
        }
        // A rejection already ended the scan; the close crossed it.
        ScanState::Idle if next.close => {
            debug!(request = %request.handle, "close for a finished scan ignored");
        }
        ScanState::Idle => panic!("continue for a scan that is not running"),
    }
}

/// Report the batch if nothing of it is outstanding any more.
pub(super) fn check_batch_complete(ctx: &mut Ctx<'_>, request: &mut Request) {
    let OpData::ScanFrag(data) = &request.node(NodeNo::ROOT).op else {
        return;
    };
    let ready = matches!(data.state, ScanState::Running | ScanState::Closing)
        && data.conf_received
        && data.rows_received == data.rows_expected
        && request.accounting.is_balanced();
    if ready {
        batch_complete(ctx, request);
    }
}

fn batch_complete(ctx: &mut Ctx<'_>, request: &mut Request) {
    let accounting = std::mem::take(&mut request.accounting);
    ctx.counters.add_batch(&accounting);
    let ptr = NodePtr::new(request.handle, NodeNo::ROOT).to_word();
    let dest = storage(ctx);
    let trans_id = request.key.trans_id;

    let data = request.node_mut(NodeNo::ROOT).scan_mut();
    data.conf_received = false;
    let completion = data.completion;
    match data.state {
        ScanState::Closing => {
            reply(ctx, request, FragmentCompletion::Closed);
            finish(request);
        }
        _ if data.pending_close && !completion.is_done() => {
            // Close on the caller's behalf; the reply waits for the close.
            data.state = ScanState::Closing;
            data.new_batch();
            let close = ScanNextReq {
                sender_data: ptr,
                trans_id,
                close: true,
                batch_rows: 0,
                batch_bytes: 0,
            };
            ctx.send(dest, Signal::ScanNextReq(close));
        }
        _ if data.pending_close || completion == FragmentCompletion::Closed => {
            reply(ctx, request, FragmentCompletion::Closed);
            finish(request);
        }
        _ => {
            data.state = ScanState::Started;
            reply(ctx, request, completion);
        }
    }
}

/// Report the rows delivered since the last reply.
fn reply(ctx: &mut Ctx<'_>, request: &mut Request, completion: FragmentCompletion) {
    let rows = std::mem::take(&mut request.rows);
    ctx.counters.scan_batches_returned += 1;
    ctx.counters.scan_rows_returned += u64::from(rows);
    info!(request = %request.handle, rows, ?completion, "scan batch complete");
    let conf = ScanFragConf {
        sender_data: request.key.sender_data,
        trans_id: request.key.trans_id,
        completed_rows: rows,
        completion,
    };
    ctx.send(request.sender_ref, Signal::ScanFragConf(conf));
}

fn finish(request: &mut Request) {
    let data = request.node_mut(NodeNo::ROOT).scan_mut();
    data.state = ScanState::Idle;
    data.pending_close = false;
    completion::node_finished(request, NodeNo::ROOT);
}
