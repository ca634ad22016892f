//! The join pushdown block.
//!
//! [`Spj`] receives lookup and scan requests that carry a serialized query
//! tree, runs the tree by issuing sub-requests to the storage layer, and
//! routes rows and completions back to the original caller.
//!
//! # Design
//!
//! The block is a plain state machine: [`Spj::receive`] handles exactly one
//! signal and queues whatever it sends in an outbox, which the owner drains
//! with [`Spj::drain_outbox`]. It never blocks and never owns a transport,
//! so the same code runs under the tokio host and the deterministic
//! simulator.
//!
//! Replies from the storage layer are addressed to a tree node through a
//! [`NodePtr`] word carried in the sub-request. The pointer includes the
//! request's slot generation, so a reply for a request that is already gone
//! is detected.
//!
//! # Invariants
//!
//! - After every signal, a request with no active node has been torn down.
//! - Every live request is registered under its `(transaction, sender data)`
//!   key, in the registry of its kind.
//! - Every request the block accepted gets exactly one terminal reply; every
//!   request it refused gets exactly one rejection.

mod builder;
mod completion;
mod counters;
mod lookup;
mod request;
mod scan_frag;

pub use builder::{MAX_NODE_WORDS, MAX_PARAM_WORDS, MAX_PARENTS};
pub use counters::BlockCounters;
pub use request::{NODE_WORDS, NodeState, ScanState};

use tracing::{debug, info, warn};

use crate::config::BlockConfig;
use crate::distribution::Distribution;
use crate::error::SpjError;
use crate::pattern::{RowHeader, RowRef};
use crate::protocol::{
    Envelope, LookupRef, LookupReq, OperationKind, ScanFragRef, ScanFragReq, ScanNextReq, Signal,
    TransIdAi,
};
use crate::store::{Registries, RequestKind, RequestStore, StoreStats};
use crate::types::{BlockNumber, BlockRef, NodeNo, NodePtr, RequestKey, TransId};

use builder::{BuildContext, Root};
use request::Request;

/// What a handler may touch besides the request it works on.
struct Ctx<'a> {
    own_ref: BlockRef,
    outbox: &'a mut Vec<Envelope>,
    distribution: &'a dyn Distribution,
    counters: &'a mut BlockCounters,
}

impl Ctx<'_> {
    fn send(&mut self, to: BlockRef, signal: Signal) {
        self.outbox.push(Envelope {
            from: self.own_ref,
            to,
            signal,
        });
    }
}

/// One instance of the join pushdown block.
#[derive(Debug)]
pub struct Spj<D> {
    config: BlockConfig,
    own_ref: BlockRef,
    distribution: D,
    store: RequestStore<Request>,
    registries: Registries,
    outbox: Vec<Envelope>,
    counters: BlockCounters,
}

impl<D: Distribution> Spj<D> {
    #[must_use]
    pub fn new(config: BlockConfig, distribution: D) -> Self {
        info!(
            node = %config.node_id,
            max_requests = config.max_requests,
            arena_words = config.arena_words,
            "starting join pushdown block"
        );
        Self {
            own_ref: BlockRef::new(config.node_id, BlockNumber::SPJ),
            store: RequestStore::new(config.max_requests, config.arena_words),
            registries: Registries::new(),
            outbox: Vec::new(),
            counters: BlockCounters::default(),
            config,
            distribution,
        }
    }

    /// Address of this block.
    #[must_use]
    pub const fn reference(&self) -> BlockRef {
        self.own_ref
    }

    #[must_use]
    pub const fn config(&self) -> &BlockConfig {
        &self.config
    }

    #[must_use]
    pub const fn counters(&self) -> &BlockCounters {
        &self.counters
    }

    #[must_use]
    pub const fn live_requests(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub const fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    #[must_use]
    pub const fn registries(&self) -> &Registries {
        &self.registries
    }

    /// True when no request is live.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.store.is_empty() && self.registries.is_empty()
    }

    /// Take every signal queued since the last call.
    pub fn drain_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    /// Handle one signal.
    ///
    /// # Panics
    ///
    /// Panics on protocol violations: a signal addressed to another block, a
    /// reply for a request or node that is not waiting for it, or a
    /// continuation for an unknown scan.
    pub fn receive(&mut self, envelope: Envelope) {
        assert_eq!(
            envelope.to, self.own_ref,
            "signal {envelope} delivered to {}",
            self.own_ref
        );
        debug!(signal = %envelope, "received");
        let from = envelope.from;
        match envelope.signal {
            Signal::LookupReq(req) => self.exec_lookup_req(&req),
            Signal::ScanFragReq(req) => self.exec_scan_frag_req(from, &req),
            Signal::ScanNextReq(req) => self.exec_scan_next_req(&req),
            Signal::TransIdAi(ai) => self.exec_transid_ai(&ai),
            Signal::LookupConf(conf) => {
                let kind = Some(OperationKind::Lookup);
                self.with_node(conf.client_data, conf.trans_id, kind, |ctx, request, no| {
                    lookup::exec_conf(ctx, request, no);
                });
            }
            Signal::LookupRef(reject) => {
                let kind = Some(OperationKind::Lookup);
                self.with_node(reject.client_data, reject.trans_id, kind, |ctx, request, no| {
                    lookup::exec_ref(ctx, request, no, reject.error_code);
                });
            }
            Signal::ScanFragConf(conf) => {
                let kind = Some(OperationKind::ScanFrag);
                self.with_node(conf.sender_data, conf.trans_id, kind, |ctx, request, _| {
                    scan_frag::exec_conf(ctx, request, &conf);
                });
            }
            Signal::ScanFragRef(reject) => {
                let kind = Some(OperationKind::ScanFrag);
                self.with_node(reject.sender_data, reject.trans_id, kind, |ctx, request, _| {
                    scan_frag::exec_ref(ctx, request, &reject);
                });
            }
        }
    }

    /// Log every live request and its nodes.
    pub fn dump_state(&self) {
        info!(
            block = %self.own_ref,
            live = self.store.len(),
            counters = %self.counters,
            "block state"
        );
        for (handle, request) in self.store.iter() {
            info!(%handle, %request, rows = request.rows, "live request");
            for node in &request.nodes {
                info!(
                    %handle,
                    node = %node.no,
                    kind = ?node.kind,
                    state = ?node.state,
                    leaf = node.is_leaf(),
                    "  tree node"
                );
            }
        }
    }

    fn split(&mut self) -> (&mut RequestStore<Request>, &mut Registries, Ctx<'_>) {
        (
            &mut self.store,
            &mut self.registries,
            Ctx {
                own_ref: self.own_ref,
                outbox: &mut self.outbox,
                distribution: &self.distribution,
                counters: &mut self.counters,
            },
        )
    }

    fn send(&mut self, to: BlockRef, signal: Signal) {
        self.outbox.push(Envelope {
            from: self.own_ref,
            to,
            signal,
        });
    }

    fn exec_lookup_req(&mut self, req: &LookupReq) {
        self.counters.lookups_received += 1;
        let key = RequestKey {
            trans_id: req.trans_id,
            sender_data: req.client_data,
        };
        let result = self.start_request(
            RequestKind::Lookup,
            key,
            req.client_ref,
            req.result_ref,
            Root::Lookup(req),
        );
        if let Err(err) = result {
            if err.is_build_error() {
                self.counters.builds_rejected += 1;
            }
            warn!(%key, %err, "lookup request rejected");
            let reply = LookupRef {
                client_data: req.client_data,
                trans_id: req.trans_id,
                error_code: err.code(),
            };
            self.send(req.client_ref, Signal::LookupRef(reply));
        }
    }

    fn exec_scan_frag_req(&mut self, from: BlockRef, req: &ScanFragReq) {
        if req.flags.range_scan {
            self.counters.range_scans_received += 1;
        } else {
            self.counters.table_scans_received += 1;
        }
        let key = RequestKey {
            trans_id: req.trans_id,
            sender_data: req.sender_data,
        };
        let result = self.start_request(
            RequestKind::Scan,
            key,
            from,
            req.result_ref,
            Root::Scan(req),
        );
        if let Err(err) = result {
            if err.is_build_error() {
                self.counters.builds_rejected += 1;
            }
            warn!(%key, %err, "scan request rejected");
            let reply = ScanFragRef {
                sender_data: req.sender_data,
                trans_id: req.trans_id,
                error_code: err.code(),
            };
            self.send(from, Signal::ScanFragRef(reply));
        }
    }

    /// Build, register and start a request.
    ///
    /// # Errors
    ///
    /// Any error that prevented the request from starting. Nothing of the
    /// request is left behind in that case.
    ///
    /// # Panics
    ///
    /// Panics if the key is already live in the registry of `kind`.
    fn start_request(
        &mut self,
        kind: RequestKind,
        key: RequestKey,
        sender_ref: BlockRef,
        result_ref: BlockRef,
        root: Root<'_>,
    ) -> Result<(), SpjError> {
        let cx = BuildContext {
            own_ref: self.own_ref,
            scan_priority: self.config.scan_priority,
        };
        let handle = self.store.insert(|handle, arena| {
            Request::new(handle, key, kind, sender_ref, result_ref, arena)
        })?;
        if let Err(err) = builder::build(self.store.get_mut(handle), root, &cx) {
            completion::discard(&mut self.store, handle);
            return Err(err);
        }
        self.registries.register(kind, key, handle);

        let (store, registries, mut ctx) = self.split();
        let request = store.get_mut(handle);
        request.registered = true;
        info!(%request, "request started");
        match request.node(NodeNo::ROOT).kind {
            OperationKind::Lookup => lookup::start(&mut ctx, request),
            OperationKind::ScanFrag => scan_frag::start(&mut ctx, request),
        }
        completion::finish_if_idle(store, registries, ctx.counters, handle);
        Ok(())
    }

    fn exec_scan_next_req(&mut self, req: &ScanNextReq) {
        let key = RequestKey {
            trans_id: req.trans_id,
            sender_data: req.sender_data,
        };
        let Some(handle) = self.registries.lookup(RequestKind::Scan, key) else {
            assert!(req.close, "next batch requested for unknown scan {key}");
            debug!(%key, "close for unknown scan ignored");
            return;
        };
        let (store, registries, mut ctx) = self.split();
        scan_frag::exec_next(&mut ctx, store.get_mut(handle), req);
        completion::finish_if_idle(store, registries, ctx.counters, handle);
    }

    fn exec_transid_ai(&mut self, ai: &TransIdAi) {
        let ptr = NodePtr::from_word(ai.connect_ptr);
        let header = RowHeader::build(&ai.data)
            .unwrap_or_else(|err| panic!("malformed row for {ptr}: {err}"));
        let row = RowRef::new(&header, &ai.data);
        let correlation = row
            .correlation()
            .unwrap_or_else(|| panic!("row for {ptr} without correlation id"));
        self.with_node(ai.connect_ptr, ai.trans_id, None, |ctx, request, no| {
            match request.node(no).kind {
                OperationKind::Lookup => {
                    lookup::exec_transid_ai(ctx, request, no, &row, correlation);
                }
                OperationKind::ScanFrag => {
                    scan_frag::exec_transid_ai(ctx, request, &row, correlation);
                }
            }
        });
    }

    /// Run `handler` on the node a reply is addressed to, then finish the
    /// batch or the request if that reply completed it.
    fn with_node(
        &mut self,
        ptr: u32,
        trans_id: TransId,
        kind: Option<OperationKind>,
        handler: impl FnOnce(&mut Ctx<'_>, &mut Request, NodeNo),
    ) {
        let ptr = NodePtr::from_word(ptr);
        let handle = ptr.request;
        let (store, registries, mut ctx) = self.split();
        let request = store.get_mut(handle);
        assert_eq!(
            request.key.trans_id, trans_id,
            "reply for {ptr} from another transaction"
        );
        if let Some(kind) = kind {
            let actual = request.node(ptr.node).kind;
            assert_eq!(actual, kind, "reply for {ptr} does not match its {actual:?} node");
        }
        handler(&mut ctx, request, ptr.node);
        if request.is_scan() {
            scan_frag::check_batch_complete(&mut ctx, request);
        }
        completion::finish_if_idle(store, registries, ctx.counters, handle);
    }
}
