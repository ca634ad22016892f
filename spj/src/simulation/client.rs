//! Simulated caller of the join pushdown block.
//!
//! The client plays both the transaction coordinator that sends requests
//! and receives confirmations, and the API endpoint that receives result
//! rows. Every query gets its own transaction id, so rows and replies are
//! attributed to the query that caused them.

use std::collections::BTreeMap;

use tracing::debug;

use crate::protocol::{
    Envelope, FragmentCompletion, LookupConf, LookupRef, ScanFragConf, ScanFragRef, ScanNextReq,
    Signal, TransIdAi,
};
use crate::types::{BlockNumber, BlockRef, NodeId, TransId};

/// Node id of the simulated client.
pub const CLIENT_NODE: NodeId = NodeId(60);

/// Identifier of one client query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub u32);

impl QueryId {
    /// Transaction id used by the query.
    #[must_use]
    pub const fn trans_id(self) -> TransId {
        TransId([0x5350_4a00, self.0])
    }

    /// Sender data the query is registered under.
    #[must_use]
    pub const fn sender_data(self) -> u32 {
        0x1000 + self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Lookup,
    Scan,
}

/// How the client drives a scan after each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanPolicy {
    /// Close the scan once this many batches have been confirmed.
    pub close_after_batches: Option<usize>,
    /// Row limit sent with each continue, zero keeps the previous one.
    pub batch_rows: u32,
}

/// A result row delivered to the API endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    /// Result data of the tree node that produced the row.
    pub result_data: u32,
    pub data: Vec<u32>,
}

/// Everything observed for one query.
#[derive(Debug, Clone)]
pub struct ClientQuery {
    pub id: QueryId,
    pub kind: QueryKind,
    /// Block the query was sent to.
    pub spj: BlockRef,
    pub policy: ScanPolicy,
    pub rows: Vec<ResultRow>,
    pub lookup_confs: Vec<LookupConf>,
    pub lookup_refs: Vec<LookupRef>,
    pub scan_confs: Vec<ScanFragConf>,
    pub scan_refs: Vec<ScanFragRef>,
    /// Continue requests sent, closes included.
    pub nexts_sent: usize,
    pub closes_sent: usize,
}

impl ClientQuery {
    /// Replies that end the query: the root outcome of a lookup, the closing
    /// confirmation or a rejection of a scan.
    #[must_use]
    pub fn terminal_outcomes(&self) -> usize {
        let root = self.id.sender_data();
        match self.kind {
            QueryKind::Lookup => {
                self.lookup_confs
                    .iter()
                    .filter(|c| c.client_data == root)
                    .count()
                    + self
                        .lookup_refs
                        .iter()
                        .filter(|r| r.client_data == root)
                        .count()
            }
            QueryKind::Scan => {
                self.scan_confs
                    .iter()
                    .filter(|c| c.completion == FragmentCompletion::Closed)
                    .count()
                    + self.scan_refs.len()
            }
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.terminal_outcomes() > 0
    }

    /// Error code of the root outcome, if it was a rejection.
    #[must_use]
    pub fn root_error(&self) -> Option<u32> {
        let root = self.id.sender_data();
        match self.kind {
            QueryKind::Lookup => self
                .lookup_refs
                .iter()
                .find(|r| r.client_data == root)
                .map(|r| r.error_code),
            QueryKind::Scan => self.scan_refs.first().map(|r| r.error_code),
        }
    }

    /// Rows produced by the tree node with the given result data.
    #[must_use]
    pub fn rows_of(&self, result_data: u32) -> Vec<&ResultRow> {
        self.rows
            .iter()
            .filter(|r| r.result_data == result_data)
            .collect()
    }

    /// Sum of the row counts in every scan confirmation.
    #[must_use]
    pub fn confirmed_rows(&self) -> u32 {
        self.scan_confs.iter().map(|c| c.completed_rows).sum()
    }
}

/// The simulated caller.
#[derive(Debug, Default)]
pub struct SimulatedClient {
    queries: BTreeMap<QueryId, ClientQuery>,
    by_trans: BTreeMap<[u32; 2], QueryId>,
    next_id: u32,
    /// Signals received for no known query.
    pub stray_signals: usize,
}

impl SimulatedClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block that sends requests and receives their replies.
    #[must_use]
    pub const fn coordinator() -> BlockRef {
        BlockRef::new(CLIENT_NODE, BlockNumber::TC)
    }

    /// Endpoint that receives result rows.
    #[must_use]
    pub const fn api() -> BlockRef {
        BlockRef::new(CLIENT_NODE, BlockNumber::API)
    }

    /// Start tracking a new query.
    pub fn open(&mut self, kind: QueryKind, spj: BlockRef, policy: ScanPolicy) -> QueryId {
        self.next_id += 1;
        let id = QueryId(self.next_id);
        let query = ClientQuery {
            id,
            kind,
            spj,
            policy,
            rows: Vec::new(),
            lookup_confs: Vec::new(),
            lookup_refs: Vec::new(),
            scan_confs: Vec::new(),
            scan_refs: Vec::new(),
            nexts_sent: 0,
            closes_sent: 0,
        };
        let _ = self.queries.insert(id, query);
        let _ = self.by_trans.insert(id.trans_id().0, id);
        id
    }

    /// # Panics
    ///
    /// Panics if the query is unknown.
    #[must_use]
    pub fn query(&self, id: QueryId) -> &ClientQuery {
        self.queries
            .get(&id)
            .unwrap_or_else(|| panic!("unknown query {id:?}"))
    }

    pub fn queries(&self) -> impl Iterator<Item = &ClientQuery> {
        self.queries.values()
    }

    /// A close request for scan `id`.
    ///
    /// # Panics
    ///
    /// Panics if the query is unknown.
    pub fn close(&mut self, id: QueryId) -> Envelope {
        let query = self
            .queries
            .get_mut(&id)
            .unwrap_or_else(|| panic!("unknown query {id:?}"));
        query.nexts_sent += 1;
        query.closes_sent += 1;
        let next = ScanNextReq {
            sender_data: id.sender_data(),
            trans_id: id.trans_id(),
            close: true,
            batch_rows: 0,
            batch_bytes: 0,
        };
        Envelope {
            from: Self::coordinator(),
            to: query.spj,
            signal: Signal::ScanNextReq(next),
        }
    }

    /// Record a signal and return the client's reaction to it.
    pub fn receive(&mut self, envelope: Envelope) -> Vec<Envelope> {
        let trans_id = envelope.signal.trans_id();
        let Some(&id) = self.by_trans.get(&trans_id.0) else {
            debug!(signal = %envelope, "signal for unknown query");
            self.stray_signals += 1;
            return Vec::new();
        };
        let Some(query) = self.queries.get_mut(&id) else {
            return Vec::new();
        };
        match envelope.signal {
            Signal::TransIdAi(TransIdAi {
                connect_ptr, data, ..
            }) => {
                query.rows.push(ResultRow {
                    result_data: connect_ptr,
                    data,
                });
                Vec::new()
            }
            Signal::LookupConf(conf) => {
                query.lookup_confs.push(conf);
                Vec::new()
            }
            Signal::LookupRef(reject) => {
                query.lookup_refs.push(reject);
                Vec::new()
            }
            Signal::ScanFragRef(reject) => {
                query.scan_refs.push(reject);
                Vec::new()
            }
            Signal::ScanFragConf(conf) => {
                query.scan_confs.push(conf);
                // Once a close is on its way only the closing reply matters.
                if conf.completion == FragmentCompletion::Closed || query.closes_sent > 0 {
                    return Vec::new();
                }
                let close = conf.completion == FragmentCompletion::Exhausted
                    || query
                        .policy
                        .close_after_batches
                        .is_some_and(|n| query.scan_confs.len() >= n);
                query.nexts_sent += 1;
                if close {
                    query.closes_sent += 1;
                }
                let next = ScanNextReq {
                    sender_data: id.sender_data(),
                    trans_id: id.trans_id(),
                    close,
                    batch_rows: query.policy.batch_rows,
                    batch_bytes: 0,
                };
                vec![Envelope {
                    from: Self::coordinator(),
                    to: query.spj,
                    signal: Signal::ScanNextReq(next),
                }]
            }
            other => panic!("client received {}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spj() -> BlockRef {
        BlockRef::new(NodeId(1), BlockNumber::SPJ)
    }

    fn conf(id: QueryId, completion: FragmentCompletion) -> Envelope {
        Envelope {
            from: spj(),
            to: SimulatedClient::coordinator(),
            signal: Signal::ScanFragConf(ScanFragConf {
                sender_data: id.sender_data(),
                trans_id: id.trans_id(),
                completed_rows: 1,
                completion,
            }),
        }
    }

    #[test]
    fn test_scan_continues_then_closes_when_exhausted() {
        let mut client = SimulatedClient::new();
        let id = client.open(QueryKind::Scan, spj(), ScanPolicy::default());

        let out = client.receive(conf(id, FragmentCompletion::MoreData));
        assert!(matches!(out[0].signal, Signal::ScanNextReq(ScanNextReq { close: false, .. })));
        let out = client.receive(conf(id, FragmentCompletion::Exhausted));
        assert!(matches!(out[0].signal, Signal::ScanNextReq(ScanNextReq { close: true, .. })));
        let out = client.receive(conf(id, FragmentCompletion::Closed));
        assert!(out.is_empty());

        let query = client.query(id);
        assert_eq!(query.terminal_outcomes(), 1);
        assert_eq!(query.confirmed_rows(), 3);
        assert_eq!(query.nexts_sent, 2);
    }

    #[test]
    fn test_close_after_batches() {
        let mut client = SimulatedClient::new();
        let policy = ScanPolicy {
            close_after_batches: Some(1),
            batch_rows: 0,
        };
        let id = client.open(QueryKind::Scan, spj(), policy);
        let out = client.receive(conf(id, FragmentCompletion::MoreData));
        assert!(matches!(out[0].signal, Signal::ScanNextReq(ScanNextReq { close: true, .. })));
    }

    #[test]
    fn test_lookup_root_outcome() {
        let mut client = SimulatedClient::new();
        let id = client.open(QueryKind::Lookup, spj(), ScanPolicy::default());
        let child = LookupRef {
            client_data: 3,
            trans_id: id.trans_id(),
            error_code: 626,
        };
        let _ = client.receive(Envelope {
            from: spj(),
            to: SimulatedClient::coordinator(),
            signal: Signal::LookupRef(child),
        });
        assert_eq!(client.query(id).terminal_outcomes(), 0);

        let root = LookupConf {
            client_data: id.sender_data(),
            trans_id: id.trans_id(),
        };
        let _ = client.receive(Envelope {
            from: spj(),
            to: SimulatedClient::coordinator(),
            signal: Signal::LookupConf(root),
        });
        assert_eq!(client.query(id).terminal_outcomes(), 1);
        assert_eq!(client.query(id).root_error(), None);
    }

    #[test]
    fn test_unknown_transaction_is_stray() {
        let mut client = SimulatedClient::new();
        let out = client.receive(conf(QueryId(9), FragmentCompletion::Closed));
        assert!(out.is_empty());
        assert_eq!(client.stray_signals, 1);
    }
}
