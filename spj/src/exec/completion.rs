//! Node completion and request teardown.
//!
//! # Design
//!
//! A node that has nothing outstanding calls [`node_finished`], which only
//! updates counts. The block checks after every signal whether the request
//! has any active node left and, if not, tears it down with [`cleanup`].
//! Teardown therefore never runs while a handler still holds the request.
//!
//! # Invariants
//!
//! - Teardown runs exactly once per request: it removes the request from the
//!   store by value, which retires its handle.
//! - Teardown order: free every node's buffers, leave the registry, release
//!   the arena. The arena goes last and must then own no live buffer.

use tracing::info;

use crate::store::{Registries, RequestStore};
use crate::types::{NodeNo, RequestHandle};

use super::counters::BlockCounters;
use super::request::{NodeState, Request};

/// Mark node `no` as having nothing outstanding.
///
/// # Panics
///
/// Panics if the node was not active.
pub fn node_finished(request: &mut Request, no: NodeNo) {
    let node = request.node_mut(no);
    assert_eq!(
        node.state,
        NodeState::Active,
        "node {no} finished while not active"
    );
    node.state = NodeState::Inactive;
    request.active_nodes = request
        .active_nodes
        .checked_sub(1)
        .unwrap_or_else(|| panic!("request {} active node count underflow", request.handle));
}

/// Tear the request down if it has no active node left.
pub fn finish_if_idle(
    store: &mut RequestStore<Request>,
    registries: &mut Registries,
    counters: &mut BlockCounters,
    handle: RequestHandle,
) {
    if store.get(handle).active_nodes == 0 {
        cleanup(store, registries, counters, handle);
    }
}

/// Tear down a request with no active node.
///
/// # Panics
///
/// Panics if a node is still active, if the request is registered under
/// another handle, or if a buffer outlived its node.
pub fn cleanup(
    store: &mut RequestStore<Request>,
    registries: &mut Registries,
    counters: &mut BlockCounters,
    handle: RequestHandle,
) {
    let mut request = store.remove(handle);
    assert_eq!(
        request.active_nodes, 0,
        "request {handle} torn down with active nodes"
    );
    let summary = request.to_string();
    let nodes = std::mem::take(&mut request.nodes);
    for node in &nodes {
        assert_eq!(node.state, NodeState::Inactive, "node {} still active", node.no);
        for buffer in node.buffers() {
            request.arena.free(buffer);
        }
    }
    if request.registered {
        registries.remove(request.kind, request.key, handle);
    }
    let release = store.release_arena(request.arena);
    assert_eq!(
        release.live_buffers, 0,
        "request {handle} left buffers in {}",
        release.id
    );
    counters.requests_completed += 1;
    info!(request = %summary, peak_words = release.peak_words, "request complete");
}

/// Drop a request whose build failed.
pub fn discard(store: &mut RequestStore<Request>, handle: RequestHandle) {
    let request = store.remove(handle);
    let _ = store.release_arena(request.arena);
}
