//! Registries of live requests keyed by transaction id and sender data.
//!
//! Scan requests and lookup requests are kept in separate maps, so the same
//! key may be live once in each.
//!
//! # Invariants
//!
//! - A key is present at most once per kind; inserting it twice panics.
//! - A request is removed exactly once, from the registry it was put in.

use std::collections::HashMap;

use crate::types::{RequestHandle, RequestKey};

/// Which registry a request lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Lookup,
    Scan,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lookup => write!(f, "lookup"),
            Self::Scan => write!(f, "scan"),
        }
    }
}

/// The pair of request registries.
#[derive(Debug, Default)]
pub struct Registries {
    lookup: HashMap<RequestKey, RequestHandle>,
    scan: HashMap<RequestKey, RequestHandle>,
}

impl Registries {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const fn map(&self, kind: RequestKind) -> &HashMap<RequestKey, RequestHandle> {
        match kind {
            RequestKind::Lookup => &self.lookup,
            RequestKind::Scan => &self.scan,
        }
    }

    const fn map_mut(&mut self, kind: RequestKind) -> &mut HashMap<RequestKey, RequestHandle> {
        match kind {
            RequestKind::Lookup => &mut self.lookup,
            RequestKind::Scan => &mut self.scan,
        }
    }

    /// True if `key` is live in the registry for `kind`.
    #[must_use]
    pub fn contains(&self, kind: RequestKind, key: RequestKey) -> bool {
        self.map(kind).contains_key(&key)
    }

    /// Register a request.
    ///
    /// # Panics
    ///
    /// Panics if the key is already registered for `kind`.
    pub fn register(&mut self, kind: RequestKind, key: RequestKey, handle: RequestHandle) {
        let previous = self.map_mut(kind).insert(key, handle);
        assert!(
            previous.is_none(),
            "duplicate {kind} request {key} (live as {})",
            previous.map_or_else(String::new, |p| p.to_string())
        );
    }

    #[must_use]
    pub fn lookup(&self, kind: RequestKind, key: RequestKey) -> Option<RequestHandle> {
        self.map(kind).get(&key).copied()
    }

    /// Remove a request.
    ///
    /// # Panics
    ///
    /// Panics if the key is not registered for `kind` or maps to another handle.
    pub fn remove(&mut self, kind: RequestKind, key: RequestKey, handle: RequestHandle) {
        let removed = self.map_mut(kind).remove(&key);
        assert_eq!(
            removed,
            Some(handle),
            "{kind} request {key} not registered as {handle}"
        );
    }

    #[must_use]
    pub fn len(&self, kind: RequestKind) -> usize {
        self.map(kind).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty() && self.scan.is_empty()
    }
}
