//! Ownership of in-flight requests.
//!
//! - [`Arena`]: per-request word arena, released in one step.
//! - [`RequestStore`]: generational slab holding every live request.
//! - [`Registries`]: scan and lookup registries keyed by
//!   `(transaction id, sender data)`.
//!
//! # Invariants
//!
//! - A slot's generation changes every time its request is removed, so a
//!   [`RequestHandle`] kept past teardown is detected (and panics) instead of
//!   addressing whatever request reuses the slot.
//! - `arenas_allocated - arenas_released` equals the number of arenas
//!   currently owned by requests or by a build in progress.

mod arena;
mod registry;

pub use arena::{Arena, ArenaId, ArenaRelease, BUFFER_OVERHEAD_WORDS, BufferId};
pub use registry::{Registries, RequestKind};

use crate::error::SpjError;
use crate::types::RequestHandle;

#[derive(Debug)]
struct Slot<R> {
    generation: u8,
    value: Option<R>,
}

/// Allocation counters of a [`RequestStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub arenas_allocated: u64,
    pub arenas_released: u64,
    pub peak_live_requests: usize,
}

/// Generational slab of live requests plus the arena pool.
#[derive(Debug)]
pub struct RequestStore<R> {
    slots: Vec<Slot<R>>,
    free: Vec<u16>,
    capacity: usize,
    arena_words: usize,
    next_arena: u32,
    live: usize,
    stats: StoreStats,
}

impl<R> RequestStore<R> {
    /// Create a store for up to `capacity` live requests, each with an
    /// arena of `arena_words` words.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` does not fit the 16-bit slot of a handle.
    #[must_use]
    pub fn new(capacity: usize, arena_words: usize) -> Self {
        assert!(
            capacity <= usize::from(u16::MAX) + 1,
            "request capacity {capacity} exceeds handle range"
        );
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            arena_words,
            next_arena: 0,
            live: 0,
            stats: StoreStats::default(),
        }
    }

    /// Hand out a fresh arena.
    fn allocate_arena(&mut self) -> Arena {
        let id = ArenaId(self.next_arena);
        self.next_arena = self.next_arena.wrapping_add(1);
        self.stats.arenas_allocated += 1;
        Arena::new(id, self.arena_words)
    }

    /// Take back an arena, exactly once.
    pub fn release_arena(&mut self, arena: Arena) -> ArenaRelease {
        self.stats.arenas_released += 1;
        arena.release()
    }

    /// Create a request: `make` receives the handle the request will be
    /// known by and a fresh arena for it to own.
    ///
    /// # Errors
    ///
    /// `OutOfOperations` when `capacity` requests are already live. No arena
    /// is allocated and `make` is not called in that case.
    pub fn insert(
        &mut self,
        make: impl FnOnce(RequestHandle, Arena) -> R,
    ) -> Result<RequestHandle, SpjError> {
        if self.live >= self.capacity {
            return Err(SpjError::OutOfOperations);
        }
        let slot = if let Some(slot) = self.free.pop() {
            slot
        } else {
            let slot = u16::try_from(self.slots.len()).map_err(|_| SpjError::OutOfOperations)?;
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
            slot
        };
        let arena = self.allocate_arena();
        let entry = &mut self.slots[usize::from(slot)];
        let handle = RequestHandle {
            slot,
            generation: entry.generation,
        };
        entry.value = Some(make(handle, arena));
        self.live += 1;
        self.stats.peak_live_requests = self.stats.peak_live_requests.max(self.live);
        Ok(handle)
    }

    /// True if `handle` addresses a live request.
    #[must_use]
    pub fn contains(&self, handle: RequestHandle) -> bool {
        self.slots
            .get(usize::from(handle.slot))
            .is_some_and(|s| s.generation == handle.generation && s.value.is_some())
    }

    /// Borrow a live request.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale or was never issued.
    #[must_use]
    pub fn get(&self, handle: RequestHandle) -> &R {
        self.slots
            .get(usize::from(handle.slot))
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_ref())
            .unwrap_or_else(|| panic!("stale request handle {handle}"))
    }

    /// Mutably borrow a live request.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale or was never issued.
    pub fn get_mut(&mut self, handle: RequestHandle) -> &mut R {
        self.slots
            .get_mut(usize::from(handle.slot))
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_mut())
            .unwrap_or_else(|| panic!("stale request handle {handle}"))
    }

    /// Remove a live request, retiring its handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale or was never issued.
    pub fn remove(&mut self, handle: RequestHandle) -> R {
        let entry = self
            .slots
            .get_mut(usize::from(handle.slot))
            .filter(|s| s.generation == handle.generation)
            .unwrap_or_else(|| panic!("stale request handle {handle}"));
        let value = entry
            .value
            .take()
            .unwrap_or_else(|| panic!("request {handle} removed twice"));
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.live -= 1;
        value
    }

    /// Number of live requests.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[must_use]
    pub const fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Iterate over live requests.
    pub fn iter(&self) -> impl Iterator<Item = (RequestHandle, &R)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            let slot = u16::try_from(i).ok()?;
            s.value.as_ref().map(|r| {
                (
                    RequestHandle {
                        slot,
                        generation: s.generation,
                    },
                    r,
                )
            })
        })
    }
}
