//! Per-request memory arena.
//!
//! Every buffer a request owns (compiled patterns, fixed key and attribute
//! sections, dependency lists) lives in that request's arena, and every
//! tree node is charged against its budget. Releasing the arena frees all
//! of it at once.
//!
//! # Design
//!
//! Buffers are addressed by [`BufferId`], which carries the id of the arena
//! that issued it. Using a buffer id with the wrong arena, or after the
//! buffer was taken, panics instead of reading unrelated memory.
//!
//! # Invariants
//!
//! - `used <= budget` at all times.
//! - `used` equals the sum of charged node words plus, for every live
//!   buffer, its length plus one word of bookkeeping.
//! - An arena is released by value, so it can be released only once.

use std::fmt;

use crate::error::SpjError;

/// Words charged per buffer on top of its contents.
pub const BUFFER_OVERHEAD_WORDS: usize = 1;

/// Identity of one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaId(pub u32);

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena{}", self.0)
    }
}

/// Handle of a buffer inside an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    arena: ArenaId,
    index: u32,
}

impl BufferId {
    #[must_use]
    pub const fn arena(self) -> ArenaId {
        self.arena
    }
}

/// Summary returned when an arena is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRelease {
    pub id: ArenaId,
    /// Highest number of words in use at any time.
    pub peak_words: usize,
    /// Buffers still live at release time.
    pub live_buffers: usize,
}

/// A bump-style word arena with a hard budget.
#[derive(Debug)]
pub struct Arena {
    id: ArenaId,
    budget: usize,
    used: usize,
    peak: usize,
    buffers: Vec<Option<Vec<u32>>>,
}

impl Arena {
    #[must_use]
    pub const fn new(id: ArenaId, budget: usize) -> Self {
        Self {
            id,
            budget,
            used: 0,
            peak: 0,
            buffers: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ArenaId {
        self.id
    }

    #[must_use]
    pub const fn used_words(&self) -> usize {
        self.used
    }

    #[must_use]
    pub const fn budget_words(&self) -> usize {
        self.budget
    }

    /// Reserve `words` of the budget for a non-buffer allocation.
    ///
    /// # Errors
    ///
    /// `OutOfQueryMemory` if the budget would be exceeded.
    pub fn charge(&mut self, words: usize) -> Result<(), SpjError> {
        let used = self
            .used
            .checked_add(words)
            .filter(|&u| u <= self.budget)
            .ok_or(SpjError::OutOfQueryMemory)?;
        self.used = used;
        self.peak = self.peak.max(used);
        Ok(())
    }

    /// Store `words` as a new buffer.
    ///
    /// # Errors
    ///
    /// `OutOfQueryMemory` if the budget would be exceeded.
    pub fn alloc(&mut self, words: Vec<u32>) -> Result<BufferId, SpjError> {
        self.charge(words.len() + BUFFER_OVERHEAD_WORDS)?;
        let index = u32::try_from(self.buffers.len()).map_err(|_| SpjError::OutOfQueryMemory)?;
        self.buffers.push(Some(words));
        Ok(BufferId {
            arena: self.id,
            index,
        })
    }

    /// Grow a live buffer by one word.
    ///
    /// # Errors
    ///
    /// `OutOfQueryMemory` if the budget would be exceeded.
    ///
    /// # Panics
    ///
    /// Panics if the buffer belongs to another arena or was already taken.
    pub fn append(&mut self, id: BufferId, word: u32) -> Result<(), SpjError> {
        let arena = self.id;
        assert!(
            self.slot(id).is_some(),
            "{arena} buffer {} used after release",
            id.index
        );
        self.charge(1)?;
        if let Some(words) = self.slot_mut(id) {
            words.push(word);
        }
        Ok(())
    }

    /// Read a buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer belongs to another arena or was already taken.
    #[must_use]
    pub fn get(&self, id: BufferId) -> &[u32] {
        self.slot(id)
            .as_deref()
            .unwrap_or_else(|| panic!("{} buffer {} used after release", self.id, id.index))
    }

    /// Copy a buffer out, leaving it in place.
    #[must_use]
    pub fn duplicate(&self, id: BufferId) -> Vec<u32> {
        self.get(id).to_vec()
    }

    /// Move a buffer out of the arena, crediting its words back.
    ///
    /// # Panics
    ///
    /// Panics if the buffer belongs to another arena or was already taken.
    pub fn take(&mut self, id: BufferId) -> Vec<u32> {
        let arena = self.id;
        let words = self.slot_mut(id).take().unwrap_or_else(|| {
            panic!("{arena} buffer {} taken twice", id.index);
        });
        self.used -= words.len() + BUFFER_OVERHEAD_WORDS;
        words
    }

    /// Drop a buffer.
    pub fn free(&mut self, id: BufferId) {
        let _ = self.take(id);
    }

    /// True if `id` was issued by this arena and is still live.
    #[must_use]
    pub fn owns(&self, id: BufferId) -> bool {
        id.arena == self.id
            && self
                .buffers
                .get(id.index as usize)
                .is_some_and(Option::is_some)
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    /// Release the arena and everything still in it.
    #[must_use]
    pub fn release(self) -> ArenaRelease {
        ArenaRelease {
            id: self.id,
            peak_words: self.peak,
            live_buffers: self.live_buffers(),
        }
    }

    fn slot(&self, id: BufferId) -> &Option<Vec<u32>> {
        assert_eq!(
            id.arena, self.id,
            "buffer of {} used with {}",
            id.arena, self.id
        );
        &self.buffers[id.index as usize]
    }

    fn slot_mut(&mut self, id: BufferId) -> &mut Option<Vec<u32>> {
        assert_eq!(
            id.arena, self.id,
            "buffer of {} used with {}",
            id.arena, self.id
        );
        &mut self.buffers[id.index as usize]
    }
}
