//! Registry of all currently live blocks.
//!
//! Blocks are kept in an explicit table keyed by header address, so the
//! scanners resolve a candidate word with one ordered range lookup instead
//! of walking a tagged linked list. The table and the free list together
//! partition every unit ever obtained from the OS.

use std::collections::BTreeMap;

use crate::UNIT_SIZE;

#[derive(Debug, Default)]
pub struct UsedRegistry {
    /// Header address to extent in units, ordered by address.
    blocks: BTreeMap<usize, usize>,
}

impl UsedRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: usize, units: usize) {
        debug_assert!(units > 0);
        let previous = self.blocks.insert(addr, units);
        debug_assert!(previous.is_none(), "block registered twice: {addr:#x}");
    }

    pub fn remove(&mut self, addr: usize) -> Option<usize> {
        self.blocks.remove(&addr)
    }

    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.blocks.contains_key(&addr)
    }

    #[must_use]
    pub fn units_of(&self, addr: usize) -> Option<usize> {
        self.blocks.get(&addr).copied()
    }

    /// Resolves a candidate word to the block whose usable extent strictly
    /// contains it. The header unit itself does not count as part of the
    /// extent, so a pointer to a header never matches.
    #[must_use]
    pub fn block_containing(&self, candidate: usize) -> Option<usize> {
        let (&addr, &units) = self.blocks.range(..=candidate).next_back()?;
        let body = addr + UNIT_SIZE;
        let stop = addr + units * UNIT_SIZE;
        (candidate >= body && candidate < stop).then_some(addr)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn total_units(&self) -> usize {
        self.blocks.values().sum()
    }

    /// Snapshot of all registered header addresses, in address order. The
    /// sweep walks this while removing entries from the live table.
    #[must_use]
    pub fn addresses(&self) -> Vec<usize> {
        self.blocks.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.blocks.iter().map(|(&addr, &units)| (addr, units))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
