//! Address-ordered free list with next-fit search and coalescing.
//!
//! The original circular intrusive list is represented as an explicit
//! ordered table from block address to block extent in units. Keeping the
//! table sorted by address makes the adjacency test for coalescing a pair of
//! neighbor lookups, and a roaming cursor preserves next-fit locality: each
//! search resumes near the last allocation or release instead of always
//! rescanning from the lowest address.

use std::collections::BTreeMap;

use crate::UNIT_SIZE;

#[derive(Debug, Default)]
pub struct FreeList {
    /// Block start address to extent in units, ordered by address.
    blocks: BTreeMap<usize, usize>,
    /// Next-fit search position. Parks at the most recently split or
    /// released block.
    cursor: usize,
}

impl FreeList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Searches for the first block of at least `units`, starting at the
    /// cursor and wrapping around once. An exact fit is unlinked whole; a
    /// larger block is shrunk in place and the tail of exactly `units` is
    /// carved off and returned. `None` leaves the list untouched.
    pub fn acquire(&mut self, units: usize) -> Option<usize> {
        debug_assert!(units > 0);

        let found = self
            .blocks
            .range(self.cursor..)
            .chain(self.blocks.range(..self.cursor))
            .find(|&(_, &have)| have >= units)
            .map(|(&addr, &have)| (addr, have));

        let (addr, have) = found?;

        if have == units {
            self.blocks.remove(&addr);
            self.cursor = addr;
            return Some(addr);
        }

        // Shrink the head, hand out the tail.
        let remaining = have - units;
        *self.blocks.get_mut(&addr).expect("block just found") = remaining;
        self.cursor = addr;
        Some(addr + remaining * UNIT_SIZE)
    }

    /// Returns a block to the list, merging it with an address-contiguous
    /// successor and/or predecessor so that no two adjacent free blocks
    /// remain unmerged.
    pub fn release(&mut self, addr: usize, units: usize) {
        debug_assert!(units > 0);
        debug_assert!(
            !self.blocks.contains_key(&addr),
            "block released twice: {addr:#x}"
        );

        let mut units = units;

        // Absorb a directly following block.
        if let Some((&next, &next_units)) = self.blocks.range(addr + 1..).next()
            && addr + units * UNIT_SIZE == next
        {
            self.blocks.remove(&next);
            units += next_units;
        }

        // Fold into a directly preceding block.
        if let Some((&prev, &prev_units)) = self.blocks.range(..addr).next_back()
            && prev + prev_units * UNIT_SIZE == addr
        {
            *self.blocks.get_mut(&prev).expect("predecessor just found") =
                prev_units + units;
            self.cursor = prev;
            return;
        }

        self.blocks.insert(addr, units);
        self.cursor = addr;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total free capacity in units, headers included.
    #[must_use]
    pub fn total_units(&self) -> usize {
        self.blocks.values().sum()
    }

    /// Largest single block in units.
    #[must_use]
    pub fn largest_units(&self) -> usize {
        self.blocks.values().copied().max().unwrap_or(0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Synthetic addresses: the free list never dereferences them, so tests
    // can hand it an imaginary address space.
    const BASE: usize = 0x10_0000;

    fn unit_addr(offset_units: usize) -> usize {
        BASE + offset_units * UNIT_SIZE
    }

    #[test]
    fn acquire_from_empty_list_fails_cleanly() {
        let mut list = FreeList::new();
        assert_eq!(list.acquire(1), None);
        assert_eq!(list.total_units(), 0);
    }

    #[test]
    fn exact_fit_unlinks_the_whole_block() {
        let mut list = FreeList::new();
        list.release(unit_addr(0), 8);

        assert_eq!(list.acquire(8), Some(unit_addr(0)));
        assert!(list.is_empty(), "exact fit must leave nothing behind");
    }

    #[test]
    fn split_carves_the_tail_and_shrinks_the_head() {
        let mut list = FreeList::new();
        list.release(unit_addr(0), 10);

        let got = list.acquire(4).expect("10 units can satisfy 4");
        assert_eq!(got, unit_addr(6), "tail of the block is handed out");
        assert_eq!(list.total_units(), 6, "head keeps the remainder");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn too_large_request_leaves_state_untouched() {
        let mut list = FreeList::new();
        list.release(unit_addr(0), 4);
        list.release(unit_addr(16), 6);

        assert_eq!(list.acquire(7), None);
        assert_eq!(list.len(), 2);
        assert_eq!(list.total_units(), 10);
    }

    #[test]
    fn release_merges_with_successor() {
        let mut list = FreeList::new();
        list.release(unit_addr(4), 6);
        list.release(unit_addr(0), 4);

        assert_eq!(list.len(), 1, "contiguous blocks must coalesce");
        assert_eq!(list.total_units(), 10);
        assert_eq!(list.acquire(10), Some(unit_addr(0)));
    }

    #[test]
    fn release_merges_into_predecessor() {
        let mut list = FreeList::new();
        list.release(unit_addr(0), 4);
        list.release(unit_addr(4), 6);

        assert_eq!(list.len(), 1);
        assert_eq!(list.acquire(10), Some(unit_addr(0)));
    }

    #[test]
    fn release_bridges_two_neighbors_into_one() {
        let mut list = FreeList::new();
        list.release(unit_addr(0), 2);
        list.release(unit_addr(6), 2);
        assert_eq!(list.len(), 2);

        // The gap exactly fits between both blocks.
        list.release(unit_addr(2), 4);
        assert_eq!(list.len(), 1, "both neighbors absorbed in one release");
        assert_eq!(list.total_units(), 8);
    }

    #[test]
    fn disjoint_blocks_stay_separate() {
        let mut list = FreeList::new();
        list.release(unit_addr(0), 2);
        list.release(unit_addr(8), 2);

        assert_eq!(list.len(), 2, "a hole must prevent merging");
        assert_eq!(list.total_units(), 4);
    }

    #[test]
    fn next_fit_resumes_after_the_last_split() {
        let mut list = FreeList::new();
        list.release(unit_addr(0), 4);
        list.release(unit_addr(100), 4);

        // The cursor parked at the last release, so the high block is split
        // first even though the low block would also fit.
        assert_eq!(list.acquire(2), Some(unit_addr(102)));
        // Its remainder is an exact fit for the next request.
        assert_eq!(list.acquire(2), Some(unit_addr(100)));
        // High block exhausted, the search wraps to the low one.
        assert_eq!(list.acquire(3), Some(unit_addr(1)));
    }

    #[test]
    fn capacity_is_conserved_across_acquire_release_cycles() {
        let mut list = FreeList::new();
        list.release(unit_addr(0), 64);

        let a = list.acquire(5).unwrap();
        let b = list.acquire(9).unwrap();
        let c = list.acquire(3).unwrap();
        assert_eq!(list.total_units(), 64 - 17);

        list.release(b, 9);
        list.release(a, 5);
        list.release(c, 3);
        assert_eq!(list.total_units(), 64, "no units may leak");
        assert_eq!(list.len(), 1, "everything coalesces back into one block");
    }
}
