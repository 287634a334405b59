//! Per-block metadata and allocation-unit arithmetic.
//!
//! Every region handed out by the collector is preceded by a [`BlockHeader`]
//! occupying exactly one allocation unit. A block's `size` counts units and
//! includes the header unit itself, so the usable extent is the half-open
//! byte range `[addr + UNIT_SIZE, addr + size * UNIT_SIZE)`.

use bitflags::bitflags;

/// One allocation unit. All block sizes are multiples of this.
pub const UNIT_SIZE: usize = std::mem::size_of::<BlockHeader>();

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        /// Reachability tag, meaningful only between the start of marking
        /// and the end of the sweep in the same cycle.
        const MARK = 1 << 0;
    }
}

/// Metadata written immediately before a usable region.
///
/// The mark is a dedicated flag bit here rather than a bit borrowed from a
/// link pointer, so no address ever needs masking before use.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct BlockHeader {
    /// Extent of the block in units, header included. Never zero.
    pub size: usize,
    pub flags: BlockFlags,
}

impl BlockHeader {
    #[must_use]
    pub fn new(units: usize) -> Self {
        assert!(units > 0, "a block always spans at least its header");
        Self {
            size: units,
            flags: BlockFlags::empty(),
        }
    }

    /// Units needed to satisfy a request of `bytes`, header included.
    #[inline]
    #[must_use]
    pub fn units_for(bytes: usize) -> usize {
        bytes.div_ceil(UNIT_SIZE) + 1
    }

    /// Writes a fresh, unmarked header at `addr`.
    ///
    /// # Safety
    /// `addr` must be the unit-aligned start of a block spanning at least
    /// `units` units of writable memory owned by the collector.
    #[inline]
    pub unsafe fn initialize(addr: usize, units: usize) {
        // SAFETY: guaranteed by the caller
        unsafe { (addr as *mut BlockHeader).write(Self::new(units)) };
    }

    /// # Safety
    /// `addr` must point at a live header previously written by
    /// [`BlockHeader::initialize`].
    #[inline]
    pub unsafe fn set_mark(addr: usize) {
        // SAFETY: guaranteed by the caller
        let header = unsafe { &mut *(addr as *mut BlockHeader) };
        header.flags.insert(BlockFlags::MARK);
    }

    /// # Safety
    /// `addr` must point at a live header previously written by
    /// [`BlockHeader::initialize`].
    #[inline]
    pub unsafe fn clear_mark(addr: usize) {
        // SAFETY: guaranteed by the caller
        let header = unsafe { &mut *(addr as *mut BlockHeader) };
        header.flags.remove(BlockFlags::MARK);
    }

    /// # Safety
    /// `addr` must point at a live header previously written by
    /// [`BlockHeader::initialize`].
    #[inline]
    #[must_use]
    pub unsafe fn is_marked(addr: usize) -> bool {
        // SAFETY: guaranteed by the caller
        let header = unsafe { &*(addr as *const BlockHeader) };
        header.flags.contains(BlockFlags::MARK)
    }

    /// # Safety
    /// `addr` must point at a live header previously written by
    /// [`BlockHeader::initialize`].
    #[inline]
    #[must_use]
    pub unsafe fn size_units(addr: usize) -> usize {
        // SAFETY: guaranteed by the caller
        let header = unsafe { &*(addr as *const BlockHeader) };
        header.size
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
