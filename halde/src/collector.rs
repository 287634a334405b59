//! Conservative mark-and-sweep collection over a free-list heap.
//!
//! The collector owns every chunk it maps from the OS and partitions it
//! between the free list and the used-block registry. Callers only ever
//! allocate and collect; nothing is freed explicitly. Marking is
//! conservative: any word in a root range or in a live block's body that
//! lands inside another live block's usable extent is treated as a
//! reference. Over-retention from coincidental matches is accepted;
//! word-aligned true references are never missed.
//!
//! Transitive marking uses an explicit worklist: newly marked blocks are
//! queued and each is scanned exactly once, so the closure is complete
//! regardless of scan order.

use std::{cell::Cell, marker::PhantomData, ptr::NonNull};

use crate::{BlockHeader, FreeList, UNIT_SIZE, UsedRegistry, system};

// ── Settings ──────────────────────────────────────────────────────────

/// Upper bound on a single heap growth, in allocation units.
pub const DEFAULT_GROWTH_UNITS: usize = 4096;

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Cap on the units requested from the OS per growth. Bounds the waste
    /// and latency of a single growth step.
    pub growth_units: usize,
    /// Optional cap on total mapped bytes. Growth beyond it is denied and
    /// surfaces as allocation failure.
    pub heap_limit: Option<usize>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            growth_units: DEFAULT_GROWTH_UNITS,
            heap_limit: None,
        }
    }
}

impl CollectorSettings {
    fn validate(&self) -> Result<(), &'static str> {
        if self.growth_units == 0 {
            return Err("growth_units must be > 0");
        }
        if let Some(limit) = self.heap_limit
            && limit < system::OS_PAGE_SIZE
        {
            return Err("heap_limit must cover at least one page");
        }
        Ok(())
    }
}

// ── Cycle statistics ──────────────────────────────────────────────────

/// Outcome of one collection cycle. Internal bookkeeping; the plain
/// [`Collector::collect`] entry point only logs it.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub live_blocks: usize,
    pub reclaimed_blocks: usize,
    pub reclaimed_units: usize,
}

// ── Collector ─────────────────────────────────────────────────────────

/// Single-owner handle over the managed heap.
///
/// Not `Send` or `Sync`: there is exactly one logical owner, all operations
/// run to completion on its thread, and a collection cycle is a full pause.
/// A cycle flag additionally asserts against re-entry from foreign frames
/// (signal handlers and the like), which the borrow checker cannot see.
#[derive(Debug)]
pub struct Collector {
    settings: CollectorSettings,
    free: FreeList,
    used: UsedRegistry,
    /// Every region obtained from the OS, kept mapped until the collector
    /// itself is dropped.
    chunks: Vec<(NonNull<u8>, usize)>,
    /// High bound for the conservative stack scan, captured once.
    stack_origin: usize,
    in_cycle: Cell<bool>,
    _marker: PhantomData<*const ()>,
}

impl Collector {
    /// Sets up an empty heap and captures the process's stack origin.
    ///
    /// Panics when the settings are inconsistent or the stack origin cannot
    /// be determined; without the origin the stack scan cannot be bounded
    /// and there is no safe degraded mode.
    #[must_use]
    pub fn new(settings: CollectorSettings) -> Self {
        settings.validate().expect("invalid collector settings");
        let stack_origin =
            system::stack_origin().expect("read process stack origin");

        Self {
            settings,
            free: FreeList::new(),
            used: UsedRegistry::new(),
            chunks: Vec::new(),
            stack_origin,
            in_cycle: Cell::new(false),
            _marker: PhantomData,
        }
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// Hands out a usable region of at least `bytes` bytes, registering the
    /// backing block as live. Returns `None` when neither the free list nor
    /// a single heap growth can satisfy the request; the heap stays valid
    /// in that case.
    ///
    /// Exhaustion never triggers a collection on its own. Reclamation is
    /// entirely in the caller's hands.
    pub fn allocate(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        assert!(
            !self.in_cycle.get(),
            "allocation re-entered during a collection cycle"
        );

        let units = BlockHeader::units_for(bytes);
        let addr = match self.free.acquire(units) {
            Some(addr) => addr,
            None => {
                self.grow(units)?;
                self.free.acquire(units)?
            }
        };

        // SAFETY: addr starts `units` units of mapped memory owned by us
        unsafe { BlockHeader::initialize(addr, units) };
        self.used.insert(addr, units);

        // SAFETY: the body of a block is one unit past its non-null header
        Some(unsafe { NonNull::new_unchecked((addr + UNIT_SIZE) as *mut u8) })
    }

    /// Requests more address space from the OS and folds it into the free
    /// list. The request is capped at `growth_units` per call and denied
    /// once `heap_limit` would be exceeded.
    fn grow(&mut self, units: usize) -> Option<()> {
        let request = units.min(self.settings.growth_units);
        let bytes =
            (request * UNIT_SIZE).next_multiple_of(system::OS_PAGE_SIZE);

        if let Some(limit) = self.settings.heap_limit
            && self.mapped_bytes() + bytes > limit
        {
            return None;
        }

        let ptr = system::map_memory(bytes)?;
        self.chunks.push((ptr, bytes));

        let granted = bytes / UNIT_SIZE;
        let addr = ptr.as_ptr() as usize;
        log::trace!("heap grown by {granted} units ({bytes} bytes)");

        // SAFETY: freshly mapped chunk spanning `granted` units
        unsafe { BlockHeader::initialize(addr, granted) };
        self.free.release(addr, granted);
        Some(())
    }

    // ── Collection ────────────────────────────────────────────────────

    /// Runs one full collection cycle against the process's own roots: the
    /// static data segment and the stack window between the current frame
    /// and the stack origin. Everything unreachable from there is returned
    /// to the free list before this call returns.
    pub fn collect(&mut self) {
        let (data_start, data_stop) = system::static_data_segment();
        let top = system::approximate_stack_pointer();
        let bottom = self.stack_origin;

        let mut roots = Vec::with_capacity(2);
        if data_start < data_stop {
            roots.push((data_start, data_stop));
        }
        if top < bottom {
            roots.push((top, bottom));
        }

        // SAFETY: both ranges are readable for the duration of the cycle;
        // the data segment is always mapped and the stack window lies
        // between this frame and the recorded origin
        unsafe { self.collect_from(&roots) };
    }

    /// The deterministic core of [`Collector::collect`]: marks everything
    /// reachable from the given root ranges, computes the transitive
    /// closure over live block bodies, then sweeps.
    ///
    /// An empty registry makes the whole cycle a no-op: nothing to scan,
    /// nothing to sweep, no root range is ever read.
    ///
    /// # Safety
    /// Every range in `roots` must stay readable for the duration of the
    /// call.
    pub unsafe fn collect_from(&mut self, roots: &[(usize, usize)]) -> CycleStats {
        assert!(!self.in_cycle.get(), "collection cycle re-entered");
        if self.used.is_empty() {
            return CycleStats::default();
        }
        self.in_cycle.set(true);

        let mut worklist = Vec::new();
        for &(start, stop) in roots {
            // SAFETY: callers pass readable ranges (platform segments or
            // live local arrays)
            unsafe { self.scan_range(start, stop, None, &mut worklist) };
        }

        // Drain the worklist; each block's body is scanned exactly once.
        while let Some(addr) = worklist.pop() {
            let units =
                self.used.units_of(addr).expect("marked block is registered");
            // SAFETY: addr carries a live header
            debug_assert_eq!(
                unsafe { BlockHeader::size_units(addr) },
                units,
                "header size must match the registered extent"
            );
            let body = addr + UNIT_SIZE;
            let stop = addr + units * UNIT_SIZE;
            // SAFETY: the body of a registered block is mapped memory
            unsafe { self.scan_range(body, stop, Some(addr), &mut worklist) };
        }

        let stats = self.sweep();
        log::debug!(
            "collection cycle: {} live, {} reclaimed ({} units)",
            stats.live_blocks,
            stats.reclaimed_blocks,
            stats.reclaimed_units
        );

        self.in_cycle.set(false);
        stats
    }

    /// Treats `[start, stop)` as a sequence of word-aligned candidate
    /// addresses and marks every registry block whose usable extent
    /// strictly contains one of them. Newly marked blocks are queued on the
    /// worklist; already marked blocks are left alone, which makes repeated
    /// hits idempotent. `exclude` keeps a block's own body from marking
    /// itself.
    ///
    /// # Safety
    /// `[start, stop)` must be readable memory for the whole call.
    unsafe fn scan_range(
        &self,
        start: usize,
        stop: usize,
        exclude: Option<usize>,
        worklist: &mut Vec<usize>,
    ) {
        let word = std::mem::size_of::<usize>();
        let mut cursor = start.next_multiple_of(word);

        while cursor + word <= stop {
            // SAFETY: aligned read inside the caller-guaranteed range;
            // volatile because root ranges are not memory we wrote
            let candidate =
                unsafe { (cursor as *const usize).read_volatile() };

            if let Some(addr) = self.used.block_containing(candidate)
                && exclude != Some(addr)
                // SAFETY: registered blocks carry live headers
                && !unsafe { BlockHeader::is_marked(addr) }
            {
                // SAFETY: registered blocks carry live headers
                unsafe { BlockHeader::set_mark(addr) };
                worklist.push(addr);
            }

            cursor += word;
        }
    }

    /// Walks the registry once: unmarked blocks go back to the free list,
    /// marked blocks survive with their tag cleared.
    fn sweep(&mut self) -> CycleStats {
        let mut stats = CycleStats::default();

        for addr in self.used.addresses() {
            // SAFETY: registered blocks carry live headers
            if unsafe { BlockHeader::is_marked(addr) } {
                // SAFETY: same header
                unsafe { BlockHeader::clear_mark(addr) };
                stats.live_blocks += 1;
            } else {
                let units =
                    self.used.remove(addr).expect("walking registered blocks");
                // SAFETY: the header stays valid until the block is merged
                debug_assert_eq!(
                    unsafe { BlockHeader::size_units(addr) },
                    units,
                    "header size must match the registered extent"
                );
                self.free.release(addr, units);
                stats.reclaimed_blocks += 1;
                stats.reclaimed_units += units;
            }
        }

        stats
    }

    // ── Introspection ─────────────────────────────────────────────────

    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.used.len()
    }

    /// Free capacity in units, block headers included.
    #[must_use]
    pub fn free_units(&self) -> usize {
        self.free.total_units()
    }

    #[must_use]
    pub fn mapped_bytes(&self) -> usize {
        self.chunks.iter().map(|&(_, bytes)| bytes).sum()
    }

    #[must_use]
    pub fn registry(&self) -> &UsedRegistry {
        &self.used
    }

    #[must_use]
    pub fn free_list(&self) -> &FreeList {
        &self.free
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        for &(ptr, bytes) in &self.chunks {
            system::unmap_memory(ptr, bytes);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
