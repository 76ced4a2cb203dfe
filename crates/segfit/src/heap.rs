//! Allocator operations.
//!
//! [`Heap`] owns the break region and implements the public surface:
//! allocate, free, reallocate, calloc. Placement, splitting, coalescing,
//! and growth all live here; the segregated index and the packed block
//! metadata are edited through [`crate::seglist`], [`crate::links`], and
//! [`crate::layout`].
//!
//! The heap is single-threaded and non-reentrant. The process-wide handle
//! returned by [`global_heap`] serializes callers behind a mutex; a `Heap`
//! owned directly is the caller's to serialize.

use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::config;
use crate::layout::{self, HALF, MIN_BLOCK, WORD};
use crate::metrics::{global_metrics, HeapMetrics};
use crate::seglist::{self, NUM_CLASSES};
use crate::segment::{BreakRegion, MemBreak};
use crate::trace::{HeapLogLevel, HeapLogRecord};

/// Bytes requested from the break region per growth step, minimum.
pub const PAGE_STEP: usize = 256;

/// Payload offset of the prologue sentinel block.
pub(crate) const PROLOGUE_BP: usize = (NUM_CLASSES + 2) * WORD;

/// Payload offset of the first real block.
pub(crate) const FIRST_BP: usize = PROLOGUE_BP + WORD;

// Sizes and link offsets are stored in 32-bit half-words; the heap must
// stay below that horizon.
const MAX_HEAP: usize = (u32::MAX & !0x7) as usize;

/// A segregated-fit heap over a growable break region.
///
/// Addresses accepted and returned by the public operations are payload
/// offsets into the region; 0 is the no-address. Every operation leaves
/// the structural invariants intact — header/footer agreement, no
/// adjacent free blocks, every free block filed in exactly one class list.
pub struct Heap<S: BreakRegion = MemBreak> {
    pub(crate) seg: S,
    /// Live allocated blocks.
    live_blocks: usize,
    /// Bytes held by live blocks, metadata included.
    allocated_bytes: usize,
    /// Monotonic lifecycle decision id.
    next_decision_id: u64,
    /// Structured lifecycle records.
    trace: Vec<HeapLogRecord>,
}

impl Heap<MemBreak> {
    /// Creates a heap over an unbounded in-memory break region.
    #[must_use]
    pub fn new() -> Self {
        Self::with_segment(MemBreak::unbounded())
            .expect("unbounded break region cannot be exhausted at init")
    }

    /// Creates a heap whose break region refuses to grow past `ceiling`
    /// total bytes. Returns `None` if the ceiling cannot fit the initial
    /// layout (one page plus the class-heads table and sentinels).
    #[must_use]
    pub fn with_ceiling(ceiling: usize) -> Option<Self> {
        Self::with_segment(MemBreak::with_ceiling(ceiling))
    }
}

impl Default for Heap<MemBreak> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BreakRegion> Heap<S> {
    /// Initializes the heap image inside a fresh break region.
    ///
    /// Lays down the alignment pad, the class-heads table, the prologue and
    /// epilogue sentinels, then grows by one page to carve the initial free
    /// block. Returns `None` if the region refuses either extension.
    pub fn with_segment(seg: S) -> Option<Self> {
        let mut heap = Self {
            seg,
            live_blocks: 0,
            allocated_bytes: 0,
            next_decision_id: 1,
            trace: Vec::new(),
        };

        let start = heap.seg.extend((NUM_CLASSES + 3) * WORD)?;
        debug_assert_eq!(start, heap.seg.lo());

        let bytes = heap.seg.bytes_mut();
        // Pad word and class heads are already zero from the region; the
        // pad word is written anyway to pin the layout.
        layout::store_word(bytes, 0, 0);
        layout::set_meta(bytes, PROLOGUE_BP, WORD, true);
        // Epilogue header, packed into the prologue payload word until the
        // first growth overwrites it with the initial free block's header.
        layout::store_half(bytes, layout::header_pos(FIRST_BP), layout::pack(0, true));

        heap.grow_heap(PAGE_STEP / WORD)?;
        Some(heap)
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Allocates `size` bytes of payload.
    ///
    /// Returns an 8-aligned payload offset, or `None` on `size == 0` or
    /// break exhaustion. A failed allocation mutates nothing.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            self.record(
                HeapLogLevel::Trace,
                "allocate",
                "zero_size_request",
                None,
                Some(0),
                None,
                "noop",
                String::new(),
            );
            return None;
        }
        let Some(asize) = aligned_size(size) else {
            self.record(
                HeapLogLevel::Warn,
                "allocate",
                "alloc",
                None,
                Some(size),
                None,
                "denied",
                "request_overflows_block_encoding".to_owned(),
            );
            return None;
        };

        let (bp, path) = match seglist::find_fit(self.seg.bytes(), asize) {
            Some(bp) => {
                HeapMetrics::inc(&global_metrics().fit_allocs);
                (bp, "fit")
            }
            None => {
                let step = asize.max(PAGE_STEP);
                let Some(bp) = self.grow_heap(step / WORD) else {
                    HeapMetrics::inc(&global_metrics().oom_failures);
                    self.record(
                        HeapLogLevel::Warn,
                        "allocate",
                        "alloc",
                        None,
                        Some(asize),
                        Some(seglist::class_of(asize)),
                        "oom",
                        "break_region_exhausted".to_owned(),
                    );
                    return None;
                };
                HeapMetrics::inc(&global_metrics().grow_allocs);
                (bp, "grow")
            }
        };

        let placed = self.place(bp, asize);
        self.live_blocks += 1;
        self.allocated_bytes += placed;
        HeapMetrics::inc(&global_metrics().allocs);
        self.record(
            HeapLogLevel::Trace,
            "allocate",
            "alloc",
            Some(bp),
            Some(placed),
            Some(seglist::class_of(placed)),
            "success",
            format!("path={path}"),
        );
        self.maybe_check("allocate");
        Some(bp)
    }

    /// Releases the block at `bp`.
    ///
    /// No-op for the no-address. A pointer that does not look like a live
    /// allocated block — misaligned, out of range, or already free — is
    /// diagnosed, logged at warn level, and ignored.
    pub fn free(&mut self, bp: usize) {
        if bp == 0 {
            self.record(
                HeapLogLevel::Trace,
                "free",
                "free_null",
                Some(bp),
                None,
                None,
                "noop",
                String::new(),
            );
            return;
        }
        if !self.holds_block(bp) {
            self.record(
                HeapLogLevel::Warn,
                "free",
                "free_untracked",
                Some(bp),
                None,
                None,
                "ignored",
                "pointer_is_not_a_well_formed_block".to_owned(),
            );
            return;
        }
        if !layout::block_alloc(self.seg.bytes(), bp) {
            self.record(
                HeapLogLevel::Warn,
                "free",
                "double_free_detected",
                Some(bp),
                None,
                None,
                "ignored",
                "block_is_already_free".to_owned(),
            );
            return;
        }

        let size = layout::block_size(self.seg.bytes(), bp);
        match self.allocated_bytes.checked_sub(size) {
            Some(next) => self.allocated_bytes = next,
            None => {
                self.allocated_bytes = 0;
                self.record(
                    HeapLogLevel::Error,
                    "free",
                    "accounting_bytes_underflow",
                    Some(bp),
                    Some(size),
                    None,
                    "recovered",
                    "checked_sub_failed".to_owned(),
                );
            }
        }
        match self.live_blocks.checked_sub(1) {
            Some(next) => self.live_blocks = next,
            None => {
                self.live_blocks = 0;
                self.record(
                    HeapLogLevel::Error,
                    "free",
                    "accounting_blocks_underflow",
                    Some(bp),
                    Some(size),
                    None,
                    "recovered",
                    "checked_sub_failed".to_owned(),
                );
            }
        }

        layout::set_meta(self.seg.bytes_mut(), bp, size, false);
        let (merged, case) = self.coalesce(bp);
        HeapMetrics::inc(&global_metrics().frees);
        self.record(
            HeapLogLevel::Trace,
            "free",
            "free",
            Some(merged),
            Some(layout::block_size(self.seg.bytes(), merged)),
            Some(seglist::class_of(layout::block_size(self.seg.bytes(), merged))),
            "success",
            format!("coalesce={case}"),
        );
        self.maybe_check("free");
    }

    /// Resizes the block at `old` to `size` payload bytes.
    ///
    /// `old == 0` behaves as allocate; `size == 0` behaves as free and
    /// returns `None`. Otherwise a new block is allocated, the surviving
    /// payload prefix is copied, and only then is the old block freed, so
    /// no link word overwrites payload before the copy. On exhaustion the
    /// old block is left untouched and `None` is returned.
    pub fn reallocate(&mut self, old: usize, size: usize) -> Option<usize> {
        if old == 0 {
            let out = self.allocate(size);
            self.record(
                HeapLogLevel::Trace,
                "reallocate",
                "realloc_null_as_alloc",
                out,
                Some(size),
                None,
                if out.is_some() { "success" } else { "oom" },
                "old_was_null".to_owned(),
            );
            return out;
        }
        if size == 0 {
            self.free(old);
            self.record(
                HeapLogLevel::Trace,
                "reallocate",
                "realloc_zero_as_free",
                Some(old),
                Some(0),
                None,
                "freed",
                "size_was_zero".to_owned(),
            );
            HeapMetrics::inc(&global_metrics().reallocs);
            return None;
        }

        if !self.holds_block(old) || !layout::block_alloc(self.seg.bytes(), old) {
            self.record(
                HeapLogLevel::Warn,
                "reallocate",
                "realloc_untracked_pointer",
                Some(old),
                Some(size),
                None,
                "fallback_alloc",
                "source_is_not_a_live_block".to_owned(),
            );
            return self.allocate(size);
        }

        let old_usable = layout::block_size(self.seg.bytes(), old) - WORD;
        let new = self.allocate(size)?;
        let copy = old_usable.min(size);
        self.seg.bytes_mut().copy_within(old..old + copy, new);
        self.free(old);
        HeapMetrics::inc(&global_metrics().reallocs);
        self.record(
            HeapLogLevel::Trace,
            "reallocate",
            "realloc_move",
            Some(new),
            Some(size),
            None,
            "success",
            format!("old_ptr={old} copied={copy}"),
        );
        self.maybe_check("reallocate");
        Some(new)
    }

    /// Allocates `count * size` zeroed payload bytes.
    ///
    /// Returns `None` if the multiplication overflows or allocation fails;
    /// otherwise every byte of the requested span reads as zero.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<usize> {
        let Some(total) = count.checked_mul(size) else {
            self.record(
                HeapLogLevel::Warn,
                "calloc",
                "calloc_overflow",
                None,
                None,
                None,
                "denied",
                format!("count={count} size={size}"),
            );
            return None;
        };

        let bp = self.allocate(total)?;
        self.seg.bytes_mut()[bp..bp + total].fill(0);
        HeapMetrics::inc(&global_metrics().callocs);
        self.record(
            HeapLogLevel::Trace,
            "calloc",
            "calloc",
            Some(bp),
            Some(total),
            None,
            "success",
            format!("count={count} elem_size={size}"),
        );
        Some(bp)
    }

    // ------------------------------------------------------------------
    // Placement, coalescing, growth
    // ------------------------------------------------------------------

    /// Carves an `asize`-byte allocated block out of the free block `bp`.
    ///
    /// Splits when the leftover can stand as a block of its own; otherwise
    /// the whole block is handed out. Returns the placed size.
    fn place(&mut self, bp: usize, asize: usize) -> usize {
        let bytes = self.seg.bytes_mut();
        let init_size = layout::block_size(bytes, bp);
        let leftover = init_size - asize;
        seglist::remove(bytes, bp);
        if leftover >= MIN_BLOCK {
            layout::set_meta(bytes, bp, asize, true);
            let rest = layout::next_block(bytes, bp);
            layout::set_meta(bytes, rest, leftover, false);
            seglist::insert(bytes, rest);
            HeapMetrics::inc(&global_metrics().splits);
            asize
        } else {
            layout::set_meta(bytes, bp, init_size, true);
            init_size
        }
    }

    /// Merges the free block `bp` with any free neighbors and files the
    /// result. Returns the surviving payload offset and the case label.
    ///
    /// Link edits happen before merged sizes are committed: neighbor
    /// traversal depends on the sizes being the pre-merge ones. Must not
    /// be interrupted by the checker — intermediate states are invalid by
    /// design.
    fn coalesce(&mut self, bp: usize) -> (usize, &'static str) {
        let bytes = self.seg.bytes_mut();
        let prev_bp = layout::prev_block(bytes, bp);
        let next_bp = layout::next_block(bytes, bp);
        let prev_alloc = layout::block_alloc(bytes, prev_bp);
        let next_alloc = layout::block_alloc(bytes, next_bp);
        let size = layout::block_size(bytes, bp);

        let metrics = global_metrics();
        match (prev_alloc, next_alloc) {
            (true, true) => {
                seglist::insert(bytes, bp);
                HeapMetrics::inc(&metrics.coalesce_none);
                (bp, "none")
            }
            (true, false) => {
                let merged = size + layout::block_size(bytes, next_bp);
                seglist::remove(bytes, next_bp);
                layout::set_meta(bytes, bp, merged, false);
                seglist::insert(bytes, bp);
                HeapMetrics::inc(&metrics.coalesce_next);
                (bp, "next")
            }
            (false, true) => {
                let merged = size + layout::block_size(bytes, prev_bp);
                seglist::remove(bytes, prev_bp);
                layout::set_meta(bytes, prev_bp, merged, false);
                seglist::insert(bytes, prev_bp);
                HeapMetrics::inc(&metrics.coalesce_prev);
                (prev_bp, "prev")
            }
            (false, false) => {
                let merged = size
                    + layout::block_size(bytes, prev_bp)
                    + layout::block_size(bytes, next_bp);
                seglist::remove(bytes, prev_bp);
                seglist::remove(bytes, next_bp);
                layout::set_meta(bytes, prev_bp, merged, false);
                seglist::insert(bytes, prev_bp);
                HeapMetrics::inc(&metrics.coalesce_both);
                (prev_bp, "both")
            }
        }
    }

    /// Extends the heap by `words` words (rounded up to an even count),
    /// carves the new region into one free block, re-seats the epilogue,
    /// and coalesces backward. Returns the resulting free block.
    fn grow_heap(&mut self, words: usize) -> Option<usize> {
        let words = words + (words & 1);
        let bytes_needed = words * WORD;
        if self.seg.hi().checked_add(bytes_needed)? > MAX_HEAP {
            return None;
        }
        let bp = self.seg.extend(bytes_needed)?;

        let bytes = self.seg.bytes_mut();
        // The old epilogue header becomes the new block's header.
        layout::set_meta(bytes, bp, bytes_needed, false);
        let epilogue = layout::next_block(bytes, bp);
        layout::store_half(bytes, layout::header_pos(epilogue), layout::pack(0, true));

        HeapMetrics::inc(&global_metrics().grows);
        self.record(
            HeapLogLevel::Debug,
            "grow",
            "heap_extended",
            Some(bp),
            Some(bytes_needed),
            None,
            "success",
            format!("hi={}", self.seg.hi()),
        );
        let (merged, _) = self.coalesce(bp);
        Some(merged)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Read-only view of the heap image, class heads and sentinels included.
    #[must_use]
    pub fn image(&self) -> &[u8] {
        self.seg.bytes()
    }

    /// Block size behind `bp`, if `bp` is a well-formed block.
    #[must_use]
    pub fn block_size(&self, bp: usize) -> Option<usize> {
        self.holds_block(bp)
            .then(|| layout::block_size(self.seg.bytes(), bp))
    }

    /// Allocation state behind `bp`, if `bp` is a well-formed block.
    #[must_use]
    pub fn is_allocated(&self, bp: usize) -> Option<bool> {
        self.holds_block(bp)
            .then(|| layout::block_alloc(self.seg.bytes(), bp))
    }

    /// Writable payload bytes behind a live allocation.
    #[must_use]
    pub fn usable_size(&self, bp: usize) -> Option<usize> {
        if self.is_allocated(bp)? {
            Some(layout::block_size(self.seg.bytes(), bp) - WORD)
        } else {
            None
        }
    }

    /// The payload of a live allocation.
    #[must_use]
    pub fn payload(&self, bp: usize) -> Option<&[u8]> {
        let usable = self.usable_size(bp)?;
        Some(&self.seg.bytes()[bp..bp + usable])
    }

    /// The payload of a live allocation, writable.
    #[must_use]
    pub fn payload_mut(&mut self, bp: usize) -> Option<&mut [u8]> {
        let usable = self.usable_size(bp)?;
        Some(&mut self.seg.bytes_mut()[bp..bp + usable])
    }

    /// Total bytes obtained from the break region.
    #[must_use]
    pub fn heap_bytes(&self) -> usize {
        self.seg.hi() - self.seg.lo()
    }

    /// Live allocated blocks.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    /// Bytes held by live blocks, metadata included.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Returns a view of the lifecycle records.
    #[must_use]
    pub fn trace(&self) -> &[HeapLogRecord] {
        &self.trace
    }

    /// Drains the lifecycle records.
    pub fn drain_trace(&mut self) -> Vec<HeapLogRecord> {
        std::mem::take(&mut self.trace)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Whether `bp` decodes as a well-formed block inside the heap:
    /// aligned, past the prologue, with a sane size that stays in bounds.
    pub(crate) fn holds_block(&self, bp: usize) -> bool {
        let hi = self.seg.hi();
        if bp % WORD != 0 || bp < FIRST_BP || bp > hi {
            return false;
        }
        let size = layout::block_size(self.seg.bytes(), bp);
        size >= MIN_BLOCK
            && size % WORD == 0
            && bp.checked_add(size).is_some_and(|end| end <= hi)
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        class: Option<usize>,
        outcome: &'static str,
        details: String,
    ) {
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("segfit::{symbol}::{decision_id:016x}");
        self.trace.push(HeapLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            ptr,
            size,
            class,
            outcome,
            details,
            live_blocks: self.live_blocks,
            allocated_bytes: self.allocated_bytes,
            heap_bytes: self.heap_bytes(),
        });
    }

    fn maybe_check(&self, symbol: &'static str) {
        if config::check_mode().checks_boundaries() {
            self.assert_consistent(symbol);
        }
    }

    /// Runs the full consistency walk and panics on the first violation,
    /// naming the operation boundary and the call site.
    #[track_caller]
    pub fn assert_consistent(&self, symbol: &'static str) {
        if let Err(err) = self.check_heap() {
            panic!("heap invariant violated after {symbol}: {err}");
        }
    }
}

/// Aligned block size for a payload request: one metadata word of overhead,
/// rounded to the word alignment, floored at the minimum block size.
///
/// `None` when the request is too large to encode in a block header.
fn aligned_size(size: usize) -> Option<usize> {
    let asize = layout::align8(size.checked_add(WORD)?).max(MIN_BLOCK);
    (asize <= MAX_HEAP - HALF).then_some(asize)
}

static GLOBAL_HEAP: OnceLock<Mutex<Heap<MemBreak>>> = OnceLock::new();

/// Process-wide heap handle.
///
/// All callers share one heap; the mutex provides the serialization the
/// allocator itself does not.
#[must_use]
pub fn global_heap() -> &'static Mutex<Heap<MemBreak>> {
    GLOBAL_HEAP.get_or_init(|| Mutex::new(Heap::new()))
}
