//! Atomic counters for allocator observability.
//!
//! All counters use relaxed ordering — they are advisory/diagnostic,
//! not synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global allocator operation counters.
pub struct HeapMetrics {
    /// Successful allocations.
    pub allocs: AtomicU64,
    /// Completed frees.
    pub frees: AtomicU64,
    /// Completed reallocations.
    pub reallocs: AtomicU64,
    /// Completed zeroed allocations.
    pub callocs: AtomicU64,
    /// Placements that split off a remainder block.
    pub splits: AtomicU64,
    /// Coalesces with both neighbors allocated (plain insert).
    pub coalesce_none: AtomicU64,
    /// Coalesces that absorbed the next block.
    pub coalesce_next: AtomicU64,
    /// Coalesces that merged into the previous block.
    pub coalesce_prev: AtomicU64,
    /// Coalesces that merged all three blocks.
    pub coalesce_both: AtomicU64,
    /// Heap extensions performed.
    pub grows: AtomicU64,
    /// Allocations served from an existing free block.
    pub fit_allocs: AtomicU64,
    /// Allocations that needed a heap extension.
    pub grow_allocs: AtomicU64,
    /// Requests refused because the break region was exhausted.
    pub oom_failures: AtomicU64,
    /// Full heap-consistency walks performed.
    pub checks: AtomicU64,
}

impl HeapMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            reallocs: AtomicU64::new(0),
            callocs: AtomicU64::new(0),
            splits: AtomicU64::new(0),
            coalesce_none: AtomicU64::new(0),
            coalesce_next: AtomicU64::new(0),
            coalesce_prev: AtomicU64::new(0),
            coalesce_both: AtomicU64::new(0),
            grows: AtomicU64::new(0),
            fit_allocs: AtomicU64::new(0),
            grow_allocs: AtomicU64::new(0),
            oom_failures: AtomicU64::new(0),
            checks: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters into a displayable summary.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocs: Self::get(&self.allocs),
            frees: Self::get(&self.frees),
            reallocs: Self::get(&self.reallocs),
            callocs: Self::get(&self.callocs),
            splits: Self::get(&self.splits),
            coalesce_none: Self::get(&self.coalesce_none),
            coalesce_next: Self::get(&self.coalesce_next),
            coalesce_prev: Self::get(&self.coalesce_prev),
            coalesce_both: Self::get(&self.coalesce_both),
            grows: Self::get(&self.grows),
            fit_allocs: Self::get(&self.fit_allocs),
            grow_allocs: Self::get(&self.grow_allocs),
            oom_failures: Self::get(&self.oom_failures),
            checks: Self::get(&self.checks),
        }
    }
}

impl Default for HeapMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all allocator counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub allocs: u64,
    pub frees: u64,
    pub reallocs: u64,
    pub callocs: u64,
    pub splits: u64,
    pub coalesce_none: u64,
    pub coalesce_next: u64,
    pub coalesce_prev: u64,
    pub coalesce_both: u64,
    pub grows: u64,
    pub fit_allocs: u64,
    pub grow_allocs: u64,
    pub oom_failures: u64,
    pub checks: u64,
}

/// Global metrics instance.
static GLOBAL_METRICS: HeapMetrics = HeapMetrics::new();

/// Access the global metrics singleton.
#[must_use]
pub fn global_metrics() -> &'static HeapMetrics {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let m = HeapMetrics::new();
        let snap = m.snapshot();
        assert_eq!(snap.allocs, 0);
        assert_eq!(snap.coalesce_both, 0);
    }

    #[test]
    fn test_increment_works() {
        let m = HeapMetrics::new();
        HeapMetrics::inc(&m.allocs);
        HeapMetrics::inc(&m.allocs);
        HeapMetrics::inc(&m.splits);
        let snap = m.snapshot();
        assert_eq!(snap.allocs, 2);
        assert_eq!(snap.splits, 1);
    }
}
