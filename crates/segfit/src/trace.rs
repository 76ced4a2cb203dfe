//! Structured lifecycle records.
//!
//! Every public heap operation appends one or more records describing what
//! it decided and why, together with an accounting snapshot taken at record
//! time. Records stay on the heap handle until drained; they are the
//! allocator's observability surface.

use serde::Serialize;

/// Lifecycle record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: HeapLogLevel,
    /// API symbol (`allocate`, `free`, `reallocate`, `calloc`, `grow`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `double_free_detected`, ...).
    pub event: &'static str,
    /// Payload offset involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size class involved in the event.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: live allocated blocks.
    pub live_blocks: usize,
    /// Snapshot: bytes held by live blocks, metadata included.
    pub allocated_bytes: usize,
    /// Snapshot: total heap bytes obtained from the break region.
    pub heap_bytes: usize,
}
