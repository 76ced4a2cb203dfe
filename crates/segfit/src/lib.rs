//! # segfit
//!
//! A segregated-fit heap allocator core over a single contiguous, growable
//! break region. Blocks carry packed 4-byte headers and footers sharing
//! aligned words with their neighbors; free blocks are filed in eleven
//! power-of-two size-class lists through link offsets packed into their
//! first payload word. Allocation is first-fit per class (best-fit in the
//! unbounded top class), deallocation coalesces eagerly, and growth goes
//! through the abstract break capability in [`segment`].
//!
//! Addresses are byte offsets into the region; 0 is the no-address. The
//! allocator is single-threaded — the process-wide handle in [`heap`]
//! serializes callers behind a mutex.
//!
//! No `unsafe` code is permitted in this crate.

#![deny(unsafe_code)]

pub mod check;
pub mod config;
pub mod heap;
pub mod layout;
pub mod links;
pub mod metrics;
pub mod seglist;
pub mod segment;
pub mod trace;

pub use check::HeapCheckError;
pub use config::CheckMode;
pub use heap::{global_heap, Heap, PAGE_STEP};
pub use metrics::{global_metrics, HeapMetrics, MetricsSnapshot};
pub use segment::{BreakRegion, MemBreak};
pub use trace::{HeapLogLevel, HeapLogRecord};
