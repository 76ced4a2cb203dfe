//! Heap-consistency checker.
//!
//! Walks the sentinels, the implicit block chain, and every class list,
//! verifying the structural rules the allocator maintains. The walk is
//! read-only and valid only at quiescent points — between public
//! operations. Inside `coalesce` or a list `remove` the intermediate
//! states violate these rules by design.

use thiserror::Error;

use crate::heap::{Heap, FIRST_BP, PROLOGUE_BP};
use crate::layout::{self, MIN_BLOCK, WORD};
use crate::links;
use crate::metrics::{global_metrics, HeapMetrics};
use crate::seglist::{self, NUM_CLASSES};
use crate::segment::BreakRegion;

/// A violated heap-consistency rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapCheckError {
    #[error("prologue signature corrupt: header {header:#x}, footer {footer:#x}")]
    PrologueCorrupt { header: u32, footer: u32 },

    #[error("epilogue signature corrupt at {at}: header {header:#x}")]
    EpilogueCorrupt { at: usize, header: u32 },

    #[error("block {bp} escapes the heap (hi {hi})")]
    BlockOutOfBounds { bp: usize, hi: usize },

    #[error("block {bp} is not word-aligned")]
    BlockMisaligned { bp: usize },

    #[error(
        "block {bp}: header and footer disagree \
         (sizes {header_size}/{footer_size}, alloc {header_alloc}/{footer_alloc})"
    )]
    MetaMismatch {
        bp: usize,
        header_size: usize,
        footer_size: usize,
        header_alloc: bool,
        footer_alloc: bool,
    },

    #[error("block {bp}: size {size} below minimum or unaligned")]
    BadSize { bp: usize, size: usize },

    #[error("adjacent free blocks at {bp} and {next}")]
    UncoalescedNeighbors { bp: usize, next: usize },

    #[error("free list {class} is cyclic or overlong")]
    ListCycle { class: usize },

    #[error("free list {class}: node {bp} is outside the heap or misaligned")]
    BadListNode { class: usize, bp: usize },

    #[error("free list {class}: head {bp} has a nonzero prev link")]
    HeadPrevNotZero { class: usize, bp: usize },

    #[error("free list {class}: node {bp} links to {next}, whose prev is {back}")]
    LinkMismatch {
        class: usize,
        bp: usize,
        next: usize,
        back: usize,
    },

    #[error("free list {class}: node {bp} of size {size} belongs in class {expected}")]
    WrongClass {
        class: usize,
        bp: usize,
        size: usize,
        expected: usize,
    },

    #[error("free list {class}: node {bp} is not a free block of the heap")]
    StrayListNode { class: usize, bp: usize },

    #[error("free block {bp} missing from class list {class}")]
    NotListed { bp: usize, class: usize },

    #[error("free block {bp} filed {count} times across the lists")]
    DuplicateListEntry { bp: usize, count: usize },
}

impl<S: BreakRegion> Heap<S> {
    /// Verifies every structural rule of the heap.
    ///
    /// Returns the first violation found: sentinel signatures, then the
    /// implicit block chain (bounds, alignment, header/footer agreement,
    /// minimum size, no adjacent free blocks), then every class list
    /// (membership, class fit, doubly-linked consistency), and finally
    /// that each free block is filed in exactly one list.
    pub fn check_heap(&self) -> Result<(), HeapCheckError> {
        HeapMetrics::inc(&global_metrics().checks);
        let bytes = self.seg.bytes();
        let hi = self.seg.hi();

        self.check_sentinels(bytes, hi)?;
        let free_blocks = self.check_block_chain(bytes, hi)?;
        let listed = self.check_class_lists(bytes, hi, &free_blocks)?;

        for &bp in &free_blocks {
            let count = listed.iter().filter(|&&node| node == bp).count();
            if count == 0 {
                return Err(HeapCheckError::NotListed {
                    bp,
                    class: seglist::class_of(layout::block_size(bytes, bp)),
                });
            }
            if count > 1 {
                return Err(HeapCheckError::DuplicateListEntry { bp, count });
            }
        }
        Ok(())
    }

    fn check_sentinels(&self, bytes: &[u8], hi: usize) -> Result<(), HeapCheckError> {
        let header = layout::load_half(bytes, layout::header_pos(PROLOGUE_BP));
        let footer = layout::load_half(bytes, PROLOGUE_BP + WORD - layout::HALF);
        let expected = layout::pack(WORD, true);
        if header != expected || footer != expected {
            return Err(HeapCheckError::PrologueCorrupt { header, footer });
        }

        let at = hi - WORD;
        let epilogue = layout::load_half(bytes, at);
        if epilogue != layout::pack(0, true) {
            return Err(HeapCheckError::EpilogueCorrupt {
                at,
                header: epilogue,
            });
        }
        Ok(())
    }

    /// Walks the implicit chain from the first real block to the epilogue.
    /// Returns the free blocks encountered, in address order.
    fn check_block_chain(&self, bytes: &[u8], hi: usize) -> Result<Vec<usize>, HeapCheckError> {
        let mut free_blocks = Vec::new();
        let mut prev_free = 0usize;
        let mut bp = FIRST_BP;

        loop {
            if bp > hi {
                return Err(HeapCheckError::BlockOutOfBounds { bp, hi });
            }
            let size = layout::block_size(bytes, bp);
            if size == 0 {
                // Epilogue; the chain must land exactly on the heap end.
                if bp != hi {
                    return Err(HeapCheckError::EpilogueCorrupt {
                        at: layout::header_pos(bp),
                        header: layout::load_half(bytes, layout::header_pos(bp)),
                    });
                }
                return Ok(free_blocks);
            }
            if bp % WORD != 0 {
                return Err(HeapCheckError::BlockMisaligned { bp });
            }
            if size < MIN_BLOCK || size % WORD != 0 {
                return Err(HeapCheckError::BadSize { bp, size });
            }
            if bp + size > hi {
                return Err(HeapCheckError::BlockOutOfBounds { bp: bp + size, hi });
            }

            let footer_size = layout::footer_size(bytes, bp);
            let header_alloc = layout::block_alloc(bytes, bp);
            let footer_alloc = layout::footer_alloc(bytes, bp);
            if footer_size != size || footer_alloc != header_alloc {
                return Err(HeapCheckError::MetaMismatch {
                    bp,
                    header_size: size,
                    footer_size,
                    header_alloc,
                    footer_alloc,
                });
            }

            if !header_alloc {
                if prev_free != 0 {
                    return Err(HeapCheckError::UncoalescedNeighbors {
                        bp: prev_free,
                        next: bp,
                    });
                }
                free_blocks.push(bp);
                prev_free = bp;
            } else {
                prev_free = 0;
            }
            bp = layout::next_block(bytes, bp);
        }
    }

    /// Walks every class list. Returns all listed nodes.
    fn check_class_lists(
        &self,
        bytes: &[u8],
        hi: usize,
        free_blocks: &[usize],
    ) -> Result<Vec<usize>, HeapCheckError> {
        let mut listed = Vec::new();
        for class in 0..NUM_CLASSES {
            let mut node = seglist::head(bytes, class);
            let mut first = true;
            let mut walked = 0usize;
            while node != 0 {
                walked += 1;
                if walked > free_blocks.len() {
                    return Err(HeapCheckError::ListCycle { class });
                }
                if node % WORD != 0 || node < FIRST_BP || node >= hi {
                    return Err(HeapCheckError::BadListNode { class, bp: node });
                }
                if !free_blocks.contains(&node) {
                    return Err(HeapCheckError::StrayListNode { class, bp: node });
                }
                if first && links::prev_of(bytes, node) != 0 {
                    return Err(HeapCheckError::HeadPrevNotZero { class, bp: node });
                }

                let size = layout::block_size(bytes, node);
                let expected = seglist::class_of(size);
                if expected != class {
                    return Err(HeapCheckError::WrongClass {
                        class,
                        bp: node,
                        size,
                        expected,
                    });
                }

                let next = links::next_of(bytes, node);
                if next != 0 {
                    let back = links::prev_of(bytes, next);
                    if back != node {
                        return Err(HeapCheckError::LinkMismatch {
                            class,
                            bp: node,
                            next,
                            back,
                        });
                    }
                }

                listed.push(node);
                first = false;
                node = next;
            }
        }
        Ok(listed)
    }
}
