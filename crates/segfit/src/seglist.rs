//! Segregated free-list index.
//!
//! Eleven class heads live at the very start of the heap image, one word
//! each, holding the absolute offset of the first free block in that class
//! (0 = empty list). Classes bucket block sizes by powers of two starting
//! at 2^6: class 0 covers everything below 128 bytes, class 9 covers
//! [32768, 65536), and class 10 is unbounded above.
//!
//! Insertion is LIFO at the head. Search is first-fit within a class,
//! walking classes upward, except the top class which is searched best-fit:
//! it spans an unbounded range, and first-fit there hands out arbitrarily
//! oversized blocks.

use crate::layout::{block_size, load_word, store_word, WORD};
use crate::links::{next_of, prev_of, set_next, set_prev, ANCHOR};

/// Number of size-class lists.
pub const NUM_CLASSES: usize = 11;

/// Class index for an aligned block size.
///
/// `min(NUM_CLASSES - 1, max(0, floor(log2(size)) - 6))`; monotone
/// non-decreasing in `size`.
#[must_use]
pub fn class_of(size: usize) -> usize {
    debug_assert!(size > 0);
    let log2 = (usize::BITS - 1 - size.leading_zeros()) as usize;
    log2.saturating_sub(6).min(NUM_CLASSES - 1)
}

/// Byte offset of the head word for `class`.
#[must_use]
pub fn head_pos(class: usize) -> usize {
    ANCHOR + class * WORD
}

/// First free block of `class`, or 0 when the list is empty.
#[must_use]
pub fn head(heap: &[u8], class: usize) -> usize {
    load_word(heap, head_pos(class)) as usize
}

fn set_head(heap: &mut [u8], class: usize, bp: usize) {
    store_word(heap, head_pos(class), bp as u64);
}

/// Files the free block `bp` at the head of its class list.
pub fn insert(heap: &mut [u8], bp: usize) {
    let class = class_of(block_size(heap, bp));
    let old_head = head(heap, class);
    if old_head != 0 {
        set_next(heap, bp, old_head);
        set_prev(heap, old_head, bp);
    } else {
        set_next(heap, bp, 0);
    }
    set_head(heap, class, bp);
    set_prev(heap, bp, 0);
}

/// Unlinks the free block `bp` from its class list.
pub fn remove(heap: &mut [u8], bp: usize) {
    let class = class_of(block_size(heap, bp));
    let prev = prev_of(heap, bp);
    let next = next_of(heap, bp);
    match (prev != 0, next != 0) {
        (true, true) => {
            set_next(heap, prev, next);
            set_prev(heap, next, prev);
        }
        (true, false) => {
            set_next(heap, prev, 0);
        }
        (false, true) => {
            set_head(heap, class, next);
            set_prev(heap, next, 0);
        }
        (false, false) => {
            set_head(heap, class, 0);
        }
    }
}

/// Finds a free block of at least `asize` bytes, or `None`.
///
/// Classes `class_of(asize)` through the second-to-last are scanned
/// first-fit in list order; the top class is scanned in full and the
/// smallest sufficient block wins, ties going to the earlier node.
#[must_use]
pub fn find_fit(heap: &[u8], asize: usize) -> Option<usize> {
    for class in class_of(asize)..NUM_CLASSES - 1 {
        let mut bp = head(heap, class);
        while bp != 0 {
            if block_size(heap, bp) >= asize {
                return Some(bp);
            }
            bp = next_of(heap, bp);
        }
    }

    let mut best: Option<(usize, usize)> = None;
    let mut bp = head(heap, NUM_CLASSES - 1);
    while bp != 0 {
        let size = block_size(heap, bp);
        if size >= asize && best.map_or(true, |(_, best_size)| size < best_size) {
            best = Some((bp, size));
        }
        bp = next_of(heap, bp);
    }
    best.map(|(bp, _)| bp)
}
