//! End-to-end allocator scenarios: placement, splitting, coalescing,
//! reuse order, top-class best fit, realloc data preservation, and a
//! seeded churn storm that re-checks the heap throughout.

use serde_json::json;
use std::fs;

use segfit::seglist;
use segfit::{global_metrics, Heap};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn checked(heap: &Heap) {
    heap.check_heap().expect("heap invariants hold");
}

#[test]
fn init_and_one_allocation() {
    let mut heap = Heap::new();
    let p = heap.allocate(24).expect("initial page serves 24 bytes");
    checked(&heap);
    assert_eq!(heap.block_size(p), Some(32));
    assert_eq!(heap.is_allocated(p), Some(true));
    assert_eq!(p % 8, 0);
}

#[test]
fn split_leaves_remainder_in_its_class() {
    let mut heap = Heap::new();
    // Consume the initial page, then stage a lone 4096-byte free block.
    let pin = heap.allocate(248).unwrap();
    let big = heap.allocate(4088).unwrap();
    assert_eq!(heap.block_size(big), Some(4096));
    heap.free(big);
    checked(&heap);

    let p = heap.allocate(56).unwrap();
    checked(&heap);
    assert_eq!(p, big);
    assert_eq!(heap.block_size(p), Some(64));
    assert_eq!(heap.is_allocated(p), Some(true));

    let rest = p + 64;
    assert_eq!(heap.block_size(rest), Some(4032));
    assert_eq!(heap.is_allocated(rest), Some(false));
    assert_eq!(seglist::head(heap.image(), seglist::class_of(4032)), rest);
    let _ = pin;
}

#[test]
fn freeing_middle_block_merges_all_three() {
    let mut heap = Heap::new();
    let a = heap.allocate(56).unwrap();
    let b = heap.allocate(56).unwrap();
    let c = heap.allocate(56).unwrap();
    // Fourth allocation consumes the page's tail so nothing else is free.
    let pin = heap.allocate(56).unwrap();
    assert_eq!(b, a + 64);
    assert_eq!(c, b + 64);

    heap.free(a);
    checked(&heap);
    heap.free(c);
    checked(&heap);
    heap.free(b);
    checked(&heap);

    assert_eq!(heap.block_size(a), Some(192));
    assert_eq!(heap.is_allocated(a), Some(false));
    assert_eq!(seglist::head(heap.image(), seglist::class_of(64)), 0);
    assert_eq!(seglist::head(heap.image(), seglist::class_of(192)), a);
    let _ = pin;
}

#[test]
fn freed_blocks_are_reused_lifo() {
    let mut heap = Heap::new();
    // Spacers keep X, Y, Z apart so freeing them cannot coalesce.
    let x = heap.allocate(80).unwrap();
    let _s1 = heap.allocate(80).unwrap();
    let y = heap.allocate(80).unwrap();
    let _s2 = heap.allocate(80).unwrap();
    let z = heap.allocate(80).unwrap();
    let _s3 = heap.allocate(80).unwrap();

    heap.free(x);
    heap.free(y);
    heap.free(z);
    checked(&heap);

    assert_eq!(heap.allocate(80), Some(z));
    assert_eq!(heap.allocate(80), Some(y));
    assert_eq!(heap.allocate(80), Some(x));
    checked(&heap);
}

#[test]
fn top_class_uses_best_fit() {
    let mut heap = Heap::new();
    let a = heap.allocate(199_992).unwrap();
    let _s1 = heap.allocate(248).unwrap();
    let b = heap.allocate(99_992).unwrap();
    let _s2 = heap.allocate(248).unwrap();
    let c = heap.allocate(149_992).unwrap();
    let _s3 = heap.allocate(248).unwrap();
    assert_eq!(heap.block_size(a), Some(200_000));
    assert_eq!(heap.block_size(b), Some(100_000));
    assert_eq!(heap.block_size(c), Some(150_000));

    heap.free(a);
    heap.free(b);
    heap.free(c);
    checked(&heap);

    // All three sit in the top class; the smallest sufficient block wins
    // even though the head of the list (150 000) was freed last.
    assert_eq!(heap.allocate(90_000), Some(b));
    checked(&heap);
}

#[test]
fn reallocate_preserves_payload_prefix() {
    let mut heap = Heap::new();
    let p = heap.allocate(32).unwrap();
    heap.payload_mut(p).unwrap()[..32].fill(0xAB);

    let q = heap.reallocate(p, 200).unwrap();
    checked(&heap);
    assert!(heap.payload(q).unwrap()[..32].iter().all(|&b| b == 0xAB));
    assert_eq!(heap.is_allocated(p), Some(false));
    assert!(heap.usable_size(q).unwrap() >= 200);
}

#[test]
fn free_of_no_address_is_noop() {
    let mut heap = Heap::new();
    let before = heap.heap_bytes();
    heap.free(0);
    checked(&heap);
    assert_eq!(heap.heap_bytes(), before);
    assert_eq!(heap.live_blocks(), 0);
}

#[test]
fn every_requested_byte_is_writable() {
    let mut heap = Heap::new();
    for n in [1, 7, 8, 9, 12, 24, 28, 100, 255, 4096] {
        let p = heap.allocate(n).unwrap();
        let payload = heap.payload_mut(p).unwrap();
        assert!(payload.len() >= n, "usable span covers the request");
        payload[..n].fill(0x77);
        checked(&heap);
        heap.free(p);
        checked(&heap);
    }
}

#[test]
fn calloc_returns_zeroed_span() {
    let mut heap = Heap::new();
    // Dirty a block, free it, then calloc over the recycled bytes.
    let dirty = heap.allocate(96).unwrap();
    heap.payload_mut(dirty).unwrap().fill(0xEE);
    heap.free(dirty);

    let p = heap.calloc(12, 8).unwrap();
    checked(&heap);
    assert!(heap.image()[p..p + 96].iter().all(|&b| b == 0));
}

#[test]
fn churn_storm_keeps_invariants_and_payloads() {
    const OPS: usize = 20_000;
    const SLOTS: usize = 64;

    let mut heap = Heap::new();
    let mut rng = XorShift64::new(0xA5A5_5A5A_DEAD_BEEF);
    let mut slots: Vec<Option<(usize, usize, u8)>> = vec![None; SLOTS];
    let mut peak_live = 0usize;

    for op in 0..OPS {
        let idx = rng.gen_range(0, SLOTS - 1);
        let roll = rng.next_u64() % 100;
        match slots[idx].take() {
            None => {
                // Mostly small requests, occasionally top-class sized ones.
                let size = if roll < 90 {
                    rng.gen_range(1, 2000)
                } else {
                    rng.gen_range(66_000, 120_000)
                };
                let tag = (rng.next_u64() & 0xFF) as u8;
                if roll < 15 {
                    if let Some(p) = heap.calloc(size, 1) {
                        assert!(heap.payload(p).unwrap()[..size].iter().all(|&b| b == 0));
                        heap.payload_mut(p).unwrap()[..size].fill(tag);
                        slots[idx] = Some((p, size, tag));
                    }
                } else if let Some(p) = heap.allocate(size) {
                    heap.payload_mut(p).unwrap()[..size].fill(tag);
                    slots[idx] = Some((p, size, tag));
                }
            }
            Some((p, size, tag)) => {
                assert!(
                    heap.payload(p).unwrap()[..size].iter().all(|&b| b == tag),
                    "payload survived unrelated operations"
                );
                if roll < 70 {
                    heap.free(p);
                } else {
                    let new_size = rng.gen_range(1, 3000);
                    match heap.reallocate(p, new_size) {
                        Some(q) => {
                            let kept = size.min(new_size);
                            assert!(heap.payload(q).unwrap()[..kept]
                                .iter()
                                .all(|&b| b == tag));
                            heap.payload_mut(q).unwrap()[..new_size].fill(tag);
                            slots[idx] = Some((q, new_size, tag));
                        }
                        None => {
                            // new_size >= 1, so None can only mean the old
                            // block survived untouched.
                            slots[idx] = Some((p, size, tag));
                        }
                    }
                }
            }
        }

        let live = slots.iter().flatten().count();
        peak_live = peak_live.max(live);
        assert_eq!(heap.live_blocks(), live);
        if op % 128 == 0 {
            checked(&heap);
        }
    }
    checked(&heap);

    let snapshot = global_metrics().snapshot();
    let report = json!({
        "ops": OPS,
        "peak_live_blocks": peak_live,
        "final_heap_bytes": heap.heap_bytes(),
        "final_live_blocks": heap.live_blocks(),
        "metrics": snapshot,
    });
    let path = std::env::temp_dir().join("segfit_churn_report.json");
    fs::write(&path, serde_json::to_vec_pretty(&report).unwrap())
        .expect("churn report is writable");

    for slot in slots.iter_mut() {
        if let Some((p, _, _)) = slot.take() {
            heap.free(p);
        }
    }
    checked(&heap);
    assert_eq!(heap.live_blocks(), 0);
    assert_eq!(heap.allocated_bytes(), 0);
}
