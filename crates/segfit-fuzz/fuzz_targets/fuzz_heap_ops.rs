#![no_main]
use libfuzzer_sys::fuzz_target;
use segfit::Heap;

// Interpret the input as a stream of allocate/free/reallocate/calloc
// operations and verify the heap stays consistent throughout.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let mut heap = Heap::new();
    let mut live: Vec<usize> = Vec::new();

    for (round, chunk) in data.chunks(4).enumerate() {
        if chunk.len() < 4 {
            break;
        }
        let op = chunk[0] % 4;
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let pick = chunk[3] as usize;

        match op {
            0 => {
                if let Some(p) = heap.allocate(size) {
                    live.push(p);
                }
            }
            1 => {
                if !live.is_empty() {
                    let p = live.swap_remove(pick % live.len());
                    heap.free(p);
                }
            }
            2 => {
                if !live.is_empty() {
                    let idx = pick % live.len();
                    match heap.reallocate(live[idx], size) {
                        Some(q) => live[idx] = q,
                        None if size == 0 => {
                            live.swap_remove(idx);
                        }
                        None => {}
                    }
                }
            }
            _ => {
                if let Some(p) = heap.calloc(size.min(1024), 4) {
                    live.push(p);
                }
            }
        }

        if round % 64 == 0 {
            heap.check_heap().expect("heap invariants hold mid-stream");
        }
    }

    for p in live {
        heap.free(p);
    }
    heap.check_heap().expect("heap invariants hold after teardown");
});
