//! The pool under real thread contention.

use std::sync::Arc;
use std::thread;

use chunkstream::ChunkPool;

/// Many workers fight over a single 8-byte chunk, each spin-renting it,
/// incrementing a little-endian counter at offset 4, and releasing. The
/// mutex serializes every increment, so none are lost; afterwards the
/// chunk's link word still reads `-1` (it is the free-list tail).
#[test]
fn contended_single_chunk_increments_are_not_lost() {
    const WORKERS: usize = 8;
    const INCREMENTS_PER_WORKER: usize = 125;

    let pool = Arc::new(ChunkPool::new(8, 1).unwrap());

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..INCREMENTS_PER_WORKER {
                    let mut chunk = loop {
                        match pool.try_rent(false) {
                            Some(chunk) => break chunk,
                            None => std::hint::spin_loop(),
                        }
                    };
                    let counter =
                        i32::from_le_bytes(chunk.as_slice()[4..8].try_into().unwrap());
                    chunk.as_mut_slice()[4..8]
                        .copy_from_slice(&(counter + 1).to_le_bytes());
                    pool.release(chunk).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let chunk = pool.try_rent(false).unwrap();
    let link = i32::from_le_bytes(chunk.as_slice()[0..4].try_into().unwrap());
    let counter = i32::from_le_bytes(chunk.as_slice()[4..8].try_into().unwrap());
    assert_eq!(link, -1, "sole chunk must be the free-list tail");
    assert_eq!(counter, (WORKERS * INCREMENTS_PER_WORKER) as i32);
    pool.release(chunk).unwrap();
}

/// Exhaustion under contention: with one pool chunk and two rent calls per
/// worker held simultaneously, the second is always a zeroed heap chunk.
#[test]
fn contended_exhaustion_falls_back_to_heap() {
    let pool = Arc::new(ChunkPool::new(8, 1).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..50 {
                    let first = pool.rent(false);
                    let second = pool.rent(false);
                    // At most one of the two can come from the buffer.
                    assert!(second.is_from_heap() || first.is_from_heap());
                    if second.is_from_heap() {
                        assert!(second.as_slice().iter().all(|&b| b == 0));
                    }
                    pool.release(second).unwrap();
                    pool.release(first).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.lent_chunks(), 0);
    assert_eq!(pool.free_chunks(), 1);
}
