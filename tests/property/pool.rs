//! Pool invariants over arbitrary rent/release sequences.

use std::collections::BTreeSet;

use chunkstream::{Chunk, ChunkPool};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    TryRent { clear: bool },
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => any::<bool>().prop_map(|clear| Op::TryRent { clear }),
        1 => (0usize..64).prop_map(Op::Release),
    ]
}

proptest! {
    /// No duplicate offsets while lent; the free set after every step is
    /// exactly the initial set minus the lent offsets; LIFO reuse holds.
    #[test]
    fn rent_release_preserves_the_free_set(
        chunk_count in 1usize..12,
        ops in prop::collection::vec(op_strategy(), 1..96)
    ) {
        let chunk_size = 16usize;
        let pool = ChunkPool::new(chunk_size, chunk_count).unwrap();
        let mut held: Vec<Chunk> = Vec::new();
        let mut lent_offsets: BTreeSet<u32> = BTreeSet::new();
        let mut last_released: Option<u32> = None;

        for op in ops {
            match op {
                Op::TryRent { clear } => match pool.try_rent(clear) {
                    Some(chunk) => {
                        let offset = chunk.pool_offset().unwrap();
                        prop_assert!(lent_offsets.insert(offset), "duplicate offset {offset}");
                        if let Some(expected) = last_released.take() {
                            prop_assert_eq!(offset, expected, "pool is not LIFO");
                        }
                        if clear {
                            prop_assert!(chunk.as_slice().iter().all(|&b| b == 0));
                        }
                        held.push(chunk);
                    }
                    None => prop_assert_eq!(held.len(), chunk_count),
                },
                Op::Release(i) => {
                    if !held.is_empty() {
                        let chunk = held.swap_remove(i % held.len());
                        let offset = chunk.pool_offset().unwrap();
                        lent_offsets.remove(&offset);
                        last_released = Some(offset);
                        pool.release(chunk).unwrap();
                    }
                }
            }
            prop_assert_eq!(pool.free_chunks(), chunk_count - held.len());
            prop_assert_eq!(pool.lent_chunks(), held.len());
        }

        for chunk in held.drain(..) {
            pool.release(chunk).unwrap();
        }
        prop_assert_eq!(pool.free_chunks(), chunk_count);
    }

    /// Rented chunk regions never alias: bytes written through one chunk
    /// stay intact while other chunks are rented, scribbled on, released.
    #[test]
    fn rented_regions_do_not_alias(
        fills in prop::collection::vec(any::<u8>(), 1..8)
    ) {
        let pool = ChunkPool::new(8, fills.len()).unwrap();
        let mut held = Vec::new();
        for &fill in &fills {
            let mut chunk = pool.try_rent(true).unwrap();
            chunk.as_mut_slice().fill(fill);
            held.push((chunk, fill));
        }
        for (chunk, fill) in &held {
            prop_assert!(chunk.as_slice().iter().all(|&b| b == *fill));
        }
        for (chunk, _) in held {
            pool.release(chunk).unwrap();
        }
    }
}
