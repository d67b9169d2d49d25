//! Slot-array rental strategy for the stream's sparse chunk array.
//!
//! The stream indexes its chunks through a growable `Vec<Option<Chunk>>`.
//! Where that vector's storage comes from is a pluggable strategy so a
//! bucketed pool can be substituted later; the default just allocates on
//! the heap with power-of-two rounding.

use std::iter;

use crate::chunk::Chunk;

/// Threshold above which requests are sized exactly instead of rounded up.
const EXACT_SIZE_THRESHOLD: usize = 1 << 30;

/// Strategy for renting and reclaiming slot arrays.
pub trait SlotArrayPool: Send + Sync {
    /// Returns an array of at least `min_len` slots, all `None`.
    ///
    /// Requests of `0` yield an empty array; requests above `2^30` are sized
    /// exactly; everything else is rounded up to the next power of two.
    fn acquire(&self, min_len: usize) -> Vec<Option<Chunk>>;

    /// Reclaims an array previously handed out by `acquire`.
    ///
    /// When `clear` is set, a reusing strategy must guarantee all slots are
    /// `None` before the array is handed out again.
    fn release(&self, slots: Vec<Option<Chunk>>, clear: bool);
}

/// Default strategy: fresh heap allocation per acquire, drop on release.
pub struct HeapSlotArrayPool;

impl SlotArrayPool for HeapSlotArrayPool {
    fn acquire(&self, min_len: usize) -> Vec<Option<Chunk>> {
        let len = if min_len == 0 {
            return Vec::new();
        } else if min_len > EXACT_SIZE_THRESHOLD {
            min_len
        } else {
            min_len.next_power_of_two()
        };
        iter::repeat_with(|| None).take(len).collect()
    }

    fn release(&self, slots: Vec<Option<Chunk>>, clear: bool) {
        if clear {
            debug_assert!(
                slots.iter().all(Option::is_none),
                "slot array released with live chunks"
            );
        }
        drop(slots);
    }
}
