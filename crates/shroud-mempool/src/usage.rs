//! Coarse heap-usage accounting for the pool's side structures.
//!
//! Mirrors the allocator-rounding style of accounting used elsewhere in the
//! node: an exact byte count is not required, a stable estimate is.

use std::mem;

/// Round an allocation up to the typical allocator bucket.
pub fn malloc_usage(alloc: usize) -> usize {
    if alloc == 0 {
        0
    } else {
        alloc.div_ceil(16) * 16
    }
}

/// Estimated heap usage of an ordered map with `len` entries.
pub fn btree_map_usage<K, V>(len: usize) -> usize {
    // Node overhead approximated as three pointers per entry.
    len * malloc_usage(mem::size_of::<K>() + mem::size_of::<V>() + 3 * mem::size_of::<usize>())
}

/// Estimated heap usage of an ordered set with `len` entries.
pub fn btree_set_usage<T>(len: usize) -> usize {
    btree_map_usage::<T, ()>(len)
}

/// Estimated heap usage of a hash map with `len` entries.
pub fn hash_map_usage<K, V>(len: usize) -> usize {
    malloc_usage(len * (mem::size_of::<K>() + mem::size_of::<V>() + mem::size_of::<usize>()))
}

/// Estimated heap usage of a vector with the given capacity.
pub fn vec_usage<T>(capacity: usize) -> usize {
    malloc_usage(capacity * mem::size_of::<T>())
}
