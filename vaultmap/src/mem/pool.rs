/*
 * This file is part of vaultmap.
 *
 * vaultmap is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! The entry pool: a block-addressed arena of [`Entry<V>`] records.
//!
//! Entries never move and are never individually freed back to the
//! allocator — once a block is allocated it lives for the pool's
//! lifetime. A `u32` index addresses an entry as `(block, offset)`, and
//! blocks themselves are brought up lazily, one CAS into a fixed-size
//! block directory, the first time an index inside them is touched.
//! This keeps a cold, unused pool cheap: its directory is just a row of
//! null pointers until entries are actually allocated.

use super::entry::Entry;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Sentinel meaning "no entry" — the empty free-list tail and the
/// probe-miss return value.
pub(crate) const NULL_INDEX: u32 = u32::MAX;

/// Entries per block. A power of two so `(block, offset)` splits with
/// shifts and masks rather than division.
const BLOCK_LEN: usize = 4096;
const BLOCK_SHIFT: u32 = BLOCK_LEN.trailing_zeros();
const BLOCK_MASK: u32 = (BLOCK_LEN - 1) as u32;

/// Maximum number of blocks, sized so `blocks * BLOCK_LEN` comfortably
/// covers `u32::MAX` indices.
const MAX_BLOCKS: usize = (u32::MAX as usize / BLOCK_LEN) + 1;

assertions!(BLOCK_LEN.is_power_of_two());

pub(crate) struct EntryPool<V> {
    blocks: Box<[AtomicPtr<Entry<V>>]>,
    capacity: u32,
}

impl<V> EntryPool<V> {
    /// Builds a pool whose directory can address up to `capacity`
    /// entries; no blocks are allocated yet.
    pub(crate) fn new(capacity: u32) -> Self {
        let nblocks = (capacity as usize).div_ceil(BLOCK_LEN).max(1).min(MAX_BLOCKS);
        let mut blocks = Vec::with_capacity(nblocks);
        blocks.resize_with(nblocks, || AtomicPtr::new(std::ptr::null_mut()));
        Self {
            blocks: blocks.into_boxed_slice(),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Resolves an index to its entry, allocating the backing block on
    /// first touch. Returns `None` for `NULL_INDEX` or an out-of-range
    /// index.
    pub(crate) fn get(&self, index: u32) -> Option<&Entry<V>> {
        if index == NULL_INDEX || index >= self.capacity {
            return None;
        }
        let block_no = (index >> BLOCK_SHIFT) as usize;
        let offset = (index & BLOCK_MASK) as usize;
        let slot = &self.blocks[block_no];
        let mut ptr = slot.load(Ordering::Acquire);
        if ptr.is_null() {
            ptr = self.allocate_block(slot);
        }
        // SAFETY: `ptr` was produced by `allocate_block`/a prior winning
        // CAS and is never freed before `self` is dropped; `offset` is
        // `< BLOCK_LEN` by construction of the mask.
        Some(unsafe { &*ptr.add(offset) })
    }

    /// Lazily brings up the block backing `slot`, racing other callers
    /// with a single CAS; the loser's block is dropped.
    #[cold]
    fn allocate_block(&self, slot: &AtomicPtr<Entry<V>>) -> *mut Entry<V> {
        let mut fresh: Vec<Entry<V>> = Vec::with_capacity(BLOCK_LEN);
        fresh.resize_with(BLOCK_LEN, Entry::empty);
        let boxed = fresh.into_boxed_slice();
        let candidate = Box::into_raw(boxed) as *mut Entry<V>;
        match slot.compare_exchange(
            std::ptr::null_mut(),
            candidate,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => candidate,
            Err(existing) => {
                // SAFETY: `candidate` was never published, so reclaiming
                // it here is exclusive.
                unsafe {
                    drop(Box::from_raw(std::slice::from_raw_parts_mut(
                        candidate, BLOCK_LEN,
                    )));
                }
                existing
            }
        }
    }

    /// Index of the block a given index falls in, and how many indices a
    /// fully-allocated block spans; used by the table to iterate
    /// allocated regions for stats and drop.
    pub(crate) fn block_len() -> usize {
        BLOCK_LEN
    }
}

impl<V> Drop for EntryPool<V> {
    fn drop(&mut self) {
        for slot in self.blocks.iter() {
            let ptr = slot.load(Ordering::Relaxed);
            if !ptr.is_null() {
                // SAFETY: each non-null slot owns exactly one
                // `BLOCK_LEN`-element allocation produced by
                // `allocate_block`, and `&mut self` guarantees no
                // concurrent access remains.
                unsafe {
                    drop(Box::from_raw(std::slice::from_raw_parts_mut(
                        ptr, BLOCK_LEN,
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_and_null_are_none() {
        let pool: EntryPool<u32> = EntryPool::new(10);
        assert!(pool.get(NULL_INDEX).is_none());
        assert!(pool.get(10).is_none());
    }

    #[test]
    fn lazily_allocates_and_is_stable() {
        let pool: EntryPool<u32> = EntryPool::new(10);
        let a = pool.get(3).unwrap() as *const _;
        let b = pool.get(3).unwrap() as *const _;
        assert_eq!(a, b);
    }

    #[test]
    fn spans_multiple_blocks() {
        let capacity = (BLOCK_LEN as u32) * 2 + 5;
        let pool: EntryPool<u32> = EntryPool::new(capacity);
        assert!(pool.get(0).is_some());
        assert!(pool.get(BLOCK_LEN as u32).is_some());
        assert!(pool.get(capacity - 1).is_some());
        assert!(pool.get(capacity).is_none());
    }
}
