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

//! The entry (node) record.
//!
//! The reference layout reinterprets the leading bytes of a vacant node
//! as a tagged-link cell for the free list. Doing that in safe Rust would
//! mean transmuting a `union`-like memory region; instead a vacant
//! node's "next free index" gets its own dedicated field. It is never
//! read while the node is reachable from a bucket slot, so it costs
//! nothing but four spare bytes per node.

use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicU32, AtomicU64},
};

/// A pool-resident, fixed-size entry record.
///
/// `x` and `y` together are the entry's fingerprint and the substrate of
/// the hold/release protocol (see [`crate::slot`]). `deadline_ms` is the
/// absolute TTL deadline (`0` = never expires). `value` holds the
/// caller's data once installed; it is valid exactly while the entry is
/// reachable from a bucket slot or is being constructed/torn down under
/// an exclusive hold.
pub(crate) struct Entry<V> {
    pub(crate) x: AtomicU64,
    pub(crate) y: AtomicU64,
    pub(crate) deadline_ms: AtomicU64,
    pub(crate) free_next: AtomicU32,
    value: UnsafeCell<MaybeUninit<V>>,
}

// SAFETY: access to `value` is always gated by the hold protocol (x == 0
// grants exclusive access to exactly one thread) or by free-list
// ownership (the node is reachable from no bucket slot and its value
// slot is never read). `V: Send` is enough to ship values across threads
// under that external synchronization; we never hand out concurrent
// `&mut` without holding.
unsafe impl<V: Send> Sync for Entry<V> {}

impl<V> Entry<V> {
    pub(crate) fn empty() -> Self {
        Self {
            x: AtomicU64::new(0),
            y: AtomicU64::new(0),
            deadline_ms: AtomicU64::new(0),
            free_next: AtomicU32::new(super::NULL_INDEX),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Writes a fresh value into the node. Caller must guarantee
    /// exclusive access (the node is not yet reachable from any bucket
    /// slot, or is reachable but currently held by this thread).
    ///
    /// # Safety
    /// The previous contents of `value`, if any, must already have been
    /// logically retired (dropped or moved out) — this does not drop the
    /// old value.
    pub(crate) unsafe fn write_value(&self, v: V) {
        unsafe {
            (*self.value.get()).write(v);
        }
    }

    /// Reads the value by shared reference. Caller must guarantee the
    /// node is currently held (or otherwise exclusively owned by this
    /// thread) and was previously initialized via [`Self::write_value`].
    ///
    /// # Safety
    /// See above: requires a prior `write_value` with no intervening
    /// `take_value`/drop.
    pub(crate) unsafe fn value_ref(&self) -> &V {
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    /// Reads the value by exclusive reference. Same preconditions as
    /// [`Self::value_ref`].
    ///
    /// # Safety
    /// See [`Self::value_ref`].
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn value_mut(&self) -> &mut V {
        unsafe { (*self.value.get()).assume_init_mut() }
    }

    /// Moves the value out, leaving the slot logically uninitialized.
    /// Caller must guarantee exclusive access and a prior `write_value`.
    ///
    /// # Safety
    /// See [`Self::value_ref`]; additionally, the caller must not call
    /// this, `value_ref`, or `value_mut` again before the next
    /// `write_value`.
    pub(crate) unsafe fn take_value(&self) -> V {
        unsafe { (*self.value.get()).assume_init_read() }
    }
}
