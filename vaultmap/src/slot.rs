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

//! The hold/release protocol: the single-CAS mutual-exclusion mechanism
//! guarding one entry occurrence while a callback runs.
//!
//! A [`Hold`] is a short-lived guard. Acquiring one zeroes the entry's
//! fingerprint `x` word, which doubles as "this occurrence is currently
//! exclusive to me" for every other thread walking the same probe list.
//! Dropping a `Hold` restores `x` — unless the holder vacated the entry
//! first, in which case `x` stays zero forever and the occurrence is
//! retired to the free list by the caller.

use crate::fingerprint::Fingerprint;
use crate::mem::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bound on hold-acquisition spin attempts before giving up and
/// reporting the slot as a transient miss.
const MAX_SPIN: u32 = 1 << 20;

/// An exclusive, temporary claim on one entry occurrence.
pub(crate) struct Hold<'a, V> {
    entry: &'a Entry<V>,
    restore_x: u64,
    vacated: bool,
}

impl<'a, V> Hold<'a, V> {
    /// Reads the held value.
    ///
    /// # Safety
    /// Valid exactly while this guard is alive and the entry has not
    /// been vacated through it.
    pub(crate) unsafe fn value(&self) -> &V {
        unsafe { self.entry.value_ref() }
    }

    /// Mutates the held value in place.
    ///
    /// # Safety
    /// See [`Self::value`].
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn value_mut(&self) -> &mut V {
        unsafe { self.entry.value_mut() }
    }

    pub(crate) fn set_deadline(&self, deadline_ms: u64) {
        self.entry.deadline_ms.store(deadline_ms, Ordering::Release);
    }

    pub(crate) fn deadline(&self) -> u64 {
        self.entry.deadline_ms.load(Ordering::Acquire)
    }

    /// The underlying entry, for splicing its index back onto the free
    /// list once this guard has vacated it.
    pub(crate) fn entry(&self) -> &'a Entry<V> {
        self.entry
    }

    /// Tears the entry down: takes the value out, zeros its identity,
    /// and marks this guard so `x` is never restored on drop. The
    /// caller is responsible for clearing the owning bucket slot and
    /// returning the index to the free list.
    pub(crate) fn vacate(mut self) -> V {
        // SAFETY: held entries were always previously written via
        // `write_value` at install time.
        let value = unsafe { self.entry.take_value() };
        self.entry.y.store(0, Ordering::Release);
        self.entry.deadline_ms.store(0, Ordering::Relaxed);
        self.vacated = true;
        value
    }
}

impl<'a, V> Drop for Hold<'a, V> {
    fn drop(&mut self) {
        if self.vacated {
            return;
        }
        release(self.entry, self.restore_x);
    }
}

/// Outcome of a failed hold attempt, distinguishing "keep looking
/// elsewhere" reasons a caller may want to react to differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HoldMiss {
    /// The occurrence now belongs to a different fingerprint.
    Reused,
    /// The occurrence was vacated (expired, deleted, or never matched).
    Vacated,
    /// Spin budget exhausted under contention; counted in `escapes`.
    Escaped,
}

/// Attempts to acquire exclusive access to `entry`, which the caller
/// believes currently holds `target`.
pub(crate) fn try_hold<'a, V>(
    entry: &'a Entry<V>,
    target: Fingerprint,
    escapes: &AtomicU64,
) -> Result<Hold<'a, V>, HoldMiss> {
    for attempt in 0..MAX_SPIN {
        match entry
            .x
            .compare_exchange(target.x, 0, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                let y = entry.y.load(Ordering::Acquire);
                if y == target.y && y != 0 {
                    return Ok(Hold {
                        entry,
                        restore_x: target.x,
                        vacated: false,
                    });
                }
                // the fingerprint we just zeroed doesn't actually match
                // (a race slipped between the caller's read and our
                // CAS) — restore and report a miss rather than a hold.
                entry.x.store(target.x, Ordering::Release);
                return Err(HoldMiss::Reused);
            }
            Err(observed) => {
                if observed != target.x && observed != 0 {
                    return Err(HoldMiss::Reused);
                }
                if observed == 0 && entry.y.load(Ordering::Acquire) == 0 {
                    return Err(HoldMiss::Vacated);
                }
                spin_wait(attempt);
            }
        }
    }
    escapes.fetch_add(1, Ordering::Relaxed);
    Err(HoldMiss::Escaped)
}

/// Wraps an entry whose `x` the caller has already zeroed by
/// construction (the fresh-install path: a new entry is populated with
/// `x = 0` before its index is ever published into a slot, so the
/// installing thread is implicitly the sole holder from the moment the
/// slot CAS succeeds).
///
/// # Safety
/// The caller must guarantee `entry.x` is currently `0` and that no
/// other thread can believe it holds this occurrence.
pub(crate) unsafe fn assume_held<V>(entry: &Entry<V>, restore_x: u64) -> Hold<'_, V> {
    Hold {
        entry,
        restore_x,
        vacated: false,
    }
}

/// Attempts to hold whatever occurrence is currently sitting in
/// `entry`, snapshotting its fingerprint first. Used by TTL reclamation,
/// which doesn't have a caller-supplied target to match against — it
/// just wants exclusive access to whatever is there right now. Returns
/// `None` if the entry is already empty or mid-transition.
pub(crate) fn try_hold_current<'a, V>(entry: &'a Entry<V>, escapes: &AtomicU64) -> Option<Hold<'a, V>> {
    let x0 = entry.x.load(Ordering::Acquire);
    if x0 == 0 {
        return None;
    }
    let y0 = entry.y.load(Ordering::Acquire);
    if y0 == 0 {
        return None;
    }
    try_hold(entry, Fingerprint { x: x0, y: y0 }, escapes).ok()
}

/// Restores `x` to `restore_x`, but only while the entry is still live
/// (`y != 0`) — if it was vacated while held, there's nothing to
/// restore.
fn release<V>(entry: &Entry<V>, restore_x: u64) {
    loop {
        if entry.y.load(Ordering::Acquire) == 0 {
            return;
        }
        match entry
            .x
            .compare_exchange(0, restore_x, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return,
            Err(_) => continue,
        }
    }
}

/// A mix of a short sleep and a voluntary yield, escalating slightly
/// under sustained contention. The exact discipline is a tuning knob,
/// not a correctness requirement.
#[inline]
fn spin_wait(attempt: u32) {
    if attempt % 4 == 0 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_micros(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(x: u64, y: u64) -> Fingerprint {
        Fingerprint { x, y }
    }

    #[test]
    fn hold_then_release_restores_x() {
        let entry: Entry<u32> = Entry::empty();
        unsafe { entry.write_value(7) };
        entry.x.store(100, Ordering::Relaxed);
        entry.y.store(200, Ordering::Relaxed);
        let escapes = AtomicU64::new(0);
        {
            let h = try_hold(&entry, fp(100, 200), &escapes).unwrap();
            assert_eq!(unsafe { *h.value() }, 7);
        }
        assert_eq!(entry.x.load(Ordering::Relaxed), 100);
        assert_eq!(escapes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn vacate_zeroes_y_and_skips_restore() {
        let entry: Entry<u32> = Entry::empty();
        unsafe { entry.write_value(9) };
        entry.x.store(5, Ordering::Relaxed);
        entry.y.store(6, Ordering::Relaxed);
        let escapes = AtomicU64::new(0);
        let h = try_hold(&entry, fp(5, 6), &escapes).unwrap();
        let v = h.vacate();
        assert_eq!(v, 9);
        assert_eq!(entry.x.load(Ordering::Relaxed), 0);
        assert_eq!(entry.y.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn mismatched_x_is_reused() {
        let entry: Entry<u32> = Entry::empty();
        entry.x.store(1, Ordering::Relaxed);
        entry.y.store(2, Ordering::Relaxed);
        let escapes = AtomicU64::new(0);
        assert_eq!(try_hold(&entry, fp(99, 2), &escapes).unwrap_err(), HoldMiss::Reused);
    }

    #[test]
    fn vacated_entry_is_reported() {
        let entry: Entry<u32> = Entry::empty();
        let escapes = AtomicU64::new(0);
        assert_eq!(try_hold(&entry, fp(1, 2), &escapes).unwrap_err(), HoldMiss::Vacated);
    }
}
