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

//! The tagged free list: an intrusive, lock-free stack of free entry
//! indices. The tag word defeats ABA on the head CAS — it increments on
//! every push and every successful pop, so a thread that read the head,
//! computed `next`, and got preempted cannot be fooled by a concurrent
//! pop-then-push that restores the same index with a different history.

use super::{entry::Entry, pool::NULL_INDEX, CachePadded};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, PartialEq, Eq)]
struct Head {
    index: u32,
    tag: u32,
}

impl Head {
    #[inline(always)]
    fn pack(self) -> u64 {
        ((self.tag as u64) << 32) | self.index as u64
    }

    #[inline(always)]
    fn unpack(word: u64) -> Self {
        Self {
            index: word as u32,
            tag: (word >> 32) as u32,
        }
    }
}

pub(crate) struct FreeList {
    head: CachePadded<AtomicU64>,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicU64::new(
                Head {
                    index: NULL_INDEX,
                    tag: 0,
                }
                .pack(),
            )),
        }
    }

    /// Pops one free index, or `None` if the list is empty.
    pub(crate) fn pop<V>(&self, index_to_entry: impl Fn(u32) -> Option<*const Entry<V>>) -> Option<u32> {
        loop {
            let old = Head::unpack(self.head.load(Ordering::Acquire));
            if old.index == NULL_INDEX {
                return None;
            }
            // SAFETY: `old.index` just came off the free list's head, so it
            // addresses a live entry whose `free_next` is meaningful.
            let next = unsafe {
                let entry = index_to_entry(old.index).expect("free-list index must resolve");
                (*entry).free_next.load(Ordering::Acquire)
            };
            let new = Head {
                index: next,
                tag: old.tag.wrapping_add(1),
            };
            if self
                .head
                .compare_exchange_weak(old.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(old.index);
            }
        }
    }

    /// Pushes a single free index onto the list.
    pub(crate) fn push_one<V>(&self, index: u32, entry: &Entry<V>) {
        self.push_chain(index, index, entry, entry)
    }

    /// Splices an already-linked chain `[head ..= tail]` onto the list in
    /// one CAS; `tail_entry.free_next` is wired to the previous head.
    pub(crate) fn push_chain<V>(&self, head: u32, tail: u32, _head_entry: &Entry<V>, tail_entry: &Entry<V>) {
        loop {
            let old = Head::unpack(self.head.load(Ordering::Acquire));
            tail_entry.free_next.store(old.index, Ordering::Release);
            let new = Head {
                index: head,
                tag: old.tag.wrapping_add(1),
            };
            if self
                .head
                .compare_exchange_weak(old.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::Ordering as O, Arc};
    use std::thread;

    fn entries(n: usize) -> Vec<Entry<u32>> {
        (0..n).map(|_| Entry::empty()).collect()
    }

    #[test]
    fn pop_empty_is_none() {
        let list = FreeList::new();
        let es: Vec<Entry<u32>> = entries(1);
        assert!(list.pop::<u32>(|i| es.get(i as usize).map(|e| e as *const _)).is_none());
    }

    #[test]
    fn push_then_pop_round_trips() {
        let list = FreeList::new();
        let es = entries(4);
        for i in (0..4u32).rev() {
            list.push_one(i, &es[i as usize]);
        }
        let lookup = |i: u32| es.get(i as usize).map(|e| e as *const _);
        let mut seen = vec![];
        while let Some(i) = list.pop::<u32>(lookup) {
            seen.push(i);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn chain_splice_preserves_order() {
        let list = FreeList::new();
        let es = entries(3);
        es[0].free_next.store(1, O::Relaxed);
        es[1].free_next.store(2, O::Relaxed);
        list.push_chain(0, 2, &es[0], &es[2]);
        let lookup = |i: u32| es.get(i as usize).map(|e| e as *const _);
        assert_eq!(list.pop::<u32>(lookup), Some(0));
        assert_eq!(list.pop::<u32>(lookup), Some(1));
        assert_eq!(list.pop::<u32>(lookup), Some(2));
        assert_eq!(list.pop::<u32>(lookup), None);
    }

    #[test]
    fn concurrent_push_pop_never_duplicates_or_loses() {
        const N: usize = 2_000;
        let list = Arc::new(FreeList::new());
        let es: Arc<Vec<Entry<u32>>> = Arc::new(entries(N));
        for i in (0..N as u32).rev() {
            list.push_one(i, &es[i as usize]);
        }
        let popped: Arc<std::sync::Mutex<Vec<u32>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let list = list.clone();
                let es = es.clone();
                let popped = popped.clone();
                thread::spawn(move || {
                    let lookup = |i: u32| es.get(i as usize).map(|e| e as *const _);
                    let mut local = vec![];
                    while let Some(i) = list.pop::<u32>(lookup) {
                        local.push(i);
                    }
                    popped.lock().unwrap().extend(local);
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let mut all = popped.lock().unwrap().clone();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), N);
    }
}
