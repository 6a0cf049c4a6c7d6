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

//! The operation engine: `add`, `get`, `delete`, and the `stats` report,
//! wired on top of the entry pool, free list, probe geometry, and slot
//! protocol.

use crate::config::Config;
use crate::error::{CreateError, KeyLengthError};
use crate::fingerprint::{DefaultFingerprinter, Fingerprint, FingerprintSource};
use crate::hooks::{AddHook, DelHook, DupHook, GetHook, HookSet, TtlHook, TtlInstruction};
use crate::mem::{CachePadded, Entry, EntryPool, FreeList, NULL_INDEX};
use crate::probe::{probe_both, MIN_OVERFLOW, NSEAT};
use crate::slot::{self, Hold, HoldMiss};
use crate::stats::{GlobalCounters, StatsSnapshot, TableCounters};

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Which of the three bucket arrays a candidate slot lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableId {
    Primary1,
    Primary2,
    Overflow,
}

struct Bucket {
    slots: Box<[AtomicU32]>,
}

impl Bucket {
    fn new(len: u32) -> Self {
        let mut v = Vec::with_capacity(len as usize);
        v.resize_with(len as usize, || AtomicU32::new(NULL_INDEX));
        Self {
            slots: v.into_boxed_slice(),
        }
    }

    fn len(&self) -> u32 {
        self.slots.len() as u32
    }
}

/// Outcome of [`HashVault::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A fresh entry was installed.
    Inserted,
    /// A matching fingerprint already existed; the duplicate hook ran.
    Duplicate,
    /// All 32 primary seats and 64 overflow slots were occupied by
    /// other fingerprints.
    NoSeat,
    /// The entry pool's block directory is exhausted.
    OutOfMemory,
}

/// Outcome of [`HashVault::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetOutcome {
    Found,
    NotFound,
}

/// Outcome of [`HashVault::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// At least one matching entry was removed.
    Removed,
    NotFound,
}

/// A fixed-capacity, lock-free, TTL-aware concurrent hash table.
///
/// `V` is the caller's value type; `F` supplies the fingerprint
/// function, defaulting to [`DefaultFingerprinter`].
pub struct HashVault<V, F = DefaultFingerprinter> {
    fingerprinter: F,
    pool: EntryPool<V>,
    free: FreeList,
    next_free_index: CachePadded<AtomicU32>,
    t1: Bucket,
    t2: Bucket,
    ov: Bucket,
    c1: TableCounters,
    c2: TableCounters,
    cov: TableCounters,
    global: GlobalCounters,
    hooks: HookSet<V>,
    reset_ttl_ms: u64,
    created_at: Instant,
}

fn pool_capacity(max_entries: u64) -> u32 {
    max_entries.max(2).next_power_of_two().min(u32::MAX as u64) as u32
}

impl<V> HashVault<V, DefaultFingerprinter> {
    /// Brings up a table using the default fingerprint function.
    pub fn new(config: Config) -> Result<Self, CreateError> {
        Self::with_fingerprinter(config, DefaultFingerprinter)
    }
}

impl<V, F: FingerprintSource> HashVault<V, F> {
    /// Brings up a table with a caller-supplied fingerprint function.
    pub fn with_fingerprinter(config: Config, fingerprinter: F) -> Result<Self, CreateError>
    where
        V: 'static,
    {
        let (nb1, nb2) = config.table_sizes()?;
        let capacity = pool_capacity(config.max_entries());
        log::debug!(
            "vaultmap: bringing up table max_entries={} nb1={} nb2={} pool_capacity={}",
            config.max_entries(),
            nb1,
            nb2,
            capacity,
        );
        Ok(Self {
            fingerprinter,
            pool: EntryPool::new(capacity),
            free: FreeList::new(),
            next_free_index: CachePadded::new(AtomicU32::new(0)),
            t1: Bucket::new(nb1),
            t2: Bucket::new(nb2),
            ov: Bucket::new(MIN_OVERFLOW),
            c1: TableCounters::new(),
            c2: TableCounters::new(),
            cov: TableCounters::new(),
            global: GlobalCounters::new(),
            hooks: HookSet::default(),
            reset_ttl_ms: config.reset_ttl_ms(),
            created_at: Instant::now(),
        })
    }

    /// Overrides any subset of the five hooks; `None` keeps whatever is
    /// currently registered (the documented default the first time this
    /// is called). Meant to run once at setup time, before the table is
    /// shared across threads.
    pub fn register_hooks(
        &mut self,
        on_ttl: Option<Box<dyn TtlHook<V>>>,
        on_add: Option<Box<dyn AddHook<V>>>,
        on_dup: Option<Box<dyn DupHook<V>>>,
        on_get: Option<Box<dyn GetHook<V>>>,
        on_del: Option<Box<dyn DelHook<V>>>,
    ) {
        if let Some(h) = on_ttl {
            self.hooks.on_ttl = h;
        }
        if let Some(h) = on_add {
            self.hooks.on_add = h;
        }
        if let Some(h) = on_dup {
            self.hooks.on_dup = h;
        }
        if let Some(h) = on_get {
            self.hooks.on_get = h;
        }
        if let Some(h) = on_del {
            self.hooks.on_del = h;
        }
    }

    fn now_ms(&self) -> u64 {
        self.created_at.elapsed().as_millis() as u64
    }

    /// Resolves a `(key_bytes, key_len)` pair under the `key_len == 0`
    /// "this is already a fingerprint image" convention shared by every
    /// C-ABI-flavored operation in §6: negative lengths are always
    /// rejected, a zero length demands an exact [`crate::fingerprint::IMAGE_LEN`]-byte
    /// image, and any other length hashes exactly that many leading
    /// bytes of `key_bytes` through the configured fingerprinter.
    ///
    /// This is the seam [`crate::compat`] hangs its raw, integer-coded
    /// operations off of; the ergonomic `&[u8]`-keyed methods below
    /// always pass the full slice with an implicit non-zero length.
    pub(crate) fn resolve_fingerprint(
        &self,
        key_bytes: &[u8],
        key_len: i64,
    ) -> Result<Fingerprint, KeyLengthError> {
        if key_len < 0 {
            return Err(KeyLengthError::NegativeLength);
        }
        if key_len == 0 {
            return Fingerprint::from_image(key_bytes).ok_or(KeyLengthError::BadFingerprintImage);
        }
        let slice = key_bytes
            .get(..key_len as usize)
            .ok_or(KeyLengthError::BadFingerprintImage)?;
        Ok(self.fingerprinter.fingerprint(slice))
    }

    fn resolve(&self, table: TableId) -> (&Bucket, &TableCounters) {
        match table {
            TableId::Primary1 => (&self.t1, &self.c1),
            TableId::Primary2 => (&self.t2, &self.c2),
            TableId::Overflow => (&self.ov, &self.cov),
        }
    }

    /// The fixed, deterministic candidate-slot sequence for a
    /// fingerprint: the 32 primary seats (16 per table) followed by all
    /// 64 overflow slots, scanned linearly in every operation.
    fn candidates(&self, fp: Fingerprint) -> [(TableId, u32); NSEAT + MIN_OVERFLOW as usize] {
        let (row1, row2) = probe_both(fp, self.t1.len(), self.t2.len());
        let mut out = [(TableId::Overflow, 0u32); NSEAT + MIN_OVERFLOW as usize];
        for (i, idx) in row1.into_iter().enumerate() {
            out[i] = (TableId::Primary1, idx);
        }
        for (i, idx) in row2.into_iter().enumerate() {
            out[row1.len() + i] = (TableId::Primary2, idx);
        }
        for i in 0..MIN_OVERFLOW {
            out[NSEAT + i as usize] = (TableId::Overflow, i);
        }
        out
    }

    /// Acquires a fresh entry index, popping the free list or bringing
    /// up a new block's worth of entries and splicing them in. Returns
    /// `None` once the pool's directory is exhausted.
    fn acquire_entry(&self) -> Option<u32> {
        loop {
            if let Some(i) = self.free.pop::<V>(|idx| self.pool.get(idx).map(|e| e as *const _)) {
                return Some(i);
            }
            let block_len = EntryPool::<V>::block_len() as u32;
            loop {
                let old = self.next_free_index.load(Ordering::Acquire);
                if old >= self.pool.capacity() {
                    return None;
                }
                let claim = block_len.min(self.pool.capacity() - old);
                let new = old + claim;
                if self
                    .next_free_index
                    .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    log::trace!("vaultmap: allocating entry block [{}, {})", old, new);
                    let tail = new - 1;
                    for i in old..new {
                        let entry = self.pool.get(i).expect("claimed index must resolve");
                        let next = if i == tail { NULL_INDEX } else { i + 1 };
                        entry.free_next.store(next, Ordering::Release);
                    }
                    let head_entry = self.pool.get(old).unwrap();
                    let tail_entry = self.pool.get(tail).unwrap();
                    self.free.push_chain(old, tail, head_entry, tail_entry);
                    break;
                }
            }
        }
    }

    /// Checks an occupied candidate's TTL, opportunistically reclaiming
    /// it if expired. Returns `true` if the caller should move on to
    /// the next candidate (the entry was expired-and-handled, or
    /// isn't currently observable), `false` if it's still live and
    /// normal fingerprint matching should proceed.
    fn reclaim_if_expired(
        &self,
        entry: &Entry<V>,
        slot: &AtomicU32,
        cur_index: u32,
        counters: &TableCounters,
        now: u64,
        stash: &mut Option<u32>,
    ) -> bool {
        let deadline = entry.deadline_ms.load(Ordering::Acquire);
        if deadline == 0 || deadline > now {
            return false;
        }
        let hold = match slot::try_hold_current(entry, &self.global.escapes) {
            Some(h) => h,
            None => return false,
        };
        if hold.deadline() == 0 || hold.deadline() > now {
            drop(hold);
            return false;
        }
        if slot
            .compare_exchange(cur_index, NULL_INDEX, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            drop(hold);
            return true;
        }
        counters.ncur.fetch_sub(1, Ordering::Relaxed);
        let value = hold.vacate();
        self.global.expires.fetch_add(1, Ordering::Relaxed);
        log::trace!("vaultmap: reclaimed expired entry at index {}", cur_index);
        if stash.is_none() {
            *stash = Some(cur_index);
        } else {
            self.free.push_one(cur_index, entry);
        }
        self.hooks.on_ttl.on_ttl(value);
        true
    }

    /// Applies a hook's [`TtlInstruction`] to a held entry: removes it,
    /// resets/extends its deadline, or leaves it untouched.
    fn apply_instruction(
        &self,
        hold: Hold<'_, V>,
        inst: TtlInstruction,
        now: u64,
        slot: &AtomicU32,
        cur_index: u32,
        counters: &TableCounters,
    ) {
        match inst {
            TtlInstruction::Remove => {
                let entry = hold.entry();
                let _ = slot.compare_exchange(cur_index, NULL_INDEX, Ordering::AcqRel, Ordering::Acquire);
                counters.ncur.fetch_sub(1, Ordering::Relaxed);
                let _ = hold.vacate();
                self.free.push_one(cur_index, entry);
            }
            TtlInstruction::ResetTtl => hold.set_deadline(now + self.reset_ttl_ms),
            TtlInstruction::DontChange => {}
            TtlInstruction::SetTtlMs(n) => hold.set_deadline(now + n),
        }
    }

    /// `add`: install a fresh entry, or route to the duplicate hook if
    /// a matching fingerprint is already present.
    pub fn add(&self, key: &[u8], value: V, initial_ttl_ms: u64) -> AddOutcome {
        self.add_with(key, value, initial_ttl_ms, None)
    }

    /// `add`, with a per-call override for the duplicate hook.
    pub fn add_with(
        &self,
        key: &[u8],
        value: V,
        initial_ttl_ms: u64,
        dup_override: Option<&dyn DupHook<V>>,
    ) -> AddOutcome {
        let fp = self.fingerprinter.fingerprint(key);
        self.add_fp(fp, value, initial_ttl_ms, dup_override)
    }

    /// Same as [`Self::add_with`], for a fingerprint already resolved by
    /// the caller (the `key_len == 0` convention in [`crate::compat`]).
    pub(crate) fn add_fp(
        &self,
        fp: Fingerprint,
        value: V,
        initial_ttl_ms: u64,
        dup_override: Option<&dyn DupHook<V>>,
    ) -> AddOutcome {
        let now = self.now_ms();
        let candidates = self.candidates(fp);
        let dup_hook: &dyn DupHook<V> = dup_override.unwrap_or(self.hooks.on_dup.as_ref());

        let mut stash: Option<u32> = None;

        for &(table, idx) in candidates.iter() {
            let (bucket, counters) = self.resolve(table);
            let slot = &bucket.slots[idx as usize];
            let cur = slot.load(Ordering::Acquire);
            if cur == NULL_INDEX {
                continue;
            }
            let entry = match self.pool.get(cur) {
                Some(e) => e,
                None => continue,
            };
            if self.reclaim_if_expired(entry, slot, cur, counters, now, &mut stash) {
                continue;
            }
            if entry.y.load(Ordering::Relaxed) != fp.y {
                continue;
            }
            match slot::try_hold(entry, fp, &self.global.escapes) {
                Ok(hold) => {
                    if slot.load(Ordering::Acquire) != cur {
                        // slot changed under us between the read above and the
                        // hold; treat as a miss rather than acting on stale data.
                        continue;
                    }
                    // SAFETY: held exclusively.
                    let existing = unsafe { hold.value_mut() };
                    let inst = dup_hook.on_dup(existing, value);
                    counters.ndup.fetch_add(1, Ordering::Relaxed);
                    self.apply_instruction(hold, inst, now, slot, cur, counters);
                    if let Some(s) = stash.take() {
                        self.free.push_one(s, self.pool.get(s).unwrap());
                    }
                    return AddOutcome::Duplicate;
                }
                Err(HoldMiss::Escaped) => continue,
                Err(_) => continue,
            }
        }

        let ni = match stash.take() {
            Some(i) => i,
            None => match self.acquire_entry() {
                Some(i) => i,
                None => {
                    self.global.add_nomem.fetch_add(1, Ordering::Relaxed);
                    log::warn!("vaultmap: add failed, entry pool exhausted");
                    return AddOutcome::OutOfMemory;
                }
            },
        };
        let entry = self.pool.get(ni).expect("acquired index must resolve");
        // SAFETY: `ni` just came off the free list or a fresh block; no
        // value is resident.
        unsafe { entry.write_value(value) };
        entry.y.store(fp.y, Ordering::Release);
        entry.deadline_ms.store(
            if initial_ttl_ms > 0 { now + initial_ttl_ms } else { 0 },
            Ordering::Release,
        );
        entry.x.store(0, Ordering::Release);

        for &(table, idx) in candidates.iter() {
            let (bucket, counters) = self.resolve(table);
            let slot = &bucket.slots[idx as usize];
            if slot
                .compare_exchange(NULL_INDEX, ni, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                counters.ncur.fetch_add(1, Ordering::Relaxed);
                // SAFETY: we are the sole thread that can see this
                // occurrence: `x` was zeroed before publication and no
                // other thread has observed the index yet.
                let hold = unsafe { slot::assume_held(entry, fp.x) };
                // SAFETY: value was just written above.
                let inst = self.hooks.on_add.on_add(unsafe { hold.value_mut() });
                counters.nadd.fetch_add(1, Ordering::Relaxed);
                self.apply_instruction(hold, inst, now, slot, ni, counters);
                return AddOutcome::Inserted;
            }
        }

        // SAFETY: never published to any slot, so reclaiming it now is exclusive.
        let abandoned = unsafe { entry.take_value() };
        drop(abandoned);
        entry.x.store(0, Ordering::Relaxed);
        entry.y.store(0, Ordering::Relaxed);
        entry.deadline_ms.store(0, Ordering::Relaxed);
        self.free.push_one(ni, entry);
        self.global.add_nosit.fetch_add(1, Ordering::Relaxed);
        log::debug!("vaultmap: add found no free seat for fingerprint ({}, {})", fp.x, fp.y);
        AddOutcome::NoSeat
    }

    /// `get`: find the entry matching `key` and invoke the get hook.
    pub fn get(&self, key: &[u8]) -> GetOutcome {
        self.get_with(key, None)
    }

    /// `get`, with a per-call override for the get hook.
    pub fn get_with(&self, key: &[u8], get_override: Option<&dyn GetHook<V>>) -> GetOutcome {
        let fp = self.fingerprinter.fingerprint(key);
        self.get_fp(fp, get_override)
    }

    /// Same as [`Self::get_with`], for a fingerprint already resolved by
    /// the caller (the `key_len == 0` convention in [`crate::compat`]).
    pub(crate) fn get_fp(&self, fp: Fingerprint, get_override: Option<&dyn GetHook<V>>) -> GetOutcome {
        let now = self.now_ms();
        let get_hook: &dyn GetHook<V> = get_override.unwrap_or(self.hooks.on_get.as_ref());

        for &(table, idx) in self.candidates(fp).iter() {
            let (bucket, counters) = self.resolve(table);
            let slot = &bucket.slots[idx as usize];
            let cur = slot.load(Ordering::Acquire);
            if cur == NULL_INDEX {
                continue;
            }
            let entry = match self.pool.get(cur) {
                Some(e) => e,
                None => continue,
            };
            let mut unused_stash = None;
            if self.reclaim_if_expired(entry, slot, cur, counters, now, &mut unused_stash) {
                continue;
            }
            if entry.y.load(Ordering::Relaxed) != fp.y {
                continue;
            }
            match slot::try_hold(entry, fp, &self.global.escapes) {
                Ok(hold) => {
                    if slot.load(Ordering::Acquire) != cur {
                        continue;
                    }
                    // SAFETY: held exclusively.
                    let v = unsafe { hold.value_mut() };
                    let inst = get_hook.on_get(v);
                    counters.nget.fetch_add(1, Ordering::Relaxed);
                    self.apply_instruction(hold, inst, now, slot, cur, counters);
                    return GetOutcome::Found;
                }
                Err(_) => continue,
            }
        }
        self.global.get_nohit.fetch_add(1, Ordering::Relaxed);
        GetOutcome::NotFound
    }

    /// `delete`: remove every entry matching `key`.
    ///
    /// Removes every matching occurrence visible in a single pass over
    /// the candidate list; it does not retry against a duplicate
    /// installed by a racing `add` after that pass started. A `get`
    /// racing this call may still observe a duplicate that existed
    /// before the delete began — this is eventual disappearance, not a
    /// linearizable delete-then-get guarantee.
    pub fn delete(&self, key: &[u8]) -> DeleteOutcome {
        self.delete_with(key, None)
    }

    /// `delete`, with a per-call override for the delete hook.
    pub fn delete_with(&self, key: &[u8], del_override: Option<&dyn DelHook<V>>) -> DeleteOutcome {
        let fp = self.fingerprinter.fingerprint(key);
        self.delete_fp(fp, del_override)
    }

    /// Same as [`Self::delete_with`], for a fingerprint already resolved
    /// by the caller (the `key_len == 0` convention in [`crate::compat`]).
    pub(crate) fn delete_fp(&self, fp: Fingerprint, del_override: Option<&dyn DelHook<V>>) -> DeleteOutcome {
        let now = self.now_ms();
        let del_hook: &dyn DelHook<V> = del_override.unwrap_or(self.hooks.on_del.as_ref());
        let mut found = false;

        for &(table, idx) in self.candidates(fp).iter() {
            let (bucket, counters) = self.resolve(table);
            let slot = &bucket.slots[idx as usize];
            let cur = slot.load(Ordering::Acquire);
            if cur == NULL_INDEX {
                continue;
            }
            let entry = match self.pool.get(cur) {
                Some(e) => e,
                None => continue,
            };
            let mut unused_stash = None;
            if self.reclaim_if_expired(entry, slot, cur, counters, now, &mut unused_stash) {
                continue;
            }
            if entry.y.load(Ordering::Relaxed) != fp.y {
                continue;
            }
            match slot::try_hold(entry, fp, &self.global.escapes) {
                Ok(hold) => {
                    if slot
                        .compare_exchange(cur, NULL_INDEX, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        counters.ncur.fetch_sub(1, Ordering::Relaxed);
                        counters.ndel.fetch_add(1, Ordering::Relaxed);
                        let entry_ref = hold.entry();
                        let value = hold.vacate();
                        self.free.push_one(cur, entry_ref);
                        del_hook.on_del(value);
                        found = true;
                    }
                }
                Err(_) => continue,
            }
        }

        if found {
            DeleteOutcome::Removed
        } else {
            self.global.del_nohit.fetch_add(1, Ordering::Relaxed);
            DeleteOutcome::NotFound
        }
    }

    /// Takes a typed statistics snapshot; `elapsed_ms`, if given, adds
    /// an ops/sec figure to the rendered report.
    pub fn stats(&self, elapsed_ms: Option<u64>) -> StatsSnapshot {
        let mem_htabs = ((self.t1.len() + self.t2.len() + MIN_OVERFLOW) as u64
            * std::mem::size_of::<AtomicU32>() as u64)
            / 1024;
        let max_nodes = self.pool.capacity() as u64;
        let mem_nodes = (max_nodes * std::mem::size_of::<Entry<V>>() as u64) / 1024;
        let snapshot = StatsSnapshot::take(
            &self.c1,
            self.t1.len(),
            &self.c2,
            self.t2.len(),
            &self.cov,
            &self.global,
            mem_htabs,
            mem_nodes,
            max_nodes,
        );
        log::info!("{}", snapshot.render(elapsed_ms));
        snapshot
    }
}

impl<V, F> Drop for HashVault<V, F> {
    fn drop(&mut self) {
        for bucket in [&self.t1, &self.t2, &self.ov] {
            for slot in bucket.slots.iter() {
                let idx = slot.load(Ordering::Relaxed);
                if idx == NULL_INDEX {
                    continue;
                }
                if let Some(entry) = self.pool.get(idx) {
                    // SAFETY: a non-`NULL_INDEX` slot always addresses
                    // an initialized occurrence; `&mut self` means no
                    // concurrent access remains.
                    unsafe {
                        drop(entry.take_value());
                    }
                }
            }
        }
    }
}
