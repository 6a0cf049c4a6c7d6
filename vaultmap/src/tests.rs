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

//! End-to-end scenarios and cross-module properties. Per-module unit
//! tests live alongside the code they exercise; this module is the one
//! place that wires the whole table together the way a caller would.

use crate::{AddOutcome, Config, DefaultFingerprinter, DeleteOutcome, FingerprintSource, GetOutcome, HashVault, TtlInstruction};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn table(max_entries: u64, reset_ttl_ms: u64) -> HashVault<u32> {
    HashVault::new(Config::new(max_entries, reset_ttl_ms)).unwrap()
}

/// Scenario 1: single-thread add/get/dup/delete/get.
#[test]
fn scenario_single_thread_lifecycle() {
    let mut t = table(1024, 0);
    let dup_seen: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));
    let del_seen: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));
    let get_seen: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));
    {
        let dup_seen = dup_seen.clone();
        let get_seen = get_seen.clone();
        let del_seen = del_seen.clone();
        t.register_hooks(
            None,
            None,
            Some(Box::new(move |existing: &mut u32, _incoming: u32| {
                *dup_seen.lock().unwrap() = Some(*existing);
                TtlInstruction::DontChange
            })),
            Some(Box::new(move |v: &mut u32| {
                *get_seen.lock().unwrap() = Some(*v);
                TtlInstruction::DontChange
            })),
            Some(Box::new(move |v: u32| {
                *del_seen.lock().unwrap() = Some(v);
            })),
        );
    }

    assert_eq!(t.add(b"alpha", 1, 0), AddOutcome::Inserted);
    assert_eq!(t.get(b"alpha"), GetOutcome::Found);
    assert_eq!(*get_seen.lock().unwrap(), Some(1));

    assert_eq!(t.add(b"alpha", 2, 0), AddOutcome::Duplicate);
    assert_eq!(*dup_seen.lock().unwrap(), Some(1));

    assert_eq!(t.delete(b"alpha"), DeleteOutcome::Removed);
    assert_eq!(*del_seen.lock().unwrap(), Some(1));

    assert_eq!(t.get(b"alpha"), GetOutcome::NotFound);
}

/// Scenario 2: TTL reclaim without a sweeper — the next probe after
/// expiry evicts the entry and runs `on_ttl` exactly once.
#[test]
fn scenario_ttl_reclaim() {
    let mut t = table(1024, 0);
    let ttl_calls = Arc::new(AtomicUsize::new(0));
    let ttl_seen: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));
    {
        let ttl_calls = ttl_calls.clone();
        let ttl_seen = ttl_seen.clone();
        t.register_hooks(
            Some(Box::new(move |v: u32| {
                ttl_calls.fetch_add(1, Ordering::SeqCst);
                *ttl_seen.lock().unwrap() = Some(v);
            })),
            None,
            None,
            None,
            None,
        );
    }

    assert_eq!(t.add(b"k", 42, 50), AddOutcome::Inserted);
    thread::sleep(Duration::from_millis(120));
    assert_eq!(t.get(b"k"), GetOutcome::NotFound);
    assert_eq!(ttl_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*ttl_seen.lock().unwrap(), Some(42));
}

/// Scenario 3: a per-call duplicate-hook override that removes the
/// existing entry on the spot.
#[test]
fn scenario_dup_hook_override_can_remove() {
    let t = table(1024, 0);
    assert_eq!(t.add(b"k", 1, 0), AddOutcome::Inserted);

    let remove_on_dup = |_existing: &mut u32, _incoming: u32| TtlInstruction::Remove;
    assert_eq!(
        t.add_with(b"k", 2, 0, Some(&remove_on_dup)),
        AddOutcome::Duplicate
    );

    assert_eq!(t.get(b"k"), GetOutcome::NotFound);
}

/// Scenario 4: a tiny pool exhausts after its logical capacity, even
/// though the bucket arrays (clamped to the overflow floor) have far
/// more than four candidate seats free.
#[test]
fn scenario_capacity_exhaustion() {
    let t = table(4, 0);
    for i in 0..4u32 {
        let key = format!("k{i}");
        assert_eq!(t.add(key.as_bytes(), i, 0), AddOutcome::Inserted);
    }
    let outcome = t.add(b"k4", 4, 0);
    assert!(matches!(outcome, AddOutcome::NoSeat | AddOutcome::OutOfMemory));
}

/// Boundary: a zero-length key that isn't a valid fingerprint image is
/// rejected, never silently treated as an empty byte-string key.
#[test]
fn boundary_zero_length_non_fingerprint_key_is_rejected() {
    use crate::compat;
    let t = table(1024, 0);
    let mut out = None;
    let code = compat::add(&t, b"short", 0, 1, 0, None, &mut out);
    assert_eq!(code, compat::ERR_BAD_LENGTH);
    assert!(out.is_none());
}

/// Scenario 6 / P7: a precomputed fingerprint image reaches the same
/// entry as the hashed key that produced it, through the raw compat
/// surface's `key_len == 0` convention.
#[test]
fn scenario_precomputed_fingerprint_matches_hashed_key() {
    use crate::compat;
    use crate::fingerprint::IMAGE_LEN;

    let t = table(1024, 0);
    let key = b"precomputed-key";
    assert_eq!(t.add(key, 7, 0), AddOutcome::Inserted);

    let fp = DefaultFingerprinter.fingerprint(key);
    let mut image = [0u8; IMAGE_LEN];
    image[0..8].copy_from_slice(&fp.x.to_ne_bytes());
    image[8..16].copy_from_slice(&fp.y.to_ne_bytes());

    let mut out = None;
    assert_eq!(compat::get(&t, &image, 0, None, &mut out), compat::FOUND);
}

/// P4: after `add` returns inserted-or-duplicate, an immediate `get`
/// with no intervening delete/expiry always finds it.
#[test]
fn p4_add_then_get_always_found() {
    let t = table(1024, 0);
    for i in 0..200u32 {
        let key = format!("p4-{i}");
        t.add(key.as_bytes(), i, 0);
        assert_eq!(t.get(key.as_bytes()), GetOutcome::Found);
    }
}

/// P5: after `delete` returns removed, an immediate `get` with no
/// intervening add always misses.
#[test]
fn p5_delete_then_get_always_missing() {
    let t = table(1024, 0);
    for i in 0..200u32 {
        let key = format!("p5-{i}");
        t.add(key.as_bytes(), i, 0);
        assert_eq!(t.delete(key.as_bytes()), DeleteOutcome::Removed);
        assert_eq!(t.get(key.as_bytes()), GetOutcome::NotFound);
    }
}

/// P6: successfully-added-and-not-removed entries never exceed the
/// pool's realized capacity (the power-of-two quantization of
/// `max_entries`).
#[test]
fn p6_inserted_count_bounded_by_pool_capacity() {
    let t = table(8, 0);
    let mut inserted = 0u64;
    let mut saw_exhaustion = false;
    for i in 0..64u32 {
        let key = format!("p6-{i}");
        match t.add(key.as_bytes(), i, 0) {
            AddOutcome::Inserted => inserted += 1,
            AddOutcome::OutOfMemory => saw_exhaustion = true,
            other => panic!("unexpected outcome for a fresh key: {other:?}"),
        }
    }
    let snapshot = t.stats(None);
    assert!(inserted <= snapshot.max_nodes);
    assert!(saw_exhaustion, "64 fresh keys against an 8-entry pool must exhaust it");
}

/// P8: an entry inserted with a positive TTL and never refreshed is
/// unreachable after its deadline, and `on_ttl` fires at most once.
#[test]
fn p8_expired_entry_is_unreachable_exactly_once() {
    let mut t = table(1024, 0);
    let ttl_calls = Arc::new(AtomicUsize::new(0));
    {
        let ttl_calls = ttl_calls.clone();
        t.register_hooks(
            Some(Box::new(move |_v: u32| {
                ttl_calls.fetch_add(1, Ordering::SeqCst);
            })),
            None,
            None,
            None,
            None,
        );
    }
    assert_eq!(t.add(b"ephemeral", 1, 30), AddOutcome::Inserted);
    thread::sleep(Duration::from_millis(80));
    assert_eq!(t.get(b"ephemeral"), GetOutcome::NotFound);
    assert_eq!(t.get(b"ephemeral"), GetOutcome::NotFound);
    assert_eq!(ttl_calls.load(Ordering::SeqCst), 1);
}

/// Scenario 5, scaled down for a unit test run: many threads racing
/// add/get/delete against a shared keyspace. Every value ever installed
/// for a key encodes that key's id in its low 16 bits, so any read that
/// finds a *different* key's payload would mean a slot got corrupted or
/// cross-wired — this is the property the test actually checks, since
/// who-won-last is otherwise unknowable under free interleaving.
#[test]
fn scenario_concurrent_mixed_workload_stays_consistent() {
    const THREADS: usize = 8;
    const KEYS: u32 = 500;
    const OPS_PER_THREAD: u32 = 2_000;

    let t: Arc<HashVault<u32>> = Arc::new(table(4096, 0));

    let handles: Vec<_> = (0..THREADS)
        .map(|tid| {
            let t = t.clone();
            thread::spawn(move || {
                let mut rng_state = 0x2545F4914F6CDD1Du64 ^ (tid as u64).wrapping_mul(0x9E3779B97F4A7C15);
                let mut next = || {
                    rng_state ^= rng_state << 13;
                    rng_state ^= rng_state >> 7;
                    rng_state ^= rng_state << 17;
                    rng_state
                };
                for _ in 0..OPS_PER_THREAD {
                    let key_id = (next() % KEYS as u64) as u32;
                    let key = format!("stress-{key_id}");
                    match next() % 10 {
                        0..=7 => {
                            let value = (tid as u32) << 16 | key_id;
                            t.add(key.as_bytes(), value, 0);
                        }
                        8 => {
                            let expect = key_id;
                            let check = move |v: &mut u32| {
                                assert_eq!(*v & 0xFFFF, expect, "value decoded to the wrong key");
                                TtlInstruction::DontChange
                            };
                            t.get_with(key.as_bytes(), Some(&check));
                        }
                        _ => {
                            t.delete(key.as_bytes());
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for key_id in 0..KEYS {
        let key = format!("stress-{key_id}");
        let check = move |v: &mut u32| {
            assert_eq!(*v & 0xFFFF, key_id, "value decoded to the wrong key");
            TtlInstruction::DontChange
        };
        t.get_with(key.as_bytes(), Some(&check));
    }
}
