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

//! A thin compatibility shim reproducing the literal integer-coded
//! operation table of §6: `0`/`1`/`-1`/`-2`/`-3`, and the `key_len == 0`
//! "the key bytes are already a fingerprint image" convention, uniformly
//! across `add`/`get`/`delete` as the reference allocator does.
//!
//! Nothing here is the primary, idiomatic API — [`crate::HashVault`]'s
//! `&[u8]`-keyed methods returning [`crate::AddOutcome`] and friends are.
//! This module exists for callers porting code that was written against
//! the reference's raw return-code contract, or that need the
//! precomputed-fingerprint fast path without re-hashing a key.

use crate::fingerprint::FingerprintSource;
use crate::hooks::{DelHook, DupHook, GetHook};
use crate::table::{AddOutcome, DeleteOutcome, GetOutcome, HashVault};

/// `add` succeeded, installing a fresh entry.
pub const ADD_NEW: i32 = 0;
/// `add` found a matching fingerprint and routed to the duplicate hook.
pub const ADD_DUPLICATE: i32 = 1;
/// `add` found every one of the 32 primary seats and 64 overflow slots
/// occupied by non-matching fingerprints.
pub const ADD_NO_SEAT: i32 = -1;
/// `add` could not obtain a fresh entry: the pool's block directory is
/// exhausted.
pub const ADD_NO_MEMORY: i32 = -2;
/// Any operation: `key_len` was negative, or a zero length didn't carry
/// an exact fingerprint image.
pub const ERR_BAD_LENGTH: i32 = -3;

/// `get`/`delete` found (and, for `delete`, removed) a match.
pub const FOUND: i32 = 0;
/// `get`/`delete` found no match.
pub const NOT_FOUND: i32 = -1;

/// Interprets `(key_bytes, key_len)` under the shared convention and
/// hashes it through `table`'s configured fingerprinter, or parses
/// `key_bytes` directly as a fingerprint image when `key_len == 0`.
///
/// Returns `Err(ERR_BAD_LENGTH)` for a negative length or a malformed
/// zero-length image, mirroring the `-3` outcome column of §6 for every
/// operation that takes this pair.
fn resolve<V, F: FingerprintSource>(
    table: &HashVault<V, F>,
    key_bytes: &[u8],
    key_len: i64,
) -> Result<crate::fingerprint::Fingerprint, i32> {
    table.resolve_fingerprint(key_bytes, key_len).map_err(|_| ERR_BAD_LENGTH)
}

/// `add(handle, key_bytes, key_len, value, initial_ttl_ms, cb_dup, out)`.
///
/// `out` is populated with the table's own outcome enum alongside the
/// raw code, so a caller that wants the richer Rust type doesn't have to
/// decode the integer back.
pub fn add<V, F: FingerprintSource>(
    table: &HashVault<V, F>,
    key_bytes: &[u8],
    key_len: i64,
    value: V,
    initial_ttl_ms: u64,
    cb_dup: Option<&dyn DupHook<V>>,
    out: &mut Option<AddOutcome>,
) -> i32 {
    let fp = match resolve(table, key_bytes, key_len) {
        Ok(fp) => fp,
        Err(code) => {
            *out = None;
            return code;
        }
    };
    let outcome = table.add_fp(fp, value, initial_ttl_ms, cb_dup);
    *out = Some(outcome);
    match outcome {
        AddOutcome::Inserted => ADD_NEW,
        AddOutcome::Duplicate => ADD_DUPLICATE,
        AddOutcome::NoSeat => ADD_NO_SEAT,
        AddOutcome::OutOfMemory => ADD_NO_MEMORY,
    }
}

/// `get(handle, key_bytes, key_len, cb_get, out)`.
pub fn get<V, F: FingerprintSource>(
    table: &HashVault<V, F>,
    key_bytes: &[u8],
    key_len: i64,
    cb_get: Option<&dyn GetHook<V>>,
    out: &mut Option<GetOutcome>,
) -> i32 {
    let fp = match resolve(table, key_bytes, key_len) {
        Ok(fp) => fp,
        Err(code) => {
            *out = None;
            return code;
        }
    };
    let outcome = table.get_fp(fp, cb_get);
    *out = Some(outcome);
    match outcome {
        GetOutcome::Found => FOUND,
        GetOutcome::NotFound => NOT_FOUND,
    }
}

/// `delete(handle, key_bytes, key_len, cb_del, out)`.
pub fn delete<V, F: FingerprintSource>(
    table: &HashVault<V, F>,
    key_bytes: &[u8],
    key_len: i64,
    cb_del: Option<&dyn DelHook<V>>,
    out: &mut Option<DeleteOutcome>,
) -> i32 {
    let fp = match resolve(table, key_bytes, key_len) {
        Ok(fp) => fp,
        Err(code) => {
            *out = None;
            return code;
        }
    };
    let outcome = table.delete_fp(fp, cb_del);
    *out = Some(outcome);
    match outcome {
        DeleteOutcome::Removed => FOUND,
        DeleteOutcome::NotFound => NOT_FOUND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::IMAGE_LEN;
    use crate::{Config, DefaultFingerprinter};

    fn fresh() -> HashVault<u32, DefaultFingerprinter> {
        HashVault::new(Config::new(1024, 0)).unwrap()
    }

    #[test]
    fn add_get_delete_round_trip_raw_codes() {
        let t = fresh();
        let mut out = None;
        assert_eq!(add(&t, b"k", b"k".len() as i64, 1, 0, None, &mut out), ADD_NEW);
        assert_eq!(out, Some(AddOutcome::Inserted));

        let mut out = None;
        assert_eq!(get(&t, b"k", b"k".len() as i64, None, &mut out), FOUND);

        let mut out = None;
        assert_eq!(delete(&t, b"k", b"k".len() as i64, None, &mut out), FOUND);

        let mut out = None;
        assert_eq!(get(&t, b"k", b"k".len() as i64, None, &mut out), NOT_FOUND);
    }

    #[test]
    fn negative_length_is_bad_length() {
        let t = fresh();
        let mut out = None;
        assert_eq!(get(&t, b"k", -5, None, &mut out), ERR_BAD_LENGTH);
        assert!(out.is_none());
    }

    #[test]
    fn zero_length_requires_a_fingerprint_image() {
        let t = fresh();
        let mut out = None;
        assert_eq!(get(&t, b"too-short", 0, None, &mut out), ERR_BAD_LENGTH);
    }

    #[test]
    fn zero_length_fingerprint_image_matches_hashed_key() {
        let t = fresh();
        let fp = DefaultFingerprinter.fingerprint(b"precomputed");
        let mut image = [0u8; IMAGE_LEN];
        image[0..8].copy_from_slice(&fp.x.to_ne_bytes());
        image[8..16].copy_from_slice(&fp.y.to_ne_bytes());

        let mut out = None;
        assert_eq!(
            add(&t, b"precomputed", b"precomputed".len() as i64, 7, 0, None, &mut out),
            ADD_NEW
        );

        let mut out = None;
        assert_eq!(get(&t, &image, 0, None, &mut out), FOUND);
    }
}
