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

//! Probe geometry: turns a fingerprint's four direct-hash words into the
//! fixed, deterministic candidate-slot sequence that every operation
//! walks in the same order. The first half of the sequence always
//! addresses the dense primary table, the second half the sparse one;
//! the overflow table is a plain linear scan appended by the caller.

use crate::fingerprint::Fingerprint;

/// Direct-hash words taken from a fingerprint.
pub(crate) const NKEY: usize = 4;
/// One direct row plus three cluster rows per table.
pub(crate) const NCLUSTER: usize = 4;
/// Two primary tables.
pub(crate) const NMHT: usize = 2;
/// Total primary candidate slots across both tables.
pub(crate) const NSEAT: usize = NMHT * NKEY * NCLUSTER;
/// Fixed overflow table width, linearly scanned after the primary list.
pub(crate) const MIN_OVERFLOW: u32 = 64;

assertions!(NSEAT == 32, MIN_OVERFLOW == 64);

/// One table's half of the probe list: 16 candidate bucket indices,
/// already reduced modulo that table's size.
pub(crate) type TableProbe = [u32; NKEY * NCLUSTER];

/// Builds the per-table candidate row for bucket-array size `nb`.
///
/// Row 0 is the direct hash `d[i] mod nb`; rows 1..=3 fold an earlier
/// word with `c * d[j]` for cluster `c`. The formula and its word
/// pairing are fixed so that add, get, and delete all agree on the same
/// sequence for the same fingerprint.
#[inline]
pub(crate) fn probe_table(d: [u32; NKEY], nb: u32) -> TableProbe {
    debug_assert!(nb > 0);
    let m = |w: u32| w % nb;
    [
        m(d[0]),
        m(d[1]),
        m(d[2]),
        m(d[3]),
        m(d[3].wrapping_add(1u32.wrapping_mul(d[0]))),
        m(d[0].wrapping_add(1u32.wrapping_mul(d[1]))),
        m(d[1].wrapping_add(1u32.wrapping_mul(d[2]))),
        m(d[2].wrapping_add(1u32.wrapping_mul(d[3]))),
        m(d[3].wrapping_add(2u32.wrapping_mul(d[0]))),
        m(d[0].wrapping_add(2u32.wrapping_mul(d[1]))),
        m(d[1].wrapping_add(2u32.wrapping_mul(d[2]))),
        m(d[2].wrapping_add(2u32.wrapping_mul(d[3]))),
        m(d[3].wrapping_add(3u32.wrapping_mul(d[0]))),
        m(d[0].wrapping_add(3u32.wrapping_mul(d[1]))),
        m(d[1].wrapping_add(3u32.wrapping_mul(d[2]))),
        m(d[2].wrapping_add(3u32.wrapping_mul(d[3]))),
    ]
}

/// Builds both primary tables' candidate rows for a fingerprint.
#[inline]
pub(crate) fn probe_both(fp: Fingerprint, nb1: u32, nb2: u32) -> (TableProbe, TableProbe) {
    let d = fp.words();
    (probe_table(d, nb1), probe_table(d, nb2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_input() {
        let d = [11, 22, 33, 44];
        assert_eq!(probe_table(d, 1000), probe_table(d, 1000));
    }

    #[test]
    fn all_candidates_in_range() {
        let d = [u32::MAX, 0, 12345, 999_999];
        let row = probe_table(d, 777);
        assert!(row.iter().all(|&x| x < 777));
    }

    #[test]
    fn row_width_matches_seat_budget() {
        assert_eq!(NKEY * NCLUSTER * NMHT, NSEAT);
        assert_eq!(NSEAT, 32);
    }
}
