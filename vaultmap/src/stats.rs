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

//! Statistics: live fetch-add counters, and the typed/human-readable
//! snapshots taken from them.

use crate::mem::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-table fetch-add counters, cache-line padded so hot counter
/// traffic on one table never bounces the other table's line.
#[derive(Default)]
pub(crate) struct TableCounters {
    pub(crate) ncur: CachePadded<AtomicU64>,
    pub(crate) nadd: CachePadded<AtomicU64>,
    pub(crate) ndup: CachePadded<AtomicU64>,
    pub(crate) nget: CachePadded<AtomicU64>,
    pub(crate) ndel: CachePadded<AtomicU64>,
}

impl TableCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, nb: u32) -> TableStatsSnapshot {
        TableStatsSnapshot {
            nb,
            ncur: self.ncur.load(Ordering::Relaxed),
            nadd: self.nadd.load(Ordering::Relaxed),
            ndup: self.ndup.load(Ordering::Relaxed),
            nget: self.nget.load(Ordering::Relaxed),
            ndel: self.ndel.load(Ordering::Relaxed),
        }
    }
}

/// Table-wide fetch-add counters with no per-table split.
#[derive(Default)]
pub(crate) struct GlobalCounters {
    pub(crate) expires: CachePadded<AtomicU64>,
    pub(crate) escapes: CachePadded<AtomicU64>,
    pub(crate) add_nomem: CachePadded<AtomicU64>,
    pub(crate) add_nosit: CachePadded<AtomicU64>,
    pub(crate) del_nohit: CachePadded<AtomicU64>,
    pub(crate) get_nohit: CachePadded<AtomicU64>,
}

impl GlobalCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// A point-in-time snapshot of one bucket table's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableStatsSnapshot {
    pub nb: u32,
    pub ncur: u64,
    pub nadd: u64,
    pub ndup: u64,
    pub nget: u64,
    pub ndel: u64,
}

impl TableStatsSnapshot {
    /// Realized fill ratio `ncur / nb`.
    pub fn fill_ratio(&self) -> f64 {
        if self.nb == 0 {
            0.0
        } else {
            self.ncur as f64 / self.nb as f64
        }
    }
}

/// A full point-in-time snapshot of a table's statistics, combining the
/// per-table counters named in the operation engine with the
/// entry-pool memory figures recovered from the reference allocator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    pub table1: TableStatsSnapshot,
    pub table2: TableStatsSnapshot,
    pub overflow: TableStatsSnapshot,
    pub expires: u64,
    pub escapes: u64,
    pub add_nomem: u64,
    pub add_nosit: u64,
    pub del_nohit: u64,
    pub get_nohit: u64,
    /// Bucket-array memory footprint, in KiB.
    pub mem_htabs: u64,
    /// Entry-pool memory budgeted for all directory slots, in KiB.
    pub mem_nodes: u64,
    /// Capacity the allocator can ultimately support once every block
    /// in the directory is allocated.
    pub max_nodes: u64,
}

impl StatsSnapshot {
    pub(crate) fn take(
        t1: &TableCounters,
        nb1: u32,
        t2: &TableCounters,
        nb2: u32,
        overflow: &TableCounters,
        global: &GlobalCounters,
        mem_htabs: u64,
        mem_nodes: u64,
        max_nodes: u64,
    ) -> Self {
        Self {
            table1: t1.snapshot(nb1),
            table2: t2.snapshot(nb2),
            overflow: overflow.snapshot(crate::probe::MIN_OVERFLOW),
            expires: global.expires.load(Ordering::Relaxed),
            escapes: global.escapes.load(Ordering::Relaxed),
            add_nomem: global.add_nomem.load(Ordering::Relaxed),
            add_nosit: global.add_nosit.load(Ordering::Relaxed),
            del_nohit: global.del_nohit.load(Ordering::Relaxed),
            get_nohit: global.get_nohit.load(Ordering::Relaxed),
            mem_htabs,
            mem_nodes,
            max_nodes,
        }
    }

    /// Total completed operations, for an ops/sec figure given an
    /// elapsed duration.
    fn total_ops(&self) -> u64 {
        self.table1.nadd
            + self.table1.nget
            + self.table1.ndel
            + self.table2.nadd
            + self.table2.nget
            + self.table2.ndel
            + self.overflow.nadd
            + self.overflow.nget
            + self.overflow.ndel
    }

    /// Renders the human-readable report the `stats` operation prints:
    /// per-table fill ratios, memory footprint, and (if `elapsed_ms` is
    /// given) an ops/sec figure.
    pub fn render(&self, elapsed_ms: Option<u64>) -> String {
        use fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(out, "vaultmap stats:");
        let _ = writeln!(
            out,
            "  table1: {}/{} ({:.2}% full), add={} dup={} get={} del={}",
            self.table1.ncur,
            self.table1.nb,
            self.table1.fill_ratio() * 100.0,
            self.table1.nadd,
            self.table1.ndup,
            self.table1.nget,
            self.table1.ndel,
        );
        let _ = writeln!(
            out,
            "  table2: {}/{} ({:.2}% full), add={} dup={} get={} del={}",
            self.table2.ncur,
            self.table2.nb,
            self.table2.fill_ratio() * 100.0,
            self.table2.nadd,
            self.table2.ndup,
            self.table2.nget,
            self.table2.ndel,
        );
        let _ = writeln!(
            out,
            "  overflow: {}/{} ({:.2}% full), add={} dup={} get={} del={}",
            self.overflow.ncur,
            self.overflow.nb,
            self.overflow.fill_ratio() * 100.0,
            self.overflow.nadd,
            self.overflow.ndup,
            self.overflow.nget,
            self.overflow.ndel,
        );
        let _ = writeln!(
            out,
            "  expires={} escapes={} add_nomem={} add_nosit={} del_nohit={} get_nohit={}",
            self.expires, self.escapes, self.add_nomem, self.add_nosit, self.del_nohit, self.get_nohit,
        );
        let _ = writeln!(
            out,
            "  mem: htabs={}KiB nodes={}KiB max_nodes={}",
            self.mem_htabs, self.mem_nodes, self.max_nodes,
        );
        if let Some(ms) = elapsed_ms {
            let ops = self.total_ops();
            let ops_per_sec = if ms == 0 {
                0.0
            } else {
                ops as f64 / (ms as f64 / 1000.0)
            };
            let _ = writeln!(out, "  elapsed={}ms ops={} ops/sec={:.1}", ms, ops, ops_per_sec);
        }
        out
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_ratio_of_empty_table_is_zero() {
        let snap = TableStatsSnapshot {
            nb: 100,
            ..Default::default()
        };
        assert_eq!(snap.fill_ratio(), 0.0);
    }

    #[test]
    fn fill_ratio_computed_correctly() {
        let snap = TableStatsSnapshot {
            nb: 200,
            ncur: 50,
            ..Default::default()
        };
        assert!((snap.fill_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn render_includes_ops_per_sec_only_when_elapsed_given() {
        let snap = StatsSnapshot::default();
        assert!(!snap.render(None).contains("ops/sec"));
        assert!(snap.render(Some(1000)).contains("ops/sec"));
    }
}
