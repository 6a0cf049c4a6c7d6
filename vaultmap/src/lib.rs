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

//! A fixed-capacity, lock-free, TTL-aware concurrent hash table.
//!
//! The table maps byte-string keys (or precomputed fingerprints) to
//! caller-supplied values. It is sized once at construction and never
//! resizes; capacity is realized across a dense primary table, a sparse
//! secondary table, and a small linearly-scanned overflow table. There is
//! no background sweeper: expired entries are reclaimed opportunistically
//! by whichever operation next probes their slot.
//!
//! See [`HashVault`] for the entry point.

#[macro_use]
mod macros;

pub mod compat;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hooks;
mod mem;
mod probe;
mod slot;
pub mod stats;
mod table;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use error::{CreateError, KeyLengthError};
pub use fingerprint::{DefaultFingerprinter, Fingerprint, FingerprintSource};
pub use hooks::{AddHook, DelHook, DupHook, GetHook, TtlHook, TtlInstruction};
pub use stats::{StatsSnapshot, TableStatsSnapshot};
pub use table::{AddOutcome, DeleteOutcome, GetOutcome, HashVault};
