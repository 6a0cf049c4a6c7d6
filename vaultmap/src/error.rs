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

//! Error types surfaced by table construction and key handling.
//!
//! Nothing in the core engine panics. Invalid arguments and allocation
//! exhaustion are always reported through these types rather than an
//! abort or an `unwrap`.

use core::fmt;

/// Failure to bring up a new [`HashVault`](crate::HashVault).
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum CreateError {
    /// `max_entries` was outside the supported `2..=u32::MAX - 1` range.
    #[error("max_entries must be in 2..={}, got {0}", u32::MAX - 1)]
    InvalidCapacity(u64),
    /// The conceptual node size must be a power of two in `32..=4096`.
    #[error("node_size must be a power of two in 32..=4096, got {0}")]
    UnsupportedNodeSize(u32),
    /// The entry-pool allocator could not be brought up (e.g. the block
    /// directory could not be allocated).
    #[error("failed to allocate the entry pool")]
    AllocationFailed,
}

/// Failure to interpret a `(key_bytes, key_len)` pair under the
/// `key_len == 0` "this is already a fingerprint image" convention.
///
/// Mirrors the `-3` ("bad length") outcome of the C-ABI-flavored
/// operation table: negative lengths are never valid, and a zero length
/// requires the byte slice to be exactly one fingerprint image wide.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum KeyLengthError {
    /// `key_len` was negative.
    NegativeLength,
    /// `key_len == 0` was given but the byte slice was not exactly one
    /// fingerprint image (16 bytes: two non-zero `u64` words) wide.
    BadFingerprintImage,
}

impl fmt::Display for KeyLengthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeLength => write!(f, "key length must not be negative"),
            Self::BadFingerprintImage => {
                write!(f, "a zero-length key must supply a full fingerprint image")
            }
        }
    }
}

impl std::error::Error for KeyLengthError {}
