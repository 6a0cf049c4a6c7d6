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

//! Construction-time configuration: capacity, TTL reset window, and the
//! collision-target tuning knob that drives bucket-array sizing.

use crate::error::CreateError;
use crate::probe::{MIN_OVERFLOW, NCLUSTER, NKEY};

/// `K = NKEY * NCLUSTER + 1`, the geometry constant the sizing formulas
/// are built from.
const K: f64 = (NKEY * NCLUSTER + 1) as f64;

/// Default collision control: larger trades memory for a lower expected
/// seats-per-key occupancy. Matches the reference allocator's default.
const DEFAULT_COLLISION_TARGET: f64 = 1000.0;

/// Default node-size validation bound (log2), mirroring the reference
/// allocator's `32..=4096` byte node-size constraint. This binds the
/// conceptual node size used for sizing/alignment checks, independent
/// of the actual in-memory layout of `Entry<V>`.
const MIN_NODE_SIZE: u32 = 32;
const MAX_NODE_SIZE: u32 = 4096;

/// Builder-style construction parameters for a [`crate::HashVault`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    max_entries: u64,
    reset_ttl_ms: u64,
    collision_target: f64,
    node_size: u32,
}

impl Config {
    /// Starts a configuration for `max_entries` total logical capacity;
    /// `reset_ttl_ms` is the window `RESET_TTL` hook instructions apply.
    pub fn new(max_entries: u64, reset_ttl_ms: u64) -> Self {
        Self {
            max_entries,
            reset_ttl_ms,
            collision_target: DEFAULT_COLLISION_TARGET,
            node_size: 64,
        }
    }

    /// Overrides the collision-target tuning constant. Larger values
    /// grow the bucket arrays to reduce expected collisions per seat;
    /// the formula is one verified tuning point, not a mandatory one.
    pub fn with_collision_target(mut self, collision_target: f64) -> Self {
        self.collision_target = collision_target;
        self
    }

    /// Overrides the conceptual node-size validation bound (must be a
    /// power of two in `32..=4096`).
    pub fn with_node_size(mut self, node_size: u32) -> Self {
        self.node_size = node_size;
        self
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    pub fn reset_ttl_ms(&self) -> u64 {
        self.reset_ttl_ms
    }

    fn validate(&self) -> Result<(), CreateError> {
        if self.max_entries < 2 || self.max_entries > (u32::MAX - 1) as u64 {
            return Err(CreateError::InvalidCapacity(self.max_entries));
        }
        if !self.node_size.is_power_of_two()
            || self.node_size < MIN_NODE_SIZE
            || self.node_size > MAX_NODE_SIZE
        {
            return Err(CreateError::UnsupportedNodeSize(self.node_size));
        }
        Ok(())
    }

    /// Derives bucket-array sizes `(nb1, nb2)` from `max_entries` and
    /// `collision_target`, per the reference's two-table sizing
    /// derivation. Clamped to `[MIN_OVERFLOW, u32::MAX]`.
    pub(crate) fn table_sizes(&self) -> Result<(u32, u32), CreateError> {
        self.validate()?;
        let n1 = self.max_entries as f64;
        let collision = self.collision_target;

        let r1 = (n1 * collision / (K * K)).powf(1.0 / (K * K - 1.0));
        let nb1 = clamp_size(n1 * r1);

        let n2 = (n1 + 2.0) / (K * r1.powf(K - 1.0));
        let r2 = ((n2 + 2.0) * collision / K).powf(1.0 / (K - 1.0));
        let nb2 = clamp_size(n2 * r2);

        Ok((nb1, nb2))
    }
}

fn clamp_size(x: f64) -> u32 {
    if !x.is_finite() || x < MIN_OVERFLOW as f64 {
        MIN_OVERFLOW
    } else if x >= u32::MAX as f64 {
        u32::MAX
    } else {
        x as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_capacity_below_two() {
        assert_eq!(
            Config::new(1, 0).validate(),
            Err(CreateError::InvalidCapacity(1))
        );
    }

    #[test]
    fn rejects_non_power_of_two_node_size() {
        let cfg = Config::new(1000, 0).with_node_size(100);
        assert_eq!(cfg.validate(), Err(CreateError::UnsupportedNodeSize(100)));
    }

    #[test]
    fn table_sizes_order_as_expected() {
        let cfg = Config::new(100_000, 0);
        let (nb1, nb2) = cfg.table_sizes().unwrap();
        assert!(nb1 > nb2);
        assert!(nb2 >= MIN_OVERFLOW);
    }

    #[test]
    fn small_capacity_clamps_to_overflow_floor() {
        let cfg = Config::new(2, 0);
        let (nb1, nb2) = cfg.table_sizes().unwrap();
        assert!(nb1 >= MIN_OVERFLOW);
        assert!(nb2 >= MIN_OVERFLOW);
    }
}
