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

//! Callback hooks invoked while an entry is held exclusively.
//!
//! Every hook runs with the target entry's occurrence locked to the
//! calling thread — it must be non-blocking and must never re-enter the
//! table for the same key. What a hook returns (or, for the retiring
//! hooks, simply that it returned) tells the operation engine what to
//! do with the entry's TTL next.

/// What to do with an entry's deadline after a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlInstruction {
    /// Remove the entry now, as if `delete` had been called on it.
    Remove,
    /// Reassign the deadline to `now + reset_ttl_ms` from construction.
    ResetTtl,
    /// Leave the deadline untouched.
    DontChange,
    /// Reassign the deadline to `now + n` milliseconds.
    SetTtlMs(u64),
}

impl TtlInstruction {
    /// Parses the C-ABI-flavored instruction encoding: `-1` remove,
    /// `-2` reset, `-3` don't-change, any non-negative `n` sets the
    /// deadline `n` milliseconds out. Anything else is treated as
    /// don't-change, the least surprising fallback for an unrecognized
    /// code.
    pub fn from_raw(code: i64) -> Self {
        match code {
            -1 => Self::Remove,
            -2 => Self::ResetTtl,
            -3 => Self::DontChange,
            n if n >= 0 => Self::SetTtlMs(n as u64),
            _ => Self::DontChange,
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            Self::Remove => -1,
            Self::ResetTtl => -2,
            Self::DontChange => -3,
            Self::SetTtlMs(n) => n as i64,
        }
    }
}

/// Invoked on a successful `get`, with exclusive access to the value.
pub trait GetHook<V>: Send + Sync {
    fn on_get(&self, value: &mut V) -> TtlInstruction;
}

/// Invoked when `add` finds a fingerprint match instead of installing
/// fresh; `incoming` is the value the caller proposed.
pub trait DupHook<V>: Send + Sync {
    fn on_dup(&self, existing: &mut V, incoming: V) -> TtlInstruction;
}

/// Invoked right after `add` installs a brand-new entry.
pub trait AddHook<V>: Send + Sync {
    fn on_add(&self, value: &mut V) -> TtlInstruction;
}

/// Invoked when `delete` removes a matching entry; takes the value by
/// move since the entry is already being retired.
pub trait DelHook<V>: Send + Sync {
    fn on_del(&self, value: V);
}

/// Invoked when opportunistic TTL reclamation retires an entry.
pub trait TtlHook<V>: Send + Sync {
    fn on_ttl(&self, value: V);
}

impl<V, F: Fn(&mut V) -> TtlInstruction + Send + Sync> GetHook<V> for F {
    fn on_get(&self, value: &mut V) -> TtlInstruction {
        self(value)
    }
}

impl<V, F: Fn(&mut V) -> TtlInstruction + Send + Sync> AddHook<V> for F {
    fn on_add(&self, value: &mut V) -> TtlInstruction {
        self(value)
    }
}

impl<V, F: Fn(&mut V, V) -> TtlInstruction + Send + Sync> DupHook<V> for F {
    fn on_dup(&self, existing: &mut V, incoming: V) -> TtlInstruction {
        self(existing, incoming)
    }
}

impl<V, F: Fn(V) + Send + Sync> DelHook<V> for F {
    fn on_del(&self, value: V) {
        self(value)
    }
}

impl<V, F: Fn(V) + Send + Sync> TtlHook<V> for F {
    fn on_ttl(&self, value: V) {
        self(value)
    }
}

/// on_get / on_add default: leave the deadline as-is.
pub(crate) fn default_get<V>(_value: &mut V) -> TtlInstruction {
    TtlInstruction::DontChange
}

pub(crate) fn default_add<V>(_value: &mut V) -> TtlInstruction {
    TtlInstruction::DontChange
}

/// on_dup default: refresh the TTL, discarding the caller's proposed
/// replacement value.
pub(crate) fn default_dup<V>(_existing: &mut V, _incoming: V) -> TtlInstruction {
    TtlInstruction::ResetTtl
}

/// on_del / on_ttl default: nothing to do, the entry is already gone.
pub(crate) fn default_del<V>(_value: V) {}

pub(crate) fn default_ttl<V>(_value: V) {}

/// The table's full hook set. Hooks are fixed at construction time
/// (via [`crate::Config`]) — registering a new set is a setup-time
/// operation, not something safe to race against live callers.
pub(crate) struct HookSet<V> {
    pub(crate) on_get: Box<dyn GetHook<V>>,
    pub(crate) on_add: Box<dyn AddHook<V>>,
    pub(crate) on_dup: Box<dyn DupHook<V>>,
    pub(crate) on_del: Box<dyn DelHook<V>>,
    pub(crate) on_ttl: Box<dyn TtlHook<V>>,
}

impl<V: 'static> Default for HookSet<V> {
    fn default() -> Self {
        Self {
            on_get: Box::new(default_get::<V>),
            on_add: Box::new(default_add::<V>),
            on_dup: Box::new(default_dup::<V>),
            on_del: Box::new(default_del::<V>),
            on_ttl: Box::new(default_ttl::<V>),
        }
    }
}
