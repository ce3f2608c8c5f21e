//! Clock-ordered merging.
//!
//! Every community-scoped entity carries a logical clock. Instead of each
//! message handler comparing clocks on its own, all merges go through
//! [`apply_if_newer`], parameterized by a key extractor so the same rule
//! serves members, requests to join, token permissions and chats.

use std::collections::BTreeMap;

/// An entity ordered by a logical clock.
pub trait Clocked {
    /// The entity's clock. Higher wins.
    fn clock(&self) -> u64;
}

/// How an incoming entity with the same clock as the stored one is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPolicy {
    /// Only strictly newer clocks replace the stored entity.
    Strict,
    /// Equal clocks replace the stored entity too.
    AllowEqual,
}

/// Outcome of [`apply_if_newer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// No entity existed under the key.
    Inserted,
    /// The stored entity was replaced.
    Replaced { previous: u64 },
    /// The incoming entity was not newer and was dropped.
    Stale { current: u64, incoming: u64 },
}

impl Merge {
    /// Whether the incoming entity was written.
    pub fn applied(&self) -> bool {
        !matches!(self, Merge::Stale { .. })
    }
}

/// Compare an incoming clock with the stored one under `policy`.
pub fn is_newer(current: Option<u64>, incoming: u64, policy: ClockPolicy) -> bool {
    match (current, policy) {
        (None, _) => true,
        (Some(current), ClockPolicy::Strict) => incoming > current,
        (Some(current), ClockPolicy::AllowEqual) => incoming >= current,
    }
}

/// Store `incoming` under `key_of(&incoming)` unless an entity with a newer
/// clock is already stored there.
pub fn apply_if_newer<K, V, F>(
    entries: &mut BTreeMap<K, V>,
    incoming: V,
    key_of: F,
    policy: ClockPolicy,
) -> Merge
where
    K: Ord,
    V: Clocked,
    F: Fn(&V) -> K,
{
    let key = key_of(&incoming);
    let current = entries.get(&key).map(Clocked::clock);
    let incoming_clock = incoming.clock();

    if !is_newer(current, incoming_clock, policy) {
        return Merge::Stale {
            current: current.unwrap_or_default(),
            incoming: incoming_clock,
        };
    }

    entries.insert(key, incoming);
    match current {
        Some(previous) => Merge::Replaced { previous },
        None => Merge::Inserted,
    }
}

/// Merge a newer snapshot of an entity map with the local one.
///
/// The result starts from `incoming`. A local entity survives when its clock
/// is newer than the incoming copy, or when it is absent from `incoming` but
/// newer than the snapshot itself (the snapshot predates it).
pub fn merge_entities<K, V, F>(
    local: &BTreeMap<K, V>,
    incoming: BTreeMap<K, V>,
    snapshot_clock: u64,
    key_of: F,
) -> BTreeMap<K, V>
where
    K: Ord,
    V: Clocked + Clone,
    F: Fn(&V) -> K,
{
    let mut merged = incoming;
    for (key, entity) in local {
        if !merged.contains_key(key) && entity.clock() <= snapshot_clock {
            continue;
        }
        apply_if_newer(&mut merged, entity.clone(), &key_of, ClockPolicy::Strict);
    }
    merged
}
