use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::CorrelationOverflow;

/// Per-key bound on remembered step observations.
pub const MAX_OBSERVATIONS_PER_KEY: usize = 256;

/// A fixed set of independently locked LRU maps. Keys hash to one shard, so
/// work on different keys rarely contends.
pub(crate) struct ShardedLru<K: Hash + Eq, V> {
    shards: Vec<Mutex<LruCache<K, V>>>,
    per_shard: usize,
}

impl<K: Hash + Eq, V> ShardedLru<K, V> {
    pub(crate) fn new(total_capacity: usize, shards: usize) -> Self {
        // Every shard holds at least one key, so more shards than keys would
        // raise the real bound above `total_capacity`.
        let shards = shards.clamp(1, total_capacity.max(1));
        let per_shard = (total_capacity / shards).max(1);
        let cap = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shards).map(|_| Mutex::new(LruCache::new(cap))).collect(),
            per_shard,
        }
    }

    pub(crate) fn shard<Q: Hash + ?Sized>(&self, key: &Q) -> MutexGuard<'_, LruCache<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        self.shards[idx].lock()
    }

    pub(crate) fn per_shard(&self) -> usize {
        self.per_shard
    }

    pub(crate) fn shards(&self) -> impl Iterator<Item = &Mutex<LruCache<K, V>>> {
        self.shards.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StateKey {
    rule_id: String,
    key: String,
}

#[derive(Debug)]
struct Observation {
    timestamp: DateTime<Utc>,
    steps: Vec<usize>,
}

#[derive(Debug)]
struct CorrelationState {
    window: Duration,
    observations: Vec<Observation>,
    satisfied: bool,
    last_seen: DateTime<Utc>,
}

impl CorrelationState {
    fn new(window: Duration, now: DateTime<Utc>) -> Self {
        Self {
            window,
            observations: Vec::new(),
            satisfied: false,
            last_seen: now,
        }
    }

    fn record(&mut self, timestamp: DateTime<Utc>, steps: Vec<usize>) {
        // Kept ordered by event time; equal timestamps keep arrival order.
        let at = self.observations.partition_point(|o| o.timestamp <= timestamp);
        self.observations.insert(at, Observation { timestamp, steps });
        if self.observations.len() > MAX_OBSERVATIONS_PER_KEY {
            self.observations.remove(0);
        }
        if timestamp > self.last_seen {
            self.last_seen = timestamp;
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        // Near the bottom of the representable range nothing can be older
        // than the window.
        let Some(horizon) = now.checked_sub_signed(self.window) else {
            return;
        };
        self.observations.retain(|o| o.timestamp >= horizon);
    }

    /// Instant after which the state is idle past its window plus `grace`.
    /// `None` when that lies beyond the representable range.
    fn expires_at(&self, grace: Duration) -> Option<DateTime<Utc>> {
        self.last_seen
            .checked_add_signed(self.window)?
            .checked_add_signed(grace)
    }

    /// Are all steps present, in order, among the retained observations?
    fn sequence_complete(&self, step_count: usize) -> bool {
        let mut next = 0;
        for observation in &self.observations {
            if next < step_count && observation.steps.contains(&next) {
                next += 1;
            }
        }
        next == step_count
    }
}

/// Outcome of feeding one event into a correlation key.
#[derive(Debug, Default)]
pub struct Observed {
    /// The condition went from unsatisfied to satisfied on this event.
    pub fired: bool,
    pub overflow: Option<CorrelationOverflow>,
}

/// Windowed, edge-triggered state for every (rule, correlation key) pair.
///
/// An alert fires only on the transition into the satisfied state; the
/// condition has to fall out of its window before it can fire again.
pub struct CorrelationTable {
    states: ShardedLru<StateKey, CorrelationState>,
    grace: Duration,
}

impl CorrelationTable {
    pub fn new(max_tracked_keys: usize, shards: usize, grace: Duration) -> Self {
        Self {
            states: ShardedLru::new(max_tracked_keys, shards),
            grace,
        }
    }

    /// Record an event that satisfied `steps` of the rule's sequence.
    pub fn observe(
        &self,
        rule_id: &str,
        key: &str,
        window: Duration,
        step_count: usize,
        timestamp: DateTime<Utc>,
        steps: Vec<usize>,
    ) -> Observed {
        let state_key = StateKey {
            rule_id: rule_id.to_string(),
            key: key.to_string(),
        };
        let mut shard = self.states.shard(&state_key);
        let mut observed = Observed::default();

        if !shard.contains(&state_key) && shard.len() >= self.states.per_shard() {
            if let Some((evicted, _)) = shard.pop_lru() {
                let overflow = CorrelationOverflow {
                    rule_id: evicted.rule_id,
                    key: evicted.key,
                    capacity: self.states.per_shard(),
                };
                warn!(rule_id = %overflow.rule_id, key = %overflow.key, "{overflow}");
                observed.overflow = Some(overflow);
            }
        }

        let state = shard.get_or_insert_mut(state_key, || CorrelationState::new(window, timestamp));
        // A reload may have changed the window for this rule.
        state.window = window;
        state.record(timestamp, steps);
        state.prune(state.last_seen);

        let complete = state.sequence_complete(step_count);
        observed.fired = complete && !state.satisfied;
        state.satisfied = complete;
        if observed.fired {
            debug!(rule_id, key, "correlation satisfied");
        }
        observed
    }

    /// Drop every key idle for longer than its window plus the grace period.
    /// Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in self.states.shards() {
            let mut shard = shard.lock();
            let expired: Vec<StateKey> = shard
                .iter()
                .filter(|(_, state)| state.expires_at(self.grace).is_some_and(|at| at < now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                shard.pop(&key);
                removed += 1;
            }
        }
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn table() -> CorrelationTable {
        CorrelationTable::new(1024, 4, Duration::seconds(5))
    }

    const WINDOW: i64 = 10;

    fn observe(table: &CorrelationTable, key: &str, at: i64, steps: Vec<usize>) -> Observed {
        table.observe("mount-then-exec", key, Duration::seconds(WINDOW), 2, t(at), steps)
    }

    #[test]
    fn ordered_steps_inside_window_fire_once() {
        let table = table();
        assert!(!observe(&table, "c1", 0, vec![0]).fired);
        assert!(observe(&table, "c1", 5, vec![1]).fired);
        for at in 6..9 {
            assert!(!observe(&table, "c1", at, vec![1]).fired, "refired at {at}");
        }
    }

    #[test]
    fn steps_outside_window_do_not_fire() {
        let table = table();
        observe(&table, "c1", 0, vec![0]);
        assert!(!observe(&table, "c1", 15, vec![1]).fired);
    }

    #[test]
    fn out_of_order_steps_do_not_fire() {
        let table = table();
        observe(&table, "c1", 0, vec![1]);
        assert!(!observe(&table, "c1", 1, vec![0]).fired);
    }

    #[test]
    fn keys_are_independent() {
        let table = table();
        observe(&table, "c1", 0, vec![0]);
        assert!(!observe(&table, "c2", 1, vec![1]).fired);
        assert!(observe(&table, "c1", 2, vec![1]).fired);
    }

    #[test]
    fn rearms_after_condition_leaves_window() {
        let table = table();
        observe(&table, "c1", 0, vec![0]);
        assert!(observe(&table, "c1", 1, vec![1]).fired);
        // Mount at 0 has expired; the condition resets.
        assert!(!observe(&table, "c1", 20, vec![1]).fired);
        observe(&table, "c1", 21, vec![0]);
        assert!(observe(&table, "c1", 22, vec![1]).fired);
    }

    #[test]
    fn late_event_is_ordered_by_timestamp() {
        let table = table();
        observe(&table, "c1", 5, vec![1]);
        // Mount delivered late but stamped earlier than the exec.
        assert!(observe(&table, "c1", 2, vec![0]).fired);
    }

    #[test]
    fn sweep_removes_idle_keys() {
        let table = table();
        observe(&table, "c1", 0, vec![0]);
        observe(&table, "c2", 12, vec![0]);
        assert_eq!(table.tracked_keys(), 2);

        // c1 idle since 0: expires after 0 + 10 + 5.
        assert_eq!(table.sweep(t(16)), 1);
        assert_eq!(table.tracked_keys(), 1);
        assert_eq!(table.sweep(t(16)), 0);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let table = CorrelationTable::new(2, 1, Duration::seconds(5));
        observe(&table, "c1", 0, vec![0]);
        observe(&table, "c2", 1, vec![0]);
        let observed = observe(&table, "c3", 2, vec![0]);
        let overflow = observed.overflow.expect("eviction reported");
        assert_eq!(overflow.key, "c1");
        assert_eq!(table.tracked_keys(), 2);

        // c1 starts over: its earlier mount is gone.
        assert!(!observe(&table, "c1", 3, vec![1]).fired);
    }

    #[test]
    fn small_capacity_is_not_rounded_up_by_shards() {
        let table = CorrelationTable::new(3, 16, Duration::seconds(5));
        for (i, key) in ["a", "b", "c", "d", "e", "f"].into_iter().enumerate() {
            observe(&table, key, i as i64, vec![0]);
        }
        assert!(table.tracked_keys() <= 3, "tracked {}", table.tracked_keys());
    }

    #[test]
    fn extreme_timestamps_do_not_break_prune_or_sweep() {
        let table = table();
        let window = Duration::seconds(WINDOW);
        table.observe("mount-then-exec", "far-future", window, 2, DateTime::<Utc>::MAX_UTC, vec![0]);
        table.observe("mount-then-exec", "far-past", window, 2, DateTime::<Utc>::MIN_UTC, vec![0]);
        observe(&table, "c1", 0, vec![0]);
        assert_eq!(table.tracked_keys(), 3);

        // Only the ordinary key and the one at the bottom of the range expire.
        assert_eq!(table.sweep(t(100)), 2);
        assert_eq!(table.tracked_keys(), 1);
        assert_eq!(table.sweep(t(100)), 0);
    }
}
