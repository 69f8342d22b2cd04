//! Key, pattern, dependency and event invalidation.
//!
//! Dependencies are stored as reverse edges: each parent key maps to the set
//! of keys that declared a dependency on it. Invalidating a key walks that
//! mapping breadth-first and removes every reachable key from both tiers.
//! Keys already visited in the current pass are skipped, so cyclic edges
//! terminate.
//!
//! Edges are not swept when entries expire. The graph remembers until when
//! each key was last known to be cached, and [`CacheEngine::compact_dependencies`]
//! drops edges touching keys that have been gone for longer than the
//! configured grace period. The reloader runs compaction automatically once
//! the edge count exceeds `dependency_compaction_threshold`.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use smol_str::SmolStr;
use tierbox_core::{CacheKey, KeyPattern, TierLevel};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::CacheError;
use crate::engine::CacheEngine;

/// Keys grouped under named events.
pub(crate) type EventTable = DashMap<SmolStr, Vec<CacheKey>>;

/// Reverse dependency edges plus the liveness data compaction needs.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    dependents: DashMap<CacheKey, HashSet<CacheKey>>,
    alive_until: DashMap<CacheKey, Instant>,
    edges: AtomicUsize,
}

impl DependencyGraph {
    /// Records that `key` depends on `depends_on`. Returns `false` if the
    /// edge already existed.
    pub(crate) fn add(&self, key: &CacheKey, depends_on: &CacheKey) -> bool {
        let now = Instant::now();
        self.alive_until.entry(key.clone()).or_insert(now);
        self.alive_until.entry(depends_on.clone()).or_insert(now);
        let inserted = self
            .dependents
            .entry(depends_on.clone())
            .or_default()
            .insert(key.clone());
        if inserted {
            self.edges.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    pub(crate) fn remove(&self, key: &CacheKey, depends_on: &CacheKey) -> bool {
        let mut removed = false;
        self.dependents.remove_if_mut(depends_on, |_, set| {
            removed = set.remove(key);
            set.is_empty()
        });
        if removed {
            self.edges.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Removes every edge touching `key`, in either direction.
    pub(crate) fn clear_key(&self, key: &CacheKey) -> usize {
        let mut removed = self
            .dependents
            .remove(key)
            .map_or(0, |(_, set)| set.len());
        self.dependents.retain(|_, set| {
            if set.remove(key) {
                removed += 1;
            }
            !set.is_empty()
        });
        self.alive_until.remove(key);
        self.edges.fetch_sub(removed, Ordering::Relaxed);
        removed
    }

    pub(crate) fn dependents_of(&self, key: &CacheKey) -> Vec<CacheKey> {
        self.dependents
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Notes that `key` is cached for at least `lifetime` from now. Keys
    /// outside the graph are ignored.
    pub(crate) fn touch(&self, key: &CacheKey, lifetime: Duration) {
        if let Some(mut until) = self.alive_until.get_mut(key) {
            let now = Instant::now();
            let candidate = now.checked_add(lifetime).unwrap_or(now);
            if candidate > *until {
                *until = candidate;
            }
        }
    }

    /// Drops edges touching keys not cached since `grace` before `now`.
    pub(crate) fn compact(&self, now: Instant, grace: Duration) -> usize {
        let stale: HashSet<CacheKey> = self
            .alive_until
            .iter()
            .filter(|until| {
                until
                    .value()
                    .checked_add(grace)
                    .is_some_and(|deadline| deadline < now)
            })
            .map(|until| until.key().clone())
            .collect();
        if stale.is_empty() {
            return 0;
        }

        let mut removed = 0;
        self.dependents.retain(|parent, set| {
            if stale.contains(parent) {
                removed += set.len();
                return false;
            }
            let before = set.len();
            set.retain(|dependent| !stale.contains(dependent));
            removed += before - set.len();
            !set.is_empty()
        });
        self.edges.fetch_sub(removed, Ordering::Relaxed);

        let mut referenced = HashSet::new();
        for entry in self.dependents.iter() {
            referenced.insert(entry.key().clone());
            referenced.extend(entry.value().iter().cloned());
        }
        self.alive_until.retain(|key, _| referenced.contains(key));
        removed
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.edges.load(Ordering::Relaxed)
    }
}

impl CacheEngine {
    /// Declares that `key` depends on `depends_on`: invalidating
    /// `depends_on` also invalidates `key`. A key may depend on several
    /// parents. Returns `false` if the edge already existed.
    pub fn add_dependency(
        &self,
        key: impl Into<CacheKey>,
        depends_on: impl Into<CacheKey>,
    ) -> bool {
        let (key, depends_on) = (key.into(), depends_on.into());
        let added = self.inner.graph.add(&key, &depends_on);
        let edges = self.inner.graph.edge_count();
        if added && edges > self.inner.config.dependency_compaction_threshold {
            self.compact_dependencies();
        }
        added
    }

    /// Removes a single edge. Returns `false` if it did not exist.
    pub fn remove_dependency(
        &self,
        key: impl Into<CacheKey>,
        depends_on: impl Into<CacheKey>,
    ) -> bool {
        self.inner.graph.remove(&key.into(), &depends_on.into())
    }

    /// Removes every edge from or to `key`. Returns the number removed.
    pub fn clear_dependencies(&self, key: impl Into<CacheKey>) -> usize {
        self.inner.graph.clear_key(&key.into())
    }

    /// Keys that directly depend on `key`.
    pub fn dependents(&self, key: impl Into<CacheKey>) -> Vec<CacheKey> {
        self.inner.graph.dependents_of(&key.into())
    }

    /// Number of dependency edges currently stored.
    pub fn dependency_count(&self) -> usize {
        self.inner.graph.edge_count()
    }

    /// Removes `key` and, transitively, every key depending on it from both
    /// tiers. Returns the number of keys visited.
    ///
    /// Every key is attempted even when a tier fails; the first failure is
    /// returned afterwards. Loads of a visited key that are in flight do not
    /// publish their result.
    pub async fn invalidate(&self, key: impl Into<CacheKey>) -> Result<usize, CacheError> {
        let key = key.into();
        let mut visited = HashSet::new();
        let mut first_error = None;
        self.cascade(key.clone(), &mut visited, &mut first_error)
            .await;
        debug!(key = %key, invalidated = visited.len(), "invalidated");
        match first_error {
            Some(err) => Err(err),
            None => Ok(visited.len()),
        }
    }

    async fn cascade(
        &self,
        root: CacheKey,
        visited: &mut HashSet<CacheKey>,
        first_error: &mut Option<CacheError>,
    ) {
        let mut queue = VecDeque::from([root]);
        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            if let Err(err) = self.remove_everywhere(&key).await {
                warn!(key = %key, error = %err, "invalidation failed");
                first_error.get_or_insert(err);
            }
            queue.extend(
                self.inner
                    .graph
                    .dependents_of(&key)
                    .into_iter()
                    .filter(|dependent| !visited.contains(dependent)),
            );
        }
    }

    /// Removes every key matching the glob `pattern` from both tiers and
    /// returns the number of distinct keys removed.
    ///
    /// Dependents of matched keys are not cascaded to.
    pub async fn invalidate_pattern(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        self.inner.fence.supersede_matching(pattern);
        self.inner.guard.forget_matching(pattern);

        let mut removed = HashSet::new();
        let mut first_error = None;

        match self.remote(self.inner.l2.scan(pattern)).await {
            Ok(keys) => {
                for key in keys {
                    match self.delete_l2(&key).await {
                        Ok(true) => {
                            removed.insert(key);
                        }
                        Ok(false) => {}
                        Err(err) => {
                            first_error.get_or_insert(err);
                        }
                    }
                }
            }
            Err(err) => {
                warn!(%pattern, error = %err, "l2 scan failed");
                self.inner.metrics.error(TierLevel::L2);
                first_error.get_or_insert(CacheError::tier(TierLevel::L2, err));
            }
        }

        self.inner.fence.supersede_matching(pattern);
        match self.inner.l1.scan(pattern).await {
            Ok(keys) => {
                for key in keys {
                    match self.delete_l1(&key).await {
                        Ok(true) => {
                            removed.insert(key);
                        }
                        Ok(false) => {}
                        Err(err) => {
                            first_error.get_or_insert(err);
                        }
                    }
                }
            }
            Err(err) => {
                self.inner.metrics.error(TierLevel::L1);
                first_error.get_or_insert(CacheError::tier(TierLevel::L1, err));
            }
        }

        debug!(%pattern, removed = removed.len(), "invalidated pattern");
        match first_error {
            Some(err) => Err(err),
            None => Ok(removed.len()),
        }
    }

    /// Groups `keys` under `event`. Keys already registered for the event
    /// are not added twice.
    pub fn on_event<K>(&self, event: impl Into<SmolStr>, keys: impl IntoIterator<Item = K>)
    where
        K: Into<CacheKey>,
    {
        let mut group = self.inner.events.entry(event.into()).or_default();
        for key in keys {
            let key = key.into();
            if !group.contains(&key) {
                group.push(key);
            }
        }
    }

    /// Invalidates, with cascade, every key registered under `event`.
    /// Returns the number of keys invalidated; an unknown event yields zero.
    pub async fn trigger_event(&self, event: &str) -> Result<usize, CacheError> {
        let Some(keys) = self.inner.events.get(event).map(|group| group.clone()) else {
            debug!(event, "no keys registered for event");
            return Ok(0);
        };
        let mut visited = HashSet::new();
        let mut first_error = None;
        for key in keys {
            self.cascade(key, &mut visited, &mut first_error).await;
        }
        info!(event, invalidated = visited.len(), "event triggered");
        match first_error {
            Some(err) => Err(err),
            None => Ok(visited.len()),
        }
    }

    /// Drops dependency edges touching keys that have not been cached for
    /// longer than `dependency_grace_period`. Returns the number removed.
    pub fn compact_dependencies(&self) -> usize {
        let removed = self
            .inner
            .graph
            .compact(Instant::now(), self.inner.config.dependency_grace_period);
        if removed > 0 {
            info!(
                removed,
                remaining = self.inner.graph.edge_count(),
                "compacted dependency graph"
            );
        }
        removed
    }
}
