//! Stampede prevention and load fencing.
//!
//! [`StampedeGuard`] keeps at most one backing-store load in flight per key.
//! The first caller for a cold key starts the load; every caller arriving
//! while it runs awaits the same shared future and receives a clone of its
//! result, success or failure. The lock table only guards bookkeeping: no
//! shard lock is held while a load is awaited.
//!
//! [`LoadFence`] lets invalidation win over a load that is already running.
//! Every load holds a [`LoadTicket`]; invalidating a key bumps its generation
//! and the ticket of a load that started earlier no longer matches, so that
//! load must not publish its value to the tiers.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tierbox_core::{CacheKey, KeyPattern, Raw};
use tracing::trace;

use crate::CacheError;

type SharedLoad = Shared<BoxFuture<'static, Result<Raw, CacheError>>>;

/// Whether the caller started the load or joined one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadRole {
    Leader,
    Joined,
}

#[derive(Clone)]
struct InFlight {
    id: u64,
    load: SharedLoad,
}

/// Per-key single-flight coordination.
pub(crate) struct StampedeGuard {
    enabled: bool,
    in_flight: DashMap<CacheKey, InFlight>,
    next_id: AtomicU64,
}

impl StampedeGuard {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Runs `load` unless a load for `key` is already in flight, in which
    /// case that load's result is awaited instead.
    ///
    /// `load` is only constructed when this caller becomes the leader. The
    /// slot is released once the load settles, so the next caller after a
    /// failure retries immediately.
    pub(crate) async fn run_exclusive<F, Fut>(
        &self,
        key: &CacheKey,
        load: F,
    ) -> (Result<Raw, CacheError>, LoadRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Raw, CacheError>> + Send + 'static,
    {
        if !self.enabled {
            return (load().await, LoadRole::Leader);
        }

        let (flight, role) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(slot) => (slot.get().clone(), LoadRole::Joined),
            Entry::Vacant(slot) => {
                let flight = InFlight {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    load: load().boxed().shared(),
                };
                slot.insert(flight.clone());
                (flight, LoadRole::Leader)
            }
        };
        trace!(key = %key, ?role, "awaiting load");

        let result = flight.load.await;
        self.in_flight
            .remove_if(key, |_, current| current.id == flight.id);
        (result, role)
    }

    /// Detaches the in-flight load of `key` so later callers start afresh.
    /// Callers already waiting still receive its result.
    pub(crate) fn forget(&self, key: &CacheKey) {
        self.in_flight.remove(key);
    }

    pub(crate) fn forget_matching(&self, pattern: &KeyPattern) {
        self.in_flight.retain(|key, _| !pattern.matches(key.as_str()));
    }

    pub(crate) fn forget_all(&self) {
        self.in_flight.clear();
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[derive(Debug)]
struct FenceSlot {
    generation: u64,
    loads: usize,
}

/// Generation counters for keys with a load in progress.
#[derive(Debug, Default)]
pub(crate) struct LoadFence {
    slots: DashMap<CacheKey, FenceSlot>,
}

impl LoadFence {
    /// Registers a load of `key`.
    pub(crate) fn enter(&self, key: &CacheKey) -> LoadTicket<'_> {
        let generation = {
            let mut slot = self.slots.entry(key.clone()).or_insert(FenceSlot {
                generation: 0,
                loads: 0,
            });
            slot.loads += 1;
            slot.generation
        };
        LoadTicket {
            fence: self,
            key: key.clone(),
            generation,
        }
    }

    /// Invalidates every load of `key` currently in progress.
    pub(crate) fn supersede(&self, key: &CacheKey) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.generation += 1;
        }
    }

    pub(crate) fn supersede_matching(&self, pattern: &KeyPattern) {
        for mut slot in self.slots.iter_mut() {
            if pattern.matches(slot.key().as_str()) {
                slot.generation += 1;
            }
        }
    }

    pub(crate) fn supersede_all(&self) {
        for mut slot in self.slots.iter_mut() {
            slot.generation += 1;
        }
    }

    fn is_current(&self, key: &CacheKey, generation: u64) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.generation == generation)
    }

    fn leave(&self, key: &CacheKey) {
        if let Entry::Occupied(mut slot) = self.slots.entry(key.clone()) {
            slot.get_mut().loads -= 1;
            if slot.get().loads == 0 {
                slot.remove();
            }
        }
    }
}

/// Registration of one load with the [`LoadFence`].
pub(crate) struct LoadTicket<'a> {
    fence: &'a LoadFence,
    key: CacheKey,
    generation: u64,
}

impl LoadTicket<'_> {
    /// `false` once the key was invalidated after this load started.
    pub(crate) fn is_current(&self) -> bool {
        self.fence.is_current(&self.key, self.generation)
    }
}

impl Drop for LoadTicket<'_> {
    fn drop(&mut self) {
        self.fence.leave(&self.key);
    }
}
