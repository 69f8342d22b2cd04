//! Tracked background tasks.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use smol_str::SmolStr;
use tierbox_core::CacheKey;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, warn};

use super::policy::{OffloadConfig, TimeoutPolicy};

#[cfg(feature = "metrics")]
use crate::metrics::{
    OFFLOAD_TASK_DURATION, OFFLOAD_TASKS_ACTIVE, OFFLOAD_TASKS_COMPLETED,
    OFFLOAD_TASKS_DEDUPLICATED, OFFLOAD_TASKS_SPAWNED, OFFLOAD_TASKS_TIMEOUT,
};

/// Identity of an offloaded task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OffloadKey {
    /// Task working on a cache key. Subject to deduplication.
    Cache(CacheKey),
    /// Task without a natural key, numbered within its kind.
    Generated {
        /// Kind of the task, e.g. "write_behind".
        kind: SmolStr,
        /// Sequence number shared by all kinds.
        id: u64,
    },
}

impl OffloadKey {
    /// Label for logs and metrics: `cache` or the generated kind.
    pub fn kind(&self) -> SmolStr {
        match self {
            Self::Cache(_) => SmolStr::new_static("cache"),
            Self::Generated { kind, .. } => kind.clone(),
        }
    }
}

impl From<CacheKey> for OffloadKey {
    fn from(key: CacheKey) -> Self {
        Self::Cache(key)
    }
}

#[derive(Debug)]
struct TrackedTask {
    id: u64,
    handle: AbortHandle,
}

#[derive(Debug)]
struct OffloadManagerInner {
    config: OffloadConfig,
    tasks: DashMap<OffloadKey, TrackedTask>,
    task_counter: AtomicU64,
    active: AtomicUsize,
    idle: Notify,
}

/// Removes the task from the table and wakes flush waiters when the task
/// future finishes or is dropped by an abort.
struct Completion {
    inner: Arc<OffloadManagerInner>,
    key: OffloadKey,
    id: u64,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.inner
            .tasks
            .remove_if(&self.key, |_, task| task.id == self.id);
        if self.inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
        #[cfg(feature = "metrics")]
        metrics::gauge!(*OFFLOAD_TASKS_ACTIVE, "kind" => self.key.kind().to_string())
            .decrement(1.0);
    }
}

/// Spawns and tracks background tasks.
///
/// Cloning is cheap; clones share the task table.
#[derive(Clone, Debug)]
pub struct OffloadManager {
    inner: Arc<OffloadManagerInner>,
}

impl OffloadManager {
    /// Creates an empty manager.
    pub fn new(config: OffloadConfig) -> Self {
        Self {
            inner: Arc::new(OffloadManagerInner {
                config,
                tasks: DashMap::new(),
                task_counter: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.task_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs `task` under a fresh generated key, which is returned.
    pub fn spawn<F>(&self, kind: impl Into<SmolStr>, task: F) -> OffloadKey
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = OffloadKey::Generated {
            kind: kind.into(),
            id: self.next_id(),
        };
        self.spawn_with_key(key.clone(), task);
        key
    }

    /// Spawn a task under `key`.
    ///
    /// With deduplication enabled a cache-keyed task is skipped while another
    /// task for the same key is in flight. Returns `false` if skipped.
    pub fn spawn_with_key<K, F>(&self, key: K, task: F) -> bool
    where
        K: Into<OffloadKey>,
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let dedupe = self.inner.config.deduplicate && matches!(key, OffloadKey::Cache(_));

        // The slot stays locked until the handle is stored, so the task
        // cannot remove itself before it is tracked.
        let slot = self.inner.tasks.entry(key.clone());
        if dedupe && matches!(slot, Entry::Occupied(_)) {
            debug!(?key, "task deduplicated, already in flight");
            #[cfg(feature = "metrics")]
            metrics::counter!(*OFFLOAD_TASKS_DEDUPLICATED, "kind" => key.kind().to_string())
                .increment(1);
            return false;
        }

        let id = self.next_id();
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        let completion = Completion {
            inner: self.inner.clone(),
            key: key.clone(),
            id,
        };
        let handle = self.spawn_inner(task, key, completion);
        slot.insert(TrackedTask { id, handle });
        true
    }

    /// Number of tasks spawned and not yet finished.
    pub fn active_task_count(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Returns `true` if a task for `key` is in flight.
    pub fn is_in_flight(&self, key: &OffloadKey) -> bool {
        self.inner
            .tasks
            .get(key)
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Aborts the task tracked under `key`. Returns `false` if none is.
    pub fn cancel(&self, key: &OffloadKey) -> bool {
        match self.inner.tasks.get(key) {
            Some(task) => {
                task.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked task.
    pub fn cancel_all(&self) {
        for task in self.inner.tasks.iter() {
            task.handle.abort();
        }
    }

    /// Wait until every spawned task has finished, including tasks spawned
    /// while waiting.
    pub async fn wait_all(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.inner.active.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// [`wait_all`](Self::wait_all) bounded by `limit`. Returns `false` if
    /// tasks were still running when it elapsed.
    pub async fn wait_all_within(&self, limit: std::time::Duration) -> bool {
        tokio::time::timeout(limit, self.wait_all()).await.is_ok()
    }

    fn spawn_inner<F>(&self, task: F, key: OffloadKey, completion: Completion) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timeout_policy = self.inner.config.timeout_policy;
        let kind = key.kind();
        let span = info_span!("background_task", %kind, ?key);

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(*OFFLOAD_TASKS_SPAWNED, "kind" => kind.to_string())
                .increment(1);
            metrics::gauge!(*OFFLOAD_TASKS_ACTIVE, "kind" => kind.to_string())
                .increment(1.0);
        }

        let handle = tokio::spawn(
            async move {
                let _completion = completion;
                let start = Instant::now();
                match timeout_policy {
                    TimeoutPolicy::None => task.await,
                    TimeoutPolicy::Cancel(limit) => {
                        if tokio::time::timeout(limit, task).await.is_err() {
                            warn!(?key, "background task aborted after timeout");
                            #[cfg(feature = "metrics")]
                            metrics::counter!(
                                *OFFLOAD_TASKS_TIMEOUT,
                                "kind" => kind.to_string()
                            )
                            .increment(1);
                            return;
                        }
                    }
                    TimeoutPolicy::Warn(limit) => {
                        task.await;
                        let elapsed = start.elapsed();
                        if elapsed > limit {
                            warn!(
                                ?key,
                                elapsed_ms = elapsed.as_millis(),
                                threshold_ms = limit.as_millis(),
                                "background task ran past its limit"
                            );
                        }
                    }
                }
                #[cfg(feature = "metrics")]
                {
                    metrics::counter!(*OFFLOAD_TASKS_COMPLETED, "kind" => kind.to_string())
                        .increment(1);
                    metrics::histogram!(*OFFLOAD_TASK_DURATION, "kind" => kind.to_string())
                        .record(start.elapsed().as_secs_f64());
                }
            }
            .instrument(span),
        );
        handle.abort_handle()
    }
}

impl Default for OffloadManager {
    fn default() -> Self {
        Self::new(OffloadConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cache_keyed_tasks_are_deduplicated() {
        let manager = OffloadManager::default();
        let key = CacheKey::new("user:1");
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        assert!(manager.spawn_with_key(key.clone(), async move {
            let _ = wait.await;
        }));
        assert!(!manager.spawn_with_key(key.clone(), async {}));
        assert!(manager.is_in_flight(&OffloadKey::Cache(key.clone())));

        release.send(()).unwrap();
        manager.wait_all().await;
        assert!(!manager.is_in_flight(&OffloadKey::Cache(key.clone())));
        assert!(manager.spawn_with_key(key, async {}));
        manager.wait_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wait_all_follows_delayed_tasks() {
        let manager = OffloadManager::default();
        let done = Arc::new(AtomicUsize::new(0));
        for delay in [10, 20, 30] {
            let done = done.clone();
            manager.spawn("write_behind", async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(manager.active_task_count(), 3);
        manager.wait_all().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(manager.active_task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_policy_stops_slow_tasks() {
        let manager = OffloadManager::new(
            OffloadConfig::builder()
                .timeout(Duration::from_millis(50))
                .build(),
        );
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = finished.clone();
        manager.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        });
        assert!(manager.wait_all_within(Duration::from_secs(1)).await);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_releases_waiters() {
        let manager = OffloadManager::default();
        manager.spawn("forever", std::future::pending::<()>());
        assert!(!manager.wait_all_within(Duration::from_millis(10)).await);
        manager.cancel_all();
        assert!(manager.wait_all_within(Duration::from_millis(10)).await);
    }
}
