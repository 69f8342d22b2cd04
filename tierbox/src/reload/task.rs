//! Reload task table.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use smol_str::SmolStr;
use tierbox_core::{CacheKey, LoadArgs};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use super::{ReloadMode, ReloadTaskInfo, TaskState};
use crate::CacheError;
use crate::config::ReloadConcurrency;

#[derive(Debug, Clone)]
pub(crate) struct ReloadTask {
    pub(crate) key: CacheKey,
    pub(crate) loader: SmolStr,
    pub(crate) args: LoadArgs,
    pub(crate) interval: Duration,
    pub(crate) mode: ReloadMode,
    pub(crate) state: TaskState,
    pub(crate) next_run_at: Instant,
    pub(crate) last_reload_at: Option<chrono::DateTime<Utc>>,
    pub(crate) consecutive_errors: u32,
}

impl ReloadTask {
    pub(crate) fn new(
        key: CacheKey,
        loader: SmolStr,
        args: LoadArgs,
        interval: Duration,
        mode: ReloadMode,
        now: Instant,
    ) -> Self {
        Self {
            key,
            loader,
            args,
            interval,
            mode,
            state: TaskState::Idle,
            next_run_at: now + interval,
            last_reload_at: None,
            consecutive_errors: 0,
        }
    }

    /// Moves `next_run_at` forward by whole intervals until it is in the
    /// future. Missed runs are skipped, not replayed.
    fn advance(&mut self, now: Instant) {
        while self.next_run_at <= now {
            self.next_run_at += self.interval;
        }
    }

    fn info(&self, now: Instant) -> ReloadTaskInfo {
        ReloadTaskInfo {
            key: self.key.clone(),
            loader: self.loader.clone(),
            interval: self.interval,
            mode: self.mode,
            state: self.state,
            next_run_in: self.next_run_at.saturating_duration_since(now),
            last_reload_at: self.last_reload_at,
            consecutive_error_count: self.consecutive_errors,
        }
    }
}

/// Work handed out for a task that must call its loader.
pub(crate) struct ReloadJob {
    pub(crate) key: CacheKey,
    pub(crate) loader: SmolStr,
    pub(crate) args: LoadArgs,
    pub(crate) permit: OwnedSemaphorePermit,
}

/// What claiming a due task produced.
pub(crate) enum Claim {
    /// Lazy task: the key was marked for refresh.
    Marked,
    /// Eager task: run the job, then report completion.
    Run(ReloadJob),
}

/// Tasks by key, the lazy refresh marks and the concurrency permits.
pub(crate) struct ReloadTable {
    tasks: DashMap<CacheKey, ReloadTask>,
    refresh: DashSet<CacheKey>,
    permits: Arc<Semaphore>,
}

impl ReloadTable {
    pub(crate) fn new(concurrency: ReloadConcurrency) -> Self {
        Self {
            tasks: DashMap::new(),
            refresh: DashSet::new(),
            permits: Arc::new(Semaphore::new(usize::from(concurrency.get()))),
        }
    }

    /// Adds `task`, replacing any task for the same key. Returns `true` if
    /// one was replaced.
    pub(crate) fn insert(&self, task: ReloadTask) -> bool {
        self.tasks.insert(task.key.clone(), task).is_some()
    }

    pub(crate) fn remove(&self, key: &CacheKey) -> bool {
        self.refresh.remove(key);
        self.tasks.remove(key).is_some()
    }

    pub(crate) fn remove_for_loader(&self, loader: &str) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|key, task| {
            let keep = task.loader != loader;
            if !keep {
                self.refresh.remove(key);
            }
            keep
        });
        before.saturating_sub(self.tasks.len())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn mark_refresh(&self, key: &CacheKey) {
        self.refresh.insert(key.clone());
    }

    /// Consumes the refresh mark of `key`.
    pub(crate) fn take_refresh(&self, key: &CacheKey) -> bool {
        self.refresh.remove(key).is_some()
    }

    /// Keys of idle tasks whose next run is due.
    pub(crate) fn due(&self, now: Instant) -> Vec<CacheKey> {
        self.tasks
            .iter()
            .filter(|task| task.state == TaskState::Idle && task.next_run_at <= now)
            .map(|task| task.key.clone())
            .collect()
    }

    /// Claims a due task for this tick.
    ///
    /// Returns `None` when the task is gone, not due, already running, or
    /// no permit is free; in the last case it stays due for the next tick.
    pub(crate) fn claim_due(&self, key: &CacheKey, now: Instant) -> Option<Claim> {
        let mut task = self.tasks.get_mut(key)?;
        if task.state != TaskState::Idle || task.next_run_at > now {
            return None;
        }
        match task.mode {
            ReloadMode::Lazy => {
                task.advance(now);
                self.refresh.insert(key.clone());
                Some(Claim::Marked)
            }
            ReloadMode::Eager => {
                let permit = self.permits.clone().try_acquire_owned().ok()?;
                task.state = TaskState::Running;
                task.advance(now);
                Some(Claim::Run(ReloadJob {
                    key: key.clone(),
                    loader: task.loader.clone(),
                    args: task.args.clone(),
                    permit,
                }))
            }
        }
    }

    /// Marks the task running for a manual reload. `None` if it is gone or
    /// already running.
    pub(crate) fn begin(&self, key: &CacheKey, permit: OwnedSemaphorePermit) -> Option<ReloadJob> {
        let mut task = self.tasks.get_mut(key)?;
        if task.state == TaskState::Running {
            return None;
        }
        task.state = TaskState::Running;
        Some(ReloadJob {
            key: key.clone(),
            loader: task.loader.clone(),
            args: task.args.clone(),
            permit,
        })
    }

    /// Returns the task to idle after a run and updates its counters.
    /// Returns the consecutive error count, or `None` if the task was
    /// cancelled meanwhile.
    pub(crate) fn complete(&self, key: &CacheKey, succeeded: bool) -> Option<u32> {
        let mut task = self.tasks.get_mut(key)?;
        task.state = TaskState::Idle;
        if succeeded {
            task.last_reload_at = Some(Utc::now());
            task.consecutive_errors = 0;
            self.refresh.remove(key);
        } else {
            task.consecutive_errors = task.consecutive_errors.saturating_add(1);
        }
        Some(task.consecutive_errors)
    }

    /// Returns a claimed task to idle without touching its counters.
    pub(crate) fn release(&self, key: &CacheKey) {
        if let Some(mut task) = self.tasks.get_mut(key) {
            task.state = TaskState::Idle;
        }
    }

    /// Waits for a reload permit.
    pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit, CacheError> {
        self.permits.clone().acquire_owned().await.map_err(|_| {
            CacheError::InvalidConfiguration("reload permits are closed".to_owned())
        })
    }

    pub(crate) fn snapshot(&self, key: &CacheKey, now: Instant) -> Option<ReloadTaskInfo> {
        self.tasks.get(key).map(|task| task.info(now))
    }

    pub(crate) fn infos(&self, now: Instant) -> Vec<ReloadTaskInfo> {
        let mut infos: Vec<ReloadTaskInfo> =
            self.tasks.iter().map(|task| task.info(now)).collect();
        infos.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(concurrency: u16) -> ReloadTable {
        ReloadTable::new(ReloadConcurrency::new(concurrency).unwrap())
    }

    fn task(key: &str, mode: ReloadMode, now: Instant) -> ReloadTask {
        ReloadTask::new(
            CacheKey::new(key),
            SmolStr::new("loader"),
            LoadArgs::new(),
            Duration::from_secs(60),
            mode,
            now,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn task_is_due_after_one_interval() {
        let table = table(4);
        let start = Instant::now();
        table.insert(task("k", ReloadMode::Eager, start));

        assert!(table.due(start + Duration::from_secs(59)).is_empty());
        assert_eq!(
            table.due(start + Duration::from_secs(60)),
            vec![CacheKey::new("k")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn claim_advances_by_whole_intervals() {
        let table = table(4);
        let start = Instant::now();
        let key = CacheKey::new("k");
        table.insert(task("k", ReloadMode::Eager, start));

        let now = start + Duration::from_secs(150);
        let Some(Claim::Run(job)) = table.claim_due(&key, now) else {
            panic!("eager task should run");
        };
        assert!(table.claim_due(&key, now).is_none());
        drop(job);

        assert_eq!(table.complete(&key, false), Some(1));
        let info = table.snapshot(&key, now).unwrap();
        assert_eq!(info.next_run_in, Duration::from_secs(30));
        assert_eq!(info.state, TaskState::Idle);
        assert_eq!(info.consecutive_error_count, 1);

        assert_eq!(table.complete(&key, true), Some(0));
        assert!(table.snapshot(&key, now).unwrap().last_reload_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_permits_leave_task_due() {
        let table = table(1);
        let start = Instant::now();
        table.insert(task("a", ReloadMode::Eager, start));
        table.insert(task("b", ReloadMode::Eager, start));
        let now = start + Duration::from_secs(60);

        let first = table.claim_due(&CacheKey::new("a"), now);
        assert!(matches!(first, Some(Claim::Run(_))));
        assert!(table.claim_due(&CacheKey::new("b"), now).is_none());
        assert_eq!(table.due(now), vec![CacheKey::new("b")]);

        drop(first);
        assert!(matches!(
            table.claim_due(&CacheKey::new("b"), now),
            Some(Claim::Run(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lazy_task_marks_for_refresh() {
        let table = table(1);
        let start = Instant::now();
        let key = CacheKey::new("lazy");
        table.insert(task("lazy", ReloadMode::Lazy, start));

        let claim = table.claim_due(&key, start + Duration::from_secs(60));
        assert!(matches!(claim, Some(Claim::Marked)));
        assert!(table.take_refresh(&key));
        assert!(!table.take_refresh(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_loader_drops_its_tasks() {
        let table = table(1);
        let now = Instant::now();
        table.insert(task("a", ReloadMode::Lazy, now));
        table.insert(task("b", ReloadMode::Eager, now));
        table.mark_refresh(&CacheKey::new("a"));

        assert_eq!(table.remove_for_loader("loader"), 2);
        assert_eq!(table.len(), 0);
        assert!(!table.take_refresh(&CacheKey::new("a")));
    }
}
