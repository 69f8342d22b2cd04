//! Reload scheduling, manual reloads, warm-up and the background driver.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use smol_str::SmolStr;
use tierbox_core::{CacheKey, LoadArgs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, trace, warn};

use super::task::{Claim, ReloadJob, ReloadTask};
use super::{ReloadMode, ReloadOutcome, ReloadTaskInfo, TaskState, WarmItem, WarmReport};
use crate::CacheError;
use crate::engine::CacheEngine;
use crate::listener::CacheEvent;
use crate::offload::OffloadKey;
use crate::registry::LoaderHandle;

impl CacheEngine {
    /// Schedules the entry `handle` loads with `args` to be refreshed every
    /// `interval`. The first run is one interval from now.
    ///
    /// Scheduling a key that already has a task replaces the task. Returns
    /// the cache key the task refreshes.
    pub fn schedule_reload<T>(
        &self,
        handle: &LoaderHandle<T>,
        args: LoadArgs,
        interval: Duration,
        mode: ReloadMode,
    ) -> Result<CacheKey, CacheError> {
        if interval.is_zero() {
            return Err(CacheError::InvalidConfiguration(
                "reload interval must be greater than zero".to_owned(),
            ));
        }
        self.inner.registry.get(handle.name())?;
        let key = handle.key(&args);
        let task = ReloadTask::new(
            key.clone(),
            SmolStr::new(handle.name()),
            args,
            interval,
            mode,
            Instant::now(),
        );
        let replaced = self.inner.reloads.insert(task);
        info!(key = %key, ?interval, ?mode, replaced, "scheduled reload");
        Ok(key)
    }

    /// Removes the reload task of `key` and aborts a run in progress.
    pub fn cancel_reload(&self, key: impl Into<CacheKey>) -> bool {
        let key = key.into();
        let removed = self.inner.reloads.remove(&key);
        if removed {
            self.inner.offload.cancel(&OffloadKey::Cache(key.clone()));
            debug!(key = %key, "cancelled reload");
        }
        removed
    }

    /// Snapshots of every reload task, sorted by key.
    pub fn reload_tasks(&self) -> Vec<ReloadTaskInfo> {
        self.inner.reloads.infos(Instant::now())
    }

    /// Snapshot of the reload task of `key`.
    pub fn reload_task(&self, key: impl Into<CacheKey>) -> Option<ReloadTaskInfo> {
        self.inner.reloads.snapshot(&key.into(), Instant::now())
    }

    /// Runs the reload task of `key` now, outside its schedule.
    ///
    /// The run still needs a reload permit and waits for one. Unless
    /// `force` is set, a lazy task is only marked for refresh and an entry
    /// with more than `ttl * reload_threshold` left is reported
    /// [`Fresh`](ReloadOutcome::Fresh). The schedule is not moved.
    pub async fn reload_now(
        &self,
        key: impl Into<CacheKey>,
        force: bool,
    ) -> Result<ReloadOutcome, CacheError> {
        let key = key.into();
        let info = self
            .inner
            .reloads
            .snapshot(&key, Instant::now())
            .ok_or_else(|| CacheError::UnknownReloadTask(key.clone()))?;
        if info.state == TaskState::Running {
            return Ok(ReloadOutcome::AlreadyRunning);
        }

        if !force {
            if info.mode == ReloadMode::Lazy {
                self.inner.reloads.mark_refresh(&key);
                return Ok(ReloadOutcome::MarkedForRefresh);
            }
            let reg = self.inner.registry.get(&info.loader)?;
            let ttl = reg.ttl.unwrap_or(self.inner.config.l2_default_ttl);
            let threshold = ttl.mul_f64(self.inner.config.reload_threshold);
            if let Some(remaining) = self.ttl_remaining(key.clone()).await {
                if remaining > threshold {
                    trace!(key = %key, ?remaining, "entry still fresh");
                    return Ok(ReloadOutcome::Fresh);
                }
            }
        }

        let permit = self.inner.reloads.acquire().await?;
        let Some(job) = self.inner.reloads.begin(&key, permit) else {
            return match self.inner.reloads.snapshot(&key, Instant::now()) {
                Some(_) => Ok(ReloadOutcome::AlreadyRunning),
                None => Err(CacheError::UnknownReloadTask(key)),
            };
        };
        let started = Instant::now();
        let result = self.run_reload(&job).await;
        self.finish_reload(&job.key, started, &result).await;
        result.map(|()| ReloadOutcome::Reloaded)
    }

    /// Invalidates `key` with its dependents, then forces a reload.
    pub async fn invalidate_and_reload(
        &self,
        key: impl Into<CacheKey>,
    ) -> Result<ReloadOutcome, CacheError> {
        let key = key.into();
        if self.reload_task(key.clone()).is_none() {
            return Err(CacheError::UnknownReloadTask(key));
        }
        self.invalidate(key.clone()).await?;
        self.reload_now(key, true).await
    }

    /// Loads and caches every item, `reload_max_concurrency` at a time.
    pub async fn warm(&self, items: impl IntoIterator<Item = WarmItem>) -> WarmReport {
        let limit = usize::from(self.inner.config.reload_max_concurrency.get());
        let results: Vec<(CacheKey, Result<(), CacheError>)> = futures::stream::iter(items)
            .map(|item| async move {
                let key = item.args.cache_key(&item.loader);
                let result = match self.inner.registry.get(&item.loader) {
                    Ok(reg) => self.load_registered(reg, &key, &item.args).await.map(drop),
                    Err(err) => Err(err),
                };
                (key, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut report = WarmReport {
            total: results.len(),
            ..WarmReport::default()
        };
        for (key, result) in results {
            match result {
                Ok(()) => report.successful += 1,
                Err(err) => {
                    warn!(key = %key, error = %err, "warm-up load failed");
                    report.failed += 1;
                    report.errors.push((key, err));
                }
            }
        }
        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            "cache warmed"
        );
        report
    }

    /// Runs one driver tick: starts every due task that gets a permit and
    /// marks due lazy tasks. Returns the number of tasks handled.
    ///
    /// Also compacts the dependency graph once it exceeds its threshold.
    pub fn run_pending(&self) -> usize {
        let now = Instant::now();
        let mut handled = 0;
        for key in self.inner.reloads.due(now) {
            match self.inner.reloads.claim_due(&key, now) {
                Some(Claim::Marked) => {
                    trace!(key = %key, "marked for refresh");
                    handled += 1;
                }
                Some(Claim::Run(job)) => {
                    if self.spawn_reload(job) {
                        handled += 1;
                    }
                }
                None => trace!(key = %key, "due reload deferred to next tick"),
            }
        }

        if self.inner.graph.edge_count() > self.inner.config.dependency_compaction_threshold {
            self.compact_dependencies();
        }
        self.inner.promotion.prune(now);
        handled
    }

    /// Spawns the background driver.
    ///
    /// The driver holds only a weak reference: it stops when every engine
    /// clone is dropped, when the handle is shut down, or when the handle
    /// is dropped.
    pub fn start_reloader(&self) -> ReloaderHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let engine = Arc::downgrade(&self.inner);
        let poll = self.inner.config.reload_poll_interval;
        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(poll);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                debug!(?poll, "reloader started");
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = stop.changed() => break,
                    }
                    let Some(inner) = engine.upgrade() else {
                        break;
                    };
                    let handled = CacheEngine { inner }.run_pending();
                    if handled > 0 {
                        trace!(handled, "reloader tick");
                    }
                }
                debug!("reloader stopped");
            }
            .instrument(info_span!("tierbox_reloader")),
        );
        ReloaderHandle { shutdown, task }
    }

    fn spawn_reload(&self, job: ReloadJob) -> bool {
        let engine = self.clone();
        let key = job.key.clone();
        let spawned = self.inner.offload.spawn_with_key(key.clone(), async move {
            let started = Instant::now();
            let result = engine.run_reload(&job).await;
            engine.finish_reload(&job.key, started, &result).await;
        });
        if !spawned {
            self.inner.reloads.release(&key);
        }
        spawned
    }

    /// Loads a fresh value and writes it with the registration's strategy.
    async fn run_reload(&self, job: &ReloadJob) -> Result<(), CacheError> {
        let reg = self.inner.registry.get(&job.loader)?;
        let raw = self.invoke_loader(&reg, &job.key, &job.args).await?;
        self.write_with(
            reg.strategy,
            &job.key,
            raw,
            reg.ttl,
            self.inner.config.write_behind_delay,
        )
        .await
    }

    async fn finish_reload(
        &self,
        key: &CacheKey,
        started: Instant,
        result: &Result<(), CacheError>,
    ) {
        let consecutive_errors = self
            .inner
            .reloads
            .complete(key, result.is_ok())
            .unwrap_or_default();
        let event = match result {
            Ok(()) => {
                let duration = started.elapsed();
                self.inner.metrics.reload();
                debug!(key = %key, ?duration, "reloaded");
                CacheEvent::Reloaded {
                    key: key.clone(),
                    duration,
                }
            }
            Err(err) => {
                self.inner.metrics.reload_error();
                warn!(key = %key, error = %err, consecutive_errors, "reload failed");
                CacheEvent::ReloadFailed {
                    key: key.clone(),
                    error: err.clone(),
                    consecutive_errors,
                }
            }
        };
        self.inner.listeners.notify(event).await;
    }
}

/// Handle of the background reload driver.
#[derive(Debug)]
pub struct ReloaderHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReloaderHandle {
    /// `false` once the driver loop has exited.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the driver and waits for its loop to exit. Reloads already
    /// started keep running on the offload manager.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "reloader task ended abnormally");
        }
    }
}
