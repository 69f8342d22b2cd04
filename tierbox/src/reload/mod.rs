//! Background reloads of registered entries.
//!
//! A reload task refreshes one cache key from a registered loader every
//! `interval`. [`CacheEngine::start_reloader`](crate::CacheEngine::start_reloader)
//! spawns the driver, which wakes every `reload_poll_interval` and starts the
//! tasks that are due, at most `reload_max_concurrency` at a time. Due tasks
//! that find no free permit wait for the next tick.
//!
//! A failed reload never stops the driver: the task's error counter is
//! incremented, its next run is still one interval later, and the failure
//! goes to the metrics and every [`EventListener`](crate::listener::EventListener).
//!
//! [`ReloadMode::Lazy`] tasks do not call the loader from the driver.
//! They mark the key so that the next foreground read skips the tiers and
//! loads a fresh value.

mod scheduler;
mod task;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tierbox_core::{CacheKey, LoadArgs};

use crate::CacheError;

pub use scheduler::ReloaderHandle;
pub(crate) use task::ReloadTable;

/// How a due task refreshes its entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadMode {
    /// Mark the entry so the next read reloads it.
    Lazy,
    /// Reload from the driver.
    #[default]
    Eager,
}

/// Execution state of a reload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its next run.
    Idle,
    /// Loader call in progress.
    Running,
}

/// Result of [`CacheEngine::reload_now`](crate::CacheEngine::reload_now).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The loader ran and the entry was rewritten.
    Reloaded,
    /// A reload of the key was already running.
    AlreadyRunning,
    /// The entry has enough lifetime left.
    Fresh,
    /// The task is lazy; the next read reloads.
    MarkedForRefresh,
}

/// Snapshot of a reload task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadTaskInfo {
    /// Key the task refreshes.
    pub key: CacheKey,
    /// Registered loader name.
    pub loader: SmolStr,
    /// Time between runs.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Eager or lazy.
    pub mode: ReloadMode,
    /// Current state.
    pub state: TaskState,
    /// Time until the next run, zero when overdue.
    #[serde(with = "humantime_serde")]
    pub next_run_in: Duration,
    /// Wall clock time of the last successful reload.
    pub last_reload_at: Option<DateTime<Utc>>,
    /// Failures since the last success.
    pub consecutive_error_count: u32,
}

/// One initial load for [`CacheEngine::warm`](crate::CacheEngine::warm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmItem {
    /// Registered loader name.
    pub loader: SmolStr,
    /// Loader arguments.
    pub args: LoadArgs,
}

impl WarmItem {
    /// Describes a load of `loader` with `args`.
    pub fn new(loader: impl Into<SmolStr>, args: LoadArgs) -> Self {
        Self {
            loader: loader.into(),
            args,
        }
    }
}

/// Outcome of a warm-up batch.
#[derive(Debug, Clone, Default)]
pub struct WarmReport {
    /// Items attempted.
    pub total: usize,
    /// Items loaded and cached.
    pub successful: usize,
    /// Items that failed.
    pub failed: usize,
    /// Failure of every failed item.
    pub errors: Vec<(CacheKey, CacheError)>,
}

impl WarmReport {
    /// `true` when every item loaded.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}
