//! Callbacks for background outcomes.
//!
//! Reloads and write-behind persistence run without a caller to report to.
//! Their results reach the [`MetricsCollector`](crate::metrics::MetricsCollector)
//! and every registered [`EventListener`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tierbox_core::CacheKey;
use tracing::trace;

use crate::CacheError;

/// Outcome of background engine work.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A reload task refreshed its entry.
    Reloaded {
        /// Reloaded key.
        key: CacheKey,
        /// Time spent in the loader and tier writes.
        duration: Duration,
    },
    /// A reload task failed. The task stays scheduled.
    ReloadFailed {
        /// Key of the task.
        key: CacheKey,
        /// Failure reported by the load path.
        error: CacheError,
        /// Failures in a row, including this one.
        consecutive_errors: u32,
    },
    /// A delayed persistent store write failed. The value is still cached
    /// but the store never received it.
    WriteBehindFailed {
        /// Key of the lost write.
        key: CacheKey,
        /// Failure reported by the store.
        error: CacheError,
    },
}

impl CacheEvent {
    /// Key the event is about.
    pub fn key(&self) -> &CacheKey {
        match self {
            CacheEvent::Reloaded { key, .. }
            | CacheEvent::ReloadFailed { key, .. }
            | CacheEvent::WriteBehindFailed { key, .. } => key,
        }
    }
}

/// Receiver of [`CacheEvent`]s.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Called once per event, from the background task that produced it.
    async fn on_event(&self, event: &CacheEvent);
}

#[async_trait]
impl<F> EventListener for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    async fn on_event(&self, event: &CacheEvent) {
        (self)(event)
    }
}

/// Listeners registered on an engine, notified in registration order.
#[derive(Clone, Default)]
pub(crate) struct ListenerChain {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl ListenerChain {
    pub(crate) fn push(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) async fn notify(&self, event: CacheEvent) {
        trace!(key = %event.key(), listeners = self.listeners.len(), "notify listeners");
        for listener in &self.listeners {
            listener.on_event(&event).await;
        }
    }
}

impl std::fmt::Debug for ListenerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerChain")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
