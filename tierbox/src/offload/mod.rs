//! Background task execution.
//!
//! The engine never blocks a caller on work that has no caller to report to.
//! Delayed write-behind persistence and scheduled reloads are handed to an
//! [`OffloadManager`], which tracks every spawned task so the engine can
//! flush them on shutdown or cancel them outright.
//!
//! ```
//! use tierbox::offload::{OffloadConfig, OffloadManager};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = OffloadManager::new(OffloadConfig::default());
//! manager.spawn("write_behind", async {
//!     // persist a value
//! });
//! manager.wait_all().await;
//! assert_eq!(manager.active_task_count(), 0);
//! # }
//! ```

mod manager;
mod policy;

pub use manager::{OffloadKey, OffloadManager};
pub use policy::{OffloadConfig, OffloadConfigBuilder, TimeoutPolicy};
