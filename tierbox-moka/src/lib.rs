#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! In-process L1 tier for tierbox backed by [moka](https://docs.rs/moka).
//!
//! ```
//! use tierbox_moka::MokaTier;
//!
//! let l1 = MokaTier::builder().max_entries(1_000).build();
//! ```

mod backend;
mod builder;
pub mod metrics;

pub use backend::MokaTier;
pub use builder::{ByteCapacity, EntryCapacity, MokaTierBuilder, NoCapacity};
pub use moka::policy::EvictionPolicy;
