#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! Redis L2 tier for tierbox.
//!
//! See [`RedisTier`] for usage.

pub mod backend;
pub mod error;

#[doc(inline)]
pub use crate::backend::{RedisTier, RedisTierBuilder};
#[doc(inline)]
pub use crate::error::Error;
