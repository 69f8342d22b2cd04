//! Backing-store loader capability.
//!
//! A [`Loader`] produces a value for a set of [`LoadArgs`]. The engine calls
//! it on a cache miss and from the reload scheduler. Loaders may fail for any
//! domain reason; the error is treated opaquely.
//!
//! Closures can be adapted with [`loader_fn`]:
//!
//! ```
//! use tierbox_core::{LoadArgs, Loader, loader_fn};
//!
//! # tokio_test_block_on(async {
//! let loader = loader_fn(|args: LoadArgs| async move {
//!     Ok::<_, tierbox_core::BoxError>(format!("user-{}", args.get(0).unwrap_or("?")))
//! });
//! let value = loader.load(&LoadArgs::new().arg(7)).await.unwrap();
//! assert_eq!(value, "user-7");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::fmt::{self, Display};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use smol_str::{SmolStr, ToSmolStr};

use crate::CacheKey;

/// Opaque error returned by a loader.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Capability producing a value from arguments, usually by querying the
/// backing store.
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    /// Value produced by the loader.
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Loads the value for `args`.
    async fn load(&self, args: &LoadArgs) -> Result<Self::Output, BoxError>;
}

#[async_trait]
impl<L> Loader for Arc<L>
where
    L: Loader + ?Sized,
{
    type Output = L::Output;

    async fn load(&self, args: &LoadArgs) -> Result<Self::Output, BoxError> {
        self.as_ref().load(args).await
    }
}

/// Loader backed by an async closure. Built with [`loader_fn`].
pub struct FnLoader<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

/// Wraps an async closure into a [`Loader`].
pub fn loader_fn<F, Fut, T>(f: F) -> FnLoader<F, T>
where
    F: Fn(LoadArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    FnLoader {
        f,
        _output: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> Loader for FnLoader<F, T>
where
    F: Fn(LoadArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Output = T;

    async fn load(&self, args: &LoadArgs) -> Result<T, BoxError> {
        (self.f)(args.clone()).await
    }
}

impl<F, T> fmt::Debug for FnLoader<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLoader")
            .field("output", &std::any::type_name::<T>())
            .finish()
    }
}

/// Positional arguments passed to a loader.
///
/// The arguments also determine the cache key of a registered loader: the
/// key is the loader name followed by every argument, colon separated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LoadArgs {
    parts: Vec<SmolStr>,
}

impl LoadArgs {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an argument.
    pub fn arg(mut self, value: impl Display) -> Self {
        self.parts.push(value.to_smolstr());
        self
    }

    /// Returns all arguments in order.
    pub fn parts(&self) -> &[SmolStr] {
        &self.parts
    }

    /// Returns the argument at `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(SmolStr::as_str)
    }

    /// Returns the number of arguments.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns `true` when there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Derives the cache key for the loader registered under `name`.
    pub fn cache_key(&self, name: &str) -> CacheKey {
        CacheKey::from_parts(name, &self.parts)
    }
}

impl<S: Display> FromIterator<S> for LoadArgs {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            parts: iter.into_iter().map(|part| part.to_smolstr()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_joins_name_and_args() {
        let args = LoadArgs::new().arg("eu").arg(42);
        assert_eq!(args.cache_key("orders").as_str(), "orders:eu:42");
        assert_eq!(LoadArgs::new().cache_key("all").as_str(), "all");
    }

    #[test]
    fn collects_from_iterator() {
        let args: LoadArgs = [1, 2, 3].into_iter().collect();
        assert_eq!(args.len(), 3);
        assert_eq!(args.get(2), Some("3"));
        assert_eq!(args.get(3), None);
    }

    #[tokio::test]
    async fn closure_loader_receives_args() {
        let loader = loader_fn(|args: LoadArgs| async move {
            Ok::<_, BoxError>(args.len() as u32)
        });
        let shared = Arc::new(loader);
        assert_eq!(shared.load(&LoadArgs::new().arg("a")).await.unwrap(), 1);
    }
}
