//! Error types for Redis tier operations.
//!
//! All errors convert to [`BackendError`] so the engine can tell an
//! unreachable server apart from a failed command.
//!
//! [`BackendError`]: tierbox_backend::BackendError

use redis::RedisError;
use tierbox_backend::BackendError;

/// Error type for Redis tier operations.
///
/// Appears when [`RedisTierBuilder::build`] gets an invalid connection URL,
/// or when a command fails, including the first command against an
/// unreachable server (connections are established lazily).
///
/// [`RedisTierBuilder::build`]: crate::RedisTierBuilder::build
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client.
    #[error("Redis tier error: {0}")]
    Redis(#[from] RedisError),
}

impl Error {
    /// Returns `true` when the server could not be reached or the connection
    /// was lost.
    pub fn is_connection(&self) -> bool {
        match self {
            Error::Redis(err) => {
                err.is_io_error()
                    || err.is_connection_refusal()
                    || err.is_connection_dropped()
                    || err.is_timeout()
            }
        }
    }
}

impl From<Error> for BackendError {
    fn from(error: Error) -> Self {
        if error.is_connection() {
            Self::ConnectionError(Box::new(error))
        } else {
            Self::InternalError(Box::new(error))
        }
    }
}
