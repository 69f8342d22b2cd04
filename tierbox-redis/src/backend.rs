//! Redis tier implementation.

use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};
use smol_str::SmolStr;
use tierbox_backend::{BackendError, BackendResult, DeleteStatus, RemoteTier};
use tierbox_core::{CacheKey, KeyPattern, Raw};
use tokio::sync::OnceCell;
use tracing::trace;

use crate::error::Error;

const SCAN_BATCH: usize = 500;

/// Redis L2 tier based on the redis-rs crate.
///
/// Uses a [`ConnectionManager`] created on first use, so building a tier
/// never touches the network.
///
/// [`ConnectionManager`]: redis::aio::ConnectionManager
#[derive(Clone)]
pub struct RedisTier {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    prefix: SmolStr,
    name: SmolStr,
}

impl RedisTier {
    /// Creates a tier for a local server with default settings.
    ///
    /// ```no_run
    /// use tierbox_redis::RedisTier;
    ///
    /// let tier = RedisTier::new().unwrap();
    /// ```
    pub fn new() -> Result<Self, Error> {
        Self::builder().build()
    }

    /// Creates a builder with default settings.
    #[must_use]
    pub fn builder() -> RedisTierBuilder {
        RedisTierBuilder::default()
    }

    /// Lazy connection to redis via [`ConnectionManager`].
    pub async fn connection(&self) -> Result<&ConnectionManager, BackendError> {
        trace!("Get connection manager");
        let manager = self
            .connection
            .get_or_try_init(|| {
                trace!("Initialize new redis connection manager");
                self.client.get_connection_manager()
            })
            .await
            .map_err(Error::from)?;
        Ok(manager)
    }

    fn full_key(&self, key: &CacheKey) -> String {
        let mut full = String::with_capacity(self.prefix.len() + key.len());
        full.push_str(&self.prefix);
        full.push_str(key.as_str());
        full
    }

    fn strip_prefix(&self, raw: &str) -> Option<CacheKey> {
        raw.strip_prefix(self.prefix.as_str()).map(CacheKey::from)
    }

    fn match_pattern(&self, pattern: &KeyPattern) -> String {
        let mut glob = escape_literal(&self.prefix);
        for ch in pattern.as_str().chars() {
            match ch {
                '*' | '?' => glob.push(ch),
                other => push_escaped(&mut glob, other),
            }
        }
        glob
    }
}

/// Escapes characters that are special in Redis glob syntax.
fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        push_escaped(&mut out, ch);
    }
    out
}

fn push_escaped(out: &mut String, ch: char) {
    if matches!(ch, '*' | '?' | '[' | ']' | '\\' | '^') {
        out.push('\\');
    }
    out.push(ch);
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Builder for [`RedisTier`].
pub struct RedisTierBuilder {
    connection_info: String,
    prefix: SmolStr,
    name: SmolStr,
}

impl Default for RedisTierBuilder {
    fn default() -> Self {
        Self {
            connection_info: "redis://127.0.0.1/".to_owned(),
            prefix: SmolStr::default(),
            name: SmolStr::new_static("redis"),
        }
    }
}

impl RedisTierBuilder {
    /// Set connection info (host, port, database, etc.).
    pub fn server(mut self, connection_info: impl Into<String>) -> Self {
        self.connection_info = connection_info.into();
        self
    }

    /// Namespace prepended to every key. Scans only see keys under it.
    pub fn prefix(mut self, prefix: impl Into<SmolStr>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set a custom name used in logs and metric labels.
    pub fn name(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = name.into();
        self
    }

    /// Create new instance of the Redis tier with passed settings.
    pub fn build(self) -> Result<RedisTier, Error> {
        Ok(RedisTier {
            client: Client::open(self.connection_info)?,
            connection: OnceCell::new(),
            prefix: self.prefix,
            name: self.name,
        })
    }
}

#[async_trait]
impl RemoteTier for RedisTier {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<Raw>> {
        let mut con = self.connection().await?.clone();
        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(data.map(Raw::from))
    }

    async fn write(&self, key: &CacheKey, value: Raw, ttl: Duration) -> BackendResult<()> {
        let mut con = self.connection().await?.clone();
        redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(value.as_ref())
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &CacheKey,
        value: Raw,
        ttl: Duration,
    ) -> BackendResult<bool> {
        let mut con = self.connection().await?.clone();
        // Replies OK when written and nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(value.as_ref())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(reply.is_some())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        let mut con = self.connection().await?.clone();
        let deleted: i32 = redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;

        if deleted > 0 {
            Ok(DeleteStatus::Deleted(deleted as u32))
        } else {
            Ok(DeleteStatus::Missing)
        }
    }

    async fn scan(&self, pattern: &KeyPattern) -> BackendResult<Vec<CacheKey>> {
        let mut con = self.connection().await?.clone();
        let glob = self.match_pattern(pattern);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&glob)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut con)
                .await
                .map_err(Error::from)?;
            keys.extend(batch.iter().filter_map(|raw| self.strip_prefix(raw)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        trace!(pattern = %pattern, found = keys.len(), "scanned redis keys");
        Ok(keys)
    }

    async fn ttl_remaining(&self, key: &CacheKey) -> BackendResult<Option<Duration>> {
        let mut con = self.connection().await?.clone();
        // -2 when absent, -1 when the key has no expiry.
        let pttl: i64 = redis::cmd("PTTL")
            .arg(self.full_key(key))
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok((pttl > 0).then(|| Duration::from_millis(pttl as u64)))
    }

    async fn extend_ttl(&self, key: &CacheKey, ttl: Duration) -> BackendResult<bool> {
        let mut con = self.connection().await?.clone();
        // 1 when the timeout was set, 0 when the key does not exist.
        let updated: i32 = redis::cmd("PEXPIRE")
            .arg(self.full_key(key))
            .arg(ttl_millis(ttl))
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(updated == 1)
    }

    async fn ping(&self) -> BackendResult<()> {
        let mut con = self.connection().await?.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(prefix: &str) -> RedisTier {
        RedisTier::builder().prefix(prefix).build().unwrap()
    }

    #[test]
    fn glob_wildcards_survive_and_brackets_are_escaped() {
        let tier = tier("");
        let pattern = KeyPattern::new("user:[1]*").unwrap();
        assert_eq!(tier.match_pattern(&pattern), r"user:\[1\]*");
    }

    #[test]
    fn prefix_is_matched_literally() {
        let tier = tier("app*:");
        let pattern = KeyPattern::new("user:?").unwrap();
        assert_eq!(tier.match_pattern(&pattern), r"app\*:user:?");
        assert_eq!(tier.full_key(&CacheKey::new("user:1")), "app*:user:1");
        assert_eq!(
            tier.strip_prefix("app*:user:1"),
            Some(CacheKey::new("user:1"))
        );
        assert_eq!(tier.strip_prefix("other:user:1"), None);
    }

    #[test]
    fn ttl_is_at_least_one_millisecond() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn invalid_url_fails_at_build() {
        assert!(RedisTier::builder().server("not a url").build().is_err());
    }
}
