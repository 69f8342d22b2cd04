mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::test_tier::TestTier;
use pretty_assertions::assert_eq;
use tierbox_backend::{BackendError, Codec, DeleteStatus, Format, PassthroughCompressor, RemoteTier};
use tierbox_core::{CacheKey, KeyPattern};

#[tokio::test]
async fn trait_objects_delegate_to_inner_tier() {
    let tier = TestTier::new();
    let shared: Arc<dyn RemoteTier> = Arc::new(tier.clone());
    let boxed: Box<dyn RemoteTier> = Box::new(tier.clone());
    let key = CacheKey::new("user:1");

    shared
        .write(&key, Bytes::from_static(b"v"), Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(boxed.read(&key).await.unwrap(), Some(Bytes::from_static(b"v")));
    assert_eq!(shared.name(), "test");
    assert_eq!(boxed.remove(&key).await.unwrap(), DeleteStatus::Deleted(1));
    assert_eq!(shared.remove(&key).await.unwrap(), DeleteStatus::Missing);
}

#[tokio::test]
async fn set_if_absent_only_writes_once() {
    let tier = TestTier::new();
    let key = CacheKey::new("lock:job");
    let ttl = Duration::from_secs(30);

    assert!(tier.set_if_absent(&key, Bytes::from_static(b"a"), ttl).await.unwrap());
    assert!(!tier.set_if_absent(&key, Bytes::from_static(b"b"), ttl).await.unwrap());
    assert_eq!(tier.read(&key).await.unwrap(), Some(Bytes::from_static(b"a")));
}

#[tokio::test]
async fn scan_filters_by_glob() {
    let tier = TestTier::new();
    let ttl = Duration::from_secs(30);
    for key in ["user:1", "user:2", "order:1"] {
        tier.write(&CacheKey::new(key), Bytes::new(), ttl).await.unwrap();
    }

    let mut keys = tier.scan(&KeyPattern::new("user:*").unwrap()).await.unwrap();
    keys.sort();
    assert_eq!(keys, vec![CacheKey::new("user:1"), CacheKey::new("user:2")]);
}

#[tokio::test]
async fn connectivity_failure_is_not_absence() {
    let tier = TestTier::new();
    tier.set_offline(true);

    let err = tier.read(&CacheKey::new("k")).await.unwrap_err();
    assert!(err.is_unavailable());
    assert!(tier.ping().await.is_err());

    tier.set_offline(false);
    assert_eq!(tier.read(&CacheKey::new("k")).await.unwrap(), None);
    assert!(tier.ping().await.is_ok());
}

#[tokio::test]
async fn codec_output_survives_a_remote_round_trip() {
    let tier = TestTier::new();
    let codec = Codec::new(Format::Json, Arc::new(PassthroughCompressor));
    let key = CacheKey::new("profile:9");

    let raw = codec.encode(&("ada", 36u8)).unwrap();
    tier.write(&key, raw, Duration::from_secs(5)).await.unwrap();

    let stored = tier.read(&key).await.unwrap().unwrap();
    let decoded: (String, u8) = codec.decode(&stored).unwrap();
    assert_eq!(decoded, ("ada".to_string(), 36));
    assert!(matches!(
        codec.decode::<Vec<u64>>(&stored),
        Err(BackendError::FormatError(_))
    ));
}

#[tokio::test]
async fn default_extend_ttl_rewrites_the_value() {
    let tier = TestTier::new();
    let boxed: Box<dyn RemoteTier> = Box::new(tier.clone());
    let key = CacheKey::new("session:1");
    tier.write(&key, Bytes::from_static(b"s"), Duration::from_secs(10))
        .await
        .unwrap();

    assert!(boxed.extend_ttl(&key, Duration::from_secs(600)).await.unwrap());
    let remaining = tier.ttl_remaining(&key).await.unwrap().unwrap();
    assert!(remaining > Duration::from_secs(500), "unexpected ttl {remaining:?}");
    assert_eq!(tier.read(&key).await.unwrap(), Some(Bytes::from_static(b"s")));

    let missing = CacheKey::new("session:2");
    assert!(!boxed.extend_ttl(&missing, Duration::from_secs(600)).await.unwrap());
    assert_eq!(tier.read(&missing).await.unwrap(), None);
}
