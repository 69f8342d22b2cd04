mod common;

use std::time::Duration;

use common::{MemoryStore, MemoryTier, engine, secs};
use pretty_assertions::assert_eq;
use tierbox::offload::OffloadConfig;
use tierbox::{
    CacheConfig, CacheEngine, CacheError, CacheKey, MetricsSnapshot, RemoteTier, StrategyKind,
};
use tierbox_moka::MokaTier;

#[test]
fn building_without_a_remote_tier_fails() {
    let result = CacheEngine::builder()
        .l1(MokaTier::builder().max_entries(10).build())
        .build();
    assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
}

#[test]
fn store_writing_default_strategy_needs_a_store() {
    let config = CacheConfig::builder()
        .default_strategy(StrategyKind::WriteThrough)
        .build()
        .unwrap();
    let result = CacheEngine::builder()
        .config(config)
        .l2(MemoryTier::new())
        .build();
    assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
}

#[test]
fn yaml_configuration_is_validated() {
    let config = CacheConfig::from_yaml(
        "l1_max_entries: 50\ndefault_strategy: write_around\nwrite_behind_delay: 2s\n",
    )
    .unwrap();
    assert_eq!(config.l1_max_entries, 50);
    assert_eq!(config.default_strategy, StrategyKind::WriteAround);
    assert_eq!(config.write_behind_delay, secs(2));

    let invalid = CacheConfig::from_yaml("reload_threshold: 1.5\n");
    assert!(matches!(invalid, Err(CacheError::InvalidConfiguration(_))));
}

#[tokio::test]
async fn default_l1_is_built_from_configuration() {
    let engine = CacheEngine::builder()
        .config(CacheConfig::builder().l1_max_entries(8).build().unwrap())
        .l2(MemoryTier::new())
        .build()
        .unwrap();

    engine.cache_aside("k", &1u8, None).await.unwrap();
    assert_eq!(engine.get::<u8>("k").await, Some(1));
}

#[tokio::test]
async fn health_check_reports_each_tier() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    engine.cache_aside("a", &1u8, None).await.unwrap();

    let report = engine.health_check().await;
    assert!(report.is_healthy());
    assert_eq!(report.l2.name, "memory");
    assert_eq!(report.l2.error, None);

    l2.set_offline(true);
    let report = engine.health_check().await;
    assert!(!report.is_healthy());
    assert!(report.l1.healthy);
    assert!(report.l2.error.is_some());
}

#[tokio::test]
async fn exists_and_ttl_look_at_both_tiers() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    engine.cache_aside("both", &1u8, Some(secs(60))).await.unwrap();
    engine
        .set_in(tierbox::TierLevel::L2, "remote", &1u8, Some(secs(30)))
        .await
        .unwrap();

    assert!(engine.exists("both").await);
    assert!(engine.exists("remote").await);
    assert!(!engine.exists("nothing").await);

    let ttl = engine.ttl_remaining("both").await.unwrap();
    assert!(ttl > secs(50) && ttl <= secs(60), "unexpected ttl {ttl:?}");
    let ttl = engine.ttl_remaining("remote").await.unwrap();
    assert!(ttl > secs(20) && ttl <= secs(30), "unexpected ttl {ttl:?}");
    assert_eq!(engine.ttl_remaining("nothing").await, None);
}

#[tokio::test]
async fn exists_treats_an_unreachable_l2_as_absent() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    l2.set_offline(true);

    assert!(!engine.exists("k").await);
    assert_eq!(engine.metrics().l2.errors, 1);
}

#[tokio::test]
async fn clear_empties_both_tiers() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    for key in ["a", "b", "c"] {
        engine.cache_aside(key, &key, None).await.unwrap();
    }

    assert_eq!(engine.clear().await.unwrap(), 3);
    for key in ["a", "b", "c"] {
        assert!(!engine.exists(key).await);
    }
}

#[tokio::test]
async fn metrics_count_reads_and_reset() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    engine.cache_aside("k", &1u8, None).await.unwrap();

    assert_eq!(engine.get::<u8>("k").await, Some(1));
    assert_eq!(engine.get::<u8>("missing").await, None);

    let metrics = engine.metrics();
    assert_eq!(metrics.l1.hits, 1);
    assert_eq!(metrics.l2.misses, 1);
    assert_eq!(metrics.aggregate.hits, 1);
    assert_eq!(metrics.aggregate.misses, 1);
    assert_eq!(metrics.aggregate.hit_rate, 0.5);

    engine.reset_metrics();
    assert_eq!(engine.metrics(), MetricsSnapshot::default());
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_write_behind() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    engine
        .write_behind("order:1", &"paid", None, secs(5))
        .await
        .unwrap();
    assert_eq!(engine.pending_write_behind(), 1);

    assert!(engine.shutdown(secs(10)).await);
    assert!(store.contains("order:1"));
    assert_eq!(engine.pending_write_behind(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_what_does_not_finish_in_time() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    engine
        .write_behind("order:1", &"paid", None, secs(60))
        .await
        .unwrap();

    assert!(!engine.shutdown(Duration::from_secs(1)).await);
    assert_eq!(engine.pending_write_behind(), 0);
    tokio::time::sleep(secs(120)).await;
    assert!(!store.contains("order:1"));
}

#[tokio::test(start_paused = true)]
async fn timed_out_write_behind_is_no_longer_pending() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = CacheEngine::builder()
        .config(common::config().build().unwrap())
        .l1(MokaTier::builder().max_entries(100).build())
        .l2(l2.clone())
        .store(store.clone())
        .offload(OffloadConfig::builder().timeout(secs(1)).build())
        .build()
        .unwrap();
    engine
        .write_behind("order:1", &"paid", None, secs(60))
        .await
        .unwrap();
    assert_eq!(engine.pending_write_behind(), 1);

    tokio::time::sleep(secs(2)).await;
    assert_eq!(engine.pending_write_behind(), 0);
    assert!(!store.contains("order:1"));
    assert!(l2.contains("order:1"));
}

#[tokio::test]
async fn extend_ttl_pushes_back_expiry_in_both_tiers() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    engine
        .cache_aside("session", &7u8, Some(secs(30)))
        .await
        .unwrap();

    assert!(engine.extend_ttl("session", secs(600)).await.unwrap());
    let l1 = engine.ttl_remaining("session").await.unwrap();
    assert!(l1 > secs(500), "L1 ttl not extended: {l1:?}");
    let l2_ttl = l2
        .ttl_remaining(&CacheKey::new("session"))
        .await
        .unwrap()
        .unwrap();
    assert!(l2_ttl > secs(500), "L2 ttl not extended: {l2_ttl:?}");
    assert_eq!(engine.get::<u8>("session").await, Some(7));

    assert!(!engine.extend_ttl("missing", secs(600)).await.unwrap());
    assert!(!engine.exists("missing").await);

    assert!(engine.extend_ttl("session", Duration::ZERO).await.unwrap());
    assert!(!engine.exists("session").await);
}
