mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{MemoryStore, MemoryTier, Recorder, engine, secs};
use pretty_assertions::assert_eq;
use tierbox::{BoxError, CacheEngine, CacheError, CacheEvent, StrategyKind, TierLevel};
use tierbox_moka::MokaTier;

#[tokio::test]
async fn cache_aside_value_expires_with_ttl() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    engine
        .cache_aside("session:1", "token", Some(Duration::from_millis(200)))
        .await
        .unwrap();
    assert_eq!(
        engine.get::<String>("session:1").await.as_deref(),
        Some("token")
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.get::<String>("session:1").await, None);
}

#[tokio::test]
async fn write_through_writes_store_then_tiers() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    engine.write_through("user:1", &"alice", None).await.unwrap();

    assert_eq!(
        store.get::<String>(engine.codec(), "user:1").as_deref(),
        Some("alice")
    );
    assert!(l2.contains("user:1"));
    let (value, level) = engine
        .get_with_level::<String>("user:1")
        .await
        .unwrap();
    assert_eq!((value.as_str(), level), ("alice", TierLevel::L1));
}

#[tokio::test]
async fn write_through_store_failure_aborts_before_tiers() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    store.set_failing(true);

    let err = engine
        .write_through("user:1", &"alice", None)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Store { .. }));
    assert!(!l2.contains("user:1"));
    assert_eq!(engine.get::<String>("user:1").await, None);
}

#[tokio::test]
async fn write_through_surfaces_l2_failure() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    l2.set_offline(true);

    let err = engine.write_through("k", &1u32, None).await.unwrap_err();
    assert!(err.is_tier_unavailable());
    assert!(store.contains("k"));
}

#[tokio::test]
async fn write_around_bypasses_cache() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    engine.cache_aside("doc:1", "old", None).await.unwrap();
    engine.write_around("doc:1", "new").await.unwrap();

    assert_eq!(engine.get::<String>("doc:1").await, None);
    assert!(!l2.contains("doc:1"));
    assert_eq!(
        store.get::<String>(engine.codec(), "doc:1").as_deref(),
        Some("new")
    );
}

#[tokio::test(start_paused = true)]
async fn write_behind_persists_after_delay() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    engine
        .write_behind("cart:9", &3u32, None, secs(5))
        .await
        .unwrap();
    assert_eq!(engine.get::<u32>("cart:9").await, Some(3));
    assert!(!store.contains("cart:9"));
    assert_eq!(engine.pending_write_behind(), 1);

    tokio::time::sleep(secs(4)).await;
    assert!(!store.contains("cart:9"));

    tokio::time::sleep(secs(2)).await;
    assert_eq!(store.get::<u32>(engine.codec(), "cart:9"), Some(3));
    assert_eq!(engine.pending_write_behind(), 0);
}

#[tokio::test(start_paused = true)]
async fn newer_write_behind_supersedes_pending_one() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    engine.write_behind("k", &1u32, None, secs(5)).await.unwrap();
    engine.write_behind("k", &2u32, None, secs(5)).await.unwrap();
    assert!(engine.shutdown(secs(30)).await);

    assert_eq!(store.writes(), 1);
    assert_eq!(store.get::<u32>(engine.codec(), "k"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn write_behind_failure_is_reported() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let recorder = Recorder::default();
    let engine = CacheEngine::builder()
        .l1(MokaTier::builder().max_entries(100).build())
        .l2(l2.clone())
        .store(store.clone())
        .listener(recorder.listener())
        .build()
        .unwrap();
    store.set_failing(true);

    engine.write_behind("k", &1u32, None, secs(1)).await.unwrap();
    engine.offload().wait_all().await;

    assert_eq!(engine.metrics().write_behind_errors, 1);
    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        CacheEvent::WriteBehindFailed {
            key,
            error: CacheError::Store { .. },
        } if key.as_str() == "k"
    ));
    // The cached value survives the lost write.
    assert_eq!(engine.get::<u32>("k").await, Some(1));
}

#[tokio::test]
async fn set_follows_default_strategy() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = common::engine_with(
        &l2,
        &store,
        common::config()
            .default_strategy(StrategyKind::WriteThrough)
            .build()
            .unwrap(),
    );

    engine.set("k", &5u8, None).await.unwrap();
    assert!(store.contains("k"));
    assert!(l2.contains("k"));
}

#[tokio::test]
async fn zero_ttl_persists_but_does_not_cache() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    engine.cache_aside("k", &1u32, None).await.unwrap();
    engine
        .write_through("k", &2u32, Some(Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(store.get::<u32>(engine.codec(), "k"), Some(2));
    assert_eq!(engine.get::<u32>("k").await, None);
    assert!(!l2.contains("k"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_share_one_load() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    let calls = Arc::new(AtomicUsize::new(0));

    let readers = (0..32).map(|_| {
        let engine = engine.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            engine
                .get_with("report:daily", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(42u64)
                })
                .await
        })
    });
    let results = futures::future::join_all(readers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap().unwrap(), 42);
    }
    let metrics = engine.metrics();
    assert_eq!(metrics.loads, 1);
    assert!(l2.contains("report:daily"));
}

#[tokio::test]
async fn loader_failure_is_not_cached() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    let failed: Result<u64, _> = engine
        .get_with("k", || async { Err::<u64, BoxError>("db down".into()) })
        .await;
    let err = failed.unwrap_err();
    assert!(err.is_loader_failure());
    assert!(!l2.contains("k"));
    assert_eq!(engine.metrics().load_errors, 1);

    let retried: u64 = engine.get_with("k", || async { Ok(7) }).await.unwrap();
    assert_eq!(retried, 7);
}

#[tokio::test(start_paused = true)]
async fn slow_loader_times_out() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = common::engine_with(
        &l2,
        &store,
        common::config().load_timeout(secs(1)).build().unwrap(),
    );

    let result: Result<u64, _> = engine
        .get_with("slow", || async {
            tokio::time::sleep(secs(5)).await;
            Ok(1)
        })
        .await;
    assert!(matches!(result, Err(CacheError::LoaderTimeout { .. })));
    assert!(!l2.contains("slow"));
}

#[tokio::test]
async fn l2_outage_degrades_to_l1() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);
    l2.set_offline(true);

    engine.cache_aside("k", &"v", None).await.unwrap();
    assert_eq!(engine.get::<String>("k").await.as_deref(), Some("v"));

    let loaded: String = engine
        .get_with("other", || async { Ok("loaded".to_owned()) })
        .await
        .unwrap();
    assert_eq!(loaded, "loaded");
    assert_eq!(
        engine.get_with_level::<String>("other").await,
        Some(("loaded".to_owned(), TierLevel::L1))
    );
    assert!(engine.metrics().l2.errors > 0);
}

#[tokio::test]
async fn promotion_waits_for_threshold() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = common::engine_with(
        &l2,
        &store,
        common::config().promotion_threshold(3).build().unwrap(),
    );
    engine.set_in(TierLevel::L2, "hot", &1u32, None).await.unwrap();

    for _ in 0..3 {
        let (_, level) = engine.get_with_level::<u32>("hot").await.unwrap();
        assert_eq!(level, TierLevel::L2);
    }
    let (_, level) = engine.get_with_level::<u32>("hot").await.unwrap();
    assert_eq!(level, TierLevel::L1);
    assert_eq!(engine.metrics().l1.promotions, 1);
}

#[tokio::test]
async fn one_off_l2_reads_stay_out_of_l1() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = common::engine_with(
        &l2,
        &store,
        common::config().promotion_threshold(2).build().unwrap(),
    );
    engine.set_in(TierLevel::L2, "cold", &1u32, None).await.unwrap();

    assert_eq!(
        engine.get_with_level::<u32>("cold").await,
        Some((1, TierLevel::L2))
    );
    l2.set_offline(true);
    assert_eq!(engine.get::<u32>("cold").await, None);
}

#[tokio::test]
async fn set_in_targets_one_tier() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    engine.set_in(TierLevel::L1, "local", &1u8, None).await.unwrap();
    assert!(!l2.contains("local"));
    assert_eq!(
        engine.get_with_level::<u8>("local").await,
        Some((1, TierLevel::L1))
    );

    engine.set_in(TierLevel::L2, "remote", &2u8, None).await.unwrap();
    assert!(l2.contains("remote"));
}

#[tokio::test]
async fn batch_set_and_get() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    engine
        .set_many([("a", 1u32), ("b", 2u32)], None)
        .await
        .unwrap();
    let found = engine.get_many::<u32, _>(["a", "b", "c"]).await;

    assert_eq!(found.len(), 2);
    assert_eq!(found["a"], 1);
    assert_eq!(found["b"], 2);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (l2, store) = (MemoryTier::new(), MemoryStore::new());
    let engine = engine(&l2, &store);

    engine.cache_aside("k", &1u32, None).await.unwrap();
    assert!(engine.delete("k").await.unwrap());
    assert!(!engine.delete("k").await.unwrap());
    assert_eq!(engine.get::<u32>("k").await, None);
    assert!(!l2.contains("k"));
}

#[tokio::test]
async fn store_strategy_without_store_is_rejected() {
    let engine = CacheEngine::builder()
        .l1(MokaTier::builder().max_entries(10).build())
        .l2(MemoryTier::new())
        .build()
        .unwrap();

    let err = engine.write_through("k", &1u32, None).await.unwrap_err();
    assert!(matches!(err, CacheError::InvalidConfiguration(_)));
    engine.cache_aside("k", &1u32, None).await.unwrap();
}
