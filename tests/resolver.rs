use async_trait::async_trait;
use banners::cache::{BannerCache, CacheStore, CacheStoreError, EvictionPolicy, InMemoryCacheStore};
use banners::db::{BannerStore, SqliteBackend, StoreError};
use banners::service::{BannerError, BannerResolver, CachePopulator, PopulationConfig};
use banners::types::{Banner, BannerFilter, BannerId, BannerPatch, Content, FeatureId, NewBanner, Patch, TagId};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store wrapper counting `list` calls, the query behind every store read
struct CountingStore {
  inner: Arc<SqliteBackend>,
  lists: AtomicUsize,
}

impl CountingStore {
  fn lists(&self) -> usize {
    self.lists.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl BannerStore for CountingStore {
  async fn init_schema(&self) -> Result<(), StoreError> {
    self.inner.init_schema().await
  }
  async fn ping(&self) -> Result<(), StoreError> {
    self.inner.ping().await
  }
  async fn exists_by_id(&self, id: BannerId) -> Result<bool, StoreError> {
    self.inner.exists_by_id(id).await
  }
  async fn exists_by_feature_tag(&self, f: FeatureId, t: TagId) -> Result<bool, StoreError> {
    self.inner.exists_by_feature_tag(f, t).await
  }
  async fn list(&self, filter: &BannerFilter) -> Result<Vec<Banner>, StoreError> {
    self.lists.fetch_add(1, Ordering::SeqCst);
    self.inner.list(filter).await
  }
  async fn get_by_id(&self, id: BannerId) -> Result<Banner, StoreError> {
    self.inner.get_by_id(id).await
  }
  async fn create(&self, banner: &NewBanner) -> Result<BannerId, StoreError> {
    self.inner.create(banner).await
  }
  async fn update(&self, id: BannerId, patch: &BannerPatch) -> Result<(), StoreError> {
    self.inner.update(id, patch).await
  }
  async fn delete_by_id(&self, id: BannerId) -> Result<(), StoreError> {
    self.inner.delete_by_id(id).await
  }
}

/// Cache store that is always down
struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
  async fn get(&self, _: &str) -> Result<Option<String>, CacheStoreError> {
    Err(CacheStoreError::Backend("connection refused".into()))
  }
  async fn set_many(
    &self,
    _: Vec<(String, String)>,
    _: Option<Duration>,
  ) -> Result<(), CacheStoreError> {
    Err(CacheStoreError::Backend("connection refused".into()))
  }
}

struct Harness {
  resolver: Arc<BannerResolver>,
  store: Arc<CountingStore>,
}

async fn harness_with(cache_store: Arc<dyn CacheStore>, ttl: Duration) -> Harness {
  let backend = Arc::new(SqliteBackend::in_memory().await.unwrap());
  backend.init_schema().await.unwrap();
  for id in 1..=50 {
    backend.register_feature(id).await.unwrap();
    backend.register_tag(id).await.unwrap();
  }

  let store = Arc::new(CountingStore {
    inner: backend.clone(),
    lists: AtomicUsize::new(0),
  });
  let cache = BannerCache::new(cache_store, ttl);
  let populator = Arc::new(CachePopulator::new(cache.clone(), &PopulationConfig::default()));
  let resolver = Arc::new(BannerResolver::new(
    store.clone(),
    backend.clone(),
    backend,
    cache,
    populator,
  ));
  Harness { resolver, store }
}

async fn harness() -> Harness {
  let cache = Arc::new(InMemoryCacheStore::new(1 << 20, EvictionPolicy::Lru));
  harness_with(cache, Duration::from_secs(600)).await
}

fn content(value: serde_json::Value) -> Content {
  value.as_object().cloned().unwrap()
}

fn new_banner(feature_id: i64, tag_ids: &[i64], body: serde_json::Value) -> NewBanner {
  NewBanner {
    tag_ids: tag_ids.to_vec(),
    feature_id,
    content: content(body),
    is_active: true,
  }
}

/// Wait until every queued cache write has been applied
async fn wait_for_population(resolver: &BannerResolver) {
  for _ in 0..400 {
    if resolver.populator().stats().pending() == 0 {
      return;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  panic!("cache population did not finish");
}

#[tokio::test]
async fn test_create_then_list_and_duplicate_pair() {
  let h = harness().await;
  let a = h
    .resolver
    .create(new_banner(10, &[20, 21], json!({"info": "123"})))
    .await
    .unwrap();

  let listed = h.resolver.list(&BannerFilter::pair(10, 20)).await.unwrap();
  assert_eq!(listed.len(), 1);
  assert_eq!(listed[0].id, a);
  assert_eq!(listed[0].content, content(json!({"info": "123"})));

  let err = h
    .resolver
    .create(new_banner(10, &[20], json!({"info": "456"})))
    .await
    .unwrap_err();
  assert!(matches!(err, BannerError::AlreadyExists));
}

#[tokio::test]
async fn test_create_validates_references_first() {
  let h = harness().await;

  let err = h
    .resolver
    .create(new_banner(999, &[1], json!({"a": 1})))
    .await
    .unwrap_err();
  assert!(matches!(err, BannerError::FeatureNotExists));

  let err = h
    .resolver
    .create(new_banner(1, &[1, 999], json!({"a": 1})))
    .await
    .unwrap_err();
  assert!(matches!(err, BannerError::TagNotExists));

  // Nothing was written by the failed attempts
  assert!(h.resolver.list(&BannerFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_short_circuits_on_first_failing_tag() {
  let h = harness().await;
  h.resolver
    .create(new_banner(1, &[2], json!({"a": 1})))
    .await
    .unwrap();

  // Tag 2 conflicts before the unknown tag 999 is ever checked
  let err = h
    .resolver
    .create(new_banner(1, &[2, 999], json!({"a": 2})))
    .await
    .unwrap_err();
  assert!(matches!(err, BannerError::AlreadyExists));
}

#[tokio::test]
async fn test_create_rejects_empty_tags() {
  let h = harness().await;
  let err = h
    .resolver
    .create(new_banner(1, &[], json!({"a": 1})))
    .await
    .unwrap_err();
  assert!(matches!(err, BannerError::InvalidInput(_)));
}

#[tokio::test]
async fn test_create_rejects_empty_content() {
  let h = harness().await;
  let err = h
    .resolver
    .create(NewBanner {
      tag_ids: vec![1],
      feature_id: 1,
      content: Content::new(),
      is_active: true,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, BannerError::InvalidInput(_)));
  assert!(h.resolver.list(&BannerFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resolve_missing_pair_is_not_found() {
  let h = harness().await;
  assert!(matches!(
    h.resolver.resolve_for_user(1, 1, false).await,
    Err(BannerError::NotFound)
  ));
  assert!(matches!(
    h.resolver.resolve_for_user(1, 1, true).await,
    Err(BannerError::NotFound)
  ));
  // Nothing to cache for a miss in both layers
  assert_eq!(h.resolver.populator().stats().submitted, 0);
}

#[tokio::test]
async fn test_cache_aside_serves_second_read_from_cache() {
  let h = harness().await;
  h.resolver
    .create(new_banner(3, &[4], json!({"title": "hello"})))
    .await
    .unwrap();

  let first = h.resolver.resolve_for_user(3, 4, false).await.unwrap();
  assert_eq!(h.store.lists(), 1);
  wait_for_population(&h.resolver).await;
  assert_eq!(h.resolver.populator().stats().completed, 1);

  let second = h.resolver.resolve_for_user(3, 4, false).await.unwrap();
  assert_eq!(second.content, first.content);
  assert_eq!(h.store.lists(), 1, "cached read must not query the store");
}

#[tokio::test]
async fn test_last_revision_always_reads_store() {
  let h = harness().await;
  h.resolver
    .create(new_banner(3, &[4], json!({"title": "hello"})))
    .await
    .unwrap();

  let a = h.resolver.resolve_for_user(3, 4, true).await.unwrap();
  let b = h.resolver.resolve_for_user(3, 4, true).await.unwrap();
  assert_eq!(a.content, b.content);
  assert_eq!(h.store.lists(), 2);
  // The authoritative path never feeds the cache
  assert_eq!(h.resolver.populator().stats().submitted, 0);
}

#[tokio::test]
async fn test_stale_cache_until_last_revision() {
  let h = harness().await;
  let id = h
    .resolver
    .create(new_banner(15, &[27], json!({"company": "Avito"})))
    .await
    .unwrap();

  let cached = h.resolver.resolve_for_user(15, 27, false).await.unwrap();
  assert_eq!(cached.content, content(json!({"company": "Avito"})));
  wait_for_population(&h.resolver).await;

  let patch = BannerPatch {
    content: Patch::Set(content(json!({"job": "Avito"}))),
    ..Default::default()
  };
  h.resolver.update(id, &patch).await.unwrap();

  let stale = h.resolver.resolve_for_user(15, 27, false).await.unwrap();
  assert_eq!(stale.content, content(json!({"company": "Avito"})));

  let fresh = h.resolver.resolve_for_user(15, 27, true).await.unwrap();
  assert_eq!(fresh.content, content(json!({"job": "Avito"})));
}

#[tokio::test]
async fn test_cache_expiry_falls_back_to_store() {
  let cache = Arc::new(InMemoryCacheStore::new(1 << 20, EvictionPolicy::Lru));
  let h = harness_with(cache, Duration::from_millis(50)).await;
  h.resolver
    .create(new_banner(1, &[1], json!({"v": 1})))
    .await
    .unwrap();

  h.resolver.resolve_for_user(1, 1, false).await.unwrap();
  wait_for_population(&h.resolver).await;
  h.resolver.resolve_for_user(1, 1, false).await.unwrap();
  assert_eq!(h.store.lists(), 1);

  tokio::time::sleep(Duration::from_millis(100)).await;
  h.resolver.resolve_for_user(1, 1, false).await.unwrap();
  assert_eq!(h.store.lists(), 2);
}

#[tokio::test]
async fn test_cache_outage_degrades_to_store() {
  let h = harness_with(Arc::new(BrokenCache), Duration::from_secs(600)).await;
  h.resolver
    .create(new_banner(1, &[1], json!({"v": 1})))
    .await
    .unwrap();

  let banner = h.resolver.resolve_for_user(1, 1, false).await.unwrap();
  assert_eq!(banner.content, content(json!({"v": 1})));
  wait_for_population(&h.resolver).await;

  let stats = h.resolver.populator().stats();
  assert_eq!(stats.failed, 1);
  assert_eq!(stats.completed, 0);

  // Still answered, from the store every time
  h.resolver.resolve_for_user(1, 1, false).await.unwrap();
  assert_eq!(h.store.lists(), 2);
}

#[tokio::test]
async fn test_corrupt_cache_entry_is_treated_as_miss() {
  let cache = Arc::new(InMemoryCacheStore::new(1 << 20, EvictionPolicy::Lru));
  let h = harness_with(cache.clone(), Duration::from_secs(600)).await;
  h.resolver
    .create(new_banner(1, &[1], json!({"v": 1})))
    .await
    .unwrap();

  cache
    .set_many(
      vec![(banners::cache::pair_key(1, 1), "not-a-number".into())],
      None,
    )
    .await
    .unwrap();

  let banner = h.resolver.resolve_for_user(1, 1, false).await.unwrap();
  assert_eq!(banner.content, content(json!({"v": 1})));
  assert_eq!(h.store.lists(), 1);

  // Population overwrites the bad entry
  wait_for_population(&h.resolver).await;
  h.resolver.resolve_for_user(1, 1, false).await.unwrap();
  assert_eq!(h.store.lists(), 1);
}

#[tokio::test]
async fn test_update_conflict_leaves_banner_untouched() {
  let h = harness().await;
  h.resolver
    .create(new_banner(1, &[1], json!({"owner": "a"})))
    .await
    .unwrap();
  let b = h
    .resolver
    .create(new_banner(1, &[2], json!({"owner": "b"})))
    .await
    .unwrap();

  let patch = BannerPatch {
    tag_ids: Patch::Set(vec![3, 1]),
    content: Patch::Set(content(json!({"owner": "changed"}))),
    is_active: Patch::Set(false),
    ..Default::default()
  };
  assert!(matches!(
    h.resolver.update(b, &patch).await,
    Err(BannerError::AlreadyExists)
  ));

  let current = h.resolver.get_by_id(b).await.unwrap();
  assert_eq!(current.tag_ids, vec![2]);
  assert_eq!(current.content, content(json!({"owner": "b"})));
  assert!(current.is_active);
}

#[tokio::test]
async fn test_update_input_checks() {
  let h = harness().await;
  let id = h
    .resolver
    .create(new_banner(1, &[1], json!({"v": 1})))
    .await
    .unwrap();

  let empty_tags = BannerPatch {
    tag_ids: Patch::Set(vec![]),
    ..Default::default()
  };
  assert!(matches!(
    h.resolver.update(id, &empty_tags).await,
    Err(BannerError::InvalidInput(_))
  ));

  let empty_content = BannerPatch {
    content: Patch::Set(Content::new()),
    ..Default::default()
  };
  assert!(matches!(
    h.resolver.update(id, &empty_content).await,
    Err(BannerError::InvalidInput(_))
  ));

  // An empty patch only bumps updated_at
  h.resolver.update(id, &BannerPatch::default()).await.unwrap();
}

#[tokio::test]
async fn test_missing_ids_are_not_found() {
  let h = harness().await;
  let patch = BannerPatch {
    is_active: Patch::Set(false),
    ..Default::default()
  };
  assert!(matches!(
    h.resolver.update(12345, &patch).await,
    Err(BannerError::NotFound)
  ));
  assert!(matches!(
    h.resolver.delete_by_id(12345).await,
    Err(BannerError::NotFound)
  ));
}

#[tokio::test]
async fn test_delete_frees_pair() {
  let h = harness().await;
  let id = h
    .resolver
    .create(new_banner(5, &[6], json!({"v": 1})))
    .await
    .unwrap();
  h.resolver.delete_by_id(id).await.unwrap();

  assert!(matches!(
    h.resolver.resolve_for_user(5, 6, true).await,
    Err(BannerError::NotFound)
  ));
  h.resolver
    .create(new_banner(5, &[6], json!({"v": 2})))
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_keep_pairs_unique() {
  let h = harness().await;

  let tasks: Vec<_> = (0..8)
    .map(|i| {
      let resolver = h.resolver.clone();
      tokio::spawn(async move {
        resolver
          .create(new_banner(7, &[8, 9 + i], json!({"n": i})))
          .await
      })
    })
    .collect();

  let mut created = 0;
  for task in tasks {
    match task.await.unwrap() {
      Ok(_) => created += 1,
      Err(BannerError::AlreadyExists) => {}
      Err(e) => panic!("unexpected error: {e}"),
    }
  }
  assert_eq!(created, 1);
  assert_eq!(
    h.resolver.list(&BannerFilter::pair(7, 8)).await.unwrap().len(),
    1
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_onto_one_pair_keep_it_unique() {
  let h = harness().await;
  let (feature, tag) = (20, 30);

  for round in 0..10 {
    let b = h
      .resolver
      .create(new_banner(feature, &[31], json!({"who": "b", "round": round})))
      .await
      .unwrap();
    let c = h
      .resolver
      .create(new_banner(feature, &[32], json!({"who": "c", "round": round})))
      .await
      .unwrap();

    let onto_pair = BannerPatch {
      tag_ids: Patch::Set(vec![tag]),
      ..Default::default()
    };

    let update_b = {
      let resolver = h.resolver.clone();
      let patch = onto_pair.clone();
      tokio::spawn(async move { resolver.update(b, &patch).await.map(|_| ()) })
    };
    let update_c = {
      let resolver = h.resolver.clone();
      let patch = onto_pair.clone();
      tokio::spawn(async move { resolver.update(c, &patch).await.map(|_| ()) })
    };
    let create_a = {
      let resolver = h.resolver.clone();
      tokio::spawn(async move {
        resolver
          .create(new_banner(feature, &[tag], json!({"who": "a"})))
          .await
          .map(|_| ())
      })
    };

    let mut succeeded = 0;
    for task in [update_b, update_c, create_a] {
      match task.await.unwrap() {
        Ok(()) => succeeded += 1,
        Err(BannerError::AlreadyExists) => {}
        Err(e) => panic!("unexpected error: {e}"),
      }
    }
    assert_eq!(succeeded, 1, "round {round}");

    let bound = h
      .resolver
      .list(&BannerFilter::pair(feature, tag))
      .await
      .unwrap();
    assert_eq!(bound.len(), 1, "round {round}");

    // Reset for the next round
    for banner in h.resolver.list(&BannerFilter::default()).await.unwrap() {
      if banner.feature_id == feature {
        h.resolver.delete_by_id(banner.id).await.unwrap();
      }
    }
  }
}
