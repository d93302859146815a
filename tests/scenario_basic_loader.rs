//! Basic single-key load and `contains_key` semantics.

// std
use std::sync::{
	Arc,
	atomic::{AtomicU32, Ordering},
};
// self
use loading_cache::{CacheError, LoadingCache, Loader};

#[tokio::test]
async fn doubling_loader_populates_and_is_visible_via_contains_key() {
	let calls = Arc::new(AtomicU32::new(0));
	let calls_in_loader = calls.clone();
	let loader: Loader<u32, u32> = Loader::Sync(Arc::new(move |k: &u32, _ctx| {
		calls_in_loader.fetch_add(1, Ordering::SeqCst);

		Ok(k * 2)
	}));
	let config = LoadingCache::<u32, u32>::builder().loader(loader).build().unwrap();
	let cache = LoadingCache::new(config);

	assert!(!cache.contains_key(&21));

	let value = cache.get(21).await.unwrap();
	assert_eq!(value, 42);
	assert!(cache.contains_key(&21));
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	// A second `get` is served from the cache, not the loader.
	assert_eq!(cache.get(21).await.unwrap(), 42);
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn get_without_a_configured_loader_reports_an_error() {
	let config = LoadingCache::<u32, u32>::builder().build().unwrap();
	let cache = LoadingCache::new(config);

	let err = cache.get(1).await.unwrap_err();
	assert!(matches!(err, CacheError::Load(_)));
}

#[tokio::test]
async fn load_all_only_dispatches_the_keys_actually_missing() {
	let counter = Arc::new(AtomicU32::new(0));
	let counter_in_loader = counter.clone();
	let loader: Loader<u32, u32> = Loader::Sync(Arc::new(move |_k: &u32, _ctx| {
		Ok(counter_in_loader.fetch_add(1, Ordering::SeqCst) + 1)
	}));
	let config = LoadingCache::<u32, u32>::builder().loader(loader).build().unwrap();
	let cache = LoadingCache::new(config);

	assert_eq!(cache.get(5).await.unwrap(), 1);

	let results = cache.load_all(vec![5, 6]).unwrap().await.unwrap();
	assert_eq!(counter.load(Ordering::SeqCst), 2);
	assert_eq!(results[&5], 1, "key 5 was already cached and must not reload");
	assert_eq!(results[&6], 2);

	assert_eq!(cache.get(6).await.unwrap(), 2);
}
