//! Single-flight coalescing: a key already in flight is not re-dispatched, and many overlapping
//! callers of the same key only ever trigger one loader invocation.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	},
	time::Duration,
};
// crates.io
use loading_cache::{LoaderContext, Loader, LoadingCache, SingleCallback};
use tokio::sync::Notify;

fn gated_loader(counter: Arc<AtomicU32>, gate: Arc<Notify>) -> Loader<u32, u32> {
	Loader::Async(Arc::new(move |key: &u32, _ctx: &LoaderContext<u32, u32>, callback: SingleCallback<u32>| {
		counter.fetch_add(1, Ordering::SeqCst);

		let key = *key;
		let gate = gate.clone();
		tokio::spawn(async move {
			gate.notified().await;
			let _ = callback.on_load_success(key * 10);
		});
	}))
}

#[tokio::test]
async fn in_flight_key_is_not_redispatched_by_a_concurrent_load_all() {
	let counter = Arc::new(AtomicU32::new(0));
	let gate = Arc::new(Notify::new());
	let config =
		LoadingCache::<u32, u32>::builder().loader(gated_loader(counter.clone(), gate.clone())).build().unwrap();
	let cache = LoadingCache::new(config);

	let cache_for_get = cache.clone();
	let first = tokio::spawn(async move { cache_for_get.get(1).await });

	// Give the first call's loader a chance to register as in-flight before the batch call.
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(counter.load(Ordering::SeqCst), 1);

	let batch = cache.load_all(vec![1, 2]).unwrap();
	tokio::time::sleep(Duration::from_millis(20)).await;

	// Key 1 coalesced onto the first call's in-flight load; only key 2 is a fresh dispatch.
	assert_eq!(counter.load(Ordering::SeqCst), 2);

	gate.notify_waiters();

	assert_eq!(first.await.unwrap().unwrap(), 10);
	let results = batch.await.unwrap();
	assert_eq!(results[&1], 10);
	assert_eq!(results[&2], 20);
}

#[tokio::test]
async fn five_overlapping_load_alls_fire_the_loader_exactly_once() {
	let counter = Arc::new(AtomicU32::new(0));
	let gate = Arc::new(Notify::new());
	let config =
		LoadingCache::<u32, u32>::builder().loader(gated_loader(counter.clone(), gate.clone())).build().unwrap();
	let cache = LoadingCache::new(config);

	let handles: Vec<_> = (0..5).map(|_| cache.load_all(vec![42]).unwrap()).collect();

	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(counter.load(Ordering::SeqCst), 1);

	gate.notify_waiters();

	for handle in handles {
		let results = handle.await.unwrap();
		assert_eq!(results[&42], 420);
	}
	assert_eq!(counter.load(Ordering::SeqCst), 1);
}
