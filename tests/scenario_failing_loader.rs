//! An always-failing bulk loader: error propagation through `get`, `load_all`, and `reload_all`,
//! with the exact "N out of M" aggregate message, followed by recovery via `put`.

// std
use std::{collections::HashMap, fmt};
// self
use loading_cache::{CacheError, LoadingCache, Loader};

#[derive(Debug)]
struct UpstreamDown;
impl fmt::Display for UpstreamDown {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "upstream unavailable")
	}
}
impl std::error::Error for UpstreamDown {}

fn always_failing_cache() -> LoadingCache<u32, String> {
	let loader: Loader<u32, String> =
		Loader::SyncBulk(std::sync::Arc::new(|_keys: &[u32]| -> Result<HashMap<u32, String>, loading_cache::BoxError> {
			Err(Box::new(UpstreamDown))
		}));
	let config = LoadingCache::<u32, String>::builder().loader(loader).build().unwrap();

	LoadingCache::new(config)
}

#[tokio::test]
async fn get_all_reports_aggregate_failure_message() {
	let cache = always_failing_cache();

	let results = cache.get_all(vec![1, 2, 3]).await;
	for key in [1, 2, 3] {
		let err = results[&key].as_ref().unwrap_err();
		let CacheError::Load(exception) = err else { panic!("expected a load failure") };
		assert_eq!(exception.to_string(), "3 out of 3");
	}
}

#[tokio::test]
async fn load_all_reports_one_aggregate_failure_for_the_whole_batch() {
	let cache = always_failing_cache();

	let err = cache.load_all(vec![1, 2, 3]).unwrap().await.unwrap_err();
	assert_eq!(err.to_string(), "3 out of 3");
}

#[tokio::test]
async fn reload_all_reports_one_aggregate_failure_and_put_recovers() {
	let cache = always_failing_cache();

	let err = cache.reload_all(vec![1, 2, 3]).unwrap().await.unwrap_err();
	assert_eq!(err.to_string(), "3 out of 3");
	assert!(cache.peek(&1).is_none());

	cache.put(1, "recovered".to_owned()).unwrap();
	assert_eq!(cache.peek(&1), Some("recovered".to_owned()));
}
