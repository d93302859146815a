//! C4: fans a set of keys needing a load out to whichever loader shape is configured, and fans
//! the result back in per key.
//!
//! A non-bulk loader is simply run once per key, concurrently. A bulk loader is called once with
//! the whole key set; keys the loader's result omits are synthesized as failures rather than left
//! unresolved, so every caller waiting on a key is guaranteed a completion.

// std
use std::collections::HashMap;
// crates.io
use futures::future::join_all;
use tokio::sync::oneshot;
// self
use crate::{
	context::LoaderContext,
	dispatch::run_single,
	error::{CacheLoaderException, MissingKeyError, NullValueError, PartialResultError},
	executor::BoundedExecutor,
	loader::{BulkCallback, Loader},
};

/// Run every key in `requests` through `loader`, returning one outcome per key.
///
/// `requests` pairs each key with the context its loader call should receive (carrying that
/// key's prior value, if any, for `current_entry`). `executor` bounds how many non-bulk loader
/// calls run concurrently within this fan-out; bulk loaders receive the whole batch in one call
/// regardless and do not consume executor slots. `permit_null_values` governs which cause a sync
/// bulk loader's omission of a requested key from its result map is reported with.
pub(crate) async fn run_bulk<K, V>(
	requests: Vec<(K, LoaderContext<K, V>)>,
	loader: &Loader<K, V>,
	executor: &BoundedExecutor,
	permit_null_values: bool,
) -> HashMap<K, Result<V, CacheLoaderException>>
where
	K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	match loader {
		Loader::Sync(_) | Loader::Async(_) => run_fanned_out(requests, loader, executor).await,
		Loader::SyncBulk(f) => run_sync_bulk(requests, f, permit_null_values),
		Loader::AsyncBulk(f) => run_async_bulk(requests, f).await,
	}
}

async fn run_fanned_out<K, V>(
	requests: Vec<(K, LoaderContext<K, V>)>,
	loader: &Loader<K, V>,
	executor: &BoundedExecutor,
) -> HashMap<K, Result<V, CacheLoaderException>>
where
	K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	let keys: Vec<K> = requests.iter().map(|(k, _)| k.clone()).collect();
	let futures =
		requests.into_iter().map(|(key, ctx)| executor.run_bounded(run_single(loader, key, ctx)));
	let outcomes = join_all(futures).await;

	keys.into_iter().zip(outcomes).collect()
}

fn run_sync_bulk<K, V>(
	requests: Vec<(K, LoaderContext<K, V>)>,
	f: &crate::loader::SyncBulkFn<K, V>,
	permit_null_values: bool,
) -> HashMap<K, Result<V, CacheLoaderException>>
where
	K: std::hash::Hash + Eq + Clone,
	V: Clone,
{
	let keys: Vec<K> = requests.iter().map(|(k, _)| k.clone()).collect();
	let total = keys.len();

	match f(&keys) {
		Ok(mut values) => keys
			.into_iter()
			.map(|key| {
				let outcome = match values.remove(&key) {
					Some(value) => Ok(value),
					// The loader omitted this key from its result map, i.e. reported no value
					// for it. `permit_null_values = false` (the default) treats that as a
					// rejected null per the configured policy; `true` still has to surface an
					// error (this core has no way to cache an absent `V`), but tags it with the
					// generic missing-key cause instead of the null-rejection one.
					None if permit_null_values => Err(CacheLoaderException::with_message(
						format!("1 out of {total}"),
						MissingKeyError,
					)),
					None => Err(CacheLoaderException::with_message(
						format!("1 out of {total}"),
						NullValueError,
					)),
				};

				(key, outcome)
			})
			.collect(),
		Err(cause) => {
			let exception = CacheLoaderException::aggregate_boxed(total, total, cause);

			keys.into_iter().map(|key| (key, Err(exception.clone()))).collect()
		},
	}
}

async fn run_async_bulk<K, V>(
	requests: Vec<(K, LoaderContext<K, V>)>,
	f: &crate::loader::AsyncBulkFn<K, V>,
) -> HashMap<K, Result<V, CacheLoaderException>>
where
	K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	let total = requests.len();
	let mut notify = HashMap::with_capacity(total);
	let mut receivers = HashMap::with_capacity(total);
	let mut spans = HashMap::with_capacity(total);
	let keys: Vec<K> = requests.iter().map(|(k, _)| k.clone()).collect();

	for key in &keys {
		let (tx, rx): (
			oneshot::Sender<Result<V, CacheLoaderException>>,
			oneshot::Receiver<Result<V, CacheLoaderException>>,
		) = oneshot::channel();

		notify.insert(key.clone(), tx);
		receivers.insert(key.clone(), rx);
	}

	// `f` takes ownership of the contexts it loads against; keep a clone of each around so this
	// function, not the loader, decides when a key's context goes inactive (the loader may have
	// moved its copy into a spawned task that outlives the call to `f`).
	for (key, ctx) in &requests {
		spans.insert(key.clone(), ctx.clone());
	}

	let contexts: Vec<LoaderContext<K, V>> = requests.into_iter().map(|(_, ctx)| ctx).collect();
	let callback = BulkCallback::new(notify);

	f(keys.clone(), contexts, callback);

	// Each key's future resolves and deactivates its own context independently; polled together
	// so an early key's outcome doesn't wait on a later key's receiver just because of iteration
	// order.
	let waits = keys.into_iter().map(|key| {
		let rx = receivers.remove(&key).expect("receiver registered for every requested key");
		let ctx = spans.remove(&key);

		async move {
			let outcome = rx.await.unwrap_or_else(|_| {
				Err(CacheLoaderException::with_message(format!("1 out of {total}"), PartialResultError))
			});

			if let Some(ctx) = ctx {
				ctx.deactivate();
			}

			(key, outcome)
		}
	});

	join_all(waits).await.into_iter().collect()
}

#[derive(Debug, Clone)]
struct SharedBulkFailure(String);
impl std::fmt::Display for SharedBulkFailure {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}
impl std::error::Error for SharedBulkFailure {}

#[cfg(test)]
mod tests {
	// std
	use std::sync::Arc;
	// self
	use super::*;

	fn ctx(key: u32) -> LoaderContext<u32, u32> {
		LoaderContext::new(key, None, false, tokio::time::Instant::now())
	}

	fn executor() -> BoundedExecutor {
		BoundedExecutor::new(4)
	}

	#[tokio::test]
	async fn sync_bulk_reports_missing_keys_individually() {
		let loader: Loader<u32, u32> = Loader::SyncBulk(Arc::new(|keys: &[u32]| {
			Ok(keys.iter().filter(|&&k| k != 2).map(|&k| (k, k * 10)).collect())
		}));

		let results = run_bulk(vec![(1, ctx(1)), (2, ctx(2)), (3, ctx(3))], &loader, &executor(), false).await;

		assert_eq!(*results[&1].as_ref().unwrap(), 10);
		let err = results[&2].as_ref().unwrap_err();
		assert!(err.cause().downcast_ref::<NullValueError>().is_some());
		assert_eq!(*results[&3].as_ref().unwrap(), 30);
	}

	#[tokio::test]
	async fn sync_bulk_permits_missing_keys_when_nulls_are_allowed() {
		let loader: Loader<u32, u32> = Loader::SyncBulk(Arc::new(|keys: &[u32]| {
			Ok(keys.iter().filter(|&&k| k != 2).map(|&k| (k, k * 10)).collect())
		}));

		let results = run_bulk(vec![(1, ctx(1)), (2, ctx(2))], &loader, &executor(), true).await;

		let err = results[&2].as_ref().unwrap_err();
		assert!(err.cause().downcast_ref::<MissingKeyError>().is_some());
	}

	#[tokio::test]
	async fn sync_bulk_whole_failure_reports_n_out_of_m() {
		let loader: Loader<u32, u32> = Loader::SyncBulk(Arc::new(|_keys: &[u32]| {
			Err(Box::new(SharedBulkFailure("boom".into())) as crate::error::BoxError)
		}));

		let results = run_bulk(vec![(1, ctx(1)), (2, ctx(2)), (3, ctx(3))], &loader, &executor(), false).await;

		for key in [1u32, 2, 3] {
			let err = results[&key].as_ref().unwrap_err();
			assert_eq!(err.to_string(), "3 out of 3");
		}
	}

	#[tokio::test]
	async fn non_bulk_loader_is_fanned_out_concurrently() {
		let loader: Loader<u32, u32> = Loader::Sync(Arc::new(|k: &u32, _ctx| Ok(k + 100)));

		let results = run_bulk(vec![(1, ctx(1)), (2, ctx(2))], &loader, &executor(), false).await;

		assert_eq!(*results[&1].as_ref().unwrap(), 101);
		assert_eq!(*results[&2].as_ref().unwrap(), 102);
	}
}
