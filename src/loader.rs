//! The loader shapes a cache can be configured with.
//!
//! The origin design distinguishes a plain synchronous loader from one that also receives a
//! context object; both take the same place in dispatch here; so this enum folds them into one
//! `Sync` variant that is always handed a [`LoaderContext`], leaving single-key-sync,
//! single-key-async, bulk-sync, and bulk-async as the four shapes a caller actually chooses
//! between.

// std
use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};
// self
use crate::{
	context::LoaderContext,
	error::{BoxError, CacheError, CacheLoaderException},
};

/// What a loader call produces for one key, before it is wrapped into a [`CacheLoaderException`].
pub type LoadResult<V> = std::result::Result<V, BoxError>;

/// A single-key synchronous loader, optionally context-aware via [`LoaderContext`].
pub type SyncFn<K, V> = Arc<dyn Fn(&K, &LoaderContext<K, V>) -> LoadResult<V> + Send + Sync>;

/// A single-key asynchronous loader: invoked once per key, expected to call exactly one method
/// on the [`SingleCallback`] it is given, at any point in the future, from any thread.
pub type AsyncFn<K, V> = Arc<dyn Fn(&K, &LoaderContext<K, V>, SingleCallback<V>) + Send + Sync>;

/// A bulk synchronous loader: given the full set of keys requiring a load, returns a mapping
/// covering as many of them as it could resolve.
pub type SyncBulkFn<K, V> = Arc<dyn Fn(&[K]) -> std::result::Result<HashMap<K, V>, BoxError> + Send + Sync>;

/// A bulk asynchronous loader: given the full set of keys and the per-key context for each
/// (ordered the same as the key vector), expected to call methods on the [`BulkCallback`] it is
/// given (possibly more than once, as partial results arrive) until every key has been accounted
/// for.
pub type AsyncBulkFn<K, V> = Arc<dyn Fn(Vec<K>, Vec<LoaderContext<K, V>>, BulkCallback<K, V>) + Send + Sync>;

/// The loader configured for a cache.
#[derive(Clone)]
pub enum Loader<K, V> {
	/// Single-key, synchronous, runs on the calling task or a loader-executor task.
	Sync(SyncFn<K, V>),
	/// Single-key, asynchronous; the loader returns immediately and completes later via
	/// callback.
	Async(AsyncFn<K, V>),
	/// Bulk, synchronous: one call per batch of coalesced keys.
	SyncBulk(SyncBulkFn<K, V>),
	/// Bulk, asynchronous: one call per batch, completed via callback.
	AsyncBulk(AsyncBulkFn<K, V>),
}
impl<K, V> Loader<K, V> {
	/// Whether this loader shape natively accepts more than one key per call.
	pub fn is_bulk(&self) -> bool {
		matches!(self, Loader::SyncBulk(_) | Loader::AsyncBulk(_))
	}
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Resolution {
	Pending,
	Completed,
}

/// Delivers the single outcome of an [`Loader::Async`] call. Idempotent: only the first of
/// `on_load_success`/`on_load_failure` to run has any effect; later calls are reported through
/// [`SingleCallback::already_completed`].
#[derive(Clone)]
pub struct SingleCallback<V> {
	sink: Arc<Mutex<CallbackSink<V>>>,
}

struct CallbackSink<V> {
	resolution: Resolution,
	notify: Option<tokio::sync::oneshot::Sender<std::result::Result<V, CacheLoaderException>>>,
}

impl<V> SingleCallback<V>
where
	V: Send + 'static,
{
	pub(crate) fn new() -> (Self, tokio::sync::oneshot::Receiver<std::result::Result<V, CacheLoaderException>>) {
		let (tx, rx) = tokio::sync::oneshot::channel();
		let sink = Arc::new(Mutex::new(CallbackSink { resolution: Resolution::Pending, notify: Some(tx) }));

		(Self { sink }, rx)
	}

	/// Report a successful load.
	///
	/// Returns [`CacheError::DoubleCompletion`] without taking effect if this callback was
	/// already completed by an earlier `on_load_success`/`on_load_failure` call.
	pub fn on_load_success(&self, value: V) -> std::result::Result<(), CacheError> {
		self.complete(Ok(value))
	}

	/// Report a failed load.
	///
	/// Returns [`CacheError::DoubleCompletion`] without taking effect if this callback was
	/// already completed by an earlier `on_load_success`/`on_load_failure` call.
	pub fn on_load_failure(
		&self,
		cause: impl std::error::Error + Send + Sync + 'static,
	) -> std::result::Result<(), CacheError> {
		self.complete(Err(CacheLoaderException::single(cause)))
	}

	/// `true` once this callback has already been completed by an earlier call.
	pub fn already_completed(&self) -> bool {
		let sink = self.sink.lock().expect("callback sink poisoned");

		sink.resolution == Resolution::Completed
	}

	fn complete(&self, result: std::result::Result<V, CacheLoaderException>) -> std::result::Result<(), CacheError> {
		let notify = {
			let mut sink = self.sink.lock().expect("callback sink poisoned");

			if sink.resolution == Resolution::Completed {
				return Err(CacheError::DoubleCompletion);
			}
			sink.resolution = Resolution::Completed;
			sink.notify.take()
		};

		if let Some(notify) = notify {
			let _ = notify.send(result);
		}

		Ok(())
	}
}

/// Delivers the outcome of an [`Loader::AsyncBulk`] call, key by key, possibly across several
/// partial calls.
#[derive(Clone)]
pub struct BulkCallback<K, V> {
	sink: Arc<Mutex<BulkSink<K, V>>>,
}

struct BulkSink<K, V> {
	total: usize,
	remaining: std::collections::HashSet<K>,
	notify: HashMap<K, tokio::sync::oneshot::Sender<std::result::Result<V, CacheLoaderException>>>,
}

impl<K, V> BulkCallback<K, V>
where
	K: std::hash::Hash + Eq + Clone + Send + 'static,
	V: Clone + Send + 'static,
{
	pub(crate) fn new(
		notify: HashMap<K, tokio::sync::oneshot::Sender<std::result::Result<V, CacheLoaderException>>>,
	) -> Self {
		let remaining: std::collections::HashSet<K> = notify.keys().cloned().collect();
		let total = remaining.len();

		Self { sink: Arc::new(Mutex::new(BulkSink { total, remaining, notify })) }
	}

	/// Report successful results for some or all of the requested keys.
	pub fn on_load_success(&self, results: HashMap<K, V>) {
		let mut sink = self.sink.lock().expect("callback sink poisoned");

		for (key, value) in results {
			sink.remaining.remove(&key);
			if let Some(tx) = sink.notify.remove(&key) {
				let _ = tx.send(Ok(value));
			}
		}
	}

	/// Report that a single, not-yet-resolved key failed. Other keys in the batch are unaffected
	/// and may still be resolved by a later call.
	pub fn on_load_failure(&self, key: K, cause: impl std::error::Error + Send + Sync + 'static) {
		let mut sink = self.sink.lock().expect("callback sink poisoned");

		sink.remaining.remove(&key);
		if let Some(tx) = sink.notify.remove(&key) {
			let _ = tx.send(Err(CacheLoaderException::single(cause)));
		}
	}

	/// Report that every remaining, not-yet-resolved key failed with the same cause.
	pub fn on_load_failure_remaining(&self, cause: impl std::error::Error + Send + Sync + 'static) {
		let mut sink = self.sink.lock().expect("callback sink poisoned");
		let failed = sink.remaining.len();
		let exception = CacheLoaderException::aggregate(failed, sink.total, cause);

		for key in std::mem::take(&mut sink.remaining) {
			if let Some(tx) = sink.notify.remove(&key) {
				let _ = tx.send(Err(exception.clone()));
			}
		}
	}

	/// Keys neither resolved nor failed yet.
	pub fn pending_keys(&self) -> Vec<K> {
		let sink = self.sink.lock().expect("callback sink poisoned");

		sink.remaining.iter().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[derive(Debug, Clone)]
	struct Boom;
	impl std::fmt::Display for Boom {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			write!(f, "boom")
		}
	}
	impl std::error::Error for Boom {}

	#[tokio::test]
	async fn single_callback_double_completion_errors_on_the_second_call() {
		let (callback, rx) = SingleCallback::<u32>::new();

		assert!(callback.on_load_success(1).is_ok());
		assert!(matches!(callback.on_load_failure(Boom), Err(CacheError::DoubleCompletion)));
		assert_eq!(rx.await.unwrap().unwrap(), 1);
	}

	type BulkReceivers = HashMap<u32, tokio::sync::oneshot::Receiver<std::result::Result<u32, CacheLoaderException>>>;

	fn bulk_callback(keys: &[u32]) -> (BulkCallback<u32, u32>, BulkReceivers) {
		let mut notify = HashMap::new();
		let mut receivers = HashMap::new();

		for &key in keys {
			let (tx, rx) = tokio::sync::oneshot::channel();

			notify.insert(key, tx);
			receivers.insert(key, rx);
		}

		(BulkCallback::new(notify), receivers)
	}

	#[tokio::test]
	async fn on_load_failure_remaining_reports_against_the_whole_batch_not_just_what_remains() {
		let (callback, mut receivers) = bulk_callback(&[1, 2, 3, 4, 5]);

		callback.on_load_success(HashMap::from([(1, 10), (2, 20)]));
		callback.on_load_failure_remaining(Boom);

		for key in [3u32, 4, 5] {
			let outcome = receivers.remove(&key).unwrap().await.unwrap();
			assert_eq!(outcome.unwrap_err().to_string(), "3 out of 5");
		}
	}

	#[tokio::test]
	async fn on_load_failure_targets_only_the_named_key() {
		let (callback, mut receivers) = bulk_callback(&[1, 2]);

		callback.on_load_failure(1, Boom);
		callback.on_load_success(HashMap::from([(2, 20)]));

		assert!(receivers.remove(&1).unwrap().await.unwrap().is_err());
		assert_eq!(receivers.remove(&2).unwrap().await.unwrap().unwrap(), 20);
	}
}
