//! C7: the public operations façade.
//!
//! Mirrors the shape of the teacher's `Registry`/`CacheManager` split — a sharded map of per-key
//! state behind a coarse map lock, each entry behind its own fine-grained lock — generalized from
//! a single JWKS-per-tenant table to an arbitrary key space.

// std
use std::{
	collections::HashMap,
	hash::Hash,
	sync::{
		Mutex, RwLock,
		atomic::{AtomicBool, AtomicU64, Ordering},
	},
};
// self
use crate::{
	_prelude::*,
	config::{CacheBuilder, CacheConfig},
	context::LoaderContext,
	entry::slot::{AccessOutcome, LoadOutcome, Slot},
	error::CacheLoaderException,
	executor::BoundedExecutor,
	refresh::{self, RefreshDriver},
	result_handle::ResultHandle,
};

/// A snapshot of a key's cached state as observed by [`LoadingCache::peek_entry`].
#[derive(Clone, Debug)]
pub enum EntryView<V> {
	/// The entry currently holds a value.
	Value(V),
	/// The entry currently holds a cached exception, with no value available to serve in its
	/// place.
	Exception(CacheLoaderException),
}

/// An in-process loading cache: single-flight loads, bulk fan-in/out, resilience, and
/// refresh-ahead over an arbitrary key/value pair.
#[derive(Clone)]
pub struct LoadingCache<K, V> {
	inner: Arc<CacheInner<K, V>>,
}

struct CacheInner<K, V> {
	slots: RwLock<HashMap<K, Arc<Mutex<Slot<V>>>>>,
	next_id: AtomicU64,
	config: CacheConfig<K, V>,
	refresh: RefreshDriver,
	loader_executor: BoundedExecutor,
	closed: AtomicBool,
}

impl<K, V> LoadingCache<K, V>
where
	K: Eq + Hash + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	/// Start building a cache with a typed configuration.
	pub fn builder() -> CacheBuilder<K, V> {
		CacheBuilder::new()
	}

	/// Construct a cache from an already-validated configuration.
	pub fn new(config: CacheConfig<K, V>) -> Self {
		let loader_executor = BoundedExecutor::new(config.loader_thread_count);

		Self {
			inner: Arc::new(CacheInner {
				slots: RwLock::new(HashMap::new()),
				next_id: AtomicU64::new(1),
				config,
				refresh: RefreshDriver::new(),
				loader_executor,
				closed: AtomicBool::new(false),
			}),
		}
	}

	/// Fetch a single key, loading it if necessary. Runs the loader inline on the calling task.
	#[tracing::instrument(skip(self, key), fields(closed = self.inner.closed.load(Ordering::Acquire)))]
	pub async fn get(&self, key: K) -> Result<V> {
		self.ensure_open()?;

		let mut results = self.resolve(vec![key.clone()]).await;
		let outcome = results.remove(&key).expect("resolve always reports every requested key");

		outcome.map_err(wrap)
	}

	/// Fetch a set of keys, loading whichever are missing. Coalesces with in-flight loads and
	/// fans bulk-capable loaders out to a single call for the keys that are actually missing.
	#[tracing::instrument(skip(self, keys), fields(count = keys.len()))]
	pub async fn get_all(&self, keys: Vec<K>) -> HashMap<K, Result<V>> {
		if self.inner.closed.load(Ordering::Acquire) {
			return keys.into_iter().map(|k| (k, Err(CacheError::Closed))).collect();
		}

		self.resolve(keys).await.into_iter().map(|(k, v)| (k, v.map_err(wrap))).collect()
	}

	/// Ensure every key in `keys` has a fresh value, without blocking the caller. The loader
	/// always runs on a spawned task, never on the calling task, regardless of loader-executor
	/// saturation.
	pub fn load_all(&self, keys: Vec<K>) -> Result<ResultHandle<K, V>> {
		self.ensure_open()?;

		let inner = self.inner.clone();
		let handle = tokio::spawn(async move {
			let cache = LoadingCache { inner };

			cache.resolve(keys).await
		});

		Ok(ResultHandle::new(handle))
	}

	/// Force a fresh load for every key in `keys`, regardless of current state, without blocking
	/// the caller. A key with an in-flight load is not coalesced onto; the forced reload races it
	/// and last completion wins.
	pub fn reload_all(&self, keys: Vec<K>) -> Result<ResultHandle<K, V>> {
		self.ensure_open()?;

		let inner = self.inner.clone();
		let handle = tokio::spawn(async move {
			let cache = LoadingCache { inner };

			cache.force_resolve(keys).await
		});

		Ok(ResultHandle::new(handle))
	}

	/// Read the current value without triggering a load. Ignores retry timing: a suppressed
	/// exception's stale value is returned, but a bare exception with no stale value is not.
	pub fn peek(&self, key: &K) -> Option<V> {
		let slot = self.existing_slot(key)?;
		let guard = slot.lock().expect("slot mutex poisoned");

		guard.peek_value().map(|record| record.value.clone())
	}

	/// Whether `key` currently has a servable value (equivalent to `peek(key).is_some()`).
	pub fn contains_key(&self, key: &K) -> bool {
		self.peek(key).is_some()
	}

	/// Read the current value or cached exception without triggering a load.
	///
	/// Unlike [`LoadingCache::peek`], which only ever reports a value, this also surfaces a
	/// currently-cached exception for a key with no servable stale value (or one not being
	/// served because suppression has lapsed).
	pub fn peek_entry(&self, key: &K) -> Option<EntryView<V>> {
		let slot = self.existing_slot(key)?;
		let guard = slot.lock().expect("slot mutex poisoned");

		if let Some(record) = guard.peek_value() {
			return Some(EntryView::Value(record.value.clone()));
		}

		guard.peek_exception().map(EntryView::Exception)
	}

	/// Install a value directly, bypassing the loader. Any load in flight for `key` is resolved
	/// with this value instead of whatever the loader eventually returns.
	pub fn put(&self, key: K, value: V) -> Result<()> {
		self.ensure_open()?;

		let slot = self.get_or_create_slot(&key);
		let mut guard = slot.lock().expect("slot mutex poisoned");

		guard.put(value, Instant::now());

		Ok(())
	}

	/// Remove a key's cached state. Equivalent to `peek` never having happened.
	pub fn invalidate(&self, key: &K) {
		if let Some(slot) = self.existing_slot(key) {
			let mut guard = slot.lock().expect("slot mutex poisoned");

			guard.invalidate();
		}
	}

	/// Apply `processor` to each key's current value, synchronously and without involving the
	/// loader. Returning `Some(value)` installs that value; returning `None` invalidates the key.
	pub fn invoke_all<F>(&self, keys: Vec<K>, mut processor: F) -> Result<HashMap<K, Option<V>>>
	where
		F: FnMut(&K, Option<V>) -> Option<V>,
	{
		self.ensure_open()?;

		let now = Instant::now();
		let mut out = HashMap::with_capacity(keys.len());

		for key in keys {
			let slot = self.get_or_create_slot(&key);
			let mut guard = slot.lock().expect("slot mutex poisoned");
			let current = guard.peek_value().map(|record| record.value.clone());
			let next = processor(&key, current);

			match next.clone() {
				Some(value) => guard.put(value, now),
				None => guard.invalidate(),
			}

			out.insert(key, next);
		}

		Ok(out)
	}

	/// Stop accepting new operations. Loads already dispatched continue to completion.
	pub fn close(&self) {
		self.inner.closed.store(true, Ordering::Release);
	}

	/// Whether [`LoadingCache::close`] has been called.
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}

	fn ensure_open(&self) -> Result<()> {
		if self.inner.closed.load(Ordering::Acquire) {
			Err(CacheError::Closed)
		} else {
			Ok(())
		}
	}

	fn existing_slot(&self, key: &K) -> Option<Arc<Mutex<Slot<V>>>> {
		self.inner.slots.read().expect("slots lock poisoned").get(key).cloned()
	}

	fn get_or_create_slot(&self, key: &K) -> Arc<Mutex<Slot<V>>> {
		if let Some(slot) = self.existing_slot(key) {
			return slot;
		}

		let mut slots = self.inner.slots.write().expect("slots lock poisoned");

		slots.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(Slot::new()))).clone()
	}

	/// Resolve `keys` via normal access semantics: serve cached values/exceptions, coalesce onto
	/// in-flight loads, and dispatch a bulk call for whichever keys are actually missing.
	async fn resolve(&self, keys: Vec<K>) -> HashMap<K, std::result::Result<V, CacheLoaderException>> {
		let now = Instant::now();
		let mut results = HashMap::with_capacity(keys.len());
		let mut pending_awaits = Vec::new();
		let mut to_dispatch = Vec::new();

		for key in keys {
			let slot = self.get_or_create_slot(&key);
			let outcome = {
				let mut guard = slot.lock().expect("slot mutex poisoned");

				guard.access(
					now,
					self.inner.config.expire_after_write,
					self.inner.config.keep_data_after_expired,
					&self.inner.next_id,
				)
			};

			match outcome {
				AccessOutcome::Value(value) => {
					results.insert(key, Ok(value.value.clone()));
				},
				AccessOutcome::Exception(exception) => {
					results.insert(key, Err(exception));
				},
				AccessOutcome::Await(receiver) => {
					pending_awaits.push((key, receiver));
				},
				AccessOutcome::Dispatch { id, prior, .. } => {
					to_dispatch.push((key, id, prior));
				},
			}
		}

		if !to_dispatch.is_empty() {
			self.dispatch_and_finish(to_dispatch, now, &mut results).await;
		}

		for (key, receiver) in pending_awaits {
			let outcome = receiver.await.unwrap_or_else(|_| {
				LoadOutcome::Failure { exception: disconnected(), stale: None }
			});

			results.insert(key, outcome_to_result(outcome));
		}

		self.maybe_trigger_refresh(&results, now);

		results
	}

	/// Resolve `keys` via `reloadAll` semantics: force a fresh load for every key regardless of
	/// current state.
	async fn force_resolve(&self, keys: Vec<K>) -> HashMap<K, std::result::Result<V, CacheLoaderException>> {
		let now = Instant::now();
		let mut results = HashMap::with_capacity(keys.len());
		let mut to_dispatch = Vec::with_capacity(keys.len());

		for key in keys {
			let slot = self.get_or_create_slot(&key);
			let (id, prior) = {
				let mut guard = slot.lock().expect("slot mutex poisoned");
				let prior = guard.peek_value();
				let (id, _, _receiver) = guard.force_reload(now, &self.inner.next_id);

				(id, prior)
			};

			to_dispatch.push((key, id, prior));
		}

		self.dispatch_and_finish(to_dispatch, now, &mut results).await;

		results
	}

	async fn dispatch_and_finish(
		&self,
		to_dispatch: Vec<(K, u64, Option<Arc<crate::entry::state::ValueRecord<V>>>)>,
		now: Instant,
		results: &mut HashMap<K, std::result::Result<V, CacheLoaderException>>,
	) {
		let Some(loader) = self.inner.config.loader.clone() else {
			for (key, id, _) in to_dispatch {
				let exception = CacheLoaderException::with_message("no loader configured", NoLoaderError);

				self.finish_one(&key, id, now, Err(exception), results);
			}

			return;
		};

		let requests = to_dispatch
			.iter()
			.map(|(key, _, prior)| (key.clone(), LoaderContext::new(key.clone(), prior.clone(), false, now)))
			.collect();

		let outcomes = crate::bulk::run_bulk(
			requests,
			&loader,
			&self.inner.loader_executor,
			self.inner.config.permit_null_values,
		)
		.await;

		for (key, id, _) in to_dispatch {
			let result = outcomes.get(&key).cloned().unwrap_or_else(|| {
				Err(CacheLoaderException::with_message("key missing from bulk dispatch", LoadDroppedError))
			});

			self.finish_one(&key, id, now, result, results);
		}
	}

	fn finish_one(
		&self,
		key: &K,
		id: u64,
		now: Instant,
		result: std::result::Result<V, CacheLoaderException>,
		results: &mut HashMap<K, std::result::Result<V, CacheLoaderException>>,
	) {
		let slot = self.get_or_create_slot(key);
		let mut guard = slot.lock().expect("slot mutex poisoned");
		let finished = guard.finish_load(id, now, result, &self.inner.config.resilience);

		match finished {
			Some((waiters, outcome)) => {
				for tx in waiters {
					let _ = tx.send(outcome.clone());
				}

				results.insert(key.clone(), outcome_to_result(outcome));
			},
			// The load record was already taken by a concurrent `put`/`invalidate`; report
			// whatever that operation left behind instead of dropping the key from the result.
			// `put` always leaves a value behind, but `invalidate` leaves the entry genuinely
			// empty, so fall back to a synthetic failure rather than omitting the key: every
			// dispatched key must end up in `results`, since callers (starting with `get`'s own
			// `results.remove(&key).expect(...)`) rely on that.
			None => {
				if let Some(value) = guard.peek_value() {
					results.insert(key.clone(), Ok(value.value.clone()));
				} else if let Some(exception) = guard.peek_exception() {
					results.insert(key.clone(), Err(exception));
				} else {
					results.insert(key.clone(), Err(disconnected()));
				}
			},
		}
	}

	fn maybe_trigger_refresh(&self, results: &HashMap<K, std::result::Result<V, CacheLoaderException>>, now: Instant) {
		let Some(lead) = self.inner.config.refresh_ahead else { return };
		let Some(ttl) = self.inner.config.expire_after_write else { return };
		let Some(loader) = self.inner.config.loader.clone() else { return };

		for key in results.keys() {
			let slot = self.get_or_create_slot(key);
			let loaded_at = {
				let guard = slot.lock().expect("slot mutex poisoned");

				match guard.peek_value() {
					Some(value) => value.loaded_at,
					None => continue,
				}
			};

			if !refresh::due_for_refresh(loaded_at, now, Some(ttl), Some(lead)) {
				continue;
			}

			let begun = {
				let mut guard = slot.lock().expect("slot mutex poisoned");

				guard.try_begin_refresh(now, &self.inner.next_id)
			};

			let Some((id, start_time)) = begun else { continue };

			let inner = self.inner.clone();
			let key = key.clone();
			let loader = loader.clone();

			self.inner.refresh.trigger(async move {
				let cache = LoadingCache { inner };
				let prior = cache.existing_slot(&key).and_then(|slot| {
					let guard = slot.lock().expect("slot mutex poisoned");

					guard.peek_value()
				});
				let ctx = LoaderContext::new(key.clone(), prior, true, start_time);
				let result = crate::dispatch::run_single(&loader, key.clone(), ctx).await;
				let mut scratch = HashMap::new();

				cache.finish_one(&key, id, start_time, result, &mut scratch);
			});
		}
	}
}

fn outcome_to_result<V: Clone>(outcome: LoadOutcome<V>) -> std::result::Result<V, CacheLoaderException> {
	match outcome {
		LoadOutcome::Value(value) => Ok(value.value.clone()),
		LoadOutcome::Failure { exception, .. } => Err(exception),
	}
}

fn disconnected() -> CacheLoaderException {
	CacheLoaderException::with_message("load record dropped before completion", LoadDroppedError)
}

/// Wraps a per-key load failure into the public error type, recognizing the synthetic cause this
/// module raises when no loader is configured and surfacing it as [`CacheError::NoLoader`] instead
/// of the generic [`CacheError::Load`] envelope.
fn wrap(exception: CacheLoaderException) -> CacheError {
	if exception.cause().downcast_ref::<NoLoaderError>().is_some() {
		CacheError::NoLoader
	} else {
		CacheError::Load(exception)
	}
}

/// Cause used when an operation needed to dispatch a load but no loader is configured.
#[derive(Debug, Clone)]
struct NoLoaderError;
impl std::fmt::Display for NoLoaderError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "no loader configured")
	}
}
impl std::error::Error for NoLoaderError {}

/// Cause used when a load's record was taken by something else (a dropped bulk-callback key, a
/// concurrent `invalidate`) before the waiter watching it could observe a real outcome.
#[derive(Debug, Clone)]
struct LoadDroppedError;
impl std::fmt::Display for LoadDroppedError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "load record dropped before completion")
	}
}
impl std::error::Error for LoadDroppedError {}
