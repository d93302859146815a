//! The context object handed to a loader for the duration of a single load, giving it visibility
//! into the entry it is about to replace without letting it reach back into the cache after the
//! load has completed.

// std
use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};
// crates.io
use tokio::time::Instant;
// self
use crate::{
	entry::state::ValueRecord,
	error::{CacheError, Result},
};

/// A read-only snapshot of the value or exception an entry held immediately before the current
/// load began.
#[derive(Clone, Debug)]
pub enum CurrentEntry<V> {
	/// The entry held a value (the load may be a refresh or a retry after suppression expired).
	Value(Arc<ValueRecord<V>>),
	/// The entry held no value; this is the first load for the key, or a prior exception carried
	/// no stale value.
	Empty,
}

/// Per-load context passed to loader callables.
///
/// `current_entry` is only valid for the duration of the load this context was created for;
/// once the load's outcome has been delivered the context is deactivated and further access
/// returns [`CacheError::InactiveContext`].
///
/// This intentionally does not expose an executor handle, a loader-executor reference, or a
/// cache handle back to the owning cache: those would let a loader re-enter the cache it is
/// itself being called from (e.g. `get`/`put` on the same key from inside its own loader),
/// which this core has no deadlock-free story for. A loader that needs to trigger work on other
/// keys should hold its own `LoadingCache` handle captured at construction time instead of
/// reaching for one through the context.
#[derive(Clone)]
pub struct LoaderContext<K, V> {
	key: K,
	prior: Option<Arc<ValueRecord<V>>>,
	is_refresh: bool,
	start_time: Instant,
	active: Arc<AtomicBool>,
}
impl<K, V> LoaderContext<K, V> {
	pub(crate) fn new(key: K, prior: Option<Arc<ValueRecord<V>>>, is_refresh: bool, start_time: Instant) -> Self {
		Self { key, prior, is_refresh, start_time, active: Arc::new(AtomicBool::new(true)) }
	}

	/// The key being loaded.
	pub fn key(&self) -> &K {
		&self.key
	}

	/// Whether this load was triggered by the refresh-ahead driver rather than a direct cache
	/// access or an explicit `reloadAll`.
	pub fn is_refresh(&self) -> bool {
		self.is_refresh
	}

	/// When this load began.
	pub fn start_time(&self) -> Instant {
		self.start_time
	}

	/// The entry's value immediately before this load began.
	///
	/// Returns `Err(CacheError::InactiveContext)` once the load this context belongs to has
	/// already delivered its outcome.
	pub fn current_entry(&self) -> Result<CurrentEntry<V>> {
		if !self.active.load(Ordering::Acquire) {
			return Err(CacheError::InactiveContext);
		}

		Ok(match &self.prior {
			Some(value) => CurrentEntry::Value(value.clone()),
			None => CurrentEntry::Empty,
		})
	}

	pub(crate) fn deactivate(&self) {
		self.active.store(false, Ordering::Release);
	}
}
