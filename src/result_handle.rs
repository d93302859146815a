//! The handle returned by `load_all`/`reload_all`: both calls return immediately without
//! blocking the caller, handing back a future the caller may poll, await, or drop.

// std
use std::{
	collections::HashMap,
	future::Future,
	hash::Hash,
	pin::Pin,
	task::{Context, Poll},
};
// crates.io
use tokio::task::JoinHandle;
// self
use crate::error::CacheLoaderException;

/// Per-key outcome of a bulk load, as tracked internally while a [`ResultHandle`] is in flight.
pub(crate) type KeyResult<V> = std::result::Result<V, CacheLoaderException>;

/// A non-blocking handle to the outcome of a `load_all` or `reload_all` call.
///
/// Resolves to `Ok(values)` only if every requested key loaded successfully; if any key failed,
/// resolves to a single aggregate [`CacheLoaderException`] rather than a per-key map, matching
/// the all-or-nothing contract of `loadAll`/`reloadAll` (as opposed to `getAll`, which reports
/// each key's outcome independently). Dropping the handle does not cancel the underlying loads;
/// it only stops the caller from observing their outcome.
pub struct ResultHandle<K, V> {
	inner: JoinHandle<HashMap<K, KeyResult<V>>>,
}
impl<K, V> ResultHandle<K, V>
where
	K: Eq + Hash + Send + 'static,
	V: Send + 'static,
{
	pub(crate) fn new(inner: JoinHandle<HashMap<K, KeyResult<V>>>) -> Self {
		Self { inner }
	}

	/// Whether every key's load has completed.
	pub fn is_done(&self) -> bool {
		self.inner.is_finished()
	}
}
impl<K, V> Future for ResultHandle<K, V>
where
	K: Eq + Hash + Send + 'static,
	V: Send + 'static,
{
	type Output = std::result::Result<HashMap<K, V>, CacheLoaderException>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.inner).poll(cx) {
			Poll::Ready(result) => Poll::Ready(aggregate(result.expect("result handle task panicked"))),
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Collapse a per-key outcome map into the single success/failure the handle hands back:
/// `Ok` only if every key resolved, `Err` carrying one aggregate exception otherwise.
fn aggregate<K: Eq + Hash, V>(
	outcomes: HashMap<K, KeyResult<V>>,
) -> std::result::Result<HashMap<K, V>, CacheLoaderException> {
	let total = outcomes.len();
	let failed = outcomes.values().filter(|outcome| outcome.is_err()).count();

	if failed == 0 {
		return Ok(outcomes.into_iter().map(|(key, outcome)| (key, outcome.expect("checked above"))).collect());
	}

	let representative =
		outcomes.into_values().find_map(|outcome| outcome.err()).expect("failed count is nonzero");

	Err(CacheLoaderException::aggregate(failed, total, representative))
}
