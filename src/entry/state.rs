//! Entry lifecycle states, grounded in the teacher's `cache::state` module but generalized from
//! a single JWKS payload to an arbitrary cached value with loader-driven resilience.

// self
use crate::{_prelude::*, error::CacheLoaderException};

/// A successfully loaded value together with the instant it was installed.
#[derive(Clone, Debug)]
pub struct ValueRecord<V> {
	/// The cached value.
	pub value: V,
	/// Monotonic instant the value was installed into the entry.
	pub loaded_at: Instant,
}

/// Bookkeeping retained for an entry currently in the `Exceptional` state.
#[derive(Clone, Debug)]
pub struct ExceptionRecord<V> {
	/// The wrapped loader failure.
	pub exception: CacheLoaderException,
	/// Prior value retained for stale-serving while resilience suppresses the exception.
	pub stale: Option<Arc<ValueRecord<V>>>,
	/// Consecutive failure count; resets to zero on the next successful load.
	pub retry_count: u32,
	/// Instant the first exception in the current failure streak was observed.
	pub first_exception_at: Instant,
	/// Instant after which suppression (stale serving) no longer applies.
	pub suppress_until: Option<Instant>,
	/// Instant after which a new load attempt is permitted.
	pub retry_at: Instant,
}
impl<V> ExceptionRecord<V> {
	/// Whether a stale value may still be served in place of the cached exception.
	pub fn is_suppressed(&self, now: Instant) -> bool {
		self.stale.is_some() && self.suppress_until.is_some_and(|until| now < until)
	}

	/// Whether the retry window has elapsed and a fresh load may be attempted.
	pub fn retry_due(&self, now: Instant) -> bool {
		now >= self.retry_at
	}
}

/// Per-entry lifecycle state.
///
/// Transitions: `Empty -> Loading -> Present | Exceptional`,
/// `Present -> Refreshing -> Present | Exceptional`, `Exceptional -> Loading -> ...`, and any
/// state may be driven to `Removed` by an explicit invalidation.
#[derive(Clone, Debug, Default)]
pub enum EntryState<V> {
	/// No value, no work in progress.
	#[default]
	Empty,
	/// An initial (non-refresh) load is in flight; no value is available yet.
	Loading,
	/// A fresh value is installed and ready to serve.
	Present(Arc<ValueRecord<V>>),
	/// The current value is still served while a refresh-ahead reload runs in the background.
	Refreshing(Arc<ValueRecord<V>>),
	/// The most recent load failed; a stale value and/or resilience schedule is attached.
	Exceptional(Arc<ExceptionRecord<V>>),
	/// The entry was explicitly removed; behaves like `Empty` for future access.
	Removed,
}
impl<V> EntryState<V> {
	/// The value this state would currently serve, if any (ignores retry/suppression timing).
	pub fn current_value(&self) -> Option<Arc<ValueRecord<V>>> {
		match self {
			EntryState::Present(value) | EntryState::Refreshing(value) => Some(value.clone()),
			EntryState::Exceptional(record) => record.stale.clone(),
			EntryState::Empty | EntryState::Loading | EntryState::Removed => None,
		}
	}

	/// The cached exception view, if this state carries one.
	pub fn exception(&self) -> Option<CacheLoaderException> {
		match self {
			EntryState::Exceptional(record) => Some(record.exception.clone()),
			_ => None,
		}
	}
}
