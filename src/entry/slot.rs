//! The per-key slot: C1's entry state machine plus C2's waiter coalescer, held behind one lock
//! per key so that cross-slot operations never contend with each other.

// std
use std::sync::{
	Arc,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use tokio::{sync::oneshot, time::Instant};
// self
use crate::{
	entry::state::{EntryState, ExceptionRecord, ValueRecord},
	error::CacheLoaderException,
	resilience::ResiliencePolicy,
};

/// What a load waiter ultimately observes: a fresh value, or a failure (possibly carrying a
/// stale value the caller may choose to ignore).
#[derive(Clone, Debug)]
pub enum LoadOutcome<V> {
	/// The load installed a fresh value.
	Value(Arc<ValueRecord<V>>),
	/// The load failed; `stale` is set when a previous value remains available under
	/// suppression.
	Failure { exception: CacheLoaderException, stale: Option<Arc<ValueRecord<V>>> },
}

/// Forward-looking context carried from a failing load into whichever load attempts the next
/// retry, so the resilience policy can keep deriving `retry-count` across consecutive failures.
#[derive(Clone, Copy, Debug)]
pub struct ResilienceCarry {
	pub retry_count: u32,
	pub first_exception_at: Instant,
}

/// Bookkeeping for a single in-flight load: its waiters, and the context it needs to hand off to
/// whichever completion eventually arrives.
pub(crate) struct LoadRecord<V> {
	pub id: u64,
	pub start_time: Instant,
	/// True when this record was created by `reloadAll` and may be racing an independent,
	/// already in-flight load for the same key.
	pub is_reload: bool,
	/// Value exposed to the loader as "current entry" for the duration of this load.
	pub prior: Option<Arc<ValueRecord<V>>>,
	pub resilience_carry: Option<ResilienceCarry>,
	waiters: Vec<oneshot::Sender<LoadOutcome<V>>>,
}
impl<V> LoadRecord<V> {
	fn new(
		id: u64,
		start_time: Instant,
		is_reload: bool,
		prior: Option<Arc<ValueRecord<V>>>,
		resilience_carry: Option<ResilienceCarry>,
	) -> Self {
		Self { id, start_time, is_reload, prior, resilience_carry, waiters: Vec::new() }
	}

	fn attach(&mut self) -> oneshot::Receiver<LoadOutcome<V>> {
		let (tx, rx) = oneshot::channel();

		self.waiters.push(tx);

		rx
	}
}

/// Result of resolving access to a slot.
pub(crate) enum AccessOutcome<V> {
	/// Serve this value without loading.
	Value(Arc<ValueRecord<V>>),
	/// Serve this cached exception without loading (retry not yet due, no stale value to serve).
	Exception(CacheLoaderException),
	/// A load for this key is already in flight; await its outcome.
	Await(oneshot::Receiver<LoadOutcome<V>>),
	/// A new load was started for this key; the caller must dispatch it and may await the
	/// returned receiver for its own completion.
	Dispatch { id: u64, start_time: Instant, prior: Option<Arc<ValueRecord<V>>>, receiver: oneshot::Receiver<LoadOutcome<V>> },
}

/// The per-key slot: current lifecycle state plus whatever loads are in flight for this key.
pub(crate) struct Slot<V> {
	state: EntryState<V>,
	/// The load that new `get`/`getAll`/`loadAll` callers coalesce onto, if one is in flight.
	primary: Option<LoadRecord<V>>,
	/// `reloadAll`-initiated loads that are racing an existing primary load and therefore are
	/// not attached to by new coalescing callers.
	detached: Vec<LoadRecord<V>>,
}
impl<V> Slot<V> {
	pub fn new() -> Self {
		Self { state: EntryState::Empty, primary: None, detached: Vec::new() }
	}

	pub fn state(&self) -> &EntryState<V> {
		&self.state
	}

	/// Resolve a `get`/`getAll`/`loadAll` access against the current state, keeping expiry and
	/// resilience timing in mind. Returns the action the caller must take.
	pub fn access(
		&mut self,
		now: Instant,
		expire_after_write: Option<std::time::Duration>,
		keep_data_after_expired: bool,
		next_id: &AtomicU64,
	) -> AccessOutcome<V> {
		match &self.state {
			EntryState::Loading =>
				if let Some(record) = self.primary.as_mut() {
					AccessOutcome::Await(record.attach())
				} else {
					// Defensive: state says Loading but the bookkeeping record is gone (e.g. a
					// detached reload raced it away). Treat as empty.
					self.start_load(now, next_id, None)
				},
			EntryState::Present(value) | EntryState::Refreshing(value) =>
				if is_expired(value.loaded_at, now, expire_after_write) {
					// A load may already be in flight for this key (a refresh-ahead reload, or a
					// `reloadAll` force against a non-empty entry) even though `state` hasn't left
					// Present/Refreshing; coalesce onto it instead of starting a second one that
					// would race it and orphan whichever completes second.
					match self.primary.as_mut() {
						Some(record) => AccessOutcome::Await(record.attach()),
						None => {
							let prior = if keep_data_after_expired { Some(value.clone()) } else { None };

							self.state = EntryState::Empty;

							self.start_load(now, next_id, prior)
						},
					}
				} else {
					AccessOutcome::Value(value.clone())
				},
			EntryState::Exceptional(record) =>
				if record.is_suppressed(now) {
					AccessOutcome::Value(
						record.stale.clone().expect("suppression implies a stale value"),
					)
				} else if !record.retry_due(now) {
					AccessOutcome::Exception(record.exception.clone())
				} else if let Some(record) = self.primary.as_mut() {
					// A `reloadAll` force already has a load in flight for this key even though
					// `state` is still `Exceptional`; coalesce onto it rather than racing it with a
					// second retry.
					AccessOutcome::Await(record.attach())
				} else {
					let carry = ResilienceCarry {
						retry_count: record.retry_count,
						first_exception_at: record.first_exception_at,
					};
					let prior = record.stale.clone();

					self.start_load_with_carry(now, next_id, prior, Some(carry))
				},
			EntryState::Empty | EntryState::Removed => self.start_load(now, next_id, None),
		}
	}

	/// Force a new load regardless of current state, per `reloadAll` semantics. Does not
	/// coalesce with an existing in-flight load; if one is already in flight the new load races
	/// it as a detached record.
	pub fn force_reload(
		&mut self,
		now: Instant,
		next_id: &AtomicU64,
	) -> (u64, Instant, oneshot::Receiver<LoadOutcome<V>>) {
		let id = next_id.fetch_add(1, Ordering::Relaxed);
		let prior = self.state.current_value();
		let carry = match &self.state {
			EntryState::Exceptional(record) => Some(ResilienceCarry {
				retry_count: record.retry_count,
				first_exception_at: record.first_exception_at,
			}),
			_ => None,
		};
		let mut record = LoadRecord::new(id, now, true, prior, carry);
		let rx = record.attach();

		if self.primary.is_none() {
			if matches!(self.state, EntryState::Empty | EntryState::Removed) {
				self.state = EntryState::Loading;
			}
			self.primary = Some(record);
		} else {
			self.detached.push(record);
		}

		(id, now, rx)
	}

	/// Attempt to begin a refresh-ahead load on a `Present` entry that has crossed its refresh
	/// threshold. Returns `None` if a load (refresh or otherwise) is already in flight.
	pub fn try_begin_refresh(&mut self, now: Instant, next_id: &AtomicU64) -> Option<(u64, Instant)> {
		if self.primary.is_some() {
			return None;
		}

		match &self.state {
			EntryState::Present(value) => {
				let id = next_id.fetch_add(1, Ordering::Relaxed);
				let record = LoadRecord::new(id, now, false, Some(value.clone()), None);

				self.state = EntryState::Refreshing(value.clone());
				self.primary = Some(record);

				Some((id, now))
			},
			_ => None,
		}
	}

	/// Apply the outcome of the load identified by `id`, producing the waiters to notify.
	/// Returns `None` if no record with this id is found (e.g. the entry was invalidated after
	/// dispatch but before completion).
	pub fn finish_load(
		&mut self,
		id: u64,
		now: Instant,
		result: Result<V, CacheLoaderException>,
		policy: &ResiliencePolicy,
	) -> Option<(Vec<oneshot::Sender<LoadOutcome<V>>>, LoadOutcome<V>)> {
		let record = self.take_record(id)?;
		let LoadRecord { waiters, prior, resilience_carry, .. } = record;

		let outcome = match result {
			Ok(value) => {
				let value_record = Arc::new(ValueRecord { value, loaded_at: now });

				self.state = EntryState::Present(value_record.clone());

				LoadOutcome::Value(value_record)
			},
			Err(exception) => {
				let (retry_count, first_exception_at) = match resilience_carry {
					Some(carry) => (carry.retry_count + 1, carry.first_exception_at),
					None => (0, now),
				};
				let schedule = policy.schedule(now, retry_count, first_exception_at);
				let stale = prior;
				let exception_record = Arc::new(ExceptionRecord {
					exception: exception.clone(),
					stale: stale.clone(),
					retry_count,
					first_exception_at,
					suppress_until: schedule.suppress_until,
					retry_at: schedule.retry_at,
				});

				self.state = EntryState::Exceptional(exception_record);

				LoadOutcome::Failure { exception, stale }
			},
		};

		Some((waiters, outcome))
	}

	/// Unconditionally install a value, overriding any non-loading state and resolving any
	/// in-flight load's waiters with the put value rather than leaving them to await a loader
	/// that will overwrite it.
	pub fn put(&mut self, value: V, now: Instant) {
		let value_record = Arc::new(ValueRecord { value, loaded_at: now });

		for record in self.primary.take().into_iter().chain(self.detached.drain(..)) {
			for tx in record.waiters {
				let _ = tx.send(LoadOutcome::Value(value_record.clone()));
			}
		}

		self.state = EntryState::Present(value_record);
	}

	/// Discard any cached state, as if the key had never been loaded. An in-flight load's record
	/// is dropped along with it: its waiters observe a disconnected receiver rather than the
	/// load's eventual outcome, and the load's completion later finds no record to apply.
	pub fn invalidate(&mut self) {
		self.primary.take();
		self.detached.clear();
		self.state = EntryState::Removed;
	}

	pub fn peek_value(&self) -> Option<Arc<ValueRecord<V>>> {
		self.state.current_value()
	}

	pub fn peek_exception(&self) -> Option<CacheLoaderException> {
		self.state.exception()
	}

	fn take_record(&mut self, id: u64) -> Option<LoadRecord<V>> {
		if self.primary.as_ref().map(|r| r.id) == Some(id) {
			return self.primary.take();
		}
		if let Some(pos) = self.detached.iter().position(|r| r.id == id) {
			return Some(self.detached.remove(pos));
		}
		None
	}

	fn start_load(
		&mut self,
		now: Instant,
		next_id: &AtomicU64,
		prior: Option<Arc<ValueRecord<V>>>,
	) -> AccessOutcome<V> {
		self.start_load_with_carry(now, next_id, prior, None)
	}

	fn start_load_with_carry(
		&mut self,
		now: Instant,
		next_id: &AtomicU64,
		prior: Option<Arc<ValueRecord<V>>>,
		carry: Option<ResilienceCarry>,
	) -> AccessOutcome<V> {
		let id = next_id.fetch_add(1, Ordering::Relaxed);
		let mut record = LoadRecord::new(id, now, false, prior.clone(), carry);
		let receiver = record.attach();

		self.state = EntryState::Loading;
		self.primary = Some(record);

		AccessOutcome::Dispatch { id, start_time: now, prior, receiver }
	}
}

fn is_expired(loaded_at: Instant, now: Instant, expire_after_write: Option<std::time::Duration>) -> bool {
	match expire_after_write {
		Some(ttl) => now >= loaded_at + ttl,
		None => false,
	}
}
