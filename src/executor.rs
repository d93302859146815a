//! Executor abstraction for running loader code off whatever task requested it.
//!
//! Bulk and bounded throughput matter here the way retry budgeting matters to the teacher's
//! `http::retry::RetryExecutor`: a fixed resource (attempts there, worker slots here) is consumed
//! under a policy and the caller is told when the resource is exhausted rather than being made to
//! block indefinitely.

// std
use std::{future::Future, sync::Arc};
// crates.io
use tokio::sync::Semaphore;

/// Whether a unit of loader work could be accepted onto the executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
	/// The work was accepted and will run.
	Accepted,
	/// The executor is at capacity; the caller should run the work itself (or fail, depending on
	/// call site).
	Rejected,
}

/// A pool of loader-execution slots bounded by `loader_thread_count`.
///
/// Saturation is modeled as a counting semaphore: `try_spawn` only proceeds when a permit is
/// immediately available, matching the "rejected or at capacity" wording used for the loader
/// executor.
#[derive(Clone)]
pub struct BoundedExecutor {
	semaphore: Arc<Semaphore>,
}
impl BoundedExecutor {
	pub fn new(capacity: usize) -> Self {
		Self { semaphore: Arc::new(Semaphore::new(capacity.max(1))) }
	}

	/// Attempt to run `task` on the executor. Returns [`Admission::Rejected`] without running
	/// `task` if no slot is immediately free.
	pub fn try_spawn<F>(&self, task: F) -> Admission
	where
		F: Future<Output = ()> + Send + 'static,
	{
		match self.semaphore.clone().try_acquire_owned() {
			Ok(permit) => {
				tokio::spawn(async move {
					task.await;
					drop(permit);
				});

				Admission::Accepted
			},
			Err(_) => Admission::Rejected,
		}
	}

	/// Number of loader slots currently free.
	pub fn available_permits(&self) -> usize {
		self.semaphore.available_permits()
	}

	/// Run `task` on the calling task once a slot is free, blocking the caller (not spawning) for
	/// however long the executor is saturated. Used to bound per-key loader concurrency within a
	/// single bulk fan-out without moving the work off the caller's task the way `try_spawn` does.
	pub async fn run_bounded<F>(&self, task: F) -> F::Output
	where
		F: Future,
	{
		let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");

		task.await
	}
}

/// Unbounded dispatch used for work that must never be rejected: `loadAll`/`reloadAll` dispatch
/// tasks and refresh-ahead tasks, which the saturation rule routes away from the calling task
/// regardless of loader-executor capacity.
#[derive(Clone, Default)]
pub struct UnboundedExecutor;
impl UnboundedExecutor {
	pub fn spawn<F>(&self, task: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		tokio::spawn(task);
	}
}
