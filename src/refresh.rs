//! C6: refresh-ahead timing and dispatch. Deciding *whether* a value is due for a background
//! reload is pure arithmetic; actually running one is delegated to an unbounded executor so the
//! accessing caller is never blocked on it.

// crates.io
use tokio::time::{Duration, Instant};
// self
use crate::executor::UnboundedExecutor;

/// Whether a value loaded at `loaded_at` and observed at `now` has crossed the refresh-ahead
/// threshold for the configured `expire_after_write`/`refresh_ahead` lead time.
///
/// Returns `false` whenever either knob is unset; refresh-ahead is opt-in and requires an
/// expiry policy to lead ahead of.
pub(crate) fn due_for_refresh(
	loaded_at: Instant,
	now: Instant,
	expire_after_write: Option<Duration>,
	refresh_ahead: Option<Duration>,
) -> bool {
	match (expire_after_write, refresh_ahead) {
		(Some(ttl), Some(lead)) => now + lead >= loaded_at + ttl,
		_ => false,
	}
}

/// Runs refresh-ahead loads on a dedicated unbounded executor so they never compete with (or get
/// rejected by) the bounded loader executor used for foreground loads.
#[derive(Clone, Default)]
pub(crate) struct RefreshDriver {
	executor: UnboundedExecutor,
}
impl RefreshDriver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn trigger<F>(&self, task: F)
	where
		F: std::future::Future<Output = ()> + Send + 'static,
	{
		self.executor.spawn(task);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn due_only_when_both_knobs_set_and_within_lead_time() {
		let loaded_at = Instant::now();
		let ttl = Duration::from_secs(60);
		let lead = Duration::from_secs(10);

		assert!(!due_for_refresh(loaded_at, loaded_at, None, Some(lead)));
		assert!(!due_for_refresh(loaded_at, loaded_at, Some(ttl), None));
		assert!(!due_for_refresh(loaded_at, loaded_at + Duration::from_secs(40), Some(ttl), Some(lead)));
		assert!(due_for_refresh(loaded_at, loaded_at + Duration::from_secs(55), Some(ttl), Some(lead)));
	}
}
