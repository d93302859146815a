//! C5: derives how long a failed entry keeps serving its stale value and when the next retry
//! attempt is permitted. Backoff math and jitter are grounded in the teacher's
//! `registry::RetryPolicy`, generalized from HTTP attempt budgeting to per-entry retry scheduling.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// The two instants a failed load needs to schedule: how long a stale value may still be served,
/// and when the next load attempt is permitted.
#[derive(Clone, Copy, Debug)]
pub struct Schedule {
	/// `None` when no stale value is available to suppress the exception behind.
	pub suppress_until: Option<Instant>,
	/// The earliest instant at which the next load attempt for this entry is permitted.
	pub retry_at: Instant,
}

/// Resilience policy: how aggressively to retry a failing loader, and how long a stale value
/// remains eligible to be served in place of the exception.
#[derive(Clone, Debug)]
pub struct ResiliencePolicy {
	/// Whether a stale value is served at all while the loader is failing.
	pub suppress_exceptions: bool,
	/// Total duration, from the first exception in a failure streak, during which a stale value
	/// may still be served.
	pub resilience_duration: Duration,
	/// Delay before the first retry attempt.
	pub retry_interval: Duration,
	/// Upper bound the exponential backoff is clamped to.
	pub max_retry_interval: Duration,
	/// Growth factor applied to `retry_interval` per consecutive failure.
	pub multiplier: f64,
	/// Fraction of the computed backoff randomized away, in `[0.0, 1.0]`.
	pub randomization: f64,
}
impl ResiliencePolicy {
	/// Derive the suppression and retry schedule for a load that just failed with
	/// `retry_count` prior consecutive failures (0 for the first failure in a streak), the
	/// streak having started at `first_exception_at`.
	pub fn schedule(&self, now: Instant, retry_count: u32, first_exception_at: Instant) -> Schedule {
		let backoff = self.backoff_for(retry_count);
		let retry_at = now + backoff;
		let suppress_until = self
			.suppress_exceptions
			.then(|| retry_at.min(first_exception_at + self.resilience_duration))
			.filter(|until| *until > now);

		Schedule { suppress_until, retry_at }
	}

	fn backoff_for(&self, retry_count: u32) -> Duration {
		let exponent = retry_count.min(32);
		let base = self.retry_interval.mul_f64(self.multiplier.powi(exponent as i32));
		let bounded = base.min(self.max_retry_interval).max(self.retry_interval);

		self.apply_jitter(bounded)
	}

	fn apply_jitter(&self, bounded: Duration) -> Duration {
		if self.randomization <= 0.0 {
			return bounded;
		}

		let lower = bounded.mul_f64((1.0 - self.randomization).max(0.0));

		random_within(lower, bounded)
	}
}
impl Default for ResiliencePolicy {
	fn default() -> Self {
		Self {
			suppress_exceptions: true,
			resilience_duration: Duration::from_secs(30),
			retry_interval: Duration::from_millis(500),
			max_retry_interval: Duration::from_secs(30),
			multiplier: 1.5,
			randomization: 0.5,
		}
	}
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}

	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let span = (max.as_nanos() - min.as_nanos()).min(u64::MAX as u128) as u64;
		let jitter = rng.random_range(0..=span);

		min + Duration::from_nanos(jitter)
	})
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn no_suppression_without_stale_window() {
		let policy = ResiliencePolicy { suppress_exceptions: false, ..ResiliencePolicy::default() };
		let now = Instant::now();

		let schedule = policy.schedule(now, 0, now);
		assert!(schedule.suppress_until.is_none());
	}

	#[test]
	fn suppression_expires_after_resilience_duration() {
		let policy = ResiliencePolicy {
			resilience_duration: Duration::from_secs(10),
			randomization: 0.0,
			..ResiliencePolicy::default()
		};
		let first_exception_at = Instant::now();
		let still_within = first_exception_at + Duration::from_secs(5);
		let past_window = first_exception_at + Duration::from_secs(20);

		assert!(policy.schedule(still_within, 0, first_exception_at).suppress_until.is_some());
		assert!(policy.schedule(past_window, 0, first_exception_at).suppress_until.is_none());
	}

	#[test]
	fn backoff_grows_and_clamps_to_max() {
		let policy = ResiliencePolicy {
			retry_interval: Duration::from_millis(100),
			max_retry_interval: Duration::from_secs(1),
			multiplier: 2.0,
			randomization: 0.0,
			..ResiliencePolicy::default()
		};

		assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
		assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
		assert_eq!(policy.backoff_for(10), Duration::from_secs(1));
	}

	#[test]
	fn jitter_stays_within_bounds() {
		let policy = ResiliencePolicy {
			retry_interval: Duration::from_millis(100),
			max_retry_interval: Duration::from_secs(10),
			multiplier: 2.0,
			randomization: 0.5,
			..ResiliencePolicy::default()
		};

		for retry_count in 0..5 {
			let backoff = policy.backoff_for(retry_count);
			assert!(backoff <= policy.max_retry_interval);
			assert!(backoff >= policy.retry_interval.mul_f64(0.5));
		}
	}
}
