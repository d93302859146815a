//! Cache configuration: a typed builder over the knobs the loading core exposes, following the
//! teacher's `RegistryBuilder` shape rather than a config-file format.

// self
use crate::{_prelude::*, loader::Loader, resilience::ResiliencePolicy};

/// Default number of concurrent loader-executor slots.
pub const DEFAULT_LOADER_THREAD_COUNT: usize = 4;

/// Validated configuration for a [`crate::cache::LoadingCache`].
#[derive(Clone)]
pub struct CacheConfig<K, V> {
	pub(crate) loader: Option<Loader<K, V>>,
	pub(crate) expire_after_write: Option<Duration>,
	pub(crate) keep_data_after_expired: bool,
	pub(crate) permit_null_values: bool,
	pub(crate) refresh_ahead: Option<Duration>,
	pub(crate) loader_thread_count: usize,
	pub(crate) resilience: ResiliencePolicy,
}

/// Builds a [`CacheConfig`], validating constraints at `build()` time.
pub struct CacheBuilder<K, V> {
	config: CacheConfig<K, V>,
}
impl<K, V> CacheBuilder<K, V> {
	/// Create a builder with default configuration and no loader.
	pub fn new() -> Self {
		Self {
			config: CacheConfig {
				loader: None,
				expire_after_write: None,
				keep_data_after_expired: false,
				permit_null_values: false,
				refresh_ahead: None,
				loader_thread_count: DEFAULT_LOADER_THREAD_COUNT,
				resilience: ResiliencePolicy::default(),
			},
		}
	}

	/// Configure the loader used to populate missing entries.
	pub fn loader(mut self, loader: Loader<K, V>) -> Self {
		self.config.loader = Some(loader);

		self
	}

	/// Entries expire this long after being written (loaded, refreshed, or `put`).
	pub fn expire_after_write(mut self, duration: Duration) -> Self {
		self.config.expire_after_write = Some(duration);

		self
	}

	/// Whether an expired value is still handed to the loader as `current_entry` context.
	pub fn keep_data_after_expired(mut self, keep: bool) -> Self {
		self.config.keep_data_after_expired = keep;

		self
	}

	/// Whether a loader may report a successful load with no value.
	pub fn permit_null_values(mut self, permit: bool) -> Self {
		self.config.permit_null_values = permit;

		self
	}

	/// Enable refresh-ahead: entries accessed within `lead_time` of expiry trigger a background
	/// reload instead of blocking the accessing call.
	pub fn refresh_ahead(mut self, lead_time: Duration) -> Self {
		self.config.refresh_ahead = Some(lead_time);

		self
	}

	/// Number of concurrent loader-executor slots.
	pub fn loader_thread_count(mut self, count: usize) -> Self {
		self.config.loader_thread_count = count;

		self
	}

	/// Override the resilience policy governing stale-serving and retry backoff.
	pub fn resilience(mut self, policy: ResiliencePolicy) -> Self {
		self.config.resilience = policy;

		self
	}

	/// Validate and produce the final configuration.
	pub fn build(self) -> Result<CacheConfig<K, V>> {
		let config = self.config;

		if config.loader_thread_count == 0 {
			return Err(CacheError::Configuration {
				field: "loader_thread_count",
				reason: "must be at least 1".into(),
			});
		}
		if let (Some(expire), Some(refresh)) = (config.expire_after_write, config.refresh_ahead) {
			if refresh >= expire {
				return Err(CacheError::Configuration {
					field: "refresh_ahead",
					reason: "must be shorter than expire_after_write".into(),
				});
			}
		}

		Ok(config)
	}
}
impl<K, V> Default for CacheBuilder<K, V> {
	fn default() -> Self {
		Self::new()
	}
}
